//! `ModuleSpec -> ModuleSpec` passes run between resolution and emission.
//!
//! Each pass expands a domain flag into the concrete generation
//! instructions the glue backend consumes, so the backend never has to
//! interpret the flag itself.

use crate::model::{BindingType, Metamethod, ModuleSpec};

/// Give every value-type handle byte equality and a hex `__tostring`.
pub fn expand_handle_types(mut spec: ModuleSpec) -> ModuleSpec {
    for s in spec.structs.iter_mut().filter(|s| s.is_handle) {
        s.extra_metamethods = vec![Metamethod::MemcmpEq, Metamethod::HexTostring];
    }
    spec
}

/// In C++ mode, `float[N]` parameters are passed as tables and written back
/// after the call.
pub fn float_arrays_as_tables(mut spec: ModuleSpec) -> ModuleSpec {
    if spec.cpp.is_none() {
        return spec;
    }
    let params = spec
        .funcs
        .iter_mut()
        .flat_map(|f| f.params.iter_mut())
        .chain(
            spec.opaque_types
                .iter_mut()
                .flat_map(|o| o.methods.iter_mut())
                .flat_map(|m| m.params.iter_mut()),
        );
    for p in params {
        let len = match &p.ty {
            BindingType::FixedArray(inner, len) if **inner == BindingType::Float => *len,
            _ => continue,
        };
        p.ty = BindingType::FloatArray(len);
    }
    spec
}

/// All passes, in order.
pub fn apply_all(spec: ModuleSpec) -> ModuleSpec {
    float_arrays_as_tables(expand_handle_types(spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CppOptions, FuncBinding, ParamBinding, StructBinding};

    #[test]
    fn handles_get_metamethods() {
        let mut spec = ModuleSpec::new("sokol.gfx", "sg_");
        let mut handle = StructBinding::new("sg_buffer", "Buffer", "sokol.gfx.Buffer", vec![]);
        handle.is_handle = true;
        spec.structs.push(handle);
        spec.structs
            .push(StructBinding::new("sg_desc", "Desc", "sokol.gfx.Desc", vec![]));

        let spec = expand_handle_types(spec);
        assert_eq!(
            spec.structs[0].extra_metamethods,
            vec![Metamethod::MemcmpEq, Metamethod::HexTostring]
        );
        assert!(spec.structs[1].extra_metamethods.is_empty());
    }

    #[test]
    fn float_arrays_only_in_cpp_mode() {
        let mut spec = ModuleSpec::new("imgui", "");
        spec.funcs.push(FuncBinding::new(
            "ColorEdit4",
            "ColorEdit4",
            vec![ParamBinding::new(
                "col",
                BindingType::FixedArray(Box::new(BindingType::Float), 4),
            )],
            BindingType::Bool,
        ));

        let c_spec = float_arrays_as_tables(spec.clone());
        assert!(matches!(c_spec.funcs[0].params[0].ty, BindingType::FixedArray(..)));

        spec.cpp = Some(CppOptions::default());
        let cpp_spec = float_arrays_as_tables(spec);
        assert_eq!(cpp_spec.funcs[0].params[0].ty, BindingType::FloatArray(4));
    }
}
