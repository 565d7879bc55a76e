//! C++ flavour of the glue backend, for libraries with a C++-only API.
//!
//! Only functions and enums are bound.  The entry point does not create a
//! module table: it installs the functions into a table the host already
//! owns, so one library can be spread over several generated files.

use super::builder::CodeBuilder;
use super::glue::{api_macro, enum_table, lua_reg};
use crate::error::GenerateError;
use crate::model::{BindingType, CppOptions, FuncBinding, ModuleSpec, ParamBinding};
use crate::naming::c_identifier;

type Result<T> = std::result::Result<T, GenerateError>;

pub(super) fn generate(spec: &ModuleSpec, opts: &CppOptions) -> Result<String> {
    let mut b = CodeBuilder::new();
    header(&mut b, &spec.includes);

    for f in &spec.funcs {
        function(&mut b, f, opts.namespace.as_deref())?;
    }
    for e in &spec.enums {
        enum_table(&mut b, e);
    }

    let module = c_identifier(&spec.module_name);
    let funcs_array = match &opts.entry_point {
        Some(entry) => format!("{}_funcs", entry.replace("luaopen_", "")),
        None => format!("{module}_funcs"),
    };
    let mut entries: Vec<(String, String)> = spec
        .funcs
        .iter()
        .map(|f| (f.script_name.clone(), format!("l_{}", f.c_name)))
        .collect();
    entries.extend(
        spec.extra_regs
            .iter()
            .map(|r| (r.script_name.clone(), r.c_func.clone())),
    );
    lua_reg(&mut b, &funcs_array, &entries);

    let entry = opts
        .entry_point
        .clone()
        .unwrap_or_else(|| format!("luaopen_{module}"));
    b.block(
        format!("extern \"C\" void {entry}(lua_State *L, int table_idx)"),
        |b| {
            b.line("int abs_idx = lua_absindex(L, table_idx);");
            b.line("lua_pushvalue(L, abs_idx);");
            b.line(format!("luaL_setfuncs(L, {funcs_array}, 0);"));
            for e in &spec.enums {
                b.line(format!("register_{}(L);", e.c_name));
            }
            b.line("lua_pop(L, 1);");
        },
    );
    Ok(b.finish())
}

/// User headers stay outside `extern "C"`; the Lua headers go inside it.
fn header(b: &mut CodeBuilder, includes: &[String]) {
    b.line("/* machine generated, do not edit */");
    for h in includes {
        b.line(format!("#include \"{h}\""));
    }
    b.blank();
    b.line("extern \"C\" {");
    for h in ["lua.h", "lauxlib.h", "lualib.h"] {
        b.line(format!("#include <{h}>"));
    }
    b.line("}  /* extern \"C\" */");
    b.blank();
    for h in ["string.h", "stdint.h", "stdlib.h"] {
        b.line(format!("#include <{h}>"));
    }
    b.blank();
    api_macro(b);
}

const VEC_COMPONENTS: [&str; 4] = ["x", "y", "z", "w"];

fn vector_len(ty: &BindingType) -> Option<usize> {
    match ty {
        BindingType::Vec2 => Some(2),
        BindingType::Vec4 => Some(4),
        _ => None,
    }
}

fn read_vector(b: &mut CodeBuilder, name: &str, idx: usize, len: usize) {
    for (i, comp) in VEC_COMPONENTS.iter().take(len).enumerate() {
        b.line(format!(
            "lua_rawgeti(L, {idx}, {}); {name}.{comp} = (float)lua_tonumber(L, -1); lua_pop(L, 1);",
            i + 1
        ));
    }
}

fn float_array_input(b: &mut CodeBuilder, name: &str, idx: usize, len: usize, required: bool) {
    b.line(format!("float {name}[{len}] = {{0}};"));
    let read = |b: &mut CodeBuilder| {
        for i in 0..len {
            b.line(format!(
                "lua_rawgeti(L, {idx}, {}); {name}[{i}] = (float)lua_tonumber(L, -1); lua_pop(L, 1);",
                i + 1
            ));
        }
    };
    if required {
        b.line(format!("luaL_checktype(L, {idx}, LUA_TTABLE);"));
        read(b);
    } else {
        b.block(format!("if (lua_istable(L, {idx}))"), read);
    }
}

fn unsupported(func: &str, p: &ParamBinding) -> GenerateError {
    GenerateError::UnsupportedParam {
        func: func.to_string(),
        param: p.name.clone(),
        ty: p.ty.c_spelling(),
    }
}

fn param_decl(b: &mut CodeBuilder, func: &str, p: &ParamBinding, idx: usize) -> Result<()> {
    let name = &p.name;
    match &p.ty {
        ty if ty.c_integer().is_some() => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name} = ({t})luaL_checkinteger(L, {idx});"));
        }
        ty if ty.c_floating().is_some() => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name} = ({t})luaL_checknumber(L, {idx});"));
        }
        BindingType::Bool => {
            b.line(format!("bool {name} = lua_toboolean(L, {idx});"));
        }
        ty if ty.is_string() => {
            b.line(format!("const char* {name} = luaL_checkstring(L, {idx});"));
        }
        BindingType::Enum(e) => {
            let t = &e.c_name;
            b.line(format!("{t} {name} = ({t})luaL_checkinteger(L, {idx});"));
        }
        BindingType::VoidPtr => {
            b.line(format!("void* {name} = lua_touserdata(L, {idx});"));
        }
        ty @ (BindingType::Vec2 | BindingType::Vec4) => {
            b.line(format!("luaL_checktype(L, {idx}, LUA_TTABLE);"));
            b.line(format!("{} {name};", ty.c_spelling()));
            read_vector(b, name, idx, vector_len(ty).unwrap_or(0));
        }
        BindingType::FloatArray(len) => float_array_input(b, name, idx, *len, true),
        _ => return Err(unsupported(func, p)),
    }
    Ok(())
}

fn optional_param_decl(b: &mut CodeBuilder, func: &str, p: &ParamBinding, idx: usize) -> Result<()> {
    let name = &p.name;
    match &p.ty {
        ty if ty.c_integer().is_some() => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name} = ({t})luaL_optinteger(L, {idx}, 0);"));
        }
        ty if ty.c_floating().is_some() => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name} = ({t})luaL_optnumber(L, {idx}, 0.0);"));
        }
        BindingType::Bool => {
            b.line(format!("bool {name} = lua_toboolean(L, {idx});"));
        }
        ty if ty.is_string() => {
            b.line(format!("const char* {name} = luaL_optstring(L, {idx}, NULL);"));
        }
        BindingType::Enum(e) => {
            let t = &e.c_name;
            b.line(format!("{t} {name} = ({t})luaL_optinteger(L, {idx}, 0);"));
        }
        ty @ (BindingType::Vec2 | BindingType::Vec4) => {
            let len = vector_len(ty).unwrap_or(0);
            let t = ty.c_spelling();
            let zeros = vec!["0"; len].join(", ");
            b.line(format!("{t} {name} = {t}({zeros});"));
            b.block(format!("if (lua_istable(L, {idx}))"), |b| {
                read_vector(b, name, idx, len);
            });
        }
        BindingType::FloatArray(len) => float_array_input(b, name, idx, *len, false),
        _ => return Err(unsupported(func, p)),
    }
    Ok(())
}

fn output_slot(ty: &BindingType) -> &BindingType {
    match ty {
        BindingType::Ptr(inner) => inner,
        other => other,
    }
}

/// Declare the local behind an output parameter; returns the argument
/// expression passed to the native call.
fn output_param_decl(
    b: &mut CodeBuilder,
    func: &str,
    p: &ParamBinding,
    idx: usize,
) -> Result<String> {
    let name = &p.name;
    Ok(match output_slot(&p.ty) {
        // `bool*` may be NULL (e.g. a window's close flag): only passed when
        // the caller supplied a boolean, unless the parameter is required.
        BindingType::Bool => {
            b.line(format!("bool {name}_val = true;"));
            b.line(format!("bool* {name} = NULL;"));
            b.block(format!("if (lua_isboolean(L, {idx}))"), |b| {
                b.line(format!("{name}_val = lua_toboolean(L, {idx});"));
                b.line(format!("{name} = &{name}_val;"));
            });
            if p.is_optional {
                name.clone()
            } else {
                format!("&{name}_val")
            }
        }
        BindingType::UInt32 => {
            b.line(format!("unsigned int {name}_val = 0;"));
            b.line(format!(
                "if (lua_isinteger(L, {idx})) {name}_val = (unsigned int)lua_tointeger(L, {idx});"
            ));
            format!("&{name}_val")
        }
        ty if ty.c_integer().is_some() => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name}_val = 0;"));
            b.line(format!(
                "if (lua_isinteger(L, {idx})) {name}_val = ({t})lua_tointeger(L, {idx});"
            ));
            format!("&{name}_val")
        }
        BindingType::Float => {
            b.line(format!("float {name}_val = 0.0f;"));
            b.line(format!(
                "if (lua_isnumber(L, {idx})) {name}_val = (float)lua_tonumber(L, {idx});"
            ));
            format!("&{name}_val")
        }
        BindingType::Double => {
            b.line(format!("double {name}_val = 0.0;"));
            b.line(format!(
                "if (lua_isnumber(L, {idx})) {name}_val = (double)lua_tonumber(L, {idx});"
            ));
            format!("&{name}_val")
        }
        BindingType::FloatArray(len) => {
            float_array_input(b, name, idx, *len, true);
            name.clone()
        }
        _ => return Err(unsupported(func, p)),
    })
}

fn output_push(b: &mut CodeBuilder, p: &ParamBinding, idx: usize) {
    let name = &p.name;
    match output_slot(&p.ty) {
        BindingType::Bool => {
            b.line(format!("lua_pushboolean(L, {name}_val);"));
        }
        ty if ty.c_floating().is_some() => {
            b.line(format!("lua_pushnumber(L, (lua_Number){name}_val);"));
        }
        BindingType::FloatArray(len) => {
            // Written back into the caller's table, which is also returned.
            for i in 0..*len {
                b.line(format!(
                    "lua_pushnumber(L, {name}[{i}]); lua_rawseti(L, {idx}, {});",
                    i + 1
                ));
            }
            b.line(format!("lua_pushvalue(L, {idx});"));
        }
        _ => {
            b.line(format!("lua_pushinteger(L, (lua_Integer){name}_val);"));
        }
    }
}

/// Returns the number of values pushed.
fn push_return(b: &mut CodeBuilder, func: &str, ret: &BindingType, call: &str) -> Result<usize> {
    match ret {
        BindingType::Void => {
            b.line(format!("{call};"));
            return Ok(0);
        }
        ty if ty.c_integer().is_some() || matches!(ty, BindingType::Enum(_)) => {
            b.line(format!("lua_pushinteger(L, (lua_Integer){call});"));
        }
        ty if ty.c_floating().is_some() => {
            b.line(format!("lua_pushnumber(L, (lua_Number){call});"));
        }
        BindingType::Bool => {
            b.line(format!("lua_pushboolean(L, {call});"));
        }
        ty if ty.is_string() => {
            b.line(format!("lua_pushstring(L, {call});"));
        }
        ty if ty.is_void_pointer() => {
            b.line(format!("lua_pushlightuserdata(L, (void*){call});"));
        }
        ty @ (BindingType::Vec2 | BindingType::Vec4) => {
            b.line(format!("{} _result = {call};", ty.c_spelling()));
            b.line("lua_newtable(L);");
            let len = vector_len(ty).unwrap_or(0);
            for (i, comp) in VEC_COMPONENTS.iter().take(len).enumerate() {
                b.line(format!(
                    "lua_pushnumber(L, _result.{comp}); lua_rawseti(L, -2, {});",
                    i + 1
                ));
            }
        }
        other => {
            return Err(GenerateError::UnsupportedReturn {
                func: func.to_string(),
                ty: other.c_spelling(),
            });
        }
    }
    Ok(1)
}

fn function(b: &mut CodeBuilder, f: &FuncBinding, namespace: Option<&str>) -> Result<()> {
    b.try_block(format!("static int l_{}(lua_State *L)", f.c_name), |b| {
        let mut args = Vec::with_capacity(f.params.len());
        let mut outputs = Vec::new();
        for (i, p) in f.params.iter().enumerate() {
            let idx = i + 1;
            if p.is_output {
                args.push(output_param_decl(b, &f.c_name, p, idx)?);
                outputs.push((p, idx));
            } else if p.is_optional {
                optional_param_decl(b, &f.c_name, p, idx)?;
                args.push(p.name.clone());
            } else {
                param_decl(b, &f.c_name, p, idx)?;
                args.push(p.name.clone());
            }
        }
        let call = match namespace {
            Some(ns) => format!("{ns}::{}({})", f.c_name, args.join(", ")),
            None => format!("{}({})", f.c_name, args.join(", ")),
        };
        let mut results = push_return(b, &f.c_name, &f.ret, &call)?;
        for (p, idx) in outputs {
            output_push(b, p, idx);
            results += 1;
        }
        b.line(format!("return {results};"));
        Ok(())
    })?;
    b.blank();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_vectors_default_to_zero() {
        let mut b = CodeBuilder::new();
        let p = ParamBinding::new("size", BindingType::Vec2).optional();
        optional_param_decl(&mut b, "Button", &p, 2).unwrap();
        let out = b.finish();
        assert!(out.starts_with("ImVec2 size = ImVec2(0, 0);\n"), "got:\n{out}");
        assert!(out.contains("if (lua_istable(L, 2)) {"), "got:\n{out}");
    }

    #[test]
    fn optional_bool_output_passes_nullable_pointer() {
        let mut b = CodeBuilder::new();
        let p = ParamBinding::new("p_open", BindingType::ptr(BindingType::Bool))
            .output()
            .optional();
        let arg = output_param_decl(&mut b, "Begin", &p, 2).unwrap();
        assert_eq!(arg, "p_open");

        let required = ParamBinding::new("v", BindingType::ptr(BindingType::Bool)).output();
        let arg = output_param_decl(&mut CodeBuilder::new(), "Checkbox", &required, 2).unwrap();
        assert_eq!(arg, "&v_val");
    }

    #[test]
    fn struct_params_are_rejected() {
        let p = ParamBinding::new("d", BindingType::struct_ref("Desc", "m.Desc", "m.Desc"));
        let err = param_decl(&mut CodeBuilder::new(), "f", &p, 1).unwrap_err();
        assert!(matches!(err, GenerateError::UnsupportedParam { .. }));
    }
}
