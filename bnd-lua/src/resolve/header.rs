//! Form-A resolver: structured header declarations -> [`ModuleSpec`].
//!
//! Every field and parameter spelling goes through [`ctype::parse`] and is
//! then mapped to a [`BindingType`].  Only declarations owned by the module
//! (`is_dep == false`) produce bindings; dependency enums feed the
//! cross-module table so references to them keep their enum type.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::{
    ExternalTable, enum_names, number_enum_items, parse_int_literal, struct_names, validate_spec,
};
use crate::ctype::{self, CType};
use crate::decl::{Decl, DeclFile, EnumDecl, FuncDecl, StructDecl};
use crate::error::ResolveError;
use crate::model::{
    BindingType, CallbackBridge, CallbackType, EnumBinding, FieldBinding, FuncBinding,
    ModuleSpec, NamedType, ParamBinding, StructBinding,
};
use crate::naming::{enum_item_name, strip_prefix, to_pascal_case};
use crate::policy::Policy;

type Result<T> = std::result::Result<T, ResolveError>;

/// Resolve a form-A declaration set.
///
/// `source_link` is the base URL of the header; declarations carrying a line
/// number get `{source_link}#L{line}`.
pub fn resolve_decls(
    file: &DeclFile,
    policy: &Policy,
    externals: &ExternalTable,
    source_link: Option<&str>,
) -> Result<ModuleSpec> {
    let mut externals = externals.clone();
    let from_dep = |name: &str| file.dep_prefixes.iter().any(|p| name.starts_with(p.as_str()));
    for decl in file.decls.iter().filter(|d| d.is_dep()) {
        match decl {
            Decl::Enum(e) if from_dep(&e.name) => externals.register_enum(&e.name),
            _ => debug!(name = decl.name(), "ignoring dependency declaration"),
        }
    }

    let resolver = HeaderResolver {
        module: &file.module,
        prefix: &file.prefix,
        policy,
        externals: &externals,
        source_link,
        structs: own_names(file, |d| matches!(d, Decl::Struct(_))),
        enums: own_names(file, |d| matches!(d, Decl::Enum(_))),
    };

    let mut spec = ModuleSpec::new(&file.module, &file.prefix);
    for decl in file.decls.iter().filter(|d| !d.is_dep()) {
        if !policy.should_bind(decl.name()) {
            debug!(name = decl.name(), "skipping excluded declaration");
            continue;
        }
        match decl {
            Decl::Struct(s) => spec.structs.push(resolver.structure(s)?),
            Decl::Func(f) => {
                if let Some(func) = resolver.function(f)? {
                    spec.funcs.push(func);
                }
            }
            Decl::Enum(e) => spec.enums.push(resolver.enumeration(e)),
        }
    }
    spec.extra_regs = policy.extra_regs.clone();

    validate_spec(&spec)?;
    info!(
        module = %spec.module_name,
        structs = spec.structs.len(),
        funcs = spec.funcs.len(),
        enums = spec.enums.len(),
        "resolved header declarations"
    );
    Ok(spec)
}

fn own_names(file: &DeclFile, kind: impl Fn(&Decl) -> bool) -> BTreeSet<String> {
    file.decls
        .iter()
        .filter(|d| !d.is_dep() && kind(*d))
        .map(|d| d.name().to_string())
        .collect()
}

struct HeaderResolver<'a> {
    module: &'a str,
    prefix: &'a str,
    policy: &'a Policy,
    externals: &'a ExternalTable,
    source_link: Option<&'a str>,
    structs: BTreeSet<String>,
    enums: BTreeSet<String>,
}

impl HeaderResolver<'_> {
    fn link(&self, line: Option<u32>) -> Option<String> {
        Some(format!("{}#L{}", self.source_link?, line?))
    }

    fn parse(&self, spelling: &str) -> Result<CType> {
        Ok(ctype::parse(spelling)?)
    }

    fn map(&self, t: &CType, context: &str) -> Result<BindingType> {
        Ok(match t {
            CType::Int => BindingType::Int,
            CType::Int64 => BindingType::Int64,
            CType::UInt32 => BindingType::UInt32,
            CType::UInt64 => BindingType::UInt64,
            CType::Size => BindingType::Size,
            CType::UIntPtr => BindingType::UIntPtr,
            CType::IntPtr => BindingType::IntPtr,
            CType::Float => BindingType::Float,
            CType::Double => BindingType::Double,
            CType::Bool => BindingType::Bool,
            CType::String => {
                warn!(context, "bare char resolved as string");
                BindingType::Str
            }
            CType::Void => BindingType::Void,
            CType::Ptr(inner) | CType::ConstPtr(inner) if **inner == CType::String => {
                BindingType::Str
            }
            CType::Ptr(inner) if **inner == CType::Void => BindingType::VoidPtr,
            CType::Ptr(inner) => BindingType::ptr(self.map(inner, context)?),
            CType::ConstPtr(inner) => BindingType::const_ptr(self.map(inner, context)?),
            CType::FuncPtr { params, ret } => {
                let params = params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        Ok(NamedType {
                            name: format!("arg{i}"),
                            ty: self.map(p, context)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let ret = match ret.as_ref() {
                    CType::Void => None,
                    other => Some(Box::new(self.map(other, context)?)),
                };
                BindingType::Callback(CallbackType {
                    params,
                    ret,
                    context_arg: false,
                })
            }
            CType::Array(inner, len) => {
                BindingType::FixedArray(Box::new(self.map(inner, context)?), *len)
            }
            CType::NamedRef(name) => self.named(name, context)?,
        })
    }

    fn named(&self, name: &str, context: &str) -> Result<BindingType> {
        if let Some(custom) = self.policy.custom_types.get(name) {
            return Ok(custom.clone());
        }
        if self.enums.contains(name) && self.policy.should_bind(name) {
            if !self.policy.enum_allowed(name) {
                debug!(name, context, "enum not in allow-list, binding as integer");
                return Ok(BindingType::Int);
            }
            let (_, script) = enum_names(self.module, self.prefix, name);
            return Ok(BindingType::enum_ref(name, script));
        }
        if let Some(vs) = self.policy.value_structs.get(name) {
            return Ok(vs.clone());
        }
        if self.policy.handles.contains(name)
            || (self.structs.contains(name) && self.policy.should_bind(name))
        {
            let (_, metatable) = struct_names(self.module, self.prefix, name);
            return Ok(BindingType::struct_ref(name, &metatable, &metatable));
        }
        if let Some(ty) = self.externals.lookup(name) {
            return Ok(ty);
        }
        Err(ResolveError::UnresolvedReference {
            name: name.to_string(),
            context: context.to_string(),
        })
    }

    fn structure(&self, s: &StructDecl) -> Result<StructBinding> {
        let (pascal, metatable) = struct_names(self.module, self.prefix, &s.name);
        let fields = s
            .fields
            .iter()
            .map(|f| {
                let context = format!("field `{}` of `{}`", f.name, s.name);
                let ty = self.map(&self.parse(&f.ty)?, &context)?;
                let mut field = FieldBinding::new(&f.name, ty);
                if let Some(renamed) = self.policy.field_rename(&s.name, &f.name) {
                    field.script_name = renamed.to_string();
                }
                Ok(field)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut binding = StructBinding::new(&s.name, pascal, metatable, fields);
        binding.has_metamethods = self.policy.live_fields.matches(&s.name);
        binding.is_handle = self.policy.handles.contains(&s.name);
        binding.source_link = self.link(s.line);
        Ok(binding)
    }

    /// `None` when the function has a function pointer that is not followed
    /// by a `void*` user-data parameter.
    fn function(&self, f: &FuncDecl) -> Result<Option<FuncBinding>> {
        let parsed = f
            .params
            .iter()
            .map(|p| Ok((p.name.as_str(), self.parse(&p.ty)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut params = Vec::with_capacity(parsed.len());
        let mut iter = parsed.iter().peekable();
        while let Some((name, ty)) = iter.next() {
            let context = format!("parameter `{name}` of `{}`", f.name);
            let mut bound = self.map(ty, &context)?;
            if let BindingType::Callback(cb) = &mut bound {
                if !iter.peek().is_some_and(|(_, next)| next.is_void_ptr()) {
                    warn!(func = %f.name, param = %name, "callback without user-data pointer, skipping function");
                    return Ok(None);
                }
                // The user-data pointer is supplied by the bridge.
                iter.next();
                if cb.params.last().is_some_and(|p| p.ty == BindingType::VoidPtr) {
                    cb.params.pop();
                    cb.context_arg = true;
                } else {
                    debug!(func = %f.name, param = %name, "callback has no context argument, bridging through a static slot");
                }
                params.push(ParamBinding::new(*name, bound).bridge(CallbackBridge::Immediate));
                continue;
            }
            params.push(ParamBinding::new(*name, bound));
        }

        let ret = self.map(
            &ctype::parse_return_type(&f.ty)?,
            &format!("return of `{}`", f.name),
        )?;
        let script_name = to_pascal_case(strip_prefix(&f.name, self.prefix));
        let mut func = FuncBinding::new(&f.name, script_name, params, ret);
        func.source_link = self.link(f.line);
        Ok(Some(func))
    }

    fn enumeration(&self, e: &EnumDecl) -> EnumBinding {
        let (field_name, script_name) = enum_names(self.module, self.prefix, &e.name);
        let items = e.items.iter().map(|item| {
            let value = item.value.as_deref().and_then(|text| {
                let parsed = parse_int_literal(text);
                if parsed.is_none() {
                    warn!(item = %item.name, value = text, "non-literal enum value, numbering sequentially");
                }
                parsed
            });
            (item.name.clone(), value)
        });
        EnumBinding {
            c_name: e.name.clone(),
            script_name,
            field_name,
            items: number_enum_items(items, |name| {
                enum_item_name(name, &e.name, self.prefix).to_string()
            }),
            source_link: self.link(e.line),
        }
    }
}
