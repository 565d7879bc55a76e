//! Declaration-file resolver.
//!
//! File-level attributes configure the module (`Prefix`, `CInclude`,
//! `FuncNaming`, `ExtraLuaReg`, `ExtraLuaFunc`); definition-level
//! attributes mark value structs, handles, persistent callbacks and the
//! rest.  Type references resolve in this order:
//!
//! 1. primitive spelling
//! 2. declared callback type
//! 3. policy escape-hatch type
//! 4. declared enum (or a plain integer when the policy disallows it)
//! 5. value struct
//! 6. value-type handle
//! 7. declared dictionary
//! 8. declared interface
//! 9. cross-module table

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::{
    ExternalTable, enum_names, number_enum_items, parse_pairs, struct_names, validate_spec,
};
use crate::error::ResolveError;
use crate::idl::ast::{
    Attributes, Dictionary, EventAdapter, IdlFile, IdlType, Interface, Operation, Param,
};
use crate::model::{
    ArrayAdapterBinding, BindingType, CallbackBridge, CallbackType, DependencyBinding,
    EnumBinding, EventAdapterBinding, EventArrayField, EventElementField, ExtraReg, FieldBinding,
    FuncBinding, InitResult, MethodBinding, ModuleSpec, NamedType, OpaqueTypeBinding,
    ParamBinding, PostCallPatch, StructBinding, ValueField, ValueStructType,
};
use crate::naming::{
    enum_item_name, strip_prefix, to_pascal_case, to_snake_case, to_upper_snake_case,
};
use crate::policy::Policy;

type Result<T> = std::result::Result<T, ResolveError>;

/// Resolve one parsed declaration file into the `ModuleSpec` for `module_name`.
pub fn resolve_idl(
    file: &IdlFile,
    module_name: &str,
    policy: &Policy,
    externals: &ExternalTable,
) -> Result<ModuleSpec> {
    warn_unknown_attributes(file);
    let resolver = IdlResolver::new(file, module_name, policy, externals);
    let spec = resolver.build()?;
    validate_spec(&spec)?;
    info!(
        module = %spec.module_name,
        structs = spec.structs.len(),
        funcs = spec.funcs.len(),
        enums = spec.enums.len(),
        opaque = spec.opaque_types.len(),
        "resolved declaration file"
    );
    Ok(spec)
}

const KNOWN_ATTRIBUTES: &[&str] = &[
    "AllowStringInit",
    "ArrayAdapter",
    "CFunc",
    "CInclude",
    "CamelCase",
    "ConfigInitFunc",
    "ConfigType",
    "CountFunc",
    "Dependency",
    "Destructor",
    "EnumItemStyle",
    "ExtraLuaFunc",
    "ExtraLuaReg",
    "FuncNaming",
    "HandleType",
    "HasMetamethods",
    "Ignore",
    "InitFunc",
    "InitResult",
    "MapFieldName",
    "Nested",
    "OptionalParams",
    "OutputParams",
    "Persistent",
    "PostCallPatch",
    "Prefix",
    "ReadOnly",
    "UninitFunc",
    "ValueStruct",
];

/// Unknown attributes are accepted but most likely a typo.
fn warn_unknown_attributes(file: &IdlFile) {
    let mut all: Vec<(&str, &Attributes)> = vec![("file", &file.attrs)];
    all.extend(file.enums.iter().map(|e| (e.name.as_str(), &e.attrs)));
    all.extend(file.callbacks.iter().map(|c| (c.name.as_str(), &c.attrs)));
    all.extend(file.events.iter().map(|e| (e.name.as_str(), &e.attrs)));
    for d in &file.dictionaries {
        all.push((d.name.as_str(), &d.attrs));
        all.extend(d.fields.iter().map(|f| (f.name.as_str(), &f.attrs)));
    }
    for i in &file.interfaces {
        all.push((i.name.as_str(), &i.attrs));
        all.extend(i.methods.iter().map(|m| (m.name.as_str(), &m.attrs)));
    }
    if let Some(ns) = &file.namespace {
        all.extend(ns.operations.iter().map(|o| (o.name.as_str(), &o.attrs)));
    }
    for (owner, attrs) in all {
        for key in attrs.keys().filter(|k| !KNOWN_ATTRIBUTES.contains(&k.as_str())) {
            warn!(owner, attribute = %key, "unknown attribute");
        }
    }
}

fn has_flag(attrs: &Attributes, key: &str) -> bool {
    attrs.contains_key(key)
}

fn attr<'a>(attrs: &'a Attributes, key: &str) -> Option<&'a str> {
    attrs.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// `"a, b"` -> `{"a", "b"}`.
fn name_list(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|r| {
        r.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

struct IdlResolver<'a> {
    file: &'a IdlFile,
    module: &'a str,
    prefix: String,
    pascal_funcs: bool,
    policy: &'a Policy,
    externals: &'a ExternalTable,
    handles: BTreeSet<String>,
}

impl<'a> IdlResolver<'a> {
    fn new(
        file: &'a IdlFile,
        module: &'a str,
        policy: &'a Policy,
        externals: &'a ExternalTable,
    ) -> Self {
        let mut handles = policy.handles.clone();
        handles.extend(
            file.dictionaries
                .iter()
                .filter(|d| has_flag(&d.attrs, "HandleType"))
                .map(|d| d.name.clone()),
        );
        Self {
            file,
            module,
            prefix: attr(&file.attrs, "Prefix").unwrap_or_default().to_string(),
            pascal_funcs: attr(&file.attrs, "FuncNaming") == Some("PascalCase"),
            policy,
            externals,
            handles,
        }
    }

    fn build(&self) -> Result<ModuleSpec> {
        let mut spec = ModuleSpec::new(self.module, &self.prefix);
        spec.includes = attr(&self.file.attrs, "CInclude")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if let Some(ns) = &self.file.namespace {
            for op in &ns.operations {
                if has_flag(&op.attrs, "Ignore") || !self.policy.should_bind(&op.name) {
                    debug!(op = %op.name, "skipping ignored operation");
                    continue;
                }
                if has_flag(&op.attrs, "ArrayAdapter") {
                    spec.array_adapters.push(self.array_adapter(op)?);
                } else {
                    spec.funcs.push(self.operation(op)?);
                }
            }
        }

        for e in &self.file.enums {
            if self.policy.should_bind(&e.name) {
                spec.enums.push(self.enumeration(e));
            }
        }

        for d in &self.file.dictionaries {
            if has_flag(&d.attrs, "ValueStruct") || !self.policy.should_bind(&d.name) {
                continue;
            }
            spec.structs.push(self.dictionary(d)?);
        }

        for iface in &self.file.interfaces {
            if !self.policy.should_bind(&iface.name) {
                debug!(interface = %iface.name, "skipping excluded interface");
                continue;
            }
            spec.opaque_types.push(self.interface(iface)?);
        }

        for ev in &self.file.events {
            if !self.policy.should_bind(&ev.name) {
                debug!(event = %ev.name, "skipping excluded event adapter");
                continue;
            }
            spec.event_adapters.push(self.event(ev)?);
        }

        if let Some(raw) = attr(&self.file.attrs, "ExtraLuaReg") {
            spec.extra_regs = parse_pairs("ExtraLuaReg", raw)?
                .into_iter()
                .map(|(script_name, c_func)| ExtraReg {
                    script_name,
                    c_func,
                })
                .collect();
        }
        spec.extra_regs.extend(self.policy.extra_regs.iter().cloned());

        if let Some(raw) = attr(&self.file.attrs, "ExtraLuaFunc") {
            spec.extra_funcs = self.extra_funcs(raw)?;
        }

        Ok(spec)
    }

    // -----------------------------------------------------------------------
    // Type resolution
    // -----------------------------------------------------------------------

    fn resolve(&self, t: &IdlType, context: &str) -> Result<BindingType> {
        if let Some(len) = t.array_len {
            let inner = self.resolve_name(&t.name, context)?;
            return Ok(BindingType::FixedArray(Box::new(inner), len));
        }
        self.resolve_name(&t.name, context)
    }

    fn resolve_name(&self, name: &str, context: &str) -> Result<BindingType> {
        if let Some(ty) = primitive(name) {
            return Ok(ty);
        }
        if let Some(cb) = self.file.callbacks.iter().find(|c| c.name == name) {
            let params = cb
                .params
                .iter()
                .map(|p| {
                    Ok(NamedType {
                        name: p.name.clone(),
                        ty: self.resolve(&p.ty, &format!("callback `{name}`"))?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let ret = self.resolve(&cb.ret, &format!("return of callback `{name}`"))?;
            return Ok(BindingType::Callback(CallbackType {
                params,
                ret: Some(Box::new(ret)),
                context_arg: true,
            }));
        }
        if let Some(custom) = self.policy.custom_types.get(name) {
            return Ok(custom.clone());
        }
        if self.file.enums.iter().any(|e| e.name == name) {
            if !self.policy.enum_allowed(name) {
                debug!(name, context, "enum not in allow-list, binding as integer");
                return Ok(BindingType::Int);
            }
            let (_, script) = enum_names(self.module, &self.prefix, name);
            return Ok(BindingType::enum_ref(name, script));
        }
        if let Some(d) = self
            .file
            .dictionary(name)
            .filter(|d| has_flag(&d.attrs, "ValueStruct"))
        {
            return Ok(BindingType::ValueStruct(value_struct(d)?));
        }
        if let Some(vs) = self.policy.value_structs.get(name) {
            return Ok(vs.clone());
        }
        let is_dict = self.file.dictionary(name).is_some();
        if self.handles.contains(name)
            || ((is_dict || self.is_interface(name)) && self.policy.should_bind(name))
        {
            return Ok(self.struct_type(name));
        }
        if let Some(ty) = self.externals.lookup(name) {
            return Ok(ty);
        }
        Err(ResolveError::UnresolvedReference {
            name: name.to_string(),
            context: context.to_string(),
        })
    }

    fn struct_type(&self, c_name: &str) -> BindingType {
        let (_, metatable) = struct_names(self.module, &self.prefix, c_name);
        BindingType::struct_ref(c_name, &metatable, &metatable)
    }

    /// Plain structs are passed by const pointer; handles stay by value.
    fn promote_struct_param(&self, ty: BindingType) -> BindingType {
        let ty = self.interface_param(ty);
        let by_pointer =
            matches!(&ty, BindingType::Struct(s) if !self.handles.contains(&s.c_name));
        if by_pointer {
            BindingType::const_ptr(ty)
        } else {
            ty
        }
    }

    /// An interface value only exists behind its box, so it is always
    /// passed as the pointer the box holds.
    fn interface_param(&self, ty: BindingType) -> BindingType {
        let is_interface = matches!(&ty, BindingType::Struct(s) if self.is_interface(&s.c_name));
        if is_interface {
            BindingType::ptr(ty)
        } else {
            ty
        }
    }

    /// Parameter type: like [`resolve`](Self::resolve), but a fixed array
    /// of value structs becomes a bounded `ValueStructArray`.
    fn resolve_param(&self, p: &Param, owner: &str) -> Result<BindingType> {
        let context = format!("parameter `{}` of `{owner}`", p.name);
        let ty = self.resolve(&p.ty, &context)?;
        Ok(match ty {
            BindingType::FixedArray(inner, len) => match *inner {
                BindingType::ValueStruct(vs) => BindingType::ValueStructArray(vs, len),
                other => BindingType::FixedArray(Box::new(other), len),
            },
            other => other,
        })
    }

    fn is_interface(&self, name: &str) -> bool {
        self.file.interfaces.iter().any(|i| i.name == name)
    }

    fn is_callback(&self, t: &IdlType) -> bool {
        t.array_len.is_none() && self.file.callbacks.iter().any(|c| c.name == t.name)
    }

    fn is_persistent(&self, t: &IdlType) -> bool {
        self.file
            .callbacks
            .iter()
            .any(|c| c.name == t.name && has_flag(&c.attrs, "Persistent"))
    }

    fn script_func_name(&self, op_name: &str) -> String {
        if self.pascal_funcs {
            to_snake_case(op_name)
        } else {
            op_name.to_string()
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    fn operation(&self, op: &Operation) -> Result<FuncBinding> {
        let c_name = format!("{}{}", self.prefix, op.name);
        let outputs = name_list(attr(&op.attrs, "OutputParams"));
        let optionals = name_list(attr(&op.attrs, "OptionalParams"));

        let mut params = Vec::with_capacity(op.params.len());
        let mut skip_context = false;
        for p in &op.params {
            // The `void*` context right after a callback is supplied by the
            // bridge, not by the script.
            if std::mem::take(&mut skip_context) && p.ty.name == "VoidPtr" {
                continue;
            }
            let ty = self.resolve_param(p, &op.name)?;
            if self.is_callback(&p.ty) {
                let bridge = if self.is_persistent(&p.ty) {
                    CallbackBridge::Persistent
                } else {
                    CallbackBridge::Immediate
                };
                let mut param = ParamBinding::new(&p.name, ty).bridge(bridge);
                param.is_optional = bridge == CallbackBridge::Persistent;
                params.push(param);
                skip_context = true;
                continue;
            }
            let mut param = ParamBinding::new(&p.name, self.promote_struct_param(ty));
            param.is_output = outputs.contains(&p.name);
            param.is_optional = optionals.contains(&p.name);
            params.push(param);
        }

        let post_call_patches = match attr(&op.attrs, "PostCallPatch") {
            Some(raw) => parse_pairs("PostCallPatch", raw)?
                .into_iter()
                .map(|(field, c_expr)| PostCallPatch { field, c_expr })
                .collect(),
            None => Vec::new(),
        };

        let ret = self.resolve(&op.ret, &format!("return of `{}`", op.name))?;
        let mut func = FuncBinding::new(c_name, self.script_func_name(&op.name), params, ret);
        func.post_call_patches = post_call_patches;
        Ok(func)
    }

    fn array_adapter(&self, op: &Operation) -> Result<ArrayAdapterBinding> {
        let count_func = attr(&op.attrs, "CountFunc")
            .ok_or_else(|| ResolveError::InvalidAttribute {
                attribute: "ArrayAdapter".to_string(),
                value: format!("`{}` has no CountFunc", op.name),
            })?
            .to_string();
        let params = op
            .params
            .iter()
            .map(|p| Ok(ParamBinding::new(&p.name, self.resolve_param(p, &op.name)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(ArrayAdapterBinding {
            script_name: self.script_func_name(&op.name),
            count_func,
            fill_func: format!("{}{}", self.prefix, op.name),
            params,
            element: self.resolve(&op.ret, &format!("element of `{}`", op.name))?,
        })
    }

    /// `ExtraLuaFunc="name:t1+t2?:ret,..."`: stub-only declarations.
    fn extra_funcs(&self, raw: &str) -> Result<Vec<FuncBinding>> {
        let invalid = || ResolveError::InvalidAttribute {
            attribute: "ExtraLuaFunc".to_string(),
            value: raw.to_string(),
        };
        let mut funcs = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.split(':').map(str::trim);
            let (Some(name), Some(param_types), Some(ret_name)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(invalid());
            };
            let context = format!("extra function `{name}`");
            let mut params = Vec::new();
            if param_types != "void" {
                let pieces: Vec<&str> = param_types.split('+').map(str::trim).collect();
                for (i, piece) in pieces.iter().enumerate() {
                    let (type_name, optional) = match piece.strip_suffix('?') {
                        Some(t) => (t, true),
                        None => (*piece, false),
                    };
                    let param_name = if pieces.len() == 1 {
                        "desc".to_string()
                    } else {
                        format!("p{}", i + 1)
                    };
                    let mut param =
                        ParamBinding::new(param_name, self.resolve_name(type_name, &context)?);
                    param.is_optional = optional;
                    params.push(param);
                }
            }
            let ret = self.resolve_name(ret_name, &context)?;
            funcs.push(FuncBinding::new(
                format!("l_{}{name}", self.prefix),
                name,
                params,
                ret,
            ));
        }
        Ok(funcs)
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    fn enumeration(&self, e: &crate::idl::ast::Enum) -> EnumBinding {
        let (field_name, script_name) = enum_names(self.module, &self.prefix, &e.name);
        let camel = attr(&e.attrs, "EnumItemStyle") == Some("CamelCase");
        let item_prefix = format!("{}_", self.prefix);
        let items = number_enum_items(
            e.items.iter().map(|i| (i.name.clone(), i.value)),
            |item| {
                if camel {
                    to_upper_snake_case(strip_prefix(item, &item_prefix))
                } else {
                    enum_item_name(item, &e.name, &self.prefix).to_uppercase()
                }
            },
        );
        EnumBinding {
            c_name: e.name.clone(),
            script_name,
            field_name,
            items,
            source_link: None,
        }
    }

    fn dictionary(&self, d: &Dictionary) -> Result<StructBinding> {
        let (pascal, metatable) = struct_names(self.module, &self.prefix, &d.name);
        let camel = has_flag(&d.attrs, "CamelCase");
        let renames: Vec<(String, String)> = match attr(&d.attrs, "MapFieldName") {
            Some(raw) => parse_pairs("MapFieldName", raw)?,
            None => Vec::new(),
        };

        let mut fields = Vec::new();
        for f in &d.fields {
            if has_flag(&f.attrs, "Ignore") {
                continue;
            }
            let context = format!("field `{}` of `{}`", f.name, d.name);
            let mut script_name = if camel {
                to_snake_case(&f.name)
            } else {
                f.name.clone()
            };
            if let Some(mapped) = attr(&f.attrs, "MapFieldName") {
                script_name = mapped.to_string();
            }
            if let Some((_, to)) = renames.iter().find(|(from, _)| *from == f.name) {
                script_name = to.clone();
            }
            if let Some(to) = self.policy.field_rename(&d.name, &f.name) {
                script_name = to.to_string();
            }
            fields.push(FieldBinding {
                c_name: f.name.clone(),
                script_name,
                ty: self.resolve(&f.ty, &context)?,
            });
        }

        let mut binding = StructBinding::new(&d.name, pascal, metatable, fields);
        binding.has_metamethods =
            has_flag(&d.attrs, "HasMetamethods") || self.policy.live_fields.matches(&d.name);
        binding.allow_string_init = has_flag(&d.attrs, "AllowStringInit");
        binding.is_handle = self.handles.contains(&d.name);
        Ok(binding)
    }

    fn interface(&self, iface: &Interface) -> Result<OpaqueTypeBinding> {
        let (pascal, metatable) = struct_names(self.module, &self.prefix, &iface.name);
        let mut ot = OpaqueTypeBinding::new(&iface.name, pascal, metatable);
        let owned = |key: &str| attr(&iface.attrs, key).map(str::to_string);
        ot.init_func = owned("InitFunc");
        ot.uninit_func = owned("UninitFunc");
        ot.config_type = owned("ConfigType");
        ot.config_init_func = owned("ConfigInitFunc");
        ot.custom_destructor = owned("Destructor");

        if let Some(raw) = attr(&iface.attrs, "InitResult") {
            let (c_type, success) =
                raw.split_once(':')
                    .ok_or_else(|| ResolveError::InvalidAttribute {
                        attribute: "InitResult".to_string(),
                        value: raw.to_string(),
                    })?;
            ot.init_result = InitResult {
                c_type: c_type.trim().to_string(),
                success: success.trim().to_string(),
            };
        }

        if let Some(raw) = attr(&iface.attrs, "Dependency") {
            for (name, index) in parse_pairs("Dependency", raw)? {
                let index: usize =
                    index
                        .parse()
                        .map_err(|_| ResolveError::InvalidDependency {
                            type_name: iface.name.clone(),
                            detail: format!("`{index}` is not an argument index"),
                        })?;
                ot.dependencies.push(DependencyBinding {
                    ctor_arg: index,
                    slot: index,
                    name,
                });
            }
        }

        for m in iface.methods.iter().filter(|m| !has_flag(&m.attrs, "Ignore")) {
            let params = m
                .params
                .iter()
                .map(|p| {
                    let ty = self.interface_param(self.resolve_param(p, &m.name)?);
                    Ok(ParamBinding::new(&p.name, ty))
                })
                .collect::<Result<Vec<_>>>()?;
            ot.methods.push(MethodBinding {
                c_name: format!("{}_{}", iface.name, m.name),
                script_name: m.name.clone(),
                params,
                ret: self.resolve(&m.ret, &format!("return of `{}.{}`", iface.name, m.name))?,
                source_link: None,
            });
        }
        Ok(ot)
    }

    fn event(&self, ev: &EventAdapter) -> Result<EventAdapterBinding> {
        let c_func = attr(&ev.attrs, "CFunc")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}{}", self.prefix, to_pascal_case(&ev.name)));
        let params = ev
            .params
            .iter()
            .map(|p| Ok(ParamBinding::new(&p.name, self.resolve_param(p, &ev.name)?)))
            .collect::<Result<Vec<_>>>()?;
        let arrays = ev
            .arrays
            .iter()
            .map(|a| {
                let elements = a
                    .fields
                    .iter()
                    .map(|f| {
                        let context = format!("event field `{}.{}`", a.name, f.name);
                        Ok(EventElementField {
                            script_name: f.name.clone(),
                            c_accessor: f.c_accessor.clone(),
                            ty: self.resolve(&f.ty, &context)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(EventArrayField {
                    script_name: a.name.clone(),
                    c_array: a.c_array.clone(),
                    c_count: a.c_count.clone(),
                    elements,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EventAdapterBinding {
            script_name: ev.name.clone(),
            c_func,
            c_return_type: ev.c_return_type.clone(),
            params,
            arrays,
        })
    }
}

/// Spellings with a fixed meaning.
fn primitive(name: &str) -> Option<BindingType> {
    let ty = match name {
        "void" => BindingType::Void,
        "unsigned long long" => BindingType::UInt64,
        "long long" => BindingType::Int64,
        "unsigned long" => BindingType::UInt32,
        "long" | "unsigned short" | "short" | "byte" | "octet" => BindingType::Int,
        "float" => BindingType::Float,
        "double" => BindingType::Double,
        "boolean" => BindingType::Bool,
        "DOMString" => BindingType::Str,
        "VoidPtr" => BindingType::VoidPtr,
        "ConstVoidPtr" => BindingType::const_ptr(BindingType::Void),
        "Size" => BindingType::Size,
        "UIntPtr" => BindingType::UIntPtr,
        "IntPtr" => BindingType::IntPtr,
        "Vec2" => BindingType::Vec2,
        "Vec4" => BindingType::Vec4,
        "Callback" => BindingType::Callback(CallbackType {
            params: Vec::new(),
            ret: Some(Box::new(BindingType::Void)),
            context_arg: true,
        }),
        _ => return None,
    };
    Some(ty)
}

/// `[ValueStruct]` dictionary -> its table layout.
///
/// `[Nested="p:x+y,q:c+s"]` replaces the declared fields with nested
/// groups; otherwise each declared field is one scalar slot.
fn value_struct(d: &Dictionary) -> Result<ValueStructType> {
    let nested = attr(&d.attrs, "Nested");
    let fields = match nested {
        Some(raw) => parse_pairs("Nested", raw)?
            .into_iter()
            .map(|(accessor, subs)| ValueField::Nested {
                accessor,
                subs: subs.split('+').map(|s| s.trim().to_string()).collect(),
            })
            .collect(),
        None => d
            .fields
            .iter()
            .map(|f| ValueField::Scalar(f.name.clone()))
            .collect(),
    };
    Ok(ValueStructType {
        c_type: d.name.clone(),
        stub_type: (if nested.is_some() { "number[][]" } else { "number[]" }).to_string(),
        fields,
        settable: !has_flag(&d.attrs, "ReadOnly"),
    })
}
