//! LuaCATS stub backend.
//!
//! Every class, field and function name printed here comes straight from the
//! [`ModuleSpec`]; this module makes no naming decisions of its own.

use super::builder::CodeBuilder;
use crate::model::{
    BindingType, CallbackBridge, FuncBinding, ModuleSpec, OpaqueTypeBinding, ParamBinding,
};
use crate::naming::strip_prefix;

/// Generate the stub file for one module.  Never fails: every binding type
/// has a stub spelling.
pub fn generate(spec: &ModuleSpec) -> String {
    let module = &spec.module_name;
    let mut b = CodeBuilder::new();
    b.line("---@meta");
    b.line(format!("-- LuaCATS type definitions for {module}"));
    b.line("-- Auto-generated, do not edit");
    b.blank();

    for s in &spec.structs {
        source_comment(&mut b, s.source_link.as_deref());
        b.line(format!("---@class {}", s.metatable));
        for f in &s.fields {
            b.line(format!("---@field {}? {}", f.script_name, stub_type(&f.ty)));
        }
        b.blank();
    }

    for ot in &spec.opaque_types {
        opaque_class(&mut b, ot);
    }

    b.line(format!("---@class {module}"));
    for s in &spec.structs {
        let arg = if s.allow_string_init {
            format!("{}|string", s.metatable)
        } else {
            s.metatable.clone()
        };
        b.line(format!(
            "---@field {} fun(t?: {arg}): {}",
            s.pascal_name, s.metatable
        ));
    }
    for ot in &spec.opaque_types {
        if let Some(init) = &ot.init_func {
            b.line(format!(
                "---@field {} {}",
                strip_prefix(init, &spec.prefix),
                opaque_constructor(spec, ot)
            ));
        }
    }
    for f in spec.funcs.iter().chain(&spec.extra_funcs) {
        let link = f
            .source_link
            .as_deref()
            .map_or(String::new(), |l| format!(" [source]({l})"));
        b.line(format!(
            "---@field {} {}{link}",
            f.script_name,
            signature(None, &f.params, &f.ret)
        ));
    }
    for aa in &spec.array_adapters {
        b.line(format!(
            "---@field {} fun({}): {}[]",
            aa.script_name,
            param_list(&aa.params),
            stub_type(&aa.element)
        ));
    }
    for ea in &spec.event_adapters {
        b.line(format!(
            "---@field {} fun({}): table",
            ea.script_name,
            param_list(&ea.params)
        ));
    }
    b.line(format!("---@type {module}"));
    b.line("local M = {}");
    b.blank();

    for e in &spec.enums {
        source_comment(&mut b, e.source_link.as_deref());
        b.line(format!("---@enum {}", e.script_name));
        b.line(format!("M.{} = {{", e.field_name));
        b.indent();
        for item in &e.items {
            b.line(format!("{} = {},", item.script_name, item.value));
        }
        b.dedent();
        b.line("}");
        b.blank();
    }

    b.line("return M");
    b.finish()
}

fn source_comment(b: &mut CodeBuilder, link: Option<&str>) {
    if let Some(link) = link {
        b.line(format!("--- [source]({link})"));
        b.line(format!("---@see {link}"));
    }
}

fn opaque_class(b: &mut CodeBuilder, ot: &OpaqueTypeBinding) {
    let class = &ot.class_name;
    source_comment(b, ot.source_link.as_deref());
    b.line(format!("---@class {class}"));
    if ot.has_destroy() {
        b.line(format!("---@field destroy fun(self: {class})"));
    }
    for m in &ot.methods {
        b.line(format!(
            "---@field {} {}",
            m.script_name,
            signature(Some(class), &m.params, &m.ret)
        ));
    }
    b.blank();
}

/// Constructor arguments: an optional config struct in slot 1, then the
/// parents captured for keep-alive.
fn opaque_constructor(spec: &ModuleSpec, ot: &OpaqueTypeBinding) -> String {
    let mut args = Vec::new();
    if let Some(cfg) = &ot.config_type {
        let class = spec
            .find_struct(cfg)
            .map_or("userdata", |s| s.metatable.as_str());
        args.push(format!("config?: {class}"));
    }
    let mut deps: Vec<_> = ot.dependencies.iter().collect();
    deps.sort_by_key(|d| d.ctor_arg);
    for dep in deps {
        let class = spec
            .opaque_types
            .iter()
            .find(|o| o.c_name == dep.name || o.pascal_name.eq_ignore_ascii_case(&dep.name))
            .map_or("userdata", |o| o.class_name.as_str());
        args.push(format!("{}: {class}", dep.name));
    }
    format!("fun({}): {}", args.join(", "), ot.class_name)
}

fn param_entry(p: &ParamBinding) -> String {
    let optional = p.is_optional || p.is_output || p.callback_bridge == CallbackBridge::Persistent;
    let ty = match &p.ty {
        // Outputs take their initial value, not a pointer.
        BindingType::Ptr(inner) if p.is_output => stub_type(inner),
        other => stub_type(other),
    };
    format!("{}{}: {ty}", p.name, if optional { "?" } else { "" })
}

fn param_list(params: &[ParamBinding]) -> String {
    params.iter().map(param_entry).collect::<Vec<_>>().join(", ")
}

/// `fun(self: C, a: T, b?: U): R, U` with output parameters appended to
/// the results.
fn signature(self_class: Option<&str>, params: &[ParamBinding], ret: &BindingType) -> String {
    let mut args: Vec<String> = self_class
        .map(|c| format!("self: {c}"))
        .into_iter()
        .collect();
    args.extend(params.iter().map(param_entry));

    let mut results = Vec::new();
    if *ret != BindingType::Void {
        results.push(stub_type(ret));
    }
    for p in params.iter().filter(|p| p.is_output) {
        results.push(match &p.ty {
            BindingType::Ptr(inner) => stub_type(inner),
            other => stub_type(other),
        });
    }

    let mut sig = format!("fun({})", args.join(", "));
    if !results.is_empty() {
        sig.push_str(": ");
        sig.push_str(&results.join(", "));
    }
    sig
}

/// LuaCATS spelling of a binding type.
pub fn stub_type(ty: &BindingType) -> String {
    match ty {
        BindingType::Int
        | BindingType::Int64
        | BindingType::UInt32
        | BindingType::UInt64
        | BindingType::Size
        | BindingType::UIntPtr
        | BindingType::IntPtr => "integer".to_string(),
        BindingType::Float | BindingType::Double => "number".to_string(),
        BindingType::Bool => "boolean".to_string(),
        BindingType::Str => "string".to_string(),
        ty if ty.is_void_pointer() => "lightuserdata?".to_string(),
        BindingType::VoidPtr => "lightuserdata?".to_string(),
        BindingType::Void => "nil".to_string(),
        BindingType::Ptr(inner) | BindingType::ConstPtr(inner) => stub_type(inner),
        BindingType::FixedArray(inner, _) => format!("{}[]", stub_type(inner)),
        BindingType::Struct(s) => s.class_name.clone(),
        BindingType::Enum(e) => e.script_name.clone(),
        BindingType::Callback(cb) => {
            let args = cb
                .params
                .iter()
                .map(|p| format!("{}: {}", p.name, stub_type(&p.ty)))
                .collect::<Vec<_>>()
                .join(", ");
            match cb.ret.as_deref() {
                None | Some(BindingType::Void) => format!("fun({args})"),
                Some(ret) => format!("fun({args}): {}", stub_type(ret)),
            }
        }
        BindingType::Vec2 | BindingType::Vec4 | BindingType::FloatArray(_) => {
            "number[]".to_string()
        }
        BindingType::ValueStruct(vs) => vs.stub_type.clone(),
        BindingType::ValueStructArray(vs, _) => format!("{}[]", vs.stub_type),
        BindingType::Custom(c) => c.stub_type.clone(),
    }
}

/// Stub signature of a bound function, as listed in the module class.
pub fn function_signature(f: &FuncBinding) -> String {
    signature(None, &f.params, &f.ret)
}
