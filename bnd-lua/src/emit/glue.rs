//! Glue backend: [`ModuleSpec`] -> C source against the Lua 5.4 C API.
//!
//! Output order is fixed: header, opaque `check_*` helpers, struct
//! constructors and metamethods, function wrappers, array and event
//! adapters, opaque types, enum tables, `register_metatables`, the
//! `luaL_Reg` array and `luaopen_*`.  Every
//! identifier is derived from spec content alone, so the same spec always
//! produces the same bytes.
//!
//! Lifetimes across the boundary:
//!
//! * A struct built from a table keeps that table in user value 1, because
//!   `const char*` fields alias strings owned by it.
//! * Opaque types are boxed as `T**`.  The finalizer (and `destroy`) release
//!   the native object and null the inner pointer; every accessor goes
//!   through `check_T`, which raises instead of dereferencing a freed value.
//!   That includes opaque values passed as arguments to other functions.
//! * Child opaque values keep their parent alive through user-value slots
//!   filled from constructor arguments.

use std::collections::{BTreeMap, BTreeSet};

use super::builder::CodeBuilder;
use super::cpp;
use crate::error::GenerateError;
use crate::model::{
    BindingType, CallbackBridge, CallbackType, EnumBinding, EventAdapterBinding, EventElementField,
    ArrayAdapterBinding, FieldBinding, FuncBinding, Metamethod, ModuleSpec, OpaqueTypeBinding,
    ParamBinding, PostCallPatch, StructBinding, StructRef, ValueField, ValueStructType,
};
use crate::naming::{c_identifier, strip_prefix};

type Result<T> = std::result::Result<T, GenerateError>;

/// Structs bound in this module, by native name.
type StructIndex<'a> = BTreeMap<&'a str, &'a StructBinding>;

/// Opaque types bound in this module, by native name.
type OpaqueSet<'a> = BTreeSet<&'a str>;

fn opaque_names(spec: &ModuleSpec) -> OpaqueSet<'_> {
    spec.opaque_types.iter().map(|o| o.c_name.as_str()).collect()
}

/// The opaque type `ty` names, by value or through one pointer.
fn opaque_ref<'t>(ty: &'t BindingType, opaque: &OpaqueSet) -> Option<&'t StructRef> {
    let s = match ty {
        BindingType::Struct(s) => s,
        BindingType::Ptr(inner) | BindingType::ConstPtr(inner) => match inner.as_ref() {
            BindingType::Struct(s) => s,
            _ => return None,
        },
        _ => return None,
    };
    opaque.contains(s.c_name.as_str()).then_some(s)
}

/// Generate the glue source for one module.
///
/// Fails only when the `ModuleSpec` violates an invariant the resolvers uphold
/// (an unbridged callback parameter, an array return, a type with no
/// marshalling rule in the position it appears).
pub fn generate(spec: &ModuleSpec) -> Result<String> {
    validate(spec)?;
    if let Some(opts) = &spec.cpp {
        return cpp::generate(spec, opts);
    }

    let structs: StructIndex = spec
        .structs
        .iter()
        .map(|s| (s.c_name.as_str(), s))
        .collect();
    let opaque = opaque_names(spec);
    let mut b = CodeBuilder::new();
    c_header(&mut b, &spec.includes);

    // Hand-written code may call the opaque `l_*` functions, so it goes
    // after them when there are any.
    if spec.opaque_types.is_empty() {
        extra_code(&mut b, spec);
    }

    // Struct fields and function arguments may hold opaque values, so the
    // checks come before anything that reads one.
    for ot in &spec.opaque_types {
        opaque_check(&mut b, ot);
    }

    for s in &spec.structs {
        struct_constructor(&mut b, s, &structs, &opaque);
        if s.has_metamethods {
            struct_index(&mut b, s);
            struct_newindex(&mut b, s, &structs, &opaque);
            struct_pairs(&mut b, s);
        }
        for mm in &s.extra_metamethods {
            match mm {
                Metamethod::MemcmpEq => struct_eq(&mut b, s),
                Metamethod::HexTostring => struct_tostring(&mut b, s),
            }
        }
    }

    for f in &spec.funcs {
        function(&mut b, f, &opaque)?;
    }
    for aa in &spec.array_adapters {
        array_adapter(&mut b, &spec.module_name, aa, &opaque)?;
    }
    for ea in &spec.event_adapters {
        event_adapter(&mut b, &spec.module_name, ea, &opaque)?;
    }
    for ot in &spec.opaque_types {
        opaque_type(&mut b, ot, &structs, &opaque)?;
    }

    if !spec.opaque_types.is_empty() {
        extra_code(&mut b, spec);
    }

    for e in &spec.enums {
        enum_table(&mut b, e);
    }

    register_metatables(&mut b, spec);

    let funcs_array = format!("{}_funcs", c_identifier(&spec.module_name));
    lua_reg(&mut b, &funcs_array, &registrations(spec));
    luaopen(&mut b, spec, &funcs_array);

    Ok(b.finish())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(spec: &ModuleSpec) -> Result<()> {
    let opaque = opaque_names(spec);
    for f in &spec.funcs {
        let mut bridged = 0;
        for p in &f.params {
            match &p.ty {
                BindingType::Callback(_) if p.callback_bridge == CallbackBridge::None => {
                    return Err(GenerateError::UnboundCallback {
                        func: f.c_name.clone(),
                        param: p.name.clone(),
                    });
                }
                BindingType::Callback(_) => {
                    bridged += 1;
                    if bridged > 1 {
                        return Err(GenerateError::UnsupportedParam {
                            func: f.c_name.clone(),
                            param: p.name.clone(),
                            ty: "second bridged callback".to_string(),
                        });
                    }
                }
                BindingType::FixedArray(..) => {
                    return Err(GenerateError::FixedArrayParam {
                        func: f.c_name.clone(),
                        param: p.name.clone(),
                    });
                }
                BindingType::Int
                | BindingType::Int64
                | BindingType::UInt32
                | BindingType::UInt64
                | BindingType::Size
                | BindingType::UIntPtr
                | BindingType::IntPtr
                | BindingType::Float
                | BindingType::Double
                | BindingType::Bool
                | BindingType::Str
                | BindingType::VoidPtr
                | BindingType::Void
                | BindingType::Ptr(_)
                | BindingType::ConstPtr(_)
                | BindingType::Struct(_)
                | BindingType::Enum(_)
                | BindingType::Vec2
                | BindingType::Vec4
                | BindingType::FloatArray(_)
                | BindingType::ValueStruct(_)
                | BindingType::ValueStructArray(..)
                | BindingType::Custom(_) => {}
            }
        }
        check_return(&f.c_name, &f.ret, &opaque)?;
    }

    for m in spec.opaque_types.iter().flat_map(|o| &o.methods) {
        for p in &m.params {
            match &p.ty {
                BindingType::Callback(_) => {
                    return Err(GenerateError::UnboundCallback {
                        func: m.c_name.clone(),
                        param: p.name.clone(),
                    });
                }
                BindingType::FixedArray(..) => {
                    return Err(GenerateError::FixedArrayParam {
                        func: m.c_name.clone(),
                        param: p.name.clone(),
                    });
                }
                BindingType::Int
                | BindingType::Int64
                | BindingType::UInt32
                | BindingType::UInt64
                | BindingType::Size
                | BindingType::UIntPtr
                | BindingType::IntPtr
                | BindingType::Float
                | BindingType::Double
                | BindingType::Bool
                | BindingType::Str
                | BindingType::VoidPtr
                | BindingType::Void
                | BindingType::Ptr(_)
                | BindingType::ConstPtr(_)
                | BindingType::Struct(_)
                | BindingType::Enum(_)
                | BindingType::Vec2
                | BindingType::Vec4
                | BindingType::FloatArray(_)
                | BindingType::ValueStruct(_)
                | BindingType::ValueStructArray(..)
                | BindingType::Custom(_) => {}
            }
        }
        check_return(&m.c_name, &m.ret, &opaque)?;
    }
    Ok(())
}

fn check_return(func: &str, ret: &BindingType, opaque: &OpaqueSet) -> Result<()> {
    // A fresh box would claim ownership of a handle the callee still owns.
    if opaque_ref(ret, opaque).is_some() {
        return Err(unsupported_return(func, ret));
    }
    match ret {
        BindingType::Callback(_) => Err(GenerateError::CallbackReturn {
            func: func.to_string(),
        }),
        BindingType::FixedArray(..) => Err(GenerateError::FixedArrayReturn {
            func: func.to_string(),
        }),
        BindingType::Int
        | BindingType::Int64
        | BindingType::UInt32
        | BindingType::UInt64
        | BindingType::Size
        | BindingType::UIntPtr
        | BindingType::IntPtr
        | BindingType::Float
        | BindingType::Double
        | BindingType::Bool
        | BindingType::Str
        | BindingType::VoidPtr
        | BindingType::Void
        | BindingType::Ptr(_)
        | BindingType::ConstPtr(_)
        | BindingType::Struct(_)
        | BindingType::Enum(_)
        | BindingType::Vec2
        | BindingType::Vec4
        | BindingType::FloatArray(_)
        | BindingType::ValueStruct(_)
        | BindingType::ValueStructArray(..)
        | BindingType::Custom(_) => Ok(()),
    }
}

fn unsupported_param(func: &str, p: &ParamBinding) -> GenerateError {
    GenerateError::UnsupportedParam {
        func: func.to_string(),
        param: p.name.clone(),
        ty: p.ty.c_spelling(),
    }
}

fn unsupported_return(func: &str, ty: &BindingType) -> GenerateError {
    GenerateError::UnsupportedReturn {
        func: func.to_string(),
        ty: ty.c_spelling(),
    }
}

// ---------------------------------------------------------------------------
// File-level pieces
// ---------------------------------------------------------------------------

/// Export macro shared by both output modes.
pub(super) fn api_macro(b: &mut CodeBuilder) {
    b.line("#ifndef BND_LUA_API")
        .line("  #ifdef _WIN32")
        .line("    #ifdef BND_LUA_EXPORTS")
        .line("      #define BND_LUA_API __declspec(dllexport)")
        .line("    #else")
        .line("      #define BND_LUA_API __declspec(dllimport)")
        .line("    #endif")
        .line("  #else")
        .line("    #define BND_LUA_API")
        .line("  #endif")
        .line("#endif")
        .blank();
}

fn c_header(b: &mut CodeBuilder, includes: &[String]) {
    b.line("/* machine generated, do not edit */");
    for h in ["lua.h", "lauxlib.h", "lualib.h", "string.h", "stdbool.h", "stdint.h", "stdlib.h"] {
        b.line(format!("#include <{h}>"));
    }
    b.blank();
    for h in includes {
        b.line(format!("#include \"{h}\""));
    }
    b.blank();
    api_macro(b);
}

fn extra_code(b: &mut CodeBuilder, spec: &ModuleSpec) {
    if let Some(code) = &spec.extra_c_code {
        b.raw(code);
        if !code.ends_with('\n') {
            b.blank();
        }
        b.blank();
    }
}

pub(super) fn enum_table(b: &mut CodeBuilder, e: &EnumBinding) {
    b.block(format!("static void register_{}(lua_State *L)", e.c_name), |b| {
        b.line("lua_newtable(L);");
        for item in &e.items {
            b.line(format!(
                "lua_pushinteger(L, {}); lua_setfield(L, -2, \"{}\");",
                item.c_const, item.script_name
            ));
        }
        b.line(format!("lua_setfield(L, -2, \"{}\");", e.field_name));
    });
    b.blank();
}

pub(super) fn lua_reg(b: &mut CodeBuilder, array: &str, entries: &[(String, String)]) {
    b.line(format!("static const luaL_Reg {array}[] = {{"));
    b.indent();
    for (name, func) in entries {
        b.line(format!("{{\"{name}\", {func}}},"));
    }
    b.line("{NULL, NULL}");
    b.dedent();
    b.line("};");
    b.blank();
}

/// Module table entries: struct constructors, opaque constructors, extra
/// registrations, functions, then adapters.
fn registrations(spec: &ModuleSpec) -> Vec<(String, String)> {
    let module = c_identifier(&spec.module_name);
    let mut entries = Vec::new();
    for s in &spec.structs {
        entries.push((s.pascal_name.clone(), format!("l_{}_new", s.c_name)));
    }
    for ot in &spec.opaque_types {
        if let Some(init) = &ot.init_func {
            entries.push((
                strip_prefix(init, &spec.prefix).to_string(),
                format!("l_{}_new", ot.c_name),
            ));
        }
    }
    for r in &spec.extra_regs {
        entries.push((r.script_name.clone(), r.c_func.clone()));
    }
    for f in &spec.funcs {
        entries.push((f.script_name.clone(), format!("l_{}", f.c_name)));
    }
    for aa in &spec.array_adapters {
        entries.push((
            aa.script_name.clone(),
            format!("l_{module}_array_{}", aa.script_name),
        ));
    }
    for ea in &spec.event_adapters {
        entries.push((
            ea.script_name.clone(),
            format!("l_{module}_event_{}", ea.script_name),
        ));
    }
    entries
}

fn luaopen(b: &mut CodeBuilder, spec: &ModuleSpec, funcs_array: &str) {
    let name = c_identifier(&spec.module_name);
    b.block(format!("BND_LUA_API int luaopen_{name}(lua_State *L)"), |b| {
        b.line("register_metatables(L);");
        b.line(format!("luaL_newlib(L, {funcs_array});"));
        for e in &spec.enums {
            b.line(format!("register_{}(L);", e.c_name));
        }
        b.line("return 1;");
    });
}

fn register_metatables(b: &mut CodeBuilder, spec: &ModuleSpec) {
    b.block("static void register_metatables(lua_State *L)", |b| {
        for s in &spec.structs {
            b.line(format!("luaL_newmetatable(L, \"{}\");", s.metatable));
            if s.has_metamethods {
                for mm in ["__index", "__newindex", "__pairs"] {
                    set_metamethod(b, &format!("l_{}{mm}", s.c_name), mm);
                }
            }
            for mm in &s.extra_metamethods {
                let name = mm.lua_name();
                set_metamethod(b, &format!("l_{}{name}", s.c_name), name);
            }
            b.line("lua_pop(L, 1);");
        }
        for ot in &spec.opaque_types {
            b.line(format!("luaL_newmetatable(L, \"{}\");", ot.metatable));
            set_metamethod(b, &format!("l_{}_gc", ot.c_name), "__gc");
            b.line(format!(
                "luaL_newlib(L, {}_methods); lua_setfield(L, -2, \"__index\");",
                ot.c_name
            ));
            b.line("lua_pop(L, 1);");
        }
    });
    b.blank();
}

fn set_metamethod(b: &mut CodeBuilder, func: &str, name: &str) {
    b.line(format!(
        "lua_pushcfunction(L, {func}); lua_setfield(L, -2, \"{name}\");"
    ));
}

// ---------------------------------------------------------------------------
// Value structs
// ---------------------------------------------------------------------------

/// Read the table at stack index `table` into `target`.
fn read_value_fields(b: &mut CodeBuilder, table: &str, target: &str, fields: &[ValueField]) {
    for (i, field) in fields.iter().enumerate() {
        let slot = i + 1;
        match field {
            ValueField::Scalar(acc) => {
                b.line(format!(
                    "lua_rawgeti(L, {table}, {slot}); {target}.{acc} = (float)lua_tonumber(L, -1); lua_pop(L, 1);"
                ));
            }
            ValueField::Nested { accessor, subs } => {
                b.line(format!(
                    "lua_rawgeti(L, {table}, {slot}); luaL_checktype(L, -1, LUA_TTABLE);"
                ));
                for (j, sub) in subs.iter().enumerate() {
                    b.line(format!(
                        "lua_rawgeti(L, -1, {}); {target}.{accessor}.{sub} = (float)lua_tonumber(L, -1); lua_pop(L, 1);",
                        j + 1
                    ));
                }
                b.line("lua_pop(L, 1);");
            }
        }
    }
}

/// Push `source` as a new (possibly nested) array table.  `state` is the
/// `lua_State*` expression (`L` or `ctx->L`).
fn push_value_fields(b: &mut CodeBuilder, state: &str, source: &str, fields: &[ValueField]) {
    b.line(format!("lua_newtable({state});"));
    for (i, field) in fields.iter().enumerate() {
        let slot = i + 1;
        match field {
            ValueField::Scalar(acc) => {
                b.line(format!(
                    "lua_pushnumber({state}, {source}.{acc}); lua_rawseti({state}, -2, {slot});"
                ));
            }
            ValueField::Nested { accessor, subs } => {
                b.line(format!("lua_newtable({state});"));
                for (j, sub) in subs.iter().enumerate() {
                    b.line(format!(
                        "lua_pushnumber({state}, {source}.{accessor}.{sub}); lua_rawseti({state}, -2, {});",
                        j + 1
                    ));
                }
                b.line(format!("lua_rawseti({state}, -2, {slot});"));
            }
        }
    }
}

fn value_struct_param(b: &mut CodeBuilder, name: &str, idx: usize, vs: &ValueStructType) {
    b.line(format!("luaL_checktype(L, {idx}, LUA_TTABLE);"));
    b.line(format!("{} {name};", vs.c_type));
    read_value_fields(b, &idx.to_string(), name, &vs.fields);
}

fn value_struct_array_param(
    b: &mut CodeBuilder,
    name: &str,
    idx: usize,
    vs: &ValueStructType,
    max: usize,
) {
    let c_type = &vs.c_type;
    b.line(format!("luaL_checktype(L, {idx}, LUA_TTABLE);"));
    b.line(format!("int _{name}_len = (int)lua_rawlen(L, {idx});"));
    b.line(format!(
        "luaL_argcheck(L, _{name}_len <= {max}, {idx}, \"array too large (max {max})\");"
    ));
    b.line(format!("{c_type} _{name}_buf[{max}];"));
    b.block(format!("for (int _i = 0; _i < _{name}_len; _i++)"), |b| {
        b.line(format!("lua_rawgeti(L, {idx}, _i + 1);"));
        b.line("luaL_checktype(L, -1, LUA_TTABLE);");
        read_value_fields(b, "-1", &format!("_{name}_buf[_i]"), &vs.fields);
        b.line("lua_pop(L, 1);");
    });
    b.line(format!("const {c_type}* {name} = _{name}_buf;"));
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// Box a copy of `value` as a new `s` userdata on top of the stack.
fn push_struct_copy(b: &mut CodeBuilder, state: &str, var: &str, s: &StructRef, value: &str) {
    let c = &s.c_name;
    b.line(format!(
        "{c}* {var} = ({c}*)lua_newuserdatauv({state}, sizeof({c}), 0);"
    ));
    b.line(format!("*{var} = {value};"));
    b.line(format!("luaL_setmetatable({state}, \"{}\");", s.metatable));
}

/// Run `l_S_new` on the value at the top of the stack and copy the result
/// into `target`.
fn construct_from_top(b: &mut CodeBuilder, target: &str, s: &StructRef) {
    b.line(format!("lua_pushcfunction(L, l_{}_new);", s.c_name));
    b.line("lua_pushvalue(L, -2);");
    b.line("lua_call(L, 1, 1);");
    b.line(format!(
        "{target} = *({c}*)luaL_checkudata(L, -1, \"{mt}\");",
        c = s.c_name,
        mt = s.metatable
    ));
    b.line("lua_pop(L, 1);");
}

fn struct_constructor(
    b: &mut CodeBuilder,
    s: &StructBinding,
    structs: &StructIndex,
    opaque: &OpaqueSet,
) {
    let c = &s.c_name;
    b.block(format!("static int l_{c}_new(lua_State *L)"), |b| {
        b.line(format!(
            "{c}* ud = ({c}*)lua_newuserdatauv(L, sizeof({c}), 1);"
        ));
        b.line(format!("memset(ud, 0, sizeof({c}));"));
        b.line(format!("luaL_setmetatable(L, \"{}\");", s.metatable));
        if s.allow_string_init {
            b.open("if (lua_isstring(L, 1))");
            b.line("size_t len;");
            b.line("const char* data = lua_tolstring(L, 1, &len);");
            b.line("ud->ptr = data;");
            b.line("ud->size = len;");
            b.line("lua_pushvalue(L, 1);");
            b.line("lua_setiuservalue(L, -2, 1);");
            b.branch("} else if (lua_istable(L, 1)) {");
        } else {
            b.open("if (lua_istable(L, 1))");
        }
        b.line("/* keep the source table alive: string fields point into it */");
        b.line("lua_pushvalue(L, 1);");
        b.line("lua_setiuservalue(L, -2, 1);");
        for f in &s.fields {
            field_init(b, f, structs, opaque);
        }
        b.close();
        b.line("return 1;");
    });
    b.blank();
}

fn field_init(b: &mut CodeBuilder, f: &FieldBinding, structs: &StructIndex, opaque: &OpaqueSet) {
    let c = &f.c_name;
    b.line(format!("lua_getfield(L, 1, \"{}\");", f.script_name));
    match &f.ty {
        BindingType::Int
        | BindingType::Int64
        | BindingType::UInt32
        | BindingType::UInt64
        | BindingType::Size
        | BindingType::UIntPtr
        | BindingType::IntPtr => {
            b.line(format!(
                "if (!lua_isnil(L, -1)) ud->{c} = ({})lua_tointeger(L, -1);",
                f.ty.c_spelling()
            ));
        }
        BindingType::Float | BindingType::Double => {
            b.line(format!(
                "if (!lua_isnil(L, -1)) ud->{c} = ({})lua_tonumber(L, -1);",
                f.ty.c_spelling()
            ));
        }
        BindingType::Bool => {
            b.line(format!("if (!lua_isnil(L, -1)) ud->{c} = lua_toboolean(L, -1);"));
        }
        BindingType::Str => {
            b.line(format!("if (!lua_isnil(L, -1)) ud->{c} = lua_tostring(L, -1);"));
        }
        BindingType::Enum(e) => {
            b.line(format!(
                "if (!lua_isnil(L, -1)) ud->{c} = ({})lua_tointeger(L, -1);",
                e.c_name
            ));
        }
        BindingType::VoidPtr => {
            b.line(format!("if (!lua_isnil(L, -1)) ud->{c} = lua_touserdata(L, -1);"));
        }
        BindingType::Ptr(inner) | BindingType::ConstPtr(inner) => match inner.as_ref() {
            BindingType::Str => {
                b.line(format!("if (!lua_isnil(L, -1)) ud->{c} = lua_tostring(L, -1);"));
            }
            BindingType::Void => {
                b.line(format!("if (!lua_isnil(L, -1)) ud->{c} = lua_touserdata(L, -1);"));
            }
            // The userdata stays reachable from the source table.
            BindingType::Struct(s) if opaque.contains(s.c_name.as_str()) => {
                b.line(format!(
                    "if (!lua_isnil(L, -1)) ud->{c} = check_{sc}(L, -1);",
                    sc = s.c_name
                ));
            }
            BindingType::Struct(s) => {
                b.line(format!(
                    "if (!lua_isnil(L, -1)) ud->{c} = ({t})luaL_checkudata(L, -1, \"{mt}\");",
                    t = f.ty.c_spelling(),
                    mt = s.metatable
                ));
            }
            // Raw buffers come from native code as (light) userdata.
            BindingType::Int
            | BindingType::Int64
            | BindingType::UInt32
            | BindingType::UInt64
            | BindingType::Size
            | BindingType::UIntPtr
            | BindingType::IntPtr
            | BindingType::Float
            | BindingType::Double
            | BindingType::Bool
            | BindingType::VoidPtr
            | BindingType::Ptr(_)
            | BindingType::ConstPtr(_)
            | BindingType::Enum(_)
            | BindingType::FixedArray(..)
            | BindingType::Callback(_)
            | BindingType::Vec2
            | BindingType::Vec4
            | BindingType::FloatArray(_)
            | BindingType::ValueStruct(_)
            | BindingType::ValueStructArray(..)
            | BindingType::Custom(_) => {
                b.line(format!(
                    "if (!lua_isnil(L, -1)) ud->{c} = ({})lua_touserdata(L, -1);",
                    f.ty.c_spelling()
                ));
            }
        },
        BindingType::Struct(s) if opaque.contains(s.c_name.as_str()) => {
            b.line(format!(
                "if (!lua_isnil(L, -1)) ud->{c} = *check_{sc}(L, -1);",
                sc = s.c_name
            ));
        }
        BindingType::Struct(s) => match structs.get(s.c_name.as_str()) {
            Some(own) => {
                let cond = if own.allow_string_init {
                    "lua_isstring(L, -1) || lua_istable(L, -1)"
                } else {
                    "lua_istable(L, -1)"
                };
                b.open(format!("if ({cond})"));
                construct_from_top(b, &format!("ud->{c}"), s);
                b.branch("} else if (lua_isuserdata(L, -1)) {");
                b.line(format!(
                    "ud->{c} = *({sc}*)luaL_checkudata(L, -1, \"{mt}\");",
                    sc = s.c_name,
                    mt = s.metatable
                ));
                b.close();
            }
            None => {
                b.line(format!(
                    "if (lua_isuserdata(L, -1)) ud->{c} = *({sc}*)luaL_checkudata(L, -1, \"{mt}\");",
                    sc = s.c_name,
                    mt = s.metatable
                ));
            }
        },
        BindingType::ValueStruct(vs) => {
            b.block("if (!lua_isnil(L, -1))", |b| {
                b.line("luaL_checktype(L, -1, LUA_TTABLE);");
                read_value_fields(b, "-1", &format!("ud->{c}"), &vs.fields);
            });
        }
        BindingType::FixedArray(elem, len) => fixed_array_init(b, c, elem, *len, structs),
        BindingType::Custom(custom) => {
            if let Some(init) = &custom.init {
                // The snippet consumes the value left by lua_getfield.
                b.lines(&init.replace("{fieldName}", c));
                return;
            }
        }
        // Set through the uservalue table by hand-written code.
        BindingType::Callback(_) => {}
        BindingType::Void
        | BindingType::Vec2
        | BindingType::Vec4
        | BindingType::FloatArray(_)
        | BindingType::ValueStructArray(..) => {}
    }
    b.line("lua_pop(L, 1);");
}

fn fixed_array_init(
    b: &mut CodeBuilder,
    field: &str,
    elem: &BindingType,
    len: usize,
    structs: &StructIndex,
) {
    let element = |b: &mut CodeBuilder| match elem {
        BindingType::Struct(s) => match structs.get(s.c_name.as_str()) {
            Some(own) => {
                let cond = if own.allow_string_init {
                    "lua_isstring(L, -1) || lua_istable(L, -1)"
                } else {
                    "lua_istable(L, -1)"
                };
                b.open(format!("if ({cond})"));
                construct_from_top(b, &format!("ud->{field}[i]"), s);
                b.branch("} else if (lua_isuserdata(L, -1)) {");
                b.line(format!(
                    "ud->{field}[i] = *({c}*)luaL_checkudata(L, -1, \"{mt}\");",
                    c = s.c_name,
                    mt = s.metatable
                ));
                b.close();
            }
            None => {
                b.line(format!(
                    "if (lua_isuserdata(L, -1)) ud->{field}[i] = *({c}*)luaL_checkudata(L, -1, \"{mt}\");",
                    c = s.c_name,
                    mt = s.metatable
                ));
            }
        },
        BindingType::ValueStruct(vs) => {
            b.block("if (lua_istable(L, -1))", |b| {
                read_value_fields(b, "-1", &format!("ud->{field}[i]"), &vs.fields);
            });
        }
        ty @ (BindingType::Int
        | BindingType::Int64
        | BindingType::UInt32
        | BindingType::UInt64
        | BindingType::Size
        | BindingType::UIntPtr
        | BindingType::IntPtr
        | BindingType::Enum(_)) => {
            b.line(format!(
                "ud->{field}[i] = ({})lua_tointeger(L, -1);",
                ty.c_spelling()
            ));
        }
        ty @ (BindingType::Float | BindingType::Double) => {
            b.line(format!(
                "ud->{field}[i] = ({})lua_tonumber(L, -1);",
                ty.c_spelling()
            ));
        }
        BindingType::Bool => {
            b.line(format!("ud->{field}[i] = lua_toboolean(L, -1);"));
        }
        BindingType::Str => {
            b.line(format!("ud->{field}[i] = lua_tostring(L, -1);"));
        }
        // No element form: the array stays zeroed.
        BindingType::VoidPtr
        | BindingType::Void
        | BindingType::Ptr(_)
        | BindingType::ConstPtr(_)
        | BindingType::FixedArray(..)
        | BindingType::Callback(_)
        | BindingType::Vec2
        | BindingType::Vec4
        | BindingType::FloatArray(_)
        | BindingType::ValueStructArray(..)
        | BindingType::Custom(_) => {}
    };
    b.block("if (lua_istable(L, -1))", |b| {
        b.line("int n = (int)lua_rawlen(L, -1);");
        b.block(format!("for (int i = 0; i < n && i < {len}; i++)"), |b| {
            b.line("lua_rawgeti(L, -1, i + 1);");
            element(b);
            b.line("lua_pop(L, 1);");
        });
    });
}

/// Fields visible through `__index`, `__newindex` and `__pairs`.
fn live_fields(s: &StructBinding) -> impl Iterator<Item = &FieldBinding> {
    s.fields
        .iter()
        .filter(|f| !matches!(f.ty, BindingType::Callback(_)))
}

fn struct_index(b: &mut CodeBuilder, s: &StructBinding) {
    let c = &s.c_name;
    b.block(format!("static int l_{c}__index(lua_State *L)"), |b| {
        b.line(format!(
            "{c}* self = ({c}*)luaL_checkudata(L, 1, \"{}\");",
            s.metatable
        ));
        b.line("const char* key = luaL_checkstring(L, 2);");
        for f in live_fields(s) {
            b.block(
                format!("if (strcmp(key, \"{}\") == 0)", f.script_name),
                |b| field_getter(b, f),
            );
        }
        b.line("return 0;");
    });
    b.blank();
}

fn field_getter(b: &mut CodeBuilder, f: &FieldBinding) {
    let value = format!("self->{}", f.c_name);
    match &f.ty {
        BindingType::Int
        | BindingType::Int64
        | BindingType::UInt32
        | BindingType::UInt64
        | BindingType::Size
        | BindingType::UIntPtr
        | BindingType::IntPtr
        | BindingType::Enum(_) => {
            b.line(format!("lua_pushinteger(L, (lua_Integer){value});"));
        }
        BindingType::Float | BindingType::Double => {
            b.line(format!("lua_pushnumber(L, (lua_Number){value});"));
        }
        BindingType::Bool => {
            b.line(format!("lua_pushboolean(L, {value});"));
        }
        BindingType::Str => {
            b.line(format!("lua_pushstring(L, {value});"));
        }
        BindingType::ConstPtr(inner) if **inner == BindingType::Str => {
            b.line(format!("lua_pushstring(L, {value});"));
        }
        BindingType::VoidPtr | BindingType::Ptr(_) | BindingType::ConstPtr(_) => {
            b.line(format!("lua_pushlightuserdata(L, (void*){value});"));
        }
        BindingType::Struct(s) => push_struct_copy(b, "L", "_ud", s, &value),
        BindingType::ValueStruct(vs) => push_value_fields(b, "L", &value, &vs.fields),
        BindingType::FixedArray(elem, len) => {
            b.line("lua_newtable(L);");
            b.block(format!("for (int _i = 0; _i < {len}; _i++)"), |b| {
                let item = format!("{value}[_i]");
                match elem.as_ref() {
                    BindingType::Struct(s) => push_struct_copy(b, "L", "_ud", s, &item),
                    BindingType::ValueStruct(vs) => push_value_fields(b, "L", &item, &vs.fields),
                    BindingType::Int
                    | BindingType::Int64
                    | BindingType::UInt32
                    | BindingType::UInt64
                    | BindingType::Size
                    | BindingType::UIntPtr
                    | BindingType::IntPtr
                    | BindingType::Enum(_) => {
                        b.line(format!("lua_pushinteger(L, (lua_Integer){item});"));
                    }
                    BindingType::Float | BindingType::Double => {
                        b.line(format!("lua_pushnumber(L, (lua_Number){item});"));
                    }
                    BindingType::Bool => {
                        b.line(format!("lua_pushboolean(L, {item});"));
                    }
                    BindingType::Str => {
                        b.line(format!("lua_pushstring(L, {item});"));
                    }
                    BindingType::VoidPtr
                    | BindingType::Void
                    | BindingType::Ptr(_)
                    | BindingType::ConstPtr(_)
                    | BindingType::FixedArray(..)
                    | BindingType::Callback(_)
                    | BindingType::Vec2
                    | BindingType::Vec4
                    | BindingType::FloatArray(_)
                    | BindingType::ValueStructArray(..)
                    | BindingType::Custom(_) => {
                        b.line("lua_pushnil(L);");
                    }
                }
                b.line("lua_rawseti(L, -2, _i + 1);");
            });
        }
        BindingType::Custom(custom) => match &custom.push {
            Some(push) => {
                b.lines(&push.replace("{value}", &value));
            }
            None => {
                b.line("lua_pushnil(L);");
            }
        },
        BindingType::Void
        | BindingType::Callback(_)
        | BindingType::Vec2
        | BindingType::Vec4
        | BindingType::FloatArray(_)
        | BindingType::ValueStructArray(..) => {
            b.line("lua_pushnil(L);");
        }
    }
    b.line("return 1;");
}

fn struct_newindex(
    b: &mut CodeBuilder,
    s: &StructBinding,
    structs: &StructIndex,
    opaque: &OpaqueSet,
) {
    let c = &s.c_name;
    b.block(format!("static int l_{c}__newindex(lua_State *L)"), |b| {
        b.line(format!(
            "{c}* self = ({c}*)luaL_checkudata(L, 1, \"{}\");",
            s.metatable
        ));
        b.line("const char* key = luaL_checkstring(L, 2);");
        for f in live_fields(s) {
            b.block(
                format!("if (strcmp(key, \"{}\") == 0)", f.script_name),
                |b| field_setter(b, s, f, structs, opaque),
            );
        }
        b.line("return luaL_error(L, \"unknown field: %s\", key);");
    });
    b.blank();
}

fn field_setter(
    b: &mut CodeBuilder,
    owner: &StructBinding,
    f: &FieldBinding,
    structs: &StructIndex,
    opaque: &OpaqueSet,
) {
    let target = format!("self->{}", f.c_name);
    match &f.ty {
        ty if ty.c_integer().is_some() => {
            b.line(format!(
                "{target} = ({})luaL_checkinteger(L, 3);",
                ty.c_spelling()
            ));
        }
        ty if ty.c_floating().is_some() => {
            b.line(format!(
                "{target} = ({})luaL_checknumber(L, 3);",
                ty.c_spelling()
            ));
        }
        BindingType::Bool => {
            b.line(format!("{target} = lua_toboolean(L, 3);"));
        }
        ty if ty.is_string() => {
            b.line(format!("{target} = luaL_checkstring(L, 3);"));
            if !owner.allow_string_init {
                anchor_string(b);
            }
        }
        BindingType::Enum(e) => {
            b.line(format!(
                "{target} = ({})luaL_checkinteger(L, 3);",
                e.c_name
            ));
        }
        ty if ty.is_void_pointer() => {
            b.line(format!("{target} = lua_touserdata(L, 3);"));
        }
        BindingType::Struct(s) if opaque.contains(s.c_name.as_str()) => {
            b.line(format!("{target} = *check_{}(L, 3);", s.c_name));
        }
        BindingType::Struct(s) if structs.contains_key(s.c_name.as_str()) => {
            b.open("if (lua_istable(L, 3))");
            b.line(format!("lua_pushcfunction(L, l_{}_new);", s.c_name));
            b.line("lua_pushvalue(L, 3);");
            b.line("lua_call(L, 1, 1);");
            b.line(format!(
                "{target} = *({c}*)luaL_checkudata(L, -1, \"{mt}\");",
                c = s.c_name,
                mt = s.metatable
            ));
            b.line("lua_pop(L, 1);");
            b.branch("} else {");
            b.line(format!(
                "{target} = *({c}*)luaL_checkudata(L, 3, \"{mt}\");",
                c = s.c_name,
                mt = s.metatable
            ));
            b.close();
        }
        BindingType::Struct(s) => {
            b.line(format!(
                "{target} = *({c}*)luaL_checkudata(L, 3, \"{mt}\");",
                c = s.c_name,
                mt = s.metatable
            ));
        }
        BindingType::ValueStruct(vs) if vs.settable => {
            b.line("luaL_checktype(L, 3, LUA_TTABLE);");
            read_value_fields(b, "3", &target, &vs.fields);
        }
        BindingType::ValueStruct(_) => {
            b.line("return luaL_error(L, \"read-only field: %s\", key);");
            return;
        }
        BindingType::Custom(custom) if custom.set.is_some() => {
            if let Some(set) = &custom.set {
                b.lines(&set.replace("{fieldName}", &f.c_name));
            }
        }
        _ => {
            b.line("return luaL_error(L, \"unsupported type for field: %s\", key);");
            return;
        }
    }
    b.line("return 0;");
}

/// Keep a string assigned through `__newindex` reachable from the struct's
/// user value, so the aliased pointer outlives the assignment.
fn anchor_string(b: &mut CodeBuilder) {
    b.block("if (lua_getiuservalue(L, 1, 1) != LUA_TTABLE)", |b| {
        b.line("lua_pop(L, 1);");
        b.line("lua_newtable(L);");
        b.line("lua_pushvalue(L, -1);");
        b.line("lua_setiuservalue(L, 1, 1);");
    });
    b.line("lua_pushvalue(L, 2);");
    b.line("lua_pushvalue(L, 3);");
    b.line("lua_rawset(L, -3);");
    b.line("lua_pop(L, 1);");
}

fn struct_pairs(b: &mut CodeBuilder, s: &StructBinding) {
    let c = &s.c_name;
    let names: Vec<&str> = live_fields(s).map(|f| f.script_name.as_str()).collect();
    b.block(format!("static int l_{c}__pairs_next(lua_State *L)"), |b| {
        b.line("static const char* fields[] = {");
        b.indent();
        if names.is_empty() {
            // MSVC rejects an empty initializer list.
            b.line("NULL");
        }
        for (i, name) in names.iter().enumerate() {
            let sep = if i + 1 < names.len() { "," } else { "" };
            b.line(format!("\"{name}\"{sep}"));
        }
        b.dedent();
        b.line("};");
        b.line(format!("static const int nfields = {};", names.len()));
        b.line(format!(
            "{c}* self = ({c}*)luaL_checkudata(L, 1, \"{}\");",
            s.metatable
        ));
        b.line("(void)self;");
        b.line("int idx = 0;");
        b.block("if (!lua_isnil(L, 2))", |b| {
            b.line("const char* key = lua_tostring(L, 2);");
            b.block("for (int i = 0; i < nfields; i++)", |b| {
                b.line("if (strcmp(key, fields[i]) == 0) { idx = i + 1; break; }");
            });
        });
        b.line("if (idx >= nfields) return 0;");
        b.line("lua_pushstring(L, fields[idx]);");
        b.line("lua_pushvalue(L, 1);");
        b.line("lua_pushstring(L, fields[idx]);");
        b.line("lua_gettable(L, -2);");
        b.line("lua_remove(L, -2);");
        b.line("return 2;");
    });
    b.block(format!("static int l_{c}__pairs(lua_State *L)"), |b| {
        b.line(format!("lua_pushcfunction(L, l_{c}__pairs_next);"));
        b.line("lua_pushvalue(L, 1);");
        b.line("lua_pushnil(L);");
        b.line("return 3;");
    });
    b.blank();
}

fn struct_eq(b: &mut CodeBuilder, s: &StructBinding) {
    let (c, mt) = (&s.c_name, &s.metatable);
    b.block(format!("static int l_{c}__eq(lua_State *L)"), |b| {
        b.line(format!("{c}* a = ({c}*)luaL_checkudata(L, 1, \"{mt}\");"));
        b.line(format!("{c}* b = ({c}*)luaL_checkudata(L, 2, \"{mt}\");"));
        b.line(format!(
            "lua_pushboolean(L, memcmp(a, b, sizeof({c})) == 0);"
        ));
        b.line("return 1;");
    });
    b.blank();
}

fn struct_tostring(b: &mut CodeBuilder, s: &StructBinding) {
    let (c, mt) = (&s.c_name, &s.metatable);
    b.block(format!("static int l_{c}__tostring(lua_State *L)"), |b| {
        b.line(format!("{c}* self = ({c}*)luaL_checkudata(L, 1, \"{mt}\");"));
        b.line("const unsigned char* bytes = (const unsigned char*)self;");
        b.line(format!("size_t sz = sizeof({c});"));
        b.line("luaL_Buffer buf;");
        b.line("luaL_buffinit(L, &buf);");
        b.line(format!("luaL_addstring(&buf, \"{mt}:\");"));
        b.block("for (size_t i = 0; i < sz; i++)", |b| {
            b.line("char hex[3];");
            b.line("hex[0] = \"0123456789abcdef\"[bytes[i] >> 4];");
            b.line("hex[1] = \"0123456789abcdef\"[bytes[i] & 0x0f];");
            b.line("hex[2] = '\\0';");
            b.line("luaL_addstring(&buf, hex);");
        });
        b.line("luaL_pushresult(&buf);");
        b.line("return 1;");
    });
    b.blank();
}

// ---------------------------------------------------------------------------
// Parameters and results
// ---------------------------------------------------------------------------

/// Declare local `p.name` from stack slot `idx`.
fn param_decl(
    b: &mut CodeBuilder,
    func: &str,
    p: &ParamBinding,
    idx: usize,
    opaque: &OpaqueSet,
) -> Result<()> {
    if p.is_optional && optional_param_decl(b, p, idx, opaque) {
        return Ok(());
    }
    let name = &p.name;
    match &p.ty {
        ty @ (BindingType::Int
        | BindingType::Int64
        | BindingType::UInt32
        | BindingType::UInt64
        | BindingType::Size
        | BindingType::UIntPtr
        | BindingType::IntPtr) => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name} = ({t})luaL_checkinteger(L, {idx});"));
        }
        ty @ (BindingType::Float | BindingType::Double) => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name} = ({t})luaL_checknumber(L, {idx});"));
        }
        BindingType::Bool => {
            b.line(format!("bool {name} = lua_toboolean(L, {idx});"));
        }
        BindingType::Str => {
            b.line(format!("const char* {name} = luaL_checkstring(L, {idx});"));
        }
        BindingType::Enum(e) => {
            let t = &e.c_name;
            b.line(format!("{t} {name} = ({t})luaL_checkinteger(L, {idx});"));
        }
        BindingType::VoidPtr => {
            b.line(format!("void* {name} = lua_touserdata(L, {idx});"));
        }
        BindingType::Ptr(inner) => pointer_param(b, func, p, inner, idx, "", opaque)?,
        BindingType::ConstPtr(inner) => pointer_param(b, func, p, inner, idx, "const ", opaque)?,
        BindingType::Struct(s) if opaque.contains(s.c_name.as_str()) => {
            let c = &s.c_name;
            b.line(format!("{c} {name} = *check_{c}(L, {idx});"));
        }
        BindingType::Struct(s) => {
            let c = &s.c_name;
            b.line(format!(
                "{c} {name} = *({c}*)luaL_checkudata(L, {idx}, \"{}\");",
                s.metatable
            ));
        }
        BindingType::ValueStruct(vs) => value_struct_param(b, name, idx, vs),
        BindingType::ValueStructArray(vs, max) => value_struct_array_param(b, name, idx, vs, *max),
        BindingType::Custom(custom) => match &custom.check {
            Some(check) => {
                b.lines(&check.replace("{idx}", &idx.to_string()).replace("{name}", name));
            }
            None => return Err(unsupported_param(func, p)),
        },
        BindingType::Void
        | BindingType::FixedArray(..)
        | BindingType::Callback(_)
        | BindingType::Vec2
        | BindingType::Vec4
        | BindingType::FloatArray(_) => return Err(unsupported_param(func, p)),
    }
    Ok(())
}

fn pointer_param(
    b: &mut CodeBuilder,
    func: &str,
    p: &ParamBinding,
    inner: &BindingType,
    idx: usize,
    qual: &str,
    opaque: &OpaqueSet,
) -> Result<()> {
    let name = &p.name;
    match inner {
        BindingType::Void => {
            b.line(format!("{qual}void* {name} = lua_touserdata(L, {idx});"));
        }
        BindingType::Str => {
            b.line(format!("const char* {name} = luaL_checkstring(L, {idx});"));
        }
        BindingType::Struct(s) if opaque.contains(s.c_name.as_str()) => {
            let c = &s.c_name;
            b.line(format!("{qual}{c}* {name} = check_{c}(L, {idx});"));
        }
        BindingType::Struct(s) => {
            let c = &s.c_name;
            b.line(format!(
                "{qual}{c}* {name} = ({qual}{c}*)luaL_checkudata(L, {idx}, \"{}\");",
                s.metatable
            ));
        }
        BindingType::ValueStruct(vs) => {
            let local = format!("_{name}_v");
            value_struct_param(b, &local, idx, vs);
            b.line(format!("{qual}{}* {name} = &{local};", vs.c_type));
        }
        _ => return Err(unsupported_param(func, p)),
    }
    Ok(())
}

/// `false` when the type has no optional form; the caller then falls back
/// to the required declaration.
fn optional_param_decl(b: &mut CodeBuilder, p: &ParamBinding, idx: usize, opaque: &OpaqueSet) -> bool {
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
        ty if ty.is_string() => {
            b.line(format!("const char* {name} = luaL_optstring(L, {idx}, NULL);"));
        }
        BindingType::Enum(e) => {
            let t = &e.c_name;
            b.line(format!("{t} {name} = ({t})luaL_optinteger(L, {idx}, 0);"));
        }
        BindingType::Ptr(inner) | BindingType::ConstPtr(inner) => {
            let BindingType::Struct(s) = inner.as_ref() else {
                return false;
            };
            let qual = if matches!(p.ty, BindingType::ConstPtr(_)) { "const " } else { "" };
            let c = &s.c_name;
            let check = if opaque.contains(c.as_str()) {
                format!("check_{c}(L, {idx})")
            } else {
                format!("({qual}{c}*)luaL_checkudata(L, {idx}, \"{}\")", s.metatable)
            };
            b.line(format!(
                "{qual}{c}* {name} = lua_isnoneornil(L, {idx}) ? NULL : {check};"
            ));
        }
        _ => return false,
    }
    true
}

/// Type behind an output parameter (`int*` and `int` both mean an `int`
/// slot whose address is passed).
fn output_slot(ty: &BindingType) -> &BindingType {
    match ty {
        BindingType::Ptr(inner) => inner,
        other => other,
    }
}

fn output_param_decl(b: &mut CodeBuilder, func: &str, p: &ParamBinding, idx: usize) -> Result<()> {
    let name = &p.name;
    match output_slot(&p.ty) {
        BindingType::Bool => {
            b.line(format!("bool {name}_val = lua_toboolean(L, {idx});"));
        }
        BindingType::Enum(e) => {
            let t = &e.c_name;
            b.line(format!("{t} {name}_val = ({t})luaL_optinteger(L, {idx}, 0);"));
        }
        ty if ty.c_integer().is_some() => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name}_val = ({t})luaL_optinteger(L, {idx}, 0);"));
        }
        ty if ty.c_floating().is_some() => {
            let t = ty.c_spelling();
            b.line(format!("{t} {name}_val = ({t})luaL_optnumber(L, {idx}, 0.0);"));
        }
        _ => return Err(unsupported_param(func, p)),
    }
    Ok(())
}

fn output_push(b: &mut CodeBuilder, p: &ParamBinding) {
    let name = &p.name;
    match output_slot(&p.ty) {
        BindingType::Bool => b.line(format!("lua_pushboolean(L, {name}_val);")),
        ty if ty.c_floating().is_some() => {
            b.line(format!("lua_pushnumber(L, (lua_Number){name}_val);"))
        }
        _ => b.line(format!("lua_pushinteger(L, (lua_Integer){name}_val);")),
    };
}

/// Emit the call and push its result; returns the number of values pushed.
///
/// Every integer kind is widened through `lua_Integer` and every floating
/// kind through `lua_Number`.
fn push_return(
    b: &mut CodeBuilder,
    func: &str,
    ret: &BindingType,
    call: &str,
    patches: &[PostCallPatch],
) -> Result<usize> {
    match ret {
        BindingType::Void => {
            b.line(format!("{call};"));
            return Ok(0);
        }
        BindingType::Int
        | BindingType::Int64
        | BindingType::UInt32
        | BindingType::UInt64
        | BindingType::Size
        | BindingType::UIntPtr
        | BindingType::IntPtr
        | BindingType::Enum(_) => {
            b.line(format!("lua_pushinteger(L, (lua_Integer){call});"));
        }
        BindingType::Float | BindingType::Double => {
            b.line(format!("lua_pushnumber(L, (lua_Number){call});"));
        }
        BindingType::Bool => {
            b.line(format!("lua_pushboolean(L, {call});"));
        }
        BindingType::Str => {
            b.line(format!("lua_pushstring(L, {call});"));
        }
        BindingType::VoidPtr => {
            b.line(format!("lua_pushlightuserdata(L, (void*){call});"));
        }
        BindingType::Ptr(inner) | BindingType::ConstPtr(inner) => match inner.as_ref() {
            BindingType::Void => {
                b.line(format!("lua_pushlightuserdata(L, (void*){call});"));
            }
            BindingType::Str => {
                b.line(format!("lua_pushstring(L, {call});"));
            }
            BindingType::Struct(s) => {
                b.line(format!("const {}* _p = {call};", s.c_name));
                b.open("if (_p == NULL)");
                b.line("lua_pushnil(L);");
                b.branch("} else {");
                push_struct_copy(b, "L", "ud", s, "*_p");
                b.close();
            }
            _ => return Err(unsupported_return(func, ret)),
        },
        BindingType::Struct(s) => {
            let c = &s.c_name;
            b.line(format!("{c} _result = {call};"));
            b.line(format!(
                "{c}* ud = ({c}*)lua_newuserdatauv(L, sizeof({c}), 0);"
            ));
            b.line("*ud = _result;");
            for patch in patches {
                b.line(format!("ud->{} = {};", patch.field, patch.c_expr));
            }
            b.line(format!("luaL_setmetatable(L, \"{}\");", s.metatable));
        }
        BindingType::ValueStruct(vs) => {
            b.line(format!("{} _v = {call};", vs.c_type));
            push_value_fields(b, "L", "_v", &vs.fields);
        }
        BindingType::Custom(custom) => match &custom.push {
            Some(push) => {
                b.lines(&push.replace("{value}", call));
            }
            None => {
                b.line(format!("{call};"));
                return Ok(0);
            }
        },
        BindingType::FixedArray(..) => {
            return Err(GenerateError::FixedArrayReturn {
                func: func.to_string(),
            });
        }
        BindingType::Callback(_) => {
            return Err(GenerateError::CallbackReturn {
                func: func.to_string(),
            });
        }
        BindingType::ValueStructArray(..)
        | BindingType::Vec2
        | BindingType::Vec4
        | BindingType::FloatArray(_) => return Err(unsupported_return(func, ret)),
    }
    Ok(1)
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

fn function(b: &mut CodeBuilder, f: &FuncBinding, opaque: &OpaqueSet) -> Result<()> {
    let bridged = f
        .params
        .iter()
        .find(|p| p.callback_bridge != CallbackBridge::None);
    let (ctx, trampoline, slot) = (
        format!("{}_cb_ctx", f.c_name),
        format!("{}_trampoline", f.c_name),
        format!("_{}_static_ctx", f.c_name),
    );
    // An immediate callback whose native signature has no context argument
    // reaches its Lua function through the static slot, saved and restored
    // around the call so nested calls see their own function.
    let mut via_slot = false;
    if let Some(cb) = bridged {
        let BindingType::Callback(cb_ty) = &cb.ty else {
            return Err(unsupported_param(&f.c_name, cb));
        };
        let persistent = cb.callback_bridge == CallbackBridge::Persistent;
        via_slot = !persistent && !cb_ty.context_arg;
        let field = if persistent { "callback_ref" } else { "callback_idx" };
        b.line(format!("typedef struct {{ lua_State* L; int {field}; }} {ctx};"));
        b.blank();
        if persistent || via_slot {
            let unset = if persistent { "LUA_NOREF" } else { "0" };
            b.line(format!("static {ctx} {slot} = {{ NULL, {unset} }};"));
            b.blank();
        }
        trampoline_func(b, f, cb_ty, &ctx, &trampoline, persistent)?;
        if persistent {
            return persistent_setter(b, f, &trampoline, opaque);
        }
    }

    b.try_block(format!("static int l_{}(lua_State *L)", f.c_name), |b| {
        let mut args = Vec::with_capacity(f.params.len() + 1);
        let mut outputs = Vec::new();
        for (i, p) in f.params.iter().enumerate() {
            let idx = i + 1;
            if p.callback_bridge == CallbackBridge::Immediate {
                b.line(format!("luaL_checktype(L, {idx}, LUA_TFUNCTION);"));
                args.push(trampoline.clone());
                if via_slot {
                    b.line(format!("{ctx} _cb_saved = {slot};"));
                    b.line(format!("{slot}.L = L;"));
                    b.line(format!("{slot}.callback_idx = {idx};"));
                    args.push("NULL".to_string());
                } else {
                    b.line(format!("{ctx} _cb_ctx = {{ L, {idx} }};"));
                    args.push("&_cb_ctx".to_string());
                }
            } else if p.is_output {
                output_param_decl(b, &f.c_name, p, idx)?;
                args.push(format!("&{}_val", p.name));
                outputs.push(p);
            } else {
                param_decl(b, &f.c_name, p, idx, opaque)?;
                args.push(p.name.clone());
            }
        }
        count_checks(b, f);
        let call = format!("{}({})", f.c_name, args.join(", "));
        let mut results = push_return(b, &f.c_name, &f.ret, &call, &f.post_call_patches)?;
        for p in outputs {
            output_push(b, p);
            results += 1;
        }
        if via_slot {
            b.line(format!("{slot} = _cb_saved;"));
        }
        b.line(format!("return {results};"));
        Ok(())
    })?;
    b.blank();
    Ok(())
}

/// A bounded value-struct array followed by an `int` count: the count may
/// not exceed the number of elements actually read.
fn count_checks(b: &mut CodeBuilder, f: &FuncBinding) {
    for (i, pair) in f.params.windows(2).enumerate() {
        if let [arr, count] = pair {
            if matches!(arr.ty, BindingType::ValueStructArray(..)) && count.ty == BindingType::Int {
                b.line(format!(
                    "luaL_argcheck(L, {cnt} >= 0 && {cnt} <= _{arr}_len, {idx}, \"count out of range\");",
                    cnt = count.name,
                    arr = arr.name,
                    idx = i + 2
                ));
            }
        }
    }
}

/// `(C return type, conversion from the Lua result, fallback value)`.
fn callback_result(
    func: &str,
    cb: &CallbackType,
) -> Result<Option<(String, String, &'static str)>> {
    let Some(ret) = cb.ret.as_deref() else {
        return Ok(None);
    };
    Ok(Some(match ret {
        BindingType::Void => return Ok(None),
        BindingType::Bool => (
            "bool".to_string(),
            "lua_toboolean(ctx->L, -1)".to_string(),
            "true",
        ),
        BindingType::Float => (
            "float".to_string(),
            "(float)lua_tonumber(ctx->L, -1)".to_string(),
            "1.0f",
        ),
        BindingType::Double => (
            "double".to_string(),
            "(double)lua_tonumber(ctx->L, -1)".to_string(),
            "1.0",
        ),
        BindingType::Enum(e) => (
            e.c_name.clone(),
            format!("({})lua_tointeger(ctx->L, -1)", e.c_name),
            "0",
        ),
        ty if ty.c_integer().is_some() => {
            let t = ty.c_spelling();
            (t.clone(), format!("({t})lua_tointeger(ctx->L, -1)"), "0")
        }
        other => {
            return Err(unsupported_return(&format!("{func} callback"), other));
        }
    }))
}

fn trampoline_func(
    b: &mut CodeBuilder,
    f: &FuncBinding,
    cb: &CallbackType,
    ctx: &str,
    name: &str,
    persistent: bool,
) -> Result<()> {
    let result = callback_result(&f.c_name, cb)?;
    let ret_c = result.as_ref().map_or("void", |(t, _, _)| t.as_str());
    let mut params: Vec<String> = cb
        .params
        .iter()
        .map(|p| format!("{} {}", p.ty.c_spelling(), p.name))
        .collect();
    if cb.context_arg {
        params.push("void* context".to_string());
    }
    let params = if params.is_empty() {
        "void".to_string()
    } else {
        params.join(", ")
    };

    b.block(format!("static {ret_c} {name}({params})"), |b| {
        if persistent {
            let fallback = result
                .as_ref()
                .map_or(String::new(), |(_, _, v)| format!(" {v}"));
            if cb.context_arg {
                b.line("(void)context;");
            }
            b.line(format!("{ctx}* ctx = &_{}_static_ctx;", f.c_name));
            b.line(format!(
                "if (!ctx->L || ctx->callback_ref == LUA_NOREF) return{fallback};"
            ));
            b.line("lua_rawgeti(ctx->L, LUA_REGISTRYINDEX, ctx->callback_ref);");
        } else if cb.context_arg {
            b.line(format!("{ctx}* ctx = ({ctx}*)context;"));
            b.line("lua_pushvalue(ctx->L, ctx->callback_idx);");
        } else {
            b.line(format!("{ctx}* ctx = &_{}_static_ctx;", f.c_name));
            b.line("lua_pushvalue(ctx->L, ctx->callback_idx);");
        }
        for p in &cb.params {
            callback_arg_push(b, &p.ty, &p.name);
        }
        let nresults = usize::from(result.is_some());
        b.line(format!(
            "lua_call(ctx->L, {}, {nresults});",
            cb.params.len()
        ));
        if let Some((t, conv, _)) = &result {
            b.line(format!("{t} _cb_ret = {conv};"));
            b.line("lua_pop(ctx->L, 1);");
            b.line("return _cb_ret;");
        }
    });
    b.blank();
    Ok(())
}

fn callback_arg_push(b: &mut CodeBuilder, ty: &BindingType, name: &str) {
    let state = "ctx->L";
    match ty {
        BindingType::Struct(s) => push_struct_copy(b, state, &format!("_ud_{name}"), s, name),
        BindingType::Ptr(inner) | BindingType::ConstPtr(inner)
            if matches!(inner.as_ref(), BindingType::Struct(_)) =>
        {
            if let BindingType::Struct(s) = inner.as_ref() {
                b.open(format!("if ({name} == NULL)"));
                b.line(format!("lua_pushnil({state});"));
                b.branch("} else {");
                push_struct_copy(b, state, &format!("_ud_{name}"), s, &format!("*{name}"));
                b.close();
            }
        }
        BindingType::ValueStruct(vs) => push_value_fields(b, state, name, &vs.fields),
        BindingType::Float | BindingType::Double => {
            b.line(format!("lua_pushnumber({state}, {name});"));
        }
        BindingType::Bool => {
            b.line(format!("lua_pushboolean({state}, {name});"));
        }
        ty if ty.c_integer().is_some() || matches!(ty, BindingType::Enum(_)) => {
            b.line(format!("lua_pushinteger({state}, (lua_Integer){name});"));
        }
        ty if ty.is_string() => {
            b.line(format!("lua_pushstring({state}, {name});"));
        }
        _ => {
            b.line(format!("lua_pushlightuserdata({state}, (void*){name});"));
        }
    }
}

/// Setter for a retained callback: `nil` unregisters, a function replaces
/// the previous registry reference.
fn persistent_setter(
    b: &mut CodeBuilder,
    f: &FuncBinding,
    trampoline: &str,
    opaque: &OpaqueSet,
) -> Result<()> {
    let c = &f.c_name;
    let ctx = format!("_{c}_static_ctx");
    b.try_block(format!("static int l_{c}(lua_State *L)"), |b| {
        let mut cb_idx = 0;
        let mut set_args = Vec::new();
        let mut clear_args = Vec::new();
        for (i, p) in f.params.iter().enumerate() {
            let idx = i + 1;
            if p.callback_bridge == CallbackBridge::Persistent {
                cb_idx = idx;
                set_args.extend([trampoline.to_string(), "NULL".to_string()]);
                clear_args.extend(["NULL".to_string(), "NULL".to_string()]);
            } else {
                param_decl(b, c, p, idx, opaque)?;
                set_args.push(p.name.clone());
                clear_args.push(p.name.clone());
            }
        }
        b.block(format!("if ({ctx}.callback_ref != LUA_NOREF)"), |b| {
            b.line(format!(
                "luaL_unref(L, LUA_REGISTRYINDEX, {ctx}.callback_ref);"
            ));
            b.line(format!("{ctx}.callback_ref = LUA_NOREF;"));
            b.line(format!("{ctx}.L = NULL;"));
        });
        b.open(format!("if (lua_isnoneornil(L, {cb_idx}))"));
        b.line(format!("{c}({});", clear_args.join(", ")));
        b.branch("} else {");
        b.line(format!("luaL_checktype(L, {cb_idx}, LUA_TFUNCTION);"));
        b.line(format!("lua_pushvalue(L, {cb_idx});"));
        b.line(format!(
            "{ctx}.callback_ref = luaL_ref(L, LUA_REGISTRYINDEX);"
        ));
        b.line(format!("{ctx}.L = L;"));
        b.line(format!("{c}({});", set_args.join(", ")));
        b.close();
        b.line("return 0;");
        Ok(())
    })?;
    b.blank();
    Ok(())
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

fn array_adapter(
    b: &mut CodeBuilder,
    module: &str,
    aa: &ArrayAdapterBinding,
    opaque: &OpaqueSet,
) -> Result<()> {
    let name = format!("l_{}_array_{}", c_identifier(module), aa.script_name);
    let elem = aa.element.c_spelling();
    b.try_block(format!("static int {name}(lua_State *L)"), |b| {
        let mut args = Vec::with_capacity(aa.params.len() + 2);
        for (i, p) in aa.params.iter().enumerate() {
            param_decl(b, &name, p, i + 1, opaque)?;
            args.push(p.name.clone());
        }
        let count_args = args.join(", ");
        args.extend(["_buf".to_string(), "_count".to_string()]);
        b.line(format!("int _count = {}({count_args});", aa.count_func));
        b.line(format!(
            "{elem}* _buf = ({elem}*)malloc((_count > 0 ? _count : 1) * sizeof({elem}));"
        ));
        b.line("if (_buf == NULL) return luaL_error(L, \"out of memory\");");
        b.line(format!("{}({});", aa.fill_func, args.join(", ")));
        b.line("lua_newtable(L);");
        b.block("for (int _i = 0; _i < _count; _i++)", |b| {
            match &aa.element {
                BindingType::Struct(s) => push_struct_copy(b, "L", "_ud", s, "_buf[_i]"),
                BindingType::ValueStruct(vs) => push_value_fields(b, "L", "_buf[_i]", &vs.fields),
                ty if ty.c_integer().is_some() || matches!(ty, BindingType::Enum(_)) => {
                    b.line("lua_pushinteger(L, (lua_Integer)_buf[_i]);");
                }
                ty if ty.c_floating().is_some() => {
                    b.line("lua_pushnumber(L, (lua_Number)_buf[_i]);");
                }
                BindingType::Bool => {
                    b.line("lua_pushboolean(L, _buf[_i]);");
                }
                ty if ty.is_string() => {
                    b.line("lua_pushstring(L, _buf[_i]);");
                }
                _ => {
                    b.line("lua_pushnil(L); /* unsupported element type */");
                }
            }
            b.line("lua_rawseti(L, -2, _i + 1);");
        });
        b.line("free(_buf);");
        b.line("return 1;");
        Ok(())
    })?;
    b.blank();
    Ok(())
}

fn event_adapter(
    b: &mut CodeBuilder,
    module: &str,
    ea: &EventAdapterBinding,
    opaque: &OpaqueSet,
) -> Result<()> {
    let name = format!("l_{}_event_{}", c_identifier(module), ea.script_name);
    b.try_block(format!("static int {name}(lua_State *L)"), |b| {
        let mut args = Vec::with_capacity(ea.params.len());
        for (i, p) in ea.params.iter().enumerate() {
            param_decl(b, &name, p, i + 1, opaque)?;
            args.push(p.name.clone());
        }
        b.line(format!(
            "{} _events = {}({});",
            ea.c_return_type,
            ea.c_func,
            args.join(", ")
        ));
        b.line("lua_newtable(L);");
        for array in &ea.arrays {
            b.line("lua_newtable(L);");
            b.block(
                format!("for (int _i = 0; _i < _events.{}; _i++)", array.c_count),
                |b| {
                    b.line("lua_newtable(L);");
                    let element = format!("_events.{}[_i]", array.c_array);
                    for field in &array.elements {
                        event_field(b, &element, field);
                    }
                    b.line("lua_rawseti(L, -2, _i + 1);");
                },
            );
            b.line(format!("lua_setfield(L, -2, \"{}\");", array.script_name));
        }
        b.line("return 1;");
        Ok(())
    })?;
    b.blank();
    Ok(())
}

fn event_field(b: &mut CodeBuilder, element: &str, field: &EventElementField) {
    let value = format!("{element}.{}", field.c_accessor);
    match &field.ty {
        BindingType::Struct(s) => {
            push_struct_copy(b, "L", &format!("_ef_{}", field.script_name), s, &value);
        }
        BindingType::ValueStruct(vs) => push_value_fields(b, "L", &value, &vs.fields),
        BindingType::Float | BindingType::Double => {
            b.line(format!("lua_pushnumber(L, {value});"));
        }
        BindingType::Bool => {
            b.line(format!("lua_pushboolean(L, {value});"));
        }
        ty if ty.c_integer().is_some() || matches!(ty, BindingType::Enum(_)) => {
            b.line(format!("lua_pushinteger(L, (lua_Integer){value});"));
        }
        ty if ty.is_string() => {
            b.line(format!("lua_pushstring(L, {value});"));
        }
        _ => {
            b.line("lua_pushnil(L); /* unsupported event element type */");
        }
    }
    b.line(format!("lua_setfield(L, -2, \"{}\");", field.script_name));
}

// ---------------------------------------------------------------------------
// Opaque types
// ---------------------------------------------------------------------------

/// `check_T`: unbox an opaque value, raising once it has been released.
fn opaque_check(b: &mut CodeBuilder, ot: &OpaqueTypeBinding) {
    let (c, mt) = (&ot.c_name, &ot.metatable);
    b.block(format!("static {c}* check_{c}(lua_State *L, int idx)"), |b| {
        b.line(format!("{c}** pp = ({c}**)luaL_checkudata(L, idx, \"{mt}\");"));
        b.line(format!("if (*pp == NULL) luaL_error(L, \"{c} already freed\");"));
        b.line("return *pp;");
    });
    b.blank();
}

fn opaque_type(
    b: &mut CodeBuilder,
    ot: &OpaqueTypeBinding,
    structs: &StructIndex,
    opaque: &OpaqueSet,
) -> Result<()> {
    let c = &ot.c_name;

    if ot.init_func.is_some() {
        opaque_constructor(b, ot, structs);
    }

    b.block(format!("static int l_{c}_gc(lua_State *L)"), |b| {
        release(b, ot);
    });
    b.blank();

    if ot.has_destroy() {
        b.block(format!("static int l_{c}_destroy(lua_State *L)"), |b| {
            release(b, ot);
        });
        b.blank();
    }

    for m in &ot.methods {
        b.try_block(format!("static int l_{}(lua_State *L)", m.c_name), |b| {
            b.line(format!("{c}* self = check_{c}(L, 1);"));
            let mut args = vec!["self".to_string()];
            for (i, p) in m.params.iter().enumerate() {
                param_decl(b, &m.c_name, p, i + 2, opaque)?;
                args.push(p.name.clone());
            }
            let call = format!("{}({})", m.c_name, args.join(", "));
            let results = push_return(b, &m.c_name, &m.ret, &call, &[])?;
            b.line(format!("return {results};"));
            Ok(())
        })?;
        b.blank();
    }

    let mut entries = Vec::new();
    if ot.has_destroy() {
        entries.push(("destroy".to_string(), format!("l_{c}_destroy")));
    }
    for m in &ot.methods {
        entries.push((m.script_name.clone(), format!("l_{}", m.c_name)));
    }
    lua_reg(b, &format!("{c}_methods"), &entries);
    Ok(())
}

/// Finalizer body shared by `__gc` and `destroy`: release once, then null
/// the inner pointer so later calls see a freed value.
fn release(b: &mut CodeBuilder, ot: &OpaqueTypeBinding) {
    let c = &ot.c_name;
    b.line(format!(
        "{c}** pp = ({c}**)luaL_checkudata(L, 1, \"{}\");",
        ot.metatable
    ));
    b.block("if (*pp != NULL)", |b| {
        match &ot.custom_destructor {
            Some(destructor) => {
                b.line(format!("{destructor}(*pp);"));
            }
            None => {
                if let Some(uninit) = &ot.uninit_func {
                    b.line(format!("{uninit}(*pp);"));
                }
                b.line("free(*pp);");
            }
        }
        b.line("*pp = NULL;");
    });
    b.line("return 0;");
}

fn opaque_constructor(b: &mut CodeBuilder, ot: &OpaqueTypeBinding, structs: &StructIndex) {
    let (c, mt) = (&ot.c_name, &ot.metatable);
    let Some(init) = &ot.init_func else {
        return;
    };
    let config_struct = ot
        .config_type
        .as_deref()
        .and_then(|t| structs.get(t).copied());

    b.block(format!("static int l_{c}_new(lua_State *L)"), |b| {
        b.line(format!("{c}* p = ({c}*)malloc(sizeof({c}));"));
        b.line("if (p == NULL) return luaL_error(L, \"out of memory\");");
        b.line(format!("memset(p, 0, sizeof({c}));"));
        if let (Some(cfg_type), Some(cfg_init)) = (&ot.config_type, &ot.config_init_func) {
            match config_struct {
                Some(cfg) => {
                    b.line(format!("{cfg_type} config;"));
                    b.open("if (lua_isuserdata(L, 1))");
                    b.line(format!(
                        "config = *({cfg_type}*)luaL_checkudata(L, 1, \"{}\");",
                        cfg.metatable
                    ));
                    b.branch("} else {");
                    b.line(format!("config = {cfg_init}();"));
                    b.close();
                }
                None => {
                    b.line(format!("{cfg_type} config = {cfg_init}();"));
                }
            }
        }
        let init_arg = if ot.config_type.is_some() { "&config" } else { "NULL" };
        b.line(format!(
            "{} result = {init}({init_arg}, p);",
            ot.init_result.c_type
        ));
        b.block(format!("if (result != {})", ot.init_result.success), |b| {
            b.line("free(p);");
            b.line(format!(
                "return luaL_error(L, \"{init} failed: %d\", (int)result);"
            ));
        });
        b.line(format!(
            "{c}** pp = ({c}**)lua_newuserdatauv(L, sizeof({c}*), {});",
            ot.dependencies.len()
        ));
        b.line("*pp = p;");
        b.line(format!("luaL_setmetatable(L, \"{mt}\");"));
        for dep in &ot.dependencies {
            b.line(format!("lua_pushvalue(L, {});", dep.ctor_arg));
            b.line(format!("lua_setiuservalue(L, -2, {});", dep.slot));
        }
        b.line("return 1;");
    });
    b.blank();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, ty: BindingType) -> ParamBinding {
        ParamBinding::new(name, ty)
    }

    fn decl(p: &ParamBinding, opaque: &OpaqueSet) -> String {
        let mut b = CodeBuilder::new();
        param_decl(&mut b, "f", p, 1, opaque).unwrap();
        b.finish()
    }

    #[test]
    fn integer_params_cast_through_native_type() {
        let mut b = CodeBuilder::new();
        param_decl(&mut b, "f", &param("n", BindingType::UInt64), 2, &OpaqueSet::new()).unwrap();
        assert_eq!(b.finish(), "uint64_t n = (uint64_t)luaL_checkinteger(L, 2);\n");
    }

    #[test]
    fn primitive_params_and_results_use_native_types() {
        const INTEGER: &str = "lua_pushinteger(L, (lua_Integer)f());";
        const NUMBER: &str = "lua_pushnumber(L, (lua_Number)f());";
        let cases = [
            (BindingType::Int, "int v = (int)luaL_checkinteger(L, 1);", INTEGER),
            (BindingType::Int64, "int64_t v = (int64_t)luaL_checkinteger(L, 1);", INTEGER),
            (BindingType::UInt32, "uint32_t v = (uint32_t)luaL_checkinteger(L, 1);", INTEGER),
            (BindingType::UInt64, "uint64_t v = (uint64_t)luaL_checkinteger(L, 1);", INTEGER),
            (BindingType::Size, "size_t v = (size_t)luaL_checkinteger(L, 1);", INTEGER),
            (BindingType::UIntPtr, "uintptr_t v = (uintptr_t)luaL_checkinteger(L, 1);", INTEGER),
            (BindingType::IntPtr, "intptr_t v = (intptr_t)luaL_checkinteger(L, 1);", INTEGER),
            (BindingType::Float, "float v = (float)luaL_checknumber(L, 1);", NUMBER),
            (BindingType::Double, "double v = (double)luaL_checknumber(L, 1);", NUMBER),
            (BindingType::Bool, "bool v = lua_toboolean(L, 1);", "lua_pushboolean(L, f());"),
            (BindingType::Str, "const char* v = luaL_checkstring(L, 1);", "lua_pushstring(L, f());"),
            (
                BindingType::VoidPtr,
                "void* v = lua_touserdata(L, 1);",
                "lua_pushlightuserdata(L, (void*)f());",
            ),
        ];
        for (ty, expected_decl, expected_push) in cases {
            assert_eq!(
                decl(&param("v", ty.clone()), &OpaqueSet::new()),
                format!("{expected_decl}\n"),
                "parameter of {ty:?}"
            );
            let mut b = CodeBuilder::new();
            let pushed = push_return(&mut b, "f", &ty, "f()", &[]).unwrap();
            assert_eq!(pushed, 1, "{ty:?}");
            assert_eq!(b.finish(), format!("{expected_push}\n"), "result of {ty:?}");
        }
    }

    #[test]
    fn optional_struct_pointer_accepts_nil() {
        let ty = BindingType::const_ptr(BindingType::struct_ref("t_desc", "t.Desc", "t.Desc"));
        let out = decl(&param("desc", ty).optional(), &OpaqueSet::new());
        assert!(out.contains("lua_isnoneornil(L, 1) ? NULL"), "got:\n{out}");
    }

    #[test]
    fn opaque_params_go_through_check() {
        let engine = BindingType::struct_ref("ma_engine", "ma.Engine", "ma.Engine");
        let opaque = OpaqueSet::from(["ma_engine"]);
        assert_eq!(
            decl(&param("e", BindingType::ptr(engine.clone())), &opaque),
            "ma_engine* e = check_ma_engine(L, 1);\n"
        );
        assert_eq!(
            decl(&param("e", engine.clone()), &opaque),
            "ma_engine e = *check_ma_engine(L, 1);\n"
        );
        let out = decl(&param("e", BindingType::ptr(engine)).optional(), &opaque);
        assert_eq!(out, "ma_engine* e = lua_isnoneornil(L, 1) ? NULL : check_ma_engine(L, 1);\n");
    }

    #[test]
    fn opaque_results_are_rejected() {
        let engine = BindingType::struct_ref("ma_engine", "ma.Engine", "ma.Engine");
        let opaque = OpaqueSet::from(["ma_engine"]);
        let err = check_return("ma_engine_get", &BindingType::ptr(engine), &opaque).unwrap_err();
        assert!(matches!(err, GenerateError::UnsupportedReturn { .. }), "{err:?}");
    }

    #[test]
    fn pointer_fields_are_read_from_userdata() {
        let image = BindingType::struct_ref("t_image_desc", "t.ImageDesc", "t.ImageDesc");
        let window = BindingType::struct_ref("t_window", "t.Window", "t.Window");
        let fields = [
            FieldBinding::new("images", BindingType::const_ptr(image)),
            FieldBinding::new("window", BindingType::ptr(window)),
            FieldBinding::new("samples", BindingType::const_ptr(BindingType::Float)),
        ];
        let opaque = OpaqueSet::from(["t_window"]);
        let mut b = CodeBuilder::new();
        for f in &fields {
            field_init(&mut b, f, &StructIndex::new(), &opaque);
        }
        let out = b.finish();
        for fragment in [
            "if (!lua_isnil(L, -1)) ud->images = (const t_image_desc*)luaL_checkudata(L, -1, \"t.ImageDesc\");",
            "if (!lua_isnil(L, -1)) ud->window = check_t_window(L, -1);",
            "if (!lua_isnil(L, -1)) ud->samples = (const float*)lua_touserdata(L, -1);",
        ] {
            assert!(out.contains(fragment), "missing `{fragment}`, got:\n{out}");
        }
    }

    #[test]
    fn callback_param_has_no_plain_decl() {
        let mut b = CodeBuilder::new();
        let ty = BindingType::Callback(CallbackType {
            params: vec![],
            ret: None,
            context_arg: true,
        });
        let err = param_decl(&mut b, "f", &param("cb", ty), 1, &OpaqueSet::new()).unwrap_err();
        assert!(matches!(err, GenerateError::UnsupportedParam { .. }));
    }

    #[test]
    fn callback_without_context_arg_uses_the_static_slot() {
        let cb = BindingType::Callback(CallbackType {
            params: vec![crate::model::NamedType {
                name: "arg0".to_string(),
                ty: BindingType::Int,
            }],
            ret: None,
            context_arg: false,
        });
        let f = FuncBinding::new(
            "t_on_tick",
            "OnTick",
            vec![param("cb", cb).bridge(CallbackBridge::Immediate)],
            BindingType::Void,
        );
        let mut b = CodeBuilder::new();
        function(&mut b, &f, &OpaqueSet::new()).unwrap();
        let out = b.finish();
        for fragment in [
            "static t_on_tick_cb_ctx _t_on_tick_static_ctx = { NULL, 0 };",
            "static void t_on_tick_trampoline(int arg0) {",
            "t_on_tick_cb_ctx* ctx = &_t_on_tick_static_ctx;",
            "t_on_tick_cb_ctx _cb_saved = _t_on_tick_static_ctx;",
            "_t_on_tick_static_ctx.callback_idx = 1;",
            "t_on_tick(t_on_tick_trampoline, NULL);",
            "_t_on_tick_static_ctx = _cb_saved;",
        ] {
            assert!(out.contains(fragment), "missing `{fragment}`, got:\n{out}");
        }
        assert!(!out.contains("void* context"), "got:\n{out}");
    }

    #[test]
    fn count_check_follows_value_struct_array() {
        let vs = ValueStructType {
            c_type: "b2Vec2".to_string(),
            stub_type: "number[]".to_string(),
            fields: vec![ValueField::Scalar("x".into()), ValueField::Scalar("y".into())],
            settable: true,
        };
        let f = FuncBinding::new(
            "b2MakePolygon",
            "make_polygon",
            vec![
                param("points", BindingType::ValueStructArray(vs, 8)),
                param("count", BindingType::Int),
            ],
            BindingType::Void,
        );
        let mut b = CodeBuilder::new();
        function(&mut b, &f, &OpaqueSet::new()).unwrap();
        let out = b.finish();
        assert!(out.contains("b2Vec2 _points_buf[8];"), "got:\n{out}");
        assert!(
            out.contains("luaL_argcheck(L, count >= 0 && count <= _points_len, 2, \"count out of range\");"),
            "got:\n{out}"
        );
    }
}
