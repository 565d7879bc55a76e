//! LuaCATS stub output.

use bnd_lua::emit::stubs;
use bnd_lua::idl;
use bnd_lua::model::{BindingType, ModuleSpec, ValueField, ValueStructType};
use bnd_lua::policy::Policy;
use bnd_lua::resolve::{ExternalTable, resolve_idl};

fn spec(src: &str, module: &str) -> ModuleSpec {
    let file = idl::parse(src).unwrap_or_else(|e| panic!("parse failed: {e}"));
    resolve_idl(&file, module, &Policy::default(), &ExternalTable::new())
        .unwrap_or_else(|e| panic!("resolve failed: {e}"))
}

fn stubs(src: &str, module: &str) -> String {
    stubs::generate(&spec(src, module))
}

fn assert_lines(out: &str, lines: &[&str]) {
    for line in lines {
        assert!(
            out.lines().any(|l| l == *line),
            "missing line `{line}`, got:\n{out}"
        );
    }
}

#[test]
fn file_frame() {
    let out = stubs("namespace t { void ping(); };", "t");
    assert!(
        out.starts_with("---@meta\n-- LuaCATS type definitions for t\n-- Auto-generated, do not edit\n"),
        "got:\n{out}"
    );
    assert!(out.ends_with("return M\n"), "got:\n{out}");
    assert_lines(&out, &["---@class t", "---@field ping fun()", "---@type t", "local M = {}"]);
}

#[test]
fn struct_classes_and_constructors() {
    let out = stubs(
        r#"
        [Prefix="t_"]
        dictionary t_desc { long width; DOMString title; float scale[2]; };
        [AllowStringInit] dictionary t_range { ConstVoidPtr ptr; Size size; };
        "#,
        "t",
    );
    assert_lines(
        &out,
        &[
            "---@class t.Desc",
            "---@field width? integer",
            "---@field title? string",
            "---@field scale? number[]",
            "---@class t.Range",
            "---@field ptr? lightuserdata?",
            "---@field size? integer",
            "---@field Desc fun(t?: t.Desc): t.Desc",
            "---@field Range fun(t?: t.Range|string): t.Range",
        ],
    );
    // Struct classes come before the module class.
    let desc = out.find("---@class t.Desc").unwrap();
    let module = out.find("---@class t\n").unwrap();
    assert!(desc < module, "got:\n{out}");
}

#[test]
fn enum_blocks_carry_values() {
    let out = stubs(
        r#"
        [Prefix="t_"]
        enum t_mode { "T_MODE_A", "T_MODE_B" = 5, "T_MODE_C" };
        namespace t { t_mode mode(); };
        "#,
        "t",
    );
    assert!(
        out.contains("---@enum t.Mode\nM.Mode = {\n    A = 0,\n    B = 5,\n    C = 6,\n}\n"),
        "got:\n{out}"
    );
    assert_lines(&out, &["---@field mode fun(): t.Mode"]);
}

#[test]
fn callbacks_outputs_and_optionals() {
    let out = stubs(
        r#"
        [Prefix="t_"]
        callback t_visit_fn = boolean (long index);
        [Persistent] callback t_log_fn = void (DOMString message);
        namespace t {
            long each(t_visit_fn visit, VoidPtr user_data);
            void set_logger(t_log_fn cb, VoidPtr user_data);
            [OutputParams="w,h"] boolean size(long w, long h);
            [OptionalParams="flags"] void open(DOMString path, long flags);
        };
        "#,
        "t",
    );
    assert_lines(
        &out,
        &[
            "---@field each fun(visit: fun(index: integer): boolean): integer",
            "---@field set_logger fun(cb?: fun(message: string))",
            "---@field size fun(w?: integer, h?: integer): boolean, integer, integer",
            "---@field open fun(path: string, flags?: integer)",
        ],
    );
}

#[test]
fn opaque_classes_and_constructors() {
    let out = stubs(
        r#"
        [Prefix="ma_"]
        dictionary ma_engine_config { long channels; };
        [InitFunc="ma_engine_init", UninitFunc="ma_engine_uninit", ConfigType="ma_engine_config", ConfigInitFunc="ma_engine_config_init"]
        interface ma_engine { void start(); float volume(); };

        [InitFunc="ma_sound_init", Dependency="engine:1"]
        interface ma_sound { void play(float gain); };
        "#,
        "miniaudio",
    );
    assert_lines(
        &out,
        &[
            "---@class miniaudio.Engine",
            "---@field destroy fun(self: miniaudio.Engine)",
            "---@field start fun(self: miniaudio.Engine)",
            "---@field volume fun(self: miniaudio.Engine): number",
            "---@class miniaudio.Sound",
            "---@field play fun(self: miniaudio.Sound, gain: number)",
            "---@field engine_init fun(config?: miniaudio.EngineConfig): miniaudio.Engine",
            "---@field sound_init fun(engine: miniaudio.Engine): miniaudio.Sound",
        ],
    );
    // Nothing to release beyond the box, so no explicit destroy.
    assert!(
        !out.contains("---@field destroy fun(self: miniaudio.Sound)"),
        "got:\n{out}"
    );
}

#[test]
fn adapters_and_extra_functions() {
    let out = stubs(
        r#"
        [Prefix="app_", ExtraLuaFunc="run:app_desc:void"]
        [ValueStruct] dictionary app_vec2 { float x; float y; };
        dictionary app_desc { long width; };
        event poll_events() : app_events {
            keys(key_events, key_count) { long code = code; };
        };
        namespace app { [ArrayAdapter, CountFunc="app_count_monitors"] app_vec2 monitors(); };
        "#,
        "demo.app",
    );
    assert_lines(
        &out,
        &[
            "---@field monitors fun(): number[][]",
            "---@field poll_events fun(): table",
            "---@field run fun(desc: demo.app.Desc)",
        ],
    );
}

#[test]
fn stub_type_spellings() {
    let vec2 = ValueStructType {
        c_type: "b2Vec2".to_string(),
        stub_type: "number[]".to_string(),
        fields: vec![ValueField::Scalar("x".into()), ValueField::Scalar("y".into())],
        settable: true,
    };
    let cases = [
        (BindingType::UInt64, "integer"),
        (BindingType::Double, "number"),
        (BindingType::Str, "string"),
        (BindingType::VoidPtr, "lightuserdata?"),
        (BindingType::const_ptr(BindingType::Void), "lightuserdata?"),
        (BindingType::Void, "nil"),
        (
            BindingType::FixedArray(Box::new(BindingType::Int), 4),
            "integer[]",
        ),
        (
            BindingType::const_ptr(BindingType::struct_ref("t_desc", "t.Desc", "t.Desc")),
            "t.Desc",
        ),
        (BindingType::ValueStruct(vec2.clone()), "number[]"),
        (BindingType::ValueStructArray(vec2, 8), "number[][]"),
    ];
    for (ty, expected) in cases {
        assert_eq!(stubs::stub_type(&ty), expected, "type {ty:?}");
    }
}

#[test]
fn source_links_annotate_declarations() {
    let mut spec = spec(
        r#"
        [Prefix="t_"]
        dictionary t_desc { long width; };
        namespace t { long width(); };
        "#,
        "t",
    );
    spec.structs[0].source_link = Some("https://example.com/t.h#L3".to_string());
    spec.funcs[0].source_link = Some("https://example.com/t.h#L9".to_string());
    let out = stubs::generate(&spec);
    assert!(
        out.contains("--- [source](https://example.com/t.h#L3)\n---@see https://example.com/t.h#L3\n---@class t.Desc\n"),
        "got:\n{out}"
    );
    assert_lines(
        &out,
        &["---@field width fun(): integer [source](https://example.com/t.h#L9)"],
    );
}
