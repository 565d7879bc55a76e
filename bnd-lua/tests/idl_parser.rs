//! Declaration-file grammar.

use bnd_lua::idl::{self, ast::IdlType};

#[test]
fn attributes_before_namespace_are_dropped() {
    let file = idl::parse(
        r#"
        [Prefix="t_"]
        [Experimental]
        namespace t { void init(); };
        "#,
    )
    .unwrap();

    assert_eq!(file.attrs.len(), 1);
    assert!(!file.attrs.contains_key("Experimental"));
    let ns = file.namespace.expect("namespace");
    assert_eq!(ns.operations.len(), 1);
    assert!(ns.operations[0].attrs.is_empty());
}

#[test]
fn file_attributes_and_namespace() {
    let file = idl::parse(
        r#"
        [Prefix="b2", CInclude="box2d/box2d.h", FuncNaming="PascalCase"]

        namespace b2d {
            [OutputParams="out"] void GetPosition(b2BodyId body, long out);
            unsigned long long Hash();
        };
        "#,
    )
    .unwrap();

    assert_eq!(file.attrs["Prefix"], "b2");
    assert_eq!(file.attrs["FuncNaming"], "PascalCase");
    let ns = file.namespace.expect("namespace");
    assert_eq!(ns.name, "b2d");
    assert_eq!(ns.operations.len(), 2);

    let get = &ns.operations[0];
    assert_eq!(get.name, "GetPosition");
    assert_eq!(get.attrs["OutputParams"], "out");
    assert_eq!(get.params[0].ty, IdlType::named("b2BodyId"));
    assert_eq!(get.params[1].ty, IdlType::named("long"));
    assert_eq!(ns.operations[1].ret, IdlType::named("unsigned long long"));
}

#[test]
fn multi_word_primitives() {
    let file = idl::parse(
        "namespace n { void f(long long a, unsigned short b, unsigned long c, long d); };",
    )
    .unwrap();
    let names: Vec<_> = file.namespace.unwrap().operations[0]
        .params
        .iter()
        .map(|p| p.ty.name.clone())
        .collect();
    assert_eq!(names, ["long long", "unsigned short", "unsigned long", "long"]);
}

#[test]
fn enum_items_and_explicit_values() {
    let file = idl::parse(r#"enum mode { "MODE_A", "MODE_B" = 5, "MODE_C" };"#).unwrap();
    let e = &file.enums[0];
    assert_eq!(e.name, "mode");
    let items: Vec<_> = e.items.iter().map(|i| (i.name.as_str(), i.value)).collect();
    assert_eq!(items, [("MODE_A", None), ("MODE_B", Some(5)), ("MODE_C", None)]);
}

#[test]
fn dictionaries_with_field_attributes_and_arrays() {
    let file = idl::parse(
        r#"
        [Prefix="v_"]
        [ValueStruct, ReadOnly] dictionary vec2 { float x; float y; };
        dictionary desc {
            [MapFieldName="init"] Callback init_cb;
            float color[4];
            [Ignore] VoidPtr user_data;
        };
        "#,
    )
    .unwrap();
    assert_eq!(file.dictionaries.len(), 2);
    let vec2 = file.dictionary("vec2").unwrap();
    assert!(vec2.attrs.contains_key("ValueStruct"));
    assert_eq!(vec2.attrs["ReadOnly"], "");

    let desc = file.dictionary("desc").unwrap();
    assert_eq!(desc.fields[0].attrs["MapFieldName"], "init");
    assert_eq!(desc.fields[1].ty.array_len, Some(4));
    assert!(desc.fields[2].attrs.contains_key("Ignore"));
}

#[test]
fn array_suffix_on_parameter_type() {
    let file = idl::parse("namespace n { void poly(b2Vec2[8] points, long count); };").unwrap();
    let op = &file.namespace.unwrap().operations[0];
    assert_eq!(op.params[0].ty.name, "b2Vec2");
    assert_eq!(op.params[0].ty.array_len, Some(8));
}

#[test]
fn interfaces_callbacks_and_events() {
    let file = idl::parse(
        r#"
        [Prefix="ma_"]

        [InitFunc="ma_engine_init", Dependency="engine:1"]
        interface ma_sound {
            void start();
            [Ignore] float volume(long channel);
        };

        [Persistent] callback log_fn = void (DOMString message, long level);

        event poll() : app_events {
            keys(key_events, key_count) { long code = code; boolean down = is_down; };
        };
        "#,
    )
    .unwrap();

    let iface = &file.interfaces[0];
    assert_eq!(iface.name, "ma_sound");
    assert_eq!(iface.attrs["Dependency"], "engine:1");
    assert_eq!(iface.methods.len(), 2);
    assert!(iface.methods[1].attrs.contains_key("Ignore"));

    let cb = &file.callbacks[0];
    assert_eq!(cb.name, "log_fn");
    assert!(cb.attrs.contains_key("Persistent"));
    assert_eq!(cb.ret, IdlType::named("void"));
    assert_eq!(cb.params.len(), 2);

    let ev = &file.events[0];
    assert_eq!(ev.name, "poll");
    assert_eq!(ev.c_return_type, "app_events");
    let keys = &ev.arrays[0];
    assert_eq!((keys.c_array.as_str(), keys.c_count.as_str()), ("key_events", "key_count"));
    assert_eq!(keys.fields[1].name, "down");
    assert_eq!(keys.fields[1].c_accessor, "is_down");
}

#[test]
fn leading_attribute_block_belongs_to_the_file() {
    let file = idl::parse(r#"[Prefix="x_"] dictionary x_desc { long a; };"#).unwrap();
    assert_eq!(file.attrs["Prefix"], "x_");
    assert!(file.dictionaries[0].attrs.is_empty());
}

#[test]
fn comments_are_ignored() {
    let file = idl::parse(
        "// leading\nnamespace n { // trailing\n void f(); // after\n };\n",
    )
    .unwrap();
    assert_eq!(file.namespace.unwrap().operations[0].name, "f");
}

#[test]
fn missing_semicolon_reports_line() {
    let err = idl::parse("namespace n {\n  void f()\n};\n").unwrap_err();
    assert_eq!(err.line, 3, "got: {err}");
    assert!(err.message.contains("expected ';'"), "got: {err}");
}

#[test]
fn unknown_definition_keyword() {
    let err = idl::parse("typedef long handle;").unwrap_err();
    assert!(err.message.contains("found 'typedef'"), "got: {err}");
}

#[test]
fn second_namespace_is_rejected() {
    let err = idl::parse("namespace a { };\nnamespace b { };").unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.message.contains("multiple namespaces"), "got: {err}");
}

#[test]
fn unsigned_needs_a_width() {
    let err = idl::parse("namespace n { unsigned float f(); };").unwrap_err();
    assert!(err.message.contains("after 'unsigned'"), "got: {err}");
}
