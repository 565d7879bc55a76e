//! Declaration-file resolution: naming, type categories and attribute
//! mini-syntaxes.

use bnd_lua::error::ResolveError;
use bnd_lua::idl;
use bnd_lua::model::{BindingType, CallbackBridge, ModuleSpec};
use bnd_lua::policy::Policy;
use bnd_lua::resolve::{ExternalTable, resolve_idl};

fn try_resolve_with(
    src: &str,
    module: &str,
    policy: &Policy,
    externals: &ExternalTable,
) -> Result<ModuleSpec, ResolveError> {
    let file = idl::parse(src).unwrap_or_else(|e| panic!("parse failed: {e}"));
    resolve_idl(&file, module, policy, externals)
}

fn resolve(src: &str, module: &str) -> ModuleSpec {
    try_resolve_with(src, module, &Policy::default(), &ExternalTable::new())
        .unwrap_or_else(|e| panic!("resolve failed: {e}"))
}

fn desc_ref() -> BindingType {
    BindingType::struct_ref("t_desc", "t.Desc", "t.Desc")
}

// ---------------------------------------------------------------------------
// Structs and functions
// ---------------------------------------------------------------------------

#[test]
fn struct_param_is_promoted_to_const_pointer() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        dictionary t_desc { long width; DOMString title; };
        namespace t { void init(t_desc desc); };
        "#,
        "t",
    );

    let desc = &spec.structs[0];
    assert_eq!(desc.c_name, "t_desc");
    assert_eq!(desc.pascal_name, "Desc");
    assert_eq!(desc.metatable, "t.Desc");
    let fields: Vec<_> = desc.fields.iter().map(|f| (f.script_name.as_str(), &f.ty)).collect();
    assert_eq!(fields, [("width", &BindingType::Int), ("title", &BindingType::Str)]);

    let init = &spec.funcs[0];
    assert_eq!(init.c_name, "t_init");
    assert_eq!(init.script_name, "init");
    assert_eq!(init.params.len(), 1);
    assert_eq!(init.params[0].ty, BindingType::const_ptr(desc_ref()));
}

#[test]
fn type_suffix_only_affects_generated_names() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        dictionary t_range_t { Size size; };
        namespace t { t_range_t make(); };
        "#,
        "t",
    );
    let s = &spec.structs[0];
    assert_eq!(s.c_name, "t_range_t");
    assert_eq!(s.metatable, "t.Range");
    assert_eq!(
        spec.funcs[0].ret,
        BindingType::struct_ref("t_range_t", "t.Range", "t.Range")
    );
}

#[test]
fn handles_stay_by_value() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        [HandleType] dictionary t_buffer { long id; };
        namespace t { void destroy(t_buffer buf); };
        "#,
        "t",
    );
    assert!(spec.structs[0].is_handle);
    assert_eq!(
        spec.funcs[0].params[0].ty,
        BindingType::struct_ref("t_buffer", "t.Buffer", "t.Buffer")
    );
}

#[test]
fn pascal_case_functions_get_snake_script_names() {
    let spec = resolve(
        r#"
        [Prefix="b2", FuncNaming="PascalCase"]
        namespace b2d { void CreateWorld(); double GetAABB(); };
        "#,
        "box2d",
    );
    let names: Vec<_> = spec
        .funcs
        .iter()
        .map(|f| (f.c_name.as_str(), f.script_name.as_str()))
        .collect();
    assert_eq!(
        names,
        [("b2CreateWorld", "create_world"), ("b2GetAABB", "get_aabb")]
    );
}

#[test]
fn output_optional_and_patch_attributes() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        dictionary t_range { ConstVoidPtr ptr; Size size; };
        namespace t {
            [OutputParams="w, h", OptionalParams="scale"] void size(long w, long h, float scale);
            [PostCallPatch="size:0"] t_range empty();
        };
        "#,
        "t",
    );
    let size = &spec.funcs[0];
    let flags: Vec<_> = size
        .params
        .iter()
        .map(|p| (p.name.as_str(), p.is_output, p.is_optional))
        .collect();
    assert_eq!(
        flags,
        [("w", true, false), ("h", true, false), ("scale", false, true)]
    );

    let empty = &spec.funcs[1];
    assert_eq!(empty.post_call_patches.len(), 1);
    assert_eq!(empty.post_call_patches[0].field, "size");
    assert_eq!(empty.post_call_patches[0].c_expr, "0");
}

#[test]
fn ignored_operations_are_dropped() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        namespace t { void keep(); [Ignore] void drop(); void policy_drop(); };
        "#,
        "t",
    );
    let mut policy = Policy::default();
    policy.ignore.insert("policy_drop".to_string());
    let filtered = try_resolve_with(
        r#"
        [Prefix="t_"]
        namespace t { void keep(); [Ignore] void drop(); void policy_drop(); };
        "#,
        "t",
        &policy,
        &ExternalTable::new(),
    )
    .unwrap();
    assert_eq!(spec.funcs.len(), 2);
    assert_eq!(filtered.funcs.len(), 1);
    assert_eq!(filtered.funcs[0].c_name, "t_keep");
}

#[test]
fn policy_excludes_interfaces_and_events() {
    let src = r#"
        [Prefix="t_"]
        interface t_window { long width(); };
        interface t_cursor { void show(); };
        event poll_events() : t_events {
            keys(key_events, key_count) { long code = code; };
        };
        "#;
    let all = resolve(src, "t");
    assert_eq!(all.opaque_types.len(), 2);
    assert_eq!(all.event_adapters.len(), 1);

    let mut policy = Policy::default();
    policy.ignore.insert("t_cursor".to_string());
    policy.ignore.insert("poll_events".to_string());
    let filtered = try_resolve_with(src, "t", &policy, &ExternalTable::new()).unwrap();
    let names: Vec<_> = filtered.opaque_types.iter().map(|o| o.c_name.as_str()).collect();
    assert_eq!(names, ["t_window"]);
    assert!(filtered.event_adapters.is_empty());
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[test]
fn callback_context_is_collapsed() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        callback t_visit_fn = boolean (long index);
        namespace t { long each(t_visit_fn visit, VoidPtr user_data, long limit); };
        "#,
        "t",
    );
    let each = &spec.funcs[0];
    assert_eq!(each.params.len(), 2, "source had 3 parameters");
    assert_eq!(each.params[0].callback_bridge, CallbackBridge::Immediate);
    assert!(!each.params[0].is_optional);
    let BindingType::Callback(cb) = &each.params[0].ty else {
        panic!("expected callback, got {:?}", each.params[0].ty);
    };
    assert_eq!(cb.params.len(), 1);
    assert_eq!(cb.ret.as_deref(), Some(&BindingType::Bool));
    assert_eq!(each.params[1].name, "limit");
}

#[test]
fn persistent_callbacks_are_optional() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        [Persistent] callback t_log_fn = void (DOMString message);
        namespace t { void set_logger(t_log_fn cb, VoidPtr user_data); };
        "#,
        "t",
    );
    let p = &spec.funcs[0].params;
    assert_eq!(p.len(), 1);
    assert_eq!(p[0].callback_bridge, CallbackBridge::Persistent);
    assert!(p[0].is_optional);
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[test]
fn enum_values_continue_after_explicit_ones() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        enum t_mode { "T_MODE_A", "T_MODE_B" = 5, "T_MODE_C", "_T_MODE_NUM" };
        "#,
        "t",
    );
    let e = &spec.enums[0];
    assert_eq!(e.field_name, "Mode");
    assert_eq!(e.script_name, "t.Mode");
    let items: Vec<_> = e
        .items
        .iter()
        .map(|i| (i.script_name.as_str(), i.c_const.as_str(), i.value))
        .collect();
    assert_eq!(
        items,
        [("A", "T_MODE_A", 0), ("B", "T_MODE_B", 5), ("C", "T_MODE_C", 6)]
    );
}

#[test]
fn camel_case_enum_items() {
    let spec = resolve(
        r#"
        [Prefix="b2"]
        [EnumItemStyle="CamelCase"]
        enum b2BodyType { "b2_staticBody", "b2_kinematicBody" };
        "#,
        "box2d",
    );
    let e = &spec.enums[0];
    assert_eq!(e.script_name, "box2d.BodyType");
    let names: Vec<_> = e.items.iter().map(|i| i.script_name.as_str()).collect();
    assert_eq!(names, ["STATIC_BODY", "KINEMATIC_BODY"]);
}

#[test]
fn disallowed_enum_becomes_integer() {
    let src = r#"
        [Prefix="t_"]
        enum t_mode { "T_MODE_A" };
        namespace t { void set_mode(t_mode mode); };
    "#;
    let spec = resolve(src, "t");
    assert_eq!(
        spec.funcs[0].params[0].ty,
        BindingType::enum_ref("t_mode", "t.Mode")
    );

    let policy = Policy {
        allowed_enums: Some(Default::default()),
        ..Policy::default()
    };
    let spec = try_resolve_with(src, "t", &policy, &ExternalTable::new()).unwrap();
    assert_eq!(spec.funcs[0].params[0].ty, BindingType::Int);
}

// ---------------------------------------------------------------------------
// Dictionaries
// ---------------------------------------------------------------------------

#[test]
fn field_naming_rules() {
    let src = r#"
        [Prefix="b2"]
        [CamelCase, MapFieldName="userData:data"]
        dictionary b2BodyDef {
            float linearDamping;
            [MapFieldName="spin"] float angularVelocity;
            VoidPtr userData;
            [Ignore] long internalFlags;
            boolean isAwake;
        };
    "#;
    let spec = resolve(src, "box2d");
    let names: Vec<_> = spec.structs[0]
        .fields
        .iter()
        .map(|f| (f.c_name.as_str(), f.script_name.as_str()))
        .collect();
    assert_eq!(
        names,
        [
            ("linearDamping", "linear_damping"),
            ("angularVelocity", "spin"),
            ("userData", "data"),
            ("isAwake", "is_awake"),
        ]
    );

    let mut policy = Policy::default();
    policy
        .rename_fields
        .insert("b2BodyDef.isAwake".to_string(), "awake".to_string());
    let spec = try_resolve_with(src, "box2d", &policy, &ExternalTable::new()).unwrap();
    assert_eq!(spec.structs[0].fields[3].script_name, "awake");
}

#[test]
fn value_structs_are_not_boxed() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        [ValueStruct] dictionary t_vec2 { float x; float y; };
        namespace t {
            t_vec2 mouse();
            void polygon(t_vec2[8] points, long count);
        };
        "#,
        "t",
    );
    assert!(spec.structs.is_empty());
    let BindingType::ValueStruct(vs) = &spec.funcs[0].ret else {
        panic!("expected value struct, got {:?}", spec.funcs[0].ret);
    };
    assert_eq!(vs.c_type, "t_vec2");
    assert_eq!(vs.stub_type, "number[]");
    assert!(vs.settable);
    assert!(matches!(
        &spec.funcs[1].params[0].ty,
        BindingType::ValueStructArray(_, 8)
    ));
}

#[test]
fn live_fields_and_string_init() {
    let spec = resolve(
        r#"
        [Prefix="t_"]
        [HasMetamethods] dictionary t_desc { long width; };
        [AllowStringInit] dictionary t_range { ConstVoidPtr ptr; Size size; };
        "#,
        "t",
    );
    assert!(spec.structs[0].has_metamethods);
    assert!(!spec.structs[1].has_metamethods);
    assert!(spec.structs[1].allow_string_init);
}

// ---------------------------------------------------------------------------
// Interfaces, adapters, extras
// ---------------------------------------------------------------------------

#[test]
fn interface_lifecycle_and_dependencies() {
    let spec = resolve(
        r#"
        [Prefix="ma_"]
        [InitFunc="ma_engine_init", UninitFunc="ma_engine_uninit", InitResult="ma_result:MA_SUCCESS"]
        interface ma_engine { void start(); float volume(); };

        [InitFunc="ma_sound_init", Destructor="ma_sound_free", Dependency="engine:1"]
        interface ma_sound { void play(float gain); };
        "#,
        "miniaudio",
    );
    let engine = &spec.opaque_types[0];
    assert_eq!(engine.metatable, "miniaudio.Engine");
    assert_eq!(engine.init_func.as_deref(), Some("ma_engine_init"));
    assert!(engine.has_destroy());
    assert_eq!(engine.methods[1].c_name, "ma_engine_volume");
    assert_eq!(engine.methods[1].ret, BindingType::Float);

    let sound = &spec.opaque_types[1];
    assert_eq!(sound.custom_destructor.as_deref(), Some("ma_sound_free"));
    assert_eq!(sound.dependencies.len(), 1);
    let dep = &sound.dependencies[0];
    assert_eq!((dep.name.as_str(), dep.ctor_arg, dep.slot), ("engine", 1, 1));
}

#[test]
fn interface_params_are_passed_by_pointer() {
    let spec = resolve(
        r#"
        [Prefix="ma_"]
        interface ma_engine { void start(); };
        interface ma_sound { void attach(ma_engine e); };
        namespace ma { void play(ma_engine e); };
        "#,
        "miniaudio",
    );
    let engine = BindingType::ptr(BindingType::struct_ref(
        "ma_engine",
        "miniaudio.Engine",
        "miniaudio.Engine",
    ));
    assert_eq!(spec.funcs[0].params[0].ty, engine);
    assert_eq!(spec.opaque_types[1].methods[0].params[0].ty, engine);
}

#[test]
fn dependency_slots_must_start_at_one() {
    let err = try_resolve_with(
        r#"
        [Prefix="ma_"]
        [InitFunc="ma_sound_init", Dependency="engine:2"]
        interface ma_sound { void play(); };
        "#,
        "miniaudio",
        &Policy::default(),
        &ExternalTable::new(),
    )
    .unwrap_err();
    assert!(
        matches!(err, ResolveError::InvalidDependency { ref type_name, .. } if type_name == "ma_sound"),
        "got: {err}"
    );
}

#[test]
fn malformed_init_result() {
    let err = try_resolve_with(
        r#"
        [Prefix="ma_"]
        [InitFunc="ma_engine_init", InitResult="ma_result"]
        interface ma_engine { void start(); };
        "#,
        "miniaudio",
        &Policy::default(),
        &ExternalTable::new(),
    )
    .unwrap_err();
    assert!(
        matches!(err, ResolveError::InvalidAttribute { ref attribute, .. } if attribute == "InitResult"),
        "got: {err}"
    );
}

#[test]
fn array_adapter_needs_count_func() {
    let src_ok = r#"
        [Prefix="t_"]
        namespace t { [ArrayAdapter, CountFunc="t_count_items"] long items(); };
    "#;
    let spec = resolve(src_ok, "t");
    assert!(spec.funcs.is_empty());
    let aa = &spec.array_adapters[0];
    assert_eq!(aa.script_name, "items");
    assert_eq!(aa.count_func, "t_count_items");
    assert_eq!(aa.fill_func, "t_items");
    assert_eq!(aa.element, BindingType::Int);

    let err = try_resolve_with(
        r#"
        [Prefix="t_"]
        namespace t { [ArrayAdapter] long items(); };
        "#,
        "t",
        &Policy::default(),
        &ExternalTable::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ResolveError::InvalidAttribute { .. }), "got: {err}");
}

#[test]
fn event_adapter_defaults_its_native_function() {
    let spec = resolve(
        r#"
        [Prefix="app_"]
        event poll_events() : app_events {
            keys(key_events, key_count) { long code = code; boolean down = down; };
        };
        "#,
        "app",
    );
    let ev = &spec.event_adapters[0];
    assert_eq!(ev.c_func, "app_PollEvents");
    assert_eq!(ev.c_return_type, "app_events");
    assert_eq!(ev.arrays[0].elements[1].ty, BindingType::Bool);
}

#[test]
fn extra_functions_and_registrations() {
    let spec = resolve(
        r#"
        [Prefix="t_", ExtraLuaFunc="run:t_desc:void, mix:long+float?:double", ExtraLuaReg="Run:l_t_run"]
        dictionary t_desc { long width; };
        "#,
        "t",
    );
    let run = &spec.extra_funcs[0];
    assert_eq!(run.c_name, "l_t_run");
    assert_eq!(run.params[0].name, "desc");
    assert_eq!(run.params[0].ty, desc_ref());

    let mix = &spec.extra_funcs[1];
    let params: Vec<_> = mix
        .params
        .iter()
        .map(|p| (p.name.as_str(), p.is_optional))
        .collect();
    assert_eq!(params, [("p1", false), ("p2", true)]);
    assert_eq!(mix.ret, BindingType::Double);

    assert_eq!(spec.extra_regs[0].script_name, "Run");
    assert_eq!(spec.extra_regs[0].c_func, "l_t_run");
}

#[test]
fn includes_come_from_the_file() {
    let spec = resolve(r#"[Prefix="t_", CInclude="a.h, b/c.h"]"#, "t");
    assert_eq!(spec.includes, ["a.h", "b/c.h"]);
}

// ---------------------------------------------------------------------------
// Cross-module references
// ---------------------------------------------------------------------------

#[test]
fn unresolved_reference_is_an_error() {
    let err = try_resolve_with(
        r#"
        [Prefix="t_"]
        namespace t { void f(missing_t x); };
        "#,
        "t",
        &Policy::default(),
        &ExternalTable::new(),
    )
    .unwrap_err();
    assert!(
        matches!(err, ResolveError::UnresolvedReference { ref name, .. } if name == "missing_t"),
        "got: {err}"
    );
    assert!(err.to_string().contains("parameter `x` of `f`"), "got: {err}");
}

#[test]
fn sibling_module_types_resolve_by_prefix() {
    let mut externals = ExternalTable::new();
    externals.register_prefix("log_", "demo.log");
    externals.register_enum("log_level");
    let spec = try_resolve_with(
        r#"
        [Prefix="t_"]
        namespace t { void set(log_desc_t desc, log_level level); };
        "#,
        "t",
        &Policy::default(),
        &externals,
    )
    .unwrap();
    let params = &spec.funcs[0].params;
    assert_eq!(
        params[0].ty,
        BindingType::const_ptr(BindingType::struct_ref(
            "log_desc_t",
            "demo.log.Desc",
            "demo.log.Desc"
        ))
    );
    assert_eq!(
        params[1].ty,
        BindingType::enum_ref("log_level", "demo.log.Level")
    );
}
