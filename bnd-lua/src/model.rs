//! Binding-level model shared by the resolvers and the backends.
//!
//! A [`ModuleSpec`] is built once per module and never mutated afterwards;
//! the glue and stub backends are pure functions of it.  Every name a
//! backend prints (metatables, script names, class names) is decided by the
//! resolver and stored here.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Binding types
// ---------------------------------------------------------------------------

/// The closed set of types both backends understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BindingType {
    Int,
    Int64,
    UInt32,
    UInt64,
    Size,
    UIntPtr,
    IntPtr,
    Float,
    Double,
    Bool,
    Str,
    VoidPtr,
    Void,
    Ptr(Box<BindingType>),
    ConstPtr(Box<BindingType>),
    Struct(StructRef),
    Enum(EnumRef),
    FixedArray(Box<BindingType>, usize),
    Callback(CallbackType),
    /// Two-float vector marshalled as `{x, y}` (C++ mode).
    Vec2,
    /// Four-float vector marshalled as `{x, y, z, w}` (C++ mode).
    Vec4,
    /// `float[N]` passed as a table and written back (C++ mode).
    FloatArray(usize),
    /// Small math aggregate projected to a plain table.
    ValueStruct(ValueStructType),
    /// Array of value structs, bounded by a maximum element count.
    ValueStructArray(ValueStructType, usize),
    /// Hand-written marshalling for types nothing else covers.
    Custom(CustomType),
}

/// Reference to a boxed struct (or opaque type) by native name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructRef {
    pub c_name: String,
    /// Registry key of the runtime metatable, e.g. `sokol.app.Desc`.
    pub metatable: String,
    /// Class name used in stubs and in callback trampolines.
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumRef {
    pub c_name: String,
    pub script_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedType {
    pub name: String,
    pub ty: BindingType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackType {
    pub params: Vec<NamedType>,
    pub ret: Option<Box<BindingType>>,
    /// The native function pointer receives the user-data pointer as its
    /// last argument. Without it the trampoline finds its Lua function
    /// through a file-static slot.
    pub context_arg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueStructType {
    pub c_type: String,
    pub stub_type: String,
    pub fields: Vec<ValueField>,
    /// Read-only value structs get no `__newindex` branch.
    pub settable: bool,
}

/// Layout of one slot of a value struct's table form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueField {
    /// `t[i]` <-> `v.accessor`
    Scalar(String),
    /// `t[i][j]` <-> `v.accessor.subs[j]`
    Nested { accessor: String, subs: Vec<String> },
}

/// Escape hatch.  Snippets use `{idx}`, `{name}`, `{value}` and
/// `{fieldName}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CustomType {
    pub c_type: String,
    pub stub_type: String,
    pub init: Option<String>,
    pub check: Option<String>,
    pub push: Option<String>,
    pub set: Option<String>,
}

impl BindingType {
    pub fn ptr(inner: BindingType) -> Self {
        BindingType::Ptr(Box::new(inner))
    }

    pub fn const_ptr(inner: BindingType) -> Self {
        BindingType::ConstPtr(Box::new(inner))
    }

    pub fn struct_ref(
        c_name: impl Into<String>,
        metatable: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        BindingType::Struct(StructRef {
            c_name: c_name.into(),
            metatable: metatable.into(),
            class_name: class_name.into(),
        })
    }

    pub fn enum_ref(c_name: impl Into<String>, script_name: impl Into<String>) -> Self {
        BindingType::Enum(EnumRef {
            c_name: c_name.into(),
            script_name: script_name.into(),
        })
    }

    /// Native integer spelling for the integer family, `None` otherwise.
    pub fn c_integer(&self) -> Option<&'static str> {
        match self {
            BindingType::Int => Some("int"),
            BindingType::Int64 => Some("int64_t"),
            BindingType::UInt32 => Some("uint32_t"),
            BindingType::UInt64 => Some("uint64_t"),
            BindingType::Size => Some("size_t"),
            BindingType::UIntPtr => Some("uintptr_t"),
            BindingType::IntPtr => Some("intptr_t"),
            _ => None,
        }
    }

    /// `float` / `double`.
    pub fn c_floating(&self) -> Option<&'static str> {
        match self {
            BindingType::Float => Some("float"),
            BindingType::Double => Some("double"),
            _ => None,
        }
    }

    /// `VoidPtr`, `Ptr(Void)` or `ConstPtr(Void)`.
    pub fn is_void_pointer(&self) -> bool {
        match self {
            BindingType::VoidPtr => true,
            BindingType::Ptr(inner) | BindingType::ConstPtr(inner) => **inner == BindingType::Void,
            _ => false,
        }
    }

    /// `Str` or `ConstPtr(Str)`; both are `const char*` natively.
    pub fn is_string(&self) -> bool {
        match self {
            BindingType::Str => true,
            BindingType::ConstPtr(inner) => **inner == BindingType::Str,
            _ => false,
        }
    }

    /// Native spelling of this type in a declaration.
    pub fn c_spelling(&self) -> String {
        match self {
            BindingType::Int
            | BindingType::Int64
            | BindingType::UInt32
            | BindingType::UInt64
            | BindingType::Size
            | BindingType::UIntPtr
            | BindingType::IntPtr => self.c_integer().unwrap_or("int").to_string(),
            BindingType::Float => "float".to_string(),
            BindingType::Double => "double".to_string(),
            BindingType::Bool => "bool".to_string(),
            BindingType::Str => "const char*".to_string(),
            BindingType::VoidPtr => "void*".to_string(),
            BindingType::Void => "void".to_string(),
            BindingType::Ptr(inner) => format!("{}*", inner.c_spelling()),
            BindingType::ConstPtr(inner) => format!("const {}*", inner.c_spelling()),
            BindingType::Struct(s) => s.c_name.clone(),
            BindingType::Enum(e) => e.c_name.clone(),
            BindingType::FixedArray(inner, _) => format!("{}*", inner.c_spelling()),
            BindingType::Callback(_) => "void*".to_string(),
            BindingType::Vec2 => "ImVec2".to_string(),
            BindingType::Vec4 => "ImVec4".to_string(),
            BindingType::FloatArray(_) => "float*".to_string(),
            BindingType::ValueStruct(vs) => vs.c_type.clone(),
            BindingType::ValueStructArray(vs, _) => format!("{}*", vs.c_type),
            BindingType::Custom(c) => c.c_type.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate records
// ---------------------------------------------------------------------------

/// One module's complete binding description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleSpec {
    /// Script module id, e.g. `sokol.app`.
    pub module_name: String,
    /// Native symbol prefix, e.g. `sapp_`.
    pub prefix: String,
    pub includes: Vec<String>,
    /// Raw code pasted into the glue output.
    pub extra_c_code: Option<String>,
    pub structs: Vec<StructBinding>,
    pub funcs: Vec<FuncBinding>,
    pub enums: Vec<EnumBinding>,
    /// Hand-written C functions registered in the module table.
    pub extra_regs: Vec<ExtraReg>,
    pub opaque_types: Vec<OpaqueTypeBinding>,
    /// Script-only declarations for hand-written glue (stubs only).
    pub extra_funcs: Vec<FuncBinding>,
    pub array_adapters: Vec<ArrayAdapterBinding>,
    pub event_adapters: Vec<EventAdapterBinding>,
    /// Present when the glue targets C++ (e.g. a C++-only library).
    pub cpp: Option<CppOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraReg {
    pub script_name: String,
    pub c_func: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CppOptions {
    /// Overrides `luaopen_{module}` as the entry point name.
    pub entry_point: Option<String>,
    /// Qualifies every native call as `ns::func(...)`.
    pub namespace: Option<String>,
}

/// Extra metamethods attached to a struct's metatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Metamethod {
    /// `__eq` by byte comparison.
    MemcmpEq,
    /// `__tostring` as a hex dump.
    HexTostring,
}

impl Metamethod {
    pub fn lua_name(self) -> &'static str {
        match self {
            Metamethod::MemcmpEq => "__eq",
            Metamethod::HexTostring => "__tostring",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructBinding {
    /// Native name, spelled verbatim in all generated C.
    pub c_name: String,
    /// Script-facing name with prefix and `_t` suffix removed.
    pub pascal_name: String,
    pub metatable: String,
    /// Generate `__index` / `__newindex` / `__pairs`.
    pub has_metamethods: bool,
    pub fields: Vec<FieldBinding>,
    pub source_link: Option<String>,
    /// Value-type handle (eligible for equality and printing).
    pub is_handle: bool,
    /// Constructor also accepts a Lua string (`ptr`/`size` pair).
    pub allow_string_init: bool,
    pub extra_metamethods: Vec<Metamethod>,
}

impl StructBinding {
    pub fn new(
        c_name: impl Into<String>,
        pascal_name: impl Into<String>,
        metatable: impl Into<String>,
        fields: Vec<FieldBinding>,
    ) -> Self {
        Self {
            c_name: c_name.into(),
            pascal_name: pascal_name.into(),
            metatable: metatable.into(),
            has_metamethods: false,
            fields,
            source_link: None,
            is_handle: false,
            allow_string_init: false,
            extra_metamethods: Vec::new(),
        }
    }

    /// The `Struct` type that refers to this binding.
    pub fn as_type(&self) -> BindingType {
        BindingType::struct_ref(&self.c_name, &self.metatable, &self.metatable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldBinding {
    pub c_name: String,
    pub script_name: String,
    pub ty: BindingType,
}

impl FieldBinding {
    pub fn new(c_name: impl Into<String>, ty: BindingType) -> Self {
        let c_name = c_name.into();
        Self {
            script_name: c_name.clone(),
            c_name,
            ty,
        }
    }
}

/// How a callback parameter reaches native code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CallbackBridge {
    /// Not a callback (or not yet decided).
    #[default]
    None,
    /// Only invoked during the call; the closure stays on the Lua stack.
    Immediate,
    /// Kept for later; anchored in the registry until replaced or cleared.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamBinding {
    pub name: String,
    pub ty: BindingType,
    pub is_output: bool,
    pub is_optional: bool,
    pub callback_bridge: CallbackBridge,
}

impl ParamBinding {
    pub fn new(name: impl Into<String>, ty: BindingType) -> Self {
        Self {
            name: name.into(),
            ty,
            is_output: false,
            is_optional: false,
            callback_bridge: CallbackBridge::None,
        }
    }

    pub fn output(mut self) -> Self {
        self.is_output = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn bridge(mut self, bridge: CallbackBridge) -> Self {
        self.callback_bridge = bridge;
        self
    }
}

/// Patch a field of a boxed struct result after the native call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostCallPatch {
    pub field: String,
    pub c_expr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuncBinding {
    pub c_name: String,
    pub script_name: String,
    pub params: Vec<ParamBinding>,
    pub ret: BindingType,
    pub source_link: Option<String>,
    pub post_call_patches: Vec<PostCallPatch>,
}

impl FuncBinding {
    pub fn new(
        c_name: impl Into<String>,
        script_name: impl Into<String>,
        params: Vec<ParamBinding>,
        ret: BindingType,
    ) -> Self {
        Self {
            c_name: c_name.into(),
            script_name: script_name.into(),
            params,
            ret,
            source_link: None,
            post_call_patches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumItemBinding {
    pub script_name: String,
    pub c_const: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumBinding {
    pub c_name: String,
    /// Fully qualified stub name, e.g. `sokol.app.EventType`.
    pub script_name: String,
    /// Key under which the constant table is stored in the module.
    pub field_name: String,
    pub items: Vec<EnumItemBinding>,
    pub source_link: Option<String>,
}

/// Keep-alive link from a child opaque value to the constructor argument
/// that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyBinding {
    /// 1-based constructor argument captured.
    pub ctor_arg: usize,
    /// 1-based user-value slot it is stored in.
    pub slot: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodBinding {
    pub c_name: String,
    pub script_name: String,
    pub params: Vec<ParamBinding>,
    pub ret: BindingType,
    pub source_link: Option<String>,
}

/// Native init call convention: `Result init(Config*, T*)` checked against
/// a success constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitResult {
    pub c_type: String,
    pub success: String,
}

impl Default for InitResult {
    fn default() -> Self {
        Self {
            c_type: "ma_result".to_string(),
            success: "MA_SUCCESS".to_string(),
        }
    }
}

/// Heap-allocated native object exposed through a boxed pointer-to-pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpaqueTypeBinding {
    pub c_name: String,
    pub pascal_name: String,
    pub metatable: String,
    pub class_name: String,
    pub init_func: Option<String>,
    pub uninit_func: Option<String>,
    pub config_type: Option<String>,
    pub config_init_func: Option<String>,
    pub init_result: InitResult,
    /// Replaces the `uninit` + `free` pair in the finalizer.
    pub custom_destructor: Option<String>,
    pub methods: Vec<MethodBinding>,
    pub source_link: Option<String>,
    pub dependencies: Vec<DependencyBinding>,
}

impl OpaqueTypeBinding {
    pub fn new(
        c_name: impl Into<String>,
        pascal_name: impl Into<String>,
        metatable: impl Into<String>,
    ) -> Self {
        let metatable = metatable.into();
        Self {
            c_name: c_name.into(),
            pascal_name: pascal_name.into(),
            class_name: metatable.clone(),
            metatable,
            init_func: None,
            uninit_func: None,
            config_type: None,
            config_init_func: None,
            init_result: InitResult::default(),
            custom_destructor: None,
            methods: Vec::new(),
            source_link: None,
            dependencies: Vec::new(),
        }
    }

    /// Whether the finalizer has anything to release besides the box.
    pub fn has_destroy(&self) -> bool {
        self.uninit_func.is_some() || self.custom_destructor.is_some()
    }
}

/// `count(args)` + `fill(args, buf, n)` projected to one array-returning
/// script function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayAdapterBinding {
    pub script_name: String,
    pub count_func: String,
    pub fill_func: String,
    pub params: Vec<ParamBinding>,
    pub element: BindingType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventElementField {
    pub script_name: String,
    pub c_accessor: String,
    pub ty: BindingType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventArrayField {
    pub script_name: String,
    pub c_array: String,
    pub c_count: String,
    pub elements: Vec<EventElementField>,
}

/// Projection of one native "events" aggregate into nested tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventAdapterBinding {
    pub script_name: String,
    pub c_func: String,
    pub c_return_type: String,
    pub params: Vec<ParamBinding>,
    pub arrays: Vec<EventArrayField>,
}

impl ModuleSpec {
    pub fn new(module_name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn find_struct(&self, c_name: &str) -> Option<&StructBinding> {
        self.structs.iter().find(|s| s.c_name == c_name)
    }
}
