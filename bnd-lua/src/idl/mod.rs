//! Declaration-file front end.
//!
//! A small interface-description language for the parts of a C API that a
//! header alone cannot describe: which structs are value types, which
//! callbacks outlive the call, which opaque types own which.
//!
//! ```text
//! [Prefix="b2", CInclude="box2d/box2d.h", FuncNaming="PascalCase"]
//!
//! [ValueStruct] dictionary b2Vec2 { float x; float y; };
//! [Persistent] callback b2TaskFcn = void (long start, long end);
//!
//! namespace b2d {
//!     b2WorldId CreateWorld(b2WorldDef def);
//! };
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::IdlFile;
pub use parser::parse;
