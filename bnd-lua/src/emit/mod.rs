//! Backends.  Both are pure functions of a [`ModuleSpec`](crate::model::ModuleSpec).

pub mod builder;
mod cpp;
pub mod glue;
pub mod stubs;

pub use builder::CodeBuilder;
