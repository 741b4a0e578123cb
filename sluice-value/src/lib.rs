//! Untyped configuration values, link references, content hashing and the
//! function registry: the lowest-level crate of the dataflow engine, with
//! no dependency on the graph, rewrite pipeline or executor that build on
//! top of it.

pub mod error;
pub mod hashing;
pub mod link;
pub mod registry;
pub mod value;

pub use error::EngineError;
pub use link::{Link, LinkKind, LinkSuffix, TargetSpelling};
pub use registry::{BoundArgs, FuncRegistry, FuncShape, NodeFunc, Param, ParamKind, Signature};
pub use value::{Opaque, Value};
