//! Scope/node/flow inheritance resolution and the rewrite-view pipeline
//! built on top of `sluice-graph`'s link traversal.

pub mod conf_file;
pub mod flow;
pub mod node;
pub mod rewrite;
pub mod scope;
pub mod views;

pub use conf_file::ConfCache;
pub use flow::Flow;
pub use node::Node;
pub use scope::{RawNode, Scope};
