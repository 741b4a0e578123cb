//! The `sluice` binary crate's library half: ambient plumbing shared by the
//! CLI (settings resolution, the builtin function registry, and the
//! top-level [`driver::Driver`] that ties config loading to execution). The
//! actual dataflow engine lives in the `sluice-*` workspace crates this
//! depends on; this crate is the part of the system that only makes sense
//! as an executable.

pub mod builtins;
pub mod driver;
pub mod settings;

pub use driver::Driver;
