use thiserror::Error;

/// The error taxonomy surfaced across crate boundaries.
///
/// Library code raises one of these directly; application code (the
/// executor, the driver, the CLI) wraps them in [`anyhow::Context`] to add
/// call-site detail, matching the breadcrumb style used throughout this
/// workspace (`<file>#<scope>.<node>`).
#[derive(Error, Debug)]
pub enum EngineError {
    /// A link or base reference named a node that could not be located.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A link or base reference named a scope that could not be located.
    #[error("scope not found: {0}")]
    ScopeNotFound(String),

    /// A cycle was detected while resolving a `@base` chain or link graph.
    #[error("Loop detected: {trail}")]
    Recursion {
        /// The human readable trail, e.g. `[test.a] @ test.b @ [test.a]`.
        trail: String,
    },

    /// Argument binding failed: missing required parameters, a non-callable
    /// target, or a malformed variadic value.
    #[error("{0}")]
    Argument(String),

    /// A string carried a live link sigil (`@`/`&`) but failed the
    /// target/suffix grammar, e.g. a bare `@` or `@:expr` with an empty
    /// target.
    #[error("{0:?} is invalid")]
    InvalidLink(String),

    /// Any other failure, preserved with its chain via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Wraps a lower-level cause as a generic `FlowError`-equivalent.
    pub fn call_failed(breadcrumb: impl std::fmt::Display, cause: anyhow::Error) -> anyhow::Error {
        cause.context(format!("call failed: {breadcrumb}"))
    }
}
