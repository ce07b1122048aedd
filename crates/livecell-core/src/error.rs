//! Error types for livecell-core.

use thiserror::Error;

/// Result type for livecell-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in livecell-core.
///
/// Errors are cloneable because evaluation failures travel as values inside
/// [`OutputEvent`](crate::engine::OutputEvent) events, which may be observed by several
/// listeners.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A model was registered whose language the engine cannot execute.
    #[error("unsupported language '{language}' for model {path} (expected '{expected}')")]
    UnsupportedLanguage {
        path: String,
        language: String,
        expected: String,
    },

    /// A disposable was disposed a second time.
    #[error("{0} already disposed")]
    AlreadyDisposed(&'static str),

    /// Cell source failed to compile.
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Cell code threw while running.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// No resolver knows the requested module.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// The import resolver rejected.
    #[error("failed to import '{module}': {message}")]
    Import { module: String, message: String },

    /// Dependency-triggered re-runs kept cascading past the limit, so the
    /// cells read each other in a cycle.
    #[error("re-runs cascaded more than {0} times; cells depend on each other in a cycle")]
    Cycle(u32),

    /// A newer evaluation of the same model started while this one was in flight.
    #[error("evaluation superseded by a newer run")]
    Superseded,
}

impl Error {
    /// Shorthand for [`Error::Runtime`].
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    /// Whether this error came from compiling cell source.
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}
