//! Dependency-tracked evaluation of single models.
//!
//! - [`CellEvaluator`]: runs one model and re-runs it when what it read changes
//! - [`imports`]: the `require` protocol and the built-in module registry
//! - [`hooks`]: global registrations cell code makes, scoped to a run

pub mod evaluator;
pub mod hooks;
pub mod imports;

pub use evaluator::{CellEvaluator, MAX_CASCADE_DEPTH};
pub(crate) use evaluator::Runtime;
pub use hooks::{Hook, HookRegistry};
pub use imports::{ImportResolver, ImportScope, ModuleRegistry, ResolvedImport};
