//! Livecell Core - reactive cell execution engine.
//!
//! A notebook is a set of cells whose exports land in one shared namespace,
//! `$`. Cells are re-run automatically when a value they read from `$`
//! changes; nobody declares a dependency graph.
//!
//! # Modules
//!
//! - [`engine`]: model registry, debouncing and the output stream
//! - [`evaluate`]: dependency-tracked evaluation of a single model, imports
//!   and hooks
//! - [`context`]: the observable namespace and its read tracking
//! - [`script`]: the `cellscript` execution substrate
//! - [`model`]: the code model contract and in-memory models
//! - [`event`]: listener/emitter plumbing
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use livecell_core::{EngineConfig, ReactiveEngine, TextModel};
//!
//! # async fn demo() -> livecell_core::Result<()> {
//! let engine = ReactiveEngine::new(EngineConfig::default());
//! let _sub = engine.on_output().subscribe(|event| {
//!     println!("{}: {:?}", event.path(), event.output);
//! });
//! engine.register_model(Rc::new(TextModel::new("sum.cell", "cellscript", "export const sum = 4 + 6;")))?;
//! engine.register_model(Rc::new(TextModel::new("half.cell", "cellscript", "exports.default = $.sum / 2;")))?;
//! engine.idle().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod event;
pub mod model;
pub mod script;

pub use context::{ContextView, ReactiveContext, Reaction, Tracker};
pub use engine::{EngineConfig, ExecutionEvent, OutputEvent, ReactiveEngine};
pub use error::{Error, Result};
pub use evaluate::{
    CellEvaluator, Hook, HookRegistry, ImportResolver, ImportScope, ModuleRegistry, ResolvedImport,
};
pub use event::{Emitter, Event, Subscription};
pub use model::{CodeModel, ModelProvider, ModelRef, ModelStore, TextModel, export_key};
pub use script::{Bindings, CellCompiler, ModuleBody, ScriptCompiler, Value};
