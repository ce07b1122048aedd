//! Per-model, dependency-tracked evaluation.
//!
//! Each run:
//!
//! 1. bumps the generation, drops the previous reaction and releases the
//!    previous run's imports and hooks
//! 2. fires before-execution
//! 3. compiles and runs the source with `$` reading through a fresh
//!    [`Tracker`]
//! 4. on success publishes the exports to the context in one update; on
//!    failure leaves the context alone
//! 5. emits the output and arms a reaction on the keys the run read
//!
//! A run whose generation is no longer current when it finishes publishes
//! nothing.
//!
//! Every run carries the length of the re-run chain that led to it: 0 for
//! runs started by registration or an edit, one more than the publishing
//! run for dependency-triggered re-runs. Chains longer than
//! [`MAX_CASCADE_DEPTH`] only happen when cells read each other in a cycle;
//! the re-run is dropped and an [`Error::Cycle`] output is published
//! instead.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::Instrument;

use crate::context::{ContextView, ReactiveContext, Reaction, Tracker};
use crate::engine::{Activity, ExecutionEvent, OutputEvent};
use crate::error::{Error, Result};
use crate::event::Emitter;
use crate::model::{ModelRef, export_key};
use crate::script::{Bindings, CellCompiler, Promise, Value};

use super::hooks::HookRegistry;
use super::imports::{ImportResolver, ImportScope};

/// Longest chain of dependency-triggered re-runs started by one change.
pub const MAX_CASCADE_DEPTH: u32 = 128;

/// Collaborators shared by every evaluator of one engine.
#[derive(Clone)]
pub(crate) struct Runtime {
    pub context: ReactiveContext,
    pub compiler: Rc<dyn CellCompiler>,
    pub resolver: Rc<dyn ImportResolver>,
    pub hooks: HookRegistry,
    pub outputs: Rc<Emitter<OutputEvent>>,
    pub before_execution: Rc<Emitter<ExecutionEvent>>,
    pub activity: Activity,
    /// Set when the engine shuts down; reactions stop scheduling runs.
    pub shutdown: Rc<Cell<bool>>,
    /// Chain length of the run whose publish is firing reactions right now.
    pub cascade: Rc<Cell<u32>>,
}

#[derive(Default)]
struct RunState {
    /// Source of the most recent run.
    source: Option<String>,
    reaction: Option<Reaction>,
    imports: Option<ImportScope>,
    /// Keys the last completed run read.
    dependencies: Vec<String>,
    disposed: bool,
}

struct Inner {
    model: ModelRef,
    owner: Rc<str>,
    export_key: String,
    runtime: Runtime,
    generation: Rc<Cell<u64>>,
    state: RefCell<RunState>,
}

/// Evaluates one model. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CellEvaluator {
    inner: Rc<Inner>,
}

impl CellEvaluator {
    pub(crate) fn new(model: ModelRef, runtime: Runtime) -> Self {
        let owner: Rc<str> = Rc::from(model.path());
        Self {
            inner: Rc::new(Inner {
                export_key: export_key(model.path()),
                owner,
                model,
                runtime,
                generation: Rc::new(Cell::new(0)),
                state: RefCell::new(RunState::default()),
            }),
        }
    }

    pub fn model(&self) -> &ModelRef {
        &self.inner.model
    }

    /// Generation of the most recently started run; 0 before the first.
    pub fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    /// Source text of the most recently started run.
    pub fn last_source(&self) -> Option<String> {
        self.inner.state.borrow().source.clone()
    }

    /// Context keys the last completed run read.
    pub fn dependencies(&self) -> Vec<String> {
        self.inner.state.borrow().dependencies.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.is_disposed() && self.inner.generation.get() == generation
    }

    /// Run `source` and publish the result. Does nothing once disposed.
    pub async fn evaluate(&self, source: String) {
        self.evaluate_at(source, 0).await
    }

    async fn evaluate_at(&self, source: String, cascade: u32) {
        let Some((generation, scope)) = self.begin(&source) else {
            return;
        };
        let inner = &self.inner;
        let path = inner.owner.clone();

        let released = inner.runtime.hooks.release(&path);
        if released > 0 {
            tracing::debug!(model = %path, released, "released hooks of previous run");
        }
        inner.runtime.before_execution.fire(&ExecutionEvent {
            model: inner.model.clone(),
            generation,
        });

        let tracker = Tracker::new();
        let span = tracing::debug_span!("evaluate", model = %path, generation);
        let result = self
            .run(&source, generation, &scope, &tracker)
            .instrument(span)
            .await;
        tracker.close();

        if !self.is_current(generation) {
            tracing::debug!(model = %path, generation, "discarding superseded run");
            return;
        }

        let output = match result {
            Ok((exports, entries)) => {
                let previous = inner.runtime.cascade.replace(cascade);
                inner.runtime.context.update(&path, entries);
                inner.runtime.cascade.set(previous);
                Ok(exports)
            }
            Err(error) => {
                tracing::debug!(model = %path, generation, %error, "evaluation failed");
                Err(error)
            }
        };
        tracing::debug!(
            model = %path,
            generation,
            ok = output.is_ok(),
            dependencies = ?tracker.keys(),
            "evaluation finished"
        );
        inner.runtime.outputs.fire(&OutputEvent {
            model: inner.model.clone(),
            generation,
            output,
        });

        // An output listener may have disposed the model or started a new run.
        if !self.is_current(generation) {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        let previous = inner.runtime.cascade.replace(cascade);
        let reaction = inner.runtime.context.react(&tracker, move || {
            rerun(&weak);
        });
        inner.runtime.cascade.set(previous);
        let mut state = inner.state.borrow_mut();
        state.dependencies = tracker.keys();
        state.reaction = Some(reaction);
    }

    /// Start a new generation. Returns `None` once disposed.
    fn begin(&self, source: &str) -> Option<(u64, ImportScope)> {
        let scope = ImportScope::new();
        let (generation, reaction, previous) = {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return None;
            }
            let generation = self.inner.generation.get() + 1;
            self.inner.generation.set(generation);
            state.source = Some(source.to_string());
            (
                generation,
                state.reaction.take(),
                state.imports.replace(scope.clone()),
            )
        };
        tracing::debug!(model = %self.inner.owner, generation, "evaluation started");
        if let Some(reaction) = reaction {
            reaction.dispose();
        }
        if let Some(previous) = previous {
            previous.release();
        }
        Some((generation, scope))
    }

    async fn run(
        &self,
        source: &str,
        generation: u64,
        scope: &ImportScope,
        tracker: &Tracker,
    ) -> Result<(Value, Vec<(String, Value)>)> {
        let inner = &self.inner;
        let body = inner.runtime.compiler.compile(source)?;
        let view = Rc::new(ContextView::new(
            inner.runtime.context.clone(),
            tracker.clone(),
            inner.owner.clone(),
        ));
        let exports = Value::object();
        body.run(Bindings {
            model: inner.owner.to_string(),
            context: Value::Host(view.clone()),
            exports: exports.clone(),
            require: self.require_function(scope),
            hooks: self.hooks_object(generation),
        })
        .await?;

        let mut entries = Vec::new();
        let mut default = None;
        for key in exports.keys() {
            let value = exports.get(&key);
            if key == "default" {
                default = Some(value);
            } else {
                entries.push((key, value));
            }
        }
        if let Some(value) = default {
            entries.retain(|(key, _)| *key != inner.export_key);
            entries.push((inner.export_key.clone(), value));
        }
        for (key, value) in view.take_staged() {
            entries.retain(|(existing, _)| *existing != key);
            entries.push((key, value));
        }
        Ok((exports, entries))
    }

    /// `require(name)`: resolve through the engine's resolver; the import
    /// is owned by this run's scope.
    fn require_function(&self, scope: &ImportScope) -> Value {
        let resolver = self.inner.runtime.resolver.clone();
        let model = self.inner.model.clone();
        let scope = scope.clone();
        Value::native("require", move |args| {
            let name = match args.first() {
                Some(Value::String(name)) => name.to_string(),
                other => {
                    return Err(Error::runtime(format!(
                        "require expects a module name, got {}",
                        other.cloned().unwrap_or_default()
                    )));
                }
            };
            if scope.is_released() {
                return Err(Error::Superseded);
            }
            let pending = resolver.resolve(&name, &model);
            let scope = scope.clone();
            Ok(Value::Promise(Rc::new(Promise::new(Box::pin(async move {
                let import = pending.await.map_err(|error| match error {
                    Error::ModuleNotFound(_) | Error::Import { .. } | Error::Superseded => error,
                    other => Error::Import {
                        module: name.clone(),
                        message: other.to_string(),
                    },
                })?;
                scope.adopt(import)
            })))))
        })
    }

    /// The `hooks` object: registrations are tagged with this run and
    /// refused once the run is superseded.
    fn hooks_object(&self, generation: u64) -> Value {
        let registry = self.inner.runtime.hooks.clone();
        let owner = self.inner.owner.clone();
        let current = self.inner.generation.clone();
        let register = Value::native("register", move |args| {
            if current.get() != generation {
                return Err(Error::Superseded);
            }
            let Some(Value::String(name)) = args.first() else {
                return Err(Error::runtime("hooks.register expects a name"));
            };
            registry.register(
                &owner,
                generation,
                name.to_string(),
                args.get(1).cloned().unwrap_or_default(),
            );
            Ok(Value::Undefined)
        });
        let registry = self.inner.runtime.hooks.clone();
        let get = Value::native("get", move |args| {
            let name = args.first().map(Value::to_display_string).unwrap_or_default();
            Ok(registry.get(&name).unwrap_or_default())
        });
        Value::object_from([("register", register), ("get", get)])
    }

    /// Re-run the last source in a new task.
    fn schedule_rerun(&self) {
        if self.inner.runtime.shutdown.get() || self.is_disposed() {
            return;
        }
        let Some(source) = self.last_source() else {
            return;
        };
        let cascade = self.inner.runtime.cascade.get() + 1;
        if cascade > MAX_CASCADE_DEPTH {
            tracing::warn!(
                model = %self.inner.owner,
                cascade,
                "re-runs keep cascading; stopping dependency cycle"
            );
            self.inner.runtime.outputs.fire(&OutputEvent {
                model: self.inner.model.clone(),
                generation: self.generation(),
                output: Err(Error::Cycle(MAX_CASCADE_DEPTH)),
            });
            return;
        }
        tracing::debug!(model = %self.inner.owner, cascade, "dependency changed; scheduling re-run");
        let guard = self.inner.runtime.activity.begin();
        let evaluator = self.clone();
        tokio::task::spawn_local(async move {
            let _guard = guard;
            evaluator.evaluate_at(source, cascade).await;
        });
    }

    /// Release everything the evaluator holds and remove its exports from
    /// the context. A second call fails.
    pub fn dispose(&self) -> Result<()> {
        let (reaction, imports) = {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return Err(Error::AlreadyDisposed("evaluator"));
            }
            state.disposed = true;
            state.dependencies.clear();
            (state.reaction.take(), state.imports.take())
        };
        self.inner.generation.set(self.inner.generation.get() + 1);
        if let Some(reaction) = reaction {
            reaction.dispose();
        }
        let released = imports.map_or(0, |scope| scope.release());
        self.inner.runtime.hooks.release(&self.inner.owner);
        self.inner.runtime.context.remove_owner(&self.inner.owner);
        tracing::debug!(model = %self.inner.owner, released, "evaluator disposed");
        Ok(())
    }
}

fn rerun(weak: &Weak<Inner>) {
    if let Some(inner) = weak.upgrade() {
        CellEvaluator { inner }.schedule_rerun();
    }
}

impl std::fmt::Debug for CellEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellEvaluator")
            .field("model", &self.inner.owner)
            .field("generation", &self.generation())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::imports::{ModuleRegistry, ResolvedImport};
    use crate::model::TextModel;
    use crate::script::ScriptCompiler;
    use futures::future::LocalBoxFuture;

    fn runtime(resolver: Rc<dyn ImportResolver>) -> Runtime {
        Runtime {
            context: ReactiveContext::new(),
            compiler: Rc::new(ScriptCompiler::new(10_000)),
            resolver,
            hooks: HookRegistry::new(),
            outputs: Rc::new(Emitter::new()),
            before_execution: Rc::new(Emitter::new()),
            activity: Activity::new(),
            shutdown: Rc::new(Cell::new(false)),
            cascade: Rc::new(Cell::new(0)),
        }
    }

    fn evaluator(path: &str, source: &str, runtime: &Runtime) -> CellEvaluator {
        let model: ModelRef = Rc::new(TextModel::new(path, "cellscript", source));
        CellEvaluator::new(model, runtime.clone())
    }

    fn collect(runtime: &Runtime) -> Rc<RefCell<Vec<OutputEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _ = runtime
            .outputs
            .event()
            .subscribe(move |event: &OutputEvent| s.borrow_mut().push(event.clone()));
        seen
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_default_export_is_keyed_by_file_stem() {
        let runtime = runtime(Rc::new(ModuleRegistry::new()));
        let seen = collect(&runtime);
        let cell = evaluator("cells/total.cell", "exports.sum = 3; exports.default = 7;", &runtime);
        cell.evaluate(cell.model().value()).await;

        assert_eq!(runtime.context.get("total"), Some(Value::Number(7.0)));
        assert_eq!(runtime.context.get("sum"), Some(Value::Number(3.0)));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        let exports = seen[0].output.as_ref().unwrap();
        assert_eq!(exports.get("default"), Value::Number(7.0));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_error_keeps_previous_exports() {
        let runtime = runtime(Rc::new(ModuleRegistry::new()));
        let seen = collect(&runtime);
        let cell = evaluator("a.cell", "", &runtime);
        cell.evaluate("exports.x = 1;".into()).await;
        cell.evaluate("exports.x = ;".into()).await;

        assert_eq!(runtime.context.get("x"), Some(Value::Number(1.0)));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[1].output, Err(e) if e.is_compile_error()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_hooks_are_released_between_runs() {
        let runtime = runtime(Rc::new(ModuleRegistry::new()));
        let cell = evaluator("a.cell", "", &runtime);
        cell.evaluate("hooks.register('fmt', 1);".into()).await;
        assert_eq!(runtime.hooks.get("fmt"), Some(Value::Number(1.0)));

        cell.evaluate("exports.x = 1;".into()).await;
        assert_eq!(runtime.hooks.get("fmt"), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_before_execution_fires_after_hook_release() {
        let runtime = runtime(Rc::new(ModuleRegistry::new()));
        let hooks = runtime.hooks.clone();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let o = observed.clone();
        let _sub = runtime.before_execution.event().subscribe(move |event: &ExecutionEvent| {
            o.borrow_mut().push((event.generation, hooks.len()));
        });
        let cell = evaluator("a.cell", "", &runtime);
        cell.evaluate("hooks.register('h', 1);".into()).await;
        cell.evaluate("hooks.register('h', 2);".into()).await;
        assert_eq!(*observed.borrow(), vec![(1, 0), (2, 0)]);
    }

    struct CountingResolver {
        disposed: Rc<Cell<usize>>,
    }

    impl ImportResolver for CountingResolver {
        fn resolve(&self, module: &str, _model: &ModelRef) -> LocalBoxFuture<'static, Result<ResolvedImport>> {
            let disposed = self.disposed.clone();
            let name = module.to_string();
            Box::pin(async move {
                Ok(ResolvedImport::new(name, Value::object(), move || {
                    disposed.set(disposed.get() + 1)
                }))
            })
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_imports_released_on_rerun_and_dispose() {
        let disposed = Rc::new(Cell::new(0));
        let runtime = runtime(Rc::new(CountingResolver {
            disposed: disposed.clone(),
        }));
        let cell = evaluator("a.cell", "", &runtime);
        cell.evaluate("import lib from 'lib';".into()).await;
        assert_eq!(disposed.get(), 0);
        cell.evaluate("import lib from 'lib';".into()).await;
        assert_eq!(disposed.get(), 1);
        cell.dispose().unwrap();
        assert_eq!(disposed.get(), 2);
        assert_eq!(cell.dispose(), Err(Error::AlreadyDisposed("evaluator")));
        assert_eq!(disposed.get(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_dispose_removes_exports() {
        let runtime = runtime(Rc::new(ModuleRegistry::new()));
        let cell = evaluator("a.cell", "", &runtime);
        cell.evaluate("exports.x = 1; exports.default = 2;".into()).await;
        assert_eq!(runtime.context.len(), 2);
        cell.dispose().unwrap();
        assert!(runtime.context.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_context_writes_are_published_with_exports() {
        let runtime = runtime(Rc::new(ModuleRegistry::new()));
        let cell = evaluator("a.cell", "", &runtime);
        cell.evaluate("$.shared = 5; exports.y = $.shared + 1;".into()).await;
        assert_eq!(runtime.context.get("shared"), Some(Value::Number(5.0)));
        assert_eq!(runtime.context.get("y"), Some(Value::Number(6.0)));
        assert!(cell.dependencies().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_missing_module_is_error_output() {
        let runtime = runtime(Rc::new(ModuleRegistry::new()));
        let seen = collect(&runtime);
        let cell = evaluator("a.cell", "", &runtime);
        cell.evaluate("import x from 'nowhere';".into()).await;
        let seen = seen.borrow();
        assert!(matches!(&seen[0].output, Err(Error::ModuleNotFound(name)) if name == "nowhere"));
    }

    #[test]
    fn test_require_after_release_does_not_resolve() {
        let runtime = runtime(Rc::new(ModuleRegistry::new()));
        let cell = evaluator("a.cell", "", &runtime);
        let scope = ImportScope::new();
        scope.release();
        let Value::Native(require) = cell.require_function(&scope) else {
            panic!("require should be a native function");
        };
        assert_eq!(require.call(&[Value::from("livecell")]).err(), Some(Error::Superseded));
    }
}
