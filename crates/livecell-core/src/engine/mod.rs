//! The reactive engine: registry of models and owner of their evaluators.
//!
//! All engine work runs on the current thread. Registering models and
//! editing them spawns local tasks, so the engine must be driven from
//! inside a [`tokio::task::LocalSet`].

mod activity;
mod config;
mod debounce;
mod output;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::context::ReactiveContext;
use crate::error::{Error, Result};
use crate::evaluate::{CellEvaluator, HookRegistry, ImportResolver, ModuleRegistry, Runtime};
use crate::event::{Emitter, Event, Subscription};
use crate::model::{ModelProvider, ModelRef};
use crate::script::{CellCompiler, ScriptCompiler};

pub use activity::{Activity, ActivityGuard};
pub use config::EngineConfig;
pub use output::{ExecutionEvent, OutputEvent};

use debounce::Debouncer;

/// A registered model and everything the engine keeps for it.
struct Registration {
    model: ModelRef,
    evaluator: CellEvaluator,
    subscriptions: Vec<Subscription>,
    debouncer: Rc<Debouncer>,
}

impl Registration {
    fn release(self) -> Result<()> {
        for subscription in self.subscriptions {
            subscription.dispose();
        }
        self.debouncer.cancel();
        self.evaluator.dispose()
    }
}

struct Inner {
    config: EngineConfig,
    runtime: Runtime,
    outputs: Rc<Emitter<OutputEvent>>,
    before_execution: Rc<Emitter<ExecutionEvent>>,
    models: RefCell<FxHashMap<String, Registration>>,
    provider_subscriptions: RefCell<Vec<Subscription>>,
    disposed: Cell<bool>,
}

/// Registry of models, one [`CellEvaluator`] each, sharing one
/// [`ReactiveContext`].
///
/// Cheap to clone; clones share the engine.
#[derive(Clone)]
pub struct ReactiveEngine {
    inner: Rc<Inner>,
}

impl ReactiveEngine {
    /// Engine with the `cellscript` compiler and the built-in
    /// [`ModuleRegistry`] as resolver.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_resolver(config, Rc::new(ModuleRegistry::new()))
    }

    /// Engine with the `cellscript` compiler and a custom resolver.
    pub fn with_resolver(config: EngineConfig, resolver: Rc<dyn ImportResolver>) -> Self {
        let compiler = Rc::new(ScriptCompiler::new(config.max_loop_iterations));
        Self::with_parts(config, compiler, resolver)
    }

    /// Engine with a custom execution substrate. Models must declare
    /// `config.language`.
    pub fn with_parts(
        config: EngineConfig,
        compiler: Rc<dyn CellCompiler>,
        resolver: Rc<dyn ImportResolver>,
    ) -> Self {
        let outputs = Rc::new(Emitter::new());
        let before_execution = Rc::new(Emitter::new());
        let runtime = Runtime {
            context: ReactiveContext::new(),
            compiler,
            resolver,
            hooks: HookRegistry::new(),
            outputs: outputs.clone(),
            before_execution: before_execution.clone(),
            activity: Activity::new(),
            shutdown: Rc::new(Cell::new(false)),
            cascade: Rc::new(Cell::new(0)),
        };
        Self {
            inner: Rc::new(Inner {
                config,
                runtime,
                outputs,
                before_execution,
                models: RefCell::new(FxHashMap::default()),
                provider_subscriptions: RefCell::new(Vec::new()),
                disposed: Cell::new(false),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The shared `$` namespace.
    pub fn context(&self) -> &ReactiveContext {
        &self.inner.runtime.context
    }

    /// Hooks registered by cell code.
    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.runtime.hooks
    }

    /// One event per completed evaluation of any model.
    pub fn on_output(&self) -> Event<OutputEvent> {
        self.inner.outputs.event()
    }

    /// Fired right before a model's code runs.
    pub fn on_before_execution(&self) -> Event<ExecutionEvent> {
        self.inner.before_execution.event()
    }

    /// Paths of the registered models, sorted.
    pub fn model_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.models.borrow().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.inner.models.borrow().contains_key(path)
    }

    /// The evaluator of a registered model.
    pub fn evaluator(&self, path: &str) -> Option<CellEvaluator> {
        self.inner
            .models
            .borrow()
            .get(path)
            .map(|registration| registration.evaluator.clone())
    }

    /// Debounce timers and evaluations still in flight.
    pub fn pending(&self) -> usize {
        self.inner.runtime.activity.pending()
    }

    /// Wait until no debounce timer or evaluation is in flight.
    pub async fn idle(&self) {
        self.inner.runtime.activity.idle().await
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Register `model` and evaluate it right away.
    ///
    /// Registering an already registered path logs a warning and does
    /// nothing. A model in a language other than the configured one is an
    /// error.
    pub fn register_model(&self, model: ModelRef) -> Result<()> {
        if self.inner.disposed.get() {
            return Err(Error::AlreadyDisposed("engine"));
        }
        let path = model.path().to_string();
        if model.language() != self.inner.config.language {
            return Err(Error::UnsupportedLanguage {
                path,
                language: model.language().to_string(),
                expected: self.inner.config.language.clone(),
            });
        }
        if self.is_registered(&path) {
            tracing::warn!(model = %path, "model is already registered");
            return Ok(());
        }

        let evaluator = CellEvaluator::new(model.clone(), self.inner.runtime.clone());
        let debouncer = Rc::new(Debouncer::new(
            self.inner.config.debounce,
            self.inner.runtime.activity.clone(),
        ));

        let weak = Rc::downgrade(&self.inner);
        let changed_path = path.clone();
        let on_change = model.on_did_change_content().subscribe(move |_| {
            if let Some(engine) = upgrade(&weak) {
                engine.content_changed(&changed_path);
            }
        });
        let weak = Rc::downgrade(&self.inner);
        let disposed_path = path.clone();
        let on_dispose = model.on_will_dispose().subscribe(move |_| {
            if let Some(engine) = upgrade(&weak) {
                engine.model_disposed(&disposed_path);
            }
        });

        self.inner.models.borrow_mut().insert(
            path.clone(),
            Registration {
                model: model.clone(),
                evaluator: evaluator.clone(),
                subscriptions: vec![on_change, on_dispose],
                debouncer,
            },
        );
        tracing::debug!(model = %path, "model registered");

        let guard = self.inner.runtime.activity.begin();
        let source = model.value();
        tokio::task::spawn_local(async move {
            let _guard = guard;
            evaluator.evaluate(source).await;
        });
        Ok(())
    }

    /// Register every model `provider` knows now, and every model it
    /// creates later.
    ///
    /// All current models are attempted; the first failure is returned.
    /// Failures for later models are logged.
    pub fn register_model_provider(&self, provider: &dyn ModelProvider) -> Result<()> {
        if self.inner.disposed.get() {
            return Err(Error::AlreadyDisposed("engine"));
        }
        let weak = Rc::downgrade(&self.inner);
        let subscription = provider.on_did_create_model().subscribe(move |model: &ModelRef| {
            if let Some(engine) = upgrade(&weak) {
                if let Err(error) = engine.register_model(model.clone()) {
                    tracing::error!(model = model.path(), %error, "failed to register model");
                }
            }
        });
        self.inner
            .provider_subscriptions
            .borrow_mut()
            .push(subscription);

        let mut first_error = None;
        for model in provider.models() {
            if let Err(error) = self.register_model(model) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Debounced re-evaluation after a text change. The text is read when
    /// the timer fires, and a run only starts if it differs from the last
    /// evaluated text.
    fn content_changed(&self, path: &str) {
        let (model, evaluator, debouncer) = {
            let models = self.inner.models.borrow();
            let Some(registration) = models.get(path) else {
                return;
            };
            (
                registration.model.clone(),
                registration.evaluator.clone(),
                registration.debouncer.clone(),
            )
        };
        if evaluator.last_source().as_deref() == Some(model.value().as_str()) {
            debouncer.cancel();
            return;
        }
        debouncer.schedule(async move {
            let source = model.value();
            if evaluator.last_source().as_deref() == Some(source.as_str()) {
                return;
            }
            evaluator.evaluate(source).await;
        });
    }

    fn model_disposed(&self, path: &str) {
        let registration = self.inner.models.borrow_mut().remove(path);
        if let Some(registration) = registration {
            tracing::debug!(model = %path, "model disposed; unregistering");
            if let Err(error) = registration.release() {
                tracing::warn!(model = %path, %error, "failed to release model");
            }
        }
    }

    /// Dispose every evaluator. Models are left alone. A second call fails.
    pub fn dispose(&self) -> Result<()> {
        if self.inner.disposed.replace(true) {
            return Err(Error::AlreadyDisposed("engine"));
        }
        self.inner.runtime.shutdown.set(true);
        for subscription in self.inner.provider_subscriptions.borrow_mut().drain(..) {
            subscription.dispose();
        }
        let registrations: Vec<(String, Registration)> =
            self.inner.models.borrow_mut().drain().collect();
        let count = registrations.len();
        for (path, registration) in registrations {
            if let Err(error) = registration.release() {
                tracing::warn!(model = %path, %error, "failed to release model");
            }
        }
        tracing::debug!(models = count, "engine disposed");
        Ok(())
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<ReactiveEngine> {
    weak.upgrade().map(|inner| ReactiveEngine { inner })
}

impl std::fmt::Debug for ReactiveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveEngine")
            .field("config", &self.inner.config)
            .field("models", &self.model_paths())
            .field("output_listeners", &self.inner.outputs.listener_count())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
