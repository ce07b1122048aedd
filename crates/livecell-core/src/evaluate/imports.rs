//! Import resolution.
//!
//! `require(name)` in cell code goes to an [`ImportResolver`], which hands
//! back a [`ResolvedImport`]: the module value plus a disposer. The
//! evaluator keeps every import of a run in that run's [`ImportScope`] and
//! releases the scope when the run is superseded or the model goes away.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::model::ModelRef;
use crate::script::Value;

/// Resolves module names for cell code.
pub trait ImportResolver {
    /// Resolve `module` on behalf of `model`. Every call must return a fresh
    /// [`ResolvedImport`]; the caller disposes it exactly once.
    fn resolve(&self, module: &str, model: &ModelRef) -> LocalBoxFuture<'static, Result<ResolvedImport>>;
}

/// A resolved module and the means to release it.
pub struct ResolvedImport {
    name: String,
    module: Value,
    disposer: Option<Box<dyn FnOnce()>>,
}

impl ResolvedImport {
    pub fn new(name: impl Into<String>, module: Value, disposer: impl FnOnce() + 'static) -> Self {
        Self {
            name: name.into(),
            module,
            disposer: Some(Box::new(disposer)),
        }
    }

    /// An import with nothing to release.
    pub fn plain(name: impl Into<String>, module: Value) -> Self {
        Self {
            name: name.into(),
            module,
            disposer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Value {
        &self.module
    }

    /// Release the import. Consuming `self` makes a second release
    /// impossible.
    pub fn dispose(mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl fmt::Debug for ResolvedImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedImport")
            .field("name", &self.name)
            .field("module", &self.module)
            .finish()
    }
}

#[derive(Default)]
struct ScopeState {
    held: Vec<ResolvedImport>,
    released: bool,
}

/// The imports one evaluation run holds. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ImportScope {
    state: Rc<RefCell<ScopeState>>,
}

impl ImportScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `import` and return its module value.
    ///
    /// If the scope was already released (its run was superseded), the
    /// import is disposed on the spot and [`Error::Superseded`] returned.
    pub fn adopt(&self, import: ResolvedImport) -> Result<Value> {
        let mut state = self.state.borrow_mut();
        if state.released {
            drop(state);
            tracing::debug!(module = import.name(), "disposing import of a superseded run");
            import.dispose();
            return Err(Error::Superseded);
        }
        let module = import.module().clone();
        state.held.push(import);
        Ok(module)
    }

    /// Dispose everything held. Later adoptions dispose immediately.
    /// Returns how many imports were released.
    pub fn release(&self) -> usize {
        let held = {
            let mut state = self.state.borrow_mut();
            state.released = true;
            std::mem::take(&mut state.held)
        };
        let count = held.len();
        for import in held {
            import.dispose();
        }
        count
    }

    pub fn is_released(&self) -> bool {
        self.state.borrow().released
    }

    /// Names of the imports currently held.
    pub fn names(&self) -> Vec<String> {
        self.state
            .borrow()
            .held
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }
}

/// Built-in module name.
pub const BUILTIN_MODULE: &str = "livecell";

/// An [`ImportResolver`] over a fixed table of modules: the built-in
/// `livecell` library plus whatever plugins the host registers.
#[derive(Clone)]
pub struct ModuleRegistry {
    modules: Rc<RefCell<FxHashMap<String, Value>>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// A registry holding the built-in modules.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(BUILTIN_MODULE, builtin_library());
        registry
    }

    /// A registry with no modules at all.
    pub fn empty() -> Self {
        Self {
            modules: Rc::new(RefCell::new(FxHashMap::default())),
        }
    }

    /// Make `module` importable as `name`, replacing any previous module.
    pub fn register(&self, name: impl Into<String>, module: Value) {
        self.modules.borrow_mut().insert(name.into(), module);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.modules.borrow_mut().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.borrow().contains_key(name)
    }

    /// Registered module names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ImportResolver for ModuleRegistry {
    fn resolve(&self, module: &str, model: &ModelRef) -> LocalBoxFuture<'static, Result<ResolvedImport>> {
        let found = self.modules.borrow().get(module).cloned();
        let name = module.to_string();
        tracing::debug!(module = %name, model = model.path(), "resolving import");
        Box::pin(async move {
            match found {
                Some(value) => Ok(ResolvedImport::plain(name, value)),
                None => Err(Error::ModuleNotFound(name)),
            }
        })
    }
}

fn builtin_library() -> Value {
    Value::object_from([
        ("version", Value::from(env!("CARGO_PKG_VERSION"))),
        (
            "range",
            Value::native("range", |args| {
                let start = args.first().map(Value::to_number).unwrap_or(0.0);
                let end = args.get(1).map(Value::to_number);
                let (start, end) = match end {
                    Some(end) => (start, end),
                    None => (0.0, start),
                };
                if !start.is_finite() || !end.is_finite() || end - start > 1e6 {
                    return Err(Error::runtime("range: invalid bounds"));
                }
                let mut items = Vec::new();
                let mut n = start;
                while n < end {
                    items.push(Value::Number(n));
                    n += 1.0;
                }
                Ok(Value::array(items))
            }),
        ),
        (
            "sum",
            Value::native("sum", |args| match args.first() {
                Some(Value::Array(items)) => Ok(Value::Number(
                    items.borrow().iter().map(Value::to_number).sum(),
                )),
                _ => Err(Error::runtime("sum: expected an array")),
            }),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TextModel;
    use std::cell::Cell;

    fn counted(name: &str, count: &Rc<Cell<usize>>) -> ResolvedImport {
        let c = count.clone();
        ResolvedImport::new(name, Value::Null, move || c.set(c.get() + 1))
    }

    #[test]
    fn test_scope_releases_each_import_once() {
        let count = Rc::new(Cell::new(0));
        let scope = ImportScope::new();
        scope.adopt(counted("a", &count)).unwrap();
        scope.adopt(counted("b", &count)).unwrap();
        assert_eq!(scope.names(), vec!["a", "b"]);
        assert_eq!(scope.release(), 2);
        assert_eq!(scope.release(), 0);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_adopting_into_released_scope_disposes() {
        let count = Rc::new(Cell::new(0));
        let scope = ImportScope::new();
        assert!(!scope.is_released());
        scope.release();
        assert!(scope.is_released());
        assert_eq!(scope.adopt(counted("late", &count)), Err(Error::Superseded));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_registry_resolves_builtin_and_plugins() {
        let registry = ModuleRegistry::new();
        registry.register("plugin", Value::from("hello"));
        let model: ModelRef = Rc::new(TextModel::new("a.cell", "cellscript", ""));

        let builtin = futures::executor::block_on(registry.resolve("livecell", &model)).unwrap();
        assert_eq!(builtin.module().get("version"), Value::from(env!("CARGO_PKG_VERSION")));

        let plugin = futures::executor::block_on(registry.resolve("plugin", &model)).unwrap();
        assert_eq!(plugin.module(), &Value::from("hello"));

        let missing = futures::executor::block_on(registry.resolve("nope", &model));
        assert!(matches!(missing, Err(Error::ModuleNotFound(name)) if name == "nope"));
    }

    #[test]
    fn test_unregistered_plugin_is_not_found() {
        let registry = ModuleRegistry::new();
        registry.register("plugin", Value::from("hello"));
        assert!(registry.unregister("plugin"));
        assert!(!registry.unregister("plugin"));
        assert!(!registry.contains("plugin"));
        assert!(registry.contains(BUILTIN_MODULE));

        let model: ModelRef = Rc::new(TextModel::new("a.cell", "cellscript", ""));
        let missing = futures::executor::block_on(registry.resolve("plugin", &model));
        assert!(matches!(missing, Err(Error::ModuleNotFound(name)) if name == "plugin"));
    }
}
