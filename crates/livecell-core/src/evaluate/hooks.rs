//! Global hooks registered by cell code.
//!
//! Cells may install named helpers through `hooks.register(name, value)`.
//! Every hook belongs to the run that registered it and is released when
//! the model runs again or goes away, whether or not the cell cleans up
//! after itself.

use std::cell::RefCell;
use std::rc::Rc;

use crate::script::Value;

/// A registered hook.
#[derive(Debug, Clone, PartialEq)]
pub struct Hook {
    pub name: String,
    pub value: Value,
    /// Path of the model that registered it.
    pub owner: String,
    /// Evaluation generation of the registering run.
    pub generation: u64,
}

/// Registry of hooks across all models of an engine. Cheap to clone.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Rc<RefCell<Vec<Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `name`. A later registration of the same name
    /// replaces the earlier one, whoever owned it.
    pub fn register(&self, owner: &str, generation: u64, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut hooks = self.hooks.borrow_mut();
        hooks.retain(|hook| hook.name != name);
        tracing::debug!(owner, generation, hook = %name, "hook registered");
        hooks.push(Hook {
            name,
            value,
            owner: owner.to_string(),
            generation,
        });
    }

    /// Release every hook owned by `owner`. Returns how many were released.
    pub fn release(&self, owner: &str) -> usize {
        let mut hooks = self.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|hook| hook.owner != owner);
        before - hooks.len()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.hooks
            .borrow()
            .iter()
            .find(|hook| hook.name == name)
            .map(|hook| hook.value.clone())
    }

    /// All hooks, in registration order.
    pub fn entries(&self) -> Vec<Hook> {
        self.hooks.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.hooks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_drops_only_owner_hooks() {
        let hooks = HookRegistry::new();
        hooks.register("a.cell", 1, "fmt", Value::from("a"));
        hooks.register("b.cell", 1, "plot", Value::from("b"));
        assert_eq!(hooks.release("a.cell"), 1);
        assert_eq!(hooks.get("fmt"), None);
        assert_eq!(hooks.get("plot"), Some(Value::from("b")));
    }

    #[test]
    fn test_same_name_replaces() {
        let hooks = HookRegistry::new();
        hooks.register("a.cell", 1, "fmt", Value::from("old"));
        hooks.register("b.cell", 2, "fmt", Value::from("new"));
        assert_eq!(hooks.len(), 1);
        let entry = &hooks.entries()[0];
        assert_eq!(entry.owner, "b.cell");
        assert_eq!(entry.generation, 2);
    }
}
