//! Per-run read tracking and the `$` view handed to cell code.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::script::{HostObject, Value};

use super::ReactiveContext;

#[derive(Default)]
struct TrackerState {
    /// Key → version observed at the first read.
    reads: FxHashMap<String, u64>,
    /// First-read order, for stable dependency listings.
    order: Vec<String>,
}

/// Records which context keys one evaluation read, and at which version.
///
/// Cheap to clone; clones share the record.
#[derive(Clone, Default)]
pub struct Tracker {
    state: Rc<RefCell<TrackerState>>,
    closed: Rc<Cell<bool>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read of `key` at `version`. Only the first read of a key
    /// counts; reads after [`close`](Self::close) are ignored.
    pub fn record(&self, key: &str, version: u64) {
        if self.closed.get() {
            return;
        }
        let mut state = self.state.borrow_mut();
        if !state.reads.contains_key(key) {
            state.reads.insert(key.to_string(), version);
            state.order.push(key.to_string());
        }
    }

    /// Stop recording. Closures that outlive the run (exported functions,
    /// for one) then read untracked.
    pub fn close(&self) {
        self.closed.set(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Recorded `(key, version)` pairs in first-read order.
    pub fn dependencies(&self) -> Vec<(String, u64)> {
        let state = self.state.borrow();
        state
            .order
            .iter()
            .map(|key| (key.clone(), state.reads[key]))
            .collect()
    }

    /// Keys read so far, in first-read order.
    pub fn keys(&self) -> Vec<String> {
        self.state.borrow().order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().order.is_empty()
    }
}

/// The `$` object: reads go through the run's [`Tracker`], writes are
/// staged and published together with the run's exports.
pub struct ContextView {
    context: ReactiveContext,
    tracker: Tracker,
    owner: Rc<str>,
    staged: RefCell<Vec<(String, Value)>>,
}

impl ContextView {
    pub fn new(context: ReactiveContext, tracker: Tracker, owner: impl Into<Rc<str>>) -> Self {
        Self {
            context,
            tracker,
            owner: owner.into(),
            staged: RefCell::new(Vec::new()),
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Take the writes cell code made through `$.key = value`.
    pub fn take_staged(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.staged.borrow_mut())
    }
}

impl HostObject for ContextView {
    fn name(&self) -> &str {
        "Context"
    }

    fn get(&self, key: &str) -> Value {
        if let Some((_, value)) = self.staged.borrow().iter().find(|(k, _)| k == key) {
            return value.clone();
        }
        self.context.read(key, &self.tracker, &self.owner)
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        if let Some(owner) = self.context.owner_of(key) {
            if *owner != *self.owner {
                tracing::warn!(
                    key,
                    owner = %owner,
                    writer = %self.owner,
                    "cell writes a context key owned by another model"
                );
            }
        }
        let mut staged = self.staged.borrow_mut();
        match staged.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => staged.push((key.to_string(), value)),
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = self.context.keys();
        for (key, _) in self.staged.borrow().iter() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_read_wins() {
        let tracker = Tracker::new();
        tracker.record("sum", 3);
        tracker.record("sum", 7);
        tracker.record("other", 0);
        assert_eq!(
            tracker.dependencies(),
            vec![("sum".to_string(), 3), ("other".to_string(), 0)]
        );
    }

    #[test]
    fn test_closed_tracker_ignores_reads() {
        let tracker = Tracker::new();
        tracker.close();
        tracker.record("sum", 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_view_records_reads_including_missing_keys() {
        let context = ReactiveContext::new();
        context.update("a.cell", vec![("sum".into(), Value::Number(10.0))]);
        let view = ContextView::new(context, Tracker::new(), "b.cell");
        assert_eq!(view.get("sum"), Value::Number(10.0));
        assert_eq!(view.get("missing"), Value::Undefined);
        assert_eq!(view.tracker().keys(), vec!["sum", "missing"]);
    }

    #[test]
    fn test_view_writes_are_staged() {
        let context = ReactiveContext::new();
        let view = ContextView::new(context.clone(), Tracker::new(), "a.cell");
        view.set("x", Value::Number(1.0)).unwrap();
        assert_eq!(view.get("x"), Value::Number(1.0));
        assert_eq!(context.get("x"), None);
        assert_eq!(view.take_staged(), vec![("x".to_string(), Value::Number(1.0))]);
    }
}
