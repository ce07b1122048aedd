//! The reactive context: the shared `$` namespace of one engine.
//!
//! Every entry carries the model that wrote it and a version. Evaluations
//! read through a [`ContextView`], which records `(key, version)` pairs in a
//! [`Tracker`]; [`ReactiveContext::react`] then arms a [`Reaction`] on
//! exactly those keys. Invalidation is per key: a reaction fires only when a
//! key it read actually changed value.

mod reaction;
mod tracking;

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::script::Value;

pub use reaction::{Reaction, ReactionId};
pub use tracking::{ContextView, Tracker};

use reaction::Armed;

struct Entry {
    value: Value,
    owner: Rc<str>,
}

#[derive(Default)]
struct State {
    entries: FxHashMap<String, Entry>,
    /// Versions outlive entries so that a read of a missing key is
    /// invalidated when the key appears.
    versions: FxHashMap<String, u64>,
    clock: u64,
    reactions: FxHashMap<ReactionId, Armed>,
    watchers: FxHashMap<String, FxHashSet<ReactionId>>,
    next_reaction: ReactionId,
}

impl State {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
    }

    fn disarm(&mut self, id: ReactionId) -> bool {
        let Some(armed) = self.reactions.remove(&id) else {
            return false;
        };
        for key in &armed.keys {
            if let Some(watchers) = self.watchers.get_mut(key) {
                watchers.remove(&id);
                if watchers.is_empty() {
                    self.watchers.remove(key);
                }
            }
        }
        true
    }

    /// Disarm every reaction watching one of `keys` and return their
    /// callbacks in arming order.
    fn take_triggered(&mut self, keys: &[String]) -> Vec<Rc<dyn Fn()>> {
        let mut ids: Vec<ReactionId> = keys
            .iter()
            .filter_map(|key| self.watchers.get(key))
            .flatten()
            .copied()
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| {
                let callback = self.reactions.get(&id).map(|armed| armed.callback.clone());
                self.disarm(id);
                callback
            })
            .collect()
    }
}

/// Shared, observable key/value namespace. Cheap to clone; clones share
/// state.
#[derive(Clone, Default)]
pub struct ReactiveContext {
    state: Rc<RefCell<State>>,
}

impl ReactiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Untracked read of the current value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.borrow().entries.get(key).map(|e| e.value.clone())
    }

    /// Tracked read on behalf of `reader`.
    ///
    /// Keys the reader itself owns are not recorded: a cell that reads its
    /// own previous export must not re-trigger itself by publishing.
    pub(crate) fn read(&self, key: &str, tracker: &Tracker, reader: &str) -> Value {
        let state = self.state.borrow();
        let entry = state.entries.get(key);
        if !entry.is_some_and(|e| &*e.owner == reader) {
            tracker.record(key, state.version(key));
        }
        entry.map(|e| e.value.clone()).unwrap_or_default()
    }

    /// The model that last wrote `key`.
    pub fn owner_of(&self, key: &str) -> Option<Rc<str>> {
        self.state.borrow().entries.get(key).map(|e| e.owner.clone())
    }

    /// Current version of `key`; 0 if it was never written.
    pub fn version(&self, key: &str) -> u64 {
        self.state.borrow().version(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.borrow().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// All entries as `(key, value)`, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let state = self.state.borrow();
        let mut entries: Vec<(String, Value)> = state
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().entries.is_empty()
    }

    /// Replace the full export set of `owner` with `entries`.
    ///
    /// Keys the owner wrote before but no longer exports are removed. Values
    /// equal to the current one (SameValue) are not a change. Reactions
    /// watching changed keys fire once each, after the whole update has been
    /// applied. Returns the changed keys.
    pub fn update(&self, owner: &str, entries: Vec<(String, Value)>) -> Vec<String> {
        let (changed, triggered) = {
            let mut state = self.state.borrow_mut();
            let owner: Rc<str> = Rc::from(owner);
            let mut changed = Vec::new();
            let mut written = FxHashSet::default();

            for (key, value) in entries {
                written.insert(key.clone());
                match state.entries.get_mut(&key) {
                    Some(entry) if entry.value.same_value(&value) => {
                        entry.owner = owner.clone();
                    }
                    Some(entry) => {
                        if entry.owner != owner {
                            tracing::warn!(
                                key = %key,
                                owner = %entry.owner,
                                writer = %owner,
                                "overwriting a context key owned by another model"
                            );
                        }
                        entry.value = value;
                        entry.owner = owner.clone();
                        changed.push(key);
                    }
                    None => {
                        state.entries.insert(
                            key.clone(),
                            Entry {
                                value,
                                owner: owner.clone(),
                            },
                        );
                        changed.push(key);
                    }
                }
            }

            let stale: Vec<String> = state
                .entries
                .iter()
                .filter(|(key, entry)| entry.owner == owner && !written.contains(*key))
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                state.entries.remove(&key);
                changed.push(key);
            }

            for key in &changed {
                state.bump(key);
            }
            let triggered = state.take_triggered(&changed);
            (changed, triggered)
        };

        if !changed.is_empty() {
            tracing::debug!(
                owner,
                changed = ?changed,
                reactions = triggered.len(),
                "context updated"
            );
        }
        for callback in triggered {
            callback();
        }
        changed
    }

    /// Remove every entry written by `owner`.
    pub fn remove_owner(&self, owner: &str) -> Vec<String> {
        self.update(owner, Vec::new())
    }

    /// Arm `callback` on the keys `tracker` recorded.
    ///
    /// If a recorded key already changed since it was read, the callback
    /// runs right away and the returned reaction is spent.
    pub fn react(&self, tracker: &Tracker, callback: impl Fn() + 'static) -> Reaction {
        let dependencies = tracker.dependencies();
        let mut state = self.state.borrow_mut();
        if dependencies
            .iter()
            .any(|(key, version)| state.version(key) != *version)
        {
            drop(state);
            tracing::debug!("dependency changed while running; reacting immediately");
            callback();
            return Reaction::spent();
        }
        if dependencies.is_empty() {
            return Reaction::spent();
        }

        let id = state.next_reaction;
        state.next_reaction += 1;
        let keys: Vec<String> = dependencies.into_iter().map(|(key, _)| key).collect();
        for key in &keys {
            state.watchers.entry(key.clone()).or_default().insert(id);
        }
        state.reactions.insert(
            id,
            Armed {
                keys,
                callback: Rc::new(callback),
            },
        );
        Reaction::armed(id, Rc::downgrade(&self.state))
    }

    /// Number of armed reactions.
    pub fn reaction_count(&self) -> usize {
        self.state.borrow().reactions.len()
    }
}
