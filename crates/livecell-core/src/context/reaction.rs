//! Re-run triggers attached to the keys an evaluation read.

use std::rc::{Rc, Weak};
use std::cell::RefCell;

use super::State;

/// Unique identifier for an armed reaction.
pub type ReactionId = u64;

pub(super) struct Armed {
    pub(super) keys: Vec<String>,
    pub(super) callback: Rc<dyn Fn()>,
}

/// Handle to an armed reaction.
///
/// A reaction fires at most once: the first change to any watched key
/// disarms it and runs the callback. Dropping the handle does not disarm it;
/// call [`dispose`](Reaction::dispose).
pub struct Reaction {
    id: Option<ReactionId>,
    state: Weak<RefCell<State>>,
}

impl Reaction {
    pub(super) fn armed(id: ReactionId, state: Weak<RefCell<State>>) -> Self {
        Self {
            id: Some(id),
            state,
        }
    }

    /// A reaction that already fired while being armed.
    pub(super) fn spent() -> Self {
        Self {
            id: None,
            state: Weak::new(),
        }
    }

    /// Whether the reaction is still waiting for a change.
    pub fn is_armed(&self) -> bool {
        match (self.id, self.state.upgrade()) {
            (Some(id), Some(state)) => state.borrow().reactions.contains_key(&id),
            _ => false,
        }
    }

    /// Disarm the reaction. Returns whether it was still armed.
    pub fn dispose(self) -> bool {
        let (Some(id), Some(state)) = (self.id, self.state.upgrade()) else {
            return false;
        };
        state.borrow_mut().disarm(id)
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.id)
            .field("armed", &self.is_armed())
            .finish()
    }
}
