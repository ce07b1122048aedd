//! Event streams.
//!
//! An [`Emitter`] owns a table of listeners and fires values at them; an
//! [`Event`] is the subscribe-only half handed out to consumers. Every
//! subscription returns a [`Subscription`] that removes the listener when
//! disposed.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`): the engine runs on
//! one cooperative scheduler.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

/// Unique identifier for a listener.
pub type ListenerId = u64;

type Listener<T> = Rc<dyn Fn(&T)>;

struct Listeners<T> {
    entries: FxHashMap<ListenerId, Listener<T>>,
    /// Subscription order, so listeners fire in the order they were added.
    order: Vec<ListenerId>,
    next_id: ListenerId,
}

impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            order: Vec::new(),
            next_id: 1,
        }
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        self.order.retain(|&other| other != id);
        self.entries.remove(&id).is_some()
    }
}

/// The firing side of an event stream.
pub struct Emitter<T> {
    listeners: Rc<RefCell<Listeners<T>>>,
}

impl<T: 'static> Emitter<T> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(Listeners::new())),
        }
    }

    /// Subscribe-only handle for consumers.
    pub fn event(&self) -> Event<T> {
        Event {
            listeners: self.listeners.clone(),
        }
    }

    /// Deliver `value` to every current listener.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or
    /// dispose subscriptions while being called.
    pub fn fire(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = {
            let listeners = self.listeners.borrow();
            listeners
                .order
                .iter()
                .filter_map(|id| listeners.entries.get(id).cloned())
                .collect()
        };
        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        let mut listeners = self.listeners.borrow_mut();
        listeners.entries.clear();
        listeners.order.clear();
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The subscribe side of an event stream.
pub struct Event<T> {
    listeners: Rc<RefCell<Listeners<T>>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T: 'static> Event<T> {
    /// Register `listener`; it stays registered until the returned
    /// subscription is disposed or the emitter is cleared.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut listeners = self.listeners.borrow_mut();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.insert(id, Rc::new(listener));
            listeners.order.push(id);
            id
        };

        let weak: Weak<RefCell<Listeners<T>>> = Rc::downgrade(&self.listeners);
        Subscription {
            id,
            remove: Some(Box::new(move |id| {
                weak.upgrade()
                    .is_some_and(|listeners| listeners.borrow_mut().remove(id))
            })),
        }
    }
}

/// Handle to a registered listener.
///
/// Dropping a subscription does not unsubscribe; call [`dispose`](Self::dispose).
pub struct Subscription {
    id: ListenerId,
    remove: Option<Box<dyn FnOnce(ListenerId) -> bool>>,
}

impl Subscription {
    /// The listener's identifier.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns whether it was still registered.
    pub fn dispose(mut self) -> bool {
        self.remove.take().is_some_and(|remove| remove(self.id))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_fire_reaches_listeners_in_order() {
        let emitter = Emitter::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let a = seen.clone();
        let _s1 = emitter.event().subscribe(move |v| a.borrow_mut().push(("a", *v)));
        let b = seen.clone();
        let _s2 = emitter.event().subscribe(move |v| b.borrow_mut().push(("b", *v)));

        emitter.fire(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_dispose_removes_listener() {
        let emitter = Emitter::<()>::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let sub = emitter.event().subscribe(move |_| c.set(c.get() + 1));

        emitter.fire(&());
        assert!(sub.dispose());
        emitter.fire(&());

        assert_eq!(count.get(), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_dispose_after_emitter_dropped() {
        let emitter = Emitter::<()>::new();
        let sub = emitter.event().subscribe(|_| {});
        drop(emitter);
        assert!(!sub.dispose());
    }

    #[test]
    fn test_listener_can_subscribe_while_firing() {
        let emitter = Rc::new(Emitter::<()>::new());
        let late = Rc::new(Cell::new(0));

        let emitter_clone = emitter.clone();
        let late_clone = late.clone();
        let _sub = emitter.event().subscribe(move |_| {
            let l = late_clone.clone();
            let _ = emitter_clone.event().subscribe(move |_| l.set(l.get() + 1));
        });

        emitter.fire(&());
        assert_eq!(late.get(), 0);
        emitter.fire(&());
        assert_eq!(late.get(), 1);
    }
}
