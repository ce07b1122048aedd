//! Bookkeeping of in-flight engine work, so callers can wait for quiescence.

use std::rc::Rc;

use tokio::sync::watch;

/// Counts pending debounce timers and evaluation tasks.
#[derive(Clone)]
pub struct Activity {
    pending: Rc<watch::Sender<usize>>,
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            pending: Rc::new(tx),
        }
    }

    /// Mark one unit of work as started; it ends when the guard drops
    /// (including when its task is aborted).
    pub fn begin(&self) -> ActivityGuard {
        self.pending.send_modify(|n| *n += 1);
        ActivityGuard {
            pending: self.pending.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until no work is pending.
    pub async fn idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Ends a unit of work on drop.
pub struct ActivityGuard {
    pending: Rc<watch::Sender<usize>>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn test_idle_waits_for_guards() {
        let activity = Activity::new();
        activity.idle().await;

        let guard = activity.begin();
        assert_eq!(activity.pending(), 1);
        let waiter = activity.clone();
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let idle = tokio::task::spawn_local(async move { waiter.idle().await });
                tokio::task::yield_now().await;
                assert!(!idle.is_finished());
                drop(guard);
                idle.await.unwrap();
            })
            .await;
        assert_eq!(activity.pending(), 0);
    }
}
