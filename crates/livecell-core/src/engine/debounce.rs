//! Coalescing of rapid text edits.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::activity::Activity;

struct Pending {
    handle: JoinHandle<()>,
    /// Set once the quiet period elapsed and the task started its work.
    fired: Rc<Cell<bool>>,
}

/// Runs the most recently scheduled task after a quiet period.
///
/// Scheduling again while the previous task is still waiting cancels it. A
/// task that already started is left to finish.
pub(crate) struct Debouncer {
    delay: Duration,
    activity: Activity,
    pending: RefCell<Option<Pending>>,
}

impl Debouncer {
    pub fn new(delay: Duration, activity: Activity) -> Self {
        Self {
            delay,
            activity,
            pending: RefCell::new(None),
        }
    }

    /// Must be called from within a `LocalSet`.
    pub fn schedule(&self, task: impl Future<Output = ()> + 'static) {
        self.cancel();
        let guard = self.activity.begin();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let delay = self.delay;
        let handle = tokio::task::spawn_local(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;
            flag.set(true);
            task.await;
        });
        *self.pending.borrow_mut() = Some(Pending { handle, fired });
    }

    /// Cancel the waiting task, if any.
    pub fn cancel(&self) {
        if let Some(pending) = self.pending.borrow_mut().take() {
            if !pending.fired.get() {
                pending.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_only_last_task_runs() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let activity = Activity::new();
                let debouncer = Debouncer::new(Duration::from_millis(100), activity.clone());
                let runs = Rc::new(RefCell::new(Vec::new()));
                for i in 0..3 {
                    let runs = runs.clone();
                    debouncer.schedule(async move { runs.borrow_mut().push(i) });
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
                activity.idle().await;
                assert_eq!(*runs.borrow(), vec![2]);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_cancel_prevents_run() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let activity = Activity::new();
                let debouncer = Debouncer::new(Duration::from_millis(100), activity.clone());
                let ran = Rc::new(Cell::new(false));
                let r = ran.clone();
                debouncer.schedule(async move { r.set(true) });
                debouncer.cancel();
                activity.idle().await;
                assert!(!ran.get());
            })
            .await;
    }
}
