//! Tick scheduler on top of the tokio runtime
//!
//! Mirrors the four primitives the duel core needs: run now, run after N
//! ticks, run every N ticks, and run on a blocking worker then resume on
//! the async side. Every call hands back a [`TaskHandle`] that the owner
//! keeps and cancels explicitly; dropping a handle does not cancel.

use std::future::Future;
use std::ops::ControlFlow;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::warn;

use super::time::ticks;

/// Cancellable handle to a scheduled task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Scheduler bound to a tokio runtime
#[derive(Clone, Debug)]
pub struct Scheduler {
    runtime: Handle,
}

impl Scheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler for the runtime we are currently running on
    ///
    /// Panics outside a tokio runtime, like `tokio::spawn`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Run a future on the tick loop
    pub fn spawn<F>(&self, fut: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            abort: self.runtime.spawn(fut).abort_handle(),
        }
    }

    /// Run `task` as soon as possible
    pub fn run_now<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move { task() })
    }

    /// Run `task` once after `delay_ticks`
    pub fn run_later<F>(&self, delay_ticks: u64, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move {
            sleep(ticks(delay_ticks)).await;
            task();
        })
    }

    /// Run `task` after `delay_ticks`, then every `period_ticks` until it
    /// returns `Break` or the handle is cancelled
    pub fn run_repeating<F>(&self, delay_ticks: u64, period_ticks: u64, mut task: F) -> TaskHandle
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let period = ticks(period_ticks.max(1));
        self.spawn(async move {
            let mut interval = interval_at(Instant::now() + ticks(delay_ticks), period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if task().is_break() {
                    break;
                }
            }
        })
    }

    /// Run `work` on a blocking worker thread, then hand its result to
    /// `resume` back on the async side
    pub fn run_worker_then<T, W, R, Fut>(&self, work: W, resume: R) -> TaskHandle
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        R: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = self.runtime.clone();
        self.spawn(async move {
            match runtime.spawn_blocking(work).await {
                Ok(result) => resume(result).await,
                Err(e) => warn!(error = %e, "Worker task failed"),
            }
        })
    }

    /// Run `work` on a blocking worker thread and await its result
    pub async fn on_worker<T, W>(&self, work: W) -> Option<T>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
    {
        match self.runtime.spawn_blocking(work).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "Worker task failed");
                None
            }
        }
    }
}
