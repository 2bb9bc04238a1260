//! Long-running engine loops with panic containment.
//!
//! Each loop calls [`Worker::run_once`] forever. A failed or panicking pass is logged and
//! followed by a backoff pause; the loop itself never dies until stopped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;

use crate::core::AppResult;
use crate::runtime::tokio_spawner::Spawn;

/// Whether a pass did useful work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Work was done; run again right away.
    Worked,
    /// Nothing to do; pause for the idle interval.
    Idle,
}

/// One engine loop body.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;
    /// Run a single pass.
    async fn run_once(&self) -> AppResult<Pass>;
}

/// Pauses between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    /// Pause after an idle pass.
    pub idle: Duration,
    /// Pause after a failed or panicking pass.
    pub backoff: Duration,
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Run `worker` until `stop` turns true or its sender is dropped.
pub async fn supervise<W: Worker>(worker: Arc<W>, policy: LoopPolicy, mut stop: watch::Receiver<bool>) {
    let name = worker.name();
    tracing::info!(worker = name, "loop started");
    while !*stop.borrow() {
        let pause = match AssertUnwindSafe(worker.run_once()).catch_unwind().await {
            Ok(Ok(Pass::Worked)) => Duration::ZERO,
            Ok(Ok(Pass::Idle)) => policy.idle,
            Ok(Err(e)) => {
                tracing::error!(worker = name, error = %format!("{e:#}"), "pass failed");
                policy.backoff
            }
            Err(panic) => {
                tracing::error!(worker = name, panic = panic_message(panic.as_ref()), "pass panicked");
                policy.backoff
            }
        };
        if pause.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            () = tokio::time::sleep(pause) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!(worker = name, "loop stopped");
}

/// Starts loops and stops them together.
pub struct Supervisor {
    stop: watch::Sender<bool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Create a supervisor with no loops.
    pub fn new() -> Self {
        Self {
            stop: watch::Sender::new(false),
        }
    }

    /// Start a supervised loop for `worker` on `spawner`.
    pub fn start<S: Spawn, W: Worker>(&self, spawner: &S, worker: Arc<W>, policy: LoopPolicy) {
        spawner.spawn(supervise(worker, policy, self.stop.subscribe()));
    }

    /// Receiver that turns true when [`Supervisor::stop`] is called.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Ask every loop to exit after its current pass.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}
