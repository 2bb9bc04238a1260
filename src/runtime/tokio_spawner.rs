//! Task spawning abstraction and its Tokio implementation.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};

/// Something that can run a detached future to completion.
pub trait Spawn {
    /// Spawn an async task.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner that executes tasks on a tokio runtime.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Handle,
    /// Keeps a runtime built by this spawner alive. Must be dropped outside async context.
    _owned: Option<Arc<Runtime>>,
}

impl TokioSpawner {
    /// Spawn onto an existing runtime.
    pub const fn new(handle: Handle) -> Self {
        Self {
            handle,
            _owned: None,
        }
    }

    /// Spawn onto the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Build and own a multi-threaded runtime with `worker_threads` workers.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("seat-dispatch")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _owned: Some(Arc::new(runtime)),
        })
    }

    /// Build and own a runtime with one worker per CPU.
    pub fn with_default_threads() -> Result<Self, std::io::Error> {
        Self::with_worker_threads(num_cpus::get())
    }

    /// Handle of the runtime tasks are spawned on.
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Spawn for TokioSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.handle.spawn(fut));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn owned_runtime_runs_spawned_tasks() {
        let spawner = TokioSpawner::with_worker_threads(2).unwrap();
        let (tx, rx) = mpsc::channel();
        spawner.spawn(async move {
            tx.send(7).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn no_current_runtime_outside_async() {
        assert!(TokioSpawner::current().is_none());
    }

    #[tokio::test]
    async fn current_runtime_is_found() {
        let spawner = TokioSpawner::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawner.spawn(async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }
}
