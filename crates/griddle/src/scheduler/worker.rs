//! Module for handling the background virtual engine tasks.

use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use tokio::task::JoinHandle;
use crate::communication::NewRequestEvent;

/// A handle for managing the background tasks that drive every virtual engine.
///
/// One task is spawned per pipeline stage. The tasks share a `running` flag
/// and the tracker's [`NewRequestEvent`]; clearing the flag and signaling the
/// event makes every idle loop wake up and exit.
///
/// # Example
///
/// ```ignore
/// use griddle::scheduler::worker::LoopWorkerHandle;
///
/// let mut handle = LoopWorkerHandle::new(2, event.clone(), |stage, running| {
///     tokio::spawn(async move {
///         while running.load(Ordering::SeqCst) {
///             // step stage...
///         }
///     })
/// });
///
/// handle.shutdown().await;
/// ```
pub struct LoopWorkerHandle {
    /// Flag indicating whether the background tasks should continue running
    running: Arc<AtomicBool>,

    /// Handles to the spawned tasks, indexed by virtual engine; emptied by shutdown
    handles: Vec<JoinHandle<()>>,

    /// Wakes idle loops
    event: Arc<NewRequestEvent>,
}

impl LoopWorkerHandle {
    /// Creates a new `LoopWorkerHandle` by spawning `stages` background tasks.
    ///
    /// # Parameters
    ///
    /// * `stages` - Number of tasks to spawn
    /// * `event` - The event used to wake the tasks
    /// * `spawn` - Called once per stage index with the shared running flag;
    ///   responsible for spawning the actual task
    pub fn new<F>(stages: usize, event: Arc<NewRequestEvent>, mut spawn: F) -> Self
    where
        F: FnMut(usize, Arc<AtomicBool>) -> JoinHandle<()>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let handles = (0..stages)
            .map(|stage| spawn(stage, running.clone()))
            .collect();

        Self {
            running,
            handles,
            event,
        }
    }

    /// Returns a clone of the flag that indicates whether the tasks should continue running.
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Index of the first task that has exited, if any.
    pub fn first_exited(&self) -> Option<usize> {
        self.handles.iter().position(|h| h.is_finished())
    }

    fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.event.signal();
    }

    /// Stops every task and waits for them to exit.
    pub async fn shutdown(&mut self) {
        self.signal_stop();

        for (stage, handle) in self.handles.drain(..).enumerate() {
            if let Err(err) = handle.await {
                tracing::error!(virtual_engine = stage, error = %err, "virtual engine task failed");
            }
        }
    }
}

impl Drop for LoopWorkerHandle {
    /// Tells the tasks to stop when the handle is dropped; they exit on their own.
    fn drop(&mut self) {
        self.signal_stop();
    }
}
