use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;

use crate::error::ExecutorError;
use crate::executor::ExecutorAdapter;
use crate::tracker::RequestTracker;

/// Tracker type for a given executor.
pub type EngineTracker<E> = RequestTracker<
    <E as ExecutorAdapter>::Prompt,
    <E as ExecutorAdapter>::Params,
    <E as ExecutorAdapter>::Chunk,
>;

/// Where a virtual engine loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Nothing to do, parked on the new-request event
    Idle,
    /// Forwarding pending adds and aborts to the executor
    DrainingNewWork,
    /// An executor step is in flight
    Stepping,
    /// Exited after shutdown
    Stopped,
}

/// The scheduling loop for one pipeline stage.
///
/// Each iteration forwards pending aborts and adds to the executor, then
/// steps the executor if the stage has work. Forwarding is serialized across
/// stages through the tracker so an abort never overtakes the add it cancels. A stage keeps stepping without
/// sleeping while it has work, and parks on the tracker's
/// [`NewRequestEvent`](crate::NewRequestEvent) when it does not. The park is
/// bounded by `idle_wait` so a missed wake-up costs latency, never liveness.
///
/// Step failures are confined to the requests they name; a failure that names
/// no request (including a panic or a timeout inside the step) is logged and
/// the stage backs off for one idle wait before trying again.
pub struct VirtualEngineLoop<E: ExecutorAdapter> {
    virtual_engine: usize,
    executor: Arc<E>,
    tracker: Arc<EngineTracker<E>>,
    running: Arc<AtomicBool>,
    idle_wait: Duration,
    iteration_timeout: Option<Duration>,
    state: watch::Sender<LoopState>,
}

impl<E: ExecutorAdapter> VirtualEngineLoop<E> {
    pub fn new(
        virtual_engine: usize,
        executor: Arc<E>,
        tracker: Arc<EngineTracker<E>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            virtual_engine,
            executor,
            tracker,
            running,
            idle_wait: Duration::from_millis(100),
            iteration_timeout: None,
            state,
        }
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn with_iteration_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    /// Observe this loop's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LoopState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::trace!(virtual_engine = self.virtual_engine, from = ?current, to = ?state, "loop state");
            *current = state;
            true
        });
    }

    /// Run until the shared `running` flag is cleared.
    pub async fn run(self) {
        let event = self.tracker.new_requests_event().clone();
        let mut produced_outputs = false;
        tracing::debug!(virtual_engine = self.virtual_engine, "virtual engine loop started");

        while self.running.load(Ordering::SeqCst) {
            // Read before draining so a signal arriving after the drain is not lost
            let seen = event.generation();

            let has_new_requests = match self.dispatch_pending().await {
                Some(has_new_requests) => {
                    // Sibling stages may own what was just admitted, or have
                    // skipped work that arrived while this loop held the dispatch
                    if has_new_requests || self.tracker.has_pending() {
                        event.signal();
                    }
                    has_new_requests
                }
                None => false,
            };

            if has_new_requests
                || produced_outputs
                || self.executor.has_unfinished_requests(self.virtual_engine)
            {
                self.set_state(LoopState::Stepping);
                match self.step_once().await {
                    Ok(produced) => {
                        produced_outputs = produced;
                        tokio::task::yield_now().await;
                    }
                    Err(err) => {
                        tracing::warn!(virtual_engine = self.virtual_engine, error = %err, "step failed; backing off");
                        produced_outputs = false;
                        self.set_state(LoopState::Idle);
                        event.wait(seen, Some(self.idle_wait)).await;
                    }
                }
                continue;
            }

            self.set_state(LoopState::Idle);
            event.wait(seen, Some(self.idle_wait)).await;
        }

        self.stop().await;
    }

    /// Drain pending work and hand it to the executor.
    ///
    /// Returns whether any new request was forwarded, or `None` if another
    /// stage is already dispatching. That stage signals once it is done.
    async fn dispatch_pending(&self) -> Option<bool> {
        let _dispatch = self.tracker.try_dispatch()?;
        let (new_requests, aborted) = self.tracker.drain_pending();
        if new_requests.is_empty() && aborted.is_empty() {
            return Some(false);
        }

        self.set_state(LoopState::DrainingNewWork);
        // Aborts first: an id aborted and then re-added must leave the new
        // request running
        for request_id in aborted {
            self.executor.abort_request(&request_id);
        }

        let has_new_requests = !new_requests.is_empty();
        for request in new_requests {
            let request_id = request.request_id.clone();
            if let Err(err) = self.executor.add_request(request).await {
                tracing::warn!(virtual_engine = self.virtual_engine, request_id = %request_id, error = %err, "executor rejected request");
                let err = if err.request_ids.contains(&request_id) {
                    err
                } else {
                    err.for_requests([request_id])
                };
                self.fail_requests(&err);
            }
        }
        Some(has_new_requests)
    }

    /// Runs one step and routes its outputs.
    ///
    /// Returns whether the step produced any output, or the error if the step
    /// failed without naming the requests it affected.
    async fn step_once(&self) -> Result<bool, ExecutorError> {
        let step = AssertUnwindSafe(self.executor.step(self.virtual_engine)).catch_unwind();
        let result = match self.iteration_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, step).await {
                Ok(result) => result,
                Err(_) => Ok(Err(ExecutorError::new(format!("step timed out after {:?}", timeout)))),
            },
            None => step.await,
        };

        match result {
            Ok(Ok(outputs)) => {
                let produced = !outputs.is_empty();
                self.tracker.process_step_outputs(outputs);
                Ok(produced)
            }
            Ok(Err(err)) if err.is_attributed() => {
                tracing::warn!(virtual_engine = self.virtual_engine, error = %err, requests = ?err.request_ids, "step failed for requests");
                self.fail_requests(&err);
                Ok(false)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ExecutorError::new("step panicked")),
        }
    }

    /// End the named requests and make sure the executor drops them too.
    fn fail_requests(&self, err: &ExecutorError) {
        for request_id in self.tracker.process_request_error(err) {
            self.executor.abort_request(&request_id);
        }
    }

    async fn stop(&self) {
        if let Err(err) = self.executor.stop_remote_execution(self.virtual_engine).await {
            tracing::error!(virtual_engine = self.virtual_engine, error = %err, "failed to stop remote execution");
        }
        self.set_state(LoopState::Stopped);
        tracing::debug!(virtual_engine = self.virtual_engine, "virtual engine loop stopped");
    }
}
