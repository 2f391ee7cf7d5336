//! Registry of live requests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::communication::{ItemStream, NewRequestEvent, RequestStream, StreamItem};
use crate::error::{EngineError, ExecutorError, Result};
use crate::executor::{EngineRequest, StepOutput};

struct TrackerState<P, S, C> {
    /// Live streams, keyed by request id
    streams: HashMap<String, RequestStream<StreamItem<C>>>,
    /// Requests admitted but not yet handed to the executor
    pending_new: VecDeque<EngineRequest<P, S>>,
    /// Ids the executor must be told to drop
    pending_abort: Vec<String>,
}

/// Process-wide map from request id to its output stream.
///
/// The tracker is the only place streams are created and destroyed. Request
/// producers call [`add_request`](Self::add_request) and
/// [`abort_request`](Self::abort_request); the virtual engine loops call
/// [`drain_pending`](Self::drain_pending) and route executor outputs back with
/// [`process_step_outputs`](Self::process_step_outputs). All of these take a
/// single short critical section and never suspend.
pub struct RequestTracker<P, S, C> {
    state: Mutex<TrackerState<P, S, C>>,
    new_requests_event: Arc<NewRequestEvent>,
    dispatch: tokio::sync::Mutex<()>,
    log_requests: bool,
}

impl<P, S, C> RequestTracker<P, S, C> {
    pub fn new(log_requests: bool) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                streams: HashMap::new(),
                pending_new: VecDeque::new(),
                pending_abort: vec![],
            }),
            new_requests_event: Arc::new(NewRequestEvent::new()),
            dispatch: tokio::sync::Mutex::new(()),
            log_requests,
        }
    }

    /// None of the critical sections can leave the state half-updated, so a
    /// poisoned lock is still safe to use.
    fn state(&self) -> MutexGuard<'_, TrackerState<P, S, C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn new_requests_event(&self) -> &Arc<NewRequestEvent> {
        &self.new_requests_event
    }

    /// Register a request and return the stream its outputs will arrive on.
    ///
    /// Fails with [`EngineError::DuplicateRequestId`] without touching the
    /// existing request when the id is already tracked.
    pub fn add_request(&self, request: EngineRequest<P, S>) -> Result<ItemStream<StreamItem<C>>> {
        let request_id = request.request_id.clone();
        let consumer = {
            let mut state = self.state();
            if state.streams.contains_key(&request_id) {
                return Err(EngineError::DuplicateRequestId(request_id));
            }
            let (stream, consumer) = RequestStream::new(request_id.clone());
            state.streams.insert(request_id.clone(), stream);
            state.pending_new.push_back(request);
            consumer
        };

        if self.log_requests {
            tracing::info!(request_id = %request_id, "received request");
        }
        self.new_requests_event.signal();
        Ok(consumer)
    }

    /// Abort a request. Unknown ids are ignored.
    ///
    /// Returns `true` if a live request was aborted.
    pub fn abort_request(&self, request_id: &str) -> bool {
        {
            let mut state = self.state();
            let Some(mut stream) = state.streams.remove(request_id) else {
                return false;
            };
            stream.abort();

            // Never reached the executor, nothing to tell it
            let before = state.pending_new.len();
            state.pending_new.retain(|r| r.request_id != request_id);
            if state.pending_new.len() == before
                && !state.pending_abort.iter().any(|id| id == request_id)
            {
                state.pending_abort.push(request_id.to_string());
            }
        }

        if self.log_requests {
            tracing::info!(request_id = %request_id, "aborted request");
        }
        self.new_requests_event.signal();
        true
    }

    /// Route executor outputs to their streams.
    ///
    /// Terminal outputs finish and untrack their request. Outputs for ids that
    /// are no longer tracked are dropped.
    pub fn process_step_outputs(&self, outputs: Vec<StepOutput<C>>) {
        let mut state = self.state();
        for output in outputs {
            let request_id = output.request_id.clone();
            let is_terminal = output.is_terminal;
            let Some(stream) = state.streams.get_mut(&request_id) else {
                tracing::debug!(request_id = %request_id, "dropping output for untracked request");
                continue;
            };
            if let Err(err) = stream.put(Ok(output)) {
                tracing::warn!(request_id = %request_id, error = %err, "executor emitted output after close");
            }
            if is_terminal {
                stream.finish();
                state.streams.remove(&request_id);
            }
        }
    }

    /// End every request named by `error` with that error as its last item.
    ///
    /// Returns the ids that were still tracked.
    pub fn process_request_error(&self, error: &ExecutorError) -> Vec<String> {
        let mut failed = vec![];
        let mut state = self.state();
        for request_id in &error.request_ids {
            if let Some(mut stream) = state.streams.remove(request_id) {
                let _ = stream.put(Err(EngineError::Executor(error.clone())));
                stream.finish();
                failed.push(request_id.clone());
            }
            state.pending_new.retain(|r| &r.request_id != request_id);
        }
        failed
    }

    /// Claim the right to drain and forward pending work.
    ///
    /// Only one loop forwards at a time, so the executor sees adds and aborts
    /// in the order they were drained even when they are split across stages.
    /// Returns `None` while another loop holds it.
    pub fn try_dispatch(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.dispatch.try_lock().ok()
    }

    /// Take the pending adds and aborts in one atomic step.
    pub fn drain_pending(&self) -> (Vec<EngineRequest<P, S>>, Vec<String>) {
        let mut state = self.state();
        let new_requests = state.pending_new.drain(..).collect();
        let aborted = std::mem::take(&mut state.pending_abort);
        (new_requests, aborted)
    }

    /// Finish every live stream with `make_error()` as its last item and forget
    /// all pending work.
    pub fn abort_all_with<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> EngineError,
    {
        let mut state = self.state();
        let count = state.streams.len();
        for (_, mut stream) in state.streams.drain() {
            let _ = stream.put(Err(make_error()));
            stream.finish();
        }
        state.pending_new.clear();
        state.pending_abort.clear();
        count
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.state().streams.contains_key(request_id)
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.state().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_pending(&self) -> bool {
        let state = self.state();
        !state.pending_new.is_empty() || !state.pending_abort.is_empty()
    }
}
