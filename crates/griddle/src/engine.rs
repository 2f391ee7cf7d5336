use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::watch;

use crate::communication::{ItemStream, RequestOutput, StreamItem};
use crate::config::EngineConfig;
use crate::scheduler::virtual_engine::{EngineTracker, LoopState, VirtualEngineLoop};
use crate::scheduler::worker::LoopWorkerHandle;
use crate::error::{EngineError, Result};
use crate::executor::{EngineRequest, ExecutorAdapter};

struct Background {
    worker: LoopWorkerHandle,
    states: Vec<watch::Receiver<LoopState>>,
}

/// The asynchronous front-end of an executor.
///
/// `AsyncEngine` owns the [`RequestTracker`](crate::RequestTracker) and one
/// [`VirtualEngineLoop`] per pipeline stage. Callers submit work with
/// [`add_request`](Self::add_request) or [`generate`](Self::generate) and
/// consume results as a `Stream` while the background loops drive the
/// executor.
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
/// use griddle::{AsyncEngine, EngineConfig};
///
/// let engine = AsyncEngine::new(my_executor, EngineConfig::from_settings()?);
/// engine.start_background_loop()?;
///
/// let mut outputs = engine.generate("Hello", params, "request-0")?;
/// while let Some(output) = outputs.next().await {
///     let output = output?;
///     println!("{:?}", output.output);
/// }
///
/// engine.stop().await;
/// ```
pub struct AsyncEngine<E: ExecutorAdapter> {
    executor: Arc<E>,
    tracker: Arc<EngineTracker<E>>,
    config: EngineConfig,
    background: Mutex<Option<Background>>,
    /// Set for the whole of `stop`, together with emptying `background`
    stopping: AtomicBool,
}

impl<E: ExecutorAdapter> AsyncEngine<E> {
    pub fn new(executor: E, config: EngineConfig) -> Self {
        Self {
            executor: Arc::new(executor),
            tracker: Arc::new(EngineTracker::<E>::new(config.log_requests)),
            config,
            background: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    fn background(&self) -> MutexGuard<'_, Option<Background>> {
        self.background.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn one loop per pipeline stage.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_background_loop(&self) -> Result<()> {
        let mut background = self.background();
        if self.stopping.load(Ordering::SeqCst) {
            return Err(EngineError::Stopped);
        }
        if background.as_ref().is_some_and(|b| b.worker.is_running()) {
            return Err(EngineError::AlreadyRunning);
        }
        self.spawn_loops(&mut background)
    }

    fn spawn_loops(&self, background: &mut Option<Background>) -> Result<()> {
        self.config.validate_launch()?;

        let stages = self.config.pipeline_parallel_size;
        let mut states = Vec::with_capacity(stages);
        let worker = LoopWorkerHandle::new(
            stages,
            self.tracker.new_requests_event().clone(),
            |stage, running| {
                let engine_loop = VirtualEngineLoop::new(
                    stage,
                    self.executor.clone(),
                    self.tracker.clone(),
                    running,
                )
                .with_idle_wait(self.config.idle_wait())
                .with_iteration_timeout(self.config.iteration_timeout());
                states.push(engine_loop.subscribe());
                tokio::spawn(engine_loop.run())
            },
        );

        *background = Some(Background { worker, states });
        tracing::info!(virtual_engines = stages, "background loop started");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        let mut background = self.background();
        if background.as_ref().is_some_and(|b| b.worker.is_running()) {
            return Ok(());
        }
        if self.stopping.load(Ordering::SeqCst) {
            return Err(EngineError::Stopped);
        }
        if !self.config.start_engine_loop {
            return Err(EngineError::NotRunning);
        }
        self.spawn_loops(&mut background)
    }

    pub fn is_running(&self) -> bool {
        self.background()
            .as_ref()
            .is_some_and(|b| b.worker.is_running())
    }

    /// Fails if the loops are not running or one of them has exited.
    pub fn check_health(&self) -> Result<()> {
        let background = self.background();
        match background.as_ref() {
            Some(b) if b.worker.is_running() => match b.worker.first_exited() {
                Some(stage) => Err(EngineError::EngineDead(stage)),
                None => Ok(()),
            },
            _ => Err(EngineError::NotRunning),
        }
    }

    /// Current state of every virtual engine loop, indexed by stage.
    pub fn loop_states(&self) -> Vec<LoopState> {
        self.background()
            .as_ref()
            .map(|b| b.states.iter().map(|s| *s.borrow()).collect())
            .unwrap_or_default()
    }

    /// Submit a request and return the raw stream of its executor outputs.
    ///
    /// The stream is registered before any loop has seen the request, so no
    /// output can be missed. Dropping it does not abort the request.
    pub fn add_request(
        &self,
        request_id: impl Into<String>,
        prompt: E::Prompt,
        params: E::Params,
    ) -> Result<ItemStream<StreamItem<E::Chunk>>> {
        self.ensure_running()?;
        self.tracker
            .add_request(EngineRequest::new(request_id, prompt, params))
    }

    /// Submit a request and stream its outputs.
    ///
    /// Dropping the returned stream before the final output aborts the request.
    pub fn generate(
        &self,
        prompt: E::Prompt,
        params: E::Params,
        request_id: impl Into<String>,
    ) -> Result<GenerateStream<E>> {
        let request_id = request_id.into();
        let inner = self.add_request(request_id.clone(), prompt, params)?;
        Ok(GenerateStream {
            inner,
            tracker: self.tracker.clone(),
            request_id,
            done: false,
        })
    }

    /// Abort a request. Unknown or already finished ids are ignored.
    pub fn abort_request(&self, request_id: &str) {
        self.tracker.abort_request(request_id);
    }

    /// Stop every loop, wait for them to exit, and end all live requests with
    /// [`EngineError::Stopped`].
    ///
    /// Requests submitted while the stop is in progress fail with
    /// [`EngineError::Stopped`] instead of starting new loops.
    pub async fn stop(&self) {
        let mut background = {
            let mut slot = self.background();
            let Some(background) = slot.take() else {
                return;
            };
            self.stopping.store(true, Ordering::SeqCst);
            background
        };
        background.worker.shutdown().await;

        let cancelled = self.tracker.abort_all_with(|| EngineError::Stopped);
        self.stopping.store(false, Ordering::SeqCst);
        tracing::info!(cancelled_requests = cancelled, "background loop stopped");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    /// Number of requests currently tracked.
    pub fn num_requests(&self) -> usize {
        self.tracker.len()
    }

    pub fn model_config(&self) -> &E::ModelConfig {
        self.executor.model_config()
    }

    pub fn tokenizer(&self) -> &E::Tokenizer {
        self.executor.tokenizer()
    }

    pub fn decoding_config(&self) -> &E::DecodingConfig {
        self.executor.decoding_config()
    }
}

/// Output stream returned by [`AsyncEngine::generate`].
///
/// Yields one [`RequestOutput`] per executor chunk, the last with
/// `finished == true`, or a single `Err` if the request failed. If the stream
/// is dropped before that, the request is aborted.
pub struct GenerateStream<E: ExecutorAdapter> {
    inner: ItemStream<StreamItem<E::Chunk>>,
    tracker: Arc<EngineTracker<E>>,
    request_id: String,
    done: bool,
}

impl<E: ExecutorAdapter> GenerateStream<E> {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl<E: ExecutorAdapter> Stream for GenerateStream<E> {
    type Item = Result<RequestOutput<E::Chunk>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(step))) => {
                this.done = step.is_terminal;
                Poll::Ready(Some(Ok(step.into())))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E: ExecutorAdapter> Drop for GenerateStream<E> {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(request_id = %self.request_id, "generate stream dropped early; aborting");
            self.tracker.abort_request(&self.request_id);
        }
    }
}
