//! The stepping engine the orchestrator drives.

use std::time::Instant;

use async_trait::async_trait;

use crate::error::ExecutorError;

/// A generation request as handed to the executor.
///
/// The prompt and sampling parameters are opaque to the engine; only the
/// executor interprets them.
#[derive(Debug, Clone)]
pub struct EngineRequest<P, S> {
    pub request_id: String,
    pub prompt: P,
    pub params: S,
    pub arrival_time: Instant,
}

impl<P, S> EngineRequest<P, S> {
    pub fn new(request_id: impl Into<String>, prompt: P, params: S) -> Self {
        Self {
            request_id: request_id.into(),
            prompt,
            params,
            arrival_time: Instant::now(),
        }
    }
}

/// One chunk of output produced by a step, addressed to a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput<C> {
    pub request_id: String,
    pub chunk: C,
    /// Set on the last output a request will ever produce
    pub is_terminal: bool,
}

impl<C> StepOutput<C> {
    pub fn new(request_id: impl Into<String>, chunk: C, is_terminal: bool) -> Self {
        Self {
            request_id: request_id.into(),
            chunk,
            is_terminal,
        }
    }
}

/// The capability set an executor must provide to be driven by an
/// [`AsyncEngine`](crate::AsyncEngine).
///
/// One executor instance serves every virtual engine; stage-scoped calls are
/// addressed by `virtual_engine`. Calls for the same stage are never issued
/// concurrently, calls for different stages may be.
///
/// # Example
///
/// ```ignore
/// use griddle::{ExecutorAdapter, ExecutorError, EngineRequest, StepOutput};
/// use async_trait::async_trait;
///
/// struct Echo { /* ... */ }
///
/// #[async_trait]
/// impl ExecutorAdapter for Echo {
///     type Prompt = String;
///     type Params = ();
///     type Chunk = String;
///     type ModelConfig = String;
///     type Tokenizer = ();
///     type DecodingConfig = ();
///
///     fn has_unfinished_requests(&self, virtual_engine: usize) -> bool { /* ... */ }
///     async fn step(&self, virtual_engine: usize) -> Result<Vec<StepOutput<String>>, ExecutorError> { /* ... */ }
///     // ...
/// }
/// ```
#[async_trait]
pub trait ExecutorAdapter: Send + Sync + 'static {
    type Prompt: Send + 'static;
    type Params: Send + 'static;
    type Chunk: Send + 'static;
    type ModelConfig: Send + Sync;
    type Tokenizer: Send + Sync;
    type DecodingConfig: Send + Sync;

    /// Whether the given stage still has work in flight.
    fn has_unfinished_requests(&self, virtual_engine: usize) -> bool;

    /// Run one scheduling iteration for the given stage.
    async fn step(
        &self,
        virtual_engine: usize,
    ) -> Result<Vec<StepOutput<Self::Chunk>>, ExecutorError>;

    /// Admit a new request. The executor chooses which stage runs it.
    async fn add_request(
        &self,
        request: EngineRequest<Self::Prompt, Self::Params>,
    ) -> Result<(), ExecutorError>;

    /// Drop a request. Unknown ids must be ignored.
    fn abort_request(&self, request_id: &str);

    /// Stop any remote execution loop serving this stage.
    async fn stop_remote_execution(&self, virtual_engine: usize) -> Result<(), ExecutorError>;

    fn model_config(&self) -> &Self::ModelConfig;

    fn tokenizer(&self) -> &Self::Tokenizer;

    fn decoding_config(&self) -> &Self::DecodingConfig;
}
