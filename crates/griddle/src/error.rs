use thiserror::Error;

/// Errors surfaced by the engine, either synchronously from an API call or as
/// the terminal item of a request's output stream.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A request with this id is already being tracked.
    #[error("request id `{0}` is already being tracked")]
    DuplicateRequestId(String),

    /// A chunk was emitted for a stream that already finished.
    #[error("stream for request `{0}` is already closed")]
    StreamClosed(String),

    /// The engine configuration is invalid or uses a guarded legacy mode.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `start_background_loop` was called while the loop is already running.
    #[error("background loop is already running")]
    AlreadyRunning,

    /// The background loop is not running and auto-start is disabled.
    #[error("background loop is not running")]
    NotRunning,

    /// A background loop task exited while the engine was supposed to be running.
    #[error("background loop for virtual engine {0} exited unexpectedly")]
    EngineDead(usize),

    /// The engine was stopped before the request finished.
    #[error("engine stopped before request finished")]
    Stopped,

    /// The executor failed while processing this request.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// A failure reported by an [`ExecutorAdapter`](crate::executor::ExecutorAdapter).
///
/// Failures name the requests they affect. A failure with no request ids is
/// treated as a stage-wide hiccup: it is logged and the stage retries later,
/// while every request keeps its stream open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("executor error: {message}")]
pub struct ExecutorError {
    pub message: String,
    pub request_ids: Vec<String>,
}

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            request_ids: vec![],
        }
    }

    /// Attribute this failure to the given requests.
    pub fn for_requests<I, S>(mut self, request_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_ids = request_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_attributed(&self) -> bool {
        !self.request_ids.is_empty()
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
