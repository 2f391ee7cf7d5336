use crate::error::EngineError;
use crate::executor::StepOutput;

/// What the tracker queues for each request: an executor output, or the
/// terminal error that ended the request.
pub type StreamItem<C> = Result<StepOutput<C>, EngineError>;

/// A caller-facing output yielded by [`AsyncEngine::generate`](crate::AsyncEngine::generate).
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutput<C> {
    pub request_id: String,
    pub output: C,
    /// `true` on the final output of the request
    pub finished: bool,
}

impl<C> From<StepOutput<C>> for RequestOutput<C> {
    fn from(step: StepOutput<C>) -> Self {
        Self {
            request_id: step.request_id,
            output: step.chunk,
            finished: step.is_terminal,
        }
    }
}
