use tokio::sync::mpsc::{self, UnboundedSender};

use super::item_stream::ItemStream;
use crate::error::{EngineError, Result};

/// # RequestStream
///
/// The producer half of a single request's output channel, owned by the
/// [`RequestTracker`](crate::RequestTracker).
///
/// Chunks are pushed with [`put`](Self::put) and read by exactly one
/// [`ItemStream`]. Closing the stream, either with [`finish`](Self::finish)
/// or [`abort`](Self::abort), drops the sender: chunks already queued are
/// still delivered, then the consumer observes the end of the stream.
///
/// | state    | `put`                        |
/// |----------|------------------------------|
/// | open     | enqueued, consumer woken     |
/// | finished | `Err(StreamClosed)`          |
/// | aborted  | silently dropped             |
#[derive(Debug)]
pub struct RequestStream<T> {
    request_id: String,
    sender: Option<UnboundedSender<T>>,
    finished: bool,
    aborted: bool,
}

impl<T> RequestStream<T> {
    /// Create a stream and the consumer half handed back to the caller.
    pub fn new(request_id: impl Into<String>) -> (Self, ItemStream<T>) {
        let request_id = request_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            request_id: request_id.clone(),
            sender: Some(tx),
            finished: false,
            aborted: false,
        };
        (stream, ItemStream::new(request_id, rx))
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Append a chunk.
    ///
    /// After an abort this is a no-op, since the executor may still emit one
    /// more chunk for a request it has not yet dropped.
    pub fn put(&mut self, item: T) -> Result<()> {
        if self.aborted {
            return Ok(());
        }
        if self.finished {
            return Err(EngineError::StreamClosed(self.request_id.clone()));
        }
        if let Some(sender) = &self.sender {
            if sender.send(item).is_err() {
                tracing::trace!(request_id = %self.request_id, "consumer dropped; discarding output");
            }
        }
        Ok(())
    }

    /// Mark the stream finished. Idempotent.
    pub fn finish(&mut self) {
        self.finished = true;
        self.sender = None;
    }

    /// Mark the stream aborted. Idempotent.
    pub fn abort(&mut self) {
        self.aborted = true;
        self.sender = None;
    }
}
