use std::pin::Pin;
use std::task::{Context, Poll};
use futures::Stream;
use tokio::sync::mpsc;

/// # ItemStream
///
/// The consumer half of a request's output channel.
///
/// `ItemStream` implements the `Stream` trait from the `futures` crate, so a
/// caller can drive it with `StreamExt::next` or any other combinator. Items
/// arrive in the order the executor produced them.
///
/// ## Termination
///
/// The stream ends (`None`) once the producing [`RequestStream`] is finished
/// or aborted *and* every item queued before that point has been yielded.
/// Dropping an `ItemStream` does not cancel the request on its own; use
/// [`AsyncEngine::generate`](crate::AsyncEngine::generate) for abort-on-drop.
///
/// [`RequestStream`]: super::RequestStream
#[derive(Debug)]
pub struct ItemStream<T> {
    request_id: String,
    /// The underlying channel receiver
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> ItemStream<T> {
    pub(crate) fn new(request_id: String, receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            request_id,
            receiver,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl<T> Stream for ItemStream<T> {
    type Item = T;
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_recv(cx)
    }
}
