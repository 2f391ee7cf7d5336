mod event;
mod item_stream;
mod output;
mod request_stream;

pub use event::NewRequestEvent;
pub use item_stream::ItemStream;
pub use output::{RequestOutput, StreamItem};
pub use request_stream::RequestStream;
