//! Server-sent event decoding shared by every provider
//!
//! A [`StreamDecoder`] reads a provider response body line by line and hands
//! each `data:` payload to a provider-specific [`SseHandler`]. Two grammar
//! families are covered by the same loop:
//! - multi-event lifecycles, where `event:` lines name the payload that follows
//! - one self-contained envelope per `data:` line, optionally ended by `[DONE]`
//!
//! The decoder is single-consumer, finite and non-restartable. Once it has
//! returned end-of-stream or an error, it keeps returning that outcome.

mod decoder;

pub use decoder::{ChunkStream, StreamDecoder};

use crate::protocol::ChatStreamChunk;
use crate::providers::ProviderError;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;

/// Raw response body as a stream of byte chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// What a handler made of one `data:` payload
#[derive(Debug, Clone, PartialEq)]
pub enum SseOutcome {
    /// Emit this chunk to the consumer
    Chunk(ChatStreamChunk),
    /// Nothing to emit, keep reading
    Skip,
    /// Provider signalled the end of the stream
    Done,
}

/// Provider-specific interpretation of SSE payloads.
///
/// Handlers are stateful: lifecycle grammars remember the message id and
/// model from their opening event and stamp them on later chunks.
pub trait SseHandler: Send {
    /// Provider name used when reporting errors
    fn provider(&self) -> &str;

    /// Interpret one payload. `event` is the most recent `event:` name, if any.
    fn handle(&mut self, event: Option<&str>, data: &str) -> Result<SseOutcome, ProviderError>;
}

/// Adapt a reqwest response body into a [`ByteStream`]
pub fn response_body(response: reqwest::Response) -> ByteStream {
    use futures::TryStreamExt;

    Box::pin(response.bytes_stream().map_err(io::Error::other))
}
