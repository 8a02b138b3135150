use super::{ByteStream, SseHandler, SseOutcome};
use crate::protocol::ChatStreamChunk;
use crate::providers::ProviderError;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

type LineReader = Lines<BufReader<StreamReader<ByteStream, Bytes>>>;

/// Stream of canonical chunks, ending after the last chunk or the first error
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatStreamChunk, ProviderError>> + Send>>;

#[derive(Debug)]
enum DecoderState {
    Open,
    Finished,
    Closed,
    Failed(ProviderError),
}

/// Pull-based decoder from an SSE body to canonical stream chunks
pub struct StreamDecoder {
    lines: Option<LineReader>,
    handler: Box<dyn SseHandler>,
    pending_event: Option<String>,
    state: DecoderState,
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("provider", &self.handler.provider())
            .field("state", &self.state)
            .finish()
    }
}

impl StreamDecoder {
    /// Create a decoder reading `body` and interpreting payloads with `handler`
    pub fn new(body: ByteStream, handler: Box<dyn SseHandler>) -> Self {
        Self {
            lines: Some(BufReader::new(StreamReader::new(body)).lines()),
            handler,
            pending_event: None,
            state: DecoderState::Open,
        }
    }

    /// Provider whose grammar this decoder speaks
    pub fn provider(&self) -> &str {
        self.handler.provider()
    }

    /// Receive the next chunk.
    ///
    /// `Ok(None)` marks the end of the stream. After `Ok(None)` or an error,
    /// every further call returns the same outcome without reading the body.
    pub async fn recv(&mut self) -> Result<Option<ChatStreamChunk>, ProviderError> {
        match &self.state {
            DecoderState::Open => {}
            DecoderState::Finished | DecoderState::Closed => return Ok(None),
            DecoderState::Failed(error) => return Err(error.clone()),
        }

        loop {
            let Some(lines) = self.lines.as_mut() else {
                return self.finish();
            };

            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return self.finish(),
                Err(err) => {
                    let error = ProviderError::network(
                        self.handler.provider(),
                        format!("stream read failed: {err}"),
                    );
                    return self.fail(error);
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(event) = line.strip_prefix("event:") {
                self.pending_event = Some(event.trim().to_string());
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };

            let event = self.pending_event.take();
            match self.handler.handle(event.as_deref(), data.trim()) {
                Ok(SseOutcome::Chunk(chunk)) => return Ok(Some(chunk)),
                Ok(SseOutcome::Skip) => continue,
                Ok(SseOutcome::Done) => return self.finish(),
                Err(error) => return self.fail(error),
            }
        }
    }

    /// Like [`recv`](Self::recv), but gives up when `cancel` fires.
    ///
    /// Cancellation closes the body and leaves the decoder failed with
    /// [`ProviderError::Cancelled`].
    pub async fn recv_with_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<ChatStreamChunk>, ProviderError> {
        if !matches!(self.state, DecoderState::Open) {
            return self.recv().await;
        }
        if cancel.is_cancelled() {
            let error = ProviderError::cancelled(self.handler.provider());
            return self.fail(error);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let error = ProviderError::cancelled(self.handler.provider());
                self.fail(error)
            }
            result = self.recv() => result,
        }
    }

    /// Release the response body. Safe to call more than once.
    pub fn close(&mut self) {
        if self.lines.take().is_some() {
            tracing::debug!(provider = %self.handler.provider(), "stream closed by consumer");
        }
        if matches!(self.state, DecoderState::Open) {
            self.state = DecoderState::Closed;
        }
    }

    /// Whether the decoder reached a terminal state
    pub fn is_terminated(&self) -> bool {
        !matches!(self.state, DecoderState::Open)
    }

    /// Adapt the decoder into a [`futures::Stream`]
    pub fn into_stream(self) -> ChunkStream {
        Box::pin(futures::stream::unfold(Some(self), |decoder| async move {
            let mut decoder = decoder?;
            match decoder.recv().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(decoder))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        }))
    }

    fn finish(&mut self) -> Result<Option<ChatStreamChunk>, ProviderError> {
        self.lines = None;
        self.state = DecoderState::Finished;
        Ok(None)
    }

    fn fail(&mut self, error: ProviderError) -> Result<Option<ChatStreamChunk>, ProviderError> {
        self.lines = None;
        self.state = DecoderState::Failed(error.clone());
        Err(error)
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageDelta, StreamChoice};
    use crate::providers::ErrorKind;
    use futures::StreamExt;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Emits every payload as text, `STOP` ends, `FAIL` errors, `SKIP` skips
    struct EchoHandler;

    impl SseHandler for EchoHandler {
        fn provider(&self) -> &str {
            "echo"
        }

        fn handle(&mut self, _event: Option<&str>, data: &str) -> Result<SseOutcome, ProviderError> {
            match data {
                "STOP" => Ok(SseOutcome::Done),
                "SKIP" => Ok(SseOutcome::Skip),
                "FAIL" => Err(ProviderError::parse("echo", "bad payload")),
                text => Ok(SseOutcome::Chunk(ChatStreamChunk {
                    id: "echo".into(),
                    model: "echo".into(),
                    choices: vec![StreamChoice {
                        index: 0,
                        delta: MessageDelta {
                            content: Some(text.to_string()),
                            ..Default::default()
                        },
                        finish_reason: None,
                    }],
                    usage: None,
                })),
            }
        }
    }

    fn body(parts: &[&'static str]) -> ByteStream {
        let items: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|part| Ok(Bytes::from_static(part.as_bytes())))
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    fn decoder(parts: &[&'static str]) -> StreamDecoder {
        StreamDecoder::new(
            body(parts),
            Box::new(EchoHandler),
        )
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        let mut decoder = decoder(&["da", "ta: hel", "lo\n\n", "data: world\n"]);
        assert_eq!(decoder.recv().await.unwrap().unwrap().text(), Some("hello"));
        assert_eq!(decoder.recv().await.unwrap().unwrap().text(), Some("world"));
        assert!(decoder.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ignores_comments_and_unknown_fields() {
        let mut decoder = decoder(&[": keep-alive\nid: 7\nretry: 10\n\ndata: SKIP\ndata: ok\n"]);
        assert_eq!(decoder.recv().await.unwrap().unwrap().text(), Some("ok"));
        assert!(decoder.recv().await.unwrap().is_none());
    }

    struct RecordingHandler {
        events: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl SseHandler for RecordingHandler {
        fn provider(&self) -> &str {
            "recording"
        }

        fn handle(&mut self, event: Option<&str>, _data: &str) -> Result<SseOutcome, ProviderError> {
            self.events.lock().unwrap().push(event.map(str::to_string));
            Ok(SseOutcome::Skip)
        }
    }

    #[tokio::test]
    async fn event_name_applies_to_next_data_only() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut decoder = StreamDecoder::new(
            body(&["event: first\ndata: a\ndata: b\nevent:second\ndata: c\n"]),
            Box::new(RecordingHandler {
                events: Arc::clone(&events),
            }),
        );
        assert!(decoder.recv().await.unwrap().is_none());
        assert_eq!(
            *events.lock().unwrap(),
            vec![Some("first".to_string()), None, Some("second".to_string())]
        );
    }

    #[tokio::test]
    async fn end_of_stream_is_sticky() {
        let mut decoder = decoder(&["data: STOP\ndata: never\n"]);
        assert!(decoder.recv().await.unwrap().is_none());
        assert!(decoder.recv().await.unwrap().is_none());
        assert!(decoder.is_terminated());
    }

    #[tokio::test]
    async fn errors_are_sticky() {
        let mut decoder = decoder(&["data: FAIL\ndata: later\n"]);
        let first = decoder.recv().await.unwrap_err();
        let second = decoder.recv().await.unwrap_err();
        assert_eq!(first.kind(), ErrorKind::Parse);
        assert_eq!(second.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_stream() {
        let mut decoder = decoder(&["data: a\ndata: b\n"]);
        assert!(decoder.recv().await.unwrap().is_some());
        decoder.close();
        decoder.close();
        assert!(decoder.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_after_error_keeps_error() {
        let mut decoder = decoder(&["data: FAIL\n"]);
        assert!(decoder.recv().await.is_err());
        decoder.close();
        assert!(decoder.recv().await.is_err());
    }

    #[tokio::test]
    async fn body_read_errors_become_network_errors() {
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: a\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut decoder = StreamDecoder::new(
            Box::pin(futures::stream::iter(items)),
            Box::new(EchoHandler),
        );
        assert!(decoder.recv().await.unwrap().is_some());
        assert_eq!(decoder.recv().await.unwrap_err().kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_body() {
        let pending: ByteStream = Box::pin(futures::stream::pending());
        let mut decoder = StreamDecoder::new(
            pending,
            Box::new(EchoHandler),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let error = decoder.recv_with_cancel(&cancel).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_eq!(decoder.recv().await.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn into_stream_stops_after_first_error() {
        let stream = decoder(&["data: a\ndata: FAIL\ndata: b\n"]).into_stream();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
