//! Server-sent event framing and the stream decode task.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use barebone_core::error::Error;
use barebone_core::provider::{EventReceiver, ToolDefinition};
use barebone_core::stream::{SseEvent, StreamDecoder, StreamParser};

use crate::transport::ByteStream;

/// Buffer size of the event channel between the decode task and the consumer.
const EVENT_BUFFER: usize = 64;

/// Splits a byte stream into server-sent events.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(line_end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.trim().to_string()),
                "data" => self.data.push(value.to_string()),
                other => trace!(field = other, "Ignoring SSE field"),
            }
        }

        events
    }

    /// Flush an event left open when the stream ends without a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            if let Some(event) = self.feed(b"\n").pop() {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Decode a provider byte stream into stream events on a spawned task.
///
/// The task ends after `Done`, after the first error, or when the receiver
/// is dropped; dropping the byte stream cancels the underlying request.
/// A byte stream that ends before the provider's completion signal yields
/// `StreamTruncated`.
pub fn decode_stream(
    mut bytes: ByteStream,
    mut parser: Box<dyn StreamParser>,
    tools: Vec<ToolDefinition>,
) -> EventReceiver {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let mut decoder = StreamDecoder::new(&tools);
        let mut sse = SseBuffer::new();

        loop {
            let chunk = tokio::select! {
                _ = tx.closed() => {
                    debug!("Stream consumer dropped, cancelling request");
                    return;
                }
                chunk = bytes.next() => chunk,
            };

            let events = match chunk {
                Some(Ok(chunk)) => sse.feed(&chunk),
                Some(Err(e)) => {
                    debug!(error = %e, "Provider stream interrupted");
                    decoder.truncate();
                    let _ = tx.send(Err(Error::StreamTruncated(e.to_string()))).await;
                    return;
                }
                None => {
                    let tail: Vec<SseEvent> = sse.finish().into_iter().collect();
                    if !forward(tail, parser.as_mut(), &mut decoder, &tx).await {
                        return;
                    }
                    if !decoder.is_terminal() {
                        let _ = tx.send(Err(decoder.truncate())).await;
                    }
                    return;
                }
            };

            if !forward(events, parser.as_mut(), &mut decoder, &tx).await {
                return;
            }
        }
    });

    rx
}

/// Push events through parser and decoder. Returns `false` once the task should stop.
async fn forward(
    events: Vec<SseEvent>,
    parser: &mut dyn StreamParser,
    decoder: &mut StreamDecoder,
    tx: &mpsc::Sender<barebone_core::Result<barebone_core::StreamEvent>>,
) -> bool {
    for event in events {
        let provider_events = match parser.parse(&event) {
            Ok(events) => events,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return false;
            }
        };
        for provider_event in provider_events {
            if let Some(stream_event) = decoder.push(provider_event) {
                if tx.send(Ok(stream_event)).await.is_err() {
                    return false;
                }
            }
            if decoder.is_terminal() {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use barebone_core::stream::ProviderEvent;
    use barebone_core::{Result, StreamEvent};

    #[test]
    fn frames_events_across_chunks() {
        let mut sse = SseBuffer::new();
        assert!(sse.feed(b"event: message_start\nda").is_empty());
        let events = sse.feed(b"ta: {\"a\":1}\n\n: keep-alive\n\ndata: x\r\n\r\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: Some("message_start".into()),
                    data: "{\"a\":1}".into()
                },
                SseEvent {
                    event: None,
                    data: "x".into()
                },
            ]
        );
    }

    #[test]
    fn handles_split_utf8() {
        let mut sse = SseBuffer::new();
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(sse.feed(&bytes[..split]).is_empty());
        let events = sse.feed(&bytes[split..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut sse = SseBuffer::new();
        sse.feed(b"data: [DONE]");
        assert_eq!(sse.finish().map(|e| e.data).as_deref(), Some("[DONE]"));
        assert!(sse.finish().is_none());
    }

    /// `data: text:<t>` → Text, `data: done` → Completed.
    struct LineParser;

    impl StreamParser for LineParser {
        fn parse(&mut self, event: &SseEvent) -> Result<Vec<ProviderEvent>> {
            Ok(match event.data.strip_prefix("text:") {
                Some(text) => vec![ProviderEvent::Text(text.to_string())],
                None if event.data == "done" => vec![ProviderEvent::Completed],
                None => vec![],
            })
        }
    }

    fn byte_stream(chunks: Vec<&'static str>) -> ByteStream {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec()))).boxed()
    }

    #[tokio::test]
    async fn decode_stream_until_done() {
        let bytes = byte_stream(vec!["data: text:Hello\n\n", "data: text: world\n\ndata: done\n\n", "data: text:ignored\n\n"]);
        let mut rx = decode_stream(bytes, Box::new(LineParser), vec![]);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event.unwrap());
        }
        assert_eq!(events.len(), 3);
        match events.last() {
            Some(StreamEvent::Done { response }) => {
                assert_eq!(response.content.as_deref(), Some("Hello world"))
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn decode_stream_reports_truncation() {
        let bytes = byte_stream(vec!["data: text:partial\n\n"]);
        let mut rx = decode_stream(bytes, Box::new(LineParser), vec![]);

        assert!(matches!(rx.recv().await, Some(Ok(StreamEvent::TextDelta { .. }))));
        assert!(matches!(rx.recv().await, Some(Err(Error::StreamTruncated(_)))));
        assert!(rx.recv().await.is_none());
    }
}
