//! Server-Sent Events decoding for follow-mode logs and event streams.
//!
//! The controller sends one record per line (`data: {json}`), optionally
//! preceded by `event: <type>` and separated by blank lines. A message with
//! `event: done` ends the stream. Records whose data is not valid JSON are
//! skipped.

use bytes::Bytes;
use serde::de::{DeserializeOwned, IgnoredAny};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

/// Event type that terminates a stream
pub const DONE_EVENT: &str = "done";
const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event_type: String,
    /// JSON payload of a single event
    pub data: Bytes,
    /// Last `id:` seen, for resuming with `Last-Event-ID`
    pub id: Option<String>,
}

impl SseMessage {
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.data)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseFrame {
    Message(SseMessage),
    Done,
}

/// Incremental line decoder; feed it body chunks as they arrive
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event_type: Option<String>,
    last_id: Option<String>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode every complete line in `chunk` (plus anything buffered)
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while !self.done {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a final line that arrived without a trailing newline
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.done || self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.process_line(&line)
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseFrame> {
        let line = String::from_utf8_lossy(line);
        if line.is_empty() {
            self.event_type = None;
            return None;
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => {
                if value == DONE_EVENT {
                    self.done = true;
                    return Some(SseFrame::Done);
                }
                self.event_type = Some(value.to_string());
                None
            }
            "data" => {
                let event_type = self
                    .event_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EVENT.to_string());
                if serde_json::from_str::<IgnoredAny>(value).is_err() {
                    info!(event = %event_type, "skipping SSE record with malformed JSON");
                    return None;
                }
                Some(SseFrame::Message(SseMessage {
                    event_type,
                    data: Bytes::copy_from_slice(value.as_bytes()),
                    id: self.last_id.clone(),
                }))
            }
            "id" => {
                self.last_id = Some(value.to_string());
                None
            }
            "retry" => None,
            other => {
                debug!(field = other, "ignoring unknown SSE field");
                None
            }
        }
    }
}

/// Lazily decode a body into messages, ending at `event: done`, EOF or the
/// first body error. Dropping the returned stream releases the body.
pub fn decode_stream<S, E>(mut body: S) -> impl Stream<Item = Result<SseMessage, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for frame in decoder.feed(&chunk) {
                match frame {
                    SseFrame::Message(message) => yield Ok(message),
                    SseFrame::Done => return,
                }
            }
        }
        if let Some(SseFrame::Message(message)) = decoder.finish() {
            yield Ok(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn messages(frames: Vec<SseFrame>) -> Vec<SseMessage> {
        frames
            .into_iter()
            .filter_map(|f| match f {
                SseFrame::Message(m) => Some(m),
                SseFrame::Done => None,
            })
            .collect()
    }

    #[test]
    fn test_one_record_per_line() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"n\":1}\ndata: {\"n\":2}\n");
        let got = messages(frames);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].event_type, "message");
        assert_eq!(got[1].json::<serde_json::Value>().unwrap()["n"], 2);
    }

    #[test]
    fn test_records_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"msg\":\"hel").is_empty());
        let got = messages(decoder.feed(b"lo\"}\r\n\r\n"));
        assert_eq!(got.len(), 1);
        assert_eq!(&got[0].data[..], b"{\"msg\":\"hello\"}");
    }

    #[test]
    fn test_event_type_applies_until_blank_line() {
        let mut decoder = SseDecoder::new();
        let got = messages(decoder.feed(
            b"id: 7\nevent: log\ndata: {}\ndata: []\n\ndata: 1\n",
        ));
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].event_type, "log");
        assert_eq!(got[0].id.as_deref(), Some("7"));
        assert_eq!(got[1].event_type, "log");
        assert_eq!(got[2].event_type, "message");
    }

    #[test]
    fn test_malformed_json_is_skipped_not_fatal() {
        let mut decoder = SseDecoder::new();
        let got = messages(decoder.feed(b"data: {not json\n: keepalive\ndata: {\"ok\":true}\n"));
        assert_eq!(got.len(), 1);
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_done_stops_decoding() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {}\nevent: done\ndata: {}\ndata: {\"late\":1}\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], SseFrame::Done);
        assert!(decoder.is_done());
        assert!(decoder.feed(b"data: {}\n").is_empty());
    }

    #[tokio::test]
    async fn test_stream_ends_at_done() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"line\":1}\n")),
            Ok(Bytes::from_static(b"event: done\n")),
            Ok(Bytes::from_static(b"data: {\"line\":2}\n")),
        ];
        let stream = decode_stream(tokio_stream::iter(chunks));
        tokio::pin!(stream);
        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            seen.push(item.unwrap());
        }
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_flushes_unterminated_line_at_eof() {
        let chunks: Vec<Result<Bytes, io::Error>> =
            vec![Ok(Bytes::from_static(b"data: {\"tail\":true}"))];
        let stream = decode_stream(tokio_stream::iter(chunks));
        tokio::pin!(stream);
        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(&message.data[..], b"{\"tail\":true}");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_surfaces_body_error_and_stops() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {}\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"data: {}\n")),
        ];
        let stream = decode_stream(tokio_stream::iter(chunks));
        tokio::pin!(stream);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
