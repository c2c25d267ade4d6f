//! Frame decoder for the streamed chat response
//!
//! Frames are separated by a blank line. Decoding order for a `data:` frame:
//! 1. The end sentinel ends the answer text.
//! 2. A JSON object with a `session` key assigns the session id.
//! 3. A JSON object with an `actions` array is an action batch.
//! 4. Anything else (including JSON that fails to parse) is a text delta.
//!
//! `agent_actions:` frames are the legacy action batch; a malformed one is
//! dropped. Decoding never fails.

use crate::protocol::{markers, parse_actions, AgentAction};
use crate::Result;
use futures::{ready, Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

const FRAME_SEPARATOR: &[u8] = b"\n\n";

/// A decoded protocol event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next slice of the answer text
    TextDelta(String),
    /// The answer text is complete
    EndOfTurn,
    /// Server-assigned conversation id
    SessionAssigned(String),
    /// Directives to apply once the turn completes
    ActionBatch {
        actions: Vec<AgentAction>,
        session_id: Option<String>,
    },
}

/// Incremental decoder: feed it raw chunks, get complete events back.
///
/// Bytes are buffered until a whole frame is available, so a frame (or a
/// multi-byte character) split across chunks decodes the same as an unsplit
/// one.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known not to start a separator
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.find_separator() {
            let frame: Vec<u8> = self.buffer.drain(..pos + FRAME_SEPARATOR.len()).collect();
            self.scanned = 0;
            if let Some(event) = decode_frame(&String::from_utf8_lossy(&frame[..pos])) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing frame that was not followed by a blank line
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            return Vec::new();
        }
        decode_frame(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }

    fn find_separator(&mut self) -> Option<usize> {
        let found = self.buffer[self.scanned..]
            .windows(FRAME_SEPARATOR.len())
            .position(|w| w == FRAME_SEPARATOR)
            .map(|p| p + self.scanned);
        if found.is_none() {
            // Keep the last byte: it may be the first half of a separator
            self.scanned = self.buffer.len().saturating_sub(FRAME_SEPARATOR.len() - 1);
        }
        found
    }
}

/// Decode one frame (without its trailing blank line)
pub fn decode_frame(frame: &str) -> Option<StreamEvent> {
    let frame = frame.trim_start_matches(['\r', '\n']);

    if let Some(rest) = frame.strip_prefix(markers::DATA) {
        let payload = rest.strip_prefix(' ').unwrap_or(rest);
        return decode_data_payload(payload);
    }

    if let Some(rest) = frame.strip_prefix(markers::AGENT_ACTIONS) {
        return decode_legacy_actions(rest.trim());
    }

    if !frame.trim().is_empty() {
        let preview: String = frame.chars().take(80).collect();
        debug!("Ignoring unknown frame: {}", preview);
    }
    None
}

fn is_end_sentinel(payload: &str) -> bool {
    payload == markers::END_SENTINEL || payload.trim_end() == markers::END_SENTINEL.trim_end()
}

fn decode_data_payload(payload: &str) -> Option<StreamEvent> {
    if is_end_sentinel(payload) {
        return Some(StreamEvent::EndOfTurn);
    }
    if payload.is_empty() {
        return None;
    }

    if payload.trim_start().starts_with('{') {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(payload) {
            if let Some(id) = session_id_of(&obj) {
                return Some(StreamEvent::SessionAssigned(id));
            }
            if let Some(actions) = obj.get("actions").and_then(parse_actions) {
                return Some(StreamEvent::ActionBatch {
                    actions,
                    session_id: string_field(&obj, "session_id"),
                });
            }
        }
        debug!("Structured-looking payload not recognised, treating as text");
    }

    Some(StreamEvent::TextDelta(payload.to_string()))
}

fn decode_legacy_actions(payload: &str) -> Option<StreamEvent> {
    let value = match serde_json::from_str::<Value>(payload) {
        Ok(v) => v,
        Err(e) => {
            debug!("Dropping malformed agent_actions frame: {}", e);
            return None;
        }
    };

    match &value {
        Value::Array(_) => parse_actions(&value).map(|actions| StreamEvent::ActionBatch {
            actions,
            session_id: None,
        }),
        Value::Object(obj) => match obj.get("actions").and_then(parse_actions) {
            Some(actions) => Some(StreamEvent::ActionBatch {
                actions,
                session_id: string_field(obj, "session_id"),
            }),
            None => {
                debug!("Dropping agent_actions frame without an actions array");
                None
            }
        },
        _ => None,
    }
}

/// Session frames carry the id in `session_id`; older servers put it in
/// `session` directly or in `session.id`.
fn session_id_of(obj: &Map<String, Value>) -> Option<String> {
    let session = obj.get("session")?;
    string_field(obj, "session_id")
        .or_else(|| session.as_str().map(str::to_string))
        .or_else(|| session.get("id").and_then(|v| v.as_str()).map(str::to_string))
        .filter(|id| !id.trim().is_empty())
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Lazy event stream over a chunked byte stream.
///
/// Yields decoded events in arrival order. When the byte stream ends, any
/// trailing frame is flushed. A transport error is yielded once and ends the
/// stream.
pub struct FrameStream<S> {
    inner: S,
    decoder: FrameDecoder,
    pending: VecDeque<StreamEvent>,
    closed: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            closed: false,
        }
    }
}

impl<S> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    type Item = Result<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.closed {
                return Poll::Ready(None);
            }
            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    let events = this.decoder.push(&chunk);
                    this.pending.extend(events);
                }
                Some(Err(err)) => {
                    this.closed = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.closed = true;
                    let events = this.decoder.finish();
                    this.pending.extend(events);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ActionKind;
    use crate::AssistantError;

    fn decode_all(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_delta_frames_keep_whitespace() {
        let events = decode_all(&[b"data: Hello\n\ndata: , world\n\ndata: [END] \n\n"]);
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hello".into()),
                StreamEvent::TextDelta(", world".into()),
                StreamEvent::EndOfTurn,
            ]
        );
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let events = decode_all(&[b"da", b"ta: Xin ch", b"\n", b"\ndata: [END", b"] \n\n"]);
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("Xin ch".into()), StreamEvent::EndOfTurn]
        );
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let bytes = "data: Nguyễn\n\n".as_bytes();
        // Split inside the multi-byte 'ễ'
        let cut = "data: Nguy".len() + 1;
        let events = decode_all(&[&bytes[..cut], &bytes[cut..]]);
        assert_eq!(events, vec![StreamEvent::TextDelta("Nguyễn".into())]);
    }

    #[test]
    fn test_delta_with_inner_newline() {
        let events = decode_all(&[b"data: line one\nline two\n\n"]);
        assert_eq!(events, vec![StreamEvent::TextDelta("line one\nline two".into())]);
    }

    #[test]
    fn test_session_frame() {
        let events = decode_all(&[br#"data: {"session": true, "session_id": "abc"}"#, b"\n\n"]);
        assert_eq!(events, vec![StreamEvent::SessionAssigned("abc".into())]);

        let nested = decode_frame(r#"data: {"session": {"id": "xyz"}}"#);
        assert_eq!(nested, Some(StreamEvent::SessionAssigned("xyz".into())));
    }

    #[test]
    fn test_actions_frame() {
        let event = decode_frame(r#"data: {"actions": [{"type": "navigate", "target": "fees"}]}"#);
        match event {
            Some(StreamEvent::ActionBatch { actions, session_id }) => {
                assert_eq!(actions.len(), 1);
                assert_eq!(actions[0].kind, ActionKind::Navigate);
                assert_eq!(actions[0].target, "fees");
                assert!(session_id.is_none());
            }
            other => panic!("Expected ActionBatch, got {:?}", other),
        }
    }

    #[test]
    fn test_legacy_actions_frame_array_and_object() {
        let array = decode_frame(r#"agent_actions: [{"type": "navigate", "target": "dashboard"}]"#);
        assert!(matches!(array, Some(StreamEvent::ActionBatch { ref actions, .. }) if actions.len() == 1));

        let object = decode_frame(
            r#"agent_actions: {"actions": [{"type": "search", "target": "person_list", "params": {"q": "An"}}], "session_id": "s-9"}"#,
        );
        match object {
            Some(StreamEvent::ActionBatch { actions, session_id }) => {
                assert_eq!(actions[0].param("q").as_deref(), Some("An"));
                assert_eq!(session_id.as_deref(), Some("s-9"));
            }
            other => panic!("Expected ActionBatch, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_structured_frames() {
        // Shares the data marker: downgraded to text
        let broken = decode_frame(r#"data: {"actions": [oops"#);
        assert_eq!(broken, Some(StreamEvent::TextDelta(r#"{"actions": [oops"#.into())));

        // JSON object without a known key is plain text too
        let plain = decode_frame(r#"data: {"note": 1}"#);
        assert_eq!(plain, Some(StreamEvent::TextDelta(r#"{"note": 1}"#.into())));

        // Legacy marker: dropped
        assert_eq!(decode_frame("agent_actions: not json"), None);
    }

    #[test]
    fn test_unknown_frames_ignored() {
        assert_eq!(decode_frame(": keep-alive"), None);
        assert_eq!(decode_frame("event: ping"), None);
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec![StreamEvent::TextDelta("tail".into())]);
        assert!(decoder.finish().is_empty());
    }

    #[tokio::test]
    async fn test_frame_stream_yields_error_once() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: partial\n\n".to_vec()),
            Err(AssistantError::Transport("reset".into())),
            Ok(b"data: never\n\n".to_vec()),
        ];
        let mut stream = FrameStream::new(futures::stream::iter(chunks));

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::TextDelta("partial".into())
        );
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
