//! Server-Sent Events (SSE) processing for streaming responses.
//!
//! This module converts the raw byte stream of a streaming HTTP response
//! into a stream of decoded [`StreamEvent`]s, handling SSE framing,
//! buffering, and error conditions.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::error::{Error, Result};
use crate::types::StreamEvent;

/// One parsed SSE frame.
enum SseFrame {
    /// A decoded event (or a decode failure to surface).
    Event(Result<StreamEvent>),
    /// The explicit end-of-stream marker.
    Done,
    /// A frame with no data payload (comments, keep-alives).
    Empty,
}

/// Process a stream of bytes into a stream of incremental events.
///
/// The returned stream is lazy and finite: it ends when the underlying HTTP
/// stream ends or when the provider sends the `[DONE]` marker.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin + 'static,
{
    // Convert reqwest errors to our error type
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    // Use a state machine to process the SSE stream
    let buffer = String::new();

    stream::unfold(
        (stream, buffer),
        move |(mut stream, mut buffer)| async move {
            loop {
                // First check if we have a complete frame in the buffer
                if let Some((frame, remaining)) = extract_frame(&buffer) {
                    buffer = remaining;
                    match frame {
                        SseFrame::Event(event) => return Some((event, (stream, buffer))),
                        SseFrame::Done => return None,
                        SseFrame::Empty => continue,
                    }
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => buffer.push_str(&text),
                        Err(e) => {
                            return Some((
                                Err(Error::encoding(
                                    format!("Invalid UTF-8 in stream: {e}"),
                                    Some(Box::new(e)),
                                )),
                                (stream, buffer),
                            ));
                        }
                    },
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer)));
                    }
                    None => {
                        // End of stream; flush anything still buffered
                        if !buffer.is_empty() {
                            if let Some((SseFrame::Event(event), remaining)) =
                                extract_frame(&buffer)
                            {
                                buffer = remaining;
                                return Some((event, (stream, buffer)));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Extract a complete SSE frame from the buffer.
///
/// Frames are delimited by double newlines. The data payload is the `data:`
/// line; the event-type line and comments are ignored, since the decoded
/// JSON carries its own type tag.
fn extract_frame(buffer: &str) -> Option<(SseFrame, String)> {
    let (frame_text, rest) = buffer.split_once("\n\n")?;
    let rest = rest.to_string();

    let mut data = None;
    for line in frame_text.lines() {
        if let Some(payload) = line.strip_prefix("data:") {
            data = Some(payload.trim());
        }
    }

    match data {
        Some("[DONE]") => Some((SseFrame::Done, rest)),
        Some(json_str) => {
            let event = serde_json::from_str::<StreamEvent>(json_str).map_err(|e| {
                Error::serialization(
                    format!("Failed to parse event JSON: {e}"),
                    Some(Box::new(e)),
                )
            });
            Some((SseFrame::Event(event), rest))
        }
        None => Some((SseFrame::Empty, rest)),
    }
}
