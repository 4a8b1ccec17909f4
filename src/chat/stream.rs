//! Streamed response consumption.
//!
//! Bridges the event stream produced by the transport to the renderer,
//! accumulating the full reply text for the transcript. Stream failures
//! after the first byte are reported to the user but do not abort the
//! session; the transcript records a placeholder instead.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::stream::BoxStream;

use crate::chat::render::Renderer;
use crate::error::{Error, Result};
use crate::observability::{STREAM_ERRORS, STREAM_EVENTS};
use crate::types::StreamEvent;

/// What the transcript records when a stream fails partway through.
pub const STREAM_FAILURE_TEXT: &str = "(streaming failed)";

/// How many event shapes the debug report samples.
const DEBUG_SHAPE_SAMPLES: usize = 3;

/// Drains `events`, forwarding text fragments to `renderer` and returning
/// the accumulated reply.
///
/// A user interrupt aborts the turn with [`Error::Abort`]. An error from the
/// stream itself is rendered and the placeholder reply is returned so the
/// caller can keep the conversation coherent.
pub async fn stream_response(
    mut events: BoxStream<'_, Result<StreamEvent>>,
    renderer: &mut dyn Renderer,
    interrupted: &AtomicBool,
    debug: bool,
) -> Result<String> {
    let mut reply = String::new();
    let mut shapes: Vec<&'static str> = Vec::new();
    let mut text_events = 0usize;

    while let Some(event) = events.next().await {
        if interrupted.load(Ordering::SeqCst) {
            renderer.print_interrupted();
            return Err(Error::abort("response interrupted"));
        }
        match event {
            Ok(event) => {
                STREAM_EVENTS.click();
                if debug && shapes.len() < DEBUG_SHAPE_SAMPLES {
                    shapes.push(event.shape());
                }
                if let Some(text) = event.text() {
                    text_events += 1;
                    renderer.print_text(text);
                    reply.push_str(text);
                }
            }
            Err(err) => {
                STREAM_ERRORS.click();
                renderer.print_error(&err.to_string());
                return Ok(STREAM_FAILURE_TEXT.to_string());
            }
        }
    }

    renderer.finish_response();
    if debug {
        renderer.print_info(&format!(
            "[debug] {} text event(s); first shapes: {}",
            text_events,
            if shapes.is_empty() {
                "(none)".to_string()
            } else {
                shapes.join(", ")
            }
        ));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[derive(Default)]
    struct CapturingRenderer {
        text: String,
        info: Vec<String>,
        errors: Vec<String>,
        interrupted: bool,
        finished: bool,
    }

    impl Renderer for CapturingRenderer {
        fn print_text(&mut self, text: &str) {
            self.text.push_str(text);
        }

        fn print_user(&mut self, _text: &str) {}

        fn print_info(&mut self, info: &str) {
            self.info.push(info.to_string());
        }

        fn print_warning(&mut self, _warning: &str) {}

        fn print_error(&mut self, error: &str) {
            self.errors.push(error.to_string());
        }

        fn finish_response(&mut self) {
            self.finished = true;
        }

        fn print_interrupted(&mut self) {
            self.interrupted = true;
        }
    }

    fn event(json: &str) -> Result<StreamEvent> {
        Ok(serde_json::from_str(json).unwrap())
    }

    fn four_shapes() -> Vec<Result<StreamEvent>> {
        vec![
            event(r#"{"type": "content_block_delta", "delta": {"text": "A"}}"#),
            event(r#"{"completion": "B"}"#),
            event(r#"{"delta": {"text": "C"}}"#),
            event(r#"{"content": "D"}"#),
        ]
    }

    #[tokio::test]
    async fn fragments_accumulate_in_arrival_order() {
        let mut renderer = CapturingRenderer::default();
        let interrupted = AtomicBool::new(false);
        let events = stream::iter(four_shapes()).boxed();
        let reply = stream_response(events, &mut renderer, &interrupted, false)
            .await
            .unwrap();
        assert_eq!(reply, "ABCD");
        assert_eq!(renderer.text, "ABCD");
        assert!(renderer.finished);
        assert!(renderer.info.is_empty());
    }

    #[tokio::test]
    async fn unknown_events_are_skipped() {
        let mut renderer = CapturingRenderer::default();
        let interrupted = AtomicBool::new(false);
        let events = stream::iter(vec![
            event(r#"{"type": "message_start"}"#),
            event(r#"{"content": "hi"}"#),
            event(r#"{"unrelated": true}"#),
        ])
        .boxed();
        let reply = stream_response(events, &mut renderer, &interrupted, false)
            .await
            .unwrap();
        assert_eq!(reply, "hi");
    }

    #[tokio::test]
    async fn mid_stream_errors_yield_a_placeholder() {
        let mut renderer = CapturingRenderer::default();
        let interrupted = AtomicBool::new(false);
        let events = stream::iter(vec![
            event(r#"{"content": "partial"}"#),
            Err(Error::streaming("connection reset", None)),
            event(r#"{"content": "never seen"}"#),
        ])
        .boxed();
        let reply = stream_response(events, &mut renderer, &interrupted, false)
            .await
            .unwrap();
        assert_eq!(reply, STREAM_FAILURE_TEXT);
        assert_eq!(renderer.errors.len(), 1);
        assert!(!renderer.finished);
    }

    #[tokio::test]
    async fn interrupts_abort_the_turn() {
        let mut renderer = CapturingRenderer::default();
        let interrupted = AtomicBool::new(true);
        let events = stream::iter(four_shapes()).boxed();
        let err = stream_response(events, &mut renderer, &interrupted, false)
            .await
            .unwrap_err();
        assert!(err.is_abort());
        assert!(renderer.interrupted);
        assert!(renderer.text.is_empty());
    }

    #[tokio::test]
    async fn debug_reports_shapes_and_counts() {
        let mut renderer = CapturingRenderer::default();
        let interrupted = AtomicBool::new(false);
        let events = stream::iter(four_shapes()).boxed();
        let reply = stream_response(events, &mut renderer, &interrupted, true)
            .await
            .unwrap();
        assert_eq!(reply, "ABCD");
        assert_eq!(renderer.info.len(), 1);
        assert!(renderer.info[0].contains("4 text event(s)"));
        assert!(renderer.info[0].contains("tagged, completion, delta"));
    }
}
