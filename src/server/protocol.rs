//! Line protocol for streamed answers.
//!
//! Each content fragment is one `0:"<escaped>"` line; a failure ends the body
//! with one `3:{text:"<escaped>"}` line.

use axum::body::Body;
use futures_util::stream;

use crate::history::adapter::error_description;
use crate::pipeline::{AnswerEvent, AnswerStream, PipelineError};

/// Backslash-escape `\`, `"` and newlines so a fragment fits on one line.
pub fn escape_fragment(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn fragment_line(text: &str) -> String {
    format!("0:\"{}\"\n", escape_fragment(text))
}

pub fn error_line(err: &PipelineError) -> String {
    format!(
        "3:{{text:\"{}\"}}\n",
        escape_fragment(&error_description(&err.to_string()))
    )
}

pub fn encode_event(event: &AnswerEvent) -> String {
    match event {
        AnswerEvent::Fragment(text) => fragment_line(text),
        AnswerEvent::Error(err) => error_line(err),
    }
}

/// Chunked body that flushes one line per event. Dropping the body (client
/// gone) drops the stream, which cancels generation.
pub fn answer_body(answer: AnswerStream) -> Body {
    let lines = stream::unfold(answer, |mut answer| async move {
        let event = answer.next().await?;
        let line = encode_event(&event);
        Some((Ok::<_, std::convert::Infallible>(line), answer))
    });
    Body::from_stream(lines)
}
