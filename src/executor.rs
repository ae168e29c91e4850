//! Stream executor: turns assembled history into model input and drives
//! the model's reply stream into a thread poster.
//!
//! The model SDK itself is an external collaborator: this module only
//! sees a `Stream` of text deltas and the ordered chat messages it
//! builds from Slack history.

use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::chunker::{BoxError, ChunkerError};
use crate::gate;
use crate::poster::SlackChunker;
use crate::slack::HistoryMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One ordered model-input message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("model stream failed: {0}")]
    Stream(#[source] BoxError),
    #[error(transparent)]
    Chunker(#[from] ChunkerError),
}

/// Converts thread history into ordered chat input.
///
/// Bot messages become assistant turns verbatim. User messages lose the
/// mention token, drop out entirely when nothing remains, and are
/// prefixed with the author and send time so the model can follow
/// multi-party threads.
pub fn build_chat_input(bot_user_id: &str, messages: &[HistoryMessage]) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    for message in messages {
        if message.user.as_deref() == Some(bot_user_id) {
            out.push(ChatMessage { role: Role::Assistant, content: message.text.clone() });
            continue;
        }
        let Some(user) = message.user.as_deref() else {
            // System messages carry no author and no conversational value.
            continue;
        };
        let text = gate::strip_mention(bot_user_id, &message.text);
        if text.is_empty() {
            continue;
        }
        let timestamp = format_ts(&message.ts);
        out.push(ChatMessage {
            role: Role::User,
            content: format!("<@{user}> {timestamp} {text}"),
        });
    }
    out
}

/// Renders a Slack `ts` ("seconds.micros") as a human-readable UTC time.
fn format_ts(ts: &str) -> String {
    let seconds = ts.split('.').next().and_then(|part| part.parse::<i64>().ok());
    match seconds.and_then(|seconds| chrono::DateTime::from_timestamp(seconds, 0)) {
        Some(datetime) => datetime.format("%Y/%m/%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

/// Feeds each model delta into the poster, draining ready groups
/// between deltas, then finishes and drains the remainder.
///
/// A stream error aborts the feed; whatever was already posted stands.
pub async fn stream_reply<S>(mut stream: S, poster: &mut SlackChunker) -> Result<(), ReplyError>
where
    S: Stream<Item = Result<String, BoxError>> + Unpin,
{
    while let Some(delta) = stream.next().await {
        let delta = delta.map_err(ReplyError::Stream)?;
        poster.feed(&delta);
        drain(poster).await?;
    }

    poster.finish();
    drain(poster).await?;
    Ok(())
}

/// Polls `consume` until it neither emits nor advances the index (a
/// swallowed separator group advances without emitting).
async fn drain(poster: &mut SlackChunker) -> Result<(), ReplyError> {
    loop {
        let before = poster.emitted_index();
        match poster.consume().await? {
            Some(_) => {}
            None if poster.emitted_index() == before => return Ok(()),
            None => {}
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
