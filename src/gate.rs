//! Conversation gate: decides whether an inbound event starts a reply,
//! and assembles the thread history handed to the model.
//!
//! Mention events and plain messages arrive through separate listeners;
//! the gate deduplicates them (a message containing the mention token is
//! left to the mention listener) and enforces the thread participation
//! and abort rules.

use tracing::info;

use crate::slack::{HistoryMessage, MessageEvent, PostMessage, SlackApi, SlackError};

/// Metadata payload key carrying control markers on bot messages.
pub const CONTROL_MARKER_KEY: &str = "slackdown_type";
/// Marker value that freezes a thread.
pub const ABORT_MARKER: &str = "abort";
/// Text a user sends to freeze a thread.
const ABORT_COMMAND: &str = "abort";

/// Event subtypes that never trigger a reply.
const IGNORED_SUBTYPES: [&str; 2] = ["message_changed", "message_deleted"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An explicit `app_mention` event.
    Mention,
    /// An ordinary channel or thread message.
    Message,
}

/// Everything the executor needs to produce a reply.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub channel: String,
    /// Thread to reply into (the trigger's own ts when it starts one).
    pub thread_ts: String,
    /// Thread history in chronological order, the trigger last.
    pub messages: Vec<HistoryMessage>,
    /// The trigger author's locale, when the platform knows it.
    pub locale: Option<String>,
}

pub fn mention_token(bot_user_id: &str) -> String {
    format!("<@{bot_user_id}>")
}

pub fn is_app_mentioned(bot_user_id: &str, text: &str) -> bool {
    text.contains(&mention_token(bot_user_id))
}

/// Strips the bot mention token and surrounding whitespace.
pub fn strip_mention(bot_user_id: &str, text: &str) -> String {
    text.replace(&mention_token(bot_user_id), "").trim().to_string()
}

/// Applies the gating rules; on the passing path fetches the thread
/// history and assembles the reply context. `Ok(None)` means stay
/// silent.
pub async fn evaluate(
    api: &dyn SlackApi,
    bot_user_id: &str,
    event: &MessageEvent,
    kind: EventKind,
) -> Result<Option<ReplyContext>, SlackError> {
    // Never respond to ourselves.
    if event.user == bot_user_id {
        return Ok(None);
    }

    if event.subtype.as_deref().is_some_and(|subtype| IGNORED_SUBTYPES.contains(&subtype)) {
        return Ok(None);
    }

    let cleaned = strip_mention(bot_user_id, &event.text);

    match kind {
        EventKind::Mention => {
            // A bare mention with no content is noise.
            if cleaned.is_empty() {
                return Ok(None);
            }
        }
        EventKind::Message => {
            // The mention listener handles messages carrying the token.
            if is_app_mentioned(bot_user_id, &event.text) {
                return Ok(None);
            }
            // Outside a thread, only mentions wake the bot.
            if event.thread_ts.is_none() {
                return Ok(None);
            }
        }
    }

    let mut messages = Vec::new();

    if let Some(thread_ts) = event.thread_ts.as_deref() {
        let history = api.conversations_replies(&event.channel, thread_ts).await?;

        if history.has_more {
            api.post_message(PostMessage {
                channel: event.channel.clone(),
                thread_ts: Some(thread_ts.to_string()),
                text: Some("This thread is too long for me to follow.".to_string()),
                ..Default::default()
            })
            .await?;
            return Ok(None);
        }

        if kind == EventKind::Message {
            // Only join threads the bot already participates in.
            let participating = history.messages.iter().any(|message| {
                is_app_mentioned(bot_user_id, &message.text)
                    || message.user.as_deref() == Some(bot_user_id)
            });
            if !participating {
                return Ok(None);
            }

            if history.messages.iter().any(|message| is_abort(bot_user_id, message)) {
                return Ok(None);
            }
        }

        for message in history.messages {
            // The trigger is appended separately below.
            if message.ts == event.ts {
                continue;
            }
            messages.push(message);
        }
    }

    messages.push(HistoryMessage {
        user: Some(event.user.clone()),
        text: event.text.clone(),
        ts: event.ts.clone(),
        metadata: None,
    });

    info!(count = messages.len(), channel = %event.channel, "assembled reply input");

    let locale = api.users_info(&event.user).await.ok().flatten();

    Ok(Some(ReplyContext {
        channel: event.channel.clone(),
        thread_ts: event.thread_ts.clone().unwrap_or_else(|| event.ts.clone()),
        messages,
        locale,
    }))
}

/// A thread is frozen when any user said exactly `abort`, or a bot
/// message carries the abort control marker.
fn is_abort(bot_user_id: &str, message: &HistoryMessage) -> bool {
    if message.user.as_deref() != Some(bot_user_id) {
        return message.text.trim() == ABORT_COMMAND;
    }
    message.metadata.as_ref().is_some_and(|metadata| {
        metadata.event_payload.get(CONTROL_MARKER_KEY).and_then(|value| value.as_str())
            == Some(ABORT_MARKER)
    })
}

/// Posts a single human-readable error reply into the triggering thread.
pub async fn report_error(
    api: &dyn SlackApi,
    channel: &str,
    thread_ts: &str,
    error: &(dyn std::error::Error + 'static),
) {
    let mut description = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        description.push_str("\ncaused by: ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }

    if let Err(post_error) = api
        .post_message(PostMessage {
            channel: channel.to_string(),
            thread_ts: Some(thread_ts.to_string()),
            text: Some(format!("An error occurred\n{description}")),
            ..Default::default()
        })
        .await
    {
        tracing::error!(%post_error, "failed to report error to thread");
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
