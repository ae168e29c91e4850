//! Poster adapter: ships emitted groups to a Slack thread.
//!
//! Wraps the chunker with the two platform-specific behaviors: lowering
//! table sentinels into CSV file uploads, and posting every released
//! group with the markdown reference as the plain-text fallback plus a
//! metadata envelope carrying the raw text for later retrieval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::blocks::{RichTextElement, SectionElement};
use crate::chunker::{BoxError, Chunker, ChunkerError, Emitted, FixRendered};
use crate::renderer::Rendered;
use crate::slack::{MessageMetadata, PostMessage, SlackApi};

/// Metadata event type attached to block posts.
pub const BLOCKS_EVENT_TYPE: &str = "slackdown_blocks";

/// Stub shown in place of a table after its CSV has been uploaded.
const TABLE_EMBEDDED_STUB: &str = "[table embedded]";

/// Repairs a lone table sentinel by uploading the CSV to the thread and
/// substituting a stub section.
struct TableEmbed {
    client: Arc<dyn SlackApi>,
    channel: String,
    thread_ts: String,
}

#[async_trait]
impl FixRendered for TableEmbed {
    async fn fix_rendered(&mut self, rendered: Vec<Rendered>) -> Result<Vec<Rendered>, BoxError> {
        if rendered.len() == 1 {
            if let Rendered::EmbedFile { name, content } = &rendered[0] {
                self.client
                    .files_upload(
                        &self.channel,
                        &self.thread_ts,
                        name,
                        content.clone().into_bytes(),
                    )
                    .await
                    .map_err(|error| Box::new(error) as BoxError)?;
                return Ok(vec![Rendered::Element(RichTextElement::Section {
                    elements: vec![SectionElement::text(TABLE_EMBEDDED_STUB)],
                })]);
            }
        }
        Ok(rendered)
    }
}

/// A chunker bound to one Slack thread.
///
/// Reply order is preserved by construction: one poster per active
/// generation, posts serialized with a configured inter-post delay.
pub struct SlackChunker {
    chunker: Chunker<TableEmbed>,
    client: Arc<dyn SlackApi>,
    channel: String,
    thread_ts: String,
    post_delay: Duration,
}

impl SlackChunker {
    pub fn new(
        client: Arc<dyn SlackApi>,
        channel: impl Into<String>,
        thread_ts: impl Into<String>,
        max_chunk_size: usize,
        post_delay: Duration,
    ) -> Self {
        let channel = channel.into();
        let thread_ts = thread_ts.into();
        let fixer = TableEmbed {
            client: Arc::clone(&client),
            channel: channel.clone(),
            thread_ts: thread_ts.clone(),
        };
        Self {
            chunker: Chunker::with_fixer(max_chunk_size, fixer),
            client,
            channel,
            thread_ts,
            post_delay,
        }
    }

    pub fn feed(&mut self, chunk: &str) {
        self.chunker.feed(chunk);
    }

    pub fn finish(&mut self) -> &[String] {
        self.chunker.finish()
    }

    pub fn emitted_index(&self) -> usize {
        self.chunker.emitted_index()
    }

    /// Releases the next ready group and posts it to the thread.
    ///
    /// A failed block post is retried once with the plain-text fallback
    /// only; a second failure drops the group and the stream continues.
    pub async fn consume(&mut self) -> Result<Option<Emitted>, ChunkerError> {
        let Some(emitted) = self.chunker.consume().await? else {
            return Ok(None);
        };

        debug!(
            chars = emitted.reference_md.chars().count(),
            blocks = emitted.blocks.len(),
            "posting group"
        );

        let message = PostMessage {
            channel: self.channel.clone(),
            thread_ts: Some(self.thread_ts.clone()),
            text: Some(emitted.reference_md.clone()),
            blocks: Some(emitted.blocks.clone()),
            metadata: Some(MessageMetadata {
                event_type: BLOCKS_EVENT_TYPE.to_string(),
                event_payload: serde_json::json!({"raw_text": emitted.reference_md}),
            }),
        };

        if let Err(post_error) = self.client.post_message(message).await {
            let blocks_json = serde_json::to_string(&emitted.blocks).unwrap_or_default();
            error!(%post_error, blocks = %blocks_json, "block post failed, retrying as text");

            let fallback = PostMessage {
                channel: self.channel.clone(),
                thread_ts: Some(self.thread_ts.clone()),
                text: Some(emitted.reference_md.clone()),
                ..Default::default()
            };
            if let Err(fallback_error) = self.client.post_message(fallback).await {
                error!(%fallback_error, "text fallback failed, dropping group");
            }
        }

        // Pace successive posts in the thread.
        tokio::time::sleep(self.post_delay).await;

        Ok(Some(emitted))
    }
}

#[cfg(test)]
#[path = "poster_tests.rs"]
mod tests;
