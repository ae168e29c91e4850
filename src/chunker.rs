//! Streaming chunker: partitions a markdown stream into post-sized groups.
//!
//! This is the stateful core of the pipeline. Incoming deltas accumulate
//! in a line buffer; only complete lines participate in parsing. Each
//! `consume` re-parses the committed lines, partitions the not-yet-emitted
//! tail into groups, and releases the first group that is safe to post —
//! never severing a construct that may still grow (an open list, table,
//! or code fence) and never revising an already-emitted prefix.

use std::ops::Range;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::ast::{self, Node, Spanned};
use crate::blocks::Block;
use crate::renderer::{self, RenderError, Rendered, SlackRenderer};

/// Soft target size of a group, in characters of source markdown.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1024;

/// Node types that can extend across future feeds and must not be
/// emitted while the stream is still running.
const MAY_CONTINUE: [&str; 3] = ["list", "table", "fenced_code"];

/// Node types with no visible contribution of their own; a group made
/// only of these is swallowed instead of posted.
const MEANINGLESS: [&str; 2] = ["thematic_break", "blank_line"];

/// A fence opener glued to the end of a prose line. The parser only
/// recognizes a fence on its own line, so such lines are split in two.
static INLINE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)```$").expect("inline fence pattern compiles"));

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Hook invoked when a rendered group fails validation, giving the
/// caller a chance to repair it (the poster uses this to turn table
/// sentinels into file uploads). Identity by default.
#[async_trait]
pub trait FixRendered: Send + Sync {
    async fn fix_rendered(&mut self, rendered: Vec<Rendered>) -> Result<Vec<Rendered>, BoxError> {
        Ok(rendered)
    }
}

/// The no-op fix used when no adapter wraps the chunker.
pub struct NoFix;

#[async_trait]
impl FixRendered for NoFix {}

/// One released group: the block tree to post and the markdown source
/// it was rendered from (the plain-text fallback).
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub blocks: Vec<Block>,
    pub reference_md: String,
}

#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("failed to render group: {0}")]
    Render(#[from] RenderError),
    #[error("rendered group failed validation after fix: {blocks}")]
    Invalid { blocks: String },
    #[error("fix_rendered hook failed: {0}")]
    Fix(#[source] BoxError),
}

/// Incremental markdown-to-blocks chunker.
///
/// Created once per reply turn: `feed` any number of times, poll
/// `consume` between feeds, then `finish` and drain.
pub struct Chunker<F = NoFix> {
    /// Committed lines, right-trimmed, no trailing newline per element.
    lines: Vec<String>,
    /// Bytes after the last newline; never contains `\n`.
    buffer: String,
    /// First not-yet-emitted top-level node. Monotonic.
    index: usize,
    finished: bool,
    max_chunk_size: usize,
    fixer: F,
}

impl Chunker<NoFix> {
    pub fn new(max_chunk_size: usize) -> Self {
        Self::with_fixer(max_chunk_size, NoFix)
    }
}

impl<F: FixRendered> Chunker<F> {
    pub fn with_fixer(max_chunk_size: usize, fixer: F) -> Self {
        Self {
            lines: Vec::new(),
            buffer: String::new(),
            index: 0,
            finished: false,
            max_chunk_size,
            fixer,
        }
    }

    /// Appends a stream delta. Everything up to the last newline is
    /// committed as lines; the residue stays buffered.
    pub fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        if let Some(pos) = self.buffer.rfind('\n') {
            let rest = self.buffer.split_off(pos + 1);
            let complete = std::mem::replace(&mut self.buffer, rest);
            for line in complete[..pos].split('\n') {
                self.push_line(line);
            }
        }
    }

    /// Flushes the buffer and marks the stream complete. After this, a
    /// finite number of `consume` calls drains all remaining content.
    pub fn finish(&mut self) -> &[String] {
        self.finished = true;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            for line in rest.split('\n') {
                self.push_line(line);
            }
        }
        &self.lines
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of top-level nodes already emitted or swallowed. Drain
    /// loops use this to detect progress on `None` returns (a swallowed
    /// separator group advances the index without emitting).
    pub fn emitted_index(&self) -> usize {
        self.index
    }

    /// Attempts to release the next ready group.
    ///
    /// Returns `None` when nothing is safe to emit yet; callers should
    /// re-poll after the next feed (or immediately after a `None` that
    /// advanced [`emitted_index`], which marks a swallowed group).
    pub async fn consume(&mut self) -> Result<Option<Emitted>, ChunkerError> {
        let source = self.lines.join("\n");
        let nodes = ast::parse_document(&source);
        if self.index >= nodes.len() {
            return Ok(None);
        }
        let tail = &nodes[self.index..];

        let groups = split_groups(tail, &source, self.max_chunk_size);
        let Some(last_group) = groups.last() else {
            return Ok(None);
        };

        // The final group may still grow across future feeds.
        let releasable_len = if self.finished || !may_continue(tail, last_group) {
            groups.len()
        } else {
            groups.len() - 1
        };
        if releasable_len == 0 {
            return Ok(None);
        }

        let first = groups[0].clone();

        // Separator-only groups are swallowed: platforms collapse runs
        // of horizontal rules into visible noise.
        if is_empty_group(tail, &first) {
            self.index += first.len();
            return Ok(None);
        }

        let reference_md = group_markdown(&source, tail, &first).to_string();

        // On a slow stream, holding back the lone ready group avoids
        // fragmenting the reply into many tiny messages.
        if releasable_len == 1
            && !self.finished
            && source.chars().count() < self.max_chunk_size
        {
            return Ok(None);
        }

        self.index += first.len();

        let group_nodes: Vec<Node> =
            tail[first].iter().map(|spanned| spanned.node.clone()).collect();
        let mut rendered = SlackRenderer::new().render(&group_nodes)?;
        if !renderer::validate(&rendered) {
            rendered = self.fixer.fix_rendered(rendered).await.map_err(ChunkerError::Fix)?;
            if !renderer::validate(&rendered) {
                return Err(ChunkerError::Invalid { blocks: format!("{rendered:?}") });
            }
        }

        Ok(Some(Emitted { blocks: renderer::postprocess(rendered), reference_md }))
    }

    fn push_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\n', ' ']);
        if let Some(caps) = INLINE_FENCE_RE.captures(line) {
            if let Some(lead) = caps.get(1) {
                self.lines.push(lead.as_str().to_string());
                self.lines.push("```".to_string());
                return;
            }
        }
        self.lines.push(line.to_string());
    }
}

// ── Group partition ──────────────────────────────────────────────────────────

/// Partitions the unemitted tail into groups, each the unit posted as
/// one message. Index ranges are relative to `tail`.
fn split_groups(tail: &[Spanned], source: &str, max_chunk_size: usize) -> Vec<Range<usize>> {
    let mut groups: Vec<Range<usize>> = Vec::new();
    let mut start = 0;

    for (i, spanned) in tail.iter().enumerate() {
        match spanned.node.node_type() {
            // A table is always a singleton group.
            "table" => {
                if start < i {
                    groups.push(start..i);
                }
                groups.push(i..i + 1);
                start = i + 1;
                continue;
            }
            // A horizontal rule closes the current group and opens the
            // next one with itself.
            "thematic_break" => {
                if start < i {
                    groups.push(start..i);
                }
                start = i;
            }
            _ => {}
        }

        let markdown = &source[tail[start].source_range.start..tail[i].source_range.end];
        if markdown.chars().count() > max_chunk_size * 2 {
            groups.push(start..i + 1);
            start = i + 1;
        }
    }

    if start < tail.len() {
        groups.push(start..tail.len());
    }
    groups
}

fn may_continue(tail: &[Spanned], group: &Range<usize>) -> bool {
    tail.get(group.end - 1)
        .is_some_and(|spanned| MAY_CONTINUE.contains(&spanned.node.node_type()))
}

fn is_empty_group(tail: &[Spanned], group: &Range<usize>) -> bool {
    tail[group.clone()]
        .iter()
        .all(|spanned| MEANINGLESS.contains(&spanned.node.node_type()))
}

/// The markdown source of a group, sliced verbatim between its first
/// and last node.
fn group_markdown<'a>(source: &'a str, tail: &[Spanned], group: &Range<usize>) -> &'a str {
    let first = &tail[group.start];
    let last = &tail[group.end - 1];
    &source[first.source_range.start..last.source_range.end]
}

#[cfg(test)]
#[path = "chunker_tests.rs"]
mod tests;
