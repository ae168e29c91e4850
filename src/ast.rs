//! Markdown AST: converts pulldown-cmark events into a visitable node tree.
//!
//! This module is the first stage of the conversion pipeline. It consumes
//! a markdown source string and produces a `Vec<Spanned>` — top-level
//! [`Node`]s carrying their source byte ranges — which the chunker
//! partitions into groups and the renderer lowers to Slack blocks.
//!
//! pulldown-cmark has no extension mechanism for custom inline syntax, so
//! Slack `<@U…>` / `<#C…>` references and bare URLs are lifted out of
//! merged text runs here, after event parsing.

use std::ops::Range;
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, TextMergeWithOffset};
use regex::Regex;

/// Matches a Slack user/channel reference (capture 1) or a bare URL.
///
/// The reference form mirrors what Slack itself embeds in message text:
/// `<@U…>` for users, `<#C…>` for channels.
static INLINE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<((?:@U|#C)[A-Z0-9]+)>|https?://[^\s<>]+").expect("inline token pattern compiles")
});

/// Punctuation that terminates a sentence rather than a URL.
const URL_TRAILING_PUNCTUATION: [char; 5] = ['.', ',', ';', ':', '!'];

/// A markdown AST node.
///
/// Block-level variants appear at the document top level (and inside
/// list items and quotes); inline variants appear inside paragraphs,
/// headings, emphasis runs, link bodies, and table cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A paragraph; children are inline nodes.
    Paragraph(Vec<Node>),
    /// An ATX or setext heading; rendered as its inline children only.
    Heading(Vec<Node>),
    /// An ordered or bullet list; children are `ListItem`s.
    List { ordered: bool, items: Vec<Node> },
    /// A list item; children are blocks (loose inline runs are wrapped
    /// into a paragraph during tree building).
    ListItem(Vec<Node>),
    /// A block quote; children are blocks.
    Quote(Vec<Node>),
    /// A fenced code block. The info string is dropped — the target
    /// format has no language slot.
    FencedCode(String),
    /// An indented code block.
    CodeBlock(String),
    /// A raw HTML block.
    HtmlBlock(String),
    ThematicBreak,
    /// A run of blank source lines between top-level blocks.
    BlankLine,
    /// A GFM table: rows (header row first) of cells of inline nodes.
    Table { rows: Vec<Vec<Vec<Node>>> },
    Emphasis(Vec<Node>),
    Strong(Vec<Node>),
    Strikethrough(Vec<Node>),
    CodeSpan(String),
    Link { url: String, children: Vec<Node> },
    /// A bare URL lifted out of a text run.
    AutoLink(String),
    Image { url: String, alt: Vec<Node> },
    InlineHtml(String),
    Text(String),
    /// Soft or hard line break inside a paragraph.
    LineBreak,
    /// A Slack user/channel reference; payload keeps the sigil, e.g.
    /// `@U12345678` or `#C87654321`.
    SlackReference(String),
}

impl Node {
    /// Snake-case type tag, used by the chunker's partition policy.
    pub fn node_type(&self) -> &'static str {
        match self {
            Node::Paragraph(_) => "paragraph",
            Node::Heading(_) => "heading",
            Node::List { .. } => "list",
            Node::ListItem(_) => "list_item",
            Node::Quote(_) => "quote",
            Node::FencedCode(_) => "fenced_code",
            Node::CodeBlock(_) => "code_block",
            Node::HtmlBlock(_) => "html_block",
            Node::ThematicBreak => "thematic_break",
            Node::BlankLine => "blank_line",
            Node::Table { .. } => "table",
            Node::Emphasis(_) => "emphasis",
            Node::Strong(_) => "strong_emphasis",
            Node::Strikethrough(_) => "strikethrough",
            Node::CodeSpan(_) => "code_span",
            Node::Link { .. } => "link",
            Node::AutoLink(_) => "auto_link",
            Node::Image { .. } => "image",
            Node::InlineHtml(_) => "inline_html",
            Node::Text(_) => "raw_text",
            Node::LineBreak => "line_break",
            Node::SlackReference(_) => "slack_reference",
        }
    }
}

/// A top-level node together with its byte range in the parsed source.
///
/// The range is the key to recovering a group's markdown without a
/// lossy re-render: slicing the source between the first and last node
/// of a group yields it verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub node: Node,
    pub source_range: Range<usize>,
}

/// Tree-builder state machine states.
///
/// Each open container is a frame; events are routed to the innermost
/// frame. Unrecognized containers are skipped with nesting depth
/// tracking so their End events don't desynchronize the stack.
enum Frame {
    Paragraph { children: Vec<Node> },
    Heading { children: Vec<Node> },
    Quote { children: Vec<Node> },
    List { ordered: bool, items: Vec<Node> },
    /// `inline` accumulates the loose inline run of a tight item; it is
    /// wrapped into a paragraph before any nested block or at item end.
    Item { blocks: Vec<Node>, inline: Vec<Node> },
    Code { fenced: bool, text: String },
    HtmlBlock { text: String },
    Emphasis { children: Vec<Node> },
    Strong { children: Vec<Node> },
    Strikethrough { children: Vec<Node> },
    Link { url: String, children: Vec<Node> },
    Image { url: String, alt: Vec<Node> },
    Table { rows: Vec<Vec<Vec<Node>>> },
    Row { cells: Vec<Vec<Node>> },
    Cell { children: Vec<Node> },
    Skip { depth: u32 },
}

// ── TreeBuilder ──────────────────────────────────────────────────────────────

/// Accumulates all mutable state across a single `parse_document()` call.
struct TreeBuilder {
    nodes: Vec<Spanned>,
    /// Open containers, innermost last. Each frame records the source
    /// range of its Start event, which pulldown-cmark extends over the
    /// whole element.
    stack: Vec<(Frame, Range<usize>)>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self { nodes: Vec::new(), stack: Vec::new() }
    }

    fn process(mut self, source: &str) -> Vec<Spanned> {
        let options =
            Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS;

        let events = TextMergeWithOffset::new(Parser::new_ext(source, options).into_offset_iter());
        for (event, range) in events {
            self.on_event(event, range);
        }

        debug_assert!(self.stack.is_empty(), "unclosed container frames after parse");
        insert_blank_lines(source, self.nodes)
    }

    // ── Event routing ────────────────────────────────────────────────────────

    fn on_event(&mut self, event: Event, range: Range<usize>) {
        match self.stack.last() {
            Some((Frame::Code { .. }, _)) => self.on_code_event(event),
            Some((Frame::HtmlBlock { .. }, _)) => self.on_html_block_event(event),
            Some((Frame::Skip { .. }, _)) => self.on_skipping_event(event),
            _ => self.dispatch(event, range),
        }
    }

    /// Handles events while inside a fenced/indented code block.
    fn on_code_event(&mut self, event: Event) {
        match event {
            Event::Text(text) => {
                if let Some((Frame::Code { text: buffer, .. }, _)) = self.stack.last_mut() {
                    buffer.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((Frame::Code { fenced, text }, range)) = self.stack.pop() {
                    let node =
                        if fenced { Node::FencedCode(text) } else { Node::CodeBlock(text) };
                    self.attach_block(node, range);
                }
            }
            _ => {}
        }
    }

    /// Handles events while inside an HTML block.
    fn on_html_block_event(&mut self, event: Event) {
        match event {
            Event::Html(html) | Event::Text(html) => {
                if let Some((Frame::HtmlBlock { text }, _)) = self.stack.last_mut() {
                    text.push_str(&html);
                }
            }
            Event::End(TagEnd::HtmlBlock) => {
                if let Some((Frame::HtmlBlock { text }, range)) = self.stack.pop() {
                    self.attach_block(Node::HtmlBlock(text), range);
                }
            }
            _ => {}
        }
    }

    /// Handles events while inside an unrecognized container being skipped.
    ///
    /// Tracks nesting depth so that nested containers don't prematurely
    /// end the skip.
    fn on_skipping_event(&mut self, event: Event) {
        let depth = match self.stack.last() {
            Some((Frame::Skip { depth }, _)) => *depth,
            _ => return,
        };
        match event {
            Event::Start(_) => {
                if let Some((Frame::Skip { depth }, _)) = self.stack.last_mut() {
                    *depth += 1;
                }
            }
            Event::End(_) if depth == 0 => {
                self.stack.pop();
            }
            Event::End(_) => {
                if let Some((Frame::Skip { depth }, _)) = self.stack.last_mut() {
                    *depth -= 1;
                }
            }
            _ => {}
        }
    }

    /// Dispatches normal events.
    fn dispatch(&mut self, event: Event, range: Range<usize>) {
        match event {
            // ── Block-level start ────────────────────────────────────
            Event::Start(Tag::Paragraph) => {
                self.flush_item_inline();
                self.stack.push((Frame::Paragraph { children: Vec::new() }, range));
            }
            Event::Start(Tag::Heading { .. }) => {
                self.stack.push((Frame::Heading { children: Vec::new() }, range));
            }
            Event::Start(Tag::BlockQuote(_)) => {
                self.flush_item_inline();
                self.stack.push((Frame::Quote { children: Vec::new() }, range));
            }
            Event::Start(Tag::List(start)) => {
                self.flush_item_inline();
                self.stack.push((
                    Frame::List { ordered: start.is_some(), items: Vec::new() },
                    range,
                ));
            }
            Event::Start(Tag::Item) => {
                self.stack.push((Frame::Item { blocks: Vec::new(), inline: Vec::new() }, range));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                self.flush_item_inline();
                let fenced = matches!(kind, CodeBlockKind::Fenced(_));
                self.stack.push((Frame::Code { fenced, text: String::new() }, range));
            }
            Event::Start(Tag::HtmlBlock) => {
                self.flush_item_inline();
                self.stack.push((Frame::HtmlBlock { text: String::new() }, range));
            }

            // ── Tables ───────────────────────────────────────────────
            Event::Start(Tag::Table(_)) => {
                self.stack.push((Frame::Table { rows: Vec::new() }, range));
            }
            Event::Start(Tag::TableHead | Tag::TableRow) => {
                self.stack.push((Frame::Row { cells: Vec::new() }, range));
            }
            Event::Start(Tag::TableCell) => {
                self.stack.push((Frame::Cell { children: Vec::new() }, range));
            }

            // ── Inline formatting ────────────────────────────────────
            Event::Start(Tag::Emphasis) => {
                self.stack.push((Frame::Emphasis { children: Vec::new() }, range));
            }
            Event::Start(Tag::Strong) => {
                self.stack.push((Frame::Strong { children: Vec::new() }, range));
            }
            Event::Start(Tag::Strikethrough) => {
                self.stack.push((Frame::Strikethrough { children: Vec::new() }, range));
            }
            Event::Start(Tag::Link { dest_url, .. }) => {
                self.stack.push((
                    Frame::Link { url: dest_url.into_string(), children: Vec::new() },
                    range,
                ));
            }
            Event::Start(Tag::Image { dest_url, .. }) => {
                self.stack.push((
                    Frame::Image { url: dest_url.into_string(), alt: Vec::new() },
                    range,
                ));
            }

            // Any unrecognized container — skip until its matching End.
            // MUST be last among Start arms so it doesn't shadow the
            // specific variants above.
            Event::Start(_) => self.stack.push((Frame::Skip { depth: 0 }, range)),

            // ── Ends ─────────────────────────────────────────────────
            Event::End(TagEnd::Paragraph) => match self.stack.pop() {
                Some((Frame::Paragraph { children }, range)) => {
                    self.attach_block(Node::Paragraph(children), range);
                }
                other => self.stack_mismatch("paragraph", other),
            },
            Event::End(TagEnd::Heading(_)) => match self.stack.pop() {
                Some((Frame::Heading { children }, range)) => {
                    self.attach_block(Node::Heading(children), range);
                }
                other => self.stack_mismatch("heading", other),
            },
            Event::End(TagEnd::BlockQuote(_)) => match self.stack.pop() {
                Some((Frame::Quote { children }, range)) => {
                    self.attach_block(Node::Quote(children), range);
                }
                other => self.stack_mismatch("quote", other),
            },
            Event::End(TagEnd::List(_)) => match self.stack.pop() {
                Some((Frame::List { ordered, items }, range)) => {
                    self.attach_block(Node::List { ordered, items }, range);
                }
                other => self.stack_mismatch("list", other),
            },
            Event::End(TagEnd::Item) => match self.stack.pop() {
                Some((Frame::Item { mut blocks, inline }, range)) => {
                    if !inline.is_empty() {
                        blocks.push(Node::Paragraph(inline));
                    }
                    self.attach_block(Node::ListItem(blocks), range);
                }
                other => self.stack_mismatch("list item", other),
            },
            Event::End(TagEnd::Table) => match self.stack.pop() {
                Some((Frame::Table { rows }, range)) => {
                    self.attach_block(Node::Table { rows }, range);
                }
                other => self.stack_mismatch("table", other),
            },
            Event::End(TagEnd::TableHead | TagEnd::TableRow) => match self.stack.pop() {
                Some((Frame::Row { cells }, _)) => {
                    if let Some((Frame::Table { rows }, _)) = self.stack.last_mut() {
                        rows.push(cells);
                    }
                }
                other => self.stack_mismatch("table row", other),
            },
            Event::End(TagEnd::TableCell) => match self.stack.pop() {
                Some((Frame::Cell { children }, _)) => {
                    if let Some((Frame::Row { cells }, _)) = self.stack.last_mut() {
                        cells.push(children);
                    }
                }
                other => self.stack_mismatch("table cell", other),
            },
            Event::End(TagEnd::Emphasis) => match self.stack.pop() {
                Some((Frame::Emphasis { children }, _)) => {
                    self.push_inline(Node::Emphasis(children));
                }
                other => self.stack_mismatch("emphasis", other),
            },
            Event::End(TagEnd::Strong) => match self.stack.pop() {
                Some((Frame::Strong { children }, _)) => {
                    self.push_inline(Node::Strong(children));
                }
                other => self.stack_mismatch("strong", other),
            },
            Event::End(TagEnd::Strikethrough) => match self.stack.pop() {
                Some((Frame::Strikethrough { children }, _)) => {
                    self.push_inline(Node::Strikethrough(children));
                }
                other => self.stack_mismatch("strikethrough", other),
            },
            Event::End(TagEnd::Link) => match self.stack.pop() {
                Some((Frame::Link { url, children }, _)) => {
                    self.push_inline(Node::Link { url, children });
                }
                other => self.stack_mismatch("link", other),
            },
            Event::End(TagEnd::Image) => match self.stack.pop() {
                Some((Frame::Image { url, alt }, _)) => {
                    self.push_inline(Node::Image { url, alt });
                }
                other => self.stack_mismatch("image", other),
            },
            // End events for skipped containers are consumed by the Skip
            // frame handler; anything else reaching here is ignored.
            Event::End(_) => {}

            // ── Content ──────────────────────────────────────────────
            Event::Text(text) => {
                // Link and image bodies keep their text verbatim; lifting
                // a bare URL there would nest links.
                if self.in_link_context() {
                    self.push_inline(Node::Text(text.into_string()));
                } else {
                    for node in split_inline_text(&text) {
                        self.push_inline(node);
                    }
                }
            }
            Event::Code(code) => self.push_inline(Node::CodeSpan(code.into_string())),
            Event::InlineHtml(html) => self.push_inline(Node::InlineHtml(html.into_string())),
            Event::SoftBreak | Event::HardBreak => self.push_inline(Node::LineBreak),
            Event::Rule => {
                self.flush_item_inline();
                self.attach_block(Node::ThematicBreak, range);
            }

            // ── Ignored ──────────────────────────────────────────────
            Event::TaskListMarker(_)
            | Event::FootnoteReference(_)
            | Event::InlineMath(_)
            | Event::DisplayMath(_)
            | Event::Html(_) => {}
        }
    }

    // ── Attachment helpers ───────────────────────────────────────────────────

    /// Attaches a finished block node to the innermost block container,
    /// or to the document top level (with its source range).
    fn attach_block(&mut self, node: Node, range: Range<usize>) {
        match self.stack.last_mut() {
            None => self.nodes.push(Spanned { node, source_range: range }),
            Some((Frame::Quote { children }, _)) => children.push(node),
            Some((Frame::Item { blocks, .. }, _)) => blocks.push(node),
            Some((Frame::List { items, .. }, _)) => items.push(node),
            Some(_) => {
                debug_assert!(false, "block node in non-block context: {}", node.node_type());
            }
        }
    }

    /// Attaches an inline node to the innermost inline context.
    fn push_inline(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some((
                Frame::Paragraph { children }
                | Frame::Heading { children }
                | Frame::Emphasis { children }
                | Frame::Strong { children }
                | Frame::Strikethrough { children }
                | Frame::Link { children, .. }
                | Frame::Cell { children },
                _,
            )) => children.push(node),
            Some((Frame::Image { alt, .. }, _)) => alt.push(node),
            Some((Frame::Item { inline, .. }, _)) => inline.push(node),
            _ => {
                debug_assert!(false, "inline node outside inline context: {}", node.node_type());
            }
        }
    }

    fn in_link_context(&self) -> bool {
        self.stack
            .iter()
            .any(|(frame, _)| matches!(frame, Frame::Link { .. } | Frame::Image { .. }))
    }

    /// Wraps a tight item's pending inline run into a paragraph before a
    /// nested block opens, keeping child order intact.
    fn flush_item_inline(&mut self) {
        if let Some((Frame::Item { blocks, inline }, _)) = self.stack.last_mut() {
            if !inline.is_empty() {
                blocks.push(Node::Paragraph(std::mem::take(inline)));
            }
        }
    }

    fn stack_mismatch(&mut self, expected: &str, _popped: Option<(Frame, Range<usize>)>) {
        debug_assert!(false, "End event without matching {expected} frame");
    }
}

// ── Inline text splitting ────────────────────────────────────────────────────

/// Splits a merged text run into plain text, Slack references, and bare
/// URL auto-links.
fn split_inline_text(text: &str) -> Vec<Node> {
    let mut out = Vec::new();
    let mut last = 0;

    for caps in INLINE_TOKEN_RE.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };

        if let Some(reference) = caps.get(1) {
            if m.start() > last {
                out.push(Node::Text(text[last..m.start()].to_string()));
            }
            out.push(Node::SlackReference(reference.as_str().to_string()));
            last = m.end();
        } else {
            let url = m.as_str().trim_end_matches(URL_TRAILING_PUNCTUATION);
            if url.is_empty() {
                continue;
            }
            if m.start() > last {
                out.push(Node::Text(text[last..m.start()].to_string()));
            }
            out.push(Node::AutoLink(url.to_string()));
            last = m.start() + url.len();
        }
    }

    if last < text.len() {
        out.push(Node::Text(text[last..].to_string()));
    }
    out
}

// ── Blank line synthesis ─────────────────────────────────────────────────────

/// Inserts a `BlankLine` node for every run of blank source lines not
/// covered by a top-level element span. Blank lines inside loose lists
/// and code fences fall within their container's span and are skipped.
fn insert_blank_lines(source: &str, nodes: Vec<Spanned>) -> Vec<Spanned> {
    let mut blanks: Vec<Range<usize>> = Vec::new();
    let mut run: Option<Range<usize>> = None;
    let mut node_idx = 0;

    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        let start = offset;
        offset += line.len();

        while node_idx < nodes.len() && nodes[node_idx].source_range.end <= start {
            node_idx += 1;
        }
        let covered =
            node_idx < nodes.len() && nodes[node_idx].source_range.start <= start;

        if line.trim().is_empty() && !covered {
            run = match run.take() {
                Some(r) => Some(r.start..offset),
                None => Some(start..offset),
            };
        } else if let Some(r) = run.take() {
            blanks.push(r);
        }
    }
    if let Some(r) = run.take() {
        blanks.push(r);
    }

    if blanks.is_empty() {
        return nodes;
    }

    // Merge the two span-sorted sequences.
    let mut merged = Vec::with_capacity(nodes.len() + blanks.len());
    let mut blanks = blanks.into_iter().peekable();
    for spanned in nodes {
        while let Some(blank) = blanks.next_if(|b| b.start < spanned.source_range.start) {
            merged.push(Spanned { node: Node::BlankLine, source_range: blank });
        }
        merged.push(spanned);
    }
    for blank in blanks {
        merged.push(Spanned { node: Node::BlankLine, source_range: blank });
    }
    merged
}

// ── Inline markdown writer ───────────────────────────────────────────────────

/// Renders a run of inline nodes back to markdown text.
///
/// Used for link bodies and table cell payloads, where the target format
/// wants the original markup rather than a block tree.
pub fn inline_to_markdown(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_inline(node, &mut out);
    }
    out
}

fn write_inline(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => out.push_str(text),
        Node::CodeSpan(code) => {
            out.push('`');
            out.push_str(code);
            out.push('`');
        }
        Node::Emphasis(children) => {
            out.push('*');
            for child in children {
                write_inline(child, out);
            }
            out.push('*');
        }
        Node::Strong(children) => {
            out.push_str("**");
            for child in children {
                write_inline(child, out);
            }
            out.push_str("**");
        }
        Node::Strikethrough(children) => {
            out.push_str("~~");
            for child in children {
                write_inline(child, out);
            }
            out.push_str("~~");
        }
        Node::Link { url, children } => {
            out.push('[');
            for child in children {
                write_inline(child, out);
            }
            out.push_str("](");
            out.push_str(url);
            out.push(')');
        }
        Node::AutoLink(url) => out.push_str(url),
        Node::Image { url, alt } => {
            out.push_str("![");
            for child in alt {
                write_inline(child, out);
            }
            out.push_str("](");
            out.push_str(url);
            out.push(')');
        }
        Node::InlineHtml(html) => out.push_str(html),
        Node::LineBreak => out.push('\n'),
        Node::SlackReference(reference) => {
            out.push('<');
            out.push_str(reference);
            out.push('>');
        }
        // Block nodes never occur in inline runs.
        _ => {}
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Parses a markdown source string into spanned top-level AST nodes.
///
/// Enables the GFM extensions the upstream model actually emits
/// (strikethrough, tables, tasklists). Link reference definitions are
/// resolved by the parser and produce no node.
pub fn parse_document(source: &str) -> Vec<Spanned> {
    TreeBuilder::new().process(source)
}

#[cfg(test)]
#[path = "ast_tests.rs"]
mod tests;
