//! Renderer: lowers the markdown AST to Slack rich-text elements.
//!
//! This is the second stage of the conversion pipeline. It consumes
//! [`Node`]s and produces a flat list of [`Rendered`] items which
//! [`postprocess`] groups into `rich_text` blocks.
//!
//! The target format is a closed schema with limited composability:
//! headings, horizontal rules and tables don't exist, and styles nest
//! via an attribute map rather than wrapper elements. The renderer
//! lowers aggressively and marks the one irrecoverable loss — tables —
//! with an `_embed_file` sentinel the poster replaces with a file
//! upload.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;

use crate::ast::{self, Node};
use crate::blocks::{Block, ListStyle, RichTextElement, SectionElement, StyleKey, TextStyle};

/// Characters kept verbatim when percent-encoding link destinations:
/// RFC 3986 unreserved plus the delimiters real-world URLs carry.
const URL_ESCAPE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'-')
    .remove(b'/')
    .remove(b'#')
    .remove(b':')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'?')
    .remove(b'=')
    .remove(b'%')
    .remove(b'@')
    .remove(b'+')
    .remove(b',')
    .remove(b'&');

/// An item of renderer output, before grouping.
///
/// The source block vocabulary is wider than what a `rich_text`
/// wrapper accepts, so the renderer emits a flat mixed list: wrappable
/// elements, loose inline leaves (from headings), pre-grouped wrappers
/// (bordered quote lists), and the table sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// A loose inline leaf; `postprocess` wraps runs of these into a
    /// section.
    Inline(SectionElement),
    /// A wrappable rich-text element.
    Element(RichTextElement),
    /// An already-grouped `rich_text` wrapper.
    RichText(Vec<RichTextElement>),
    /// Sentinel for an unrepresentable construct; must be replaced
    /// before the tree is considered valid.
    EmbedFile { name: String, content: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    /// Only paragraphs and lists may appear inside a quote.
    #[error("unexpected element in quote: {found}")]
    QuoteChild { found: String },
    #[error("table serialization failed: {0}")]
    TableCsv(String),
}

/// Markdown AST to Slack rich-text converter.
///
/// Stateless between calls apart from the list-nesting counters used
/// while rendering a single tree.
pub struct SlackRenderer {
    list_style: ListStyle,
    list_indent: u32,
}

impl SlackRenderer {
    pub fn new() -> Self {
        Self { list_style: ListStyle::Bullet, list_indent: 0 }
    }

    /// Renders a sequence of sibling nodes.
    pub fn render(&mut self, nodes: &[Node]) -> Result<Vec<Rendered>, RenderError> {
        let mut out = Vec::new();
        for node in nodes {
            out.extend(self.render_node(node)?);
        }
        Ok(out)
    }

    fn render_node(&mut self, node: &Node) -> Result<Vec<Rendered>, RenderError> {
        match node {
            // ── Blocks ───────────────────────────────────────────────
            Node::Paragraph(children) => self.render_paragraph(children),
            // No heading in the target format: render the inline run only.
            Node::Heading(children) => self.render(children),
            Node::List { ordered, items } => self.render_list(*ordered, items),
            Node::ListItem(children) => self.render_list_item(children),
            Node::Quote(children) => self.render_quote(children),
            Node::FencedCode(text) | Node::CodeBlock(text) => {
                Ok(vec![preformatted(text.trim())])
            }
            Node::HtmlBlock(text) => Ok(vec![preformatted(escape_html(text).trim())]),
            Node::ThematicBreak => Ok(Vec::new()),
            Node::BlankLine => Ok(vec![Rendered::Element(RichTextElement::Section {
                elements: vec![SectionElement::text("\n")],
            })]),
            Node::Table { rows } => render_table(rows),

            // ── Inlines ──────────────────────────────────────────────
            Node::Emphasis(children) => self.render_text_style(children, StyleKey::Italic),
            Node::Strong(children) => self.render_text_style(children, StyleKey::Bold),
            Node::Strikethrough(children) => self.render_text_style(children, StyleKey::Strike),
            Node::CodeSpan(code) => Ok(vec![Rendered::Inline(SectionElement::Text {
                text: code.clone(),
                style: Some(TextStyle::default().with(StyleKey::Code)),
            })]),
            Node::Link { url, children } => Ok(vec![Rendered::Inline(SectionElement::Link {
                url: escape_url(url),
                text: ast::inline_to_markdown(children),
                style: None,
            })]),
            Node::AutoLink(url) => Ok(vec![Rendered::Inline(SectionElement::Link {
                url: escape_url(url),
                text: url.clone(),
                style: None,
            })]),
            Node::Image { url, alt } => {
                let url = escape_url(url);
                let body = ast::inline_to_markdown(alt);
                let text = if body.is_empty() { url.clone() } else { body };
                Ok(vec![Rendered::Inline(SectionElement::Link { url, text, style: None })])
            }
            Node::InlineHtml(html) => {
                Ok(vec![Rendered::Inline(SectionElement::text(html.clone()))])
            }
            Node::Text(text) => Ok(vec![Rendered::Inline(SectionElement::text(text.clone()))]),
            Node::LineBreak => Ok(vec![Rendered::Inline(SectionElement::text("\n"))]),
            Node::SlackReference(reference) => {
                Ok(vec![Rendered::Inline(render_slack_reference(reference))])
            }
        }
    }

    // ── Block handlers ───────────────────────────────────────────────────────

    fn render_paragraph(&mut self, children: &[Node]) -> Result<Vec<Rendered>, RenderError> {
        let elements = self.render_inline_run(children)?;
        debug_assert!(!elements.is_empty(), "empty paragraph");
        Ok(vec![Rendered::Element(RichTextElement::Section { elements })])
    }

    fn render_list(&mut self, ordered: bool, items: &[Node]) -> Result<Vec<Rendered>, RenderError> {
        self.list_style = if ordered { ListStyle::Ordered } else { ListStyle::Bullet };
        self.list_indent += 1;
        let children = self.render(items);
        self.list_indent -= 1;
        let children = children?;

        // Merge adjacent sibling lists at the same indent into one, so a
        // run of items appears as a single list element per indent level.
        let mut shrunk: Vec<Rendered> = Vec::new();
        let mut last_indent: Option<u32> = None;
        for child in children {
            match child {
                Rendered::Element(RichTextElement::List { style, indent, border, elements }) => {
                    if last_indent == Some(indent) {
                        if let Some(Rendered::Element(RichTextElement::List {
                            elements: previous,
                            ..
                        })) = shrunk.last_mut()
                        {
                            previous.extend(elements);
                            continue;
                        }
                    }
                    last_indent = Some(indent);
                    shrunk.push(Rendered::Element(RichTextElement::List {
                        style,
                        indent,
                        border,
                        elements,
                    }));
                }
                other => {
                    last_indent = None;
                    shrunk.push(other);
                }
            }
        }
        Ok(shrunk)
    }

    fn render_list_item(&mut self, children: &[Node]) -> Result<Vec<Rendered>, RenderError> {
        // Capture style and indent before recursing: a nested list of the
        // other style must not restyle this item.
        let style = self.list_style;
        let indent = self.list_indent - 1;
        let rendered = self.render(children)?;

        let all_sections = rendered
            .iter()
            .all(|child| matches!(child, Rendered::Element(RichTextElement::Section { .. })));

        let mut primary_elements: Vec<RichTextElement> = Vec::new();
        let mut tail: Vec<Rendered> = Vec::new();

        if all_sections {
            // The item's inline run collapses into a single section.
            let mut merged: Vec<SectionElement> = Vec::new();
            for child in rendered {
                if let Rendered::Element(RichTextElement::Section { elements }) = child {
                    merged.extend(elements);
                }
            }
            primary_elements.push(RichTextElement::Section { elements: merged });
        } else {
            // Nested lists and preformatted blocks become siblings after
            // the primary list node.
            for child in rendered {
                match child {
                    Rendered::Element(
                        element @ (RichTextElement::List { .. }
                        | RichTextElement::Preformatted { .. }),
                    ) => tail.push(Rendered::Element(element)),
                    Rendered::Element(element) => primary_elements.push(element),
                    Rendered::Inline(element) => {
                        primary_elements
                            .push(RichTextElement::Section { elements: vec![element] });
                    }
                    other => tail.push(other),
                }
            }
        }

        let mut out = vec![Rendered::Element(RichTextElement::List {
            style,
            indent,
            border: None,
            elements: primary_elements,
        })];
        out.extend(tail);
        Ok(out)
    }

    fn render_quote(&mut self, children: &[Node]) -> Result<Vec<Rendered>, RenderError> {
        let rendered = self.render(children)?;
        let mut out: Vec<Rendered> = Vec::new();

        // Only paragraphs and lists are allowed in a quote.
        for child in rendered {
            match child {
                Rendered::Element(RichTextElement::List { style, indent, elements, .. }) => {
                    let bordered =
                        RichTextElement::List { style, indent, border: Some(1), elements };
                    if let Some(Rendered::RichText(group)) = out.last_mut() {
                        group.push(bordered);
                    } else {
                        out.push(Rendered::RichText(vec![bordered]));
                    }
                }
                Rendered::Element(RichTextElement::Section { elements }) => {
                    if let Some(Rendered::Element(RichTextElement::Quote { elements: previous })) =
                        out.last_mut()
                    {
                        previous.extend(elements);
                    } else {
                        out.push(Rendered::Element(RichTextElement::Quote { elements }));
                    }
                }
                other => {
                    return Err(RenderError::QuoteChild { found: format!("{other:?}") });
                }
            }
        }
        Ok(out)
    }

    // ── Inline helpers ───────────────────────────────────────────────────────

    /// Renders children expected to be inline and collects the leaves.
    fn render_inline_run(&mut self, children: &[Node]) -> Result<Vec<SectionElement>, RenderError> {
        let mut elements = Vec::new();
        for child in self.render(children)? {
            match child {
                Rendered::Inline(element) => elements.push(element),
                other => {
                    debug_assert!(false, "block output in inline run: {other:?}");
                }
            }
        }
        Ok(elements)
    }

    /// Renders styled children, adding `key` to every leaf that carries
    /// a style map. Styling composes: nested emphasis accumulates keys.
    fn render_text_style(
        &mut self,
        children: &[Node],
        key: StyleKey,
    ) -> Result<Vec<Rendered>, RenderError> {
        let mut out = Vec::new();
        for child in self.render(children)? {
            out.push(match child {
                Rendered::Inline(element) => Rendered::Inline(apply_style(element, key)),
                other => other,
            });
        }
        Ok(out)
    }
}

impl Default for SlackRenderer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Free helpers ─────────────────────────────────────────────────────────────

fn preformatted(text: &str) -> Rendered {
    Rendered::Element(RichTextElement::Preformatted {
        elements: vec![SectionElement::text(text)],
    })
}

fn render_slack_reference(reference: &str) -> SectionElement {
    match reference.split_at(1) {
        ("@", id) => SectionElement::User { user_id: id.to_string() },
        (_, id) => SectionElement::Channel { channel_id: id.to_string() },
    }
}

fn apply_style(element: SectionElement, key: StyleKey) -> SectionElement {
    match element {
        SectionElement::Text { text, style } => {
            SectionElement::Text { text, style: Some(style.unwrap_or_default().with(key)) }
        }
        SectionElement::Link { url, text, style } => {
            SectionElement::Link { url, text, style: Some(style.unwrap_or_default().with(key)) }
        }
        // user/channel/emoji leaves carry no style map.
        other => other,
    }
}

/// Serializes a table to CSV (LF line terminator, minimal quoting) with
/// each cell rendered back to markdown.
fn render_table(rows: &[Vec<Vec<Node>>]) -> Result<Vec<Rendered>, RenderError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for row in rows {
        let record: Vec<String> = row.iter().map(|cell| ast::inline_to_markdown(cell)).collect();
        writer
            .write_record(&record)
            .map_err(|error| RenderError::TableCsv(error.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|error| RenderError::TableCsv(error.to_string()))?;
    let content =
        String::from_utf8(bytes).map_err(|error| RenderError::TableCsv(error.to_string()))?;
    Ok(vec![Rendered::EmbedFile { name: "table.csv".to_string(), content }])
}

// ── Validation & grouping ────────────────────────────────────────────────────

/// Rejects any rendered tree still containing a sentinel (a node whose
/// wire type would start with `_`). Typed construction rules out the
/// other malformations the wire format forbids.
pub fn validate(rendered: &[Rendered]) -> bool {
    rendered.iter().all(|item| !matches!(item, Rendered::EmbedFile { .. }))
}

/// Groups consecutive wrappable elements under `rich_text` wrappers.
///
/// Loose inline runs (heading output) are first wrapped into a section.
/// Pre-grouped wrappers split the accumulation.
pub fn postprocess(rendered: Vec<Rendered>) -> Vec<Block> {
    fn flush_inline(inline_run: &mut Vec<SectionElement>, group: &mut Vec<RichTextElement>) {
        if !inline_run.is_empty() {
            group.push(RichTextElement::Section { elements: std::mem::take(inline_run) });
        }
    }

    let mut out: Vec<Block> = Vec::new();
    let mut group: Vec<RichTextElement> = Vec::new();
    let mut inline_run: Vec<SectionElement> = Vec::new();

    for item in rendered {
        match item {
            Rendered::Inline(element) => inline_run.push(element),
            Rendered::Element(element) => {
                flush_inline(&mut inline_run, &mut group);
                group.push(element);
            }
            Rendered::RichText(elements) => {
                flush_inline(&mut inline_run, &mut group);
                if !group.is_empty() {
                    out.push(Block::RichText { elements: std::mem::take(&mut group) });
                }
                out.push(Block::RichText { elements });
            }
            Rendered::EmbedFile { .. } => {
                debug_assert!(false, "embed sentinel survived validation");
            }
        }
    }

    flush_inline(&mut inline_run, &mut group);
    if !group.is_empty() {
        out.push(Block::RichText { elements: group });
    }
    out
}

// ── Escaping ─────────────────────────────────────────────────────────────────

/// Escapes link destinations to keep crafted URLs from injecting markup:
/// entity-unescape, percent-encode with the URL-safe set, then
/// entity-escape what remains (effectively the ampersands).
pub fn escape_url(raw: &str) -> String {
    let unescaped = unescape_html(raw);
    let quoted = utf8_percent_encode(&unescaped, URL_ESCAPE_SET).to_string();
    escape_html(&quoted)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape_html(raw: &str) -> String {
    // Reverses only the entities the escape step produces. &amp; must go
    // last so freed ampersands don't re-trigger earlier replacements.
    raw.replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
