//! Slack rich-text block types.
//!
//! A direct serde model of the wire shape Slack accepts in
//! `chat.postMessage` `blocks`: every node is a JSON object with a
//! `type` discriminator and a type-specific payload. Serialization to
//! JSON is the native representation; nothing here knows about
//! markdown.

use serde::{Deserialize, Serialize};

/// A top-level message block. The renderer only ever emits `rich_text`
/// wrappers; the enum leaves room for standalone block kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    RichText { elements: Vec<RichTextElement> },
}

/// An element inside a `rich_text` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RichTextElement {
    #[serde(rename = "rich_text_section")]
    Section { elements: Vec<SectionElement> },
    #[serde(rename = "rich_text_list")]
    List {
        style: ListStyle,
        indent: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        border: Option<u32>,
        elements: Vec<RichTextElement>,
    },
    #[serde(rename = "rich_text_quote")]
    Quote { elements: Vec<SectionElement> },
    #[serde(rename = "rich_text_preformatted")]
    Preformatted { elements: Vec<SectionElement> },
}

/// An inline leaf inside a section, quote, or preformatted element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SectionElement {
    #[serde(rename = "text")]
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        style: Option<TextStyle>,
    },
    #[serde(rename = "emoji")]
    Emoji { name: String },
    #[serde(rename = "link")]
    Link {
        url: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        style: Option<TextStyle>,
    },
    #[serde(rename = "user")]
    User { user_id: String },
    #[serde(rename = "channel")]
    Channel { channel_id: String },
}

impl SectionElement {
    /// Plain text leaf without styling.
    pub fn text(text: impl Into<String>) -> Self {
        SectionElement::Text { text: text.into(), style: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListStyle {
    Bullet,
    Ordered,
}

/// Set-valued style map; a key is serialized only when set, matching
/// Slack's `{"bold": true}` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strike: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub code: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl TextStyle {
    pub fn with(mut self, key: StyleKey) -> Self {
        match key {
            StyleKey::Italic => self.italic = true,
            StyleKey::Bold => self.bold = true,
            StyleKey::Strike => self.strike = true,
            StyleKey::Code => self.code = true,
        }
        self
    }
}

/// One of the four inline style flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleKey {
    Italic,
    Bold,
    Strike,
    Code,
}
