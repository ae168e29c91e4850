//! CLI argument definition for slackdown.
//!
//! This module is intentionally free of non-clap dependencies so the
//! binary harness stays a thin wrapper over the library.

use clap::{Parser, Subcommand};

/// Markdown to Slack rich-text bridge.
#[derive(Parser)]
#[command(name = "slackdown", version, about = "Markdown to Slack rich-text bridge")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Render a markdown file (use "-" for stdin) to Slack block JSON.
    Render {
        /// Markdown file to convert.
        file: String,
    },
    /// Stream stdin through the chunker, printing each group as it
    /// becomes ready.
    Stream {
        /// Soft target size of one group, in characters of markdown.
        #[arg(long, default_value_t = crate::chunker::DEFAULT_MAX_CHUNK_SIZE)]
        max_chunk_size: usize,
    },
}
