//! Entry point: a CLI harness over the conversion pipeline.
//!
//! This is the thin orchestrator that connects the pipeline stages for
//! offline use: `render` converts a whole document at once, `stream`
//! dry-runs the chunker against stdin. The bot wiring (socket
//! transport, model SDK) lives with the deployment that embeds the
//! library.

use std::io::Read as _;

use clap::Parser;
use color_eyre::eyre::eyre;
use tracing_subscriber::EnvFilter;

use slackdown::ast;
use slackdown::chunker::Chunker;
use slackdown::cli::{Cli, Command};
use slackdown::renderer::{self, SlackRenderer};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Render { file } => render(&file),
        Command::Stream { max_chunk_size } => stream(max_chunk_size).await,
    }
}

/// One-shot conversion of a whole document to block JSON.
fn render(file: &str) -> color_eyre::Result<()> {
    let source = read_source(file)?;
    let nodes: Vec<_> = ast::parse_document(&source).into_iter().map(|s| s.node).collect();
    let rendered = SlackRenderer::new().render(&nodes)?;
    if !renderer::validate(&rendered) {
        return Err(eyre!(
            "document contains tables, which have no rich-text form; the poster embeds them as files"
        ));
    }
    let blocks = renderer::postprocess(rendered);
    println!("{}", serde_json::to_string_pretty(&blocks)?);
    Ok(())
}

/// Feeds stdin through the chunker line by line, printing each group as
/// it becomes ready — a dry run of the streaming path.
async fn stream(max_chunk_size: usize) -> color_eyre::Result<()> {
    use tokio::io::AsyncBufReadExt;

    let mut chunker = Chunker::new(max_chunk_size);
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        chunker.feed(&line);
        chunker.feed("\n");
        print_ready(&mut chunker).await?;
    }
    chunker.finish();
    print_ready(&mut chunker).await?;
    Ok(())
}

async fn print_ready(chunker: &mut Chunker) -> color_eyre::Result<()> {
    loop {
        let before = chunker.emitted_index();
        match chunker.consume().await? {
            Some(emitted) => println!("{}", serde_json::to_string(&emitted.blocks)?),
            None if chunker.emitted_index() == before => return Ok(()),
            None => {}
        }
    }
}

fn read_source(file: &str) -> color_eyre::Result<String> {
    if file == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        return Ok(source);
    }
    Ok(std::fs::read_to_string(file)?)
}
