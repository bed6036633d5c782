//! scriba - lecture notes generator
//!
//! Builds a LaTeX document from adapter outputs (transcript, keyframes,
//! document chunks as JSON) and optionally opens an interactive loop for
//! editing the result and asking questions about it.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use scriba_common::ScribaConfig;
use scriba_gen::{
    DocumentChunk, DocumentType, EditTarget, Keyframe, PipelineEvent, RawSource, Session,
    TranscriptSegment,
};

/// Command-line arguments for scriba
#[derive(Parser, Debug)]
#[command(name = "scriba")]
#[command(about = "Turn lecture recordings and documents into LaTeX notes")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "SCRIBA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a document from adapter outputs
    Build {
        /// Transcript segments JSON ([{start, end, text}])
        #[arg(long)]
        transcript: Option<PathBuf>,

        /// Keyframes JSON ([{timestamp, path}])
        #[arg(long)]
        keyframes: Option<PathBuf>,

        /// Slide deck chunks JSON ([{page_range: [a, b], text}]); repeatable
        #[arg(long)]
        slides: Vec<PathBuf>,

        /// Student notes chunks JSON; repeatable
        #[arg(long)]
        notes: Vec<PathBuf>,

        /// LaTeX of the previous lessons, for inherited style
        #[arg(long)]
        prior: Option<PathBuf>,

        /// Output .tex file
        #[arg(short, long, default_value = "notes.tex")]
        output: PathBuf,

        /// Open the edit/ask loop after building
        #[arg(short, long)]
        interactive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ScribaConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    scriba_common::logging::init_tracing(&config.logging)?;

    info!("Starting scriba {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Build {
            transcript,
            keyframes,
            slides,
            notes,
            prior,
            output,
            interactive,
        } => {
            let sources = load_sources(transcript, keyframes, &slides, &notes).await?;
            let prior = match prior {
                Some(path) => Some(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                ),
                None => None,
            };

            let session = Session::with_gemini(config)?;
            spawn_progress_printer(&session);

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling after the current part...");
                    on_ctrl_c.cancel();
                }
            });

            let document = session
                .build_with_cancel(sources, prior, cancel)
                .await
                .context("Build failed")?;
            tokio::fs::write(&output, document.render())
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote {} ({} parts)", output.display(), document.len());

            if interactive {
                interactive_loop(&session, &output).await?;
            }
            session.close();
        }
    }

    Ok(())
}

async fn load_sources(
    transcript: Option<PathBuf>,
    keyframes: Option<PathBuf>,
    slides: &[PathBuf],
    notes: &[PathBuf],
) -> Result<Vec<RawSource>> {
    let mut sources = Vec::new();

    if let Some(path) = transcript {
        let segments: Vec<TranscriptSegment> = read_json(&path).await?;
        sources.push(RawSource::transcript(source_id(&path), segments));
    }
    if let Some(path) = keyframes {
        let frames: Vec<Keyframe> = read_json(&path).await?;
        sources.push(RawSource::keyframes(source_id(&path), frames));
    }
    for (paths, doc_type) in [(slides, DocumentType::Slides), (notes, DocumentType::Notes)] {
        for path in paths {
            let chunks: Vec<DocumentChunk> = read_json(path).await?;
            sources.push(RawSource::document(source_id(path), doc_type, chunks));
        }
    }

    if sources.is_empty() {
        bail!("No input given: pass --transcript, --keyframes, --slides or --notes");
    }
    Ok(sources)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn source_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn spawn_progress_printer(session: &Session) {
    let mut rx = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                PipelineEvent::UnitStarted {
                    unit_index,
                    total_units,
                    ..
                } => eprintln!("[{}/{}] generating", unit_index + 1, total_units),
                PipelineEvent::UnitRetrying {
                    unit_index, attempt, ..
                } => eprintln!("[{}] retrying (attempt {})", unit_index + 1, attempt),
                PipelineEvent::EvidenceDropped { error, .. } => eprintln!("skipped: {}", error),
                PipelineEvent::UnitFailed { unit_index, error, .. } => {
                    eprintln!("[{}] failed, placeholder inserted: {}", unit_index + 1, error)
                }
                _ => {}
            }
        }
    });
}

const HELP: &str = "\
Commands:
  :ask <question>              ask about the lesson
  :edit <part> <instruction>   rewrite one part (1-based)
  :edit \"<text>\" <instruction> rewrite the part containing <text>
  :save [path]                 write the document
  :quit                        leave";

async fn interactive_loop(session: &Session, output: &Path) -> Result<()> {
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "" => continue,
            ":quit" | ":q" => break,
            ":ask" => match session.ask(rest).await {
                Ok(answer) => println!("{}", answer),
                Err(e) => eprintln!("Error: {}", e),
            },
            ":edit" => match parse_edit(rest) {
                Some((target, instruction)) => match session.edit(target, &instruction).await {
                    Ok(document) => {
                        println!("Edit applied ({} parts)", document.len());
                    }
                    Err(e) => eprintln!("Edit not applied: {}", e),
                },
                None => eprintln!("Usage: :edit <part> <instruction>"),
            },
            ":save" => {
                let path = if rest.is_empty() { output.to_path_buf() } else { PathBuf::from(rest) };
                tokio::fs::write(&path, session.document().await.render())
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Saved {}", path.display());
            }
            _ => println!("{}", HELP),
        }
    }
    Ok(())
}

/// `<part> <instruction>` or `"<excerpt>" <instruction>`
fn parse_edit(rest: &str) -> Option<(EditTarget, String)> {
    if let Some(quoted) = rest.strip_prefix('"') {
        let (excerpt, instruction) = quoted.split_once('"')?;
        let instruction = instruction.trim();
        if excerpt.is_empty() || instruction.is_empty() {
            return None;
        }
        return Some((EditTarget::Excerpt(excerpt.to_string()), instruction.to_string()));
    }

    let (part, instruction) = rest.split_once(' ')?;
    let part: usize = part.parse().ok()?;
    let instruction = instruction.trim();
    if part == 0 || instruction.is_empty() {
        return None;
    }
    Some((EditTarget::Unit(part - 1), instruction.to_string()))
}
