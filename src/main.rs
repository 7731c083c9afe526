//! # Roundtable CLI (`rtable`)
//!
//! Runs document-grounded discussions between personas from the command
//! line.
//!
//! ## Usage
//!
//! ```bash
//! rtable --config ./config/rtable.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rtable chunk <file>` | Show how a document is chunked |
//! | `rtable context <file> "<query>"` | Show the grounding context for a query |
//! | `rtable analyze <file>` | Structure analysis of a document (`--deep` adds a model pass) |
//! | `rtable run [file]` | Generate a whole discussion |
//! | `rtable start [file]` | Create a stepwise session file |
//! | `rtable step` | Generate the next message of a session |
//! | `rtable continue <transcript>` | Append further rounds to a discussion |
//! | `rtable guide <transcript>` | Continue under a facilitator instruction |
//! | `rtable actions <transcript>` | Summarize action items |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level);
//! results go to stdout.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use roundtable::config::{self, Config};
use roundtable::generation::create_generator;
use roundtable::ingest::{self, prepare_document};
use roundtable::session::{load_session, save_session, Session};
use roundtable::transcript::{self, load_transcript, OutputFormat, TranscriptFile};
use roundtable_core::actions::{generate_action_items, Language};
use roundtable_core::analysis::{analysis_report, analyze};
use roundtable_core::context::ContextAssembler;
use roundtable_core::discussion::{Grounding, Orchestrator, Phase};
use roundtable_core::retrieve::{search_filtered_with, RetrievalParams};

/// Roundtable CLI: document-grounded multi-persona discussions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rtable.example.toml` for a full example; without a
/// file, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "rtable",
    about = "Roundtable: document-grounded multi-persona discussions",
    version,
    long_about = "Roundtable splits a reference document into chunks, retrieves the most relevant \
    ones for every turn, and runs a round-robin discussion between personas whose messages are \
    grounded in that document. Discussions can run in one go or one step per invocation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rtable.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a document into chunks and list them.
    Chunk {
        /// UTF-8 text file.
        file: PathBuf,
    },

    /// Retrieve and pack the grounding context for a query.
    Context {
        file: PathBuf,
        query: String,
        /// Number of chunks to retrieve (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,
        /// Token budget (defaults to `context.max_tokens`).
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Structure analysis of a document.
    Analyze {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Add a model-written content analysis and key information.
        #[arg(long)]
        deep: bool,
        /// Language of the deep analysis: `en` or `ja`.
        #[arg(long, default_value = "en")]
        lang: Language,
    },

    /// Generate a complete discussion.
    Run {
        /// Reference document; without one the discussion is ungrounded.
        file: Option<PathBuf>,
        #[command(flatten)]
        setup: Setup,
        #[command(flatten)]
        output: Output,
    },

    /// Create a session file for a stepwise discussion.
    Start {
        file: Option<PathBuf>,
        #[command(flatten)]
        setup: Setup,
        /// Session file to create.
        #[arg(long)]
        state: PathBuf,
    },

    /// Generate the next message of a session and save it.
    Step {
        /// Session file created by `rtable start`.
        #[arg(long)]
        state: PathBuf,
    },

    /// Append further rounds to a saved discussion.
    ///
    /// The role cycle restarts at the first role.
    Continue {
        /// Transcript or session file.
        transcript: PathBuf,
        /// Rounds to add.
        #[arg(long, default_value_t = 1)]
        turns: usize,
        /// Roles to cycle through (defaults to the transcript's roles).
        #[arg(long = "role")]
        roles: Vec<String>,
        /// Overrides the topic stored in the transcript.
        #[arg(long)]
        topic: Option<String>,
        /// Reference document for grounding.
        #[arg(long)]
        doc: Option<PathBuf>,
        #[command(flatten)]
        output: Output,
    },

    /// Continue a saved discussion under a facilitator instruction.
    Guide {
        transcript: PathBuf,
        /// Instruction with priority over the personas' framing.
        #[arg(long)]
        instruction: String,
        #[arg(long, default_value_t = 1)]
        turns: usize,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        doc: Option<PathBuf>,
        #[command(flatten)]
        output: Output,
    },

    /// Summarize action items for each role of a saved discussion.
    Actions {
        transcript: PathBuf,
        /// Output language: `en` or `ja`.
        #[arg(long, default_value = "en")]
        lang: Language,
    },
}

#[derive(clap::Args)]
struct Setup {
    /// Discussion topic.
    #[arg(long)]
    topic: String,
    /// Participant role, in speaking order. Repeat for each role.
    #[arg(long = "role", required = true)]
    roles: Vec<String>,
    /// Rounds; each round gives every role one message.
    #[arg(long, default_value_t = 3)]
    turns: usize,
}

#[derive(clap::Args)]
struct Output {
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
    /// Also save the transcript as JSON.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("roundtable=info,roundtable_core=info,rtable=info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = config::load_or_minimal(&cli.config)?;

    match cli.command {
        Commands::Chunk { file } => run_chunk(&cfg, &file)?,
        Commands::Context {
            file,
            query,
            k,
            max_tokens,
        } => run_context(&cfg, &file, &query, k, max_tokens).await?,
        Commands::Analyze {
            file,
            format,
            deep,
            lang,
        } => {
            if deep {
                run_deep_analyze(&cfg, &file, format, lang).await?
            } else {
                run_analyze(&file, format)?
            }
        }
        Commands::Run {
            file,
            setup,
            output,
        } => {
            let orchestrator = connect(&cfg, file.as_deref()).await?;
            let state = orchestrator.start_discussion(&setup.topic, &setup.roles, setup.turns)?;
            let transcript = orchestrator.run_to_completion(state).await?;
            emit(&TranscriptFile::new(&setup.topic, transcript), &output)?;
        }
        Commands::Start { file, setup, state } => {
            // the generator is only checked when a step runs
            let index = match &file {
                Some(path) => prepare_document(path, &cfg).await?.index,
                None => None,
            };
            let orchestrator =
                Orchestrator::new(create_generator(&cfg.generation)?, cfg.discussion_settings())
                    .with_index(index);
            let discussion = orchestrator.start_discussion(&setup.topic, &setup.roles, setup.turns)?;
            let mut session = Session::new(discussion, file);
            save_session(&state, &mut session)?;
            println!(
                "Session saved to {} ({} messages to generate).",
                state.display(),
                remaining_messages(&session)
            );
        }
        Commands::Step { state } => run_step(&cfg, &state).await?,
        Commands::Continue {
            transcript,
            turns,
            roles,
            topic,
            doc,
            output,
        } => {
            let saved = load_transcript(&transcript)?;
            let topic = resolve_topic(topic, &saved)?;
            let roles = if roles.is_empty() { saved.roles.clone() } else { roles };
            let orchestrator = connect(&cfg, doc.as_deref()).await?;
            let transcript = orchestrator
                .continue_discussion(&topic, saved.transcript, &roles, turns)
                .await?;
            emit(&TranscriptFile::new(&topic, transcript), &output)?;
        }
        Commands::Guide {
            transcript,
            instruction,
            turns,
            topic,
            doc,
            output,
        } => {
            let saved = load_transcript(&transcript)?;
            let topic = resolve_topic(topic, &saved)?;
            let orchestrator = connect(&cfg, doc.as_deref()).await?;
            let transcript = orchestrator
                .apply_guidance(&topic, saved.transcript, &instruction, turns)
                .await?;
            emit(&TranscriptFile::new(&topic, transcript), &output)?;
        }
        Commands::Actions { transcript, lang } => {
            let saved = load_transcript(&transcript)?;
            let generator = create_generator(&cfg.generation)?;
            generator.ready().await?;
            let summary = generate_action_items(generator.as_ref(), &saved.transcript, lang).await?;
            println!("{}", summary);
        }
    }

    Ok(())
}

/// Create the generator, check it is ready, and index `doc` if given.
async fn connect(cfg: &Config, doc: Option<&Path>) -> Result<Orchestrator> {
    let generator = create_generator(&cfg.generation)?;
    let index = match doc {
        Some(path) => prepare_document(path, cfg).await?.index,
        None => None,
    };
    Ok(Orchestrator::connect(generator, index, cfg.discussion_settings()).await?)
}

fn remaining_messages(session: &Session) -> usize {
    let state = &session.state;
    let preparing = match state.phase {
        Phase::Preparing { next_role } => state.roles.len().saturating_sub(next_role),
        Phase::Discussing => 0,
    };
    let turns = state
        .position()
        .map_or(0, |position| state.target().saturating_sub(position));
    preparing + turns
}

fn resolve_topic(topic: Option<String>, saved: &TranscriptFile) -> Result<String> {
    match topic.or_else(|| Some(saved.topic.clone()).filter(|t| !t.trim().is_empty())) {
        Some(topic) => Ok(topic),
        None => bail!("The transcript has no topic; pass --topic"),
    }
}

fn emit(file: &TranscriptFile, output: &Output) -> Result<()> {
    println!("{}", transcript::render(file, output.format)?);
    if let Some(path) = &output.out {
        transcript::save_transcript(path, file)?;
        tracing::info!(path = %path.display(), messages = file.transcript.len(), "saved transcript");
    }
    Ok(())
}

fn run_chunk(cfg: &Config, file: &Path) -> Result<()> {
    let document = ingest::load_document(file)?;
    let chunks = ingest::chunk_document(&document, &cfg.chunking);
    println!(
        "{} chunks (max {} tokens, overlap {}) from {} bytes",
        chunks.len(),
        cfg.chunking.max_tokens,
        cfg.chunking.overlap_tokens,
        document.byte_len
    );
    for chunk in &chunks {
        let preview: String = chunk.text.chars().take(60).collect();
        println!(
            "#{:<3} {:>5} tok  q={}  [{}..{}]  {}",
            chunk.chunk_index,
            chunk.tokens,
            chunk.quality(),
            chunk.start,
            chunk.end,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

async fn run_context(
    cfg: &Config,
    file: &Path,
    query: &str,
    k: Option<usize>,
    max_tokens: Option<usize>,
) -> Result<()> {
    let prepared = prepare_document(file, cfg).await?;
    let Some(index) = prepared.index else {
        bail!("No retrieval index (embedding.provider = '{}')", cfg.embedding.provider);
    };
    let params = RetrievalParams {
        min_chars: cfg.retrieval.min_chars,
        ..RetrievalParams::default()
    };
    let chunks = search_filtered_with(index.as_ref(), query, k.unwrap_or(cfg.retrieval.k), &params).await;
    let bundle = ContextAssembler::new(cfg.context.scoring.clone())
        .assemble(&chunks, max_tokens.unwrap_or(cfg.context.max_tokens));

    if bundle.is_empty() {
        println!("No grounding context found for this query.");
        return Ok(());
    }
    println!("{}", bundle.render());
    println!(
        "\n{} sections, ~{} / {} tokens",
        bundle.sections.len(),
        bundle.tokens,
        bundle.max_tokens
    );
    Ok(())
}

fn run_analyze(file: &Path, format: OutputFormat) -> Result<()> {
    let document = ingest::load_document(file)?;
    let structure = analyze(&document.text);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&structure)?),
        OutputFormat::Text => {
            println!("{}", structure.summary_line());
            if let Some(title) = &structure.estimated_title {
                println!("Title:   {}", title);
            }
            if let Some(date) = &structure.possible_date {
                println!("Date:    {}", date);
            }
            for header in &structure.potential_headers {
                println!("  - {}", header);
            }
        }
    }
    Ok(())
}

/// Structure plus content analysis. An unusable model only costs the
/// content part; the report then summarizes from the structure.
async fn run_deep_analyze(
    cfg: &Config,
    file: &Path,
    format: OutputFormat,
    lang: Language,
) -> Result<()> {
    let document = ingest::load_document(file)?;
    let generator = match create_generator(&cfg.generation) {
        Ok(generator) => match generator.ready().await {
            Ok(()) => Some(generator),
            Err(e) => {
                tracing::warn!(error = %e, "model not ready, skipping content analysis");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "no model available, skipping content analysis");
            None
        }
    };
    let name = file
        .file_name()
        .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned());
    let report = analysis_report(generator.as_deref(), &document.text, &name, lang).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("{}", report.summary);
            println!();
            println!("{}", report.structure.summary_line());
            if !report.structure.key_entities.is_empty() {
                println!("Entities: {}", report.structure.key_entities.join(", "));
            }
            if let Some(content) = &report.content {
                for topic in &content.main_topics {
                    println!("  topic: {}", topic);
                }
                for point in &content.key_points {
                    println!("  point: {}", point);
                }
                for data in &content.key_data {
                    println!("  data:  {}", data);
                }
            }
            let info = &report.key_information;
            println!("{} key passages", info.key_passages.len());
            for passage in &info.key_passages {
                println!("  [{:?}] {}: {}", passage.importance, passage.source, passage.text);
            }
            if !info.search_keywords.is_empty() {
                println!("Keywords: {}", info.search_keywords.join(", "));
            }
        }
    }
    Ok(())
}

async fn run_step(cfg: &Config, path: &Path) -> Result<()> {
    let mut session = load_session(path)?;
    if session.state.is_complete() {
        println!("Discussion already complete ({} messages).", session.state.transcript.len());
        return Ok(());
    }

    let orchestrator = connect(cfg, session.document.as_deref()).await?;
    let outcome = orchestrator.step(session.state.clone()).await?;

    match outcome.grounding {
        Grounding::Applied { sections, tokens } => {
            tracing::info!(sections, tokens, "grounded step")
        }
        Grounding::Empty => tracing::warn!("no grounding context for this step"),
        Grounding::Disabled => {}
    }
    println!("{}", transcript::render_message(&outcome.message));

    session.state = outcome.state;
    save_session(path, &mut session)?;
    if outcome.is_complete {
        println!("\nDiscussion complete ({} messages).", session.state.transcript.len());
    }
    Ok(())
}
