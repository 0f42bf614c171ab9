//! # docqa CLI
//!
//! The `docqa` binary is the boundary layer in front of the engine. It
//! provides commands for database initialization, document ingestion,
//! grounded question answering, and document management.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database and run schema migrations |
//! | `docqa ingest <file>` | Upload a document and process it to completion |
//! | `docqa docs` | List documents with status and chunk counts |
//! | `docqa delete <id>` | Delete a document and its chunks |
//! | `docqa ask "<question>"` | Ask a question grounded in the documents |
//! | `docqa history <id>` | Show the messages of a conversation |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use docqa::config::{self, Config};
use docqa::db;
use docqa::embedder::{EmbeddingGateway, HttpEmbeddingProvider};
use docqa::error::EngineError;
use docqa::extract::{DefaultExtractor, MEDIA_MARKDOWN, MEDIA_PDF, MEDIA_PLAIN};
use docqa::generate::HttpGenerator;
use docqa::ingest::IngestionPipeline;
use docqa::migrate;
use docqa::models::{DocumentStatus, MessageRole};
use docqa::rag::RagOrchestrator;
use docqa::store::sqlite::SqliteStore;
use docqa::store::Store;
use docqa::workers::WorkerPool;

/// docqa — a retrieval-augmented question answering engine for uploaded
/// documents.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Answer questions over your documents with retrieval-augmented generation",
    version,
    long_about = "docqa ingests documents (PDF, plain text, markdown), chunks and embeds them, \
    and answers natural-language questions by retrieving the most relevant chunks and handing \
    them to a language model as grounded context, with citations back to the sources."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Numeric id of the acting user.
    #[arg(long, global = true, default_value_t = 1)]
    user: i64,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// chunks, conversations, messages). Idempotent.
    Init,

    /// Upload a document and process it.
    ///
    /// Extracts text, chunks it, embeds the chunks, and stores everything.
    /// The command waits for processing to finish and reports the final
    /// document status.
    Ingest {
        /// Path to the file to ingest.
        file: PathBuf,

        /// Media type of the file. Guessed from the extension when omitted
        /// (pdf, txt, md).
        #[arg(long)]
        media_type: Option<String>,
    },

    /// List documents with their status and chunk counts.
    Docs,

    /// Delete a document and all of its chunks.
    Delete {
        /// Document id.
        id: i64,
    },

    /// Ask a question grounded in the ingested documents.
    Ask {
        /// The question text.
        question: String,

        /// Continue an existing conversation instead of starting a new one.
        #[arg(long)]
        conversation: Option<i64>,
    },

    /// Show the messages of a conversation.
    History {
        /// Conversation id.
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest { file, media_type } => {
            run_ingest(&config, cli.user, &file, media_type).await
        }
        Commands::Docs => run_docs(&config, cli.user).await,
        Commands::Delete { id } => run_delete(&config, cli.user, id).await,
        Commands::Ask {
            question,
            conversation,
        } => run_ask(&config, cli.user, &question, conversation).await,
        Commands::History { id } => run_history(&config, cli.user, id).await,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

async fn connect_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(&config.db.path).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

fn build_gateway(config: &Config) -> Result<Arc<EmbeddingGateway>, EngineError> {
    let provider = Arc::new(HttpEmbeddingProvider::new(&config.embedding)?);
    Ok(Arc::new(EmbeddingGateway::new(
        provider,
        config.embedding.clone(),
    )))
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

async fn run_ingest(
    config: &Config,
    user: i64,
    file: &Path,
    media_type: Option<String>,
) -> Result<()> {
    let media_type = match media_type {
        Some(t) => t,
        None => guess_media_type(file)?,
    };
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());
    let bytes = std::fs::read(file)?;

    let store = connect_store(config).await?;
    let gateway = build_gateway(config)?;
    let pool = Arc::new(WorkerPool::new(
        config.workers.pool_size,
        config.workers.queue_capacity,
    ));
    let pipeline = IngestionPipeline::new(
        store.clone(),
        gateway,
        Arc::new(DefaultExtractor),
        pool.clone(),
        config.chunking.clone(),
        config.upload.clone(),
    );

    let document = pipeline.upload(user, &filename, &media_type, &bytes).await?;
    println!("ingest {}", filename);
    println!("  document id: {}", document.id);
    println!("  media type: {}", document.media_type);
    println!("  size: {} bytes", document.file_size);

    // The pipeline is fire-and-forget; the CLI drains the pool so the
    // process does not exit mid-ingestion.
    pool.shutdown(Duration::from_secs(config.workers.shutdown_grace_secs))
        .await;

    match store.get_document(document.id).await? {
        Some(done) => {
            println!("  status: {}", done.status.as_str());
            if done.status == DocumentStatus::Completed {
                println!("  chunks: {}", done.total_chunks);
            }
        }
        None => println!("  status: unknown"),
    }
    println!("ok");
    Ok(())
}

async fn run_docs(config: &Config, user: i64) -> Result<()> {
    let store = connect_store(config).await?;
    let documents = store.list_documents(user).await?;

    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    for doc in documents {
        let date = chrono::DateTime::from_timestamp(doc.uploaded_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{}. {} [{}] chunks={} uploaded={}",
            doc.id,
            doc.filename,
            doc.status.as_str(),
            doc.total_chunks,
            date
        );
    }
    Ok(())
}

async fn run_delete(config: &Config, user: i64, id: i64) -> Result<()> {
    let store = connect_store(config).await?;
    let gateway = build_gateway(config)?;
    let pool = Arc::new(WorkerPool::new(1, 1));
    let pipeline = IngestionPipeline::new(
        store,
        gateway,
        Arc::new(DefaultExtractor),
        pool,
        config.chunking.clone(),
        config.upload.clone(),
    );

    pipeline.delete_document(id, user).await?;
    println!("deleted document {id}");
    Ok(())
}

async fn run_ask(
    config: &Config,
    user: i64,
    question: &str,
    conversation: Option<i64>,
) -> Result<()> {
    let store = connect_store(config).await?;
    let gateway = build_gateway(config)?;
    let generator = Arc::new(HttpGenerator::new(&config.generation)?);
    let rag = RagOrchestrator::new(store, gateway, generator, config.retrieval.clone());

    let reply = rag.answer(user, question, conversation).await?;

    println!("{}", reply.message);
    println!();
    if reply.citations.is_empty() {
        println!("(no sources)");
    } else {
        println!("Sources:");
        for (i, citation) in reply.citations.iter().enumerate() {
            println!(
                "  {}. [{:.2}] {} (document {}, chunk {})",
                i + 1,
                citation.similarity_score,
                citation.metadata.document_name,
                citation.metadata.document_id,
                citation.chunk_id
            );
        }
    }
    println!();
    println!("conversation: {}", reply.conversation_id);
    Ok(())
}

async fn run_history(config: &Config, user: i64, id: i64) -> Result<()> {
    let store = connect_store(config).await?;
    let gateway = build_gateway(config)?;
    let generator = Arc::new(HttpGenerator::new(&config.generation)?);
    let rag = RagOrchestrator::new(store, gateway, generator, config.retrieval.clone());

    let messages = rag.history(id, user).await?;
    for message in messages {
        let who = match message.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "assistant",
        };
        println!("[{who}] {}", message.content);
        for citation in &message.citations {
            println!(
                "    source: {} ({:.2})",
                citation.metadata.document_name, citation.similarity_score
            );
        }
    }
    Ok(())
}

fn guess_media_type(file: &Path) -> Result<String> {
    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let media_type = match ext.as_deref() {
        Some("pdf") => MEDIA_PDF,
        Some("md") | Some("markdown") => MEDIA_MARKDOWN,
        Some("txt") | Some("text") => MEDIA_PLAIN,
        _ => anyhow::bail!(
            "could not guess media type for {}; pass --media-type",
            file.display()
        ),
    };
    Ok(media_type.to_string())
}
