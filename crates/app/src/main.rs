use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rag_pipeline_core::{
    collection_name, load_folder_assets, process_assets, AnswerOrchestrator, ChunkingConfig,
    Distance, EmbeddingCapability, FileLoader, GenerationCapability, IndexingCoordinator,
    JsonChunkStore, LlmProvider, LlmProviderFactory, RetrievalOrchestrator, Settings,
    TemplateParser, VectorStoreCapability, VectorStoreFactory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rag-pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Backend used for answer generation.
    #[arg(long, env = "GENERATION_BACKEND", default_value = "OPENROUTER")]
    generation_backend: String,

    /// Backend used for embeddings.
    #[arg(long, env = "EMBEDDING_BACKEND", default_value = "GEMINI")]
    embedding_backend: String,

    /// Vector store backend (QDRANT or MEMORY).
    #[arg(long, env = "VECTOR_DB_BACKEND", default_value = "QDRANT")]
    vector_db_backend: String,

    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    openrouter_api_key: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "COHERE_API_KEY", hide_env_values = true)]
    cohere_api_key: Option<String>,

    #[arg(long, env = "GENERATION_MODEL_ID", default_value = "qwen/qwen3-4b:free")]
    generation_model_id: String,

    #[arg(long, env = "EMBEDDING_MODEL_ID", default_value = "text-embedding-004")]
    embedding_model_id: String,

    #[arg(long, env = "EMBEDDING_MODEL_SIZE", default_value = "768")]
    embedding_model_size: usize,

    /// Character budget for every prompt and history message.
    #[arg(long, env = "INPUT_DEFAULT_MAX_CHARACTERS", default_value = "1024")]
    input_default_max_characters: usize,

    #[arg(long, env = "GENERATION_DEFAULT_MAX_TOKENS", default_value = "500")]
    generation_default_max_tokens: u32,

    #[arg(long, env = "GENERATION_DEFAULT_TEMPERATURE", default_value = "0.7")]
    generation_default_temperature: f32,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Distance metric for new collections (cosine or dot).
    #[arg(long, env = "VECTOR_DB_DISTANCE_METHOD", default_value = "cosine")]
    vector_db_distance_method: Distance,

    #[arg(long, env = "PRIMARY_LANG", default_value = "en")]
    primary_lang: String,

    #[arg(long, env = "DEFAULT_LANG", default_value = "en")]
    default_lang: String,

    #[arg(long, env = "INDEXING_BATCH_SIZE", default_value = "50")]
    indexing_batch_size: usize,

    /// Timeout in seconds for every outbound request.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "60")]
    request_timeout_secs: u64,

    /// Directory holding processed chunks, one JSON file per project.
    #[arg(long, env = "CHUNK_DIR", default_value = ".rag-chunks")]
    chunk_dir: PathBuf,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            generation_backend: self.generation_backend.clone(),
            embedding_backend: self.embedding_backend.clone(),
            vector_db_backend: self.vector_db_backend.clone(),
            openrouter_api_key: self.openrouter_api_key.clone(),
            gemini_api_key: self.gemini_api_key.clone(),
            cohere_api_key: self.cohere_api_key.clone(),
            generation_model_id: self.generation_model_id.clone(),
            embedding_model_id: self.embedding_model_id.clone(),
            embedding_model_size: self.embedding_model_size,
            input_default_max_characters: self.input_default_max_characters,
            generation_default_max_tokens: self.generation_default_max_tokens,
            generation_default_temperature: self.generation_default_temperature,
            qdrant_url: self.qdrant_url.clone(),
            qdrant_api_key: self.qdrant_api_key.clone(),
            vector_db_distance_method: self.vector_db_distance_method,
            primary_lang: self.primary_lang.clone(),
            default_lang: self.default_lang.clone(),
            indexing_batch_size: self.indexing_batch_size,
            request_timeout_secs: self.request_timeout_secs,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Load, split and store the documents of a folder as project chunks.
    Process {
        /// Folder that contains .pdf and .txt files recursively.
        #[arg(long)]
        folder: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "100")]
        chunk_size: usize,
        #[arg(long, default_value = "20")]
        overlap: usize,
        /// Delete the project's existing chunks first.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
    /// Embed the project's chunks into its vector collection.
    Index {
        #[arg(long)]
        project: String,
        /// Drop and rebuild the collection.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
    /// Show the project's collection.
    Info {
        #[arg(long)]
        project: String,
    },
    /// Return the chunks closest to a query.
    Search {
        #[arg(long)]
        project: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        limit: usize,
    },
    /// Answer a question from the project's documents.
    Answer {
        #[arg(long)]
        project: String,
        #[arg(long)]
        question: String,
        #[arg(long, default_value = "5")]
        limit: usize,
        /// Print the prompt sent to the generator.
        #[arg(long, default_value_t = false)]
        show_prompt: bool,
    },
}

fn embedding_provider(
    factory: &LlmProviderFactory,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let mut provider = factory
        .create(&settings.embedding_backend)
        .ok_or_else(|| anyhow!("unknown embedding backend {}", settings.embedding_backend))?;
    provider.set_embedding_model(&settings.embedding_model_id, settings.embedding_model_size);
    Ok(Arc::from(provider))
}

fn generation_provider(
    factory: &LlmProviderFactory,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let mut provider = factory
        .create(&settings.generation_backend)
        .ok_or_else(|| anyhow!("unknown generation backend {}", settings.generation_backend))?;
    provider.set_generation_model(&settings.generation_model_id);
    Ok(Arc::from(provider))
}

async fn vector_store(settings: &Settings) -> anyhow::Result<Arc<dyn VectorStoreCapability>> {
    let store = VectorStoreFactory::new(settings)?
        .create(&settings.vector_db_backend)
        .ok_or_else(|| anyhow!("unknown vector db backend {}", settings.vector_db_backend))?;
    store
        .connect()
        .await
        .with_context(|| format!("cannot connect to {}", settings.vector_db_backend))?;
    Ok(store)
}

async fn run_process(
    chunk_store: &JsonChunkStore,
    folder: &Path,
    project: &str,
    config: ChunkingConfig,
    reset: bool,
) -> anyhow::Result<()> {
    let uploads = load_folder_assets(project, folder)?;
    info!(folder = %folder.display(), assets = uploads.len(), "processing folder");

    let report = process_assets(project, &uploads, config, reset, &FileLoader, chunk_store).await?;
    for skipped in &report.skipped_assets {
        warn!(asset = %skipped.asset_name, reason = %skipped.reason, "skipped asset");
    }

    println!(
        "{} chunks from {} assets stored for project {} ({} skipped)",
        report.inserted_chunks,
        report.processed_assets,
        project,
        report.skipped_assets.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();
    let chunk_store = Arc::new(JsonChunkStore::new(&cli.chunk_dir));

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "rag-pipeline boot"
    );

    match cli.command {
        Command::Process {
            folder,
            project,
            chunk_size,
            overlap,
            reset,
        } => {
            let config = ChunkingConfig::new(chunk_size, overlap)?;
            run_process(chunk_store.as_ref(), &folder, &project, config, reset).await?;
        }
        Command::Index { project, reset } => {
            let factory = LlmProviderFactory::new(&settings)?;
            let coordinator = IndexingCoordinator::new(
                embedding_provider(&factory, &settings)?,
                vector_store(&settings).await?,
                chunk_store,
            )
            .with_batch_size(settings.indexing_batch_size);

            let report = coordinator.index_project(&project, reset).await?;
            println!(
                "{} records indexed into {} from {} assets ({} chunks failed) at {}",
                report.inserted_count,
                report.collection,
                report.processed_asset_count,
                report.failed_chunks,
                report.indexed_at.to_rfc3339()
            );
        }
        Command::Info { project } => {
            let store = vector_store(&settings).await?;
            match store.collection_info(&collection_name(&project)).await? {
                Some(info) => println!(
                    "collection={} points={} size={} distance={}",
                    info.name, info.points_count, info.embedding_size, info.distance
                ),
                None => println!("project {project} has no collection yet"),
            }
        }
        Command::Search {
            project,
            query,
            limit,
        } => {
            let factory = LlmProviderFactory::new(&settings)?;
            let retrieval = RetrievalOrchestrator::new(
                embedding_provider(&factory, &settings)?,
                vector_store(&settings).await?,
            );

            let documents = retrieval.retrieve(&project, &query, limit).await?;
            if documents.is_empty() {
                println!("no documents found");
            }
            for (index, document) in documents.iter().enumerate() {
                println!("[{}] score={:.4}\n{}", index + 1, document.score, document.text);
            }
        }
        Command::Answer {
            project,
            question,
            limit,
            show_prompt,
        } => {
            let factory = LlmProviderFactory::new(&settings)?;
            let retrieval = RetrievalOrchestrator::new(
                embedding_provider(&factory, &settings)?,
                vector_store(&settings).await?,
            );
            let orchestrator = AnswerOrchestrator::new(
                retrieval,
                generation_provider(&factory, &settings)?,
                TemplateParser::new(&settings.primary_lang, &settings.default_lang),
            );

            let answer = orchestrator.answer(&project, &question, limit).await?;
            if show_prompt {
                for message in &answer.chat_history {
                    println!("[{:?}]\n{}\n", message.role, message.content);
                }
                println!("[prompt]\n{}\n", answer.full_prompt);
            }
            println!("{}", answer.answer_text);
            println!("evidence: {} documents", answer.evidence.len());
        }
    }

    Ok(())
}
