pub mod chunk_store;
pub mod chunking;
pub mod config;
pub mod error;
pub mod extractor;
pub mod indexing;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod stores;
pub mod templates;
pub mod traits;

pub use chunk_store::{JsonChunkStore, MemoryChunkStore};
pub use chunking::{split_documents, ChunkingConfig, RecursiveSplitter};
pub use config::Settings;
pub use error::{
    AnswerError, ChunkStoreError, EmbeddingError, GenerationError, IndexingError, LoaderError,
    ProcessingError, RetrievalError, StoreError, ValidationError,
};
pub use extractor::{FileKind, FileLoader};
pub use indexing::IndexingCoordinator;
pub use ingest::{
    clean_file_name, discover_files, load_folder_assets, process_assets, AssetUpload,
};
pub use models::{
    Answer, Asset, Chunk, ChunkCandidate, CollectionInfo, Distance, DocumentType,
    GenerationMessage, IndexingReport, LoadedDocument, Metadata, ProcessingReport,
    RetrievedDocument, Role, SkippedAsset, VectorPayload, VectorRecord,
};
pub use orchestrator::{AnswerOrchestrator, RetrievalOrchestrator};
pub use providers::{GenerationDefaults, LlmBackend, LlmProviderFactory};
pub use stores::{collection_name, record_id_for, VectorDbBackend, VectorStoreFactory};
pub use templates::TemplateParser;
pub use traits::{
    ChunkStore, DocumentLoader, EmbeddingCapability, GenerationCapability, LlmProvider,
    VectorStoreCapability,
};
