use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("text is not valid utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embeddings are not supported by the {backend} backend")]
    Unsupported { backend: String },

    #[error("embedding model is not set for {backend}")]
    ModelNotSet { backend: String },

    #[error("missing api key for {backend}")]
    MissingCredentials { backend: String },

    #[error("{backend} returned {status}: {message}")]
    Backend {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("{backend} embedding request timed out")]
    Timeout { backend: String },

    #[error("malformed embedding response from {backend}: {details}")]
    Malformed { backend: String, details: String },

    #[error("embedding dimension {actual} != configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text generation is not supported by the {backend} backend")]
    Unsupported { backend: String },

    #[error("generation model is not set for {backend}")]
    ModelNotSet { backend: String },

    #[error("missing api key for {backend}")]
    MissingCredentials { backend: String },

    #[error("{backend} returned {status}: {message}")]
    Backend {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("{backend} generation request timed out")]
    Timeout { backend: String },

    #[error("{backend} returned an empty completion")]
    EmptyResponse { backend: String },

    #[error("malformed completion from {backend}: {details}")]
    Malformed { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("vector dimension {actual} does not match collection size {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("batch {batch_index} failed after {committed} records were committed: {details}")]
    BatchFailed {
        batch_index: usize,
        committed: usize,
        details: String,
    },

    #[error("store not connected: {0}")]
    NotConnected(String),
}

#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("indexing is already running for project {0}")]
    AlreadyRunning(String),

    #[error("could not prepare collection {collection}: {source}")]
    Collection {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("could not load chunks: {0}")]
    ChunkStore(#[from] ChunkStoreError),

    #[error("embedding backend cannot index: {0}")]
    Embedding(#[source] EmbeddingError),

    #[error("record id {record_id} is shared by chunks {first} and {second}")]
    RecordIdCollision {
        record_id: u64,
        first: String,
        second: String,
    },

    #[error("upsert failed after {committed} records were committed: {source}")]
    Upsert {
        committed: usize,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid retrieval request: {0}")]
    Invalid(String),

    #[error("could not embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector search failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("chunk store failed: {0}")]
    ChunkStore(#[from] ChunkStoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
