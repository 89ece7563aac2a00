use thiserror::Error;

/// Errors that can occur when talking to a remote object store
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The backend answered with a failure status (auth, throttling, server fault)
    #[error("Remote storage error: {0}")]
    Remote(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The provider cannot be built from the supplied credentials or settings
    #[error("Storage configuration error: {0}")]
    Config(String),
}

/// Errors reported by the transformation engine.
///
/// Every variant is a client fault: the input or the parameters were not
/// acceptable. They are never retried.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// The input bytes could not be decoded
    #[error("cannot decode image: {0}")]
    Decode(String),

    /// The result could not be encoded in the requested format
    #[error("cannot encode image: {0}")]
    Encode(String),

    /// A parameter required by the operation is missing or out of range
    #[error("{0}")]
    InvalidParameter(String),
}

/// Failure of the external tiling tool
#[derive(Debug, Clone, Error)]
pub enum ToolInvocationError {
    /// The process could not be started at all
    #[error("failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    /// The process ran and exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Errors that terminate a tile pyramid job.
///
/// The message of the error is what ends up in the status marker.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("dzfiles: storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("dzfiles: error creating dz files: {0}")]
    Tool(#[from] ToolInvocationError),

    /// Local filesystem error in the staging directory
    #[error("dzfiles: staging error: {0}")]
    Staging(String),

    /// An upload task panicked or was aborted
    #[error("dzfiles: upload task failed: {0}")]
    Join(String),
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Staging(err.to_string())
    }
}

/// Errors surfaced synchronously on the request path.
///
/// Each variant maps to one HTTP status and error type in the server layer.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// No inline body and no backend parameters, or an empty image
    #[error("Missing image source: {0}")]
    MissingSource(String),

    /// A storage backend was selected but no output key was given
    #[error("Missing output key for {0} destination")]
    MissingOutputKey(&'static str),

    /// The sniffed input type is not a supported image type
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The requested output type is not recognized
    #[error("Unsupported output image format: {0}")]
    InvalidOutputFormat(String),

    /// Query parameters could not be parsed
    #[error("Error while processing parameters, {0}")]
    InvalidParameters(String),

    /// The engine rejected the input or parameters
    #[error("Error while processing the image: {0}")]
    Transform(#[from] TransformError),

    /// The secondary (overlay) asset could not be fetched
    #[error("Error while downloading overlay: {0}")]
    OverlayDownload(StorageError),

    /// Reading the source or writing the destination failed
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// No transformation is registered under this name
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The job submission body is not valid
    #[error("Malformed request body: {0}")]
    MalformedRequestBody(String),

    /// The tile job queue cannot accept more work
    #[error("Tile job queue is full")]
    QueueFull,

    #[error("Job not found: {0}")]
    JobNotFound(String),
}
