use thiserror::Error;

/// Result type for blob upload operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur while uploading or deleting blobs
#[derive(Error, Debug)]
pub enum BlobError {
    /// Pre-flight fault: nothing has been sent to the storage service
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Blob already exists: {blob}")]
    AlreadyExists { blob: String },

    #[error("Not found: {name}")]
    NotFound { name: String },

    #[error("{operation} failed for '{blob}': {source}")]
    Transport {
        operation: &'static str,
        blob: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid search pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl BlobError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a transport error carrying the failed operation and blob name
    pub fn transport<B, E>(operation: &'static str, blob: B, error: E) -> Self
    where
        B: Into<String>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Transport {
            operation,
            blob: blob.into(),
            source: error.into(),
        }
    }

    /// Create an already-exists conflict error
    pub fn already_exists<S: Into<String>>(blob: S) -> Self {
        Self::AlreadyExists { blob: blob.into() }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(name: S) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Configuration errors abort a whole invocation; everything else is per target
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Pattern { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
