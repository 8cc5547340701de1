//! # dog-upload: concurrent uploads into Azure-style blob storage
//!
//! `dog-upload` takes a local file or directory and lands it in a blob
//! container as block, append or page blobs. It can also read a blob back as
//! text and delete blobs or containers. Callers describe *what* to
//! upload; the crate owns conflict handling, page alignment, append
//! positioning, optional gzip compression and bounded parallelism.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_upload::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! // 1. Pick how to reach the storage service
//! let resolver = MemoryCredentialResolver::new(MemoryStorageClient::new());
//! let uploader = BlobUploader::new(resolver, UploaderConfig::default());
//!
//! // 2. Describe the upload
//! let request = UploadRequest::new(
//!     ConnectionMethod::connection_string("UseDevelopmentStorage=true"),
//!     UploadSource::directory("/var/exports").with_search_pattern("*.csv"),
//!     DestinationSpec::new("exports").create_container(),
//! )
//! .with_parallelism(8);
//!
//! // 3. One result per file, in enumeration order
//! for result in uploader.upload(request, CancellationToken::new()).await? {
//!     println!("{} -> {} ({:?})", result.source_path.display(), result.blob_uri, result.status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │    BlobUploader      │  ← pre-flight checks, credentials
//! ├──────────────────────┤
//! │  UploadOrchestrator  │  ← targets, container creation
//! ├──────────────────────┤
//! │ ConcurrencyController│  ← bounded workers, ordered results
//! ├──────────────────────┤
//! │  UploadTask          │  ← conflict resolution, write plan
//! ├──────────────────────┤
//! │  StorageClient       │  ← service primitives
//! └──────────────────────┘
//! ```
//!
//! Configuration faults are returned before any service call. Everything
//! else (conflicts, transport failures, cancellation) is reported per file
//! in the returned [`UploadResult`]s.

pub mod adapter;
mod compression;
mod config;
mod conflict;
pub mod connection;
mod coordinator;
mod encoding;
mod error;
mod executor;
pub mod memory;
mod receipt;
pub mod source;
pub mod store;
pub mod strategy;
mod types;
mod upload;

pub use adapter::BlobUploader;
pub use compression::{CompressionPipe, GZIP_ENCODING};
pub use config::{
    validate_container_name, BlobType, DeleteBlobOptions, DestinationSpec, HandleExisting, Tag,
    UploaderConfig, MAX_APPEND_BLOCK_BYTES, MAX_PAGE_BLOB_BYTES, MAX_PAGE_WRITE_BYTES,
    PAGE_OFFSET_AUTO, PAGE_SIZE,
};
pub use conflict::{ConflictOutcome, ConflictResolver, Resolution};
pub use connection::{ConnectionMethod, CredentialResolver};
pub use coordinator::{ContainerGate, UploadOrchestrator};
pub use encoding::TextEncoding;
pub use error::{BlobError, BlobResult};
pub use executor::ConcurrencyController;
pub use memory::{MemoryCredentialResolver, MemoryStorageClient, StorageCall, StoredBlob};
pub use receipt::{DeleteResult, ReadResult, UploadResult, UploadStatus};
pub use source::{FileEnumerator, GlobFileEnumerator};
pub use store::{BlobProperties, ContainerCreation, SnapshotDeleteOption, StorageClient};
pub use types::{ByteStream, ContentProvider, UploadRequest, UploadSource};
pub use upload::{UploadContext, UploadTask};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobError, BlobResult, BlobType, BlobUploader, ConnectionMethod, DeleteBlobOptions,
        DestinationSpec, HandleExisting, MemoryCredentialResolver, MemoryStorageClient,
        TextEncoding, UploadRequest, UploadResult, UploadSource, UploadStatus, UploaderConfig,
    };
}
