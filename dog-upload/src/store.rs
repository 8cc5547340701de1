use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{BlobResult, Tag};

/// Outcome of a container creation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerCreation {
    Created,
    AlreadyExists,
}

/// How a blob delete treats the blob's snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SnapshotDeleteOption {
    /// Delete the blob only; fails when it has snapshots
    #[default]
    None,
    /// Delete the blob together with its snapshots
    IncludeSnapshots,
    /// Delete the snapshots and keep the blob
    OnlySnapshots,
}

/// HTTP properties stored with a blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobProperties {
    pub content_type: String,
    pub content_encoding: String,
}

impl BlobProperties {
    pub fn new<T: Into<String>, E: Into<String>>(content_type: T, content_encoding: E) -> Self {
        Self {
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
        }
    }
}

/// Blob service operations the uploader depends on.
///
/// Implementations own transport concerns (authentication, retries); every
/// call is a single request from the uploader's point of view.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Public URI of a blob
    fn blob_uri(&self, container: &str, blob: &str) -> String;

    async fn container_exists(&self, container: &str) -> BlobResult<bool>;

    /// Create a container; an existing container is not an error
    async fn create_container(&self, container: &str) -> BlobResult<ContainerCreation>;

    /// Returns true when the container existed and was deleted
    async fn delete_container(&self, container: &str) -> BlobResult<bool>;

    async fn blob_exists(&self, container: &str, blob: &str) -> BlobResult<bool>;

    /// Current content length of a blob
    async fn get_blob_length(&self, container: &str, blob: &str) -> BlobResult<u64>;

    /// Replace a block blob with `content`
    async fn write_block(
        &self,
        container: &str,
        blob: &str,
        content: Bytes,
        properties: &BlobProperties,
    ) -> BlobResult<()>;

    /// Create (or recreate) an empty append blob
    async fn create_append_blob(
        &self,
        container: &str,
        blob: &str,
        properties: &BlobProperties,
    ) -> BlobResult<()>;

    /// Append one block; `offset` must equal the blob's current length
    async fn write_append(
        &self,
        container: &str,
        blob: &str,
        offset: u64,
        content: Bytes,
    ) -> BlobResult<()>;

    /// Create (or recreate) a zero-filled page blob of `size` bytes
    async fn create_page_blob(
        &self,
        container: &str,
        blob: &str,
        size: u64,
        properties: &BlobProperties,
    ) -> BlobResult<()>;

    /// Write an aligned page range
    async fn write_page(
        &self,
        container: &str,
        blob: &str,
        offset: u64,
        content: Bytes,
    ) -> BlobResult<()>;

    async fn set_tags(&self, container: &str, blob: &str, tags: &[Tag]) -> BlobResult<()>;

    /// Returns true when something was deleted. A non-matching `if_match`
    /// ETag is an error.
    async fn delete_blob(
        &self,
        container: &str,
        blob: &str,
        if_match: Option<&str>,
        snapshots: SnapshotDeleteOption,
    ) -> BlobResult<bool>;

    /// Full content of a blob
    async fn read_blob(&self, container: &str, blob: &str) -> BlobResult<Bytes>;
}
