use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::DEVELOPMENT_BLOB_ENDPOINT;
use crate::{
    BlobError, BlobProperties, BlobResult, BlobType, ConnectionMethod, ContainerCreation,
    CredentialResolver, SnapshotDeleteOption, StorageClient, Tag, PAGE_SIZE,
};

/// A blob held by [`MemoryStorageClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub blob_type: BlobType,
    pub content: Vec<u8>,
    pub properties: BlobProperties,
    pub tags: Vec<Tag>,
    /// Changes on every content write
    pub etag: String,
    /// Content of each snapshot, oldest first
    pub snapshots: Vec<Vec<u8>>,
}

impl StoredBlob {
    pub fn new(blob_type: BlobType, content: impl Into<Vec<u8>>) -> Self {
        Self {
            blob_type,
            content: content.into(),
            properties: BlobProperties::default(),
            tags: Vec::new(),
            etag: String::new(),
            snapshots: Vec::new(),
        }
    }

    fn with_properties(mut self, properties: &BlobProperties) -> Self {
        self.properties = properties.clone();
        self
    }
}

/// Every call made against a [`MemoryStorageClient`], in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    ContainerExists { container: String },
    CreateContainer { container: String },
    DeleteContainer { container: String },
    BlobExists { blob: String },
    GetBlobLength { blob: String },
    WriteBlock { blob: String, len: usize },
    CreateAppendBlob { blob: String },
    WriteAppend { blob: String, offset: u64, len: usize },
    CreatePageBlob { blob: String, size: u64 },
    WritePage { blob: String, offset: u64, len: usize },
    SetTags { blob: String, count: usize },
    DeleteBlob { blob: String },
    ReadBlob { blob: String },
}

impl StorageCall {
    /// True for calls that change blob content
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::WriteBlock { .. }
                | Self::CreateAppendBlob { .. }
                | Self::WriteAppend { .. }
                | Self::CreatePageBlob { .. }
                | Self::WritePage { .. }
        )
    }

    pub fn blob(&self) -> Option<&str> {
        match self {
            Self::ContainerExists { .. }
            | Self::CreateContainer { .. }
            | Self::DeleteContainer { .. } => None,
            Self::BlobExists { blob }
            | Self::GetBlobLength { blob }
            | Self::WriteBlock { blob, .. }
            | Self::CreateAppendBlob { blob }
            | Self::WriteAppend { blob, .. }
            | Self::CreatePageBlob { blob, .. }
            | Self::WritePage { blob, .. }
            | Self::SetTags { blob, .. }
            | Self::DeleteBlob { blob }
            | Self::ReadBlob { blob } => Some(blob),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    containers: HashMap<String, BTreeMap<String, StoredBlob>>,
    calls: Vec<StorageCall>,
    failing_blobs: HashSet<String>,
    etag_counter: u64,
}

impl MemoryState {
    fn next_etag(&mut self) -> String {
        self.etag_counter += 1;
        format!("\"0x8D{:012X}\"", self.etag_counter)
    }
}

/// In-process blob service.
///
/// Enforces the same append-position and page-alignment rules as the real
/// service, records every call, and can inject transport failures per blob.
#[derive(Clone)]
pub struct MemoryStorageClient {
    state: Arc<Mutex<MemoryState>>,
    endpoint: String,
    write_delay: Option<Duration>,
    active_writes: Arc<AtomicUsize>,
    peak_writes: Arc<AtomicUsize>,
}

impl Default for MemoryStorageClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            endpoint: DEVELOPMENT_BLOB_ENDPOINT.to_string(),
            write_delay: None,
            active_writes: Arc::new(AtomicUsize::new(0)),
            peak_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Use a different base URI for [`StorageClient::blob_uri`]. Clones keep
    /// sharing the same blobs.
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Hold every content write for `delay`
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn with_container<S: Into<String>>(self, container: S) -> Self {
        self.state.lock().containers.entry(container.into()).or_default();
        self
    }

    /// Seed a blob without recording a call. The blob gets a fresh ETag,
    /// which is returned.
    pub fn insert_blob(&self, container: &str, name: &str, mut blob: StoredBlob) -> String {
        let mut state = self.state.lock();
        blob.etag = state.next_etag();
        let etag = blob.etag.clone();
        state
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), blob);
        etag
    }

    /// Snapshot the current content of a blob. Returns the snapshot count.
    pub fn snapshot_blob(&self, container: &str, name: &str) -> Option<usize> {
        let mut state = self.state.lock();
        let stored = state.containers.get_mut(container)?.get_mut(name)?;
        stored.snapshots.push(stored.content.clone());
        Some(stored.snapshots.len())
    }

    /// Make every write to `blob` fail with a transport error
    pub fn fail_writes_to<S: Into<String>>(&self, blob: S) {
        self.state.lock().failing_blobs.insert(blob.into());
    }

    pub fn blob(&self, container: &str, name: &str) -> Option<StoredBlob> {
        self.state
            .lock()
            .containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .cloned()
    }

    pub fn blob_names(&self, container: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(container)
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.state.lock().containers.contains_key(container)
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.state.lock().calls.clone()
    }

    /// Number of content-changing calls made for `blob`
    pub fn write_count(&self, blob: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.is_write() && call.blob() == Some(blob))
            .count()
    }

    /// Highest number of writes observed in flight at once
    pub fn peak_concurrent_writes(&self) -> usize {
        self.peak_writes.load(Ordering::SeqCst)
    }

    fn record(&self, call: StorageCall) {
        self.state.lock().calls.push(call);
    }

    /// Record a write, hold it for the configured delay, then run `apply`
    /// and stamp the blob with a fresh ETag
    async fn write<F>(
        &self,
        call: StorageCall,
        container: &str,
        blob: &str,
        apply: F,
    ) -> BlobResult<()>
    where
        F: FnOnce(&mut MemoryState) -> BlobResult<()>,
    {
        let operation = operation_of(&call);
        self.record(call);

        let active = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.active_writes.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        if state.failing_blobs.contains(blob) {
            return Err(BlobError::transport(operation, blob, "injected transport failure"));
        }
        if !state.containers.contains_key(container) {
            return Err(BlobError::transport(
                operation,
                blob,
                format!("container '{}' not found", container),
            ));
        }
        apply(&mut state)?;

        let etag = state.next_etag();
        if let Some(stored) = state.containers.get_mut(container).and_then(|b| b.get_mut(blob)) {
            stored.etag = etag;
        }
        Ok(())
    }
}

fn operation_of(call: &StorageCall) -> &'static str {
    match call {
        StorageCall::WriteBlock { .. } => "write_block",
        StorageCall::CreateAppendBlob { .. } => "create_append_blob",
        StorageCall::WriteAppend { .. } => "write_append",
        StorageCall::CreatePageBlob { .. } => "create_page_blob",
        StorageCall::WritePage { .. } => "write_page",
        _ => "write",
    }
}

fn blob_mut<'a>(
    state: &'a mut MemoryState,
    container: &str,
    blob: &str,
    operation: &'static str,
) -> BlobResult<&'a mut StoredBlob> {
    state
        .containers
        .get_mut(container)
        .and_then(|blobs| blobs.get_mut(blob))
        .ok_or_else(|| BlobError::transport(operation, blob, "blob not found"))
}

fn insert(
    state: &mut MemoryState,
    container: &str,
    blob: &str,
    stored: StoredBlob,
) -> BlobResult<()> {
    state
        .containers
        .get_mut(container)
        .map(|blobs| {
            blobs.insert(blob.to_string(), stored);
        })
        .ok_or_else(|| BlobError::not_found(container))
}

/// Zero-filled page blob content; refuses sizes the process can't hold
fn zeroed_pages(blob: &str, size: u64) -> BlobResult<Vec<u8>> {
    let len = usize::try_from(size)
        .map_err(|_| BlobError::transport("create_page_blob", blob, "size exceeds address space"))?;
    let mut content = Vec::new();
    content
        .try_reserve_exact(len)
        .map_err(|e| BlobError::transport("create_page_blob", blob, e))?;
    content.resize(len, 0);
    Ok(content)
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    fn blob_uri(&self, container: &str, blob: &str) -> String {
        format!("{}/{}/{}", self.endpoint, container, blob)
    }

    async fn container_exists(&self, container: &str) -> BlobResult<bool> {
        self.record(StorageCall::ContainerExists {
            container: container.to_string(),
        });
        Ok(self.has_container(container))
    }

    async fn create_container(&self, container: &str) -> BlobResult<ContainerCreation> {
        self.record(StorageCall::CreateContainer {
            container: container.to_string(),
        });
        let mut state = self.state.lock();
        if state.containers.contains_key(container) {
            return Ok(ContainerCreation::AlreadyExists);
        }
        state.containers.insert(container.to_string(), BTreeMap::new());
        Ok(ContainerCreation::Created)
    }

    async fn delete_container(&self, container: &str) -> BlobResult<bool> {
        self.record(StorageCall::DeleteContainer {
            container: container.to_string(),
        });
        Ok(self.state.lock().containers.remove(container).is_some())
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> BlobResult<bool> {
        self.record(StorageCall::BlobExists { blob: blob.to_string() });
        Ok(self.blob(container, blob).is_some())
    }

    async fn get_blob_length(&self, container: &str, blob: &str) -> BlobResult<u64> {
        self.record(StorageCall::GetBlobLength { blob: blob.to_string() });
        self.blob(container, blob)
            .map(|stored| stored.content.len() as u64)
            .ok_or_else(|| BlobError::transport("get_blob_length", blob, "blob not found"))
    }

    async fn write_block(
        &self,
        container: &str,
        blob: &str,
        content: Bytes,
        properties: &BlobProperties,
    ) -> BlobResult<()> {
        let call = StorageCall::WriteBlock {
            blob: blob.to_string(),
            len: content.len(),
        };
        self.write(call, container, blob, |state| {
            let stored =
                StoredBlob::new(BlobType::Block, content.to_vec()).with_properties(properties);
            insert(state, container, blob, stored)
        })
        .await
    }

    async fn create_append_blob(
        &self,
        container: &str,
        blob: &str,
        properties: &BlobProperties,
    ) -> BlobResult<()> {
        let call = StorageCall::CreateAppendBlob { blob: blob.to_string() };
        self.write(call, container, blob, |state| {
            let stored = StoredBlob::new(BlobType::Append, Vec::new()).with_properties(properties);
            insert(state, container, blob, stored)
        })
        .await
    }

    async fn write_append(
        &self,
        container: &str,
        blob: &str,
        offset: u64,
        content: Bytes,
    ) -> BlobResult<()> {
        let call = StorageCall::WriteAppend {
            blob: blob.to_string(),
            offset,
            len: content.len(),
        };
        self.write(call, container, blob, |state| {
            let stored = blob_mut(state, container, blob, "write_append")?;
            if stored.blob_type != BlobType::Append {
                return Err(BlobError::transport(
                    "write_append",
                    blob,
                    "blob is not an append blob",
                ));
            }
            if stored.content.len() as u64 != offset {
                return Err(BlobError::transport(
                    "write_append",
                    blob,
                    format!(
                        "append position {} does not match blob length {}",
                        offset,
                        stored.content.len()
                    ),
                ));
            }
            stored.content.extend_from_slice(&content);
            Ok(())
        })
        .await
    }

    async fn create_page_blob(
        &self,
        container: &str,
        blob: &str,
        size: u64,
        properties: &BlobProperties,
    ) -> BlobResult<()> {
        let call = StorageCall::CreatePageBlob {
            blob: blob.to_string(),
            size,
        };
        self.write(call, container, blob, |state| {
            if size % PAGE_SIZE != 0 {
                return Err(BlobError::transport(
                    "create_page_blob",
                    blob,
                    format!("size {} is not page aligned", size),
                ));
            }
            let stored = StoredBlob::new(BlobType::Page, zeroed_pages(blob, size)?)
                .with_properties(properties);
            insert(state, container, blob, stored)
        })
        .await
    }

    async fn write_page(
        &self,
        container: &str,
        blob: &str,
        offset: u64,
        content: Bytes,
    ) -> BlobResult<()> {
        let call = StorageCall::WritePage {
            blob: blob.to_string(),
            offset,
            len: content.len(),
        };
        self.write(call, container, blob, |state| {
            let stored = blob_mut(state, container, blob, "write_page")?;
            if stored.blob_type != BlobType::Page {
                return Err(BlobError::transport("write_page", blob, "blob is not a page blob"));
            }
            if offset % PAGE_SIZE != 0 || content.len() as u64 % PAGE_SIZE != 0 {
                return Err(BlobError::transport("write_page", blob, "page range is not aligned"));
            }
            let size = stored.content.len() as u64;
            let end = offset
                .checked_add(content.len() as u64)
                .filter(|end| *end <= size)
                .ok_or_else(|| {
                    BlobError::transport(
                        "write_page",
                        blob,
                        format!("range at {} runs beyond blob size {}", offset, size),
                    )
                })?;
            stored.content[offset as usize..end as usize].copy_from_slice(&content);
            Ok(())
        })
        .await
    }

    async fn set_tags(&self, container: &str, blob: &str, tags: &[Tag]) -> BlobResult<()> {
        self.record(StorageCall::SetTags {
            blob: blob.to_string(),
            count: tags.len(),
        });
        let mut state = self.state.lock();
        let stored = blob_mut(&mut state, container, blob, "set_tags")?;
        stored.tags = tags.to_vec();
        Ok(())
    }

    async fn delete_blob(
        &self,
        container: &str,
        blob: &str,
        if_match: Option<&str>,
        snapshots: SnapshotDeleteOption,
    ) -> BlobResult<bool> {
        self.record(StorageCall::DeleteBlob { blob: blob.to_string() });
        let mut state = self.state.lock();
        let Some(blobs) = state.containers.get_mut(container) else {
            return Ok(false);
        };
        let Some(stored) = blobs.get_mut(blob) else {
            return Ok(false);
        };

        if let Some(etag) = if_match {
            if etag != "*" && etag != stored.etag {
                return Err(BlobError::transport(
                    "delete_blob",
                    blob,
                    format!("ETag {} does not match {}", etag, stored.etag),
                ));
            }
        }

        let has_snapshots = !stored.snapshots.is_empty();
        match snapshots {
            SnapshotDeleteOption::None if has_snapshots => Err(BlobError::transport(
                "delete_blob",
                blob,
                "blob has snapshots; choose a snapshot delete option",
            )),
            SnapshotDeleteOption::OnlySnapshots => {
                stored.snapshots.clear();
                Ok(has_snapshots)
            }
            SnapshotDeleteOption::None | SnapshotDeleteOption::IncludeSnapshots => {
                Ok(blobs.remove(blob).is_some())
            }
        }
    }

    async fn read_blob(&self, container: &str, blob: &str) -> BlobResult<Bytes> {
        self.record(StorageCall::ReadBlob { blob: blob.to_string() });
        self.blob(container, blob)
            .map(|stored| Bytes::from(stored.content))
            .ok_or_else(|| BlobError::not_found(format!("{}/{}", container, blob)))
    }
}

/// Resolves any valid connection method to the shared in-memory blobs,
/// addressed through the method's blob endpoint
#[derive(Clone, Default)]
pub struct MemoryCredentialResolver {
    client: MemoryStorageClient,
}

impl MemoryCredentialResolver {
    pub fn new(client: MemoryStorageClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &MemoryStorageClient {
        &self.client
    }
}

#[async_trait]
impl CredentialResolver for MemoryCredentialResolver {
    async fn resolve(&self, method: &ConnectionMethod) -> BlobResult<Arc<dyn StorageClient>> {
        method.validate()?;
        let endpoint = method.blob_endpoint()?;
        Ok(Arc::new(self.client.clone().with_endpoint(endpoint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> BlobProperties {
        BlobProperties::new("text/plain", "UTF-8")
    }

    #[tokio::test]
    async fn append_requires_matching_position() {
        let client = MemoryStorageClient::new().with_container("logs");
        client.create_append_blob("logs", "a.log", &props()).await.unwrap();
        client
            .write_append("logs", "a.log", 0, Bytes::from_static(b"one"))
            .await
            .unwrap();

        let err = client
            .write_append("logs", "a.log", 0, Bytes::from_static(b"two"))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Transport { operation: "write_append", .. }));

        client
            .write_append("logs", "a.log", 3, Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert_eq!(client.blob("logs", "a.log").unwrap().content, b"onetwo");
    }

    #[tokio::test]
    async fn page_writes_must_be_aligned_and_in_range() {
        let client = MemoryStorageClient::new().with_container("disks");
        client.create_page_blob("disks", "d.vhd", 1024, &props()).await.unwrap();

        assert!(client
            .write_page("disks", "d.vhd", 0, Bytes::from(vec![1u8; 100]))
            .await
            .is_err());
        assert!(client
            .write_page("disks", "d.vhd", 1024, Bytes::from(vec![1u8; 512]))
            .await
            .is_err());
        client
            .write_page("disks", "d.vhd", 512, Bytes::from(vec![7u8; 512]))
            .await
            .unwrap();

        let stored = client.blob("disks", "d.vhd").unwrap();
        assert!(stored.content[..512].iter().all(|b| *b == 0));
        assert!(stored.content[512..].iter().all(|b| *b == 7));
    }

    #[tokio::test]
    async fn writes_into_missing_container_fail() {
        let client = MemoryStorageClient::new();
        let err = client
            .write_block("nowhere", "a.txt", Bytes::from_static(b"x"), &props())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Transport { .. }));
    }

    #[tokio::test]
    async fn create_container_reports_existing() {
        let client = MemoryStorageClient::new();
        assert_eq!(client.create_container("c1").await.unwrap(), ContainerCreation::Created);
        assert_eq!(client.create_container("c1").await.unwrap(), ContainerCreation::AlreadyExists);
    }

    #[tokio::test]
    async fn injected_failures_are_recorded_and_returned() {
        let client = MemoryStorageClient::new().with_container("c1");
        client.fail_writes_to("bad.txt");

        assert!(client
            .write_block("c1", "bad.txt", Bytes::from_static(b"x"), &props())
            .await
            .is_err());
        assert_eq!(client.write_count("bad.txt"), 1);
        assert!(client.blob("c1", "bad.txt").is_none());
    }

    #[tokio::test]
    async fn writes_change_the_etag() {
        let client = MemoryStorageClient::new().with_container("c1");
        client
            .write_block("c1", "a.txt", Bytes::from_static(b"one"), &props())
            .await
            .unwrap();
        let first = client.blob("c1", "a.txt").unwrap().etag;
        client
            .write_block("c1", "a.txt", Bytes::from_static(b"two"), &props())
            .await
            .unwrap();
        let second = client.blob("c1", "a.txt").unwrap().etag;

        assert!(!first.is_empty());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn conditional_delete_checks_the_etag() {
        let client = MemoryStorageClient::new().with_container("c1");
        let etag = client.insert_blob("c1", "a.txt", StoredBlob::new(BlobType::Block, "a"));

        let err = client
            .delete_blob("c1", "a.txt", Some("\"stale\""), SnapshotDeleteOption::None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Transport { operation: "delete_blob", .. }));
        assert!(client.blob("c1", "a.txt").is_some());

        let deleted = client
            .delete_blob("c1", "a.txt", Some(&etag), SnapshotDeleteOption::None)
            .await
            .unwrap();
        assert!(deleted);
        assert!(client.blob("c1", "a.txt").is_none());
    }

    #[tokio::test]
    async fn snapshots_follow_the_delete_option() {
        let client = MemoryStorageClient::new().with_container("c1");
        client.insert_blob("c1", "a.txt", StoredBlob::new(BlobType::Block, "v1"));
        assert_eq!(client.snapshot_blob("c1", "a.txt"), Some(1));

        assert!(client
            .delete_blob("c1", "a.txt", None, SnapshotDeleteOption::None)
            .await
            .is_err());

        assert!(client
            .delete_blob("c1", "a.txt", None, SnapshotDeleteOption::OnlySnapshots)
            .await
            .unwrap());
        let stored = client.blob("c1", "a.txt").unwrap();
        assert!(stored.snapshots.is_empty());

        client.snapshot_blob("c1", "a.txt");
        assert!(client
            .delete_blob("c1", "a.txt", None, SnapshotDeleteOption::IncludeSnapshots)
            .await
            .unwrap());
        assert!(client.blob("c1", "a.txt").is_none());
    }

    #[tokio::test]
    async fn read_returns_content_or_not_found() {
        let client = MemoryStorageClient::new().with_container("c1");
        client.insert_blob("c1", "a.txt", StoredBlob::new(BlobType::Block, "hello"));

        assert_eq!(client.read_blob("c1", "a.txt").await.unwrap(), Bytes::from_static(b"hello"));
        let err = client.read_blob("c1", "b.txt").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound { .. }));
    }

    #[tokio::test]
    async fn oversized_page_blob_is_refused() {
        let client = MemoryStorageClient::new().with_container("disks");
        let err = client
            .create_page_blob("disks", "huge.vhd", u64::MAX - 511, &props())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Transport { operation: "create_page_blob", .. }));
        assert!(client.blob("disks", "huge.vhd").is_none());
    }

    #[tokio::test]
    async fn resolver_addresses_blobs_through_the_connection_endpoint() {
        let resolver = MemoryCredentialResolver::new(MemoryStorageClient::new());

        let client = resolver
            .resolve(&ConnectionMethod::connection_string("AccountName=acme;AccountKey=a2V5"))
            .await
            .unwrap();
        assert_eq!(
            client.blob_uri("docs", "a.txt"),
            "https://acme.blob.core.windows.net/docs/a.txt"
        );

        let client = resolver
            .resolve(&ConnectionMethod::sas_token("https://sas.example.net/", "sig=abc"))
            .await
            .unwrap();
        assert_eq!(client.blob_uri("docs", "a.txt"), "https://sas.example.net/docs/a.txt");

        client.create_container("docs").await.unwrap();
        assert!(resolver.client().has_container("docs"));
    }
}
