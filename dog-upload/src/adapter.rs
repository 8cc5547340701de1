use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::strategy::page_blob_size;
use crate::{
    validate_container_name, BlobError, BlobResult, BlobType, ConnectionMethod, CredentialResolver,
    DeleteBlobOptions, DeleteResult, FileEnumerator, GlobFileEnumerator, ReadResult,
    SnapshotDeleteOption, StorageClient, TextEncoding, UploadOrchestrator, UploadRequest,
    UploadResult, UploadSource, UploaderConfig,
};

/// The uploader callers embed: validates requests, resolves credentials and
/// hands the work to the orchestrator
pub struct BlobUploader {
    credentials: Arc<dyn CredentialResolver>,
    enumerator: Arc<dyn FileEnumerator>,
    config: UploaderConfig,
}

impl BlobUploader {
    /// Create an uploader that walks directories on the local filesystem
    pub fn new<R: CredentialResolver + 'static>(credentials: R, config: UploaderConfig) -> Self {
        Self {
            credentials: Arc::new(credentials),
            enumerator: Arc::new(GlobFileEnumerator),
            config,
        }
    }

    /// Replace the directory enumerator
    pub fn with_enumerator<E: FileEnumerator + 'static>(mut self, enumerator: E) -> Self {
        self.enumerator = Arc::new(enumerator);
        self
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Upload every target of `request`.
    ///
    /// Configuration faults are returned as `Err` before any service call.
    /// Everything after that is reported per target, in submission order.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn upload(
        &self,
        request: UploadRequest,
        cancel: CancellationToken,
    ) -> BlobResult<Vec<UploadResult>> {
        self.preflight(&request).await?;

        let client = self.resolve(&request.connection).await?;
        info!(
            container = %request.destination.container_name,
            blob_type = %request.destination.blob_type,
            "Upload request accepted"
        );

        UploadOrchestrator::new(self.enumerator.clone(), self.config.clone())
            .run(request, client, cancel)
            .await
    }

    /// Delete one blob with a single existence check
    #[instrument(skip(self, connection, options), fields(snapshots = ?options.snapshots))]
    pub async fn delete_blob(
        &self,
        connection: &ConnectionMethod,
        container: &str,
        blob: &str,
        options: &DeleteBlobOptions,
    ) -> BlobResult<DeleteResult> {
        connection.validate()?;
        validate_container_name(container)?;
        validate_blob_name(blob)?;

        let client = self.resolve(connection).await?;
        let missing = format!("Blob {} doesn't exist in container {}.", blob, container);

        if !client.blob_exists(container, blob).await? {
            return missing_outcome(missing, options.error_if_missing);
        }

        let deleted = client
            .delete_blob(container, blob, options.if_match(), options.snapshots)
            .await?;
        match (deleted, options.snapshots) {
            (true, SnapshotDeleteOption::OnlySnapshots) => {
                info!("Blob snapshots deleted");
                Ok(DeleteResult::deleted(format!(
                    "Snapshots of blob {} deleted from container {}.",
                    blob, container
                )))
            }
            (false, SnapshotDeleteOption::OnlySnapshots) => Ok(DeleteResult::missing(format!(
                "Blob {} has no snapshots in container {}.",
                blob, container
            ))),
            (true, _) => {
                info!("Blob deleted");
                Ok(DeleteResult::deleted(format!(
                    "Blob {} deleted from container {}.",
                    blob, container
                )))
            }
            (false, _) => {
                warn!("Blob disappeared before it could be deleted");
                missing_outcome(missing, options.error_if_missing)
            }
        }
    }

    /// Read a whole blob as text
    #[instrument(skip(self, connection))]
    pub async fn read_blob(
        &self,
        connection: &ConnectionMethod,
        container: &str,
        blob: &str,
        encoding: TextEncoding,
    ) -> BlobResult<ReadResult> {
        connection.validate()?;
        validate_container_name(container)?;
        validate_blob_name(blob)?;

        let client = self.resolve(connection).await?;
        let bytes = client.read_blob(container, blob).await?;
        debug!(bytes = bytes.len(), "Blob read");

        Ok(ReadResult {
            content: encoding.decode(&bytes),
        })
    }

    /// Delete a container and everything in it
    #[instrument(skip(self, connection))]
    pub async fn delete_container(
        &self,
        connection: &ConnectionMethod,
        container: &str,
        error_if_missing: bool,
    ) -> BlobResult<DeleteResult> {
        connection.validate()?;
        validate_container_name(container)?;

        let client = self.resolve(connection).await?;
        let missing = format!("Container {} not found.", container);

        if !client.container_exists(container).await? {
            return missing_outcome(missing, error_if_missing);
        }
        if client.delete_container(container).await? {
            info!("Container deleted");
            Ok(DeleteResult::deleted(format!("Container {} deleted.", container)))
        } else {
            missing_outcome(missing, error_if_missing)
        }
    }

    async fn resolve(&self, connection: &ConnectionMethod) -> BlobResult<Arc<dyn StorageClient>> {
        self.credentials.resolve(connection).await.map_err(|e| {
            if e.is_config() {
                e
            } else {
                BlobError::config(format!("Credential resolution failed: {}", e))
            }
        })
    }

    /// Every check that needs neither the service nor the source content
    async fn preflight(&self, request: &UploadRequest) -> BlobResult<()> {
        request.connection.validate()?;
        request.destination.validate()?;

        if request.parallelism == Some(0) {
            return Err(BlobError::config("Parallelism must be at least 1"));
        }

        let destination = &request.destination;
        let known_page_range = destination.blob_type == BlobType::Page
            && destination.page_offset >= 0
            && !request.compress;
        if let (UploadSource::File { path, .. }, true) = (&request.source, known_page_range) {
            if let Some(len) = known_file_size(path).await {
                let offset = destination.page_offset as u64;
                check_page_range(destination.page_max_size, offset, len)?;
            }
        }
        Ok(())
    }
}

fn validate_blob_name(blob: &str) -> BlobResult<()> {
    if blob.trim().is_empty() {
        return Err(BlobError::config("Blob name can't be empty"));
    }
    Ok(())
}

fn missing_outcome(info: String, error_if_missing: bool) -> BlobResult<DeleteResult> {
    if error_if_missing {
        Err(BlobError::not_found(info))
    } else {
        Ok(DeleteResult::missing(info))
    }
}

async fn known_file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

/// `offset` and the padded content must both fit the allocated page blob
fn check_page_range(page_max_size: u64, offset: u64, content_length: u64) -> BlobResult<()> {
    page_blob_size(page_max_size, offset, content_length).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DestinationSpec, MemoryCredentialResolver, MemoryStorageClient, StoredBlob};

    fn uploader(client: &MemoryStorageClient) -> BlobUploader {
        BlobUploader::new(MemoryCredentialResolver::new(client.clone()), UploaderConfig::default())
    }

    fn dev() -> ConnectionMethod {
        ConnectionMethod::connection_string("UseDevelopmentStorage=true")
    }

    #[test]
    fn page_range_checks() {
        assert!(check_page_range(0, 0, 600).is_ok());
        assert!(check_page_range(4096, 1024, 600).is_ok());
        assert!(check_page_range(1024, 512, 600).is_err());
        assert!(check_page_range(512, 1024, 10).is_err());
        assert!(check_page_range(u64::MAX, 0, 10).is_err());
    }

    #[tokio::test]
    async fn zero_parallelism_is_rejected_before_io() {
        let client = MemoryStorageClient::new();
        let request = UploadRequest::new(
            dev(),
            UploadSource::file("/nope.txt"),
            DestinationSpec::new("docs"),
        )
        .with_parallelism(0);

        let err = uploader(&client)
            .upload(request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_blob_reports_or_errors() {
        let client = MemoryStorageClient::new().with_container("docs");
        let uploader = uploader(&client);

        let options = DeleteBlobOptions::new();
        let result = uploader.delete_blob(&dev(), "docs", "gone.txt", &options).await.unwrap();
        assert!(!result.success);
        assert!(result.info.contains("gone.txt"));

        let options = DeleteBlobOptions::new().error_if_missing();
        let err = uploader.delete_blob(&dev(), "docs", "gone.txt", &options).await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_existing_blob_checks_once() {
        let client = MemoryStorageClient::new().with_container("docs");
        client.insert_blob("docs", "a.txt", StoredBlob::new(BlobType::Block, "a"));

        let options = DeleteBlobOptions::new().error_if_missing();
        let result = uploader(&client)
            .delete_blob(&dev(), "docs", "a.txt", &options)
            .await
            .unwrap();
        assert!(result.success);
        assert!(client.blob("docs", "a.txt").is_none());

        let checks = client
            .calls()
            .iter()
            .filter(|call| matches!(call, crate::StorageCall::BlobExists { .. }))
            .count();
        assert_eq!(checks, 1);
    }

    #[tokio::test]
    async fn delete_honors_etag_and_snapshot_options() {
        let client = MemoryStorageClient::new().with_container("docs");
        let etag = client.insert_blob("docs", "a.txt", StoredBlob::new(BlobType::Block, "a"));
        client.snapshot_blob("docs", "a.txt");
        let uploader = uploader(&client);

        let stale = DeleteBlobOptions::new()
            .with_verify_etag("\"0xSTALE\"")
            .with_snapshots(SnapshotDeleteOption::IncludeSnapshots);
        let err = uploader.delete_blob(&dev(), "docs", "a.txt", &stale).await.unwrap_err();
        assert!(matches!(err, BlobError::Transport { operation: "delete_blob", .. }));

        let snapshots_only =
            DeleteBlobOptions::new().with_snapshots(SnapshotDeleteOption::OnlySnapshots);
        let result = uploader
            .delete_blob(&dev(), "docs", "a.txt", &snapshots_only)
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.info.starts_with("Snapshots of blob a.txt"));
        assert!(client.blob("docs", "a.txt").is_some());

        let current = DeleteBlobOptions::new().with_verify_etag(etag);
        let result = uploader.delete_blob(&dev(), "docs", "a.txt", &current).await.unwrap();
        assert!(result.success);
        assert!(client.blob("docs", "a.txt").is_none());
    }

    #[tokio::test]
    async fn read_blob_decodes_with_the_requested_encoding() {
        let client = MemoryStorageClient::new().with_container("docs");
        let latin1 = StoredBlob::new(BlobType::Block, &b"p\xE4iv\xE4\xE4"[..]);
        client.insert_blob("docs", "fi.txt", latin1);
        let uploader = uploader(&client);
        let sas =
            ConnectionMethod::sas_token("https://acme.blob.core.windows.net", "sv=2024&sig=abc");

        let result = uploader
            .read_blob(&sas, "docs", "fi.txt", TextEncoding::Latin1)
            .await
            .unwrap();
        assert_eq!(result.content, "päivää");

        let err = uploader
            .read_blob(&sas, "docs", "none.txt", TextEncoding::Utf8)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NotFound { .. }));

        let err = uploader.read_blob(&sas, "docs", " ", TextEncoding::Utf8).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn delete_container_outcomes() {
        let client = MemoryStorageClient::new().with_container("old-data");
        let uploader = uploader(&client);

        assert!(uploader.delete_container(&dev(), "old-data", true).await.unwrap().success);
        assert!(!client.has_container("old-data"));

        let result = uploader.delete_container(&dev(), "old-data", false).await.unwrap();
        assert!(!result.success);
        assert!(uploader.delete_container(&dev(), "old-data", true).await.is_err());
    }

    #[tokio::test]
    async fn invalid_container_name_fails_before_resolution() {
        let client = MemoryStorageClient::new();
        let err = uploader(&client)
            .delete_container(&dev(), "Bad_Name", false)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(client.calls().is_empty());
    }
}
