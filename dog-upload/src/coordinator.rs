use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::source::{directory_prefix, file_blob_name, relative_blob_name};
use crate::{
    BlobError, BlobResult, ConcurrencyController, ContainerCreation, ContentProvider,
    FileEnumerator, StorageClient, UploadContext, UploadRequest, UploadResult, UploadSource,
    UploadTask, UploaderConfig,
};

/// Creates the destination container at most once, however many tasks race
/// for it. Each invocation's [`UploadContext`] owns one.
#[derive(Debug, Default)]
pub struct ContainerGate {
    created: OnceCell<ContainerCreation>,
}

impl ContainerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `container` exists. Only the first caller issues the create call;
    /// later and concurrent callers observe its outcome. A failed attempt is
    /// not cached.
    pub async fn ensure(
        &self,
        client: &dyn StorageClient,
        container: &str,
    ) -> BlobResult<ContainerCreation> {
        let outcome = self
            .created
            .get_or_try_init(|| async {
                let outcome = client.create_container(container).await?;
                match outcome {
                    ContainerCreation::Created => info!(container, "Container created"),
                    ContainerCreation::AlreadyExists => {
                        debug!(container, "Container already exists")
                    }
                }
                Ok::<_, BlobError>(outcome)
            })
            .await?;
        Ok(*outcome)
    }
}

/// Turns a request into upload tasks and runs them
pub struct UploadOrchestrator {
    enumerator: Arc<dyn FileEnumerator>,
    config: UploaderConfig,
}

impl UploadOrchestrator {
    pub fn new(enumerator: Arc<dyn FileEnumerator>, config: UploaderConfig) -> Self {
        Self { enumerator, config }
    }

    /// One task per resolved target, indexed in enumeration order
    pub async fn resolve_targets(&self, request: &UploadRequest) -> BlobResult<Vec<UploadTask>> {
        match &request.source {
            UploadSource::File {
                path,
                blob_name,
                contents_only,
            } => {
                let rename_to = request.destination.rename_to.as_deref();
                let name = file_blob_name(path, blob_name.as_deref(), rename_to)?;
                let content = if *contents_only {
                    ContentProvider::stream_file(path)
                } else {
                    ContentProvider::File(path.clone())
                };
                Ok(vec![UploadTask::new(0, path, name, content)])
            }
            UploadSource::Directory {
                path,
                search_pattern,
                blob_folder,
            } => {
                if request.destination.rename_to.is_some() {
                    warn!("rename_to only applies to single-file sources; ignoring it");
                }

                let pattern = search_pattern
                    .as_deref()
                    .unwrap_or(self.config.default_search_pattern.as_str());
                let prefix = directory_prefix(path, blob_folder.as_deref());
                let files = self.enumerator.list_files(path, pattern).await?;
                debug!(count = files.len(), pattern, "Directory enumerated");

                Ok(files
                    .into_iter()
                    .enumerate()
                    .map(|(index, file)| {
                        let name = relative_blob_name(&prefix, path, &file);
                        UploadTask::new(index, &file, name, ContentProvider::File(file.clone()))
                    })
                    .collect())
            }
        }
    }

    /// Resolve targets and dispatch every task. The first task to run creates
    /// the container when the destination asks for it.
    #[instrument(
        skip_all,
        fields(
            request_id = %request.request_id,
            container = %request.destination.container_name
        )
    )]
    pub async fn run(
        &self,
        request: UploadRequest,
        client: Arc<dyn StorageClient>,
        cancel: CancellationToken,
    ) -> BlobResult<Vec<UploadResult>> {
        let tasks = self.resolve_targets(&request).await?;
        if tasks.is_empty() {
            info!("No files matched; nothing to upload");
            return Ok(Vec::new());
        }

        let parallelism = request.parallelism.unwrap_or(self.config.default_parallelism);
        let ctx = UploadContext::new(client, request.destination, self.config.clone(), cancel)
            .with_compression(request.compress);

        info!(targets = tasks.len(), parallelism, "Dispatching uploads");
        Ok(ConcurrencyController::new(parallelism).run(tasks, Arc::new(ctx)).await)
    }
}
