use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::strategy::{strategy_for, BlobContent, WritePlan, WriteStep};
use crate::{
    BlobError, BlobProperties, BlobResult, CompressionPipe, ConflictOutcome, ConflictResolver,
    ContainerGate, ContentProvider, DestinationSpec, Resolution, StorageClient, UploadResult,
    UploaderConfig, GZIP_ENCODING,
};

/// Everything a task needs besides its own target; shared by every task of
/// one invocation
pub struct UploadContext {
    pub client: Arc<dyn StorageClient>,
    pub destination: DestinationSpec,
    pub config: UploaderConfig,
    pub compress: bool,
    pub cancel: CancellationToken,
    /// Creates the destination container for whichever task gets there first
    pub container: ContainerGate,
}

impl UploadContext {
    pub fn new(
        client: Arc<dyn StorageClient>,
        destination: DestinationSpec,
        config: UploaderConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            destination,
            config,
            compress: false,
            cancel,
            container: ContainerGate::new(),
        }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn blob_uri(&self, blob_name: &str) -> String {
        self.client.blob_uri(&self.destination.container_name, blob_name)
    }
}

/// One source file bound for one blob
#[derive(Debug)]
pub struct UploadTask {
    /// Submission index; the aggregate report is sorted on it
    pub index: usize,
    pub source_path: PathBuf,
    pub blob_name: String,
    pub content: ContentProvider,
}

impl UploadTask {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(
        index: usize,
        source_path: P,
        blob_name: S,
        content: ContentProvider,
    ) -> Self {
        Self {
            index,
            source_path: source_path.into(),
            blob_name: blob_name.into(),
            content,
        }
    }

    /// Result reported for a task that never started
    pub fn not_attempted(&self, ctx: &UploadContext) -> UploadResult {
        UploadResult::not_attempted(&self.source_path, ctx.blob_uri(&self.blob_name))
    }

    /// Run the task to completion. Failures are captured in the result.
    #[instrument(skip(self, ctx), fields(index = self.index, blob = %self.blob_name))]
    pub async fn run(self, ctx: &UploadContext) -> UploadResult {
        if ctx.cancel.is_cancelled() {
            return self.not_attempted(ctx);
        }

        let uri = ctx.blob_uri(&self.blob_name);
        let source_path = self.source_path.clone();
        let blob_name = self.blob_name.clone();
        let mut progress = Progress::default();

        match self.execute(ctx, &mut progress).await {
            Ok(bytes) => {
                debug!(bytes, "Upload finished");
                UploadResult::succeeded(source_path, uri, bytes)
            }
            Err(BlobError::Cancelled) if !progress.started => {
                debug!("Cancelled before the first write");
                UploadResult::not_attempted(source_path, uri)
            }
            Err(e) => {
                warn!(error = %e, blob = %blob_name, "Upload failed");
                UploadResult::failed(source_path, uri, e.to_string())
                    .with_bytes_written(progress.bytes)
            }
        }
    }

    async fn execute(self, ctx: &UploadContext, progress: &mut Progress) -> BlobResult<u64> {
        let destination = &ctx.destination;
        let container = destination.container_name.as_str();
        let client = ctx.client.as_ref();

        ConflictResolver::check_policy(destination.handle_existing, destination.blob_type)?;

        if destination.create_container_if_missing {
            ctx.container.ensure(client, container).await?;
        }

        let exists = if ConflictResolver::needs_existence_check(destination.handle_existing) {
            client.blob_exists(container, &self.blob_name).await?
        } else {
            false
        };

        let resolution =
            ConflictResolver::resolve(exists, destination.handle_existing, destination.blob_type)?;
        let outcome = match resolution {
            Resolution::Fail => return Err(BlobError::already_exists(&self.blob_name)),
            Resolution::ProceedAsNew => ConflictOutcome::New,
            Resolution::ProceedAsOverwrite => ConflictOutcome::Overwrite,
            Resolution::ProceedAsAppend => ConflictOutcome::Append {
                base_offset: client.get_blob_length(container, &self.blob_name).await?,
            },
        };
        debug!(?outcome, "Conflict resolved");

        let mut content = self.content;
        let mut compressed = false;
        if ctx.compress {
            if content.is_stream() {
                content = CompressionPipe::new().wrap(content);
                compressed = true;
            } else {
                warn!(
                    source = %self.source_path.display(),
                    "Compression requires stream content; uploading uncompressed"
                );
            }
        }

        let properties = blob_properties(&self.source_path, destination, &ctx.config, compressed);
        let data = content.into_bytes().await?;

        let plan = strategy_for(destination.blob_type, &ctx.config).build_write_plan(
            BlobContent::new(data, properties),
            outcome,
            destination,
        )?;

        execute_plan(client, container, &self.blob_name, plan, &ctx.cancel, progress).await
    }
}

#[derive(Debug, Default)]
struct Progress {
    started: bool,
    bytes: u64,
}

/// Run plan steps strictly in order, observing cancellation between steps
async fn execute_plan(
    client: &dyn StorageClient,
    container: &str,
    blob: &str,
    plan: WritePlan,
    cancel: &CancellationToken,
    progress: &mut Progress,
) -> BlobResult<u64> {
    let content_length = plan.content_length;
    let properties = &plan.properties;

    for step in plan.steps {
        if cancel.is_cancelled() {
            return Err(BlobError::Cancelled);
        }
        progress.started = true;

        let operation = step.operation();
        debug!(operation, "Executing write step");
        match step {
            WriteStep::PutBlock { content } => {
                let len = content.len() as u64;
                client.write_block(container, blob, content, properties).await?;
                progress.bytes = len;
            }
            WriteStep::CreateAppendBlob => {
                client.create_append_blob(container, blob, properties).await?;
            }
            WriteStep::AppendBlock { offset, content } => {
                let len = content.len() as u64;
                client.write_append(container, blob, offset, content).await?;
                progress.bytes += len;
            }
            WriteStep::CreatePageBlob { size } => {
                client.create_page_blob(container, blob, size, properties).await?;
            }
            WriteStep::PutPages { offset, content } => {
                let len = content.len() as u64;
                client.write_page(container, blob, offset, content).await?;
                progress.bytes = (progress.bytes + len).min(content_length);
            }
            WriteStep::SetTags { tags } => {
                client.set_tags(container, blob, &tags).await?;
            }
            WriteStep::Commit { content_length } => {
                debug!(content_length, "Page blob committed");
            }
        }
    }

    Ok(content_length)
}

/// Content type from the destination or the source file's extension;
/// encoding from the destination, compression, or the configured default
fn blob_properties(
    source_path: &Path,
    destination: &DestinationSpec,
    config: &UploaderConfig,
    compressed: bool,
) -> BlobProperties {
    let content_type = destination.content_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(source_path)
            .first_or_octet_stream()
            .to_string()
    });

    let content_encoding = match (&destination.content_encoding, compressed) {
        (Some(encoding), _) => encoding.clone(),
        (None, true) => GZIP_ENCODING.to_string(),
        (None, false) => config.default_content_encoding.clone(),
    };

    BlobProperties::new(content_type, content_encoding)
}
