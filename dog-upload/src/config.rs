use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult, SnapshotDeleteOption};

/// Page blobs are allocated and written in 512-byte pages
pub const PAGE_SIZE: u64 = 512;

/// Largest single append block the blob service accepts (4 MiB)
pub const MAX_APPEND_BLOCK_BYTES: usize = 4 * 1024 * 1024;

/// Largest single page range write the blob service accepts (4 MiB)
pub const MAX_PAGE_WRITE_BYTES: usize = 4 * 1024 * 1024;

/// Largest page blob the service allocates (8 TiB)
pub const MAX_PAGE_BLOB_BYTES: u64 = 8 * 1024 * 1024 * 1024 * 1024;

/// Sentinel page offset: write at 0 and size the blob from the content
pub const PAGE_OFFSET_AUTO: i64 = -1;

/// Blob representation to create on the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BlobType {
    #[default]
    Block,
    Append,
    Page,
}

impl BlobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobType::Block => "BlockBlob",
            BlobType::Append => "AppendBlob",
            BlobType::Page => "PageBlob",
        }
    }
}

impl std::fmt::Display for BlobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when the target blob already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HandleExisting {
    /// Fail the target with "blob already exists"
    Error,
    /// Recreate the blob, discarding prior content
    #[default]
    Overwrite,
    /// Append to the existing blob (append blobs only)
    Append,
}

/// Blob index tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Where and how content lands on the storage service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationSpec {
    pub container_name: String,
    pub create_container_if_missing: bool,
    pub blob_type: BlobType,
    pub handle_existing: HandleExisting,

    /// Minimum page blob size; rounded up to a page boundary
    pub page_max_size: u64,

    /// First byte written in a page blob, or [`PAGE_OFFSET_AUTO`]
    pub page_offset: i64,

    /// Blob name override for single-file uploads
    pub rename_to: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub tags: Vec<Tag>,
}

impl Default for DestinationSpec {
    fn default() -> Self {
        Self {
            container_name: String::new(),
            create_container_if_missing: false,
            blob_type: BlobType::Block,
            handle_existing: HandleExisting::Overwrite,
            page_max_size: 0,
            page_offset: PAGE_OFFSET_AUTO,
            rename_to: None,
            content_type: None,
            content_encoding: None,
            tags: Vec::new(),
        }
    }
}

impl DestinationSpec {
    pub fn new<S: Into<String>>(container_name: S) -> Self {
        Self {
            container_name: container_name.into(),
            ..Self::default()
        }
    }

    pub fn with_blob_type(mut self, blob_type: BlobType) -> Self {
        self.blob_type = blob_type;
        self
    }

    pub fn with_handle_existing(mut self, policy: HandleExisting) -> Self {
        self.handle_existing = policy;
        self
    }

    /// Create the container on first use if it does not exist
    pub fn create_container(mut self) -> Self {
        self.create_container_if_missing = true;
        self
    }

    pub fn with_page_max_size(mut self, bytes: u64) -> Self {
        self.page_max_size = bytes;
        self
    }

    pub fn with_page_offset(mut self, offset: i64) -> Self {
        self.page_offset = offset;
        self
    }

    pub fn with_rename_to<S: Into<String>>(mut self, name: S) -> Self {
        self.rename_to = Some(name.into());
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_content_encoding<S: Into<String>>(mut self, encoding: S) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    pub fn with_tag<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    /// Checks that do not need the service or the source content.
    ///
    /// Runs before any I/O; a failure here aborts the whole invocation.
    pub fn validate(&self) -> BlobResult<()> {
        validate_container_name(&self.container_name)?;

        if self.handle_existing == HandleExisting::Append && self.blob_type != BlobType::Append {
            return Err(BlobError::config(format!(
                "HandleExisting::Append requires an append blob, got {}",
                self.blob_type
            )));
        }

        if self.blob_type == BlobType::Page {
            if self.page_max_size > MAX_PAGE_BLOB_BYTES {
                return Err(BlobError::config(format!(
                    "Page blob size {} exceeds the {} byte maximum",
                    self.page_max_size, MAX_PAGE_BLOB_BYTES
                )));
            }
            if self.page_offset < PAGE_OFFSET_AUTO {
                return Err(BlobError::config(format!(
                    "Page offset {} is invalid (must be -1 or >= 0)",
                    self.page_offset
                )));
            }
            if self.page_offset >= 0 && self.page_offset as u64 % PAGE_SIZE != 0 {
                return Err(BlobError::config(format!(
                    "Page offset {} is not aligned to a {}-byte boundary",
                    self.page_offset, PAGE_SIZE
                )));
            }
        }

        if let Some(name) = &self.rename_to {
            if name.trim().is_empty() {
                return Err(BlobError::config("rename_to can't be blank"));
            }
        }

        for tag in &self.tags {
            if tag.name.trim().is_empty() {
                return Err(BlobError::config("Tag names can't be blank"));
            }
        }

        Ok(())
    }
}

/// Container names: 3-63 chars, lowercase letters, digits and single dashes,
/// starting and ending with a letter or digit.
pub fn validate_container_name(name: &str) -> BlobResult<()> {
    if name.trim().is_empty() {
        return Err(BlobError::config("Container name can't be empty"));
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid = (3..=63).contains(&name.len())
        && valid_chars
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");

    if !valid {
        return Err(BlobError::config(format!(
            "Invalid container name '{}': use 3-63 lowercase letters, digits and single dashes",
            name
        )));
    }
    Ok(())
}

/// Options for deleting a single blob
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteBlobOptions {
    /// Return `NotFound` instead of an unsuccessful result
    pub error_if_missing: bool,
    /// Delete only while the blob's ETag still matches; blank means no check
    pub verify_etag: Option<String>,
    pub snapshots: SnapshotDeleteOption,
}

impl DeleteBlobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_if_missing(mut self) -> Self {
        self.error_if_missing = true;
        self
    }

    pub fn with_verify_etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.verify_etag = Some(etag.into());
        self
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotDeleteOption) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// The ETag to send as an `If-Match` condition
    pub fn if_match(&self) -> Option<&str> {
        self.verify_etag
            .as_deref()
            .map(str::trim)
            .filter(|etag| !etag.is_empty())
    }
}

/// Engine-wide tuning shared by every invocation
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Upper bound for a single append operation
    pub max_append_block_bytes: usize,

    /// Parallelism used when a request does not set one
    pub default_parallelism: usize,

    /// Content-encoding written when neither the request nor compression sets one
    pub default_content_encoding: String,

    /// Pattern used for directory sources without one
    pub default_search_pattern: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            max_append_block_bytes: MAX_APPEND_BLOCK_BYTES,
            default_parallelism: 64,
            default_content_encoding: "UTF-8".to_string(),
            default_search_pattern: "*".to_string(),
        }
    }
}

impl UploaderConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the append block limit (clamped to the service maximum)
    pub fn with_max_append_block_bytes(mut self, bytes: usize) -> Self {
        self.max_append_block_bytes = bytes.clamp(1, MAX_APPEND_BLOCK_BYTES);
        self
    }

    pub fn with_default_parallelism(mut self, parallelism: usize) -> Self {
        self.default_parallelism = parallelism.max(1);
        self
    }

    pub fn with_default_content_encoding<S: Into<String>>(mut self, encoding: S) -> Self {
        self.default_content_encoding = encoding.into();
        self
    }

    pub fn with_default_search_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.default_search_pattern = pattern.into();
        self
    }
}
