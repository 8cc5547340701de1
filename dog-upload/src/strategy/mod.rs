//! Blob type strategies.
//!
//! Each blob type turns resolved content into a [`WritePlan`]: the ordered
//! list of service calls that lands the content. Plans are pure data; the
//! upload task executes them step by step.

mod append;
mod block;
mod page;

pub use append::AppendStrategy;
pub use block::BlockStrategy;
pub use page::{allocated_page_size, PageStrategy};
pub(crate) use page::page_blob_size;

use bytes::Bytes;

use crate::{
    BlobProperties, BlobResult, BlobType, ConflictOutcome, DestinationSpec, Tag, UploaderConfig,
};

/// Content ready to be planned: bytes after any compression, plus the
/// properties to store with the blob
#[derive(Debug, Clone)]
pub struct BlobContent {
    pub data: Bytes,
    pub properties: BlobProperties,
}

impl BlobContent {
    pub fn new(data: Bytes, properties: BlobProperties) -> Self {
        Self { data, properties }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One service call in a write plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStep {
    PutBlock { content: Bytes },
    CreateAppendBlob,
    AppendBlock { offset: u64, content: Bytes },
    /// Allocation; must precede every `PutPages`
    CreatePageBlob { size: u64 },
    PutPages { offset: u64, content: Bytes },
    SetTags { tags: Vec<Tag> },
    /// Terminal marker of a page plan
    Commit { content_length: u64 },
}

impl WriteStep {
    /// Name used in logs and transport errors
    pub fn operation(&self) -> &'static str {
        match self {
            Self::PutBlock { .. } => "write_block",
            Self::CreateAppendBlob => "create_append_blob",
            Self::AppendBlock { .. } => "write_append",
            Self::CreatePageBlob { .. } => "create_page_blob",
            Self::PutPages { .. } => "write_page",
            Self::SetTags { .. } => "set_tags",
            Self::Commit { .. } => "commit",
        }
    }
}

/// Ordered writes for one target blob
#[derive(Debug, Clone)]
pub struct WritePlan {
    pub blob_type: BlobType,
    pub properties: BlobProperties,
    /// Logical content length (before page padding)
    pub content_length: u64,
    pub steps: Vec<WriteStep>,
}

impl WritePlan {
    fn new(blob_type: BlobType, properties: BlobProperties, content_length: u64) -> Self {
        Self {
            blob_type,
            properties,
            content_length,
            steps: Vec::new(),
        }
    }

    fn push(&mut self, step: WriteStep) {
        self.steps.push(step);
    }

    fn push_tags(&mut self, tags: &[Tag]) {
        if !tags.is_empty() {
            self.push(WriteStep::SetTags { tags: tags.to_vec() });
        }
    }

    /// Offsets of every positioned write, in plan order
    pub fn write_offsets(&self) -> Vec<u64> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                WriteStep::AppendBlock { offset, .. } | WriteStep::PutPages { offset, .. } => {
                    Some(*offset)
                }
                WriteStep::PutBlock { .. } => Some(0),
                _ => None,
            })
            .collect()
    }
}

/// Builds the write plan for one blob type
pub trait WriteStrategy: Send + Sync {
    fn build_write_plan(
        &self,
        content: BlobContent,
        outcome: ConflictOutcome,
        destination: &DestinationSpec,
    ) -> BlobResult<WritePlan>;
}

/// Strategy implementing `blob_type`
pub fn strategy_for(blob_type: BlobType, config: &UploaderConfig) -> Box<dyn WriteStrategy> {
    match blob_type {
        BlobType::Block => Box::new(BlockStrategy),
        BlobType::Append => Box::new(AppendStrategy::new(config.max_append_block_bytes)),
        BlobType::Page => Box::new(PageStrategy::default()),
    }
}
