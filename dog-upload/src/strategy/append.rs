use crate::{
    BlobError, BlobResult, BlobType, ConflictOutcome, DestinationSpec, MAX_APPEND_BLOCK_BYTES,
};

use super::{BlobContent, WritePlan, WriteStep, WriteStrategy};

/// Sequential append blocks, each bounded by the service's block limit
#[derive(Debug, Clone, Copy)]
pub struct AppendStrategy {
    max_block_bytes: usize,
}

impl Default for AppendStrategy {
    fn default() -> Self {
        Self::new(MAX_APPEND_BLOCK_BYTES)
    }
}

impl AppendStrategy {
    pub fn new(max_block_bytes: usize) -> Self {
        Self {
            max_block_bytes: max_block_bytes.clamp(1, MAX_APPEND_BLOCK_BYTES),
        }
    }
}

impl WriteStrategy for AppendStrategy {
    fn build_write_plan(
        &self,
        content: BlobContent,
        outcome: ConflictOutcome,
        destination: &DestinationSpec,
    ) -> BlobResult<WritePlan> {
        if destination.blob_type != BlobType::Append {
            return Err(BlobError::config(format!(
                "Append strategy used for a {} destination",
                destination.blob_type
            )));
        }

        let content_length = content.data.len() as u64;
        let mut plan = WritePlan::new(BlobType::Append, content.properties, content_length);

        let mut offset = match outcome {
            ConflictOutcome::New | ConflictOutcome::Overwrite => {
                plan.push(WriteStep::CreateAppendBlob);
                0
            }
            ConflictOutcome::Append { base_offset } => base_offset,
        };

        let data = content.data;
        let mut start = 0;
        while start < data.len() {
            let end = (start + self.max_block_bytes).min(data.len());
            plan.push(WriteStep::AppendBlock {
                offset,
                content: data.slice(start..end),
            });
            offset += (end - start) as u64;
            start = end;
        }

        plan.push_tags(&destination.tags);
        Ok(plan)
    }
}
