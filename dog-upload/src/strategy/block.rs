use crate::{BlobError, BlobResult, BlobType, ConflictOutcome, DestinationSpec};

use super::{BlobContent, WritePlan, WriteStep, WriteStrategy};

/// Whole-content write of a block blob
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockStrategy;

impl WriteStrategy for BlockStrategy {
    fn build_write_plan(
        &self,
        content: BlobContent,
        outcome: ConflictOutcome,
        destination: &DestinationSpec,
    ) -> BlobResult<WritePlan> {
        if let ConflictOutcome::Append { .. } = outcome {
            return Err(BlobError::config("Block blobs can't be appended to"));
        }

        let content_length = content.data.len() as u64;
        let mut plan = WritePlan::new(BlobType::Block, content.properties, content_length);
        plan.push(WriteStep::PutBlock { content: content.data });
        plan.push_tags(&destination.tags);
        Ok(plan)
    }
}
