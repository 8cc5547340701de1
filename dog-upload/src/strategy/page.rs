use crate::{
    BlobError, BlobResult, BlobType, ConflictOutcome, DestinationSpec, MAX_PAGE_BLOB_BYTES,
    MAX_PAGE_WRITE_BYTES, PAGE_SIZE,
};

use super::{BlobContent, WritePlan, WriteStep, WriteStrategy};

/// Smallest multiple of [`PAGE_SIZE`] that holds both the configured
/// minimum size and the content
pub fn allocated_page_size(page_max_size: u64, content_length: u64) -> BlobResult<u64> {
    let size = align_up(page_max_size.max(content_length))?;
    if size > MAX_PAGE_BLOB_BYTES {
        return Err(BlobError::config(format!(
            "Page blob size {} exceeds the {} byte maximum",
            size, MAX_PAGE_BLOB_BYTES
        )));
    }
    Ok(size)
}

/// Allocated size for `content_length` bytes written at `offset`, or a
/// config error when the padded range does not fit
pub(crate) fn page_blob_size(
    page_max_size: u64,
    offset: u64,
    content_length: u64,
) -> BlobResult<u64> {
    let size = allocated_page_size(page_max_size, content_length)?;

    if offset % PAGE_SIZE != 0 {
        return Err(BlobError::config(format!(
            "Page offset {} is not aligned to a {}-byte boundary",
            offset, PAGE_SIZE
        )));
    }
    if offset > size {
        return Err(BlobError::config(format!(
            "Page offset {} is beyond the allocated page blob size {}",
            offset, size
        )));
    }
    let end = align_up(content_length)?.checked_add(offset);
    if end.map_or(true, |end| end > size) {
        return Err(BlobError::config(format!(
            "{} bytes at offset {} do not fit in a page blob of {} bytes",
            content_length, offset, size
        )));
    }
    Ok(size)
}

fn align_up(value: u64) -> BlobResult<u64> {
    value
        .div_ceil(PAGE_SIZE)
        .checked_mul(PAGE_SIZE)
        .ok_or_else(|| BlobError::config(format!("{} bytes overflow the page blob size", value)))
}

/// Pre-sized page blob written in aligned, zero-padded ranges
#[derive(Debug, Clone, Copy)]
pub struct PageStrategy {
    max_write_bytes: usize,
}

impl Default for PageStrategy {
    fn default() -> Self {
        Self::new(MAX_PAGE_WRITE_BYTES)
    }
}

impl PageStrategy {
    /// `max_write_bytes` is rounded down to whole pages (at least one)
    pub fn new(max_write_bytes: usize) -> Self {
        let page = PAGE_SIZE as usize;
        let pages = (max_write_bytes.min(MAX_PAGE_WRITE_BYTES) / page).max(1);
        Self {
            max_write_bytes: pages * page,
        }
    }
}

impl WriteStrategy for PageStrategy {
    fn build_write_plan(
        &self,
        content: BlobContent,
        outcome: ConflictOutcome,
        destination: &DestinationSpec,
    ) -> BlobResult<WritePlan> {
        if let ConflictOutcome::Append { .. } = outcome {
            return Err(BlobError::config("Page blobs can't be appended to"));
        }

        let content_length = content.data.len() as u64;
        let start = destination.page_offset.max(0) as u64;
        let size = page_blob_size(destination.page_max_size, start, content_length)?;

        let mut plan = WritePlan::new(BlobType::Page, content.properties, content_length);
        plan.push(WriteStep::CreatePageBlob { size });

        let data = content.data;
        let mut written = 0usize;
        while written < data.len() {
            let end = (written + self.max_write_bytes).min(data.len());
            let chunk = data.slice(written..end);
            let chunk = if chunk.len() as u64 % PAGE_SIZE == 0 {
                chunk
            } else {
                let mut padded = chunk.to_vec();
                let whole_pages = chunk.len().div_ceil(PAGE_SIZE as usize) * PAGE_SIZE as usize;
                padded.resize(whole_pages, 0);
                padded.into()
            };
            plan.push(WriteStep::PutPages {
                offset: start + written as u64,
                content: chunk,
            });
            written = end;
        }

        plan.push_tags(&destination.tags);
        plan.push(WriteStep::Commit { content_length });
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlobProperties;
    use bytes::Bytes;

    fn destination() -> DestinationSpec {
        DestinationSpec::new("disks").with_blob_type(BlobType::Page)
    }

    fn content(len: usize) -> BlobContent {
        BlobContent::new(Bytes::from(vec![0xAB; len]), BlobProperties::default())
    }

    #[test]
    fn allocation_is_smallest_page_multiple() {
        assert_eq!(allocated_page_size(0, 0).unwrap(), 0);
        assert_eq!(allocated_page_size(0, 1).unwrap(), 512);
        assert_eq!(allocated_page_size(0, 512).unwrap(), 512);
        assert_eq!(allocated_page_size(0, 600).unwrap(), 1024);
        assert_eq!(allocated_page_size(1000, 10).unwrap(), 1024);
        assert_eq!(allocated_page_size(2048, 600).unwrap(), 2048);
        assert_eq!(allocated_page_size(100, 3000).unwrap(), 3072);

        for max in (0..5000).step_by(97) {
            for len in (0..5000).step_by(131) {
                let size = allocated_page_size(max, len).unwrap();
                assert_eq!(size % PAGE_SIZE, 0);
                assert!(size >= max.max(len));
                assert!(size < max.max(len) + PAGE_SIZE);
            }
        }
    }

    #[test]
    fn oversized_allocation_is_config_error() {
        assert!(allocated_page_size(u64::MAX, 10).unwrap_err().is_config());
        assert!(allocated_page_size(MAX_PAGE_BLOB_BYTES + 1, 0).unwrap_err().is_config());
        assert_eq!(allocated_page_size(MAX_PAGE_BLOB_BYTES, 10).unwrap(), MAX_PAGE_BLOB_BYTES);

        let err = page_blob_size(MAX_PAGE_BLOB_BYTES, MAX_PAGE_BLOB_BYTES, 600).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn unbounded_destination_fails_the_plan() {
        let destination = destination().with_page_max_size(u64::MAX);
        let err = PageStrategy::default()
            .build_write_plan(content(10), ConflictOutcome::New, &destination)
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn six_hundred_bytes_with_auto_offset() {
        let plan = PageStrategy::default()
            .build_write_plan(content(600), ConflictOutcome::New, &destination())
            .unwrap();

        assert_eq!(plan.steps[0], WriteStep::CreatePageBlob { size: 1024 });
        match &plan.steps[1] {
            WriteStep::PutPages { offset, content } => {
                assert_eq!(*offset, 0);
                assert_eq!(content.len(), 1024);
                assert!(content[..600].iter().all(|b| *b == 0xAB));
                assert!(content[600..].iter().all(|b| *b == 0));
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(plan.steps[2], WriteStep::Commit { content_length: 600 });
        assert_eq!(plan.content_length, 600);
    }

    #[test]
    fn explicit_offset_inside_larger_blob() {
        let destination = destination().with_page_max_size(4096).with_page_offset(1024);
        let plan = PageStrategy::new(1024)
            .build_write_plan(content(1500), ConflictOutcome::Overwrite, &destination)
            .unwrap();

        assert_eq!(plan.steps[0], WriteStep::CreatePageBlob { size: 4096 });
        assert_eq!(plan.write_offsets(), vec![1024, 2048]);
        assert!(matches!(plan.steps.last(), Some(WriteStep::Commit { .. })));
    }

    #[test]
    fn offset_beyond_allocation_is_config_error() {
        let destination = destination().with_page_max_size(512).with_page_offset(1024);
        let err = PageStrategy::default()
            .build_write_plan(content(10), ConflictOutcome::New, &destination)
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn content_overflowing_allocation_is_config_error() {
        let destination = destination().with_page_max_size(1024).with_page_offset(512);
        let err = PageStrategy::default()
            .build_write_plan(content(600), ConflictOutcome::New, &destination)
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn tags_precede_commit() {
        let destination = destination().with_tag("kind", "disk");
        let plan = PageStrategy::default()
            .build_write_plan(content(10), ConflictOutcome::New, &destination)
            .unwrap();
        let n = plan.steps.len();
        assert!(matches!(plan.steps[n - 2], WriteStep::SetTags { .. }));
        assert!(matches!(plan.steps[n - 1], WriteStep::Commit { .. }));
    }
}
