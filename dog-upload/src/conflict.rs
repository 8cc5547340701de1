use crate::{BlobError, BlobResult, BlobType, HandleExisting};

/// Decision taken for one target blob before any bytes are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Target absent: create it
    ProceedAsNew,
    /// Destructive create regardless of prior state
    ProceedAsOverwrite,
    /// Target present: continue after its current content
    ProceedAsAppend,
    /// `HandleExisting::Error` hit an existing blob
    Fail,
}

/// Resolution threaded into the write plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    New,
    Overwrite,
    /// Append after `base_offset` bytes already in the blob
    Append { base_offset: u64 },
}

impl ConflictOutcome {
    /// Whether the plan has to (re)create the blob before writing
    pub fn creates_blob(&self) -> bool {
        !matches!(self, Self::Append { .. })
    }
}

/// Maps existence and policy to a [`Resolution`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Configuration check that must run before any existence lookup
    pub fn check_policy(policy: HandleExisting, blob_type: BlobType) -> BlobResult<()> {
        if policy == HandleExisting::Append && blob_type != BlobType::Append {
            return Err(BlobError::config(format!(
                "HandleExisting::Append can only be used with append blobs, not {}",
                blob_type
            )));
        }
        Ok(())
    }

    /// Whether `policy` needs to know if the blob exists
    pub fn needs_existence_check(policy: HandleExisting) -> bool {
        !matches!(policy, HandleExisting::Overwrite)
    }

    pub fn resolve(
        exists: bool,
        policy: HandleExisting,
        blob_type: BlobType,
    ) -> BlobResult<Resolution> {
        Self::check_policy(policy, blob_type)?;

        Ok(match (policy, exists) {
            (HandleExisting::Overwrite, _) => Resolution::ProceedAsOverwrite,
            (HandleExisting::Error, false) | (HandleExisting::Append, false) => {
                Resolution::ProceedAsNew
            }
            (HandleExisting::Error, true) => Resolution::Fail,
            (HandleExisting::Append, true) => Resolution::ProceedAsAppend,
        })
    }
}
