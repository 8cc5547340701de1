use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Terminal state of one upload target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Succeeded,
    Failed,
    /// Cancelled before the target started
    NotAttempted,
}

/// Result reported for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub source_path: PathBuf,
    pub blob_uri: String,
    pub success: bool,
    pub status: UploadStatus,
    /// Human-readable detail; empty on success
    pub message: String,
    /// Logical bytes written, excluding page padding
    pub bytes_written: u64,
}

impl UploadResult {
    pub fn succeeded<P: Into<PathBuf>, U: Into<String>>(
        source_path: P,
        blob_uri: U,
        bytes_written: u64,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            blob_uri: blob_uri.into(),
            success: true,
            status: UploadStatus::Succeeded,
            message: String::new(),
            bytes_written,
        }
    }

    pub fn failed<P, U, M>(source_path: P, blob_uri: U, message: M) -> Self
    where
        P: Into<PathBuf>,
        U: Into<String>,
        M: Into<String>,
    {
        Self {
            source_path: source_path.into(),
            blob_uri: blob_uri.into(),
            success: false,
            status: UploadStatus::Failed,
            message: message.into(),
            bytes_written: 0,
        }
    }

    pub fn not_attempted<P: Into<PathBuf>, U: Into<String>>(source_path: P, blob_uri: U) -> Self {
        Self {
            source_path: source_path.into(),
            blob_uri: blob_uri.into(),
            success: false,
            status: UploadStatus::NotAttempted,
            message: "Operation cancelled before upload started".to_string(),
            bytes_written: 0,
        }
    }

    /// Record bytes written before a failure
    pub fn with_bytes_written(mut self, bytes: u64) -> Self {
        self.bytes_written = bytes;
        self
    }
}

/// Result of a delete operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub success: bool,
    pub info: String,
}

impl DeleteResult {
    pub fn deleted<S: Into<String>>(info: S) -> Self {
        Self {
            success: true,
            info: info.into(),
        }
    }

    pub fn missing<S: Into<String>>(info: S) -> Self {
        Self {
            success: false,
            info: info.into(),
        }
    }
}

/// Blob content decoded as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResult {
    pub content: String,
}
