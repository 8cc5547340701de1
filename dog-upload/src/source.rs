use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::{BlobError, BlobResult};

/// Lists the files a directory source expands to
#[async_trait]
pub trait FileEnumerator: Send + Sync {
    /// Files below `dir` whose name matches `pattern`, in a stable order
    async fn list_files(&self, dir: &Path, pattern: &str) -> BlobResult<Vec<PathBuf>>;
}

/// Recursive directory walk filtered by a `*` / `?` wildcard on file names
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobFileEnumerator;

impl GlobFileEnumerator {
    fn matcher(pattern: &str) -> BlobResult<GlobMatcher> {
        GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map(|glob| glob.compile_matcher())
            .map_err(|e| BlobError::Pattern {
                pattern: pattern.to_string(),
                reason: e.kind().to_string(),
            })
    }

    fn walk(dir: &Path, matcher: &GlobMatcher) -> BlobResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() && matcher.is_match(entry.file_name()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl FileEnumerator for GlobFileEnumerator {
    async fn list_files(&self, dir: &Path, pattern: &str) -> BlobResult<Vec<PathBuf>> {
        let matcher = Self::matcher(pattern)?;

        if !tokio::fs::metadata(dir).await?.is_dir() {
            return Err(BlobError::config(format!("'{}' is not a directory", dir.display())));
        }

        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::walk(&dir, &matcher))
            .await
            .map_err(std::io::Error::other)?
    }
}

/// Blob name prefix for a directory source.
///
/// `None` uses the directory's own name; an empty folder means no prefix.
pub fn directory_prefix(dir: &Path, blob_folder: Option<&str>) -> String {
    match blob_folder {
        Some(folder) => folder.trim_matches('/').to_string(),
        None => dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Blob name for `file`: its path relative to `root` with `/` separators,
/// under `prefix` when one is set
pub fn relative_blob_name(prefix: &str, root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    if prefix.is_empty() {
        relative
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// Blob name for a single-file source
pub fn file_blob_name(
    path: &Path,
    explicit: Option<&str>,
    rename_to: Option<&str>,
) -> BlobResult<String> {
    if let Some(name) = explicit.or(rename_to) {
        return Ok(name.to_string());
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| BlobError::config(format!("'{}' has no file name", path.display())))
}
