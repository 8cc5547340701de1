use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{BlobResult, ConnectionMethod, DestinationSpec};

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Local content to upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadSource {
    /// A single file, uploaded as one blob
    File {
        path: PathBuf,
        /// Blob name; defaults to the file name
        #[serde(default)]
        blob_name: Option<String>,
        /// Read the file through a byte stream instead of handing over the path
        #[serde(default)]
        contents_only: bool,
    },
    /// Every matching file below a directory, one blob per file
    Directory {
        path: PathBuf,
        /// `*` / `?` wildcard pattern matched against file names
        #[serde(default)]
        search_pattern: Option<String>,
        /// Blob name prefix; `None` uses the directory's own name, `""` none
        #[serde(default)]
        blob_folder: Option<String>,
    },
}

impl UploadSource {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self::File {
            path: path.into(),
            blob_name: None,
            contents_only: false,
        }
    }

    pub fn directory<P: Into<PathBuf>>(path: P) -> Self {
        Self::Directory {
            path: path.into(),
            search_pattern: None,
            blob_folder: None,
        }
    }

    /// Set the blob name of a file source (ignored for directories)
    pub fn with_blob_name<S: Into<String>>(mut self, name: S) -> Self {
        if let Self::File { blob_name, .. } = &mut self {
            *blob_name = Some(name.into());
        }
        self
    }

    /// Stream the file's content (required for compression)
    pub fn contents_only(mut self) -> Self {
        if let Self::File { contents_only, .. } = &mut self {
            *contents_only = true;
        }
        self
    }

    pub fn with_search_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        if let Self::Directory { search_pattern, .. } = &mut self {
            *search_pattern = Some(pattern.into());
        }
        self
    }

    pub fn with_blob_folder<S: Into<String>>(mut self, folder: S) -> Self {
        if let Self::Directory { blob_folder, .. } = &mut self {
            *blob_folder = Some(folder.into());
        }
        self
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// One upload invocation; immutable once submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    #[serde(default = "new_request_id")]
    pub request_id: String,
    pub connection: ConnectionMethod,
    pub source: UploadSource,
    #[serde(default)]
    pub compress: bool,
    /// Concurrent uploads; `None` uses the uploader default
    #[serde(default)]
    pub parallelism: Option<usize>,
    pub destination: DestinationSpec,
}

impl UploadRequest {
    pub fn new(
        connection: ConnectionMethod,
        source: UploadSource,
        destination: DestinationSpec,
    ) -> Self {
        Self {
            request_id: new_request_id(),
            connection,
            source,
            compress: false,
            parallelism: None,
            destination,
        }
    }

    /// Parse a request from its JSON form
    pub fn from_json(json: &str) -> BlobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_compression(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Lazily materialized blob content
pub enum ContentProvider {
    /// Path handed to the write plan; read when the task runs
    File(PathBuf),
    /// Content already in memory
    Buffer(Bytes),
    /// Streamed content (file contents or a compression pipe)
    Stream(ByteStream),
}

impl ContentProvider {
    /// Stream a file's content; the file is opened on first read
    pub fn stream_file<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let stream = async_stream::stream! {
            match open_file_stream(path).await {
                Ok(mut chunks) => {
                    while let Some(chunk) = chunks.next().await {
                        yield chunk;
                    }
                }
                Err(e) => {
                    yield Err(e);
                }
            }
        };
        Self::Stream(Box::pin(stream))
    }

    /// True when the content is stream-sourced and may be transformed
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Convert into a stream without reading it
    pub async fn into_stream(self) -> std::io::Result<ByteStream> {
        match self {
            Self::File(path) => open_file_stream(path).await,
            Self::Buffer(bytes) => Ok(Box::pin(futures::stream::once(async move { Ok(bytes) }))),
            Self::Stream(stream) => Ok(stream),
        }
    }

    /// Read the whole content
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        match self {
            Self::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            Self::Buffer(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }
}

async fn open_file_stream(path: PathBuf) -> std::io::Result<ByteStream> {
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::pin(ReaderStream::new(file)))
}

impl std::fmt::Debug for ContentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_content_is_collected_in_order() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"blob ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let provider = ContentProvider::Stream(Box::pin(futures::stream::iter(chunks)));
        assert!(provider.is_stream());

        let bytes = provider.into_bytes().await.unwrap();
        assert_eq!(&bytes[..], b"hello blob world");
    }

    #[tokio::test]
    async fn file_content_is_read_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        let provider = ContentProvider::File(path.clone());

        // The file does not exist yet; nothing has been opened.
        std::fs::write(&path, b"late content").unwrap();
        assert_eq!(&provider.into_bytes().await.unwrap()[..], b"late content");
    }

    #[tokio::test]
    async fn streamed_file_opens_on_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ContentProvider::stream_file(dir.path().join("missing.bin"));
        assert!(provider.is_stream());

        let err = provider.into_bytes().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn request_round_trips_through_json() {
        let json = r#"{
            "connection": { "ConnectionString": "UseDevelopmentStorage=true" },
            "source": { "File": { "path": "/tmp/report.csv", "contents_only": true } },
            "compress": true,
            "destination": { "container_name": "reports" }
        }"#;

        let request = UploadRequest::from_json(json).unwrap();
        assert!(request.compress);
        assert!(!request.request_id.is_empty());
        assert_eq!(request.parallelism, None);
        assert!(matches!(
            request.source,
            UploadSource::File { contents_only: true, blob_name: None, .. }
        ));
    }

    #[test]
    fn source_builders_only_touch_their_variant() {
        let file = UploadSource::file("/tmp/a.txt").with_search_pattern("*.xml");
        assert_eq!(file, UploadSource::file("/tmp/a.txt"));

        let dir = UploadSource::directory("/tmp/in").with_blob_folder("out");
        assert!(matches!(
            dir,
            UploadSource::Directory { blob_folder: Some(ref f), .. } if f == "out"
        ));
    }
}
