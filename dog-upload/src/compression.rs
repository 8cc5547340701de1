use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use std::io::Write;

use crate::{ByteStream, ContentProvider};

/// Content-encoding recorded on gzip-compressed blobs
pub const GZIP_ENCODING: &str = "gzip";

/// Streaming gzip transform applied before content reaches a write plan
#[derive(Debug, Clone, Copy)]
pub struct CompressionPipe {
    level: Compression,
}

impl Default for CompressionPipe {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl CompressionPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compression level 0-9
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    /// Wrap stream-sourced content; file paths and buffers pass through untouched
    pub fn wrap(&self, content: ContentProvider) -> ContentProvider {
        match content {
            ContentProvider::Stream(stream) => ContentProvider::Stream(self.gzip(stream)),
            other => other,
        }
    }

    /// Gzip a byte stream chunk by chunk.
    ///
    /// Compressed output is yielded as soon as the encoder produces it, so the
    /// source is never buffered whole.
    pub fn gzip(&self, mut input: ByteStream) -> ByteStream {
        let level = self.level;
        let stream = async_stream::stream! {
            let mut encoder = GzEncoder::new(Vec::new(), level);

            while let Some(chunk) = input.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if let Err(e) = encoder.write_all(&chunk) {
                    yield Err(e);
                    return;
                }
                let pending = std::mem::take(encoder.get_mut());
                if !pending.is_empty() {
                    yield Ok(Bytes::from(pending));
                }
            }

            match encoder.finish() {
                Ok(tail) if !tail.is_empty() => {
                    yield Ok(Bytes::from(tail));
                }
                Ok(_) => {}
                Err(e) => {
                    yield Err(e);
                }
            }
        };
        Box::pin(stream)
    }
}
