use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{self, AsyncRead, AsyncReadExt};

use modelx_types::{BlobLocation, Purpose};

use crate::error::StorageError;

/// A boxed async reader carrying object payload bytes.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// The payload of an object: either already in memory (manifests, indexes)
/// or a stream (blob bodies, which are never buffered whole).
pub enum BlobBody {
    Bytes(Bytes),
    Reader(BlobReader),
}

impl fmt::Debug for BlobBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobBody::Bytes(b) => write!(f, "BlobBody::Bytes({} bytes)", b.len()),
            BlobBody::Reader(_) => f.write_str("BlobBody::Reader(..)"),
        }
    }
}

impl From<Bytes> for BlobBody {
    fn from(value: Bytes) -> Self {
        BlobBody::Bytes(value)
    }
}

impl From<Vec<u8>> for BlobBody {
    fn from(value: Vec<u8>) -> Self {
        BlobBody::Bytes(value.into())
    }
}

/// An object payload plus the metadata persisted alongside it.
#[derive(Debug)]
pub struct BlobContent {
    pub content_type: String,
    /// Declared length in bytes; negative when unknown.
    pub content_length: i64,
    pub body: BlobBody,
}

impl BlobContent {
    pub fn bytes(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            content_type: content_type.into(),
            content_length: data.len() as i64,
            body: BlobBody::Bytes(data),
        }
    }

    pub fn reader(
        content_type: impl Into<String>,
        content_length: i64,
        reader: BlobReader,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            content_length,
            body: BlobBody::Reader(reader),
        }
    }

    /// Drain the body into memory. Only appropriate for bounded documents
    /// such as manifests and indexes.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self.body {
            BlobBody::Bytes(b) => Ok(b),
            BlobBody::Reader(mut r) => {
                let mut buf = Vec::new();
                r.read_to_end(&mut buf).await?;
                Ok(buf.into())
            }
        }
    }

    pub fn into_reader(self) -> BlobReader {
        match self.body {
            BlobBody::Bytes(b) => Box::new(std::io::Cursor::new(b)),
            BlobBody::Reader(r) => r,
        }
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMeta {
    /// Key relative to the listed prefix (full key for `stat`).
    pub name: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: String,
}

/// Parameters a client supplies when requesting an upload location.
#[derive(Debug, Clone, Default)]
pub struct LocationParams {
    /// Declared blob size in bytes; zero when unknown.
    pub size: i64,
    /// Explicit request for a multipart upload.
    pub multipart: bool,
    /// Logical blob name, stored as user metadata by backends that can.
    pub name: String,
}

/// An opaque object store over a flat `a/b/c` key space. "/" is the only
/// hierarchical delimiter; keys are otherwise opaque.
///
/// The presign/multipart methods form an optional capability: backends that
/// cannot serve them inherit the defaults, which fail with
/// [`StorageErrorKind::Unsupported`](crate::StorageErrorKind::Unsupported) so
/// callers can fall back to inline transfer.
#[async_trait::async_trait]
pub trait Provider: fmt::Debug + Send + Sync {
    /// Short provider tag, also carried in issued [`BlobLocation`]s.
    fn name(&self) -> &'static str;

    /// Write the content in full, persisting content type and length as
    /// object metadata. Overwrites existing keys.
    async fn put(&self, key: &str, content: BlobContent) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<BlobContent, StorageError>;

    async fn stat(&self, key: &str) -> Result<ObjectMeta, StorageError>;

    /// Never fails on absence.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// When `recursive`, removes every key under the prefix `key + "/"`.
    async fn remove(&self, key: &str, recursive: bool) -> Result<(), StorageError>;

    /// List keys under `prefix`, names relative to it. Non-recursive listing
    /// suppresses keys under nested "/" segments.
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectMeta>, StorageError>;

    /// Issue a pre-signed location for direct client transfer.
    async fn blob_location(
        &self,
        key: &str,
        purpose: Purpose,
        params: &LocationParams,
    ) -> Result<BlobLocation, StorageError> {
        let _ = (key, params);
        Err(StorageError::unsupported(
            self.name(),
            format!("{purpose} location"),
        ))
    }

    /// Finish a pending multipart upload for `key`, verifying the uploaded
    /// part sizes sum to `declared_size` when it is positive. Succeeds as a
    /// no-op when no upload is pending.
    async fn complete_multipart(&self, key: &str, declared_size: i64) -> Result<(), StorageError> {
        let _ = (key, declared_size);
        Err(StorageError::unsupported(self.name(), "multipart upload"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Provider);

    #[tokio::test]
    async fn blob_content_into_bytes() {
        let content = BlobContent::bytes("application/octet-stream", Bytes::from_static(b"abc"));
        assert_eq!(content.content_length, 3);
        assert_eq!(&content.into_bytes().await.unwrap()[..], b"abc");

        let content = BlobContent::reader(
            "application/octet-stream",
            3,
            Box::new(std::io::Cursor::new(b"xyz".to_vec())),
        );
        assert_eq!(&content.into_bytes().await.unwrap()[..], b"xyz");
    }
}
