use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::driver::{BlobBody, BlobContent, ObjectMeta, Provider};
use crate::error::{StorageError, StorageErrorKind};

const PROVIDER: &str = "fs";
const META_SUFFIX: &str = ".meta";

/// JSON sidecar persisted next to each object as `<key>.meta`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    content_type: String,
    #[serde(default)]
    content_length: i64,
}

/// Filesystem-backed storage provider. Each object is a `<key>` data file
/// plus a `<key>.meta` sidecar holding its content type and length.
#[derive(Debug)]
pub struct FsProvider {
    basepath: PathBuf,
}

impl FsProvider {
    pub fn new(basepath: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let basepath = basepath.into();
        std::fs::create_dir_all(&basepath)
            .map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))?;
        Ok(Self { basepath })
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.basepath.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.basepath.join(format!("{key}{META_SUFFIX}"))
    }

    async fn read_meta(&self, key: &str) -> Result<FileMeta, StorageError> {
        let raw = match tokio::fs::read(self.meta_path(key)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FileMeta::default()),
            Err(err) => return Err(StorageError::new(PROVIDER, StorageErrorKind::Other, err)),
        };
        serde_json::from_slice(&raw)
            .map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))
    }

    async fn write_meta(&self, key: &str, meta: &FileMeta) -> Result<(), StorageError> {
        let path = self.meta_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))?;
        }
        let raw = serde_json::to_vec_pretty(meta)
            .map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))?;
        tokio::fs::write(path, raw)
            .await
            .map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))
    }
}

fn io_error(key: &str, err: std::io::Error) -> StorageError {
    let kind = if err.kind() == ErrorKind::NotFound {
        StorageErrorKind::NotFound
    } else {
        StorageErrorKind::Other
    };
    StorageError::new(PROVIDER, kind, err).key(key)
}

#[async_trait::async_trait]
impl Provider for FsProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    #[tracing::instrument(skip(self, content), fields(provider = PROVIDER))]
    async fn put(&self, key: &str, content: BlobContent) -> Result<(), StorageError> {
        let path = self.data_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }
        let declared = content.content_length;
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| io_error(key, e))?;
        let written = match content.body {
            BlobBody::Bytes(data) => {
                file.write_all(&data).await.map_err(|e| io_error(key, e))?;
                data.len() as i64
            }
            BlobBody::Reader(mut reader) => tokio::io::copy(&mut reader, &mut file)
                .await
                .map_err(|e| io_error(key, e))? as i64,
        };
        file.shutdown().await.map_err(|e| io_error(key, e))?;

        if declared >= 0 && written != declared {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(StorageError::size_mismatch(PROVIDER, declared, written).key(key));
        }
        self.write_meta(
            key,
            &FileMeta {
                content_type: content.content_type,
                content_length: written,
            },
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn get(&self, key: &str) -> Result<BlobContent, StorageError> {
        let file = tokio::fs::File::open(self.data_path(key))
            .await
            .map_err(|e| io_error(key, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(key, e))?
            .len() as i64;
        let meta = self.read_meta(key).await?;
        Ok(BlobContent::reader(
            meta.content_type,
            size,
            Box::new(tokio::io::BufReader::new(file)),
        ))
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn stat(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        let metadata = tokio::fs::metadata(self.data_path(key))
            .await
            .map_err(|e| io_error(key, e))?;
        if metadata.is_dir() {
            return Err(StorageError::not_found(PROVIDER, key));
        }
        let meta = self.read_meta(key).await?;
        Ok(ObjectMeta {
            name: key.to_string(),
            size: metadata.len() as i64,
            last_modified: metadata.modified().ok().map(Into::into),
            content_type: meta.content_type,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match tokio::fs::metadata(self.data_path(key)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(key, err)),
        }
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn remove(&self, key: &str, recursive: bool) -> Result<(), StorageError> {
        if recursive {
            match tokio::fs::remove_dir_all(self.data_path(key)).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(io_error(key, err)),
            }
        } else {
            tokio::fs::remove_file(self.data_path(key))
                .await
                .map_err(|e| io_error(key, e))?;
            match tokio::fs::remove_file(self.meta_path(key)).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(io_error(key, err)),
            }
        }
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectMeta>, StorageError> {
        let root = self.data_path(prefix);
        let out = tokio::task::spawn_blocking(move || collect(&root, recursive))
            .await
            .map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))??;
        Ok(out)
    }
}

fn collect(root: &Path, recursive: bool) -> Result<Vec<ObjectMeta>, StorageError> {
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            std::fs::read_dir(&dir).map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))?;
        for entry in entries {
            let entry = entry.map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))?;
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    stack.push(path);
                }
                continue;
            }
            let name = match path.strip_prefix(root) {
                Ok(rel) => rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"),
                Err(_) => continue,
            };
            if name.ends_with(META_SUFFIX) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(StorageError::with(PROVIDER, StorageErrorKind::Other))?;
            out.push(ObjectMeta {
                name,
                size: metadata.len() as i64,
                last_modified: metadata.modified().ok().map(Into::into),
                content_type: String::new(),
            });
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

// blob_location and complete_multipart stay at the trait defaults: the
// filesystem backend reports Unsupported and callers fall back to inline
// transfer.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LocationParams;
    use bytes::Bytes;
    use modelx_types::Purpose;

    fn provider() -> (tempfile::TempDir, FsProvider) {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path()).unwrap();
        (dir, provider)
    }

    #[tokio::test]
    async fn put_get_roundtrip_with_sidecar() {
        let (dir, fs) = provider();
        fs.put(
            "repo/name/blobs/sha256/abc",
            BlobContent::bytes("application/vnd.modelx.model.file.v1", Bytes::from_static(b"hello")),
        )
        .await
        .unwrap();

        assert!(dir.path().join("repo/name/blobs/sha256/abc.meta").is_file());

        let content = fs.get("repo/name/blobs/sha256/abc").await.unwrap();
        assert_eq!(content.content_type, "application/vnd.modelx.model.file.v1");
        assert_eq!(content.content_length, 5);
        assert_eq!(&content.into_bytes().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_dir, fs) = provider();
        let err = fs.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!fs.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn put_rejects_declared_length_mismatch() {
        let (_dir, fs) = provider();
        let content = BlobContent::reader(
            "application/octet-stream",
            10,
            Box::new(std::io::Cursor::new(b"short".to_vec())),
        );
        let err = fs.put("k", content).await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::SizeMismatch);
        assert!(!fs.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_sidecars_and_respects_recursion() {
        let (_dir, fs) = provider();
        for key in ["repo/a", "repo/nested/b", "repo/nested/deep/c"] {
            fs.put(key, BlobContent::bytes("t", Bytes::from_static(b"x")))
                .await
                .unwrap();
        }

        let flat = fs.list("repo", false).await.unwrap();
        let names: Vec<_> = flat.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a"]);

        let all = fs.list("repo", true).await.unwrap();
        let names: Vec<_> = all.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a", "nested/b", "nested/deep/c"]);
    }

    #[tokio::test]
    async fn remove_recursive_clears_prefix() {
        let (_dir, fs) = provider();
        fs.put("repo/x/one", BlobContent::bytes("t", Bytes::from_static(b"1")))
            .await
            .unwrap();
        fs.put("repo/x/two", BlobContent::bytes("t", Bytes::from_static(b"2")))
            .await
            .unwrap();

        fs.remove("repo/x", true).await.unwrap();
        assert!(!fs.exists("repo/x/one").await.unwrap());
        assert!(fs.list("repo/x", true).await.unwrap().is_empty());
        // removing again is fine
        fs.remove("repo/x", true).await.unwrap();
    }

    #[tokio::test]
    async fn stat_reports_size_and_content_type() {
        let (_dir, fs) = provider();
        fs.put("k", BlobContent::bytes("text/plain", Bytes::from_static(b"abcd")))
            .await
            .unwrap();
        let meta = fs.stat("k").await.unwrap();
        assert_eq!(meta.size, 4);
        assert_eq!(meta.content_type, "text/plain");
        assert!(meta.last_modified.is_some());
    }

    #[tokio::test]
    async fn presign_is_unsupported() {
        let (_dir, fs) = provider();
        let err = fs
            .blob_location("k", Purpose::Upload, &LocationParams::default())
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
        let err = fs.complete_multipart("k", 10).await.unwrap_err();
        assert!(err.is_unsupported());
    }
}
