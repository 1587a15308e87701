use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use modelx_storage::{
    BlobContent, LocationParams, ObjectMeta, Storage, StorageError, StorageErrorKind,
    MULTIPART_THRESHOLD,
};
use modelx_types::{
    BlobLocation, Descriptor, Digest, ErrorInfo, Index, Manifest, Purpose,
    MEDIA_TYPE_MODEL_MANIFEST,
};

/// File name of the per-repository version index.
pub const INDEX_FILE_NAME: &str = "index.json";
/// Well-known key holding the persisted global repository index.
pub const GLOBAL_INDEX_KEY: &str = "index.json";

pub type Result<T> = std::result::Result<T, ErrorInfo>;

pub fn blob_key(repository: &str, digest: &Digest) -> String {
    format!("{repository}/blobs/{}/{}", digest.algorithm(), digest.hex())
}

pub fn manifest_key(repository: &str, reference: &str) -> String {
    format!("{repository}/manifests/{reference}")
}

pub fn index_key(repository: &str) -> String {
    format!("{repository}/{INDEX_FILE_NAME}")
}

fn internal(err: StorageError) -> ErrorInfo {
    ErrorInfo::internal(err)
}

/// The content-addressed layer over a storage provider: manifests, blobs,
/// per-repository indexes and the global repository index.
///
/// Index writes go through storage under a per-repository lock so concurrent
/// manifest PUTs against the same repository serialize instead of racing.
/// The global index lives in memory, is rebuilt at startup and is updated in
/// place afterwards; readers tolerate stale snapshots.
#[derive(Debug)]
pub struct RegistryStore {
    storage: Storage,
    enable_redirect: bool,
    global: RwLock<Index>,
    repo_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RegistryStore {
    pub async fn new(storage: Storage, enable_redirect: bool) -> Result<Self> {
        let store = Self {
            storage,
            enable_redirect,
            global: RwLock::new(Index::new()),
            repo_locks: Mutex::new(HashMap::new()),
        };
        store.refresh_global_index().await?;
        Ok(store)
    }

    pub(crate) async fn repo_lock(&self, repository: &str) -> Arc<Mutex<()>> {
        let mut locks = self.repo_locks.lock().await;
        locks
            .entry(repository.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Rebuild the global index from an enumeration of repositories (every
    /// key shaped like `<ns>/<name>/index.json`).
    #[tracing::instrument(skip(self))]
    pub async fn refresh_global_index(&self) -> Result<()> {
        let objects = self.storage.list("", true).await.map_err(internal)?;
        let mut index = Index::new();
        for meta in objects {
            let Some(repository) = meta.name.strip_suffix(&format!("/{INDEX_FILE_NAME}")) else {
                continue;
            };
            if !repository.contains('/') {
                continue;
            }
            index.manifests.push(Descriptor {
                name: repository.to_string(),
                modified: meta.last_modified,
                ..Default::default()
            });
        }
        index.sort_manifests();
        self.persist_global(&index).await?;
        *self.global.write().await = index;
        Ok(())
    }

    async fn persist_global(&self, index: &Index) -> Result<()> {
        let raw = serde_json::to_vec(index).map_err(ErrorInfo::internal)?;
        self.storage
            .put(
                GLOBAL_INDEX_KEY,
                BlobContent::bytes(modelx_types::MEDIA_TYPE_MODEL_INDEX, raw),
            )
            .await
            .map_err(internal)
    }

    async fn global_insert(&self, repository: &str) -> Result<()> {
        let mut global = self.global.write().await;
        if global.manifests.iter().any(|d| d.name == repository) {
            return Ok(());
        }
        global.manifests.push(Descriptor {
            name: repository.to_string(),
            modified: Some(Utc::now()),
            ..Default::default()
        });
        global.sort_manifests();
        let snapshot = global.clone();
        drop(global);
        self.persist_global(&snapshot).await
    }

    async fn global_remove(&self, repository: &str) -> Result<()> {
        let mut global = self.global.write().await;
        global.manifests.retain(|d| d.name != repository);
        let snapshot = global.clone();
        drop(global);
        self.persist_global(&snapshot).await
    }

    pub async fn get_global_index(&self, search: &str) -> Result<Index> {
        Ok(self.global.read().await.clone().filter(search))
    }

    async fn read_index(&self, repository: &str) -> Result<Index> {
        let content = self
            .storage
            .get(&index_key(repository))
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    ErrorInfo::index_unknown(repository)
                } else {
                    internal(err)
                }
            })?;
        let raw = content.into_bytes().await.map_err(ErrorInfo::internal)?;
        serde_json::from_slice(&raw).map_err(ErrorInfo::internal)
    }

    async fn write_index(&self, repository: &str, index: &Index) -> Result<()> {
        let raw = serde_json::to_vec(index).map_err(ErrorInfo::internal)?;
        self.storage
            .put(
                &index_key(repository),
                BlobContent::bytes(modelx_types::MEDIA_TYPE_MODEL_INDEX, raw),
            )
            .await
            .map_err(internal)
    }

    pub async fn get_index(&self, repository: &str, search: &str) -> Result<Index> {
        Ok(self.read_index(repository).await?.filter(search))
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_index(&self, repository: &str) -> Result<()> {
        let lock = self.repo_lock(repository).await;
        let _guard = lock.lock().await;

        if !self
            .storage
            .exists(&index_key(repository))
            .await
            .map_err(internal)?
        {
            return Err(ErrorInfo::index_unknown(repository));
        }
        self.storage
            .remove(repository, true)
            .await
            .map_err(internal)?;
        self.global_remove(repository).await
    }

    pub async fn exists_manifest(&self, repository: &str, reference: &str) -> Result<bool> {
        self.storage
            .exists(&manifest_key(repository, reference))
            .await
            .map_err(internal)
    }

    pub async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        let content = self
            .storage
            .get(&manifest_key(repository, reference))
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    ErrorInfo::manifest_unknown(reference)
                } else {
                    internal(err)
                }
            })?;
        let raw = content.into_bytes().await.map_err(ErrorInfo::internal)?;
        serde_json::from_slice(&raw).map_err(ErrorInfo::internal)
    }

    /// Accept a manifest: verify every referenced blob is present and sized
    /// as declared (completing pending multipart uploads on capable
    /// backends), then write the manifest and update the indexes.
    #[tracing::instrument(skip(self, manifest))]
    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        content_type: &str,
        manifest: Manifest,
    ) -> Result<()> {
        let lock = self.repo_lock(repository).await;
        let _guard = lock.lock().await;

        for pair in manifest.blobs.windows(2) {
            if pair[0].name >= pair[1].name {
                return Err(ErrorInfo::manifest_invalid(
                    "blob descriptors must be unique and sorted by name",
                ));
            }
        }
        for descriptor in manifest.all_descriptors() {
            self.verify_blob(repository, descriptor).await?;
        }

        let raw = serde_json::to_vec(&manifest).map_err(ErrorInfo::internal)?;
        let content_type = if content_type.is_empty() {
            MEDIA_TYPE_MODEL_MANIFEST
        } else {
            content_type
        };
        let manifest_digest = Digest::from_bytes(&raw);
        let size = raw.len() as i64;
        self.storage
            .put(
                &manifest_key(repository, reference),
                BlobContent::bytes(content_type, raw),
            )
            .await
            .map_err(internal)?;

        let mut index = match self.read_index(repository).await {
            Ok(index) => index,
            Err(err) if err.is(modelx_types::ErrorCode::IndexUnknown) => Index::new(),
            Err(err) => return Err(err),
        };
        index.manifests.retain(|d| d.name != reference);
        index.manifests.push(Descriptor {
            name: reference.to_string(),
            media_type: content_type.to_string(),
            digest: Some(manifest_digest),
            size,
            modified: Some(Utc::now()),
            ..Default::default()
        });
        index.sort_manifests();
        self.write_index(repository, &index).await?;
        self.global_insert(repository).await
    }

    /// The per-descriptor acceptance check behind `put_manifest`.
    async fn verify_blob(&self, repository: &str, descriptor: &Descriptor) -> Result<()> {
        let digest = descriptor.digest.as_ref().ok_or_else(|| {
            ErrorInfo::manifest_invalid(format!(
                "descriptor {:?} missing digest",
                descriptor.name
            ))
        })?;
        if digest.is_empty_content() {
            // Reserved empty digest: never uploaded, always considered present.
            return Ok(());
        }
        let key = blob_key(repository, digest);

        if descriptor.size > MULTIPART_THRESHOLD {
            match self.storage.complete_multipart(&key, descriptor.size).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_unsupported() => {}
                Err(err) if err.kind() == StorageErrorKind::SizeMismatch => {
                    let _ = self.storage.remove(&key, false).await;
                    return Err(ErrorInfo::size_invalid(err));
                }
                Err(err) => return Err(internal(err)),
            }
        }

        let meta = self
            .get_blob_meta(repository, digest)
            .await
            .map_err(|err| {
                if err.is(modelx_types::ErrorCode::BlobUnknown) {
                    ErrorInfo::manifest_invalid(format!("blob {digest} not found"))
                } else {
                    err
                }
            })?;
        if descriptor.size != 0 && meta.size != descriptor.size {
            let _ = self.storage.remove(&key, false).await;
            return Err(ErrorInfo::size_invalid(format!(
                "{} != {}",
                meta.size, descriptor.size
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        let lock = self.repo_lock(repository).await;
        let _guard = lock.lock().await;

        self.storage
            .remove(&manifest_key(repository, reference), false)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    ErrorInfo::manifest_unknown(reference)
                } else {
                    internal(err)
                }
            })?;

        let mut index = match self.read_index(repository).await {
            Ok(index) => index,
            Err(err) if err.is(modelx_types::ErrorCode::IndexUnknown) => return Ok(()),
            Err(err) => return Err(err),
        };
        index.manifests.retain(|d| d.name != reference);
        self.write_index(repository, &index).await
    }

    pub async fn list_blobs(&self, repository: &str) -> Result<Vec<Digest>> {
        let objects = self
            .storage
            .list(&format!("{repository}/blobs"), true)
            .await
            .map_err(internal)?;
        let mut digests = Vec::new();
        for meta in objects {
            let Some((algorithm, hex)) = meta.name.split_once('/') else {
                continue;
            };
            if let Ok(digest) = Digest::from_str(&format!("{algorithm}:{hex}")) {
                digests.push(digest);
            }
        }
        Ok(digests)
    }

    pub async fn exists_blob(&self, repository: &str, digest: &Digest) -> Result<bool> {
        self.storage
            .exists(&blob_key(repository, digest))
            .await
            .map_err(internal)
    }

    pub async fn get_blob(&self, repository: &str, digest: &Digest) -> Result<BlobContent> {
        self.storage
            .get(&blob_key(repository, digest))
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    ErrorInfo::blob_unknown(digest)
                } else {
                    internal(err)
                }
            })
    }

    #[tracing::instrument(skip(self, content))]
    pub async fn put_blob(
        &self,
        repository: &str,
        digest: &Digest,
        content: BlobContent,
    ) -> Result<()> {
        self.storage
            .put(&blob_key(repository, digest), content)
            .await
            .map_err(|err| match err.kind() {
                StorageErrorKind::SizeMismatch => ErrorInfo::size_invalid(err),
                _ => internal(err),
            })
    }

    pub async fn delete_blob(&self, repository: &str, digest: &Digest) -> Result<()> {
        self.storage
            .remove(&blob_key(repository, digest), false)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    ErrorInfo::blob_unknown(digest)
                } else {
                    internal(err)
                }
            })
    }

    pub async fn get_blob_meta(&self, repository: &str, digest: &Digest) -> Result<ObjectMeta> {
        self.storage
            .stat(&blob_key(repository, digest))
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    ErrorInfo::blob_unknown(digest)
                } else {
                    internal(err)
                }
            })
    }

    /// Issue a pre-signed location for direct client transfer, when the
    /// backend supports it and redirection is enabled.
    pub async fn get_blob_location(
        &self,
        repository: &str,
        digest: &Digest,
        purpose: Purpose,
        params: &LocationParams,
    ) -> Result<BlobLocation> {
        if !self.enable_redirect {
            return Err(ErrorInfo::unsupported("blob redirect disabled"));
        }
        self.storage
            .blob_location(&blob_key(repository, digest), purpose, params)
            .await
            .map_err(|err| {
                if err.is_unsupported() {
                    ErrorInfo::unsupported(err)
                } else {
                    internal(err)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelx_storage::FsProvider;
    use modelx_types::{ErrorCode, MEDIA_TYPE_MODEL_FILE};

    async fn store() -> (tempfile::TempDir, RegistryStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(FsProvider::new(dir.path()).unwrap());
        let store = RegistryStore::new(storage, false).await.unwrap();
        (dir, store)
    }

    async fn put_test_blob(store: &RegistryStore, repository: &str, data: &[u8]) -> Descriptor {
        let digest = Digest::from_bytes(data);
        store
            .put_blob(
                repository,
                &digest,
                BlobContent::bytes("application/octet-stream", data.to_vec()),
            )
            .await
            .unwrap();
        Descriptor {
            name: format!("blob-{}", digest.short()),
            media_type: MEDIA_TYPE_MODEL_FILE.to_string(),
            digest: Some(digest),
            size: data.len() as i64,
            ..Default::default()
        }
    }

    fn manifest_with(config: Descriptor, blobs: Vec<Descriptor>) -> Manifest {
        let mut manifest = Manifest::new();
        manifest.config = config;
        manifest.blobs = blobs;
        manifest.sort_blobs();
        manifest
    }

    #[tokio::test]
    async fn blob_roundtrip() {
        let (_dir, store) = store().await;
        let digest = Digest::from_bytes(b"content");
        store
            .put_blob(
                "library/demo",
                &digest,
                BlobContent::bytes("application/octet-stream", b"content".to_vec()),
            )
            .await
            .unwrap();
        assert!(store.exists_blob("library/demo", &digest).await.unwrap());

        let got = store.get_blob("library/demo", &digest).await.unwrap();
        assert_eq!(got.content_length, 7);
        let raw = got.into_bytes().await.unwrap();
        assert_eq!(Digest::from_bytes(&raw), digest);

        let listed = store.list_blobs("library/demo").await.unwrap();
        assert_eq!(listed, vec![digest]);
    }

    #[tokio::test]
    async fn manifest_requires_present_blobs() {
        let (_dir, store) = store().await;
        let missing = Descriptor {
            name: "weights.bin".to_string(),
            digest: Some(Digest::from_bytes(b"never uploaded")),
            size: 14,
            ..Default::default()
        };
        let config = put_test_blob(&store, "library/demo", b"config: {}\n").await;
        let manifest = manifest_with(config, vec![missing]);

        let err = store
            .put_manifest("library/demo", "v1", MEDIA_TYPE_MODEL_MANIFEST, manifest)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::ManifestInvalid));

        // a failed put leaves the version unset
        let err = store.get_manifest("library/demo", "v1").await.unwrap_err();
        assert!(err.is(ErrorCode::ManifestUnknown));
    }

    #[tokio::test]
    async fn manifest_size_mismatch_deletes_blob() {
        let (_dir, store) = store().await;
        let config = put_test_blob(&store, "library/demo", b"config: {}\n").await;
        let mut blob = put_test_blob(&store, "library/demo", b"payload").await;
        blob.size = 999;
        let digest = blob.digest.clone().unwrap();
        let manifest = manifest_with(config, vec![blob]);

        let err = store
            .put_manifest("library/demo", "v1", MEDIA_TYPE_MODEL_MANIFEST, manifest)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::SizeInvalid));
        assert!(!store.exists_blob("library/demo", &digest).await.unwrap());
    }

    #[tokio::test]
    async fn manifest_rejects_unsorted_or_duplicate_blobs() {
        let (_dir, store) = store().await;
        let config = put_test_blob(&store, "library/demo", b"config: {}\n").await;
        let blob = put_test_blob(&store, "library/demo", b"payload").await;

        let manifest = manifest_with(config, vec![blob.clone(), blob]);
        let err = store
            .put_manifest("library/demo", "v1", MEDIA_TYPE_MODEL_MANIFEST, manifest)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::ManifestInvalid));
    }

    #[tokio::test]
    async fn manifest_accepts_empty_digest_without_upload() {
        let (_dir, store) = store().await;
        let config = put_test_blob(&store, "library/demo", b"config: {}\n").await;
        let empty = Descriptor {
            name: "empty.txt".to_string(),
            media_type: MEDIA_TYPE_MODEL_FILE.to_string(),
            digest: Some(Digest::empty()),
            ..Default::default()
        };
        store
            .put_manifest(
                "library/demo",
                "v1",
                MEDIA_TYPE_MODEL_MANIFEST,
                manifest_with(config, vec![empty]),
            )
            .await
            .unwrap();
        assert!(store.exists_manifest("library/demo", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn manifest_put_updates_indexes() {
        let (_dir, store) = store().await;
        let config = put_test_blob(&store, "library/demo", b"config: {}\n").await;
        let blob = put_test_blob(&store, "library/demo", b"weights").await;
        store
            .put_manifest(
                "library/demo",
                "v1",
                MEDIA_TYPE_MODEL_MANIFEST,
                manifest_with(config.clone(), vec![blob.clone()]),
            )
            .await
            .unwrap();
        store
            .put_manifest(
                "library/demo",
                "v2",
                MEDIA_TYPE_MODEL_MANIFEST,
                manifest_with(config, vec![blob]),
            )
            .await
            .unwrap();

        let index = store.get_index("library/demo", "").await.unwrap();
        let names: Vec<_> = index.manifests.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["v1", "v2"]);
        assert!(index.manifests.iter().all(|d| d.digest.is_some()));

        let filtered = store.get_index("library/demo", "2").await.unwrap();
        assert_eq!(filtered.manifests.len(), 1);

        let global = store.get_global_index("").await.unwrap();
        assert_eq!(global.manifests.len(), 1);
        assert_eq!(global.manifests[0].name, "library/demo");

        // re-put replaces, never merges
        store.delete_manifest("library/demo", "v1").await.unwrap();
        let index = store.get_index("library/demo", "").await.unwrap();
        assert_eq!(index.manifests.len(), 1);
    }

    #[tokio::test]
    async fn global_index_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::new(FsProvider::new(dir.path()).unwrap());
            let store = RegistryStore::new(storage, false).await.unwrap();
            let config = put_test_blob(&store, "library/demo", b"config: {}\n").await;
            store
                .put_manifest(
                    "library/demo",
                    "v1",
                    MEDIA_TYPE_MODEL_MANIFEST,
                    manifest_with(config, vec![]),
                )
                .await
                .unwrap();
        }
        let storage = Storage::new(FsProvider::new(dir.path()).unwrap());
        let store = RegistryStore::new(storage, false).await.unwrap();
        let global = store.get_global_index("").await.unwrap();
        assert_eq!(global.manifests.len(), 1);
        assert_eq!(global.manifests[0].name, "library/demo");
    }

    #[tokio::test]
    async fn remove_index_drops_repository() {
        let (_dir, store) = store().await;
        let config = put_test_blob(&store, "library/demo", b"config: {}\n").await;
        store
            .put_manifest(
                "library/demo",
                "v1",
                MEDIA_TYPE_MODEL_MANIFEST,
                manifest_with(config, vec![]),
            )
            .await
            .unwrap();

        store.remove_index("library/demo").await.unwrap();
        let err = store.get_index("library/demo", "").await.unwrap_err();
        assert!(err.is(ErrorCode::IndexUnknown));
        assert!(store.get_global_index("").await.unwrap().manifests.is_empty());

        let err = store.remove_index("library/demo").await.unwrap_err();
        assert!(err.is(ErrorCode::IndexUnknown));
    }

    #[tokio::test]
    async fn blob_location_disabled_is_unsupported() {
        let (_dir, store) = store().await;
        let err = store
            .get_blob_location(
                "library/demo",
                &Digest::from_bytes(b"x"),
                Purpose::Upload,
                &LocationParams::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::Unsupported));
    }
}
