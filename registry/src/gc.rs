use std::collections::{BTreeMap, HashSet};

use modelx_types::Digest;

use crate::store::{RegistryStore, Result};

/// Delete every blob of `repository` that no manifest in its index
/// references. Returns the removed digests mapped to their outcome.
///
/// Takes the repository lock so collection never runs concurrently with a
/// manifest PUT on the same repository.
#[tracing::instrument(skip(store))]
pub async fn gc_repository(
    store: &RegistryStore,
    repository: &str,
) -> Result<BTreeMap<String, String>> {
    let lock = store.repo_lock(repository).await;
    let _guard = lock.lock().await;

    tracing::info!(repository, "starting blob garbage collection");

    let index = store.get_index(repository, "").await?;
    let all = store.list_blobs(repository).await?;

    let mut inuse: HashSet<Digest> = HashSet::new();
    for version in &index.manifests {
        let manifest = store.get_manifest(repository, &version.name).await?;
        for descriptor in manifest.all_descriptors() {
            if let Some(digest) = &descriptor.digest {
                inuse.insert(digest.clone());
            }
        }
    }

    let mut removed = BTreeMap::new();
    for digest in all {
        if inuse.contains(&digest) {
            continue;
        }
        tracing::info!(digest = %digest, "removing unreferenced blob");
        match store.delete_blob(repository, &digest).await {
            Ok(()) => {
                removed.insert(digest.to_string(), "removed".to_string());
            }
            Err(err) => {
                tracing::error!(digest = %digest, error = %err, "removing unreferenced blob");
                removed.insert(digest.to_string(), err.to_string());
                return Err(err);
            }
        }
    }
    tracing::info!(repository, removed = removed.len(), "blob garbage collection done");
    Ok(removed)
}

/// Run garbage collection over every repository in the global index.
pub async fn gc_all(store: &RegistryStore) -> Result<BTreeMap<String, String>> {
    let global = store.get_global_index("").await?;
    let mut removed = BTreeMap::new();
    for repository in &global.manifests {
        for (digest, status) in gc_repository(store, &repository.name).await? {
            removed.insert(format!("{}@{}", repository.name, digest), status);
        }
    }
    Ok(removed)
}
