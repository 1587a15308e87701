use camino::Utf8Path;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::Body;
use tokio_util::io::ReaderStream;

use modelx_types::{
    Descriptor, Digest, Manifest, Purpose, MEDIA_TYPE_MODEL_CONFIG, MEDIA_TYPE_MODEL_DIRECTORY,
    MEDIA_TYPE_MODEL_FILE,
};

use crate::error::{ClientError, Result};
use crate::modelconfig::CACHE_DIR;
use crate::progress::{Progress, TransferBar};
use crate::tgz;
use crate::Client;

#[cfg(unix)]
pub(crate) fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub(crate) fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

/// Assemble a provisional manifest from the top-level entries of a working
/// directory: dotfiles are skipped, the configuration file becomes the
/// config descriptor, directories become tar+gz blobs, regular files become
/// file blobs, and blobs are sorted by name. Digests are filled in during
/// the push.
pub fn parse_manifest(basedir: &Utf8Path, config_file: &str) -> Result<Manifest> {
    let mut manifest = Manifest::new();
    let mut found_config = false;

    for entry in basedir
        .read_dir_utf8()
        .map_err(|err| ClientError::Other(format!("read model directory {basedir}: {err}")))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string();
        if name.starts_with('.') {
            continue;
        }
        if name == config_file {
            manifest.config = Descriptor {
                name,
                media_type: MEDIA_TYPE_MODEL_CONFIG.to_string(),
                ..Default::default()
            };
            found_config = true;
            continue;
        }
        let media_type = if entry.file_type()?.is_dir() {
            MEDIA_TYPE_MODEL_DIRECTORY
        } else {
            MEDIA_TYPE_MODEL_FILE
        };
        manifest.blobs.push(Descriptor {
            name,
            media_type: media_type.to_string(),
            ..Default::default()
        });
    }
    if !found_config {
        return Err(ClientError::Other(format!(
            "model configuration {config_file} not found in {basedir}"
        )));
    }
    manifest.sort_blobs();
    Ok(manifest)
}

impl Client {
    /// Push a working directory as `(repository, version)`: digest and
    /// upload every blob concurrently, then PUT the manifest as the final
    /// step so a failed push never publishes the version.
    pub async fn push(
        &self,
        repository: &str,
        version: &str,
        config_file: &str,
        basedir: &Utf8Path,
    ) -> Result<()> {
        let provisional = parse_manifest(basedir, config_file)?;
        let progress = self.progress();

        let entries: Vec<Descriptor> = provisional
            .blobs
            .iter()
            .cloned()
            .chain(std::iter::once(provisional.config.clone()))
            .collect();
        let pushed: Vec<Descriptor> = stream::iter(
            entries
                .into_iter()
                .map(|descriptor| self.push_entry(repository, basedir, descriptor, &progress)),
        )
        .buffer_unordered(self.concurrency())
        .try_collect()
        .await?;

        let mut manifest = Manifest::new();
        for descriptor in pushed {
            if descriptor.media_type == MEDIA_TYPE_MODEL_CONFIG {
                manifest.config = descriptor;
            } else {
                manifest.blobs.push(descriptor);
            }
        }
        manifest.sort_blobs();

        let bar = progress.bar("manifest", "pushing");
        match self.remote().put_manifest(repository, version, &manifest).await {
            Ok(()) => {
                bar.finish("done");
                Ok(())
            }
            Err(err) => {
                bar.fail();
                Err(err)
            }
        }
    }

    /// Digest one manifest entry (archiving directories into the cache) and
    /// run the per-blob push protocol for it.
    async fn push_entry(
        &self,
        repository: &str,
        basedir: &Utf8Path,
        mut descriptor: Descriptor,
        progress: &Progress,
    ) -> Result<Descriptor> {
        let bar = progress.bar(&descriptor.name, "pending");
        let result = self
            .push_entry_inner(repository, basedir, &mut descriptor, &bar)
            .await;
        match result {
            Ok(()) => Ok(descriptor),
            Err(err) => {
                bar.fail();
                Err(err)
            }
        }
    }

    async fn push_entry_inner(
        &self,
        repository: &str,
        basedir: &Utf8Path,
        descriptor: &mut Descriptor,
        bar: &TransferBar,
    ) -> Result<()> {
        let path = basedir.join(&descriptor.name);
        let metadata = tokio::fs::metadata(&path).await?;
        descriptor.mode = file_mode(&metadata);
        if let Ok(modified) = metadata.modified() {
            descriptor.modified = Some(modified.into());
        }

        let source = if descriptor.media_type == MEDIA_TYPE_MODEL_DIRECTORY {
            bar.set_status("digesting");
            let cache = basedir
                .join(CACHE_DIR)
                .join(format!("{}.tar.gz", descriptor.name));
            let digest =
                tgz::tgz(path.into_std_path_buf(), Some(cache.clone().into_std_path_buf())).await?;
            descriptor.digest = Some(digest);
            descriptor.size = tokio::fs::metadata(&cache).await?.len() as i64;
            cache
        } else {
            bar.set_status("digesting");
            let digest_path = path.clone().into_std_path_buf();
            let (digest, size) = tokio::task::spawn_blocking(move || {
                let file = std::fs::File::open(digest_path)?;
                Digest::from_reader(std::io::BufReader::new(file))
            })
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))??;
            descriptor.digest = Some(digest);
            descriptor.size = size as i64;
            path
        };

        self.push_blob(repository, descriptor, &source, bar).await
    }

    /// The per-blob push protocol: skip the reserved empty digest, dedup
    /// via an existence probe, prefer a pre-signed upload location, fall
    /// back to inline upload when the server does not support locations.
    pub(crate) async fn push_blob(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        source: &Utf8Path,
        bar: &TransferBar,
    ) -> Result<()> {
        let digest = descriptor
            .digest
            .as_ref()
            .ok_or_else(|| ClientError::Other("descriptor missing digest".to_string()))?;
        tracing::debug!(name = %descriptor.name, digest = %digest, "pushing blob");
        if digest.is_empty_content() {
            bar.finish("empty");
            return Ok(());
        }
        if self.remote().head_blob(repository, digest).await? {
            bar.set_name(digest.short());
            bar.finish("exists");
            return Ok(());
        }

        match self
            .remote()
            .get_blob_location(repository, descriptor, Purpose::Upload)
            .await
        {
            Ok(location) => {
                bar.start_bytes(digest.short(), descriptor.size, "pushing");
                crate::presign::upload(self.remote().http(), &location, source, descriptor, bar)
                    .await?;
            }
            Err(err) if err.is_server_unsupported() => {
                bar.start_bytes(digest.short(), descriptor.size, "pushing");
                let file = tokio::fs::File::open(source).await?;
                let body = Body::wrap_stream(ReaderStream::new(bar.wrap_async_read(file)));
                self.remote().upload_blob(repository, descriptor, body).await?;
            }
            Err(err) => return Err(err),
        }
        bar.finish("done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn tree() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("modelx.yaml"), "description: demo\n").unwrap();
        std::fs::write(root.join("weights.bin"), b"wwww").unwrap();
        std::fs::write(root.join(".hidden"), b"skip me").unwrap();
        std::fs::create_dir(root.join("vocab")).unwrap();
        std::fs::write(root.join("vocab/tokens.txt"), b"a b c").unwrap();
        (dir, root)
    }

    #[test]
    fn manifest_assembly_classifies_entries() {
        let (_dir, root) = tree();
        let manifest = parse_manifest(&root, "modelx.yaml").unwrap();

        assert_eq!(manifest.config.name, "modelx.yaml");
        assert_eq!(manifest.config.media_type, MEDIA_TYPE_MODEL_CONFIG);

        let names: Vec<_> = manifest.blobs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["vocab", "weights.bin"]);
        assert_eq!(manifest.blobs[0].media_type, MEDIA_TYPE_MODEL_DIRECTORY);
        assert_eq!(manifest.blobs[1].media_type, MEDIA_TYPE_MODEL_FILE);
    }

    #[test]
    fn manifest_assembly_requires_the_config() {
        let (_dir, root) = tree();
        let err = parse_manifest(&root, "other.yaml").unwrap_err();
        assert!(err.to_string().contains("other.yaml"));
    }
}
