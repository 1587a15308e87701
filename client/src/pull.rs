use camino::{Utf8Path, Utf8PathBuf};
use futures::{stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::SyncIoBridge;

use modelx_types::{
    Descriptor, Digest, Purpose, MEDIA_TYPE_MODEL_CONFIG, MEDIA_TYPE_MODEL_DIRECTORY,
    MEDIA_TYPE_MODEL_FILE,
};

use crate::error::{ClientError, Result};
use crate::modelconfig::{CACHE_DIR, CONFIG_FILE_NAME, README_FILE_NAME};
use crate::progress::TransferBar;
use crate::tgz;
use crate::Client;

impl Client {
    /// Resolve `(repository, version)` into a byte-exact working tree under
    /// `into`. Blobs already present with matching digests are skipped; with
    /// `force`, stray top-level entries are purged afterwards.
    pub async fn pull(
        &self,
        repository: &str,
        version: &str,
        into: &Utf8Path,
        force: bool,
    ) -> Result<()> {
        match tokio::fs::metadata(into).await {
            Ok(metadata) if !metadata.is_dir() => {
                return Err(ClientError::Other(format!("{into} is not a directory")));
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(into).await?;
            }
            Err(err) => return Err(err.into()),
        }

        let manifest = self.remote().get_manifest(repository, version).await?;
        tracing::debug!(repository, version, blobs = manifest.blobs.len(), "pulling model");
        let mut blobs = manifest.blobs.clone();
        blobs.push(manifest.config.clone());

        if force {
            purge_strays(into, &blobs)?;
        }
        self.pull_blobs(repository, into, blobs).await
    }

    /// Pull an explicit descriptor set into `basedir` on the bounded worker
    /// pool; the first failure cancels the remaining work.
    pub async fn pull_blobs(
        &self,
        repository: &str,
        basedir: &Utf8Path,
        blobs: Vec<Descriptor>,
    ) -> Result<()> {
        let progress = self.progress();
        stream::iter(
            blobs
                .into_iter()
                .map(|descriptor| self.pull_entry(repository, basedir, descriptor, &progress)),
        )
        .buffer_unordered(self.concurrency())
        .try_collect::<Vec<()>>()
        .await?;
        Ok(())
    }

    async fn pull_entry(
        &self,
        repository: &str,
        basedir: &Utf8Path,
        descriptor: Descriptor,
        progress: &crate::Progress,
    ) -> Result<()> {
        let bar = progress.bar(&descriptor.name, "pending");
        let result = match descriptor.media_type.as_str() {
            MEDIA_TYPE_MODEL_DIRECTORY => {
                self.pull_directory(repository, &descriptor, basedir, &bar).await
            }
            MEDIA_TYPE_MODEL_FILE | MEDIA_TYPE_MODEL_CONFIG => {
                self.pull_file(repository, &descriptor, basedir, &bar).await
            }
            other => Err(ClientError::Other(format!(
                "unsupported media type {other}"
            ))),
        };
        if result.is_err() {
            bar.fail();
        }
        result
    }

    async fn pull_file(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        basedir: &Utf8Path,
        bar: &TransferBar,
    ) -> Result<()> {
        let digest = required_digest(descriptor)?;
        bar.set_status("checking");

        let filename = basedir.join(&descriptor.name);
        if let Some(local) = digest_of_file(&filename).await? {
            if &local == digest {
                bar.set_name(digest.short());
                bar.finish("already exists");
                return Ok(());
            }
        }

        let file = create_file(&filename, descriptor.mode).await?;
        if digest.is_empty_content() {
            bar.finish("empty");
            return Ok(());
        }

        bar.start_bytes(digest.short(), descriptor.size, "downloading");
        let mut writer = bar.wrap_async_write(tokio::io::BufWriter::new(file));
        self.fetch_blob(repository, descriptor, &mut writer).await?;
        writer.shutdown().await?;
        bar.finish("done");
        Ok(())
    }

    async fn pull_directory(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        basedir: &Utf8Path,
        bar: &TransferBar,
    ) -> Result<()> {
        let digest = required_digest(descriptor)?;
        let target = basedir.join(&descriptor.name);
        tokio::fs::create_dir_all(&target).await?;

        // a directory's digest is its deterministic archive digest
        bar.set_status("checking");
        let local = tgz::tgz(target.clone().into_std_path_buf(), None).await?;
        if &local == digest {
            bar.set_name(digest.short());
            bar.finish("already exists");
            return Ok(());
        }

        let cache = basedir
            .join(CACHE_DIR)
            .join(format!("{}.tar.gz", descriptor.name));
        match create_file(&cache, 0o644).await {
            Ok(file) => {
                bar.start_bytes(digest.short(), descriptor.size, "downloading");
                let mut writer = bar.wrap_async_write(tokio::io::BufWriter::new(file));
                self.fetch_blob(repository, descriptor, &mut writer).await?;
                writer.shutdown().await?;

                bar.set_status("extracting");
                let archive = cache.into_std_path_buf();
                let into = target.into_std_path_buf();
                tokio::task::spawn_blocking(move || {
                    tgz::untgz_sync(std::fs::File::open(archive)?, &into)
                })
                .await
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))??;
            }
            Err(_) => {
                // no usable cache: pipe the download straight into the
                // extractor so both run concurrently
                self.pull_directory_streaming(repository, descriptor, &target, bar)
                    .await?;
            }
        }
        bar.finish("done");
        Ok(())
    }

    async fn pull_directory_streaming(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        target: &Utf8Path,
        bar: &TransferBar,
    ) -> Result<()> {
        let digest = required_digest(descriptor)?;
        bar.start_bytes(digest.short(), descriptor.size, "downloading");

        let (reader, mut writer) = tokio::io::duplex(64 * 1024);
        let into = target.to_path_buf().into_std_path_buf();
        let extract = tokio::task::spawn_blocking(move || {
            tgz::untgz_sync(SyncIoBridge::new(reader), &into)
        });

        let download = async {
            let mut writer = bar.wrap_async_write(&mut writer);
            self.fetch_blob(repository, descriptor, &mut writer).await
        }
        .await;
        // close the pipe so the extractor sees EOF even on failure
        let _ = writer.shutdown().await;
        let extracted = extract
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;

        download?;
        extracted?;
        Ok(())
    }

    /// Fetch one blob into a writer: prefer the pre-signed download
    /// location, fall back to an inline registry download when locations
    /// are unsupported.
    async fn fetch_blob(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        into: &mut (impl AsyncWrite + Unpin),
    ) -> Result<()> {
        let digest = required_digest(descriptor)?;
        match self
            .remote()
            .get_blob_location(repository, descriptor, Purpose::Download)
            .await
        {
            Ok(location) => {
                crate::presign::download(self.remote().http(), &location, into).await
            }
            Err(err) if err.is_server_unsupported() => {
                let response = self.remote().get_blob(repository, digest).await?;
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.try_next().await? {
                    into.write_all(&chunk).await?;
                }
                into.flush().await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn required_digest(descriptor: &Descriptor) -> Result<&Digest> {
    descriptor
        .digest
        .as_ref()
        .ok_or_else(|| ClientError::Other(format!("descriptor {:?} missing digest", descriptor.name)))
}

/// Digest an existing local file; Ok(None) when it does not exist.
async fn digest_of_file(path: &Utf8Path) -> Result<Option<Digest>> {
    let path = path.to_path_buf().into_std_path_buf();
    match tokio::task::spawn_blocking(move || match std::fs::File::open(path) {
        Ok(file) => Digest::from_reader(std::io::BufReader::new(file)).map(Some),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    })
    .await
    .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))??
    {
        Some((digest, _)) => Ok(Some(digest)),
        None => Ok(None),
    }
}

/// Create (truncate) a file with the given permission bits, making parents.
async fn create_file(path: &Utf8Path, mode: u32) -> Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(path).await?;
    #[cfg(unix)]
    if mode != 0 {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(mode & 0o777))
            .await?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(file)
}

/// With `force`, remove top-level entries the manifest does not name,
/// keeping the config, the readme and the cache directory.
fn purge_strays(basedir: &Utf8Path, blobs: &[Descriptor]) -> Result<()> {
    for entry in basedir.read_dir_utf8()? {
        let entry = entry?;
        let name = entry.file_name();
        if name == CACHE_DIR || name == CONFIG_FILE_NAME || name == README_FILE_NAME {
            continue;
        }
        if blobs.iter().any(|d| d.name == name) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_keeps_manifest_entries_and_specials() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        for name in ["modelx.yaml", "README.md", "keep.bin", "stray.bin"] {
            std::fs::write(root.join(name), b"x").unwrap();
        }
        std::fs::create_dir(root.join(".modelx")).unwrap();
        std::fs::create_dir(root.join("stray-dir")).unwrap();

        let keep = vec![Descriptor {
            name: "keep.bin".to_string(),
            ..Default::default()
        }];
        purge_strays(&root, &keep).unwrap();

        assert!(root.join("modelx.yaml").exists());
        assert!(root.join("README.md").exists());
        assert!(root.join(".modelx").exists());
        assert!(root.join("keep.bin").exists());
        assert!(!root.join("stray.bin").exists());
        assert!(!root.join("stray-dir").exists());
    }

    #[tokio::test]
    async fn streaming_extraction_pipes_download_into_extractor() {
        // archive a tree, then feed the bytes through the duplex pipe the
        // way a cache-less directory pull does
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("inner")).unwrap();
        std::fs::write(src.path().join("inner/data.txt"), b"streamed").unwrap();
        let archive = tempfile::tempdir().unwrap();
        let archive_path = archive.path().join("a.tar.gz");
        tgz::tgz_sync(src.path(), Some(&archive_path)).unwrap();
        let raw = std::fs::read(&archive_path).unwrap();

        let out = tempfile::tempdir().unwrap();
        let into = out.path().to_path_buf();
        let (reader, mut writer) = tokio::io::duplex(8 * 1024);
        let extract =
            tokio::task::spawn_blocking(move || tgz::untgz_sync(SyncIoBridge::new(reader), &into));

        writer.write_all(&raw).await.unwrap();
        writer.shutdown().await.unwrap();
        extract.await.unwrap().unwrap();

        assert_eq!(
            std::fs::read(out.path().join("inner/data.txt")).unwrap(),
            b"streamed"
        );
    }
}
