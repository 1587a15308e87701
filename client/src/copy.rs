use futures::{stream, StreamExt, TryStreamExt};
use reqwest::Body;

use modelx_types::Descriptor;

use crate::error::{ClientError, Result};
use crate::progress::Progress;
use crate::Client;

impl Client {
    /// Copy `(src_repository, src_version)` into a destination repository,
    /// possibly on another registry. Blobs stream source→destination
    /// without touching disk; digests the destination already holds are
    /// skipped, and the manifest is PUT last.
    pub async fn copy_to(
        &self,
        src_repository: &str,
        src_version: &str,
        dest: &Client,
        dest_repository: &str,
        dest_version: &str,
    ) -> Result<()> {
        let manifest = self
            .remote()
            .get_manifest(src_repository, src_version)
            .await
            .map_err(|err| {
                ClientError::Other(format!(
                    "source reference {src_repository}@{src_version} not found: {err}"
                ))
            })?;

        let progress = self.progress();
        let descriptors: Vec<Descriptor> = manifest.all_descriptors().cloned().collect();
        stream::iter(descriptors.into_iter().map(|descriptor| {
            self.copy_blob(src_repository, dest, dest_repository, descriptor, &progress)
        }))
        .buffer_unordered(self.concurrency())
        .try_collect::<Vec<()>>()
        .await?;

        let bar = progress.bar("manifest", "copying");
        match dest
            .remote()
            .put_manifest(dest_repository, dest_version, &manifest)
            .await
        {
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

    async fn copy_blob(
        &self,
        src_repository: &str,
        dest: &Client,
        dest_repository: &str,
        descriptor: Descriptor,
        progress: &Progress,
    ) -> Result<()> {
        let bar = progress.bar(&descriptor.name, "pending");
        let result = async {
            let digest = descriptor
                .digest
                .as_ref()
                .ok_or_else(|| ClientError::Other("descriptor missing digest".to_string()))?;
            if digest.is_empty_content() {
                bar.finish("empty");
                return Ok(());
            }
            if dest.remote().head_blob(dest_repository, digest).await? {
                bar.set_name(digest.short());
                bar.finish("exists");
                return Ok(());
            }
            bar.start_bytes(digest.short(), descriptor.size, "copying");
            let response = self.remote().get_blob(src_repository, digest).await?;
            let body = Body::wrap_stream(response.bytes_stream());
            dest.remote()
                .upload_blob(dest_repository, &descriptor, body)
                .await?;
            bar.finish("done");
            Ok(())
        }
        .await;
        if result.is_err() {
            bar.fail();
        }
        result
    }
}
