//! # modelx client
//!
//! The client side of modelx: reference parsing, the typed registry
//! [`RegistryClient`], and the concurrent push/pull/copy transfer engine
//! with its terminal progress display.

mod copy;
mod error;
mod modelconfig;
mod presign;
mod progress;
mod pull;
mod push;
mod reference;
mod remote;
mod repos;
mod tgz;

pub use error::{ClientError, Result};
pub use modelconfig::{init_model, ModelConfig, CACHE_DIR, CONFIG_FILE_NAME, README_FILE_NAME};
pub use progress::{Progress, TransferBar};
pub use push::parse_manifest;
pub use reference::{Reference, MODELX_AUTH_ENV};
pub use remote::{RegistryClient, USER_AGENT};
pub use repos::{RepoDetails, RepoManager};
pub use tgz::{tgz, tgz_sync, untgz_sync};

use modelx_types::{Index, Manifest};

/// Default cap on concurrently in-flight blobs within one push or pull.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// High-level client: the typed remote plus the transfer engine knobs.
#[derive(Debug, Clone)]
pub struct Client {
    remote: RegistryClient,
    concurrency: usize,
    show_progress: bool,
}

impl Client {
    pub fn new(registry: &str, authorization: &str) -> Result<Self> {
        Ok(Self {
            remote: RegistryClient::new(registry, authorization)?,
            concurrency: DEFAULT_CONCURRENCY,
            show_progress: true,
        })
    }

    /// Cap the number of concurrently in-flight blobs.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Hide the progress display (non-interactive callers and tests).
    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    pub fn remote(&self) -> &RegistryClient {
        &self.remote
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub(crate) fn progress(&self) -> Progress {
        Progress::new(self.show_progress)
    }

    /// Cheap reachability probe against the registry root.
    pub async fn ping(&self) -> Result<()> {
        self.remote.get_global_index("").await.map(|_| ())
    }

    pub async fn get_manifest(&self, repository: &str, version: &str) -> Result<Manifest> {
        self.remote.get_manifest(repository, version).await
    }

    pub async fn put_manifest(
        &self,
        repository: &str,
        version: &str,
        manifest: &Manifest,
    ) -> Result<()> {
        self.remote.put_manifest(repository, version, manifest).await
    }

    pub async fn get_index(&self, repository: &str, search: &str) -> Result<Index> {
        self.remote.get_index(repository, search).await
    }

    pub async fn get_global_index(&self, search: &str) -> Result<Index> {
        self.remote.get_global_index(search).await
    }
}
