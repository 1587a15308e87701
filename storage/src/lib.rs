//! # Storage providers
//!
//! The object-store layer beneath the modelx registry: an opaque put/get/
//! stat/exists/remove/list contract over a flat key space, with a filesystem
//! implementation and an S3 implementation that additionally serves
//! pre-signed URLs and multipart uploads.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

mod driver;
mod error;
mod fs;
mod s3;

pub use driver::{BlobBody, BlobContent, BlobReader, LocationParams, ObjectMeta, Provider};
pub use error::{StorageError, StorageErrorKind};
pub use fs::FsProvider;
pub use s3::{S3Options, S3Provider, MULTIPART_THRESHOLD};

/// Backend selection, deserializable from server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    Fs { basepath: PathBuf },
    S3(S3Options),
}

impl StorageConfig {
    pub async fn build(self) -> Result<Storage, StorageError> {
        match self {
            StorageConfig::Fs { basepath } => Ok(FsProvider::new(basepath)?.into()),
            StorageConfig::S3(options) => Ok(S3Provider::new(&options).await?.into()),
        }
    }
}

/// Cloneable handle over a boxed [`Provider`].
#[derive(Debug, Clone)]
pub struct Storage {
    provider: Arc<dyn Provider>,
}

impl<P> From<P> for Storage
where
    P: Provider + 'static,
{
    fn from(provider: P) -> Self {
        Storage {
            provider: Arc::new(provider),
        }
    }
}

impl std::ops::Deref for Storage {
    type Target = dyn Provider;

    fn deref(&self) -> &Self::Target {
        self.provider.as_ref()
    }
}

impl Storage {
    pub fn new<P: Provider + 'static>(provider: P) -> Self {
        provider.into()
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }
}
