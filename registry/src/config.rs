use std::path::PathBuf;

use clap::Parser;

use modelx_storage::{S3Options, StorageConfig};

/// Process-wide server options, fixed at startup.
#[derive(Debug, Clone, Parser)]
#[command(name = "modelxd", version, about = "modelx registry server")]
pub struct Options {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Basepath for the local filesystem backend. Used unless an S3 URL is
    /// configured.
    #[arg(long, default_value = "data/registry")]
    pub local_dir: PathBuf,

    /// S3 endpoint URL; selects the S3 backend when set.
    #[arg(long, default_value = "")]
    pub s3_url: String,

    #[arg(long, default_value = "registry")]
    pub s3_bucket: String,

    #[arg(long, default_value = "")]
    pub s3_region: String,

    #[arg(long, default_value = "")]
    pub s3_access_key: String,

    #[arg(long, default_value = "")]
    pub s3_secret_key: String,

    /// Lifetime of issued pre-signed URLs, in seconds.
    #[arg(long, default_value_t = 3600)]
    pub s3_presign_expire: u64,

    #[arg(long, default_value_t = true)]
    pub s3_path_style: bool,

    /// Key prefix registry objects live under in the bucket.
    #[arg(long, default_value = "registry")]
    pub s3_prefix: String,

    /// Redirect bulk blob I/O to object storage via pre-signed URLs.
    #[arg(long)]
    pub enable_redirect: bool,
}

impl Options {
    pub fn storage_config(&self) -> StorageConfig {
        if self.s3_url.is_empty() {
            StorageConfig::Fs {
                basepath: self.local_dir.clone(),
            }
        } else {
            StorageConfig::S3(S3Options {
                url: self.s3_url.clone(),
                region: self.s3_region.clone(),
                bucket: self.s3_bucket.clone(),
                access_key: self.s3_access_key.clone(),
                secret_key: self.s3_secret_key.clone(),
                presign_expire_seconds: self.s3_presign_expire,
                path_style: self.s3_path_style,
                prefix: self.s3_prefix.clone(),
            })
        }
    }
}
