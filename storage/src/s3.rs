use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_s3::presigning::{PresignedRequest, PresigningConfig};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier,
};
use serde::Deserialize;

use modelx_types::{BlobLocation, PresignedPart, Purpose};

use crate::driver::{BlobBody, BlobContent, LocationParams, ObjectMeta, Provider};
use crate::error::{StorageError, StorageErrorKind};

const PROVIDER: &str = "s3";

/// Uploads larger than this open a multipart upload, one part per chunk.
pub const MULTIPART_THRESHOLD: i64 = 5 * 1024 * 1024 * 1024;
/// Presigned parts handed out when the upload size is unknown.
const DEFAULT_PART_COUNT: i64 = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct S3Options {
    /// Endpoint URL; empty for the AWS default resolver.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub region: String,
    pub bucket: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Lifetime of issued pre-signed URLs.
    #[serde(default = "default_presign_expire")]
    pub presign_expire_seconds: u64,
    #[serde(default = "default_path_style")]
    pub path_style: bool,
    /// Key prefix all registry objects live under.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_presign_expire() -> u64 {
    3600
}

fn default_path_style() -> bool {
    true
}

fn default_prefix() -> String {
    "registry".to_string()
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            url: String::new(),
            region: String::new(),
            bucket: "registry".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            presign_expire_seconds: default_presign_expire(),
            path_style: default_path_style(),
            prefix: default_prefix(),
        }
    }
}

/// S3-backed storage provider with a configurable key prefix, pre-signed
/// GET/PUT support and the multipart upload lifecycle.
#[derive(Debug)]
pub struct S3Provider {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    expire: Duration,
}

fn other<E>(err: E) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::new(PROVIDER, StorageErrorKind::Other, err)
}

impl S3Provider {
    pub async fn new(options: &S3Options) -> Result<Self, StorageError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if !options.region.is_empty() {
            loader = loader.region(aws_config::Region::new(options.region.clone()));
        }
        if !options.access_key.is_empty() {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                options.access_key.clone(),
                options.secret_key.clone(),
                None,
                None,
                "modelx",
            ));
        }
        if !options.url.is_empty() {
            loader = loader.endpoint_url(options.url.clone());
        }
        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(options.path_style)
            .build();
        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: options.bucket.clone(),
            prefix: options.prefix.trim_matches('/').to_string(),
            expire: Duration::from_secs(options.presign_expire_seconds),
        })
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn presigning(&self) -> Result<PresigningConfig, StorageError> {
        PresigningConfig::expires_in(self.expire).map_err(other)
    }

    /// Find the pending multipart upload for `key`, creating one when asked.
    async fn upload_id(&self, key: &str, create: bool) -> Result<Option<String>, StorageError> {
        let full = self.key(key);
        let pending = self
            .client
            .list_multipart_uploads()
            .bucket(&self.bucket)
            .delimiter("/")
            .prefix(&full)
            .send()
            .await
            .map_err(other)?;
        if let Some(upload) = pending.uploads().first() {
            return Ok(upload.upload_id().map(str::to_string));
        }
        if !create {
            return Ok(None);
        }
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(other)?;
        Ok(created.upload_id().map(str::to_string))
    }

    async fn upload_location(
        &self,
        key: &str,
        params: &LocationParams,
    ) -> Result<BlobLocation, StorageError> {
        if params.multipart || params.size > MULTIPART_THRESHOLD {
            return self.multipart_upload_location(key, params.size).await;
        }
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(key))
            .metadata("filename", params.name.clone())
            .presigned(self.presigning()?)
            .await
            .map_err(other)?;
        Ok(BlobLocation::single(
            PROVIDER,
            Purpose::Upload,
            part_from(request, 0),
        ))
    }

    async fn multipart_upload_location(
        &self,
        key: &str,
        size: i64,
    ) -> Result<BlobLocation, StorageError> {
        let upload_id = self
            .upload_id(key, true)
            .await?
            .ok_or_else(|| StorageError::new(
                PROVIDER,
                StorageErrorKind::Other,
                "no upload id returned for multipart upload",
            ))?;

        let mut count = size / MULTIPART_THRESHOLD;
        if count == 0 {
            count = DEFAULT_PART_COUNT;
        } else if size % MULTIPART_THRESHOLD != 0 {
            count += 1;
        }

        let mut parts = Vec::with_capacity(count as usize);
        for number in 1..=count {
            let request = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(self.key(key))
                .upload_id(&upload_id)
                .part_number(number as i32)
                .presigned(self.presigning()?)
                .await
                .map_err(other)?;
            parts.push(part_from(request, number as i32));
        }
        Ok(BlobLocation::multipart(PROVIDER, &upload_id, parts))
    }

    async fn download_location(&self, key: &str) -> Result<BlobLocation, StorageError> {
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(key))
            .presigned(self.presigning()?)
            .await
            .map_err(other)?;
        Ok(BlobLocation::single(
            PROVIDER,
            Purpose::Download,
            part_from(request, 0),
        ))
    }
}

fn part_from(request: PresignedRequest, part_number: i32) -> PresignedPart {
    let mut signed_header: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in request.headers() {
        signed_header
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }
    PresignedPart {
        url: request.uri().to_string(),
        method: request.method().to_string(),
        signed_header,
        part_number,
    }
}

fn timestamp(value: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<chrono::DateTime<chrono::Utc>> {
    value.and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
}

#[async_trait::async_trait]
impl Provider for S3Provider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    #[tracing::instrument(skip(self, content), fields(provider = PROVIDER))]
    async fn put(&self, key: &str, content: BlobContent) -> Result<(), StorageError> {
        let declared = content.content_length;
        // Holds the spool file open until the upload completes.
        let mut spool: Option<tempfile::NamedTempFile> = None;
        let (body, length) = match content.body {
            BlobBody::Bytes(data) => {
                let length = data.len() as i64;
                (ByteStream::from(data), length)
            }
            BlobBody::Reader(mut reader) => {
                // The SDK needs a rewindable body: spool the stream through a
                // temp file rather than memory.
                let file = tempfile::NamedTempFile::new().map_err(other)?;
                let mut writer = tokio::fs::File::create(file.path())
                    .await
                    .map_err(other)?;
                let length = tokio::io::copy(&mut reader, &mut writer)
                    .await
                    .map_err(other)? as i64;
                drop(writer);
                let body = ByteStream::from_path(file.path()).await.map_err(other)?;
                spool = Some(file);
                (body, length)
            }
        };
        if declared >= 0 && length != declared {
            return Err(StorageError::size_mismatch(PROVIDER, declared, length).key(key));
        }
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(key))
            .content_type(content.content_type)
            .content_length(length)
            .body(body)
            .send()
            .await
            .map_err(other);
        drop(spool);
        result.map(|_| ())
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn get(&self, key: &str) -> Result<BlobContent, StorageError> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(key))
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StorageError::not_found(PROVIDER, key)
                } else {
                    other(err)
                }
            })?;
        Ok(BlobContent::reader(
            out.content_type.unwrap_or_default(),
            out.content_length.unwrap_or(-1),
            Box::new(out.body.into_async_read()),
        ))
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn stat(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        let out = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(key))
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    StorageError::not_found(PROVIDER, key)
                } else {
                    other(err)
                }
            })?;
        Ok(ObjectMeta {
            name: key.to_string(),
            size: out.content_length().unwrap_or(0),
            last_modified: timestamp(out.last_modified()),
            content_type: out.content_type().unwrap_or_default().to_string(),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn remove(&self, key: &str, recursive: bool) -> Result<(), StorageError> {
        if !recursive {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(self.key(key))
                .send()
                .await
                .map_err(other)?;
            return Ok(());
        }

        let mut prefix = self.key(key);
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        let mut continuation: Option<String> = None;
        loop {
            let listed = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(other)?;
            let identifiers: Vec<ObjectIdentifier> = listed
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .map(|k| ObjectIdentifier::builder().key(k).build().map_err(other))
                .collect::<Result<_, _>>()?;
            if !identifiers.is_empty() {
                let delete = Delete::builder()
                    .set_objects(Some(identifiers))
                    .build()
                    .map_err(other)?;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(other)?;
            }
            match listed.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectMeta>, StorageError> {
        let mut full = self.key(prefix);
        if !full.ends_with('/') {
            full.push('/');
        }
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full)
                .set_continuation_token(continuation.take());
            if !recursive {
                request = request.delimiter("/");
            }
            let listed = request.send().await.map_err(other)?;
            for object in listed.contents() {
                let Some(key) = object.key() else { continue };
                let name = key.strip_prefix(&full).unwrap_or(key).to_string();
                if name.is_empty() {
                    continue;
                }
                out.push(ObjectMeta {
                    name,
                    size: object.size().unwrap_or(0),
                    last_modified: timestamp(object.last_modified()),
                    content_type: String::new(),
                });
            }
            match listed.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(out)
    }

    async fn blob_location(
        &self,
        key: &str,
        purpose: Purpose,
        params: &LocationParams,
    ) -> Result<BlobLocation, StorageError> {
        match purpose {
            Purpose::Upload => self.upload_location(key, params).await,
            Purpose::Download => self.download_location(key).await,
        }
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn complete_multipart(&self, key: &str, declared_size: i64) -> Result<(), StorageError> {
        let Some(upload_id) = self.upload_id(key, false).await? else {
            // Nothing pending: either never multipart or already completed.
            return Ok(());
        };
        let listed = self
            .client
            .list_parts()
            .bucket(&self.bucket)
            .key(self.key(key))
            .upload_id(&upload_id)
            .send()
            .await
            .map_err(other)?;

        if declared_size > 0 {
            let uploaded: i64 = listed.parts().iter().filter_map(|p| p.size()).sum();
            if uploaded != declared_size {
                return Err(StorageError::size_mismatch(PROVIDER, declared_size, uploaded).key(key));
            }
        }

        let parts: Vec<CompletedPart> = listed
            .parts()
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .set_e_tag(part.e_tag().map(str::to_string))
                    .set_part_number(part.part_number())
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(self.key(key))
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(other)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_counting_matches_the_contract() {
        // mirrors the sizing rule: at least 3 parts when size is unknown,
        // one part per 5 GiB chunk rounded up otherwise
        let count = |size: i64| -> i64 {
            let mut count = size / MULTIPART_THRESHOLD;
            if count == 0 {
                count = DEFAULT_PART_COUNT;
            } else if size % MULTIPART_THRESHOLD != 0 {
                count += 1;
            }
            count
        };
        assert_eq!(count(0), 3);
        assert_eq!(count(MULTIPART_THRESHOLD - 1), 3);
        assert_eq!(count(MULTIPART_THRESHOLD), 1);
        assert_eq!(count(MULTIPART_THRESHOLD + 1), 2);
        assert_eq!(count(MULTIPART_THRESHOLD * 2 + 5), 3);
    }

    #[test]
    fn options_defaults() {
        let options = S3Options::default();
        assert_eq!(options.bucket, "registry");
        assert_eq!(options.presign_expire_seconds, 3600);
        assert!(options.path_style);
    }
}
