use std::io::SeekFrom;

use camino::Utf8Path;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use url::Url;

use modelx_types::{BlobLocation, Descriptor, ErrorInfo, PresignedPart};

use crate::error::{ClientError, Result};
use crate::progress::TransferBar;

/// Drive transfers against pre-signed object-store locations. These requests
/// carry the signature baked into the URL and signed headers; the registry
/// credential never travels here.
fn ensure_known_provider(location: &BlobLocation) -> Result<()> {
    match location.provider.as_str() {
        "s3" => Ok(()),
        other => Err(ClientError::Api(ErrorInfo::unsupported(format!(
            "provider: {other}"
        )))),
    }
}

fn apply_signed_headers(
    mut request: reqwest::RequestBuilder,
    part: &PresignedPart,
) -> reqwest::RequestBuilder {
    for (name, values) in &part.signed_header {
        for value in values {
            request = request.header(name.as_str(), value.as_str());
        }
    }
    request
}

/// Pre-signed uploads default to POST; S3-style URLs (recognized by their
/// `X-Amz-Credential` query parameter) take PUT.
fn upload_method(part: &PresignedPart) -> Method {
    let mut method = if part.method.is_empty() {
        Method::POST
    } else {
        Method::from_bytes(part.method.as_bytes()).unwrap_or(Method::POST)
    };
    if method == Method::POST {
        let signed_by_s3 = Url::parse(&part.url)
            .map(|url| url.query_pairs().any(|(k, _)| k == "X-Amz-Credential"))
            .unwrap_or(false);
        if signed_by_s3 {
            method = Method::PUT;
        }
    }
    method
}

/// Byte windows assigning `size` bytes to `count` presigned parts.
fn part_ranges(size: i64, count: i64) -> Vec<(u64, u64)> {
    if size <= 0 || count <= 0 {
        return Vec::new();
    }
    let part_size = (size + count - 1) / count;
    let mut ranges = Vec::new();
    let mut offset = 0i64;
    while offset < size {
        let len = part_size.min(size - offset);
        ranges.push((offset as u64, len as u64));
        offset += len;
    }
    ranges
}

pub async fn download(
    http: &reqwest::Client,
    location: &BlobLocation,
    into: &mut (impl AsyncWrite + Unpin),
) -> Result<()> {
    ensure_known_provider(location)?;
    tracing::debug!(provider = %location.provider, "downloading blob via pre-signed location");
    let parts = location.parts()?;
    let part = parts
        .first()
        .ok_or_else(|| ClientError::Other("blob location carries no parts".to_string()))?;

    let request = apply_signed_headers(http.get(&part.url), part);
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(ClientError::Other(format!(
            "unexpected status {} from blob location",
            response.status()
        )));
    }
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.try_next().await? {
        into.write_all(&chunk).await?;
    }
    into.flush().await?;
    Ok(())
}

pub async fn upload(
    http: &reqwest::Client,
    location: &BlobLocation,
    path: &Utf8Path,
    descriptor: &Descriptor,
    bar: &TransferBar,
) -> Result<()> {
    ensure_known_provider(location)?;
    tracing::debug!(
        provider = %location.provider,
        multipart = location.is_multipart(),
        "uploading blob via pre-signed location"
    );
    let parts = location.parts()?;
    if location.is_multipart() && parts.len() > 1 {
        let ranges = part_ranges(descriptor.size, parts.len() as i64);
        for (part, (offset, len)) in parts.iter().zip(ranges) {
            let mut file = tokio::fs::File::open(path).await?;
            file.seek(SeekFrom::Start(offset)).await?;
            let reader = bar.wrap_async_read(file.take(len));
            send_part(http, part, Body::wrap_stream(ReaderStream::new(reader)), len).await?;
        }
        Ok(())
    } else {
        let part = parts
            .first()
            .ok_or_else(|| ClientError::Other("blob location carries no parts".to_string()))?;
        let file = tokio::fs::File::open(path).await?;
        let len = descriptor.size.max(0) as u64;
        let reader = bar.wrap_async_read(file);
        send_part(http, part, Body::wrap_stream(ReaderStream::new(reader)), len).await
    }
}

async fn send_part(
    http: &reqwest::Client,
    part: &PresignedPart,
    body: Body,
    content_length: u64,
) -> Result<()> {
    let request = apply_signed_headers(
        http.request(upload_method(part), &part.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, content_length),
        part,
    )
    .body(body);
    let response = request.send().await?;
    if response.status().as_u16() >= 400 {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Other(format!(
            "unexpected status {status}: {body}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_switches_to_put_for_s3_signed_urls() {
        let part = PresignedPart {
            url: "https://bucket.example/key?X-Amz-Credential=AKIA%2F20240101".to_string(),
            ..Default::default()
        };
        assert_eq!(upload_method(&part), Method::PUT);

        let plain = PresignedPart {
            url: "https://storage.example/upload/key".to_string(),
            ..Default::default()
        };
        assert_eq!(upload_method(&plain), Method::POST);

        let explicit = PresignedPart {
            url: "https://storage.example/upload/key".to_string(),
            method: "PUT".to_string(),
            ..Default::default()
        };
        assert_eq!(upload_method(&explicit), Method::PUT);
    }

    #[test]
    fn part_ranges_cover_the_size_exactly() {
        assert_eq!(part_ranges(10, 3), vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(part_ranges(9, 3), vec![(0, 3), (3, 3), (6, 3)]);
        assert_eq!(part_ranges(1, 3), vec![(0, 1)]);
        assert!(part_ranges(0, 3).is_empty());

        let total: u64 = part_ranges(5_632_000_000, 2).iter().map(|(_, l)| l).sum();
        assert_eq!(total, 5_632_000_000);
    }

    #[test]
    fn unknown_providers_are_unsupported() {
        let location = BlobLocation {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        let err = ensure_known_provider(&location).unwrap_err();
        assert!(err.is_server_unsupported());
    }
}
