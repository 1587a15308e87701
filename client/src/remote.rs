use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};

use modelx_types::{
    annotations_query, BlobLocation, Descriptor, Digest, ErrorInfo, Index, Manifest, Purpose,
    MEDIA_TYPE_MODEL_MANIFEST,
};

use crate::error::{ClientError, Result};

/// Global User-Agent carried on every request.
pub const USER_AGENT: &str = concat!("modelx/", env!("CARGO_PKG_VERSION"));

/// Typed HTTP client for the registry protocol.
///
/// Redirects are never followed automatically: a redirect to object storage
/// must surface to the extension layer instead of being retried with the
/// registry's `Authorization` header.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    registry: String,
    authorization: String,
    http: reqwest::Client,
}

fn latest_if_empty(version: &str) -> &str {
    if version.is_empty() {
        "latest"
    } else {
        version
    }
}

impl RegistryClient {
    pub fn new(registry: &str, authorization: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            registry: registry.trim_end_matches('/').to_string(),
            authorization: authorization.to_string(),
            http,
        })
    }

    /// The underlying HTTP client, reused for pre-signed transfers (which
    /// carry their own signatures, never the registry credential).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.registry));
        if !self.authorization.is_empty() {
            builder = builder.header(AUTHORIZATION, self.authorization.clone());
        }
        builder
    }

    /// Decode non-2xx responses into the wire error envelope. Non-JSON
    /// bodies become code `UNKNOWN` carrying the raw body.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.as_u16() < 400 {
            return Ok(response);
        }
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        let info = if is_json {
            let mut info: ErrorInfo = response.json().await?;
            info.status = status.as_u16();
            info
        } else {
            let body = response.text().await.unwrap_or_default();
            ErrorInfo::unknown(status.as_u16(), body)
        };
        Err(ClientError::Api(info))
    }

    pub async fn get_global_index(&self, search: &str) -> Result<Index> {
        let mut request = self.request(Method::GET, "/");
        if !search.is_empty() {
            request = request.query(&[("search", search)]);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn get_index(&self, repository: &str, search: &str) -> Result<Index> {
        let mut request = self.request(Method::GET, &format!("/{repository}/index"));
        if !search.is_empty() {
            request = request.query(&[("search", search)]);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn remove_index(&self, repository: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("/{repository}/index"));
        Self::check(request.send().await?).await?;
        Ok(())
    }

    pub async fn get_manifest(&self, repository: &str, version: &str) -> Result<Manifest> {
        let version = latest_if_empty(version);
        let request = self.request(Method::GET, &format!("/{repository}/manifests/{version}"));
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn put_manifest(
        &self,
        repository: &str,
        version: &str,
        manifest: &Manifest,
    ) -> Result<()> {
        let version = latest_if_empty(version);
        let request = self
            .request(Method::PUT, &format!("/{repository}/manifests/{version}"))
            .header(CONTENT_TYPE, MEDIA_TYPE_MODEL_MANIFEST)
            .json(manifest);
        Self::check(request.send().await?).await?;
        Ok(())
    }

    pub async fn exists_manifest(&self, repository: &str, version: &str) -> Result<bool> {
        let version = latest_if_empty(version);
        let request = self.request(Method::HEAD, &format!("/{repository}/manifests/{version}"));
        // HEAD responses carry no envelope
        Ok(request.send().await?.status() == StatusCode::OK)
    }

    pub async fn delete_manifest(&self, repository: &str, version: &str) -> Result<()> {
        let version = latest_if_empty(version);
        let request = self.request(Method::DELETE, &format!("/{repository}/manifests/{version}"));
        Self::check(request.send().await?).await?;
        Ok(())
    }

    pub async fn head_blob(&self, repository: &str, digest: &Digest) -> Result<bool> {
        let request = self.request(Method::HEAD, &format!("/{repository}/blobs/{digest}"));
        Ok(request.send().await?.status() == StatusCode::OK)
    }

    /// Fetch a blob as a streaming response.
    pub async fn get_blob(&self, repository: &str, digest: &Digest) -> Result<Response> {
        let request = self.request(Method::GET, &format!("/{repository}/blobs/{digest}"));
        Self::check(request.send().await?).await
    }

    /// Stream a blob body inline through the registry.
    pub async fn upload_blob(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        body: reqwest::Body,
    ) -> Result<()> {
        let digest = descriptor
            .digest
            .as_ref()
            .ok_or_else(|| ClientError::Other("descriptor missing digest".to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        if descriptor.size > 0 {
            headers.insert(reqwest::header::CONTENT_LENGTH, descriptor.size.into());
        }
        let request = self
            .request(Method::PUT, &format!("/{repository}/blobs/{digest}"))
            .headers(headers)
            .body(body);
        Self::check(request.send().await?).await?;
        Ok(())
    }

    /// Ask the registry for a pre-signed location to transfer this blob
    /// directly against object storage.
    pub async fn get_blob_location(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        purpose: Purpose,
    ) -> Result<BlobLocation> {
        let digest = descriptor
            .digest
            .as_ref()
            .ok_or_else(|| ClientError::Other("descriptor missing digest".to_string()))?;
        let mut query = vec![
            ("size", descriptor.size.to_string()),
            ("name", descriptor.name.clone()),
            ("media-type", descriptor.media_type.clone()),
        ];
        if !descriptor.annotations.is_empty() {
            query.push(("annotations", annotations_query(&descriptor.annotations)));
        }
        let request = self
            .request(
                Method::GET,
                &format!("/{repository}/blobs/{digest}/locations/{purpose}"),
            )
            .query(&query);
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }
}
