use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};

use modelx_storage::{BlobContent, LocationParams};
use modelx_types::{Digest, ErrorInfo, Index, Manifest, Purpose};

use crate::gc;
use crate::store::RegistryStore;

/// Wire error wrapper: renders the `{code, message, detail}` envelope with
/// the status the code maps to.
#[derive(Debug)]
pub struct ApiError(pub ErrorInfo);

impl From<ErrorInfo> for ApiError {
    fn from(info: ErrorInfo) -> Self {
        ApiError(info)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

type Store = State<Arc<RegistryStore>>;

fn valid_name_segment(segment: &str) -> bool {
    // [a-zA-Z0-9]+(?:[._-][a-zA-Z0-9]+)*
    if segment.is_empty() {
        return false;
    }
    for component in segment.split(['.', '_', '-']) {
        if component.is_empty() || !component.chars().all(|c| c.is_ascii_alphanumeric()) {
            return false;
        }
    }
    true
}

/// `{repo}` is always exactly two slash-separated segments.
pub fn parse_repository(repository: &str, name: &str) -> Result<String, ErrorInfo> {
    if !valid_name_segment(repository) || !valid_name_segment(name) {
        return Err(ErrorInfo::name_invalid(&format!("{repository}/{name}")));
    }
    Ok(format!("{repository}/{name}"))
}

/// A version tag: `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
pub fn parse_reference(reference: &str) -> Result<&str, ErrorInfo> {
    let mut chars = reference.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
            reference.len() <= 128
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
        _ => false,
    };
    if valid {
        Ok(reference)
    } else {
        Err(ErrorInfo::manifest_invalid(format!(
            "reference invalid: {reference}"
        )))
    }
}

pub fn parse_digest(digest: &str) -> Result<Digest, ErrorInfo> {
    Digest::from_str(digest).map_err(|_| ErrorInfo::digest_invalid(digest))
}

fn search_of(query: &HashMap<String, String>) -> String {
    query.get("search").cloned().unwrap_or_default()
}

pub async fn get_global_index(
    State(store): Store,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<Index>> {
    Ok(Json(store.get_global_index(&search_of(&query)).await?))
}

pub async fn get_index(
    State(store): Store,
    Path((repository, name)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<Index>> {
    let repository = parse_repository(&repository, &name)?;
    Ok(Json(store.get_index(&repository, &search_of(&query)).await?))
}

pub async fn delete_index(
    State(store): Store,
    Path((repository, name)): Path<(String, String)>,
) -> ApiResult<Json<&'static str>> {
    let repository = parse_repository(&repository, &name)?;
    store.remove_index(&repository).await?;
    Ok(Json("ok"))
}

pub async fn head_manifest(
    State(store): Store,
    Path((repository, name, reference)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let repository = parse_repository(&repository, &name)?;
    let reference = parse_reference(&reference)?;
    if store.exists_manifest(&repository, reference).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

pub async fn get_manifest(
    State(store): Store,
    Path((repository, name, reference)): Path<(String, String, String)>,
) -> ApiResult<Json<Manifest>> {
    let repository = parse_repository(&repository, &name)?;
    let reference = parse_reference(&reference)?;
    Ok(Json(store.get_manifest(&repository, reference).await?))
}

pub async fn put_manifest(
    State(store): Store,
    Path((repository, name, reference)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let repository = parse_repository(&repository, &name)?;
    let reference = parse_reference(&reference)?;
    let manifest: Manifest =
        serde_json::from_slice(&body).map_err(ErrorInfo::manifest_invalid)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    store
        .put_manifest(&repository, reference, content_type, manifest)
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn delete_manifest(
    State(store): Store,
    Path((repository, name, reference)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let repository = parse_repository(&repository, &name)?;
    let reference = parse_reference(&reference)?;
    store.delete_manifest(&repository, reference).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn head_blob(
    State(store): Store,
    Path((repository, name, digest)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let repository = parse_repository(&repository, &name)?;
    let digest = parse_digest(&digest)?;
    if store.exists_blob(&repository, &digest).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

pub async fn get_blob(
    State(store): Store,
    Path((repository, name, digest)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let repository = parse_repository(&repository, &name)?;
    let digest = parse_digest(&digest)?;
    let content = store.get_blob(&repository, &digest).await?;

    let mut builder = Response::builder().status(StatusCode::OK);
    let content_type = if content.content_type.is_empty() {
        "application/octet-stream"
    } else {
        content.content_type.as_str()
    };
    builder = builder.header(header::CONTENT_TYPE, content_type);
    if content.content_length >= 0 {
        builder = builder.header(header::CONTENT_LENGTH, content.content_length);
    }
    builder
        .body(Body::from_stream(ReaderStream::new(content.into_reader())))
        .map_err(|err| ApiError(ErrorInfo::internal(err)))
}

pub async fn put_blob(
    State(store): Store,
    Path((repository, name, digest)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<StatusCode> {
    let repository = parse_repository(&repository, &name)?;
    let digest = parse_digest(&digest)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type.is_empty() {
        return Err(ErrorInfo::content_type_invalid("empty").into());
    }
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(-1);

    let stream = body
        .into_data_stream()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
    let content = BlobContent::reader(
        content_type,
        content_length,
        Box::new(StreamReader::new(stream)),
    );
    store.put_blob(&repository, &digest, content).await?;
    Ok(StatusCode::CREATED)
}

pub async fn get_blob_location(
    State(store): Store,
    Path((repository, name, digest, purpose)): Path<(String, String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<modelx_types::BlobLocation>> {
    let repository = parse_repository(&repository, &name)?;
    let digest = parse_digest(&digest)?;
    let purpose = Purpose::from_str(&purpose).map_err(ErrorInfo::parameter_invalid)?;
    let params = LocationParams {
        size: query
            .get("size")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default(),
        multipart: query
            .get("multipart")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default(),
        name: query.get("name").cloned().unwrap_or_default(),
    };
    Ok(Json(
        store
            .get_blob_location(&repository, &digest, purpose, &params)
            .await?,
    ))
}

pub async fn garbage_collect(
    State(store): Store,
    Path((repository, name)): Path<(String, String)>,
) -> ApiResult<Json<std::collections::BTreeMap<String, String>>> {
    let repository = parse_repository(&repository, &name)?;
    Ok(Json(gc::gc_repository(&store, &repository).await?))
}
