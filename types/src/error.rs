use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// The closed set of wire error codes. Every failure a registry endpoint can
/// produce normalizes to one of these, paired with a fixed HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BlobUnknown,
    ManifestUnknown,
    IndexUnknown,
    DigestInvalid,
    ManifestInvalid,
    NameInvalid,
    SizeInvalid,
    InvalidParameter,
    ConfigInvalid,
    Unauthorized,
    Unsupported,
    Internal,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BlobUnknown => "BLOB_UNKNOWN",
            ErrorCode::ManifestUnknown => "MANIFEST_UNKNOWN",
            ErrorCode::IndexUnknown => "INDEX_UNKNOWN",
            ErrorCode::DigestInvalid => "DIGEST_INVALID",
            ErrorCode::ManifestInvalid => "MANIFEST_INVALID",
            ErrorCode::NameInvalid => "NAME_INVALID",
            ErrorCode::SizeInvalid => "SIZE_INVALID",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::BlobUnknown | ErrorCode::ManifestUnknown | ErrorCode::IndexUnknown => 404,
            ErrorCode::DigestInvalid
            | ErrorCode::ManifestInvalid
            | ErrorCode::NameInvalid
            | ErrorCode::SizeInvalid
            | ErrorCode::InvalidParameter
            | ErrorCode::ConfigInvalid
            | ErrorCode::Unknown => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Unsupported => 501,
            ErrorCode::Internal => 500,
        }
    }
}

/// The JSON error envelope: `{code, message, detail}` plus the HTTP status it
/// travelled with. This is both the server's response body for failures and
/// the error type the client surfaces to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub detail: String,
    #[serde(skip)]
    pub status: u16,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

impl ErrorInfo {
    fn new(code: ErrorCode, message: String) -> Self {
        Self {
            status: code.http_status(),
            code,
            message,
            detail: String::new(),
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    pub fn blob_unknown(digest: &Digest) -> Self {
        Self::new(ErrorCode::BlobUnknown, format!("blob: {digest} not found"))
    }

    pub fn manifest_unknown(reference: &str) -> Self {
        Self::new(
            ErrorCode::ManifestUnknown,
            format!("manifest: {reference} not found"),
        )
    }

    pub fn index_unknown(repository: &str) -> Self {
        Self::new(
            ErrorCode::IndexUnknown,
            format!("index: {repository} not found"),
        )
    }

    pub fn digest_invalid(got: &str) -> Self {
        Self::new(ErrorCode::DigestInvalid, format!("digest invalid: {got}"))
    }

    pub fn manifest_invalid(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ManifestInvalid, message.to_string())
    }

    pub fn name_invalid(got: &str) -> Self {
        Self::new(ErrorCode::NameInvalid, format!("name invalid: {got}"))
    }

    pub fn size_invalid(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::SizeInvalid, format!("content length: {message}"))
    }

    pub fn content_type_invalid(got: &str) -> Self {
        Self::new(
            ErrorCode::InvalidParameter,
            format!("content type invalid: {got}"),
        )
    }

    pub fn parameter_invalid(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidParameter, message.to_string())
    }

    pub fn config_invalid(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message.to_string())
    }

    pub fn unauthorized(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Unauthorized, message.to_string())
    }

    pub fn unsupported(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Unsupported, message.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Internal, err.to_string())
    }

    /// An error decoded from a non-JSON response body.
    pub fn unknown(status: u16, body: String) -> Self {
        Self {
            code: ErrorCode::Unknown,
            message: body.clone(),
            detail: body,
            status,
        }
    }
}
