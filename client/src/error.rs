use thiserror::Error;

use modelx_types::{ErrorCode, ErrorInfo};

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A decoded wire error envelope from the registry.
    #[error("{0}")]
    Api(#[from] ErrorInfo),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid reference: {0}")]
    Reference(String),

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Whether the server signalled that an operation is not implemented:
    /// either the `UNSUPPORTED` code or a plain 404 from the location
    /// endpoint. The transfer engine falls back to inline transfer on this.
    pub fn is_server_unsupported(&self) -> bool {
        match self {
            ClientError::Api(info) => info.is(ErrorCode::Unsupported) || info.status == 404,
            _ => false,
        }
    }
}
