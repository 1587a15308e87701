use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a pre-signed blob location will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Upload,
    Download,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Upload => f.write_str("upload"),
            Purpose::Download => f.write_str("download"),
        }
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Purpose::Upload),
            "download" => Ok(Purpose::Download),
            other => Err(format!("unknown purpose {other:?}")),
        }
    }
}

/// One pre-signed request the client may perform against object storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPart {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub signed_header: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "part_number_is_zero")]
    pub part_number: i32,
}

fn part_number_is_zero(n: &i32) -> bool {
    *n == 0
}

/// Instruction for direct client-to-object-store transfer, issued by the
/// registry when it delegates bulk I/O. `provider` tags the backend that
/// understands the `properties`; the client dispatches on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobLocation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Purpose>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl BlobLocation {
    /// A single-request location (plain presigned GET or PUT).
    pub fn single(provider: &str, purpose: Purpose, part: PresignedPart) -> Self {
        let mut properties = Map::new();
        properties.insert(
            "parts".to_string(),
            serde_json::to_value(vec![part]).unwrap_or(Value::Null),
        );
        Self {
            provider: provider.to_string(),
            purpose: Some(purpose),
            properties,
        }
    }

    /// A multipart upload location: one presigned request per part plus the
    /// pending upload id.
    pub fn multipart(provider: &str, upload_id: &str, parts: Vec<PresignedPart>) -> Self {
        let mut properties = Map::new();
        properties.insert("multipart".to_string(), Value::Bool(true));
        properties.insert("uploadId".to_string(), Value::String(upload_id.to_string()));
        properties.insert(
            "parts".to_string(),
            serde_json::to_value(parts).unwrap_or(Value::Null),
        );
        Self {
            provider: provider.to_string(),
            purpose: Some(Purpose::Upload),
            properties,
        }
    }

    /// Decode the presigned parts out of the free-form properties.
    pub fn parts(&self) -> Result<Vec<PresignedPart>, serde_json::Error> {
        match self.properties.get("parts") {
            Some(value) => serde_json::from_value(value.clone()),
            None => Ok(Vec::new()),
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.properties.get("multipart"), Some(Value::Bool(true)))
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.properties.get("uploadId").and_then(Value::as_str)
    }
}
