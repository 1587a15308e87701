use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

pub const MEDIA_TYPE_MODEL_INDEX: &str = "application/vnd.modelx.model.index.v1.json";
pub const MEDIA_TYPE_MODEL_MANIFEST: &str = "application/vnd.modelx.model.manifest.v1.json";
pub const MEDIA_TYPE_MODEL_CONFIG: &str = "application/vnd.modelx.model.config.v1.yaml";
pub const MEDIA_TYPE_MODEL_FILE: &str = "application/vnd.modelx.model.file.v1";
pub const MEDIA_TYPE_MODEL_DIRECTORY: &str = "application/vnd.modelx.model.directory.v1.tar+gz";

pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Free-form string annotations attached to a descriptor or document.
pub type Annotations = BTreeMap<String, String>;

/// Render annotations as `k=v,k2=v2`, the form used in query parameters.
pub fn annotations_query(annotations: &Annotations) -> String {
    annotations
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Metadata record for one stored object: a manifest entry pointing at a blob,
/// or an index entry pointing at a version or repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub size: i64,
    /// Unix permission bits of the source file or directory.
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

/// The immutable snapshot of one `(repository, version)`: a config descriptor
/// plus a name-sorted list of blob descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default)]
    pub blobs: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION,
            media_type: MEDIA_TYPE_MODEL_MANIFEST.to_string(),
            ..Default::default()
        }
    }

    /// Sort blob descriptors by name, the canonical order within a manifest.
    pub fn sort_blobs(&mut self) {
        self.blobs.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// All descriptors of the manifest: the blobs followed by the config.
    pub fn all_descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.blobs.iter().chain(std::iter::once(&self.config))
    }
}

/// Listing of versions within a repository, or of repositories within a
/// registry (the global index).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl Index {
    pub fn new() -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION,
            media_type: MEDIA_TYPE_MODEL_INDEX.to_string(),
            ..Default::default()
        }
    }

    /// Retain only descriptors whose name contains `search`. An empty search
    /// matches everything.
    pub fn filter(mut self, search: &str) -> Self {
        if !search.is_empty() {
            self.manifests.retain(|d| d.name.contains(search));
        }
        self
    }

    pub fn sort_manifests(&mut self) {
        self.manifests.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_wire_shape() {
        let descriptor = Descriptor {
            name: "weights.bin".to_string(),
            media_type: MEDIA_TYPE_MODEL_FILE.to_string(),
            digest: Some(Digest::from_bytes(b"weights")),
            size: 7,
            mode: 0o644,
            modified: None,
            annotations: Annotations::new(),
        };
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["name"], "weights.bin");
        assert_eq!(value["mediaType"], MEDIA_TYPE_MODEL_FILE);
        assert_eq!(value["size"], 7);
        assert!(value.get("annotations").is_none());
        assert!(value.get("modified").is_none());

        let back: Descriptor = serde_json::from_value(value).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn manifest_sorts_blobs_by_name() {
        let mut manifest = Manifest::new();
        for name in ["zeta", "alpha", "mid"] {
            manifest.blobs.push(Descriptor {
                name: name.to_string(),
                ..Default::default()
            });
        }
        manifest.sort_blobs();
        let names: Vec<_> = manifest.blobs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn index_filter_is_substring_match() {
        let mut index = Index::new();
        for name in ["library/bert", "library/llama", "project/llama2"] {
            index.manifests.push(Descriptor {
                name: name.to_string(),
                ..Default::default()
            });
        }
        let filtered = index.clone().filter("llama");
        let names: Vec<_> = filtered.manifests.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["library/llama", "project/llama2"]);

        assert_eq!(index.clone().filter("").manifests.len(), 3);
    }

    #[test]
    fn annotations_query_form() {
        let mut annotations = Annotations::new();
        annotations.insert("a".to_string(), "1".to_string());
        annotations.insert("b".to_string(), "2".to_string());
        assert_eq!(annotations_query(&annotations), "a=1,b=2");
    }
}
