use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Default name of the model configuration blob.
pub const CONFIG_FILE_NAME: &str = "modelx.yaml";
pub const README_FILE_NAME: &str = "README.md";
/// Working-tree cache directory for directory-blob archives.
pub const CACHE_DIR: &str = ".modelx";

/// The YAML model configuration carried as the manifest's config blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub framework: String,
    #[serde(default, skip_serializing_if = "serde_yaml::Value::is_null")]
    pub config: serde_yaml::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_yaml::Value::is_null")]
    pub resources: serde_yaml::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<String>,
    /// Paths (relative to the model root) that inference runtimes should
    /// fetch; empty means everything.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_files: Vec<String>,
}

impl ModelConfig {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(raw)?)
    }

    fn skeleton() -> Self {
        ModelConfig {
            description: "This is a modelx model".to_string(),
            framework: "<some framework. PyTorch|TensorFlow|ONNX|etc>".to_string(),
            config: serde_yaml::from_str("inputs: {}\noutputs: {}").unwrap_or_default(),
            tags: vec!["modelx".to_string()],
            resources: serde_yaml::from_str("cpu: \"4\"\nmemory: 16Gi").unwrap_or_default(),
            maintainers: vec!["maintainer".to_string()],
            model_files: Vec::new(),
        }
    }
}

/// Scaffold a new model directory: a `modelx.yaml` skeleton plus a README.
pub fn init_model(path: &Utf8Path, force: bool) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(_) if !force => {
            return Err(ClientError::Other(format!("path {path} already exists")));
        }
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    std::fs::create_dir_all(path)?;

    let config = serde_yaml::to_string(&ModelConfig::skeleton())?;
    std::fs::write(path.join(CONFIG_FILE_NAME), config)?;

    let readme = path.join(README_FILE_NAME);
    if !readme.exists() {
        let name = path.file_name().unwrap_or("model");
        std::fs::write(readme, format!("# {name}\n\nAwesome model description.\n"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn init_scaffolds_config_and_readme() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("demo")).unwrap();

        init_model(&path, false).unwrap();
        assert!(path.join(CONFIG_FILE_NAME).is_file());
        assert!(path.join(README_FILE_NAME).is_file());

        // refuses to overwrite without force
        assert!(init_model(&path, false).is_err());
        init_model(&path, true).unwrap();

        let raw = std::fs::read(path.join(CONFIG_FILE_NAME)).unwrap();
        let config = ModelConfig::parse(&raw).unwrap();
        assert_eq!(config.description, "This is a modelx model");
        assert!(config.model_files.is_empty());
    }
}
