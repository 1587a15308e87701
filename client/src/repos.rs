use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// One locally remembered registry: a short alias resolving to a base URL
/// and an optional bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoDetails {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
}

/// The alias table persisted under `~/.modelx/repositories.json`.
#[derive(Debug)]
pub struct RepoManager {
    path: PathBuf,
    repos: Vec<RepoDetails>,
}

impl RepoManager {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".modelx")
            .join("repositories.json")
    }

    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let repos = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, repos })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&self.repos)?)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Result<&RepoDetails> {
        self.repos.iter().find(|r| r.name == name).ok_or_else(|| {
            ClientError::Other(format!(
                "repository {name:?} not found, add it with `modelx repo add`"
            ))
        })
    }

    /// Insert or replace an alias.
    pub fn set(&mut self, details: RepoDetails) -> Result<()> {
        self.repos.retain(|r| r.name != details.name);
        self.repos.push(details);
        self.repos.sort_by(|a, b| a.name.cmp(&b.name));
        self.save()
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        let before = self.repos.len();
        self.repos.retain(|r| r.name != name);
        if self.repos.len() == before {
            return Err(ClientError::Other(format!("repository {name:?} not found")));
        }
        self.save()
    }

    pub fn list(&self) -> &[RepoDetails] {
        &self.repos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.json");

        let mut manager = RepoManager::load(&path).unwrap();
        assert!(manager.list().is_empty());

        manager
            .set(RepoDetails {
                name: "myrepo".to_string(),
                url: "https://modelx.example.com".to_string(),
                token: "secret".to_string(),
            })
            .unwrap();

        // reload from disk
        let manager = RepoManager::load(&path).unwrap();
        let details = manager.get("myrepo").unwrap();
        assert_eq!(details.url, "https://modelx.example.com");
        assert!(manager.get("other").is_err());

        let mut manager = RepoManager::load(&path).unwrap();
        manager.remove("myrepo").unwrap();
        assert!(manager.get("myrepo").is_err());
        assert!(manager.remove("myrepo").is_err());
    }

    #[test]
    fn set_replaces_existing_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.json");
        let mut manager = RepoManager::load(&path).unwrap();
        for url in ["https://one.example.com", "https://two.example.com"] {
            manager
                .set(RepoDetails {
                    name: "repo".to_string(),
                    url: url.to_string(),
                    token: String::new(),
                })
                .unwrap();
        }
        assert_eq!(manager.list().len(), 1);
        assert_eq!(manager.get("repo").unwrap().url, "https://two.example.com");
    }
}
