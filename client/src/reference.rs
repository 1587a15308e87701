use std::fmt;

use url::Url;

use crate::error::{ClientError, Result};
use crate::repos::RepoManager;
use crate::Client;

/// Environment variable holding a fallback `Bearer <token>` credential.
pub const MODELX_AUTH_ENV: &str = "MODELX_AUTH";

/// A parsed user-provided reference: registry base URL, repository path,
/// optional version tag, and the bearer credential resolved from (token
/// query parameter → environment → alias table).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub version: String,
    pub authorization: String,
}

impl Reference {
    /// Parse a reference, resolving scheme-less first segments through the
    /// default alias table.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_with(raw, || RepoManager::load_default())
    }

    fn parse_with<F>(raw: &str, manager: F) -> Result<Self>
    where
        F: FnOnce() -> Result<RepoManager>,
    {
        let mut auth = std::env::var(MODELX_AUTH_ENV).unwrap_or_default();
        let mut raw = raw.to_string();

        if !raw.contains("://") {
            let (alias, rest) = match raw.split_once('/') {
                Some((alias, rest)) => (alias, Some(rest)),
                None => (raw.as_str(), None),
            };
            let manager = manager()?;
            let details = manager.get(alias)?;
            if auth.is_empty() && !details.token.is_empty() {
                auth = format!("Bearer {}", details.token);
            }
            raw = match rest {
                Some(rest) => format!("{}/{}", details.url, rest),
                None => details.url.clone(),
            };
        }

        if !raw.starts_with("http://") && !raw.starts_with("https://") {
            raw = format!("https://{raw}");
        }
        let url = Url::parse(&raw).map_err(|err| ClientError::Reference(err.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::Reference("missing host".to_string()))?;

        if let Some((_, token)) = url.query_pairs().find(|(k, _)| k == "token") {
            if !token.is_empty() {
                auth = format!("Bearer {token}");
            }
        }

        let (path, version) = match url.path().split_once('@') {
            Some((path, version)) => (path, version.to_string()),
            None => (url.path(), String::new()),
        };
        let mut repository = path.trim_start_matches('/').to_string();
        if !repository.is_empty() && !repository.contains('/') {
            repository = format!("library/{repository}");
        }

        let registry = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        Ok(Reference {
            registry,
            repository,
            version,
            authorization: auth,
        })
    }

    /// Short model name: the last repository segment.
    pub fn name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    pub fn client(&self) -> Result<Client> {
        Client::new(&self.registry, &self.authorization)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}/{}", self.registry, self.repository)
        } else {
            write!(f, "{}/{}@{}", self.registry, self.repository, self.version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::RepoDetails;

    fn parse(raw: &str) -> Reference {
        let mut reference = Reference::parse(raw).unwrap();
        // ignore ambient MODELX_AUTH when comparing
        reference.authorization = String::new();
        reference
    }

    #[test]
    fn single_segment_repository_is_normalized() {
        assert_eq!(
            parse("https://registry.example.com/repository@sha256:abcdef"),
            Reference {
                registry: "https://registry.example.com".to_string(),
                repository: "library/repository".to_string(),
                version: "sha256:abcdef".to_string(),
                authorization: String::new(),
            }
        );
    }

    #[test]
    fn explicit_port_is_preserved() {
        assert_eq!(
            parse("https://registry.example.com:8443/repository/name@v1"),
            Reference {
                registry: "https://registry.example.com:8443".to_string(),
                repository: "repository/name".to_string(),
                version: "v1".to_string(),
                authorization: String::new(),
            }
        );
    }

    #[test]
    fn version_may_be_absent() {
        assert_eq!(
            parse("https://registry.example.com/repo/name"),
            Reference {
                registry: "https://registry.example.com".to_string(),
                repository: "repo/name".to_string(),
                version: String::new(),
                authorization: String::new(),
            }
        );
    }

    #[test]
    fn explicit_latest_is_kept() {
        let reference = parse("https://registry.example.com/repo/name@latest");
        assert_eq!(reference.version, "latest");
    }

    #[test]
    fn scheme_defaults_to_https_for_alias_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.json");
        let mut manager = RepoManager::load(&path).unwrap();
        manager
            .set(RepoDetails {
                name: "bare".to_string(),
                url: "modelx.example.com".to_string(),
                token: String::new(),
            })
            .unwrap();

        let reference =
            Reference::parse_with("bare/repo/name@v1", || RepoManager::load(&path)).unwrap();
        assert_eq!(reference.registry, "https://modelx.example.com");

        let reference = parse("http://registry.example.com/repo/name@v1");
        assert_eq!(reference.registry, "http://registry.example.com");
    }

    #[test]
    fn token_query_becomes_bearer() {
        let reference =
            Reference::parse("https://registry.example.com/repo/name?token=sesame").unwrap();
        assert_eq!(reference.authorization, "Bearer sesame");
        assert_eq!(reference.repository, "repo/name");
    }

    #[test]
    fn alias_resolves_url_and_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.json");
        let mut manager = RepoManager::load(&path).unwrap();
        manager
            .set(RepoDetails {
                name: "myrepo".to_string(),
                url: "https://modelx.example.com".to_string(),
                token: "sesame".to_string(),
            })
            .unwrap();

        let reference =
            Reference::parse_with("myrepo/project/demo@v1", || RepoManager::load(&path)).unwrap();
        assert_eq!(reference.registry, "https://modelx.example.com");
        assert_eq!(reference.repository, "project/demo");
        assert_eq!(reference.version, "v1");
        if std::env::var(MODELX_AUTH_ENV).is_err() {
            assert_eq!(reference.authorization, "Bearer sesame");
        }

        assert!(
            Reference::parse_with("unknown/project/demo", || RepoManager::load(&path)).is_err()
        );
    }

    #[test]
    fn display_roundtrip() {
        let reference = parse("https://registry.example.com/repo/name@v1");
        assert_eq!(
            reference.to_string(),
            "https://registry.example.com/repo/name@v1"
        );
        let reparsed = parse(&reference.to_string());
        assert_eq!(reparsed, reference);

        assert_eq!(reference.name(), "name");
    }
}
