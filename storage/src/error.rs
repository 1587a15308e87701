use std::error::Error as StdError;
use std::fmt;

/// Categorizes storage failures by what they mean to the registry layer,
/// independent of the backend that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The key does not exist.
    NotFound,
    /// The backend cannot perform this operation (e.g. presigning on the
    /// filesystem provider). Callers treat this as a signal, not a failure.
    Unsupported,
    /// The written payload did not match its declared length.
    SizeMismatch,
    /// The request itself was invalid.
    InvalidInput,
    /// Anything else: I/O, network, backend faults.
    Other,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => f.write_str("not found"),
            StorageErrorKind::Unsupported => f.write_str("unsupported"),
            StorageErrorKind::SizeMismatch => f.write_str("size mismatch"),
            StorageErrorKind::InvalidInput => f.write_str("invalid input"),
            StorageErrorKind::Other => f.write_str("storage failure"),
        }
    }
}

/// A storage failure with its semantic kind, the provider that raised it and
/// the key it concerned.
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    provider: &'static str,
    key: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl StorageError {
    pub fn new<E>(provider: &'static str, kind: StorageErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            provider,
            key: None,
            source: Some(source.into()),
        }
    }

    /// Closure adaptor for `.map_err`.
    pub fn with<E>(
        provider: &'static str,
        kind: StorageErrorKind,
    ) -> impl FnOnce(E) -> StorageError
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        move |source| StorageError::new(provider, kind, source)
    }

    pub fn not_found(provider: &'static str, key: impl Into<String>) -> Self {
        Self {
            kind: StorageErrorKind::NotFound,
            provider,
            key: Some(key.into()),
            source: None,
        }
    }

    pub fn unsupported(provider: &'static str, what: impl fmt::Display) -> Self {
        Self {
            kind: StorageErrorKind::Unsupported,
            provider,
            key: Some(what.to_string()),
            source: None,
        }
    }

    pub fn size_mismatch(provider: &'static str, declared: i64, actual: i64) -> Self {
        Self {
            kind: StorageErrorKind::SizeMismatch,
            provider,
            key: Some(format!("{actual} != {declared}")),
            source: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind == StorageErrorKind::Unsupported
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.kind, self.provider)?;
        if let Some(key) = &self.key {
            write!(f, " ({key})")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}
