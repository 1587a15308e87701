use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Hex form of the sha256 digest of zero bytes, the reserved "no content"
/// digest.
const EMPTY_SHA256_HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// The canonical digest algorithm.
pub const CANONICAL_ALGORITHM: &str = "sha256";

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("invalid digest format: {0:?}")]
    InvalidFormat(String),
    #[error("invalid digest algorithm: {0:?}")]
    InvalidAlgorithm(String),
}

/// An algorithm-tagged content digest in `<alg>:<hex>` form.
///
/// The digest is the identity of a blob: two blobs with equal digests are the
/// same blob. Parsing enforces the wire grammar
/// `<alg>[-_+.alphanum]*:<at least 32 hex chars>`; computing always uses the
/// canonical sha256 algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Digest of an in-memory byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            algorithm: CANONICAL_ALGORITHM.to_string(),
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    /// Digest a reader to completion, returning the digest and the number of
    /// bytes consumed.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut total = 0u64;
        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((
            Self {
                algorithm: CANONICAL_ALGORITHM.to_string(),
                hex: hex::encode(hasher.finalize()),
            },
            total,
        ))
    }

    /// The reserved digest of the empty byte string.
    pub fn empty() -> Self {
        Self {
            algorithm: CANONICAL_ALGORITHM.to_string(),
            hex: EMPTY_SHA256_HEX.to_string(),
        }
    }

    /// Whether this digest is the reserved empty-content digest.
    pub fn is_empty_content(&self) -> bool {
        self.algorithm == CANONICAL_ALGORITHM && self.hex == EMPTY_SHA256_HEX
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// First eight hex characters, used for display labels.
    pub fn short(&self) -> &str {
        &self.hex[..8]
    }
}

/// Incremental sha256 digester for callers that stream bytes through.
#[derive(Default)]
pub struct Digester {
    hasher: Sha256,
}

impl Digester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finish(self) -> Digest {
        Digest {
            algorithm: CANONICAL_ALGORITHM.to_string(),
            hex: hex::encode(self.hasher.finalize()),
        }
    }
}

impl io::Write for Digester {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

fn valid_algorithm(algorithm: &str) -> bool {
    // <component>([-_+.]<component>)* where a component starts with a letter
    for component in algorithm.split(['-', '_', '+', '.']) {
        let mut chars = component.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return false,
        }
        if !chars.all(|c| c.is_ascii_alphanumeric()) {
            return false;
        }
    }
    true
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestError::InvalidFormat(s.to_string()))?;
        if !valid_algorithm(algorithm) {
            return Err(DigestError::InvalidAlgorithm(algorithm.to_string()));
        }
        if hex.len() < 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidFormat(s.to_string()));
        }
        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        let raw = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let digest: Digest = raw.parse().unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.to_string(), raw);
        assert!(digest.is_empty_content());
    }

    #[test]
    fn empty_digest_matches_computed() {
        assert_eq!(Digest::from_bytes(b""), Digest::empty());
    }

    #[test]
    fn from_reader_counts_bytes() {
        let data = b"hello modelx";
        let (digest, size) = Digest::from_reader(&data[..]).unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(digest, Digest::from_bytes(data));
    }

    #[test]
    fn rejects_malformed() {
        assert!("plainstring".parse::<Digest>().is_err());
        // hex too short
        assert!("sha256:abcdef".parse::<Digest>().is_err());
        // non-hex characters
        assert!(
            "sha256:zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"
                .parse::<Digest>()
                .is_err()
        );
        // algorithm must start with a letter
        assert!("9sha:0123456789abcdef0123456789abcdef".parse::<Digest>().is_err());
    }

    #[test]
    fn accepts_extended_algorithms() {
        assert!("sha512:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
            .parse::<Digest>()
            .is_ok());
        assert!("sha256+b64u:0123456789abcdef0123456789abcdef"
            .parse::<Digest>()
            .is_ok());
    }

    #[test]
    fn short_label() {
        let digest = Digest::from_bytes(b"abc");
        assert_eq!(digest.short().len(), 8);
        assert!(digest.hex().starts_with(digest.short()));
    }
}
