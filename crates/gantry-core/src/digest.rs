//! Content digests in `<algorithm>:<hex>` form

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::trace;

use crate::error::{DigestError, InputError, IoStage};

/// Hash algorithm a digest was produced with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// SHA-256, 64 hex characters
    Sha256,
}

impl Algorithm {
    /// Token used in the canonical string form
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the hex-encoded checksum
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Self::Sha256),
            other => Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// An immutable content digest.
///
/// The canonical text form is `"<algorithm>:<sum>"` with a lowercase hex sum,
/// e.g. `sha256:e3b0c442...`. [`Digest::parse`] and [`fmt::Display`] are exact
/// inverses of each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    sum: String,
}

impl Digest {
    /// Create a digest, validating the checksum against the algorithm
    pub fn new(algorithm: Algorithm, sum: impl Into<String>) -> Result<Self, DigestError> {
        let sum = sum.into();
        if sum.len() != algorithm.hex_len() {
            return Err(DigestError::InvalidLength {
                algorithm: algorithm.name().to_string(),
                expected: algorithm.hex_len(),
                actual: sum.len(),
            });
        }
        if !sum.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(DigestError::InvalidHex(sum));
        }
        Ok(Self { algorithm, sum })
    }

    /// Parse the canonical `<algorithm>:<sum>` form
    pub fn parse(text: &str) -> Result<Self, DigestError> {
        let mut parts = text.split(':');
        let (algorithm, sum) = match (parts.next(), parts.next(), parts.next()) {
            (Some(algorithm), Some(sum), None) => (algorithm, sum),
            _ => return Err(DigestError::InvalidFormat(text.to_string())),
        };
        Self::new(algorithm.parse()?, sum)
    }

    /// Build a SHA-256 digest from a finished hasher
    pub fn from_sha256(hasher: Sha256) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            sum: format!("{:x}", hasher.finalize()),
        }
    }

    /// SHA-256 digest of an in-memory buffer
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self::from_sha256(hasher)
    }

    /// The algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The lowercase hex checksum
    pub fn sum(&self) -> &str {
        &self.sum
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.sum)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

/// Compute the SHA-256 digest of a file by streaming its content.
///
/// The file is never buffered whole; the handle is dropped on every path.
pub fn digest_file(path: &Path) -> Result<Digest, InputError> {
    let file = File::open(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        stage: IoStage::Open,
        source,
    })?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let bytes = io::copy(&mut reader, &mut hasher).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        stage: IoStage::Read,
        source,
    })?;

    trace!(path = %path.display(), bytes, "digested file");
    Ok(Digest::from_sha256(hasher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_roundtrip() {
        let text = format!("sha256:{}", EMPTY_SHA256);
        let digest = Digest::parse(&text).unwrap();
        assert_eq!(digest.algorithm(), Algorithm::Sha256);
        assert_eq!(digest.sum(), EMPTY_SHA256);
        assert_eq!(digest.to_string(), text);
        assert_eq!(Digest::parse(&digest.to_string()).unwrap(), digest);
    }

    #[test]
    fn test_parse_rejects_separator_count() {
        assert!(matches!(
            Digest::parse(EMPTY_SHA256),
            Err(DigestError::InvalidFormat(_))
        ));
        let doubled = format!("sha256:{}:extra", EMPTY_SHA256);
        assert!(matches!(
            Digest::parse(&doubled),
            Err(DigestError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_algorithm() {
        let text = format!("md5:{}", EMPTY_SHA256);
        assert_eq!(
            Digest::parse(&text),
            Err(DigestError::UnsupportedAlgorithm("md5".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let short = format!("sha256:{}", &EMPTY_SHA256[..63]);
        let long = format!("sha256:{}0", EMPTY_SHA256);
        assert!(matches!(
            Digest::parse(&short),
            Err(DigestError::InvalidLength { actual: 63, .. })
        ));
        assert!(matches!(
            Digest::parse(&long),
            Err(DigestError::InvalidLength { actual: 65, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let upper = format!("sha256:{}", EMPTY_SHA256.to_uppercase());
        assert!(matches!(
            Digest::parse(&upper),
            Err(DigestError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let digest = Digest::of_bytes(b"");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"sha256:{}\"", EMPTY_SHA256));

        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<Digest>("\"sha256:abc\"").is_err());
    }

    #[test]
    fn test_digest_file_matches_known_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        std::fs::write(&path, "hello world").unwrap();

        let digest = digest_file(&path).unwrap();
        assert_eq!(
            digest.sum(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(digest, Digest::of_bytes(b"hello world"));
    }

    #[test]
    fn test_digest_file_missing_reports_open_stage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.txt");

        let err = digest_file(&path).unwrap_err();
        assert_eq!(err.stage(), IoStage::Open);
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn test_digest_directory_reports_read_stage() {
        // Opening a directory succeeds on unix, reading it does not
        #[cfg(unix)]
        {
            let temp = TempDir::new().unwrap();
            let err = digest_file(temp.path()).unwrap_err();
            assert_eq!(err.stage(), IoStage::Read);
        }
    }
}
