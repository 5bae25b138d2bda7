//! Error types for gantry

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for gantry core operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed digest strings
    #[error(transparent)]
    Digest(#[from] DigestError),

    /// Input files that could not be read
    #[error(transparent)]
    Input(#[from] InputError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// A digest string that does not follow `<algorithm>:<hex>`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    /// Zero or more than one `:` separator
    #[error("Invalid digest format '{0}': expected '<algorithm>:<checksum>'")]
    InvalidFormat(String),

    /// Algorithm token is not known
    #[error("Unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// Checksum length disagrees with the algorithm
    #[error("Invalid {algorithm} checksum length: expected {expected} hex characters, got {actual}")]
    InvalidLength {
        algorithm: String,
        expected: usize,
        actual: usize,
    },

    /// Checksum is not lowercase hex
    #[error("Invalid checksum '{0}': expected lowercase hex characters")]
    InvalidHex(String),
}

/// Where reading an input file failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStage {
    /// The file could not be opened
    Open,
    /// The file was opened but reading it failed
    Read,
}

impl fmt::Display for IoStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// An input file could not be digested
#[derive(Debug, Error)]
pub enum InputError {
    /// Underlying filesystem failure
    #[error("Failed to {stage} {}: {source}", path.display())]
    Io {
        path: PathBuf,
        stage: IoStage,
        #[source]
        source: std::io::Error,
    },
}

impl InputError {
    /// Path of the file that failed
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. } => path,
        }
    }

    /// Whether opening or reading failed
    pub fn stage(&self) -> IoStage {
        match self {
            Self::Io { stage, .. } => *stage,
        }
    }
}
