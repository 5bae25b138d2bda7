//! Gantry Core - Core types for the gantry build orchestrator
//!
//! This crate provides content digests, the streaming file digester,
//! configuration loading and the shared error taxonomy.

pub mod config;
pub mod digest;
pub mod error;

pub use digest::{digest_file, Algorithm, Digest};
pub use error::{ConfigError, DigestError, GantryError, InputError, IoStage, Result};
