use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::{fs, path::Path};

use crate::report::model::{ArtifactHash, ArtifactInfo};

/// Raw artifact context used during scanning.
///
/// Holds the exact bytes scanned and a cryptographic fingerprint
/// that uniquely identifies the artifact.
#[derive(Debug, Clone)]
pub struct ArtifactContext {
    /// Source identifier (path or URL, informational only).
    pub source: String,

    /// Exact bytes read.
    pub bytes: Vec<u8>,

    /// Report-facing size and hash.
    pub info: ArtifactInfo,
}

impl ArtifactContext {
    pub fn new(source: impl Into<String>, bytes: Vec<u8>) -> Self {
        let info = fingerprint(&bytes);
        Self {
            source: source.into(),
            bytes,
            info,
        }
    }
}

/// Size and SHA-256 of `bytes`.
///
/// The identity depends **only** on the bytes, so the same artifact fetched
/// from disk or over HTTP reports the same hash.
pub fn fingerprint(bytes: &[u8]) -> ArtifactInfo {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();

    ArtifactInfo {
        size_bytes: bytes.len() as u64,
        hash: ArtifactHash {
            algorithm: "sha256".to_string(),
            value: hex::encode(digest),
        },
    }
}

/// Read an artifact from disk.
pub fn read_artifact(path: &Path) -> Result<ArtifactContext> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read artifact: {}", path.display()))?;
    Ok(ArtifactContext::new(path.display().to_string(), bytes))
}
