use std::fmt;

use thiserror::Error;

/// Why the bytecode reader stopped before a clean STOP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFaultKind {
    /// Byte at the offset is not a pickle opcode.
    UnknownOpcode(u8),
    /// The operand of the named opcode runs past the end of the buffer.
    Truncated(&'static str),
    /// A length prefix is negative or does not fit in memory.
    InvalidLength(&'static str),
    /// PROTO announced a protocol newer than the reader understands.
    UnsupportedProtocol(u8),
    /// The buffer ended without a STOP opcode.
    MissingStop,
}

impl fmt::Display for DecodeFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeFaultKind::UnknownOpcode(b) => write!(f, "unknown opcode 0x{b:02x}"),
            DecodeFaultKind::Truncated(op) => write!(f, "truncated operand for {op}"),
            DecodeFaultKind::InvalidLength(op) => write!(f, "invalid length prefix for {op}"),
            DecodeFaultKind::UnsupportedProtocol(p) => write!(f, "unsupported protocol {p}"),
            DecodeFaultKind::MissingStop => write!(f, "stream ended before STOP"),
        }
    }
}

/// Malformed or truncated pickle bytecode.
///
/// Never propagated past the scanner: it becomes a MEDIUM "scan error" finding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("decode fault at offset {offset}: {kind}")]
pub struct DecodeFault {
    pub offset: u64,
    pub kind: DecodeFaultKind,
}

/// Input that is not a format the scanner knows, or a container that could
/// not be opened.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unrecognized artifact format")]
    Unrecognized,

    #[error("unreadable archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to read archive member {name}: {source}")]
    Member {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of the fetch collaborator for one artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("unsupported artifact identifier: {0}")]
    Unsupported(String),

    #[error("fetch cancelled")]
    Cancelled,
}

/// Rule table could not be loaded. Fatal: scanning without rules is refused.
#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("failed to read rule set {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule set: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid rule set: {0}")]
    Invalid(String),
}
