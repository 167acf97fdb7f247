//! Artifact format detection from leading bytes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pickle::opcodes::{HIGHEST_PROTOCOL, Opcode};
use crate::pickle::read::OpcodeReader;
use crate::pickle::stream::starts_stream;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Raw pickle bytecode (one or more concatenated streams).
    Pickle,
    /// ZIP container: PyTorch checkpoints, `.keras` archives.
    Zip,
    /// HDF5 container with an embedded JSON model config (Keras `.h5`).
    Hdf5,
    /// Bare JSON model config.
    JsonConfig,
    /// Flat tensor storage. Trusted; carries no code.
    Safetensors,
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactFormat::Pickle => "pickle",
            ArtifactFormat::Zip => "zip",
            ArtifactFormat::Hdf5 => "hdf5",
            ArtifactFormat::JsonConfig => "json_config",
            ArtifactFormat::Safetensors => "safetensors",
        })
    }
}

/// Identify the artifact format, or `None` when nothing matches.
pub fn detect(bytes: &[u8]) -> Option<ArtifactFormat> {
    if bytes.starts_with(ZIP_MAGIC) {
        return Some(ArtifactFormat::Zip);
    }
    if bytes.starts_with(HDF5_MAGIC) {
        return Some(ArtifactFormat::Hdf5);
    }
    // PROTO must be checked before safetensors: both can start with 0x80.
    if let [0x80, proto, ..] = bytes {
        if *proto <= HIGHEST_PROTOCOL {
            return Some(ArtifactFormat::Pickle);
        }
    }
    if is_safetensors(bytes) {
        return Some(ArtifactFormat::Safetensors);
    }
    if bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
    {
        return Some(ArtifactFormat::JsonConfig);
    }
    match bytes.first().copied().and_then(Opcode::from_byte) {
        Some(op) if op.can_start_stream() => Some(ArtifactFormat::Pickle),
        _ => None,
    }
}

/// Size of the little-endian header length that opens a safetensors file.
const SAFETENSORS_PREFIX: usize = 8;

/// 8-byte little-endian header length followed by a JSON header whose
/// entries all describe tensors.
///
/// The prefix alone is easy to forge with pickle bytecode, so the header is
/// decoded in full, and the file is refused if pickle decoding of the same
/// bytes would run past the prefix.
fn is_safetensors(bytes: &[u8]) -> bool {
    let Some(prefix) = bytes.get(..SAFETENSORS_PREFIX) else {
        return false;
    };
    let mut len = [0u8; SAFETENSORS_PREFIX];
    len.copy_from_slice(prefix);
    let Ok(header_len) = usize::try_from(u64::from_le_bytes(len)) else {
        return false;
    };
    let Some(header) = SAFETENSORS_PREFIX
        .checked_add(header_len)
        .and_then(|end| bytes.get(SAFETENSORS_PREFIX..end))
    else {
        return false;
    };

    valid_tensor_header(header) && !pickle_reaches_past(bytes, SAFETENSORS_PREFIX)
}

fn valid_tensor_header(header: &[u8]) -> bool {
    let Ok(Value::Object(entries)) = serde_json::from_slice::<Value>(header) else {
        return false;
    };
    entries.iter().all(|(name, entry)| {
        if name == "__metadata__" {
            return entry.is_object();
        }
        entry.get("dtype").is_some_and(Value::is_string)
            && entry.get("shape").is_some_and(Value::is_array)
            && entry
                .get("data_offsets")
                .and_then(Value::as_array)
                .is_some_and(|offsets| offsets.len() == 2)
    })
}

/// Whether an unpickler fed `bytes` would execute any instruction at or
/// beyond `limit`, following the same stream continuation rule as the
/// scanner.
fn pickle_reaches_past(bytes: &[u8], limit: usize) -> bool {
    let mut pos = 0;
    loop {
        let mut reader = OpcodeReader::starting_at(bytes, pos);
        for item in reader.by_ref() {
            match item {
                Ok(instr) if instr.offset as usize >= limit => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        pos = reader.position();
        if !bytes.get(pos).copied().is_some_and(starts_stream) {
            return false;
        }
        if pos >= limit {
            return true;
        }
    }
}
