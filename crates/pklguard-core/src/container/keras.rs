//! Model configs embedded in structured containers.
//!
//! Keras `.h5` files keep the model architecture as a JSON string attribute
//! inside the HDF5 heap. Rather than parsing HDF5, the scanner locates JSON
//! objects that start with a `class_name` key and decodes each one.

use serde_json::Value;

const CONFIG_MARKER: &[u8] = b"{\"class_name\"";

/// Longest config the scanner will try to close. Each marker costs at most
/// this many bytes of scanning, so unterminated markers cannot make
/// extraction quadratic in the file size.
pub const MAX_CONFIG_LEN: usize = 4 << 20;

/// A JSON document found inside a container, with its byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigBlob {
    pub offset: u64,
    pub document: Value,
}

/// Find every decodable model config in `bytes`, in file order.
///
/// Blobs nested inside an already extracted blob are not reported twice.
pub fn extract_config_blobs(bytes: &[u8]) -> Vec<ConfigBlob> {
    let mut blobs = Vec::new();
    let mut pos = 0;

    while let Some(found) = find(&bytes[pos..], CONFIG_MARKER) {
        let start = pos + found;
        match balanced_object_end(&bytes[start..]) {
            Some(len) => {
                let end = start + len;
                match serde_json::from_slice::<Value>(&bytes[start..end]) {
                    Ok(document) => {
                        blobs.push(ConfigBlob {
                            offset: start as u64,
                            document,
                        });
                        pos = end;
                    }
                    Err(_) => pos = start + 1,
                }
            }
            None => pos = start + 1,
        }
    }

    blobs
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the JSON object starting at `bytes[0]`, honouring strings and
/// escapes. `None` if the object does not close within `MAX_CONFIG_LEN`.
fn balanced_object_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().take(MAX_CONFIG_LEN).enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
