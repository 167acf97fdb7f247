use std::io::{Cursor, Read};

use tracing::{debug, trace};

use crate::error::FormatError;

/// How an archive member is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Pickle bytecode (`data.pkl`, `*.pkl`, `*.pickle`).
    Pickle,
    /// JSON config (`config.json`, `*.json`).
    Config,
    /// Tensor storage and everything else; not read.
    Other,
}

pub fn member_kind(name: &str) -> MemberKind {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".pkl") || lower.ends_with(".pickle") {
        MemberKind::Pickle
    } else if lower.ends_with(".json") {
        MemberKind::Config
    } else {
        MemberKind::Other
    }
}

/// A scannable archive member, fully read into memory.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub kind: MemberKind,
    pub bytes: Vec<u8>,
}

/// Read the pickle and config members of a ZIP archive in central
/// directory order. Members of other kinds are skipped without reading.
pub fn read_members(bytes: &[u8]) -> Result<Vec<Member>, FormatError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    debug!("archive has {} entries", archive.len());

    let mut members = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let kind = member_kind(&name);
        trace!("entry {}: {} ({:?})", i, name, kind);
        if kind == MemberKind::Other {
            continue;
        }

        let mut data = Vec::with_capacity(entry.size().min(1 << 20) as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|source| FormatError::Member {
                name: name.clone(),
                source,
            })?;
        members.push(Member {
            name,
            kind,
            bytes: data,
        });
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn classifies_member_names() {
        assert_eq!(member_kind("archive/data.pkl"), MemberKind::Pickle);
        assert_eq!(member_kind("model/constants.PKL"), MemberKind::Pickle);
        assert_eq!(member_kind("extra.pickle"), MemberKind::Pickle);
        assert_eq!(member_kind("config.json"), MemberKind::Config);
        assert_eq!(member_kind("archive/data/0"), MemberKind::Other);
        assert_eq!(member_kind("model.weights.h5"), MemberKind::Other);
    }

    #[test]
    fn reads_only_scannable_members_in_order() {
        let zip = build_zip(&[
            ("archive/data.pkl", b"\x80\x02N."),
            ("archive/data/0", &[0u8; 64]),
            ("archive/version", b"3\n"),
            ("config.json", b"{}"),
        ]);

        let members = read_members(&zip).unwrap();
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["archive/data.pkl", "config.json"]);
        assert_eq!(members[0].bytes, b"\x80\x02N.");
        assert_eq!(members[1].kind, MemberKind::Config);
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let err = read_members(b"PK\x03\x04 definitely not a zip").unwrap_err();
        assert!(matches!(err, FormatError::Archive(_)));
    }
}
