//! SHA-256 content hashing and the `.act.hash` manifest format: lines of `relPath=hex`,
//! UTF-8, sorted ascending by path. Built on the crate's JSON `StorageObject` pattern
//! for on-disk persistence, adapted to a flat line-oriented text format.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{ActError, Result};

/// `relPath -> lowercase hex sha256`, kept in a `BTreeMap` so iteration is always path-sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn hash_reader<R: Read>(mut reader: R) -> Result<String> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(|e| ActError::Io(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn hash_file(path: &Path) -> Result<String> {
        let f = std::fs::File::open(path).map_err(|e| ActError::Io(e.to_string()))?;
        Self::hash_reader(f)
    }

    /// Recursively hash every non-directory entry under `root`, keyed by its slash-normalized
    /// relative path.
    pub fn from_tree(root: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            let hash = Self::hash_file(entry.path())?;
            entries.insert(rel_str, hash);
        }
        Ok(Manifest { entries })
    }

    /// Serialize as `relPath=hex\n` lines, already sorted ascending by `BTreeMap` iteration.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (path, hash) in &self.entries {
            out.push_str(path);
            out.push('=');
            out.push_str(hash);
            out.push('\n');
        }
        out
    }

    /// Parse a manifest. A missing file is not an error — callers should treat
    /// `Manifest::default()` as "no remote manifest" (timestamp fallback applies).
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((path, hash)) = line.split_once('=') {
                entries.insert(path.to_string(), hash.to_lowercase());
            }
        }
        Manifest { entries }
    }

    pub fn get(&self, rel_path: &str) -> Option<&str> {
        self.entries.get(rel_path).map(|s| s.as_str())
    }

    /// Case-insensitive hash comparison, per the equality rule used by the delta planner.
    pub fn hash_matches(&self, rel_path: &str, hash: &str) -> bool {
        self.get(rel_path).map(|h| h.eq_ignore_ascii_case(hash)).unwrap_or(false)
    }
}

/// Thin hex encoder so we don't pull in an extra dependency just for this.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

/// Add or replace a `.act.hash` entry inside an already-open zip archive with the manifest
/// computed by streaming-hashing every non-directory entry already in the archive, without
/// extracting to disk. This always replaces an existing entry — full uploads of a mutated
/// archive must never keep a stale manifest.
pub fn embed_manifest_in_archive(archive_path: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path).map_err(|e| ActError::Io(e.to_string()))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;

    let mut entries = BTreeMap::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.eq_ignore_ascii_case(".act.hash") {
            continue;
        }
        let hash = Manifest::hash_reader(&mut entry)?;
        entries.insert(name.replace('\\', "/"), hash);
    }
    let manifest = Manifest { entries };
    let serialized = manifest.serialize();

    let tmp_path = archive_path.with_extension("tmp-manifest");
    {
        let src = std::fs::File::open(archive_path).map_err(|e| ActError::Io(e.to_string()))?;
        let mut src_zip = zip::ZipArchive::new(src).map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
        let dst = std::fs::File::create(&tmp_path).map_err(|e| ActError::Io(e.to_string()))?;
        let mut writer = zip::ZipWriter::new(dst);
        let now = chrono::Utc::now();
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(
                zip::DateTime::from_date_and_time(
                    now.format("%Y").to_string().parse().unwrap_or(1980),
                    now.format("%m").to_string().parse().unwrap_or(1),
                    now.format("%d").to_string().parse().unwrap_or(1),
                    now.format("%H").to_string().parse().unwrap_or(0),
                    now.format("%M").to_string().parse().unwrap_or(0),
                    now.format("%S").to_string().parse().unwrap_or(0),
                )
                .unwrap_or_else(|_| zip::DateTime::default()),
            );
        let names: Vec<String> = (0..src_zip.len())
            .filter_map(|i| src_zip.by_index(i).ok().map(|e| e.name().to_string()))
            .filter(|n| !n.eq_ignore_ascii_case(".act.hash"))
            .collect();
        for name in names {
            let entry = src_zip.by_name(&name).map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
            writer.raw_copy_file(entry).map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
        }
        writer.start_file(".act.hash", options).map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
        use std::io::Write as _;
        writer.write_all(serialized.as_bytes()).map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
        writer.finish().map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
    }
    std::fs::rename(&tmp_path, archive_path).map_err(|e| ActError::Io(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips_sorted() {
        let mut entries = BTreeMap::new();
        entries.insert("b.txt".to_string(), "ab".to_string());
        entries.insert("a.txt".to_string(), "cd".to_string());
        let m = Manifest { entries };
        let text = m.serialize();
        assert_eq!(text, "a.txt=cd\nb.txt=ab\n");
        let parsed = Manifest::parse(&text);
        assert_eq!(parsed, m);
    }

    #[test]
    fn hash_match_is_case_insensitive() {
        let mut entries = BTreeMap::new();
        entries.insert("a.txt".to_string(), "deadbeef".to_string());
        let m = Manifest { entries };
        assert!(m.hash_matches("a.txt", "DEADBEEF"));
        assert!(!m.hash_matches("a.txt", "feedface"));
    }

    #[test]
    fn missing_manifest_is_empty_not_error() {
        let m = Manifest::default();
        assert!(m.get("anything").is_none());
    }
}
