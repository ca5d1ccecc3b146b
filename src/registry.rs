use crate::error::BuildError;
use crate::manifest::ResolvedManifest;
use crate::request::OutputArtifact;
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

pub const CHUNK_SIZE: usize = 1024 * 1024; // 1MB chunks

/// Transform surviving manifest entries into the public artifact map.
/// A manifest-supplied checksum is trusted as-is; otherwise one is
/// computed here so every artifact in the final result carries one.
/// Keys are unique per type: the first manifest entry for a type wins.
pub fn build_artifact_map(
    resolved: &ResolvedManifest,
) -> Result<HashMap<String, OutputArtifact>, BuildError> {
    let mut artifacts: HashMap<String, OutputArtifact> = HashMap::new();

    for entry in &resolved.entries {
        if artifacts.contains_key(&entry.kind) {
            tracing::warn!(
                kind = %entry.kind,
                path = %entry.path.display(),
                "dropping duplicate manifest entry for type"
            );
            continue;
        }

        let checksum = match &entry.checksum {
            Some(checksum) => checksum.clone(),
            None => file_sha256(&entry.path)?,
        };

        artifacts.insert(
            entry.kind.clone(),
            OutputArtifact {
                kind: entry.kind.clone(),
                path: entry.path.clone(),
                checksum: Some(checksum),
                image_id: None,
            },
        );
    }

    Ok(artifacts)
}

/// Streaming SHA-256 over a file, rendered `sha256:<hex>`. Chunked reads
/// bound memory on multi-gigabyte disk images.
pub fn file_sha256(path: &Path) -> Result<String, BuildError> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("opening artifact {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading artifact {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ResolvedEntry;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_checksum_is_deterministic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.raw");
        fs::write(&path, b"same bytes every time").unwrap();

        let first = file_sha256(&path).unwrap();
        let second = file_sha256(&path).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("sha256:"));
        // 32-byte digest rendered as hex.
        assert_eq!(first.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_manifest_checksum_trusted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.qcow2");
        fs::write(&path, b"bytes").unwrap();

        let resolved = ResolvedManifest {
            manifest_path: dir.path().join("manifest.json"),
            entries: vec![ResolvedEntry {
                kind: "qcow2".to_string(),
                path: path.clone(),
                checksum: Some("sha256:preexisting".to_string()),
            }],
        };
        let map = build_artifact_map(&resolved).unwrap();
        assert_eq!(
            map["qcow2"].checksum.as_deref(),
            Some("sha256:preexisting")
        );
    }

    #[test]
    fn test_missing_checksum_computed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.qcow2");
        fs::write(&path, b"bytes").unwrap();

        let resolved = ResolvedManifest {
            manifest_path: dir.path().join("manifest.json"),
            entries: vec![ResolvedEntry {
                kind: "qcow2".to_string(),
                path: path.clone(),
                checksum: None,
            }],
        };
        let map = build_artifact_map(&resolved).unwrap();
        assert_eq!(
            map["qcow2"].checksum.as_deref(),
            Some(file_sha256(&path).unwrap().as_str())
        );
    }

    #[test]
    fn test_duplicate_type_first_entry_wins() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a.raw");
        let second = dir.path().join("b.raw");
        fs::write(&first, b"first").unwrap();
        fs::write(&second, b"second").unwrap();

        let resolved = ResolvedManifest {
            manifest_path: dir.path().join("manifest.json"),
            entries: vec![
                ResolvedEntry {
                    kind: "raw".to_string(),
                    path: first.clone(),
                    checksum: None,
                },
                ResolvedEntry {
                    kind: "raw".to_string(),
                    path: second,
                    checksum: None,
                },
            ],
        };
        let map = build_artifact_map(&resolved).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["raw"].path, first);
    }
}
