use crate::error::BuildError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Well-known manifest location relative to the output directory
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// The tool's manifest as written. Unknown fields and unknown top-level
/// keys are tolerated; the tool owns this format, not us.
#[derive(Debug, Deserialize)]
pub struct BuildManifest {
    #[serde(default)]
    pub artifacts: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Manifest entries that survived reconciliation against the disk
#[derive(Debug)]
pub struct ResolvedManifest {
    pub manifest_path: PathBuf,
    pub entries: Vec<ResolvedEntry>,
}

#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub kind: String,
    /// Canonical absolute path, guaranteed inside the output directory
    pub path: PathBuf,
    pub checksum: Option<String>,
}

/// Locate and reconcile the build manifest. An absent or unreadable
/// manifest is a tool-contract breach even on exit 0, and is reported as
/// a build failure rather than success. Entry screening:
/// 1. entries whose file is missing, empty, or outside the output
///    directory are dropped with a warning (the manifest may be stale or
///    hostile, never trusted);
/// 2. a requested type with no surviving entry fails the build;
/// 3. unrequested entries are kept as tool-emitted extras.
pub fn resolve(
    output_dir: &Path,
    requested_types: &[String],
) -> Result<ResolvedManifest, BuildError> {
    let manifest_path = output_dir.join(MANIFEST_FILE_NAME);
    let raw = match std::fs::read(&manifest_path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(path = %manifest_path.display(), "manifest unreadable: {}", e);
            return Err(BuildError::ManifestMissing {
                output_directory: output_dir.to_path_buf(),
            });
        }
    };
    let manifest: BuildManifest = match serde_json::from_slice(&raw) {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::error!(path = %manifest_path.display(), "manifest unparseable: {}", e);
            return Err(BuildError::ManifestMissing {
                output_directory: output_dir.to_path_buf(),
            });
        }
    };

    let canonical_root = output_dir.canonicalize().map_err(|e| {
        BuildError::Other(anyhow::anyhow!(
            "output directory {} vanished: {}",
            output_dir.display(),
            e
        ))
    })?;

    let mut entries = Vec::new();
    for entry in manifest.artifacts {
        match screen_entry(&canonical_root, &entry) {
            Some(path) => entries.push(ResolvedEntry {
                kind: entry.kind,
                path,
                checksum: entry.checksum,
            }),
            None => continue,
        }
    }

    // Requested types must all have survived; first gap wins the error.
    for requested in requested_types {
        if !entries.iter().any(|e| &e.kind == requested) {
            return Err(BuildError::IncompleteBuild {
                missing_type: requested.clone(),
            });
        }
    }

    Ok(ResolvedManifest {
        manifest_path,
        entries,
    })
}

/// Returns the canonical path for a usable entry, `None` to drop it.
fn screen_entry(canonical_root: &Path, entry: &ManifestEntry) -> Option<PathBuf> {
    let declared = if entry.path.is_absolute() {
        entry.path.clone()
    } else {
        canonical_root.join(&entry.path)
    };

    // Canonicalization fails for dangling paths, which also covers the
    // stale-manifest case.
    let canonical = match declared.canonicalize() {
        Ok(canonical) => canonical,
        Err(_) => {
            tracing::warn!(
                kind = %entry.kind,
                path = %entry.path.display(),
                "dropping manifest entry: file does not exist"
            );
            return None;
        }
    };

    if !canonical.starts_with(canonical_root) {
        tracing::warn!(
            kind = %entry.kind,
            path = %entry.path.display(),
            "dropping manifest entry: path escapes the output directory"
        );
        return None;
    }

    match std::fs::metadata(&canonical) {
        Ok(meta) if meta.len() > 0 => Some(canonical),
        _ => {
            tracing::warn!(
                kind = %entry.kind,
                path = %entry.path.display(),
                "dropping manifest entry: file is empty"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_manifest(dir: &Path, body: &str) {
        fs::write(dir.join(MANIFEST_FILE_NAME), body).unwrap();
    }

    fn requested(types: &[&str]) -> Vec<String> {
        types.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_missing_manifest_is_build_failure() {
        let out = tempdir().unwrap();
        let err = resolve(out.path(), &requested(&["qcow2"])).unwrap_err();
        assert!(matches!(err, BuildError::ManifestMissing { .. }));
    }

    #[test]
    fn test_unparseable_manifest_is_build_failure() {
        let out = tempdir().unwrap();
        write_manifest(out.path(), "not json at all");
        let err = resolve(out.path(), &requested(&["qcow2"])).unwrap_err();
        assert!(matches!(err, BuildError::ManifestMissing { .. }));
    }

    #[test]
    fn test_resolves_relative_paths_against_output_dir() {
        let out = tempdir().unwrap();
        fs::create_dir(out.path().join("qcow2")).unwrap();
        fs::write(out.path().join("qcow2/disk.qcow2"), b"disk bytes").unwrap();
        write_manifest(
            out.path(),
            r#"{"artifacts": [{"type": "qcow2", "path": "qcow2/disk.qcow2"}]}"#,
        );

        let resolved = resolve(out.path(), &requested(&["qcow2"])).unwrap();
        assert_eq!(resolved.entries.len(), 1);
        let entry = &resolved.entries[0];
        assert!(entry.path.is_absolute());
        assert!(entry.path.ends_with("qcow2/disk.qcow2"));
        assert_eq!(resolved.manifest_path, out.path().join(MANIFEST_FILE_NAME));
    }

    #[test]
    fn test_stale_entry_dropped_and_requested_type_fails() {
        let out = tempdir().unwrap();
        write_manifest(
            out.path(),
            r#"{"artifacts": [{"type": "qcow2", "path": "qcow2/disk.qcow2"},
                             {"type": "iso", "path": "gone.iso"}]}"#,
        );
        fs::create_dir(out.path().join("qcow2")).unwrap();
        fs::write(out.path().join("qcow2/disk.qcow2"), b"disk bytes").unwrap();

        let err = resolve(out.path(), &requested(&["qcow2", "iso"])).unwrap_err();
        match err {
            BuildError::IncompleteBuild { missing_type } => assert_eq!(missing_type, "iso"),
            other => panic!("expected IncompleteBuild, got {:?}", other),
        }
    }

    #[test]
    fn test_unrequested_extras_are_retained() {
        let out = tempdir().unwrap();
        fs::write(out.path().join("disk.qcow2"), b"disk").unwrap();
        fs::write(out.path().join("build.log"), b"log").unwrap();
        write_manifest(
            out.path(),
            r#"{"artifacts": [{"type": "qcow2", "path": "disk.qcow2"},
                             {"type": "logs", "path": "build.log"}]}"#,
        );

        let resolved = resolve(out.path(), &requested(&["qcow2"])).unwrap();
        assert_eq!(resolved.entries.len(), 2);
        assert!(resolved.entries.iter().any(|e| e.kind == "logs"));
    }

    #[test]
    fn test_escaping_path_is_rejected_even_if_file_exists() {
        let parent = tempdir().unwrap();
        let out = parent.path().join("out");
        fs::create_dir(&out).unwrap();
        // Real file outside the output directory.
        fs::write(parent.path().join("outside.img"), b"not yours").unwrap();
        write_manifest(
            &out,
            r#"{"artifacts": [{"type": "raw", "path": "../outside.img"}]}"#,
        );

        let err = resolve(&out, &requested(&["raw"])).unwrap_err();
        assert!(matches!(err, BuildError::IncompleteBuild { .. }));
    }

    #[test]
    fn test_empty_file_counts_as_missing() {
        let out = tempdir().unwrap();
        fs::write(out.path().join("disk.raw"), b"").unwrap();
        write_manifest(
            out.path(),
            r#"{"artifacts": [{"type": "raw", "path": "disk.raw"}]}"#,
        );
        let err = resolve(out.path(), &requested(&["raw"])).unwrap_err();
        assert!(matches!(err, BuildError::IncompleteBuild { .. }));
    }

    #[test]
    fn test_unknown_fields_and_keys_tolerated() {
        let out = tempdir().unwrap();
        fs::write(out.path().join("disk.qcow2"), b"disk").unwrap();
        write_manifest(
            out.path(),
            r#"{"version": 2,
                "builder": {"name": "osbuild", "stages": 14},
                "artifacts": [{"type": "qcow2", "path": "disk.qcow2",
                               "compression": "none", "size": 4}]}"#,
        );
        let resolved = resolve(out.path(), &requested(&["qcow2"])).unwrap();
        assert_eq!(resolved.entries.len(), 1);
    }

    #[test]
    fn test_manifest_checksum_carried_through() {
        let out = tempdir().unwrap();
        fs::write(out.path().join("disk.qcow2"), b"disk").unwrap();
        write_manifest(
            out.path(),
            r#"{"artifacts": [{"type": "qcow2", "path": "disk.qcow2",
                               "checksum": "sha256:abcd"}]}"#,
        );
        let resolved = resolve(out.path(), &requested(&["qcow2"])).unwrap();
        assert_eq!(resolved.entries[0].checksum.as_deref(), Some("sha256:abcd"));
    }
}
