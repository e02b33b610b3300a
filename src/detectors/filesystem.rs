//! Filesystem artifacts.
//!
//! Two probes: one stats the catalog's known jailbreak and instrumentation
//! paths, the other lists a scratch directory for instrumentation
//! named-pipe leftovers (`frida-*`).

use std::fs;
use std::io;
use std::path::Path;

use tracing::{trace, warn};

use super::{settle, Probe};
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::policy::{ProbeId, ProbeResult};
use crate::error::ProbeError;

/// Not-found and permission-denied both just mean "not there" to a probe.
/// A path that runs through a regular file (ENOTDIR) is absent too.
pub(crate) fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) || err.raw_os_error() == Some(libc::ENOTDIR)
}

/// Whether anything exists at `path`, following symlinks.
fn artifact_present(path: &Path) -> Result<bool, ProbeError> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if is_absent(&err) => Ok(false),
        Err(err) => Err(ProbeError::io(format!("stat {}", path.display()), err)),
    }
}

/// Positive on the first catalog path that exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemArtifactProbe;

impl FilesystemArtifactProbe {
    fn scan(catalog: &ArtifactCatalog) -> Option<String> {
        for path in catalog.paths() {
            trace!(path = %path, "checking artifact path");
            match artifact_present(Path::new(path)) {
                Ok(true) => return Some(path.clone()),
                Ok(false) => {}
                // One unreadable path should not hide the others.
                Err(err) => warn!(probe = %ProbeId::FilesystemArtifact, error = %err, "stat failed"),
            }
        }
        None
    }
}

impl Probe for FilesystemArtifactProbe {
    fn id(&self) -> ProbeId {
        ProbeId::FilesystemArtifact
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        settle(self.id(), Ok(Self::scan(catalog)))
    }
}

/// Positive when the temp-artifact directory holds an entry whose name
/// starts with a catalog prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct TempArtifactProbe;

impl TempArtifactProbe {
    fn scan(catalog: &ArtifactCatalog) -> Result<Option<String>, ProbeError> {
        let prefixes = catalog.temp_artifact_prefixes();
        if prefixes.is_empty() {
            return Ok(None);
        }
        let dir = catalog.temp_artifact_dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if is_absent(&err) => return Ok(None),
            Err(err) => return Err(ProbeError::io(format!("list {}", dir.display()), err)),
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(probe = %ProbeId::TempArtifact, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(prefix) = prefixes.iter().find(|p| name.starts_with(p.as_str())) {
                trace!(entry = %name, prefix = %prefix, "temp artifact matched");
                return Ok(Some(entry.path().display().to_string()));
            }
        }
        Ok(None)
    }
}

impl Probe for TempArtifactProbe {
    fn id(&self) -> ProbeId {
        ProbeId::TempArtifact
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        settle(self.id(), Self::scan(catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_paths_are_negative() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ArtifactCatalog::builder()
            .path(dir.path().join("Cydia.app").display().to_string())
            .path("/definitely/not/here/sshd")
            .build()
            .unwrap();
        let result = FilesystemArtifactProbe.run(&catalog);
        assert!(!result.positive);
        assert_eq!(result.probe, ProbeId::FilesystemArtifact);
    }

    #[test]
    fn test_one_existing_path_is_positive() {
        let dir = tempfile::tempdir().unwrap();
        let planted = dir.path().join("frida-server");
        fs::write(&planted, b"").unwrap();
        let planted = planted.display().to_string();

        let catalog = ArtifactCatalog::builder()
            .path("/definitely/not/here/sshd")
            .path(planted.clone())
            .build()
            .unwrap();
        let result = FilesystemArtifactProbe.run(&catalog);
        assert!(result.positive);
        assert_eq!(result.detail.as_deref(), Some(planted.as_str()));
    }

    #[test]
    fn test_path_through_regular_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(!artifact_present(&file.join("child")).unwrap());
    }

    #[test]
    fn test_temp_artifact_prefix_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("unrelated.sock"), b"").unwrap();

        let catalog = ArtifactCatalog::builder()
            .temp_artifact_dir(dir.path())
            .temp_artifact_prefix("frida-")
            .build()
            .unwrap();
        assert!(!TempArtifactProbe.run(&catalog).positive);

        fs::write(dir.path().join("frida-2f1c-pipe"), b"").unwrap();
        let result = TempArtifactProbe.run(&catalog);
        assert!(result.positive);
        assert!(result.detail.unwrap().ends_with("frida-2f1c-pipe"));
    }

    #[test]
    fn test_missing_temp_dir_is_negative() {
        let catalog = ArtifactCatalog::builder()
            .temp_artifact_dir("/definitely/not/a/dir")
            .temp_artifact_prefix("frida-")
            .build()
            .unwrap();
        assert!(!TempArtifactProbe.run(&catalog).positive);
    }
}
