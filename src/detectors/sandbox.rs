//! Write-access and sandbox-integrity probes.
//!
//! A sandboxed app cannot create files in system-protected directories.
//! Both probes try to, with a fresh random file name per attempt, and
//! delete whatever they created. A successful create-and-delete is a
//! positive: sandbox restrictions have been lifted.
//!
//! The probes differ in how they write:
//! - `WriteAccessProbe` writes a whole file in one call.
//! - `SandboxIntegrityProbe` insists on exclusive creation, then writes.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use super::{settle, Probe};
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::policy::{ProbeId, ProbeResult};

/// A probe file that is removed on every exit path.
struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    fn reserve(dir: &Path) -> Self {
        Self {
            path: dir.join(Uuid::new_v4().to_string().to_uppercase()),
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the file alone on drop.
    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Delete now and report the outcome.
    fn remove(mut self) -> io::Result<()> {
        self.armed = false;
        fs::remove_file(&self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "left a dangling probe file"),
        }
    }
}

/// Create through `create`, then delete. Only a clean round trip counts.
fn probe_write(
    probe: ProbeId,
    dir: &Path,
    create: impl FnOnce(&Path) -> io::Result<()>,
) -> ProbeResult {
    let mut scratch = ScratchFile::reserve(dir);
    if let Err(err) = create(scratch.path()) {
        if err.kind() == io::ErrorKind::AlreadyExists {
            // someone else's file
            scratch.disarm();
        }
        debug!(probe = %probe, path = %scratch.path().display(), error = %err, "write refused");
        return settle(probe, Ok(None));
    }

    let written = scratch.path().display().to_string();
    match scratch.remove() {
        Ok(()) => settle(probe, Ok(Some(written))),
        Err(err) => {
            warn!(probe = %probe, path = %written, error = %err, "left a dangling probe file");
            settle(probe, Ok(None))
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WriteAccessProbe;

impl Probe for WriteAccessProbe {
    fn id(&self) -> ProbeId {
        ProbeId::WriteAccess
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        probe_write(self.id(), catalog.write_probe_dir(), |path| {
            fs::write(path, "test_write")
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SandboxIntegrityProbe;

impl Probe for SandboxIntegrityProbe {
    fn id(&self) -> ProbeId {
        ProbeId::SandboxIntegrity
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        probe_write(self.id(), catalog.write_probe_dir(), |path| {
            let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
            file.write_all(b"sandbox_test")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_for(dir: &Path) -> ArtifactCatalog {
        ArtifactCatalog::builder()
            .path("/unused")
            .write_probe_dir(dir)
            .build()
            .unwrap()
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_writable_dir_is_positive_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_for(dir.path());

        let probes: [&dyn Probe; 2] = [&WriteAccessProbe, &SandboxIntegrityProbe];
        for probe in probes {
            let result = probe.run(&catalog);
            assert!(result.positive, "{}", probe.id());
            let written = PathBuf::from(result.detail.unwrap());
            assert!(!written.exists(), "probe file survived");
            assert_eq!(entries(dir.path()), 0);
        }
    }

    #[test]
    fn test_missing_dir_is_negative() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_for(&dir.path().join("absent"));
        assert!(!WriteAccessProbe.run(&catalog).positive);
        assert!(!SandboxIntegrityProbe.run(&catalog).positive);
    }

    #[test]
    fn test_file_names_are_unique_per_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let a = ScratchFile::reserve(dir.path());
        let b = ScratchFile::reserve(dir.path());
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));
    }

    #[test]
    fn test_failed_write_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let result = probe_write(ProbeId::WriteAccess, dir.path(), |path| {
            fs::write(path, b"partial")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });
        assert!(!result.positive);
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn test_existing_file_is_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut foreign = None;
        let result = probe_write(ProbeId::SandboxIntegrity, dir.path(), |path| {
            fs::write(path, b"not ours")?;
            foreign = Some(path.to_path_buf());
            OpenOptions::new().write(true).create_new(true).open(path).map(drop)
        });
        assert!(!result.positive);
        let foreign = foreign.unwrap();
        assert_eq!(fs::read(&foreign).unwrap(), b"not ours");
    }

    #[test]
    fn test_failed_delete_is_negative() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the file makes remove_file fail.
        let result = probe_write(ProbeId::SandboxIntegrity, dir.path(), |path| {
            fs::create_dir(path)
        });
        assert!(!result.positive);
        for entry in fs::read_dir(dir.path()).unwrap() {
            fs::remove_dir(entry.unwrap().path()).unwrap();
        }
    }
}
