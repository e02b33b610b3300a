//! Process-table probe.
//!
//! Looks for instrumentation server processes by exact name. On iOS the
//! sandbox usually refuses to enumerate other processes; that surfaces as a
//! kernel fault, which is logged and counted as negative.

use tracing::trace;

use super::{settle, Probe};
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::policy::{ProbeId, ProbeResult};
use crate::error::ProbeError;

/// Source of running process names.
pub trait ProcessTable: Send + Sync {
    fn process_names(&self) -> Result<Vec<String>, ProbeError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn process_names(&self) -> Result<Vec<String>, ProbeError> {
        platform_process_names()
    }
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
fn platform_process_names() -> Result<Vec<String>, ProbeError> {
    use crate::ffi::{proc_listallpids, proc_name};
    use std::os::raw::c_int;

    /// Room for processes spawned between sizing and filling the list.
    const PID_HEADROOM: usize = 32;

    // SAFETY: the pid buffer is sized in bytes exactly as passed, and the
    // name buffer length is passed alongside it; both calls only write
    // within those bounds.
    unsafe {
        let count = proc_listallpids(std::ptr::null_mut(), 0);
        if count <= 0 {
            return Err(ProbeError::kernel("proc_listallpids"));
        }

        let capacity = count as usize + PID_HEADROOM;
        let mut pids: Vec<c_int> = vec![0; capacity];
        let filled = proc_listallpids(
            pids.as_mut_ptr().cast(),
            (capacity * std::mem::size_of::<c_int>()) as c_int,
        );
        if filled <= 0 {
            return Err(ProbeError::kernel("proc_listallpids"));
        }

        let mut name = [0u8; libc::MAXPATHLEN as usize];
        let mut names = Vec::with_capacity(filled as usize);
        for &pid in pids.iter().take((filled as usize).min(capacity)) {
            if pid == 0 {
                continue;
            }
            let len = proc_name(pid, name.as_mut_ptr().cast(), name.len() as u32);
            if len > 0 {
                let len = (len as usize).min(name.len());
                names.push(String::from_utf8_lossy(&name[..len]).into_owned());
            }
        }
        Ok(names)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn platform_process_names() -> Result<Vec<String>, ProbeError> {
    use std::fs;

    let entries = fs::read_dir("/proc").map_err(|err| ProbeError::io("list /proc", err))?;
    let mut names = Vec::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let pid = file_name.to_string_lossy();
        if pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // The process may have exited since the listing.
        if let Ok(comm) = fs::read_to_string(entry.path().join("comm")) {
            names.push(comm.trim_end_matches('\n').to_string());
        }
    }
    Ok(names)
}

#[cfg(not(any(
    target_os = "ios",
    target_os = "macos",
    target_os = "linux",
    target_os = "android"
)))]
fn platform_process_names() -> Result<Vec<String>, ProbeError> {
    Err(ProbeError::Unsupported)
}

pub struct ProcessProbe<T> {
    table: T,
}

impl<T: ProcessTable> ProcessProbe<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    fn scan(&self, catalog: &ArtifactCatalog) -> Result<Option<String>, ProbeError> {
        let wanted = catalog.process_names();
        if wanted.is_empty() {
            return Ok(None);
        }
        let running = self.table.process_names()?;
        trace!(count = running.len(), "process table read");
        Ok(running.into_iter().find(|name| wanted.contains(name)))
    }
}

impl<T: ProcessTable> Probe for ProcessProbe<T> {
    fn id(&self) -> ProbeId {
        ProbeId::ProcessTable
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        settle(self.id(), self.scan(catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct Fixed(Vec<&'static str>);

    impl ProcessTable for Fixed {
        fn process_names(&self) -> Result<Vec<String>, ProbeError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    struct Denied;

    impl ProcessTable for Denied {
        fn process_names(&self) -> Result<Vec<String>, ProbeError> {
            Err(ProbeError::Kernel {
                query: "proc_listallpids",
                source: io::Error::from_raw_os_error(libc::EPERM),
            })
        }
    }

    #[test]
    fn test_names_match_exactly() {
        let catalog = ArtifactCatalog::embedded().unwrap();
        // a substring is not enough
        let probe = ProcessProbe::new(Fixed(vec!["launchd", "frida-server-helperd", "SpringBoard"]));
        assert!(!probe.run(&catalog).positive);

        let probe = ProcessProbe::new(Fixed(vec!["launchd", "frida-server"]));
        let result = probe.run(&catalog);
        assert!(result.positive);
        assert_eq!(result.detail.as_deref(), Some("frida-server"));
    }

    #[test]
    fn test_enumeration_denied_is_negative() {
        let catalog = ArtifactCatalog::embedded().unwrap();
        assert!(!ProcessProbe::new(Denied).run(&catalog).positive);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_finds_own_process() {
        let own = std::fs::read_to_string("/proc/self/comm").unwrap();
        let catalog = ArtifactCatalog::builder()
            .process_name(own.trim_end().to_string())
            .build()
            .unwrap();
        assert!(ProcessProbe::new(SystemProcessTable).run(&catalog).positive);
    }
}
