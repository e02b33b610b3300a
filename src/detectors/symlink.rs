//! Symbolic-link anomalies.
//!
//! On a stock device, the catalog's system paths are either real
//! directories or redirect under the stock prefix. Jailbreaks commonly move
//! them to writable storage and leave a symlink behind.

use std::fs;
use std::io;

use tracing::{trace, warn};

use super::{settle, Probe};
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::policy::{ProbeId, ProbeResult};

#[derive(Debug, Default, Clone, Copy)]
pub struct SymbolicLinkProbe;

impl Probe for SymbolicLinkProbe {
    fn id(&self) -> ProbeId {
        ProbeId::SymbolicLink
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        let stock = catalog.symlink_stock_prefix();
        for path in catalog.symlink_paths() {
            let target = match fs::read_link(path) {
                Ok(target) => target,
                // EINVAL: exists but is not a link
                Err(err)
                    if err.kind() == io::ErrorKind::NotFound
                        || err.raw_os_error() == Some(libc::EINVAL) =>
                {
                    continue
                }
                Err(err) => {
                    warn!(probe = %self.id(), path = %path, error = %err, "readlink failed");
                    continue;
                }
            };
            let target = target.to_string_lossy();
            trace!(path = %path, target = %target, "system path is a symlink");
            if !target.starts_with(stock) {
                return settle(self.id(), Ok(Some(format!("{path} -> {target}"))));
            }
        }
        settle(self.id(), Ok(None))
    }
}
