//! Environment-variable probe.
//!
//! Injection loaders and tweak frameworks leave variables such as
//! `DYLD_INSERT_LIBRARIES` in the environment. Some indicators only count
//! when their value carries a marker string.

use std::ffi::OsString;

use tracing::trace;

use super::{settle, Probe};
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::policy::{ProbeId, ProbeResult};

type Lookup = dyn Fn(&str) -> Option<OsString> + Send + Sync;

pub struct EnvironmentProbe {
    lookup: Box<Lookup>,
}

impl EnvironmentProbe {
    /// Reads the process environment.
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var_os(name))
    }

    /// Reads variables through `lookup` instead.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<OsString> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }
}

impl Default for EnvironmentProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for EnvironmentProbe {
    fn id(&self) -> ProbeId {
        ProbeId::EnvironmentVariable
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        for indicator in catalog.environment() {
            let Some(value) = (self.lookup)(&indicator.name) else {
                continue;
            };
            let value = value.to_string_lossy();
            trace!(name = %indicator.name, "indicator variable set");
            let hit = match &indicator.marker {
                Some(marker) => value.contains(marker.as_str()),
                None => true,
            };
            if hit {
                return settle(self.id(), Ok(Some(indicator.name.clone())));
            }
        }
        settle(self.id(), Ok(None))
    }
}
