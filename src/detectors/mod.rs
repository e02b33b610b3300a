//! Probes.
//!
//! Each probe tests for one class of compromise and reports a plain
//! [`ProbeResult`]. Probes hold no mutable state and only read the shared
//! [`ArtifactCatalog`], so any number of them may run at once.
//!
//! Faults inside a probe never escape it: they are logged and the probe
//! reports negative.

pub mod environment;
pub mod filesystem;
pub mod modules;
pub mod network;
pub mod process;
pub mod ptrace;
pub mod sandbox;
pub mod symlink;
pub mod timing;
pub mod url_scheme;

use std::sync::Arc;

use tracing::warn;

use crate::engine::catalog::ArtifactCatalog;
use crate::engine::config::ShieldConfig;
use crate::engine::policy::{Confidence, ProbeId, ProbeResult};
use crate::error::ProbeError;

pub use environment::EnvironmentProbe;
pub use filesystem::{FilesystemArtifactProbe, TempArtifactProbe};
pub use modules::{ImageList, LoadedModuleProbe, SystemImageList};
pub use network::{HandshakeProbe, PortProbe};
pub use process::{ProcessProbe, ProcessTable, SystemProcessTable};
pub use ptrace::{AntiDebugGuard, GuardOutcome, TerminationMode, TraceDenial, TraceState};
pub use sandbox::{SandboxIntegrityProbe, WriteAccessProbe};
pub use symlink::SymbolicLinkProbe;
pub use timing::TimingProbe;
pub use url_scheme::{UrlSchemeHandler, UrlSchemeProbe};

/// One self-contained heuristic check.
pub trait Probe: Send + Sync {
    fn id(&self) -> ProbeId;

    fn confidence(&self) -> Confidence {
        Confidence::Conclusive
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult;
}

/// Fold a fallible check into a result: `Ok(Some(detail))` is a hit,
/// `Ok(None)` a miss, and an error is logged and counted as a miss.
pub(crate) fn settle(probe: ProbeId, outcome: Result<Option<String>, ProbeError>) -> ProbeResult {
    match outcome {
        Ok(Some(detail)) => ProbeResult::positive(probe, detail),
        Ok(None) => ProbeResult::negative(probe),
        Err(ProbeError::Unsupported) => ProbeResult::negative(probe),
        Err(err) => {
            warn!(probe = %probe, error = %err, "probe fault, treating as negative");
            ProbeResult::negative(probe)
        }
    }
}

/// The full production probe set.
///
/// The URL-scheme probe is only included when the host can answer
/// handler queries; without one the platform has no introspection to offer.
pub fn standard_probes(
    config: &ShieldConfig,
    url_handler: Option<Arc<dyn UrlSchemeHandler>>,
) -> Vec<Box<dyn Probe>> {
    let mut probes: Vec<Box<dyn Probe>> = vec![
        Box::new(FilesystemArtifactProbe),
        Box::new(WriteAccessProbe),
        Box::new(SymbolicLinkProbe),
        Box::new(LoadedModuleProbe::new(SystemImageList)),
        Box::new(SandboxIntegrityProbe),
        Box::new(EnvironmentProbe::new()),
        Box::new(TimingProbe::new(config.timing_threshold, config.timing_samples)),
        Box::new(PortProbe::new(config.connect_timeout)),
        Box::new(HandshakeProbe::new(config.connect_timeout, config.read_timeout)),
        Box::new(ProcessProbe::new(SystemProcessTable)),
        Box::new(TempArtifactProbe),
    ];
    if let Some(handler) = url_handler {
        probes.push(Box::new(UrlSchemeProbe::new(handler)));
    }
    probes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    struct Always(bool);

    impl UrlSchemeHandler for Always {
        fn can_open(&self, _url: &str) -> bool {
            self.0
        }
    }

    #[test]
    fn test_settle_maps_outcomes() {
        let hit = settle(ProbeId::FilesystemArtifact, Ok(Some("/bin/bash".into())));
        assert!(hit.positive);
        assert_eq!(hit.detail.as_deref(), Some("/bin/bash"));

        assert!(!settle(ProbeId::FilesystemArtifact, Ok(None)).positive);
        assert!(!settle(ProbeId::FilesystemArtifact, Err(ProbeError::Unsupported)).positive);

        let fault = ProbeError::io("reading", io::Error::new(io::ErrorKind::Other, "boom"));
        let result = settle(ProbeId::ProcessTable, Err(fault));
        assert!(!result.positive);
        assert_eq!(result.probe, ProbeId::ProcessTable);
    }

    #[test]
    fn test_standard_set_feature_detects_url_schemes() {
        let config = ShieldConfig::default();
        let without: HashSet<ProbeId> = standard_probes(&config, None).iter().map(|p| p.id()).collect();
        assert!(!without.contains(&ProbeId::UrlScheme));
        assert_eq!(without.len(), 11);

        let with: HashSet<ProbeId> = standard_probes(&config, Some(Arc::new(Always(false))))
            .iter()
            .map(|p| p.id())
            .collect();
        assert!(with.contains(&ProbeId::UrlScheme));
        assert_eq!(with.len(), 12);
    }

    #[test]
    fn test_only_timing_is_corroborating() {
        let config = ShieldConfig::default();
        for probe in standard_probes(&config, None) {
            let expected = if probe.id() == ProbeId::TimingAnomaly {
                Confidence::Corroborating
            } else {
                Confidence::Conclusive
            };
            assert_eq!(probe.confidence(), expected, "{}", probe.id());
        }
    }
}
