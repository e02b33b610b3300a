use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use strum::{Display, IntoStaticStr};
use tracing::{debug, error, info};

use crate::detectors::{standard_probes, Probe, UrlSchemeHandler};
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::config::ShieldConfig;
use crate::error::Result;

/// Corroborating votes needed before soft evidence alone condemns a device.
pub const DEFAULT_CORROBORATION_QUORUM: usize = 2;

/// Probe taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ProbeId {
    FilesystemArtifact,
    UrlScheme,
    WriteAccess,
    SymbolicLink,
    LoadedModule,
    SandboxIntegrity,
    EnvironmentVariable,
    TimingAnomaly,
    InstrumentationPort,
    InstrumentationHandshake,
    ProcessTable,
    TempArtifact,
}

/// How much a positive from a probe is worth on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// One positive is enough; the pass stops there.
    Conclusive,
    /// Noisy signal, counted as a vote towards the corroboration quorum.
    Corroborating,
}

/// Outcome of a single probe invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub probe: ProbeId,
    pub positive: bool,
    /// Which signature matched, for diagnostics.
    pub detail: Option<String>,
}

impl ProbeResult {
    pub fn negative(probe: ProbeId) -> Self {
        Self {
            probe,
            positive: false,
            detail: None,
        }
    }

    pub fn positive(probe: ProbeId, detail: impl Into<String>) -> Self {
        Self {
            probe,
            positive: true,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregate result of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    trigger: Option<ProbeResult>,
    evaluated: Vec<ProbeResult>,
}

impl Verdict {
    pub fn clean(evaluated: Vec<ProbeResult>) -> Self {
        Self {
            trigger: None,
            evaluated,
        }
    }

    pub fn compromised(trigger: ProbeResult, evaluated: Vec<ProbeResult>) -> Self {
        Self {
            trigger: Some(trigger),
            evaluated,
        }
    }

    pub fn is_compromised(&self) -> bool {
        self.trigger.is_some()
    }

    /// The probe result that decided the verdict.
    pub fn trigger(&self) -> Option<&ProbeResult> {
        self.trigger.as_ref()
    }

    pub fn trigger_id(&self) -> Option<ProbeId> {
        self.trigger.as_ref().map(|r| r.probe)
    }

    /// Results of every probe that actually ran, in completion order.
    pub fn evaluated(&self) -> &[ProbeResult] {
        &self.evaluated
    }

    /// Returns a summary suitable for logging
    pub fn summary(&self) -> String {
        match &self.trigger {
            Some(t) => format!(
                "compromised by {} ({}) after {} probe(s)",
                t.probe,
                t.detail.as_deref().unwrap_or("no detail"),
                self.evaluated.len()
            ),
            None => format!("clean after {} probe(s)", self.evaluated.len()),
        }
    }
}

/// Decides the order probes are evaluated in.
pub trait OrderSource: Send {
    /// Permute `order` in place.
    fn arrange(&mut self, order: &mut [usize]);
}

/// Shuffles with a generator seeded from OS entropy.
pub struct RandomOrder {
    rng: StdRng,
}

impl RandomOrder {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible shuffling for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl OrderSource for RandomOrder {
    fn arrange(&mut self, order: &mut [usize]) {
        order.shuffle(&mut self.rng);
    }
}

/// Registration order, no shuffling.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedOrder;

impl OrderSource for FixedOrder {
    fn arrange(&mut self, _order: &mut [usize]) {}
}

/// Running tally of one pass.
struct Tally {
    quorum: usize,
    trigger: Option<ProbeResult>,
    votes: Vec<ProbeResult>,
    evaluated: Vec<ProbeResult>,
}

impl Tally {
    fn new(quorum: usize) -> Self {
        Self {
            quorum,
            trigger: None,
            votes: Vec::new(),
            evaluated: Vec::new(),
        }
    }

    /// Record a result. Returns true once the pass has a conclusive positive.
    fn record(&mut self, confidence: Confidence, result: ProbeResult) -> bool {
        debug!(probe = %result.probe, positive = result.positive, "probe finished");
        if result.positive && self.trigger.is_none() {
            match confidence {
                Confidence::Conclusive => self.trigger = Some(result.clone()),
                Confidence::Corroborating => {
                    info!(
                        probe = %result.probe,
                        votes = self.votes.len() + 1,
                        quorum = self.quorum,
                        "corroborating signal recorded"
                    );
                    self.votes.push(result.clone());
                }
            }
        }
        self.evaluated.push(result);
        self.trigger.is_some()
    }

    fn finish(self) -> Verdict {
        let trigger = self.trigger.or_else(|| {
            if self.votes.len() >= self.quorum {
                self.votes.into_iter().next()
            } else {
                None
            }
        });
        let verdict = match trigger {
            Some(t) => Verdict::compromised(t, self.evaluated),
            None => Verdict::clean(self.evaluated),
        };
        if let Some(t) = verdict.trigger() {
            error!(
                target: "shield::security",
                probe = %t.probe,
                detail = t.detail.as_deref().unwrap_or(""),
                "compromise indicator found"
            );
        }
        info!(compromised = verdict.is_compromised(), "{}", verdict.summary());
        verdict
    }
}

/// Detection Orchestrator.
///
/// Runs the configured probes in a fresh random order on every pass and
/// stops at the first conclusive positive. The orchestrator never acts on
/// its verdict; that is the response policy's job.
pub struct Orchestrator {
    catalog: Arc<ArtifactCatalog>,
    probes: Vec<Box<dyn Probe>>,
    order: Box<dyn OrderSource>,
    quorum: usize,
}

impl Orchestrator {
    pub fn new(catalog: Arc<ArtifactCatalog>) -> Self {
        Self {
            catalog,
            probes: Vec::new(),
            order: Box::new(RandomOrder::from_entropy()),
            quorum: DEFAULT_CORROBORATION_QUORUM,
        }
    }

    /// Embedded catalog, full probe set and the configured quorum.
    ///
    /// Fails only when the embedded catalog is unusable.
    pub fn standard(
        config: &ShieldConfig,
        url_handler: Option<Arc<dyn UrlSchemeHandler>>,
    ) -> Result<Self> {
        let catalog = Arc::new(ArtifactCatalog::embedded()?);
        Ok(Self::new(catalog)
            .with_probes(standard_probes(config, url_handler))
            .with_quorum(config.corroboration_quorum))
    }

    pub fn with_probe(mut self, probe: impl Probe + 'static) -> Self {
        self.probes.push(Box::new(probe));
        self
    }

    pub fn with_probes(mut self, probes: Vec<Box<dyn Probe>>) -> Self {
        self.probes.extend(probes);
        self
    }

    /// Replace the randomness source.
    pub fn with_order(mut self, order: impl OrderSource + 'static) -> Self {
        self.order = Box::new(order);
        self
    }

    /// Corroborating votes required when no conclusive probe fires. Clamped to at least 1.
    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum.max(1);
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    pub fn catalog(&self) -> &ArtifactCatalog {
        &self.catalog
    }

    fn plan(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.probes.len()).collect();
        self.order.arrange(&mut order);
        order
    }

    /// Sequential pass.
    pub fn run(&mut self) -> Verdict {
        let order = self.plan();
        let mut tally = Tally::new(self.quorum);
        for index in order {
            let probe = &self.probes[index];
            if tally.record(probe.confidence(), probe.run(&self.catalog)) {
                break;
            }
        }
        tally.finish()
    }

    /// Parallel pass.
    ///
    /// Workers are spawned in shuffled order. Once a conclusive positive is
    /// recorded, workers that have not started yet skip their probe.
    pub fn run_concurrent(&mut self) -> Verdict {
        let order = self.plan();
        let tally = Mutex::new(Tally::new(self.quorum));
        let cancelled = AtomicBool::new(false);
        let catalog: &ArtifactCatalog = &self.catalog;

        thread::scope(|scope| {
            for index in order {
                let probe = &self.probes[index];
                let tally = &tally;
                let cancelled = &cancelled;
                scope.spawn(move || {
                    if cancelled.load(Ordering::Acquire) {
                        debug!(probe = %probe.id(), "skipped after positive");
                        return;
                    }
                    let result = probe.run(catalog);
                    let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
                    if tally.record(probe.confidence(), result) {
                        cancelled.store(true, Ordering::Release);
                    }
                });
            }
        });

        tally.into_inner().unwrap_or_else(PoisonError::into_inner).finish()
    }
}
