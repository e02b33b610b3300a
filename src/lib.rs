//! Runtime self-defense for mobile applications.
//!
//! Independent probes look for signs of a jailbroken or rooted OS image and
//! for an attached instrumentation framework. The [`Orchestrator`] runs them
//! in a randomized order, stops at the first conclusive positive and hands
//! the [`Verdict`] to a [`ResponsePolicy`]. The [`AntiDebugGuard`] runs on
//! its own, once at startup.

#[cfg(any(target_os = "ios", target_os = "macos"))]
mod ffi;

pub mod detectors;
pub mod device;
pub mod engine;
pub mod error;

pub use detectors::{standard_probes, AntiDebugGuard, GuardOutcome, Probe, TerminationMode};
pub use device::{DeviceIdentity, DeviceIdentityProvider, SystemDevice};
pub use engine::catalog::{ArtifactCatalog, CatalogBuilder, Category};
pub use engine::config::ShieldConfig;
pub use engine::handoff::{BackgroundDetector, PassReport};
pub use engine::policy::{Confidence, Orchestrator, ProbeId, ProbeResult, Verdict};
pub use engine::responses::{LogOnly, ResponsePolicy, SecurityNotifier, TerminateOnCompromise};
pub use error::{CatalogError, ProbeError, Result, ShieldError};
