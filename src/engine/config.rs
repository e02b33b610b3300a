//! Runtime configuration.
//!
//! Every knob has a built-in default and can be overridden by an environment
//! variable, read once at startup. Bad values never stop the engine: they
//! are reported and the default stays in effect.

use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::detectors::timing;
use crate::engine::policy::DEFAULT_CORROBORATION_QUORUM;

pub const CONNECT_TIMEOUT_VAR: &str = "SHIELD_CONNECT_TIMEOUT_MS";
pub const READ_TIMEOUT_VAR: &str = "SHIELD_READ_TIMEOUT_MS";
pub const TIMING_THRESHOLD_VAR: &str = "SHIELD_TIMING_THRESHOLD_US";
pub const TIMING_SAMPLES_VAR: &str = "SHIELD_TIMING_SAMPLES";
pub const QUORUM_VAR: &str = "SHIELD_CORROBORATION_QUORUM";
pub const CONCURRENT_VAR: &str = "SHIELD_CONCURRENT";
pub const GRACEFUL_VAR: &str = "SHIELD_GRACEFUL";
pub const ENFORCE_VAR: &str = "SHIELD_ENFORCE";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldConfig {
    /// Loopback connect bound for the network probes.
    pub connect_timeout: Duration,
    /// Read/write bound for the handshake exchange.
    pub read_timeout: Duration,
    pub timing_threshold: Duration,
    pub timing_samples: usize,
    pub corroboration_quorum: usize,
    /// Run probes on parallel workers instead of one after another.
    pub concurrent: bool,
    /// Anti-debug guard reports a tracer instead of exiting.
    pub graceful: bool,
    /// A compromised verdict terminates the process instead of only alerting.
    pub enforce: bool,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            timing_threshold: timing::DEFAULT_THRESHOLD,
            timing_samples: timing::DEFAULT_SAMPLES,
            corroboration_quorum: DEFAULT_CORROBORATION_QUORUM,
            concurrent: false,
            graceful: false,
            enforce: false,
        }
    }
}

impl ShieldConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_positive::<u64>(&lookup, CONNECT_TIMEOUT_VAR) {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_positive::<u64>(&lookup, READ_TIMEOUT_VAR) {
            config.read_timeout = Duration::from_millis(ms);
        }
        if let Some(us) = parse_positive::<u64>(&lookup, TIMING_THRESHOLD_VAR) {
            config.timing_threshold = Duration::from_micros(us);
        }
        if let Some(samples) = parse_positive::<usize>(&lookup, TIMING_SAMPLES_VAR) {
            config.timing_samples = samples;
        }
        if let Some(quorum) = parse_positive::<usize>(&lookup, QUORUM_VAR) {
            config.corroboration_quorum = quorum;
        }
        if let Some(flag) = parse_flag(&lookup, CONCURRENT_VAR) {
            config.concurrent = flag;
        }
        if let Some(flag) = parse_flag(&lookup, GRACEFUL_VAR) {
            config.graceful = flag;
        }
        if let Some(flag) = parse_flag(&lookup, ENFORCE_VAR) {
            config.enforce = flag;
        }

        config
    }

    /// Log the effective settings.
    pub fn log_summary(&self) {
        info!(
            connect_timeout_ms = self.connect_timeout.as_millis() as u64,
            read_timeout_ms = self.read_timeout.as_millis() as u64,
            timing_threshold_us = self.timing_threshold.as_micros() as u64,
            timing_samples = self.timing_samples,
            quorum = self.corroboration_quorum,
            concurrent = self.concurrent,
            graceful = self.graceful,
            enforce = self.enforce,
            "configuration"
        );
    }
}

/// Zero is rejected along with anything unparsable: a zero timeout would
/// mean "block forever" to the socket layer.
fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<T>
where
    T: FromStr + PartialEq + Default,
{
    let raw = lookup(var)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Some(value),
        _ => {
            warn!(variable = var, value = %raw, "expected a positive integer, keeping default");
            None
        }
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<bool> {
    let raw = lookup(var)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!(variable = var, value = %raw, "expected a boolean, keeping default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ShieldConfig::from_lookup(|_| None);
        assert_eq!(config, ShieldConfig::default());
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.read_timeout, Duration::from_millis(500));
        assert_eq!(config.timing_threshold, Duration::from_micros(1000));
        assert_eq!(config.timing_samples, 3);
        assert_eq!(config.corroboration_quorum, 2);
        assert!(!config.concurrent);
        assert!(!config.graceful);
        assert!(!config.enforce);
    }

    #[test]
    fn test_overrides() {
        let config = ShieldConfig::from_lookup(lookup(&[
            (CONNECT_TIMEOUT_VAR, "100"),
            (READ_TIMEOUT_VAR, " 750 "),
            (TIMING_THRESHOLD_VAR, "2500"),
            (TIMING_SAMPLES_VAR, "5"),
            (QUORUM_VAR, "1"),
            (CONCURRENT_VAR, "true"),
            (GRACEFUL_VAR, "1"),
            (ENFORCE_VAR, "yes"),
        ]));
        assert_eq!(config.connect_timeout, Duration::from_millis(100));
        assert_eq!(config.read_timeout, Duration::from_millis(750));
        assert_eq!(config.timing_threshold, Duration::from_micros(2500));
        assert_eq!(config.timing_samples, 5);
        assert_eq!(config.corroboration_quorum, 1);
        assert!(config.concurrent);
        assert!(config.graceful);
        assert!(config.enforce);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ShieldConfig::from_lookup(lookup(&[
            (CONNECT_TIMEOUT_VAR, "0"),
            (READ_TIMEOUT_VAR, "-5"),
            (TIMING_SAMPLES_VAR, "many"),
            (CONCURRENT_VAR, "maybe"),
            (ENFORCE_VAR, "sometimes"),
        ]));
        assert_eq!(config, ShieldConfig::default());
    }
}
