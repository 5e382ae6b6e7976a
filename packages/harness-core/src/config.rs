//! Harness configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::guard::GuardConfig;

/// Scheduler sizing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker threads in the non-blocking pool
    pub non_blocking_workers: usize,
    /// Upper bound of the blocking-allowed pool
    pub max_blocking_threads: usize,
    /// Items buffered per subscription before the producer waits
    pub prefetch: usize,
    /// Time granted to in-flight units when the scheduler is dropped
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            non_blocking_workers: 4,
            max_blocking_threads: 16,
            prefetch: 32,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `HARNESS_WORKERS`, `HARNESS_BLOCKING_THREADS`
    /// and `HARNESS_PREFETCH`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            non_blocking_workers: env_parse("HARNESS_WORKERS")
                .unwrap_or(defaults.non_blocking_workers),
            max_blocking_threads: env_parse("HARNESS_BLOCKING_THREADS")
                .unwrap_or(defaults.max_blocking_threads),
            prefetch: env_parse("HARNESS_PREFETCH").unwrap_or(defaults.prefetch),
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }
}

/// Step verifier settings.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Window for a whole script to be satisfied
    pub timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl VerifierConfig {
    /// Defaults overridden by `HARNESS_VERIFY_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self {
            timeout: env_parse("HARNESS_VERIFY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(Self::default().timeout),
        }
    }
}

/// Aggregated harness configuration.
#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    pub scheduler: SchedulerConfig,
    pub verifier: VerifierConfig,
    pub guard: GuardConfig,
}

impl HarnessConfig {
    pub fn from_env() -> Self {
        Self {
            scheduler: SchedulerConfig::from_env(),
            verifier: VerifierConfig::from_env(),
            guard: GuardConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable harness setting");
            None
        }
    }
}
