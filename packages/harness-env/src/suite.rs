//! Environments shared by the tests of a suite.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use harness_core::Result;
use parking_lot::Mutex;

use crate::environment::Environment;

/// One environment shared by all tests of a suite. Holding the lock for the
/// length of a test serializes the suite's tests against it.
pub type SharedEnvironment = Arc<Mutex<Environment>>;

struct SuiteEntry {
    environment: Result<SharedEnvironment>,
    planned: usize,
    finished: usize,
}

/// Per-suite environments, started on first use.
///
/// A failed start is remembered, so every later test of that suite gets the
/// same error instead of retrying the launch.
#[derive(Default)]
pub struct SuiteEnvironments {
    environments: Mutex<HashMap<String, SuiteEntry>>,
}

impl SuiteEnvironments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment of `suite`, kept until [`release`](Self::release).
    pub fn get_or_start<F>(&self, suite: &str, start: F) -> Result<SharedEnvironment>
    where
        F: FnOnce() -> Result<Environment>,
    {
        self.entry(suite, usize::MAX, start)
    }

    /// Joins one of the `planned` tests of `suite`.
    ///
    /// The environment is stopped when the lease of the suite's last planned
    /// test drops, on success and on panic alike. A test that never runs keeps
    /// the environment alive until the registry itself is dropped.
    pub fn enter<F>(&self, suite: &str, planned: usize, start: F) -> Result<SuiteLease<'_>>
    where
        F: FnOnce() -> Result<Environment>,
    {
        match self.entry(suite, planned, start) {
            Ok(environment) => Ok(SuiteLease {
                suites: self,
                suite: suite.to_string(),
                environment,
            }),
            Err(err) => {
                self.finish(suite);
                Err(err)
            }
        }
    }

    fn entry<F>(&self, suite: &str, planned: usize, start: F) -> Result<SharedEnvironment>
    where
        F: FnOnce() -> Result<Environment>,
    {
        let mut environments = self.environments.lock();
        if let Some(existing) = environments.get(suite) {
            return existing.environment.clone();
        }

        tracing::debug!(suite, planned, "Starting suite environment");
        let started = start().map(|env| Arc::new(Mutex::new(env)));
        environments.insert(
            suite.to_string(),
            SuiteEntry {
                environment: started.clone(),
                planned,
                finished: 0,
            },
        );
        started
    }

    fn finish(&self, suite: &str) {
        let released = {
            let mut environments = self.environments.lock();
            let done = match environments.get_mut(suite) {
                Some(entry) => {
                    entry.finished += 1;
                    entry.finished >= entry.planned
                }
                None => false,
            };
            if done {
                tracing::debug!(suite, "Last planned test finished, releasing environment");
                environments.remove(suite)
            } else {
                None
            }
        };
        // dropped outside the registry lock; teardown waits for the store
        drop(released);
    }

    /// Forgets the suite's environment. It is torn down once the last test
    /// holding it lets go.
    pub fn release(&self, suite: &str) -> Option<SharedEnvironment> {
        self.environments
            .lock()
            .remove(suite)
            .and_then(|entry| entry.environment.ok())
    }

    pub fn suites(&self) -> Vec<String> {
        self.environments.lock().keys().cloned().collect()
    }
}

/// One test's hold on its suite environment.
pub struct SuiteLease<'a> {
    suites: &'a SuiteEnvironments,
    suite: String,
    environment: SharedEnvironment,
}

impl SuiteLease<'_> {
    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn shared(&self) -> &SharedEnvironment {
        &self.environment
    }
}

impl Deref for SuiteLease<'_> {
    type Target = Mutex<Environment>;

    fn deref(&self) -> &Self::Target {
        &self.environment
    }
}

impl Drop for SuiteLease<'_> {
    fn drop(&mut self) {
        self.suites.finish(&self.suite);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ProvisionOptions;
    use crate::endpoint::ConnectionEndpoint;
    use crate::image::ImageSpec;
    use harness_core::{Error, ErrorKind};
    use ntest::timeout;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn start_sleeper(name: &str) -> Result<Environment> {
        Environment::start(
            name,
            ImageSpec::process("sleep").arg("30"),
            |_: &ConnectionEndpoint| -> std::result::Result<(), String> { Ok(()) },
            ProvisionOptions::default().with_startup_timeout(Duration::from_secs(1)),
        )
    }

    #[test]
    fn test_environment_started_once_per_suite() {
        let suites = SuiteEnvironments::new();
        let starts = AtomicUsize::new(0);
        let start = || {
            starts.fetch_add(1, Ordering::SeqCst);
            start_sleeper("shared")
        };

        let first = suites.get_or_start("repo", start).unwrap();
        let second = suites.get_or_start("repo", start).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(suites.suites(), vec!["repo".to_string()]);
    }

    #[test]
    fn test_failed_start_is_not_retried() {
        let suites = SuiteEnvironments::new();
        let starts = AtomicUsize::new(0);
        let start = || {
            starts.fetch_add(1, Ordering::SeqCst);
            Err(Error::ProvisionFailure {
                environment: "broken".to_string(),
                reason: "no image".to_string(),
                stderr_tail: Vec::new(),
            })
        };

        for _ in 0..3 {
            let err = suites.get_or_start("broken", start).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProvisionFailure);
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_tears_down_after_last_holder() {
        let suites = SuiteEnvironments::new();
        let env = suites
            .get_or_start("temp", || start_sleeper("temp"))
            .unwrap();
        let endpoint = env.lock().endpoint().unwrap();

        let released = suites.release("temp").unwrap();
        drop(released);
        assert!(!endpoint.is_stale());

        drop(env);
        assert!(endpoint.is_stale());
    }

    fn process_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[timeout(10000)]
    #[test]
    fn test_last_planned_test_stops_the_store() {
        let suites = SuiteEnvironments::new();

        let first = suites.enter("planned", 2, || start_sleeper("planned")).unwrap();
        let pid = first.lock().pid().unwrap();
        let endpoint = first.lock().endpoint().unwrap();
        drop(first);
        assert!(process_alive(pid));
        assert_eq!(suites.suites(), vec!["planned".to_string()]);

        let second = suites
            .enter("planned", 2, || -> Result<Environment> { unreachable!() })
            .unwrap();
        assert_eq!(second.lock().pid(), Some(pid));
        drop(second);

        assert!(endpoint.is_stale());
        assert!(!process_alive(pid));
        assert!(suites.suites().is_empty());
    }

    #[timeout(10000)]
    #[test]
    fn test_panicking_test_still_counts_towards_teardown() {
        let suites = SuiteEnvironments::new();

        let pid = std::thread::scope(|s| {
            s.spawn(|| {
                let lease = suites.enter("panics", 1, || start_sleeper("panics")).unwrap();
                let pid = lease.lock().pid().unwrap();
                assert!(process_alive(pid));
                pid
            })
            .join()
            .unwrap()
        });
        assert!(!process_alive(pid));

        let result = std::thread::scope(|s| {
            s.spawn(|| {
                let _lease = suites.enter("panics", 1, || start_sleeper("panics")).unwrap();
                panic!("test body failed");
            })
            .join()
        });
        assert!(result.is_err());
        assert!(suites.suites().is_empty());
    }

    #[test]
    fn test_failed_start_counts_as_finished() {
        let suites = SuiteEnvironments::new();
        let failing = || {
            Err(Error::ProvisionFailure {
                environment: "broken".to_string(),
                reason: "no image".to_string(),
                stderr_tail: Vec::new(),
            })
        };

        assert!(suites.enter("broken", 2, failing).is_err());
        assert_eq!(suites.suites(), vec!["broken".to_string()]);
        assert!(suites.enter("broken", 2, failing).is_err());
        assert!(suites.suites().is_empty());
    }
}
