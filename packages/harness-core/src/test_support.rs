//! Shared fixtures for unit tests.

use crate::config::SchedulerConfig;
use crate::guard::{self, Guard, GuardConfig};
use crate::scheduler::Scheduler;

/// Installs the guard every unit test in this crate shares.
pub fn guard() -> &'static Guard {
    guard::install(GuardConfig::default())
}

pub fn scheduler() -> Scheduler {
    guard();
    Scheduler::new(SchedulerConfig {
        non_blocking_workers: 2,
        ..SchedulerConfig::default()
    })
    .unwrap()
}
