//! Non-blocking execution guard.
//!
//! A process-wide monitor, installed once, that fails fast when a blocking
//! primitive runs inside an execution unit scheduled on the non-blocking
//! pool. The scheduler records the unit currently being polled in a
//! thread-local slot; every intercepted primitive consults that slot before
//! it is allowed to block.
//!
//! Intercepted primitives are [`sleep`], [`park_timeout`], [`blocking_io`]
//! and every blocking wait the harness itself offers (`block_on`,
//! `UnitHandle::get`, verifier terminals, provisioner lifecycle calls).
//! A stage that calls `std::thread::sleep` or std I/O directly is not seen;
//! pipeline code has to go through these wrappers to be checked.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

/// Thread-pool class an execution unit is scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolClass {
    /// Must never block the thread
    NonBlocking,
    /// May sleep, wait and perform blocking I/O
    BlockingAllowed,
}

/// Identity of a scheduled execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTag {
    pub id: u64,
    pub class: PoolClass,
}

impl UnitTag {
    pub(crate) fn next(class: PoolClass) -> Self {
        static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed),
            class,
        }
    }
}

thread_local! {
    static CURRENT_UNIT: Cell<Option<UnitTag>> = const { Cell::new(None) };
}

/// Returns the execution unit running on this thread, if any.
pub fn current_unit() -> Option<UnitTag> {
    CURRENT_UNIT.with(Cell::get)
}

/// Marks the current thread as executing `tag` until the scope is dropped.
pub(crate) fn enter(tag: UnitTag) -> UnitScope {
    let previous = CURRENT_UNIT.with(|slot| slot.replace(Some(tag)));
    UnitScope { previous }
}

/// Restores the previously executing unit on drop, unwinding included.
pub(crate) struct UnitScope {
    previous: Option<UnitTag>,
}

impl Drop for UnitScope {
    fn drop(&mut self) {
        CURRENT_UNIT.with(|slot| slot.set(self.previous));
    }
}

/// Reaction to a detected violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardMode {
    /// Abort the offending unit
    #[default]
    Fail,
    /// Record and log only
    Warn,
}

/// Guard settings, fixed at installation.
#[derive(Debug, Clone, Default)]
pub struct GuardConfig {
    pub mode: GuardMode,
    /// Call sites that may block even on the non-blocking pool
    pub allowed_call_sites: Vec<String>,
}

impl GuardConfig {
    pub fn with_mode(mut self, mode: GuardMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn allow_blocking_in(mut self, call_site: impl Into<String>) -> Self {
        self.allowed_call_sites.push(call_site.into());
        self
    }
}

/// Name and id of the thread a violation happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadIdentity {
    pub name: Option<String>,
    pub id: String,
}

impl ThreadIdentity {
    fn current() -> Self {
        let thread = std::thread::current();
        Self {
            name: thread.name().map(str::to_string),
            id: format!("{:?}", thread.id()),
        }
    }
}

impl fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{}", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// A blocking call observed on a non-blocking thread.
#[derive(Debug, Clone)]
pub struct Violation {
    pub call_site: String,
    pub thread: ThreadIdentity,
    pub unit: Option<u64>,
    pub timestamp: SystemTime,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Blocking call {} detected on non-blocking thread {}",
            self.call_site, self.thread
        )?;
        if let Some(unit) = self.unit {
            write!(f, " (unit {})", unit)?;
        }
        Ok(())
    }
}

impl std::error::Error for Violation {}

/// Violations kept for inspection; older ones are only counted.
pub const RETAINED_VIOLATIONS: usize = 256;

#[derive(Debug, Default)]
struct Recorded {
    recent: VecDeque<Violation>,
    total: usize,
}

/// Installed guard state.
#[derive(Debug)]
pub struct Guard {
    config: GuardConfig,
    violations: Mutex<Recorded>,
}

static GUARD: OnceLock<Guard> = OnceLock::new();

/// Installs the process-wide guard.
///
/// Only the first call installs; later calls return the existing guard and
/// ignore `config`.
pub fn install(config: GuardConfig) -> &'static Guard {
    let mut installed_now = false;
    let guard = GUARD.get_or_init(|| {
        installed_now = true;
        silence_violation_panics();
        Guard::new(config)
    });
    if installed_now {
        tracing::info!(mode = ?guard.config.mode, "Non-blocking execution guard installed");
    }
    guard
}

/// Returns the installed guard, if any.
pub fn installed() -> Option<&'static Guard> {
    GUARD.get()
}

// Violations are already logged with their call site; the default hook
// would print a second, payload-less report for every aborted unit.
fn silence_violation_panics() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if info.payload().downcast_ref::<Violation>().is_none() {
            previous(info);
        }
    }));
}

impl Guard {
    pub(crate) fn new(config: GuardConfig) -> Self {
        Self {
            config,
            violations: Mutex::new(Recorded::default()),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// The most recent violations, oldest first.
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().recent.iter().cloned().collect()
    }

    /// Removes and returns the retained violations. The total count is kept.
    pub fn take_violations(&self) -> Vec<Violation> {
        self.violations.lock().recent.drain(..).collect()
    }

    /// Violations recorded since installation, including evicted ones.
    pub fn violation_count(&self) -> usize {
        self.violations.lock().total
    }

    fn inspect(&self, call_site: &str) -> Result<(), Violation> {
        let Some(unit) = current_unit() else {
            return Ok(());
        };
        if unit.class != PoolClass::NonBlocking {
            return Ok(());
        }
        if self.config.allowed_call_sites.iter().any(|c| c == call_site) {
            return Ok(());
        }

        let violation = Violation {
            call_site: call_site.to_string(),
            thread: ThreadIdentity::current(),
            unit: Some(unit.id),
            timestamp: SystemTime::now(),
        };
        tracing::error!(
            call_site,
            thread = %violation.thread,
            unit = unit.id,
            "Blocking operation detected on non-blocking thread"
        );
        let mut recorded = self.violations.lock();
        if recorded.recent.len() == RETAINED_VIOLATIONS {
            recorded.recent.pop_front();
        }
        recorded.recent.push_back(violation.clone());
        recorded.total += 1;
        Err(violation)
    }

    fn enforce(&self, call_site: &str) {
        if let Err(violation) = self.inspect(call_site) {
            if self.config.mode == GuardMode::Fail {
                std::panic::panic_any(violation);
            }
        }
    }
}

/// Checks whether `call_site` may block on the current thread.
///
/// Records the violation when it may not. Always passes when no guard is
/// installed.
pub fn check(call_site: &str) -> Result<(), Violation> {
    match installed() {
        Some(guard) => guard.inspect(call_site),
        None => Ok(()),
    }
}

/// Intercepts a blocking call.
///
/// In [`GuardMode::Fail`] a violation aborts the current execution unit by
/// unwinding with the [`Violation`] as payload; the scheduler hands it to
/// whoever awaits the unit.
pub fn enforce(call_site: &str) {
    if let Some(guard) = installed() {
        guard.enforce(call_site);
    }
}

/// Returns true when blocking is permitted on the current thread.
pub fn is_blocking_allowed() -> bool {
    !matches!(
        current_unit(),
        Some(UnitTag {
            class: PoolClass::NonBlocking,
            ..
        })
    )
}

/// Guarded `std::thread::sleep`.
pub fn sleep(duration: Duration) {
    enforce("std::thread::sleep");
    std::thread::sleep(duration);
}

/// Guarded `std::thread::park_timeout`.
pub fn park_timeout(duration: Duration) {
    enforce("std::thread::park_timeout");
    std::thread::park_timeout(duration);
}

/// Runs a blocking I/O operation after checking the current unit.
pub fn blocking_io<T>(call_site: &str, operation: impl FnOnce() -> T) -> T {
    enforce(call_site);
    operation()
}
