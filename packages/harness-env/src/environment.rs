//! Environment lifecycle.
//!
//! ```text
//! Starting --probe ok--> Ready --restart()--> Restarting --probe ok--> Ready
//!     |                    |                      |
//!     +--exit/timeout--> Failed                   +--exit/timeout--> Failed
//!                          +--stop()/drop--> Stopped
//! ```
//!
//! Every launch binds a freshly allocated host port. The generation counter
//! moves on restart and stop, which invalidates outstanding endpoints.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use harness_core::{guard, Error, Result};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ProvisionOptions;
use crate::endpoint::ConnectionEndpoint;
use crate::image::{ImageSpec, LaunchCommand, LaunchContext};
use crate::probe::ReadinessProbe;

const STDERR_TAIL_LINES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Starting,
    Ready,
    Restarting,
    Stopped,
    Failed,
}

/// A running backing store owned by one suite.
///
/// Lifecycle calls block and are guarded: calling them from a non-blocking
/// execution unit is a violation. Dropping the environment tears it down.
pub struct Environment {
    name: String,
    spec: ImageSpec,
    probe: Box<dyn ReadinessProbe>,
    options: ProvisionOptions,
    state: EnvState,
    restart_count: u32,
    generation: watch::Sender<u64>,
    instance: Mutex<Option<Instance>>,
    volume: Option<TempDir>,
}

struct Instance {
    child: Child,
    port: u16,
    container_name: String,
    lifeline: Option<ChildStdin>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl Environment {
    /// Launches the store and blocks until its readiness probe passes.
    pub fn start(
        name: impl Into<String>,
        spec: ImageSpec,
        probe: impl ReadinessProbe + 'static,
        options: ProvisionOptions,
    ) -> Result<Self> {
        guard::enforce("Environment::start");
        let name = name.into();

        let volume = if options.persistent_volume {
            let dir = tempfile::Builder::new()
                .prefix(&format!("{}-volume-", sanitize(&name)))
                .tempdir()
                .map_err(|e| Error::ProvisionFailure {
                    environment: name.clone(),
                    reason: format!("Failed to create volume: {}", e),
                    stderr_tail: Vec::new(),
                })?;
            Some(dir)
        } else {
            None
        };

        let (generation, _) = watch::channel(0);
        let mut env = Self {
            name,
            spec,
            probe: Box::new(probe),
            options,
            state: EnvState::Starting,
            restart_count: 0,
            generation,
            instance: Mutex::new(None),
            volume,
        };

        info!(
            environment = %env.name,
            image = %env.spec.image,
            probe = %env.probe.describe(),
            "Provisioning environment"
        );
        env.launch_until_ready()?;
        Ok(env)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EnvState {
        self.state
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    pub fn volume_path(&self) -> Option<&Path> {
        self.volume.as_ref().map(TempDir::path)
    }

    pub fn pid(&self) -> Option<u32> {
        self.instance.lock().as_ref().map(|i| i.child.id())
    }

    /// True while Ready and the launched process has not exited.
    pub fn is_running(&self) -> bool {
        if self.state != EnvState::Ready {
            return false;
        }
        match self.instance.lock().as_mut() {
            Some(instance) => matches!(instance.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Address of the current generation. Only available while Ready.
    pub fn endpoint(&self) -> Result<ConnectionEndpoint> {
        let port = match (self.state, self.instance.lock().as_ref()) {
            (EnvState::Ready, Some(instance)) => instance.port,
            (state, _) => {
                return Err(Error::ProvisionFailure {
                    environment: self.name.clone(),
                    reason: format!("No endpoint while {:?}", state),
                    stderr_tail: Vec::new(),
                })
            }
        };
        Ok(self.endpoint_at(port))
    }

    /// Last lines the store wrote to stderr.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.instance
            .lock()
            .as_ref()
            .map(|i| i.stderr_tail.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Stops the store, relaunches it on a new port and blocks until ready.
    ///
    /// Endpoints issued before the call become stale. Data survives only when
    /// the environment has a persistent volume.
    pub fn restart(&mut self) -> Result<ConnectionEndpoint> {
        guard::enforce("Environment::restart");
        if self.state != EnvState::Ready {
            return Err(Error::ProvisionFailure {
                environment: self.name.clone(),
                reason: format!("Cannot restart while {:?}", self.state),
                stderr_tail: Vec::new(),
            });
        }

        self.state = EnvState::Restarting;
        let generation = self.advance_generation();
        info!(environment = %self.name, generation, "Restarting environment");

        self.teardown_instance();
        self.restart_count += 1;
        self.launch_until_ready()?;
        self.endpoint()
    }

    /// Tears the store down. Idempotent.
    pub fn stop(&mut self) {
        guard::enforce("Environment::stop");
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.state == EnvState::Stopped {
            return;
        }
        self.advance_generation();
        self.teardown_instance();
        if let Some(volume) = self.volume.take() {
            let path = volume.path().display().to_string();
            if let Err(e) = volume.close() {
                warn!(environment = %self.name, path = %path, "Failed to remove volume: {}", e);
            }
        }
        self.state = EnvState::Stopped;
        info!(environment = %self.name, "Environment stopped");
    }

    fn advance_generation(&self) -> u64 {
        self.generation.send_modify(|g| *g += 1);
        *self.generation.borrow()
    }

    fn endpoint_at(&self, port: u16) -> ConnectionEndpoint {
        ConnectionEndpoint::new(
            self.options.host.clone(),
            port,
            self.options.credentials.clone(),
            self.generation.subscribe(),
        )
    }

    fn launch_until_ready(&mut self) -> Result<()> {
        let started = Instant::now();
        let outcome = self.launch().and_then(|port| self.await_ready(port));
        match outcome {
            Ok(()) => {
                self.state = EnvState::Ready;
                info!(
                    environment = %self.name,
                    generation = self.generation(),
                    pid = self.pid(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Environment ready"
                );
                Ok(())
            }
            Err(err) => {
                self.state = EnvState::Failed;
                warn!(environment = %self.name, "Provisioning failed: {}", err);
                self.teardown_instance();
                Err(err)
            }
        }
    }

    fn launch(&mut self) -> Result<u16> {
        let port = allocate_port(&self.options.host).map_err(|e| self.failure(e, Vec::new()))?;
        let container_name = self.container_name();
        let command = self.spec.render(&LaunchContext {
            host: &self.options.host,
            port,
            name: &container_name,
            volume: self.volume_path(),
            credentials: self.options.credentials.as_ref(),
        });

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .stdin(if self.options.lifeline {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = guard::blocking_io("Command::spawn", || process.spawn()).map_err(|e| {
            self.failure(
                format!("Failed to spawn {}: {}", command.program.display(), e),
                Vec::new(),
            )
        })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            let environment = self.name.clone();
            let reader = std::thread::Builder::new()
                .name(format!("{}-stderr", sanitize(&self.name)))
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                        debug!(target: "harness_env::store", environment = %environment, "{}", line);
                        let mut tail = tail.lock();
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                });
            if let Err(e) = reader {
                warn!(environment = %self.name, "Failed to start stderr reader: {}", e);
            }
        }

        info!(
            environment = %self.name,
            pid = child.id(),
            port,
            program = %command.program.display(),
            "Launched store process"
        );
        *self.instance.lock() = Some(Instance {
            lifeline: child.stdin.take(),
            child,
            port,
            container_name,
            stderr_tail,
        });
        Ok(port)
    }

    fn await_ready(&self, port: u16) -> Result<()> {
        let endpoint = self.endpoint_at(port);
        let deadline = Instant::now() + self.options.startup_timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(status) = self.exit_status() {
                // let the reader drain what the process wrote before exiting
                guard::sleep(Duration::from_millis(50));
                return Err(self.failure(
                    format!("Store exited with {} before becoming ready", status),
                    self.stderr_tail(),
                ));
            }

            match self.probe.probe(&endpoint) {
                Ok(()) => {
                    debug!(environment = %self.name, attempts, "Readiness probe passed");
                    return Ok(());
                }
                Err(reason) => {
                    debug!(environment = %self.name, attempts, reason = %reason, "Readiness probe failed")
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ProvisionTimeout {
                    environment: self.name.clone(),
                    waited: self.options.startup_timeout,
                });
            }
            guard::sleep(self.options.probe_interval.min(deadline - now));
        }
    }

    fn exit_status(&self) -> Option<std::process::ExitStatus> {
        self.instance
            .lock()
            .as_mut()
            .and_then(|i| i.child.try_wait().ok().flatten())
    }

    fn teardown_instance(&mut self) {
        let Some(mut instance) = self.instance.lock().take() else {
            return;
        };

        // closing stdin asks a lifeline-aware store to exit on its own
        if instance.lifeline.take().is_some() {
            let deadline = Instant::now() + self.options.shutdown_grace;
            while matches!(instance.child.try_wait(), Ok(None)) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        if matches!(instance.child.try_wait(), Ok(None)) {
            if let Err(e) = instance.child.kill() {
                warn!(environment = %self.name, "Failed to kill store process: {}", e);
            }
        }
        match instance.child.wait() {
            Ok(status) => debug!(environment = %self.name, port = instance.port, %status, "Store process exited"),
            Err(e) => warn!(environment = %self.name, "Failed to reap store process: {}", e),
        }

        let teardown = self.spec.render_teardown(&LaunchContext {
            host: &self.options.host,
            port: instance.port,
            name: &instance.container_name,
            volume: self.volume_path(),
            credentials: self.options.credentials.as_ref(),
        });
        if let Some(command) = teardown {
            run_teardown(&self.name, &command);
        }
    }

    fn container_name(&self) -> String {
        format!(
            "{}-{}-{}",
            sanitize(&self.name),
            std::process::id(),
            self.generation()
        )
    }

    fn failure(&self, reason: impl ToString, stderr_tail: Vec<String>) -> Error {
        Error::ProvisionFailure {
            environment: self.name.clone(),
            reason: reason.to_string(),
            stderr_tail,
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("image", &self.spec.image)
            .field("state", &self.state)
            .field("generation", &self.generation())
            .field("restart_count", &self.restart_count)
            .finish()
    }
}

/// Asks the OS for a free port on `host`.
fn allocate_port(host: &str) -> std::io::Result<u16> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

fn run_teardown(environment: &str, command: &LaunchCommand) {
    let status = Command::new(&command.program)
        .args(&command.args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(environment, %status, "Teardown command failed"),
        Err(e) => warn!(environment, "Failed to run teardown command: {}", e),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}
