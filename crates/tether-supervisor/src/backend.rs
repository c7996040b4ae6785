//! Backend process supervision.
//!
//! `spawn` starts the backend with only its stderr forwarded, then polls the
//! health endpoint until it answers or the startup deadline passes. An exit
//! watcher task owns the child: it clears the handle when the process exits
//! on its own (no automatic respawn) and performs the force kill when `stop`
//! runs out of grace.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_settings::SupervisorSettings;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SupervisorError};
use crate::health::{probe, wait_until_healthy};

struct RunningBackend {
    generation: u64,
    pid: Option<u32>,
    kill: oneshot::Sender<()>,
    exited: watch::Receiver<bool>,
}

/// Clears the restart flag when a restart ends, however it ends.
struct RestartGuard<'a>(&'a AtomicBool);

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Spawns, health-checks, stops, and restarts the backend process.
pub struct BackendSupervisor {
    settings: SupervisorSettings,
    base_url: String,
    client: reqwest::Client,
    running: Arc<Mutex<Option<RunningBackend>>>,
    healthy: Arc<AtomicBool>,
    restarting: AtomicBool,
    generation: AtomicU64,
    ops: tokio::sync::Mutex<()>,
}

impl BackendSupervisor {
    /// Supervisor for a backend reachable at `base_url`.
    pub fn new(settings: SupervisorSettings, base_url: impl Into<String>) -> Self {
        Self {
            settings,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            running: Arc::new(Mutex::new(None)),
            healthy: Arc::new(AtomicBool::new(false)),
            restarting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    /// Backend base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full health probe URL.
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.settings.health_path)
    }

    /// Whether a backend process handle is held.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Whether the last startup probe succeeded and the process has not
    /// exited since.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Pid of the running backend.
    pub fn pid(&self) -> Option<u32> {
        self.running.lock().as_ref().and_then(|b| b.pid)
    }

    /// Probe the health endpoint once.
    pub async fn check_health(&self) -> bool {
        probe(&self.client, &self.health_url()).await
    }

    /// Start the backend and wait until it is healthy. A no-op when a
    /// backend is already running. On failure no handle is retained.
    pub async fn spawn(&self) -> Result<()> {
        let _ops = self.ops.lock().await;
        self.spawn_locked().await
    }

    /// Stop the backend: SIGTERM, then a force kill after the grace period.
    /// Resolves once the process is gone.
    pub async fn stop(&self) -> Result<()> {
        let _ops = self.ops.lock().await;
        self.stop_locked().await;
        Ok(())
    }

    /// Stop then spawn. A second call while one is running fails with
    /// [`SupervisorError::RestartInProgress`].
    pub async fn restart(&self) -> Result<()> {
        if self.restarting.swap(true, Ordering::SeqCst) {
            warn!("restart rejected, one is already running");
            return Err(SupervisorError::RestartInProgress);
        }
        let _guard = RestartGuard(&self.restarting);
        let _ops = self.ops.lock().await;
        info!("restarting backend");
        self.stop_locked().await;
        self.spawn_locked().await
    }

    fn program(&self) -> Result<PathBuf> {
        if self.settings.backend_command.is_empty() {
            std::env::current_exe().map_err(|source| SupervisorError::Spawn {
                command: "<current executable>".to_string(),
                source,
            })
        } else {
            Ok(PathBuf::from(&self.settings.backend_command))
        }
    }

    async fn spawn_locked(&self) -> Result<()> {
        if self.is_running() {
            debug!("backend already running");
            return Ok(());
        }

        let program = self.program()?;
        let child = Command::new(&program)
            .args(&self.settings.backend_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: program.display().to_string(),
                source,
            })?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, mut exited) = watch::channel(false);
        *self.running.lock() = Some(RunningBackend {
            generation,
            pid,
            kill: kill_tx,
            exited: exited.clone(),
        });
        self.watch_exit(child, generation, kill_rx, exited_tx);
        info!(pid, program = %program.display(), "backend spawned");

        let url = self.health_url();
        let startup = tokio::select! {
            res = wait_until_healthy(
                &self.client,
                &url,
                Duration::from_millis(self.settings.health_interval_ms),
                Duration::from_millis(self.settings.startup_timeout_ms),
            ) => res,
            () = wait_exited(&mut exited) => {
                Err(SupervisorError::ExitedDuringStartup(format!("pid {pid:?} exited before {url} answered")))
            }
        };

        match startup {
            Ok(()) => {
                self.healthy.store(true, Ordering::SeqCst);
                info!(pid, url = %url, "backend healthy");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "backend failed to start");
                self.stop_locked().await;
                Err(e)
            }
        }
    }

    async fn stop_locked(&self) {
        self.healthy.store(false, Ordering::SeqCst);
        let taken = self.running.lock().take();
        let Some(backend) = taken else {
            debug!("no backend to stop");
            return;
        };
        let RunningBackend {
            pid, kill, mut exited, ..
        } = backend;
        info!(pid, "stopping backend");

        let signalled = match pid {
            Some(pid) => match terminate(pid) {
                Ok(()) => true,
                Err(e) => {
                    warn!(pid, error = %e, "graceful termination failed");
                    false
                }
            },
            None => false,
        };

        let grace = Duration::from_millis(self.settings.stop_grace_ms);
        if signalled && tokio::time::timeout(grace, wait_exited(&mut exited)).await.is_ok() {
            info!(pid, "backend stopped");
            return;
        }

        warn!(pid, "backend still running, killing");
        let _ = kill.send(());
        wait_exited(&mut exited).await;
        info!(pid, "backend killed");
    }

    fn watch_exit(
        &self,
        mut child: Child,
        generation: u64,
        mut kill: oneshot::Receiver<()>,
        exited: watch::Sender<bool>,
    ) {
        let running = Arc::clone(&self.running);
        let healthy = Arc::clone(&self.healthy);
        drop(tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                Ok(()) = &mut kill => None,
            };
            let status = match waited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "force kill failed");
                    }
                    child.wait().await
                }
            };

            let unexpected = {
                let mut running = running.lock();
                if running.as_ref().is_some_and(|b| b.generation == generation) {
                    *running = None;
                    true
                } else {
                    false
                }
            };
            if unexpected {
                healthy.store(false, Ordering::SeqCst);
                error!(status = %describe(&status), "backend exited unexpectedly, not respawning");
            } else {
                debug!(status = %describe(&status), "backend exited");
            }
            let _ = exited.send(true);
        }));
    }
}

/// Resolves once the exit watcher has reaped the process.
async fn wait_exited(exited: &mut watch::Receiver<bool>) {
    let _ = exited.wait_for(|gone| *gone).await;
}

fn describe(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(s) => s.to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> std::io::Result<()> {
    use rustix::process::{Pid, Signal, kill_process};

    let pid = i32::try_from(pid)
        .ok()
        .and_then(Pid::from_raw)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid pid"))?;
    kill_process(pid, Signal::TERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "graceful termination is unix-only",
    ))
}

impl Drop for BackendSupervisor {
    /// Hands a still-running backend to its exit watcher for a force kill,
    /// so the child does not outlive the supervisor.
    fn drop(&mut self) {
        let taken = self.running.lock().take();
        if let Some(backend) = taken {
            warn!(pid = backend.pid, "supervisor dropped with a running backend, killing it");
            let _ = backend.kill.send(());
        }
    }
}

impl std::fmt::Debug for BackendSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSupervisor")
            .field("base_url", &self.base_url)
            .field("pid", &self.pid())
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}
