//! Per-branch capture: preview server up, screenshots taken, server down

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::git::{BranchController, BranchRef};
use crate::interrupt::{checkpoint, interruptible};
use crate::probe::ReadinessProber;
use crate::process::{Invocation, ProcessRunner};
use crate::resolver::BinResolver;

/// Capture tool executable
pub const CAPTURE_TOOL: &str = "storycap";

/// How long a preview server gets to exit after SIGTERM
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Progress of a single branch capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    ServerStarting,
    ServerReady,
    Capturing,
    ServerStopping,
    Done,
}

impl std::fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CapturePhase::Idle => "idle",
            CapturePhase::ServerStarting => "server-starting",
            CapturePhase::ServerReady => "server-ready",
            CapturePhase::Capturing => "capturing",
            CapturePhase::ServerStopping => "server-stopping",
            CapturePhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of capturing one branch
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutput {
    pub branch: BranchRef,
    pub dir: PathBuf,
    /// Files written by the capture tool
    pub image_count: usize,
}

/// Handle to a running preview server.
///
/// Dropping the handle without calling [`PreviewServer::stop`] kills the
/// process outright.
pub struct PreviewServer {
    child: Option<Child>,
    port: u16,
}

impl PreviewServer {
    /// Spawn the configured server command on the configured port
    pub fn start(
        config: &RunConfig,
        runner: &ProcessRunner,
        resolver: &BinResolver,
    ) -> Result<Self> {
        let invocation = server_invocation(config, resolver);
        info!("Starting preview server: {}", invocation.display());

        let child = runner.spawn(&invocation)?;
        if let Some(pid) = child.id() {
            debug!("Preview server pid {}", pid);
        }

        Ok(Self {
            child: Some(child),
            port: config.port,
        })
    }

    /// Send SIGTERM and wait for the process to exit, killing it if it
    /// outlives the grace period. Exit status is ignored.
    pub async fn stop(mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        info!("Stopping preview server on port {}", self.port);
        terminate(&mut child);

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("Preview server exited with {}", status),
            Ok(Err(e)) => warn!("Failed to wait for preview server: {}", e),
            Err(_) => {
                warn!("Preview server ignored SIGTERM, killing it");
                let _ = child.kill().await;
            }
        }
    }
}

impl Drop for PreviewServer {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to kill preview server: {}", e);
    }
}

/// Preview server command line with port and CI flags
pub fn server_invocation(config: &RunConfig, resolver: &BinResolver) -> Invocation {
    let (program, rest) = match config.server_command.split_first() {
        Some((program, rest)) => (program.as_str(), rest.to_vec()),
        None => ("storybook", vec!["dev".to_string()]),
    };

    let mut args = rest;
    args.extend([
        "-p".to_string(),
        config.port.to_string(),
        "--disable-telemetry".to_string(),
        "--ci".to_string(),
    ]);
    resolver.command_invocation(program, args)
}

/// Capture tool command line for one output directory
pub fn capture_invocation(
    config: &RunConfig,
    resolver: &BinResolver,
    out_dir: &Path,
) -> Invocation {
    let mut args = vec![
        config.server_url(),
        "--outDir".to_string(),
        out_dir.display().to_string(),
    ];
    args.extend(config.capture_args.iter().cloned());
    resolver.tool_invocation(CAPTURE_TOOL, args)
}

/// Runs the capture state machine for one branch at a time
pub struct CaptureStage<'a> {
    pub config: &'a RunConfig,
    pub runner: &'a ProcessRunner,
    pub resolver: &'a BinResolver,
    pub prober: &'a ReadinessProber,
    pub git: &'a BranchController,
    pub cancel: &'a CancellationToken,
}

impl CaptureStage<'_> {
    /// Capture `branch`, checking it out first when `checkout` is set.
    ///
    /// On cancellation the checkout is allowed to finish, and a started
    /// preview server is still stopped and awaited before returning.
    pub async fn capture(&self, branch: &BranchRef, checkout: bool) -> Result<CaptureOutput> {
        let mut phase = CapturePhase::Idle;
        checkpoint(self.cancel)?;
        info!("Capturing branch {}", branch);

        if checkout {
            self.git.checkout(branch.name()).await?;
            checkpoint(self.cancel)?;
        }

        let dir = self.config.capture_dir(branch.sanitized());
        reset_dir(&dir).await?;

        advance(&mut phase, CapturePhase::ServerStarting, branch);
        let server = PreviewServer::start(self.config, self.runner, self.resolver).map_err(|e| {
            Error::ServerStart {
                branch: branch.name().to_string(),
                source: Box::new(e),
            }
        })?;

        let outcome = self.capture_with_server(branch, &dir, &mut phase).await;

        advance(&mut phase, CapturePhase::ServerStopping, branch);
        server.stop().await;

        outcome?;
        advance(&mut phase, CapturePhase::Done, branch);

        let image_count = count_files(&dir);
        info!("Captured {} file(s) for {} into {}", image_count, branch, dir.display());
        Ok(CaptureOutput {
            branch: branch.clone(),
            dir,
            image_count,
        })
    }

    async fn capture_with_server(
        &self,
        branch: &BranchRef,
        dir: &Path,
        phase: &mut CapturePhase,
    ) -> Result<()> {
        let ready = async {
            self.prober
                .wait_until_ready(self.config.port, self.config.ready_timeout)
                .await
                .map_err(|e| Error::ServerStart {
                    branch: branch.name().to_string(),
                    source: Box::new(e),
                })
        };
        interruptible(self.cancel, ready).await?;
        advance(phase, CapturePhase::ServerReady, branch);

        advance(phase, CapturePhase::Capturing, branch);
        let invocation = capture_invocation(self.config, self.resolver, dir);
        let captured = async {
            self.runner
                .run(&invocation)
                .await
                .map_err(|e| Error::Capture {
                    branch: branch.name().to_string(),
                    source: Box::new(e),
                })
        };
        interruptible(self.cancel, captured).await
    }
}

fn advance(phase: &mut CapturePhase, next: CapturePhase, branch: &BranchRef) {
    debug!("[{}] {} -> {}", branch, phase, next);
    *phase = next;
}

/// Delete `dir` if present and recreate it empty
pub(crate) async fn reset_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

pub(crate) fn count_files(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}
