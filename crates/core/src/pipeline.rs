//! Top-level run sequence
//!
//! ```text
//! preflight (no branch mutation)
//!   ├── inside a git work tree?
//!   ├── current branch detectable, working tree clean?
//!   └── target branch resolvable?
//! guarded by BranchGuard (original branch restored on every exit path)
//!   ├── required binaries on base, then on target (temporary checkout)
//!   ├── capture base   (no checkout)
//!   ├── capture target (checkout)
//!   ├── diff backend
//!   ├── summary.json
//!   └── open report (best effort)
//! ```
//!
//! An interruption cancels the run's token; the guarded section then stops
//! at its next safe point (see [`crate::interrupt`]) before the branch is
//! restored.

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::CaptureStage;
use crate::config::RunConfig;
use crate::diff::{backend_for, required_binaries};
use crate::error::{Error, Result};
use crate::git::{BranchController, BranchRef};
use crate::interrupt::{checkpoint, interruptible};
use crate::probe::ReadinessProber;
use crate::process::ProcessRunner;
use crate::report::{open_report, RunSummary};
use crate::resolver::BinResolver;

/// Result of a successful run
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub report_opened: bool,
}

pub struct Pipeline {
    config: RunConfig,
    runner: ProcessRunner,
    resolver: BinResolver,
    prober: ReadinessProber,
    git: BranchController,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Result<Self> {
        let resolver = BinResolver::new(&config.workdir);
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(config: RunConfig, resolver: BinResolver) -> Result<Self> {
        let runner = ProcessRunner::new(config.workdir.clone());
        let prober = ReadinessProber::new(config.probe_interval)?;
        let git = BranchController::new(runner.clone());

        Ok(Self {
            config,
            runner,
            resolver,
            prober,
            git,
        })
    }

    /// Run against `target`, treating ctrl-c as an interruption
    pub async fn run(&self, target: &str) -> Result<RunOutcome> {
        self.run_until(target, async {
            if tokio::signal::ctrl_c().await.is_err() {
                // no signal handler available; never interrupt
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run against `target` until completion or until `shutdown` resolves
    pub async fn run_until<F>(&self, target: &str, shutdown: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        let base = self.preflight(target).await?;
        let target = BranchRef::new(target);
        info!("Comparing {} (base) with {} (target)", base, target);

        let guard = self.git.guard(base.name());
        let cancel = CancellationToken::new();

        let work = self.guarded(&base, &target, &cancel);
        tokio::pin!(work);
        tokio::pin!(shutdown);

        let outcome = tokio::select! {
            result = &mut work => result,
            _ = &mut shutdown => {
                warn!("Interrupted, finishing the current step before cleanup");
                cancel.cancel();
                work.await
            }
        };

        guard.release().await;
        outcome
    }

    /// Checks that abort the run before any branch is touched
    async fn preflight(&self, target: &str) -> Result<BranchRef> {
        if !self.git.is_repository().await? {
            return Err(Error::Precondition(
                "Please run this command inside a git repository.".to_string(),
            ));
        }

        let state = self.git.inspect().await?;
        if !state.is_clean() {
            if self.config.allow_dirty {
                warn!(
                    "Uncommitted changes detected ({} entries); continuing because \
                     dirty runs are allowed",
                    state.dirty_files.len()
                );
            } else {
                return Err(Error::Precondition(format!(
                    "Uncommitted changes detected ({} entries). \
                     Please commit or stash before running.",
                    state.dirty_files.len()
                )));
            }
        }

        self.git.ensure_exists(target).await?;
        Ok(BranchRef::new(state.branch))
    }

    async fn guarded(
        &self,
        base: &BranchRef,
        target: &BranchRef,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        self.ensure_binaries_for_branches(base, target).await?;
        checkpoint(cancel)?;
        self.execute(base, target, cancel).await
    }

    fn ensure_required_binaries(&self, context: &str) -> Result<()> {
        let required = required_binaries(self.config.backend);
        let missing = self.resolver.missing(&required);
        if missing.is_empty() {
            return Ok(());
        }

        Err(Error::Precondition(format!(
            "Required CLI binaries not found ({}): {}\n\
             Searched node_modules/.bin from the current directory upward \
             and within the lsvrt installation.\n\
             In monorepos, install dependencies at the workspace root and try again.",
            context,
            missing.join(", ")
        )))
    }

    /// Both branches must have the tools installed; the target is checked
    /// on a temporary checkout
    async fn ensure_binaries_for_branches(
        &self,
        base: &BranchRef,
        target: &BranchRef,
    ) -> Result<()> {
        self.ensure_required_binaries(&format!("branch {}", base))?;
        if target.name() == base.name() {
            return Ok(());
        }

        self.git.checkout(target.name()).await?;
        let checked = self.ensure_required_binaries(&format!("branch {}", target));
        let returned = self.git.checkout(base.name()).await;
        checked?;
        returned
    }

    async fn execute(
        &self,
        base: &BranchRef,
        target: &BranchRef,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();

        tokio::fs::create_dir_all(self.config.capture_root()).await?;
        tokio::fs::create_dir_all(self.config.diff_workspace()).await?;

        let stage = CaptureStage {
            config: &self.config,
            runner: &self.runner,
            resolver: &self.resolver,
            prober: &self.prober,
            git: &self.git,
            cancel,
        };
        let base_capture = stage.capture(base, false).await?;
        let target_capture = stage.capture(target, true).await?;

        checkpoint(cancel)?;
        let backend = backend_for(&self.config, &self.runner, &self.resolver);
        let workspace = self.config.diff_workspace();
        let report_path = interruptible(
            cancel,
            backend.run_diff(&base_capture.dir, &target_capture.dir, &workspace),
        )
        .await?;

        match &report_path {
            Some(path) => info!("{} completed, report at {}", backend.name(), path.display()),
            None => info!("{} completed without an HTML report", backend.name()),
        }

        let summary = RunSummary {
            base: base_capture,
            target: target_capture,
            backend: backend.name(),
            report_path,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        summary.write(&self.config.summary_path())?;

        let report_opened = match (&summary.report_path, self.config.open_report) {
            (Some(path), true) => open_report(&self.runner, path).await,
            _ => false,
        };

        Ok(RunOutcome {
            summary,
            report_opened,
        })
    }
}
