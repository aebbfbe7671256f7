//! Branch verification, switching and restoration

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::process::{Invocation, ProcessRunner};

/// A branch name and its filesystem-safe form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchRef {
    name: String,
    sanitized: String,
}

impl BranchRef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let sanitized = sanitize_branch_name(&name);
        Self { name, sanitized }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory component for this branch
    pub fn sanitized(&self) -> &str {
        &self.sanitized
    }
}

impl std::fmt::Display for BranchRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Replace path separators so a branch name is a single path component
pub fn sanitize_branch_name(name: &str) -> String {
    name.replace(['/', '\\'], "__")
}

/// Repository state at the moment the run started
#[derive(Debug, Clone)]
pub struct OriginalState {
    pub branch: String,
    /// `git status --porcelain` entries
    pub dirty_files: Vec<String>,
}

impl OriginalState {
    pub fn is_clean(&self) -> bool {
        self.dirty_files.is_empty()
    }
}

/// Git operations for one working tree
#[derive(Debug, Clone)]
pub struct BranchController {
    runner: ProcessRunner,
}

impl BranchController {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }

    fn git(args: &[&str]) -> Invocation {
        Invocation::new("git", args.iter().map(|a| a.to_string()).collect())
    }

    /// Whether the working directory is inside a git work tree
    pub async fn is_repository(&self) -> Result<bool> {
        match self
            .runner
            .output(&Self::git(&["rev-parse", "--is-inside-work-tree"]))
            .await
        {
            Ok(stdout) => Ok(stdout.trim() == "true"),
            Err(Error::Process { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Name of the checked-out branch
    pub async fn current_branch(&self) -> Result<String> {
        let stdout = self
            .runner
            .output(&Self::git(&["symbolic-ref", "--quiet", "--short", "HEAD"]))
            .await
            .map_err(|e| match e {
                Error::Process { .. } => {
                    Error::Precondition("Failed to detect current branch.".to_string())
                }
                other => other,
            })?;

        let branch = stdout.trim();
        if branch.is_empty() {
            return Err(Error::Precondition(
                "Failed to detect current branch.".to_string(),
            ));
        }
        Ok(branch.to_string())
    }

    /// Modified, staged and untracked entries
    pub async fn dirty_files(&self) -> Result<Vec<String>> {
        let stdout = self
            .runner
            .output(&Self::git(&["status", "--porcelain"]))
            .await?;

        Ok(stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(String::from)
            .collect())
    }

    /// Capture the branch and cleanliness of the working tree
    pub async fn inspect(&self) -> Result<OriginalState> {
        let branch = self.current_branch().await?;
        let dirty_files = self.dirty_files().await?;
        Ok(OriginalState {
            branch,
            dirty_files,
        })
    }

    /// Fail with [`Error::UnknownBranch`] unless `branch` resolves to a commit
    pub async fn ensure_exists(&self, branch: &str) -> Result<()> {
        if branch.is_empty() || branch.starts_with('-') {
            return Err(Error::UnknownBranch(branch.to_string()));
        }

        let rev = format!("{}^{{commit}}", branch);
        match self
            .runner
            .output(&Self::git(&["rev-parse", "--verify", "--quiet", rev.as_str()]))
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Process { .. }) => Err(Error::UnknownBranch(branch.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Switch the working tree to `branch`
    pub async fn checkout(&self, branch: &str) -> Result<()> {
        info!("Checking out {}", branch);
        self.runner
            .run(&Self::git(&["checkout", branch, "--"]))
            .await
            .map_err(|e| Error::Checkout {
                branch: branch.to_string(),
                source: Box::new(e),
            })
    }

    /// Return to `original` if the working tree is elsewhere.
    ///
    /// Failures are logged and swallowed so they never replace the run's own
    /// error.
    pub async fn restore(&self, original: &str) {
        match self.current_branch().await {
            Ok(current) if current == original => {
                debug!("Already on {}, nothing to restore", original);
                return;
            }
            Ok(current) => info!("Restoring branch {} (currently on {})", original, current),
            Err(e) => warn!("Could not read current branch before restore: {}", e),
        }

        if let Err(e) = self.checkout(original).await {
            error!("Failed to restore branch {}: {}", original, e);
        }
    }

    /// Synchronous restore for drop paths where nothing can be awaited
    fn restore_blocking(&self, original: &str) {
        let current = std::process::Command::new("git")
            .args(["symbolic-ref", "--quiet", "--short", "HEAD"])
            .current_dir(self.runner.cwd())
            .output();

        if let Ok(output) = &current {
            let branch = String::from_utf8_lossy(&output.stdout);
            if output.status.success() && branch.trim() == original {
                return;
            }
        }

        warn!("Restoring branch {} during unwind", original);
        let status = std::process::Command::new("git")
            .args(["checkout", original, "--"])
            .current_dir(self.runner.cwd())
            .status();

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => error!("git checkout {} exited with {}", original, status),
            Err(e) => error!("Failed to run git checkout {}: {}", original, e),
        }
    }

    /// Guard that puts `original` back when released or dropped
    pub fn guard(&self, original: impl Into<String>) -> BranchGuard<'_> {
        BranchGuard {
            git: self,
            original: original.into(),
            armed: true,
        }
    }
}

/// Restores the original branch on every exit path.
///
/// Call [`BranchGuard::release`] on normal paths; if the guard is dropped
/// without it (panic, cancelled future) the restore runs synchronously.
pub struct BranchGuard<'a> {
    git: &'a BranchController,
    original: String,
    armed: bool,
}

impl BranchGuard<'_> {
    pub fn original(&self) -> &str {
        &self.original
    }

    pub async fn release(mut self) {
        self.armed = false;
        self.git.restore(&self.original).await;
    }
}

impl Drop for BranchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.git.restore_blocking(&self.original);
        }
    }
}
