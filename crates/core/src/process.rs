//! External process execution
//!
//! Every subprocess lsvrt starts (git, the preview server, the capture tool,
//! the diff backend, the report opener) goes through [`ProcessRunner`], which
//! maps launch errors to [`Error::Spawn`] and non-zero exits to
//! [`Error::Process`].

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Error, Result};

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Program name as shown in error messages
    pub fn command_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Full command line for logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command_name()
        } else {
            format!("{} {}", self.command_name(), self.args.join(" "))
        }
    }

    fn failure(&self, code: Option<i32>) -> Error {
        Error::Process {
            command: self.command_name(),
            args: self.args.clone(),
            code,
        }
    }

    fn spawn_failure(&self, source: std::io::Error) -> Error {
        Error::Spawn {
            command: self.command_name(),
            source,
        }
    }
}

/// What a child does with its standard streams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioMode {
    /// Share the terminal, input included, so the user sees live output
    #[default]
    Inherit,
    /// Discard all output
    Null,
}

impl StdioMode {
    fn stdio(self) -> Stdio {
        match self {
            StdioMode::Inherit => Stdio::inherit(),
            StdioMode::Null => Stdio::null(),
        }
    }
}

/// Runs commands inside the run's working directory
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cwd: PathBuf,
}

impl ProcessRunner {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn command(&self, invocation: &Invocation, stdio: StdioMode) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&self.cwd)
            .stdin(stdio.stdio())
            .stdout(stdio.stdio())
            .stderr(stdio.stdio())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion with inherited stdio, failing on non-zero exit
    pub async fn run(&self, invocation: &Invocation) -> Result<()> {
        self.run_with(invocation, StdioMode::Inherit).await
    }

    pub async fn run_with(&self, invocation: &Invocation, stdio: StdioMode) -> Result<()> {
        debug!("Running: {}", invocation.display());

        let status = self
            .command(invocation, stdio)
            .status()
            .await
            .map_err(|e| invocation.spawn_failure(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(invocation.failure(status.code()))
        }
    }

    /// Run to completion and return captured stdout
    pub async fn output(&self, invocation: &Invocation) -> Result<String> {
        debug!("Running (captured): {}", invocation.display());

        let output = self
            .command(invocation, StdioMode::Null)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| invocation.spawn_failure(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                debug!("{} stderr: {}", invocation.command_name(), stderr.trim());
            }
            return Err(invocation.failure(output.status.code()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Start a long-running child with inherited stdio.
    ///
    /// The child is killed if its handle is dropped without being awaited.
    pub fn spawn(&self, invocation: &Invocation) -> Result<Child> {
        debug!("Spawning: {}", invocation.display());

        self.command(invocation, StdioMode::Inherit)
            .spawn()
            .map_err(|e| invocation.spawn_failure(e))
    }
}
