//! Diff backends comparing two capture directories
//!
//! A backend succeeds whenever its tool exits 0, whether or not any images
//! differ; differences are the report's business.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::capture::{reset_dir, CAPTURE_TOOL};
use crate::config::{DiffBackendKind, RunConfig};
use crate::error::{Error, Result};
use crate::process::{Invocation, ProcessRunner};
use crate::resolver::BinResolver;

/// File name of the HTML report inside the diff workspace
pub const REPORT_FILE: &str = "index.html";

#[async_trait]
pub trait DiffBackend: Send + Sync {
    /// Tool name, used in logs and errors
    fn name(&self) -> &'static str;

    /// Compare `base_dir` against `target_dir`, writing artifacts into
    /// `workspace`. Returns the report path if the tool produced one.
    async fn run_diff(
        &self,
        base_dir: &Path,
        target_dir: &Path,
        workspace: &Path,
    ) -> Result<Option<PathBuf>>;
}

/// Tools that must be installed locally for a run with `kind`
pub fn required_binaries(kind: DiffBackendKind) -> [&'static str; 2] {
    [CAPTURE_TOOL, kind.binary()]
}

/// Build the backend selected in `config`
pub fn backend_for(
    config: &RunConfig,
    runner: &ProcessRunner,
    resolver: &BinResolver,
) -> Box<dyn DiffBackend> {
    match config.backend {
        DiffBackendKind::RegCli => Box::new(RegCli {
            runner: runner.clone(),
            resolver: resolver.clone(),
            threshold_rate: config.threshold_rate,
            threshold_pixel: config.threshold_pixel,
            extra_args: config.diff_args.clone(),
        }),
        DiffBackendKind::RegSuit => Box::new(RegSuit {
            runner: runner.clone(),
            resolver: resolver.clone(),
            extra_args: config.diff_args.clone(),
        }),
    }
}

/// `reg-cli <actual> <expected> <diff> --json .. --report ..`
pub struct RegCli {
    runner: ProcessRunner,
    resolver: BinResolver,
    threshold_rate: f64,
    threshold_pixel: u64,
    extra_args: Vec<String>,
}

impl RegCli {
    fn invocation(&self, base_dir: &Path, target_dir: &Path, workspace: &Path) -> Invocation {
        let mut args = vec![
            base_dir.display().to_string(),
            target_dir.display().to_string(),
            workspace.join("diff").display().to_string(),
            "--json".to_string(),
            workspace.join("reg.json").display().to_string(),
            "--report".to_string(),
            workspace.join(REPORT_FILE).display().to_string(),
            "--thresholdRate".to_string(),
            self.threshold_rate.to_string(),
            "--thresholdPixel".to_string(),
            self.threshold_pixel.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        self.resolver.tool_invocation(self.name(), args)
    }
}

#[async_trait]
impl DiffBackend for RegCli {
    fn name(&self) -> &'static str {
        DiffBackendKind::RegCli.binary()
    }

    async fn run_diff(
        &self,
        base_dir: &Path,
        target_dir: &Path,
        workspace: &Path,
    ) -> Result<Option<PathBuf>> {
        prepare_workspace(workspace).await?;
        reset_dir(&workspace.join("diff")).await?;

        let invocation = self.invocation(base_dir, target_dir, workspace);
        run_tool(&self.runner, self.name(), &invocation).await?;

        Ok(locate_report(workspace))
    }
}

/// `reg-suit run --config <workspace>/regconfig.json`
pub struct RegSuit {
    runner: ProcessRunner,
    resolver: BinResolver,
    extra_args: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RegSuitConfig {
    core: RegSuitCore,
    plugins: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegSuitCore {
    working_dir: PathBuf,
    actual_dir: PathBuf,
    expected_dir: PathBuf,
    threshold_rate: f64,
    threshold_pixel: u64,
}

impl RegSuit {
    /// Config document for one comparison; thresholds are always zero
    fn config(base_dir: &Path, target_dir: &Path, workspace: &Path) -> RegSuitConfig {
        RegSuitConfig {
            core: RegSuitCore {
                working_dir: workspace.to_path_buf(),
                actual_dir: base_dir.to_path_buf(),
                expected_dir: target_dir.to_path_buf(),
                threshold_rate: 0.0,
                threshold_pixel: 0,
            },
            plugins: serde_json::Map::new(),
        }
    }
}

#[async_trait]
impl DiffBackend for RegSuit {
    fn name(&self) -> &'static str {
        DiffBackendKind::RegSuit.binary()
    }

    async fn run_diff(
        &self,
        base_dir: &Path,
        target_dir: &Path,
        workspace: &Path,
    ) -> Result<Option<PathBuf>> {
        prepare_workspace(workspace).await?;

        let config_path = workspace.join("regconfig.json");
        let config = Self::config(base_dir, target_dir, workspace);
        tokio::fs::write(&config_path, serde_json::to_string_pretty(&config)?).await?;

        let expected_dir = workspace.join("expected");
        reset_dir(&expected_dir).await?;
        let copied = copy_tree(target_dir, &expected_dir)?;
        info!("Copied {} file(s) into {}", copied, expected_dir.display());

        let mut args = vec![
            "run".to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        let invocation = self.resolver.tool_invocation(self.name(), args);
        run_tool(&self.runner, self.name(), &invocation).await?;

        Ok(locate_report(workspace))
    }
}

async fn prepare_workspace(workspace: &Path) -> Result<()> {
    tokio::fs::create_dir_all(workspace).await?;
    // stale report from a previous run
    match tokio::fs::remove_file(workspace.join(REPORT_FILE)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn run_tool(
    runner: &ProcessRunner,
    backend: &'static str,
    invocation: &Invocation,
) -> Result<()> {
    info!("Running {}", backend);
    runner.run(invocation).await.map_err(|e| Error::DiffTool {
        backend,
        source: Box::new(e),
    })
}

fn locate_report(workspace: &Path) -> Option<PathBuf> {
    let report = workspace.join(REPORT_FILE);
    if report.is_file() {
        Some(report)
    } else {
        warn!("Diff tool finished without writing {}", report.display());
        None
    }
}

/// Recursively copy `src` into `dst`, returning the number of files copied
fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let dest = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_reg_suit_config_shape() {
        let config = RegSuit::config(
            Path::new("/w/capture/main"),
            Path::new("/w/capture/feature"),
            Path::new("/w/reg-work"),
        );
        let value = serde_json::to_value(&config).unwrap();

        assert_eq!(value["core"]["workingDir"], "/w/reg-work");
        assert_eq!(value["core"]["actualDir"], "/w/capture/main");
        assert_eq!(value["core"]["expectedDir"], "/w/capture/feature");
        assert_eq!(value["core"]["thresholdRate"], 0.0);
        assert_eq!(value["core"]["thresholdPixel"], 0);
        assert!(value["plugins"].as_object().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_reg_cli_arguments() {
        let tmp = TempDir::new().unwrap();
        let backend = RegCli {
            runner: ProcessRunner::new(tmp.path()),
            resolver: BinResolver::with_roots(vec![tmp.path().to_path_buf()], vec![]),
            threshold_rate: 0.25,
            threshold_pixel: 3,
            extra_args: vec!["--extra".to_string()],
        };
        let ws = Path::new("/w/reg-work");
        let invocation = backend.invocation(Path::new("/w/a"), Path::new("/w/b"), ws);

        // not installed under the temp dir, so it goes through the package runner
        assert_eq!(invocation.program, PathBuf::from("npx"));
        assert_eq!(
            invocation.args,
            vec![
                "reg-cli",
                "/w/a",
                "/w/b",
                "/w/reg-work/diff",
                "--json",
                "/w/reg-work/reg.json",
                "--report",
                "/w/reg-work/index.html",
                "--thresholdRate",
                "0.25",
                "--thresholdPixel",
                "3",
                "--extra",
            ]
        );
    }

    #[test]
    fn test_copy_tree_preserves_layout() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("button")).unwrap();
        std::fs::write(src.join("button/primary.png"), b"png").unwrap();
        std::fs::write(src.join("card.png"), b"png").unwrap();

        let dst = tmp.path().join("dst");
        let copied = copy_tree(&src, &dst).unwrap();

        assert_eq!(copied, 2);
        assert!(dst.join("button/primary.png").is_file());
        assert!(dst.join("card.png").is_file());
    }

    #[tokio::test]
    async fn test_prepare_workspace_removes_stale_report() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("reg-work");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join(REPORT_FILE), "<html>").unwrap();

        prepare_workspace(&ws).await.unwrap();
        assert!(!ws.join(REPORT_FILE).exists());
        assert!(locate_report(&ws).is_none());
    }

    #[test]
    fn test_required_binaries_follow_backend() {
        assert_eq!(required_binaries(DiffBackendKind::RegCli), ["storycap", "reg-cli"]);
        assert_eq!(required_binaries(DiffBackendKind::RegSuit), ["storycap", "reg-suit"]);
    }
}
