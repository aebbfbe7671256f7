//! Run summary and report opening

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::capture::CaptureOutput;
use crate::error::Result;
use crate::process::{Invocation, ProcessRunner, StdioMode};

/// What a completed run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub base: CaptureOutput,
    pub target: CaptureOutput,
    pub backend: &'static str,
    pub report_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunSummary {
    /// Write as pretty JSON, creating parent directories
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Run summary written to {}", path.display());
        Ok(())
    }
}

/// Platform default opener for a file
pub fn opener_invocation(report: &Path) -> Invocation {
    let file = report.display().to_string();
    if cfg!(target_os = "macos") {
        Invocation::new("open", vec![file])
    } else if cfg!(windows) {
        Invocation::new(
            "cmd",
            vec!["/c".to_string(), "start".to_string(), String::new(), file],
        )
    } else {
        Invocation::new("xdg-open", vec![file])
    }
}

/// Open the report in the default viewer. Best effort: returns whether the
/// opener succeeded and only warns otherwise.
pub async fn open_report(runner: &ProcessRunner, report: &Path) -> bool {
    let invocation = opener_invocation(report);
    match runner.run_with(&invocation, StdioMode::Null).await {
        Ok(()) => {
            info!("Opening report in your browser: {}", report.display());
            true
        }
        Err(e) => {
            warn!("Could not open report automatically: {}", e);
            false
        }
    }
}
