//! Run configuration
//!
//! Resolved once at startup from `LSVRT_*` environment variables. Every value
//! is parsed leniently: anything missing, malformed, or out of range falls back
//! to its default so a typo never aborts a run.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

/// Directory under the working directory that holds all run artifacts
pub const RUN_NAMESPACE: &str = ".lsvrt";

pub const DEFAULT_PORT: u16 = 6006;
pub const DEFAULT_SERVER_COMMAND: &str = "storybook dev";
pub const DEFAULT_THRESHOLD_RATE: f64 = 0.001;
pub const DEFAULT_THRESHOLD_PIXEL: u64 = 0;
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(1500);

/// Which diff tool compares the two capture sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffBackendKind {
    /// `reg-cli` with positional directories
    #[default]
    RegCli,
    /// `reg-suit run` driven by a generated config file
    RegSuit,
}

impl DiffBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffBackendKind::RegCli => "reg-cli",
            DiffBackendKind::RegSuit => "reg-suit",
        }
    }

    /// Name of the executable this backend invokes
    pub fn binary(&self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for DiffBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reg-cli" | "regcli" => Ok(DiffBackendKind::RegCli),
            "reg-suit" | "regsuit" => Ok(DiffBackendKind::RegSuit),
            other => Err(format!(
                "unknown diff backend '{}' (expected reg-cli or reg-suit)",
                other
            )),
        }
    }
}

impl std::fmt::Display for DiffBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable configuration for one run
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Repository root the run operates on
    pub workdir: PathBuf,

    /// Preview server port
    pub port: u16,

    /// Preview server command, first token is the executable
    pub server_command: Vec<String>,

    /// Extra arguments appended to the capture tool invocation
    pub capture_args: Vec<String>,

    /// Extra arguments appended to the diff tool invocation
    pub diff_args: Vec<String>,

    /// Ratio of differing pixels tolerated by the diff tool
    pub threshold_rate: f64,

    /// Absolute number of differing pixels tolerated by the diff tool
    pub threshold_pixel: u64,

    /// Diff backend selection
    pub backend: DiffBackendKind,

    /// Proceed with a warning instead of aborting on a dirty working tree
    pub allow_dirty: bool,

    /// Open the HTML report when the run completes
    pub open_report: bool,

    /// How long to wait for the preview server to answer
    pub ready_timeout: Duration,

    /// Delay between readiness probes
    pub probe_interval: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            port: DEFAULT_PORT,
            server_command: split_words(DEFAULT_SERVER_COMMAND),
            capture_args: Vec::new(),
            diff_args: Vec::new(),
            threshold_rate: DEFAULT_THRESHOLD_RATE,
            threshold_pixel: DEFAULT_THRESHOLD_PIXEL,
            backend: DiffBackendKind::default(),
            allow_dirty: false,
            open_report: true,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

impl RunConfig {
    /// Build from the process environment
    pub fn from_env(workdir: impl Into<PathBuf>) -> Self {
        Self::from_lookup(workdir, |key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(workdir: impl Into<PathBuf>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = parse_or("LSVRT_PORT", lookup("LSVRT_PORT"), defaults.port, |v| {
            v.parse::<u16>().ok().filter(|p| *p > 0)
        });

        let server_command = lookup("LSVRT_STORYBOOK_COMMAND")
            .map(|v| split_words(&v))
            .filter(|words| !words.is_empty())
            .unwrap_or(defaults.server_command);

        let capture_args = lookup("LSVRT_STORYCAP_OPTIONS")
            .map(|v| split_words(&v))
            .unwrap_or_default();

        let diff_args = lookup("LSVRT_REGCLI_OPTIONS")
            .map(|v| split_words(&v))
            .unwrap_or_default();

        let threshold_rate = parse_or(
            "LSVRT_THRESHOLD_RATE",
            lookup("LSVRT_THRESHOLD_RATE"),
            defaults.threshold_rate,
            |v| v.parse::<f64>().ok().filter(|r| r.is_finite() && *r >= 0.0),
        );

        let threshold_pixel = parse_or(
            "LSVRT_THRESHOLD_PIXEL",
            lookup("LSVRT_THRESHOLD_PIXEL"),
            defaults.threshold_pixel,
            |v| v.parse::<u64>().ok(),
        );

        let backend = parse_or(
            "LSVRT_DIFF_BACKEND",
            lookup("LSVRT_DIFF_BACKEND"),
            defaults.backend,
            |v| v.parse().ok(),
        );

        let allow_dirty = parse_or(
            "LSVRT_ALLOW_DIRTY",
            lookup("LSVRT_ALLOW_DIRTY"),
            defaults.allow_dirty,
            parse_flag,
        );

        let no_open = parse_or("LSVRT_NO_OPEN", lookup("LSVRT_NO_OPEN"), false, parse_flag);

        let ready_timeout = parse_or(
            "LSVRT_READY_TIMEOUT_MS",
            lookup("LSVRT_READY_TIMEOUT_MS"),
            defaults.ready_timeout,
            |v| {
                v.parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis)
            },
        );

        Self {
            workdir: workdir.into(),
            port,
            server_command,
            capture_args,
            diff_args,
            threshold_rate,
            threshold_pixel,
            backend,
            allow_dirty,
            open_report: !no_open,
            ready_timeout,
            probe_interval: defaults.probe_interval,
        }
    }

    /// `<workdir>/.lsvrt`
    pub fn namespace_dir(&self) -> PathBuf {
        self.workdir.join(RUN_NAMESPACE)
    }

    /// Root holding one capture directory per branch
    pub fn capture_root(&self) -> PathBuf {
        self.namespace_dir().join("capture")
    }

    /// Diff backend workspace
    pub fn diff_workspace(&self) -> PathBuf {
        self.namespace_dir().join("reg-work")
    }

    /// Location of the run summary
    pub fn summary_path(&self) -> PathBuf {
        self.namespace_dir().join("summary.json")
    }

    /// Capture directory for a sanitized branch name
    pub fn capture_dir(&self, sanitized_branch: &str) -> PathBuf {
        self.capture_root().join(sanitized_branch)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// URL the preview server is expected to answer on
    pub fn server_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

fn split_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(String::from).collect()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_or<T, F>(key: &str, raw: Option<String>, default: T, parse: F) -> T
where
    F: FnOnce(&str) -> Option<T>,
{
    let Some(raw) = raw else {
        return default;
    };
    match parse(raw.trim()) {
        Some(value) => value,
        None => {
            warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn config_from(pairs: &[(&str, &str)]) -> RunConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunConfig::from_lookup("/repo", |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = config_from(&[]);
        assert_eq!(config.port, 6006);
        assert_eq!(config.server_command, vec!["storybook", "dev"]);
        assert!(config.capture_args.is_empty());
        assert!(config.diff_args.is_empty());
        assert_eq!(config.threshold_rate, 0.001);
        assert_eq!(config.threshold_pixel, 0);
        assert_eq!(config.backend, DiffBackendKind::RegCli);
        assert!(!config.allow_dirty);
        assert!(config.open_report);
        assert_eq!(config.ready_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("LSVRT_PORT", "7007"),
            ("LSVRT_STORYBOOK_COMMAND", "start-storybook  --quiet"),
            ("LSVRT_STORYCAP_OPTIONS", "--serial --delay 100"),
            ("LSVRT_REGCLI_OPTIONS", "--matchingThreshold 0.1"),
            ("LSVRT_THRESHOLD_RATE", "0.05"),
            ("LSVRT_DIFF_BACKEND", "reg-suit"),
            ("LSVRT_NO_OPEN", "1"),
        ]);
        assert_eq!(config.port, 7007);
        assert_eq!(config.server_command, vec!["start-storybook", "--quiet"]);
        assert_eq!(config.capture_args, vec!["--serial", "--delay", "100"]);
        assert_eq!(config.diff_args, vec!["--matchingThreshold", "0.1"]);
        assert_eq!(config.threshold_rate, 0.05);
        assert_eq!(config.backend, DiffBackendKind::RegSuit);
        assert!(!config.open_report);
    }

    #[test_case("-0.5" ; "negative")]
    #[test_case("NaN" ; "not a number")]
    #[test_case("inf" ; "infinite")]
    #[test_case("abc" ; "garbage")]
    fn test_invalid_threshold_rate_falls_back(raw: &str) {
        let config = config_from(&[("LSVRT_THRESHOLD_RATE", raw)]);
        assert_eq!(config.threshold_rate, DEFAULT_THRESHOLD_RATE);
    }

    #[test_case("0" ; "zero")]
    #[test_case("70000" ; "out of range")]
    #[test_case("http" ; "garbage")]
    fn test_invalid_port_falls_back(raw: &str) {
        let config = config_from(&[("LSVRT_PORT", raw)]);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_blank_server_command_falls_back() {
        let config = config_from(&[("LSVRT_STORYBOOK_COMMAND", "   ")]);
        assert_eq!(config.server_command, vec!["storybook", "dev"]);
    }

    #[test]
    fn test_layout_paths() {
        let config = config_from(&[]);
        assert_eq!(config.capture_dir("main"), PathBuf::from("/repo/.lsvrt/capture/main"));
        assert_eq!(config.diff_workspace(), PathBuf::from("/repo/.lsvrt/reg-work"));
        assert_eq!(config.server_url(), "http://localhost:6006");
    }

    #[test_case("reg-cli", Some(DiffBackendKind::RegCli))]
    #[test_case("REG-SUIT", Some(DiffBackendKind::RegSuit))]
    #[test_case("pixelmatch", None)]
    fn test_backend_parse(raw: &str, expected: Option<DiffBackendKind>) {
        assert_eq!(raw.parse::<DiffBackendKind>().ok(), expected);
    }
}
