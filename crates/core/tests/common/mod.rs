//! Shared fixtures for integration tests: throwaway git repositories with
//! fake Storybook tooling in `node_modules/.bin`.

#![allow(dead_code)]

use std::net::TcpListener as StdListener;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use lsvrt_core::resolver::BinResolver;
use lsvrt_core::{DiffBackendKind, Pipeline, RunConfig};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Route library logs to the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn in_path(bin: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {bin} >/dev/null 2>&1"))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn git_available() -> bool {
    if in_path("git") {
        true
    } else {
        eprintln!("Skipping: git not available in PATH");
        false
    }
}

/// Whether `pid` still names a process, zombies included
pub fn process_exists(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), None).is_ok()
}

pub fn free_port() -> u16 {
    StdListener::bind("127.0.0.1:0")
        .expect("bind to find free port")
        .local_addr()
        .expect("local addr")
        .port()
}

const STORYBOOK: &str = r#"#!/bin/sh
echo $$ > .lsvrt/storybook.pid
exec sleep 30
"#;

const STORYCAP: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outDir) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
[ -f fail-capture ] && exit 1
[ -f slow-capture ] && exec sleep 10
mkdir -p "$out"
git symbolic-ref --short HEAD > "$out/button.png"
printf 'card' > "$out/card.png"
"#;

const REG_CLI: &str = r#"#!/bin/sh
report=""
while [ $# -gt 0 ]; do
  case "$1" in
    --report) report="$2"; shift 2 ;;
    *) shift ;;
  esac
done
[ -n "$report" ] && printf '<html>reg-cli</html>' > "$report"
exit 0
"#;

const REG_SUIT: &str = r#"#!/bin/sh
config=""
while [ $# -gt 0 ]; do
  case "$1" in
    --config) config="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '<html>reg-suit</html>' > "$(dirname "$config")/index.html"
exit 0
"#;

/// A git repository on `main` with one commit, ignoring `node_modules/`
/// and `.lsvrt/`
pub struct TestRepo {
    _tmp: TempDir,
    path: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        init_tracing();
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("repo");
        std::fs::create_dir_all(&path).expect("create repo dir");

        let repo = Self { _tmp: tmp, path };
        repo.git(&["init", "--quiet"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.write(".gitignore", "node_modules/\n.lsvrt/\n");
        repo.write("README.md", "stories\n");
        repo.commit_all("initial");
        repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .env("GIT_AUTHOR_NAME", "lsvrt")
            .env("GIT_AUTHOR_EMAIL", "lsvrt@example.com")
            .env("GIT_COMMITTER_NAME", "lsvrt")
            .env("GIT_COMMITTER_EMAIL", "lsvrt@example.com")
            .output()
            .expect("run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    pub fn write(&self, file: &str, contents: &str) {
        let path = self.path.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, contents).expect("write file");
    }

    pub fn commit_all(&self, message: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "--quiet", "-m", message]);
    }

    /// Create `branch` from `main` carrying `files`, then return to `main`
    pub fn branch_with(&self, branch: &str, files: &[(&str, &str)]) {
        self.git(&["checkout", "--quiet", "-b", branch]);
        for (file, contents) in files {
            self.write(file, contents);
        }
        if !files.is_empty() {
            self.commit_all(&format!("changes on {branch}"));
        }
        self.git(&["checkout", "--quiet", "main"]);
    }

    pub fn current_branch(&self) -> String {
        self.git(&["symbolic-ref", "--short", "HEAD"])
    }

    /// Write an executable `node_modules/.bin/<tool>` script
    pub fn install(&self, tool: &str, script: &str) {
        let bin_dir = self.path.join("node_modules/.bin");
        std::fs::create_dir_all(&bin_dir).expect("create bin dir");
        let path = bin_dir.join(tool);
        std::fs::write(&path, script).expect("write tool");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod tool");
        }
    }

    /// Fake storybook, storycap and both diff tools
    pub fn install_tools(&self) {
        self.install("storybook", STORYBOOK);
        self.install("storycap", STORYCAP);
        self.install("reg-cli", REG_CLI);
        self.install("reg-suit", REG_SUIT);
    }

    pub fn lsvrt_dir(&self) -> PathBuf {
        self.path.join(".lsvrt")
    }

    /// Pid recorded by the most recently started fake preview server
    pub fn last_server_pid(&self) -> i32 {
        std::fs::read_to_string(self.lsvrt_dir().join("storybook.pid"))
            .expect("read server pid")
            .trim()
            .parse()
            .expect("parse server pid")
    }

    pub fn config(&self, port: u16) -> RunConfig {
        RunConfig {
            workdir: self.path.clone(),
            port,
            server_command: vec!["storybook".to_string(), "dev".to_string()],
            backend: DiffBackendKind::RegCli,
            open_report: false,
            ready_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// Pipeline that only looks for tools inside this repository
    pub fn pipeline(&self, config: RunConfig) -> Pipeline {
        let resolver = BinResolver::with_roots(vec![self.path.clone()], vec![]);
        Pipeline::with_resolver(config, resolver).expect("build pipeline")
    }

    /// Branch named by `.git/HEAD`, read without spawning git
    pub fn head_branch(path: &Path) -> Option<String> {
        let head = std::fs::read_to_string(path.join(".git/HEAD")).ok()?;
        head.trim()
            .strip_prefix("ref: refs/heads/")
            .map(String::from)
    }
}

/// Stand-in for the preview server: answers HEAD/GET on `port` with 200 when
/// `ready()` holds and 503 otherwise
pub fn serve_when<F>(port: u16, ready: F) -> JoinHandle<()>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let ready = Arc::new(ready);
    tokio::spawn(async move {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind responder");
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let ready = Arc::clone(&ready);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let status = if ready() { "200 OK" } else { "503 Service Unavailable" };
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    })
}

pub fn serve_ok(port: u16) -> JoinHandle<()> {
    serve_when(port, || true)
}
