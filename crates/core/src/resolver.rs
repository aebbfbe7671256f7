//! Locating locally installed tool binaries
//!
//! Tools are looked up in `node_modules/.bin` under every ancestor of the
//! working directory, then every ancestor of the lsvrt executable, then one
//! explicit directory next to the executable. Candidates are produced lazily
//! and the search stops at the first existing file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::process::Invocation;

/// Local bin directory nested under each searched ancestor
pub const LOCAL_BIN_DIR: &str = "node_modules/.bin";

/// Indirection used when a tool is not installed locally
pub const PACKAGE_RUNNER: &str = "npx";

#[derive(Debug, Clone)]
pub struct BinResolver {
    /// Directories whose ancestors are walked, in order
    roots: Vec<PathBuf>,

    /// Directories checked after the walks
    explicit: Vec<PathBuf>,
}

impl BinResolver {
    /// Resolver for a run rooted at `workdir`
    pub fn new(workdir: &Path) -> Self {
        let mut roots = vec![workdir.to_path_buf()];
        let mut explicit = Vec::new();

        if let Some(install_dir) = install_dir() {
            if let Some(parent) = install_dir.parent() {
                explicit.push(parent.join(LOCAL_BIN_DIR));
            }
            roots.push(install_dir);
        }

        Self { roots, explicit }
    }

    /// Resolver with explicit search roots, used by tests
    pub fn with_roots(roots: Vec<PathBuf>, explicit: Vec<PathBuf>) -> Self {
        Self { roots, explicit }
    }

    /// Ordered, de-duplicated candidate directories
    pub fn search_dirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let mut seen = HashSet::new();
        self.roots
            .iter()
            .flat_map(|root| root.ancestors().map(|dir| dir.join(LOCAL_BIN_DIR)))
            .chain(self.explicit.iter().cloned())
            .filter(move |dir| seen.insert(dir.clone()))
    }

    /// Path of the first installed copy of `tool`
    pub fn resolve(&self, tool: &str) -> Option<PathBuf> {
        let file_name = bin_file_name(tool);
        let found = self
            .search_dirs()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file());

        match &found {
            Some(path) => debug!("Resolved {} -> {}", tool, path.display()),
            None => debug!("{} not found in any {}", tool, LOCAL_BIN_DIR),
        }
        found
    }

    /// Invocation of a tool, through the package runner if not installed
    pub fn tool_invocation(&self, tool: &str, args: Vec<String>) -> Invocation {
        match self.resolve(tool) {
            Some(path) => Invocation::new(path, args),
            None => {
                let mut runner_args = Vec::with_capacity(args.len() + 1);
                runner_args.push(tool.to_string());
                runner_args.extend(args);
                Invocation::new(PACKAGE_RUNNER, runner_args)
            }
        }
    }

    /// Invocation of a command whose first token may be a local tool,
    /// falling back to the bare command name
    pub fn command_invocation(&self, command: &str, args: Vec<String>) -> Invocation {
        match self.resolve(command) {
            Some(path) => Invocation::new(path, args),
            None => Invocation::new(command, args),
        }
    }

    /// Tools from `required` that cannot be resolved
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|tool| self.resolve(tool).is_none())
            .collect()
    }
}

fn install_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe = exe.canonicalize().unwrap_or(exe);
    exe.parent().map(Path::to_path_buf)
}

fn bin_file_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{}.cmd", tool)
    } else {
        tool.to_string()
    }
}
