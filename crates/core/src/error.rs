//! Error types for lsvrt runs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    #[error("Failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} {} failed with code {}", args.join(" "), format_code(*code))]
    Process {
        command: String,
        args: Vec<String>,
        code: Option<i32>,
    },

    #[error("Storybook did not start on port {port}: {last_error}")]
    Timeout { port: u16, last_error: String },

    #[error("Preview server for branch {branch} failed to start: {source}")]
    ServerStart {
        branch: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Capture failed for branch {branch}: {source}")]
    Capture {
        branch: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Checkout of {branch} failed: {source}")]
    Checkout {
        branch: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{backend} failed: {source}")]
    DiffTool {
        backend: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Run interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn format_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl Error {
    /// The wrapped cause of a stage error, if any
    pub fn cause(&self) -> Option<&Error> {
        match self {
            Error::ServerStart { source, .. }
            | Error::Capture { source, .. }
            | Error::Checkout { source, .. }
            | Error::DiffTool { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Innermost error of the stage chain
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }

    /// True when the run failed because the preview server never became ready
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }
}
