//! lsvrt core
//!
//! Branch-to-branch visual regression runs for Storybook projects:
//! - captures screenshots of the current branch and a target branch by
//!   booting a preview server for each and running the capture tool against it
//! - hands both screenshot sets to a diff backend (`reg-cli` or `reg-suit`)
//! - always puts the working tree back on the branch it started on
//!
//! Screenshot capture and pixel diffing are done by external tools; this
//! crate only orchestrates them.
//!
//! # Layout produced
//!
//! ```text
//! <workdir>/.lsvrt/
//!   ├── capture/<sanitized-branch>/...   one directory per branch
//!   ├── reg-work/                        diff backend workspace
//!   │     ├── diff/ reg.json index.html  (reg-cli)
//!   │     └── regconfig.json expected/   (reg-suit)
//!   └── summary.json
//! ```

pub mod capture;
pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod interrupt;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod report;
pub mod resolver;

pub use config::{DiffBackendKind, RunConfig};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, RunOutcome};
pub use report::RunSummary;
