//! Output formatting for CLI

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use lsvrt_core::capture::CaptureOutput;
use lsvrt_core::RunOutcome;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

fn capture_row(role: &str, capture: &CaptureOutput) -> Vec<String> {
    vec![
        role.to_string(),
        capture.branch.name().to_string(),
        capture.image_count.to_string(),
        capture.dir.display().to_string(),
    ]
}

fn summary_table(outcome: &RunOutcome) -> Table {
    let summary = &outcome.summary;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["Role", "Branch", "Files", "Directory"]);
    table.add_row(capture_row("base", &summary.base));
    table.add_row(capture_row("target", &summary.target));
    table
}

/// Print the result of a finished run
pub fn print_outcome(outcome: &RunOutcome, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", summary_table(outcome));
            match &outcome.summary.report_path {
                Some(path) => print_info(&format!(
                    "{} report: {}",
                    outcome.summary.backend,
                    path.display()
                )),
                None => print_warning(&format!(
                    "{} did not produce an HTML report",
                    outcome.summary.backend
                )),
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
        }
    }
    Ok(())
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
