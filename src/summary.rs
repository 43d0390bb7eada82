//! Run summary: the per-unit outcome report, as a human table on stdout
//! and as `run_summary.json` in the output directory.

use std::io::IsTerminal;
use std::path::Path;

use atomic_write_file::AtomicWriteFile;
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::error::Result;
use crate::store::{UnitRecord, UnitStatus};

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub units: Vec<UnitRecord>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub completed: usize,
    pub completed_with_warnings: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn new(started: DateTime<Utc>, finished: DateTime<Utc>, units: Vec<UnitRecord>) -> Self {
        Self {
            started,
            finished,
            units,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.units.iter().any(|u| u.status == UnitStatus::Failed)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for unit in &self.units {
            match unit.status {
                UnitStatus::Completed => counts.completed += 1,
                UnitStatus::CompletedWithWarnings => counts.completed_with_warnings += 1,
                UnitStatus::Failed => counts.failed += 1,
                UnitStatus::Skipped => counts.skipped += 1,
                UnitStatus::NotRun | UnitStatus::Running => {}
            }
        }
        counts
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut file = AtomicWriteFile::open(path)?;
        serde_json::to_writer_pretty(&mut file, self).map_err(std::io::Error::from)?;
        file.commit()?;
        Ok(())
    }

    /// One line per unit plus a totals footer.
    pub fn format_table(&self, use_colors: bool) -> String {
        let id_width = self
            .units
            .iter()
            .map(|u| u.id.len())
            .max()
            .unwrap_or(0)
            .max(4);

        let mut lines: Vec<String> = self
            .units
            .iter()
            .map(|unit| {
                let status = status_word(unit.status);
                let detail = match unit.status {
                    UnitStatus::Failed => unit
                        .error
                        .as_ref()
                        .map(|e| format!("{}: {}", e.kind, e.message))
                        .unwrap_or_default(),
                    UnitStatus::Skipped => unit.skip_reason.clone().unwrap_or_default(),
                    UnitStatus::CompletedWithWarnings => {
                        format!("{} warning(s)", unit.warnings)
                    }
                    _ => String::new(),
                };

                // Pad before colorizing; escape bytes would otherwise
                // count toward the column width.
                let status = format!("{status:<21}");
                let status = if use_colors {
                    match unit.status {
                        UnitStatus::Completed => status.green().to_string(),
                        UnitStatus::CompletedWithWarnings => status.yellow().to_string(),
                        UnitStatus::Failed => status.red().to_string(),
                        UnitStatus::Skipped => status.dimmed().to_string(),
                        _ => status,
                    }
                } else {
                    status
                };
                format!("{:<id_width$}  {}  {}", unit.id, status, detail)
            })
            .collect();

        let counts = self.counts();
        lines.push(format!(
            "{} completed, {} with warnings, {} failed, {} skipped",
            counts.completed, counts.completed_with_warnings, counts.failed, counts.skipped
        ));
        lines.join("\n")
    }
}

fn status_word(status: UnitStatus) -> &'static str {
    match status {
        UnitStatus::NotRun => "not run",
        UnitStatus::Running => "running",
        UnitStatus::Completed => "completed",
        UnitStatus::CompletedWithWarnings => "completed (warnings)",
        UnitStatus::Failed => "FAILED",
        UnitStatus::Skipped => "skipped",
    }
}

/// Check if stdout is a TTY (for auto-detecting color support).
pub fn should_use_colors() -> bool {
    std::io::stdout().is_terminal()
}
