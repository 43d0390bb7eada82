//! Result store: the single source of truth for per-unit outcomes.
//!
//! The store is the only mutable structure shared between parallel
//! workflows. Writes follow a single-writer-per-key discipline (each
//! indicator task touches only its own record), and the map itself is
//! mutex-guarded against interleaving.
//!
//! It is also the enforcement point for the output contract: a record can
//! only become Completed through [`ResultStore::complete`], which re-reads
//! the written raster and verifies it is non-empty and grid-aligned. A
//! workflow that claims success without a usable raster gets a Failed
//! record with an output-verification error instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

use crate::error::{EngineError, OutputVerificationError};
use crate::grid::{read_ascii_grid, StudyAreaGrid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    NotRun,
    Running,
    Completed,
    CompletedWithWarnings,
    Failed,
    Skipped,
}

impl UnitStatus {
    /// Terminal and usable as an aggregation input.
    pub fn is_success(&self) -> bool {
        matches!(self, UnitStatus::Completed | UnitStatus::CompletedWithWarnings)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitStatus::NotRun | UnitStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Indicator,
    Factor,
    Dimension,
    Composite,
}

/// Terminal error detail attached to a Failed record.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// Stable kind tag, e.g. "load", "aggregation", "timeout".
    pub kind: String,
    pub message: String,
}

/// One unit's outcome for the run.
#[derive(Debug, Clone, Serialize)]
pub struct UnitRecord {
    pub id: String,
    pub kind: UnitKind,
    pub status: UnitStatus,
    /// Present iff status is Completed/CompletedWithWarnings.
    pub raster_path: Option<PathBuf>,
    /// Present iff status is Failed.
    pub error: Option<ErrorDetail>,
    /// Child units responsible for a failure or skip, where applicable.
    pub caused_by: Vec<String>,
    pub warnings: u32,
    /// Human reason for Skipped records ("excluded", "do_not_use",
    /// "cancelled").
    pub skip_reason: Option<String>,
}

pub struct ResultStore {
    grid: StudyAreaGrid,
    records: Mutex<HashMap<String, UnitRecord>>,
    /// Registration order, for stable reporting.
    order: Mutex<Vec<String>>,
}

impl ResultStore {
    pub fn new(grid: StudyAreaGrid) -> Self {
        Self {
            grid,
            records: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Returns false on a duplicate id without touching the existing
    /// record. Each unit owns exactly one record and one output raster,
    /// so callers must treat a duplicate as an error.
    pub fn register(&self, id: &str, kind: UnitKind) -> bool {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(id) {
            return false;
        }
        records.insert(
            id.to_string(),
            UnitRecord {
                id: id.to_string(),
                kind,
                status: UnitStatus::NotRun,
                raster_path: None,
                error: None,
                caused_by: Vec::new(),
                warnings: 0,
                skip_reason: None,
            },
        );
        self.order.lock().unwrap().push(id.to_string());
        true
    }

    pub fn mark_running(&self, id: &str) {
        self.update(id, |r| r.status = UnitStatus::Running);
    }

    /// Record successful completion, verifying the output first.
    ///
    /// The raster at `path` is re-read and checked for alignment and
    /// non-emptiness. On any mismatch the record becomes Failed with an
    /// output-verification error, and that error is returned.
    pub fn complete(&self, id: &str, path: &Path, warnings: u32) -> Result<(), EngineError> {
        match verify_output(&self.grid, path) {
            Ok(()) => {
                self.update(id, |r| {
                    r.status = if warnings > 0 {
                        UnitStatus::CompletedWithWarnings
                    } else {
                        UnitStatus::Completed
                    };
                    r.raster_path = Some(path.to_path_buf());
                    r.warnings = warnings;
                });
                Ok(())
            }
            Err(e) => {
                warn!(unit = id, error = %e, "output verification failed");
                let err = EngineError::from(e);
                self.fail(id, &err, Vec::new());
                Err(err)
            }
        }
    }

    pub fn fail(&self, id: &str, error: &EngineError, caused_by: Vec<String>) {
        self.update(id, |r| {
            r.status = UnitStatus::Failed;
            r.raster_path = None;
            r.error = Some(ErrorDetail {
                kind: error.kind().to_string(),
                message: error.to_string(),
            });
            r.caused_by = caused_by;
        });
    }

    pub fn skip(&self, id: &str, reason: &str) {
        self.update(id, |r| {
            r.status = UnitStatus::Skipped;
            r.skip_reason = Some(reason.to_string());
        });
    }

    pub fn get(&self, id: &str) -> Option<UnitRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<UnitStatus> {
        self.records.lock().unwrap().get(id).map(|r| r.status)
    }

    /// All records in registration order.
    pub fn snapshot(&self) -> Vec<UnitRecord> {
        let records = self.records.lock().unwrap();
        self.order
            .lock()
            .unwrap()
            .iter()
            .filter_map(|id| records.get(id).cloned())
            .collect()
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut UnitRecord)) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(id) {
            f(record);
        }
    }
}

fn verify_output(grid: &StudyAreaGrid, path: &Path) -> Result<(), OutputVerificationError> {
    let raster = read_ascii_grid(path).map_err(|e| OutputVerificationError {
        path: path.to_path_buf(),
        reason: format!("cannot re-read output: {e}"),
    })?;
    if raster.is_empty() {
        return Err(OutputVerificationError {
            path: path.to_path_buf(),
            reason: "output raster has no valid cells".to_string(),
        });
    }
    if !raster.is_aligned_to(grid) {
        return Err(OutputVerificationError {
            path: path.to_path_buf(),
            reason: "output raster is not aligned to the study-area grid".to_string(),
        });
    }
    Ok(())
}
