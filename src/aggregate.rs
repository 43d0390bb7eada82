//! Weighted aggregation, identical at the factor, dimension, and
//! composite levels.
//!
//! Inclusion rules: a child with usage DoNotUse or Excluded is omitted
//! from both the weight renormalization and the required-completion
//! check. Every included child must have finished successfully; anything
//! else is an [`AggregationError`] naming the offenders — aggregation
//! never silently proceeds over absent rasters.

use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;
use serde::Serialize;
use tracing::debug;

use crate::config::Usage;
use crate::error::{AggregationError, EngineError, ProcessingError, Result};
use crate::grid::{read_ascii_grid, Raster, StudyAreaGrid};
use crate::store::ResultStore;

/// One child of an aggregation, as declared in the hierarchy.
#[derive(Debug, Clone)]
pub struct ChildRef {
    pub id: String,
    pub weight: f64,
    pub usage: Usage,
}

/// A child that is actually contributing: terminal-successful, raster
/// loaded.
#[derive(Debug)]
pub struct ChildInput {
    pub id: String,
    pub weight: f64,
    pub raster: Raster,
    pub had_warnings: bool,
}

/// Resolve the contributing children of `unit` against the store.
///
/// Filters out DoNotUse/Excluded children, then requires every remaining
/// child to be Completed or CompletedWithWarnings with a readable raster.
pub fn collect_children(
    unit: &str,
    children: &[ChildRef],
    store: &ResultStore,
) -> Result<Vec<ChildInput>> {
    let included: Vec<&ChildRef> = children
        .iter()
        .filter(|c| c.usage == Usage::Use)
        .collect();

    let missing: Vec<String> = included
        .iter()
        .filter(|c| !store.status(&c.id).is_some_and(|s| s.is_success()))
        .map(|c| c.id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(AggregationError {
            unit: unit.to_string(),
            missing,
        }
        .into());
    }

    let mut inputs = Vec::with_capacity(included.len());
    for child in included {
        let record = store.get(&child.id).expect("checked above");
        let path = record
            .raster_path
            .as_ref()
            .ok_or_else(|| ProcessingError::MissingIntermediate {
                path: PathBuf::from(&child.id),
            })?
            .clone();
        let raster = read_ascii_grid(&path).map_err(|_| EngineError::Processing(
            ProcessingError::MissingIntermediate { path },
        ))?;
        inputs.push(ChildInput {
            id: child.id.clone(),
            weight: child.weight,
            raster,
            had_warnings: record.warnings > 0
                || record.status == crate::store::UnitStatus::CompletedWithWarnings,
        });
    }
    Ok(inputs)
}

/// Per-cell weighted mean with renormalization over the children valid at
/// that cell, clipped to [0, 5]. Computed as sum-then-divide so equal
/// weights combine without rounding drift.
pub fn weighted_combine(children: &[ChildInput], grid: &StudyAreaGrid) -> Raster {
    let mut out = grid.empty_raster();
    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let mut weighted = 0.0f64;
            let mut weight_sum = 0.0f64;
            for child in children {
                let v = child.raster.get(row, col);
                if !child.raster.is_nodata(v) {
                    weighted += child.weight * f64::from(v);
                    weight_sum += child.weight;
                }
            }
            if weight_sum > 0.0 {
                out.set(row, col, (weighted / weight_sum).clamp(0.0, 5.0) as f32);
            }
        }
    }
    out
}

/// Combined mosaic artifact: references the member rasters for
/// visualization without duplicating their data.
#[derive(Serialize)]
struct MosaicArtifact<'a> {
    code: &'a str,
    members: Vec<MosaicMember<'a>>,
}

#[derive(Serialize)]
struct MosaicMember<'a> {
    id: &'a str,
    weight: f64,
    path: String,
}

/// Write `<code>_output_combined.json` next to the aggregate raster.
pub fn write_mosaic(
    out_dir: &Path,
    code: &str,
    children: &[ChildInput],
    store: &ResultStore,
) -> Result<PathBuf> {
    let members = children
        .iter()
        .map(|c| MosaicMember {
            id: &c.id,
            weight: c.weight,
            path: store
                .get(&c.id)
                .and_then(|r| r.raster_path)
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        })
        .collect();
    let artifact = MosaicArtifact { code, members };

    let path = out_dir.join(format!("{code}_output_combined.json"));
    let mut file = AtomicWriteFile::open(&path)?;
    serde_json::to_writer_pretty(&mut file, &artifact)
        .map_err(|e| ProcessingError::Operation {
            op: "write_mosaic",
            reason: e.to_string(),
        })?;
    file.commit()?;
    debug!(code, path = %path.display(), "mosaic artifact written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{write_ascii_grid, NODATA};
    use crate::store::{ResultStore, UnitKind};
    use tempfile::TempDir;

    fn grid() -> StudyAreaGrid {
        StudyAreaGrid::from_extent("EPSG:32633", 0.0, 0.0, 300.0, 200.0, 100.0)
    }

    fn child(id: &str, weight: f64, usage: Usage) -> ChildRef {
        ChildRef {
            id: id.to_string(),
            weight,
            usage,
        }
    }

    fn completed_child(
        dir: &TempDir,
        store: &ResultStore,
        id: &str,
        value: f32,
    ) {
        let path = dir.path().join(format!("{id}.asc"));
        write_ascii_grid(&grid().filled_raster(value), &path).unwrap();
        store.register(id, UnitKind::Indicator);
        store.complete(id, &path, 0).unwrap();
    }

    #[test]
    fn test_equal_thirds_average_is_exact() {
        let inputs: Vec<ChildInput> = [3.0f32, 4.0, 5.0]
            .iter()
            .enumerate()
            .map(|(i, v)| ChildInput {
                id: format!("f{i}"),
                weight: 1.0 / 3.0,
                raster: grid().filled_raster(*v),
                had_warnings: false,
            })
            .collect();

        let out = weighted_combine(&inputs, &grid());
        // 1/3, 1/3, 1/3 over 3, 4, 5 is exactly 4.0.
        assert_eq!(out.get(0, 0), 4.0);
        assert_eq!(crate::classify::classify_score(f64::from(out.get(0, 0))), 4);
    }

    #[test]
    fn test_weights_renormalize_over_contributors() {
        // Weights 0.6/0.2 renormalize to 0.75/0.25.
        let inputs = vec![
            ChildInput {
                id: "a".to_string(),
                weight: 0.6,
                raster: grid().filled_raster(4.0),
                had_warnings: false,
            },
            ChildInput {
                id: "b".to_string(),
                weight: 0.2,
                raster: grid().filled_raster(0.0),
                had_warnings: false,
            },
        ];
        let out = weighted_combine(&inputs, &grid());
        assert_eq!(out.get(0, 0), 3.0);
    }

    #[test]
    fn test_nodata_cells_renormalize_per_cell() {
        let mut holed = grid().filled_raster(2.0);
        holed.set(0, 0, NODATA);
        let inputs = vec![
            ChildInput {
                id: "a".to_string(),
                weight: 0.5,
                raster: holed,
                had_warnings: false,
            },
            ChildInput {
                id: "b".to_string(),
                weight: 0.5,
                raster: grid().filled_raster(4.0),
                had_warnings: false,
            },
        ];
        let out = weighted_combine(&inputs, &grid());
        // Where both contribute: mean 3. Where only "b" does: 4.
        assert_eq!(out.get(1, 1), 3.0);
        assert_eq!(out.get(0, 0), 4.0);
    }

    #[test]
    fn test_all_nodata_cell_stays_nodata() {
        let inputs = vec![ChildInput {
            id: "a".to_string(),
            weight: 1.0,
            raster: grid().empty_raster(),
            had_warnings: false,
        }];
        let out = weighted_combine(&inputs, &grid());
        assert!(out.is_empty());
    }

    #[test]
    fn test_collect_children_requires_success() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(grid());
        completed_child(&dir, &store, "done", 3.0);
        store.register("broken", UnitKind::Indicator);
        store.fail(
            "broken",
            &EngineError::Cancelled,
            Vec::new(),
        );
        store.register("never_ran", UnitKind::Indicator);

        let children = vec![
            child("done", 0.5, Usage::Use),
            child("broken", 0.3, Usage::Use),
            child("never_ran", 0.2, Usage::Use),
        ];
        let err = collect_children("FAC", &children, &store).unwrap_err();
        let EngineError::Aggregation(agg) = err else {
            panic!("expected aggregation error");
        };
        assert_eq!(agg.unit, "FAC");
        assert_eq!(agg.missing, vec!["broken".to_string(), "never_ran".to_string()]);
    }

    #[test]
    fn test_excluded_children_do_not_block() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(grid());
        completed_child(&dir, &store, "used", 2.0);
        // Never even registered: excluded units do not exist for the check.
        let children = vec![
            child("used", 0.5, Usage::Use),
            child("off", 0.3, Usage::DoNotUse),
            child("gone", 0.2, Usage::Excluded),
        ];
        let inputs = collect_children("FAC", &children, &store).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].id, "used");
    }

    #[test]
    fn test_warning_flag_carries_through() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(grid());
        let path = dir.path().join("warned.asc");
        write_ascii_grid(&grid().filled_raster(1.0), &path).unwrap();
        store.register("warned", UnitKind::Indicator);
        store.complete("warned", &path, 3).unwrap();

        let inputs =
            collect_children("FAC", &[child("warned", 1.0, Usage::Use)], &store).unwrap();
        assert!(inputs[0].had_warnings);
    }

    #[test]
    fn test_mosaic_artifact_references_members() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(grid());
        completed_child(&dir, &store, "a", 1.0);
        completed_child(&dir, &store, "b", 2.0);

        let children = vec![child("a", 0.5, Usage::Use), child("b", 0.5, Usage::Use)];
        let inputs = collect_children("FAC", &children, &store).unwrap();
        let path = write_mosaic(dir.path(), "FAC", &inputs, &store).unwrap();

        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_output_combined.json"));
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["code"], "FAC");
        assert_eq!(parsed["members"].as_array().unwrap().len(), 2);
        // References only: the artifact holds paths, not pixel data.
        assert!(parsed["members"][0]["path"].as_str().unwrap().ends_with("a.asc"));
    }
}
