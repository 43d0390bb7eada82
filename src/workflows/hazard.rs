//! Multi-hazard composite: up to five hazard rasters combined into one
//! 0-5 score.
//!
//! Each hazard is processed independently; one hazard failing does not
//! abort the others. Failed hazards are excluded from the weighted sum
//! (weights renormalize over the survivors) and surface as warnings.

use tracing::{debug, warn};

use super::{write_score_raster, WorkflowCtx, WorkflowExecutor, WorkflowOutput};
use crate::config::HazardConfig;
use crate::error::{ProcessingError, Result};
use crate::grid::{fill_nodata, resample, Raster, Resampling};

pub struct EnvironmentalHazardComposite {
    pub hazards: Vec<HazardConfig>,
}

impl WorkflowExecutor for EnvironmentalHazardComposite {
    fn run(&self, indicator_id: &str, ctx: &WorkflowCtx) -> Result<WorkflowOutput> {
        let mut prepared: Vec<(f64, Raster)> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for hazard in &self.hazards {
            ctx.check_cancelled()?;
            match prepare_hazard(ctx, hazard) {
                Ok(raster) => prepared.push((hazard.weight, raster)),
                Err(e) => {
                    warn!(
                        indicator = indicator_id,
                        hazard = %hazard.path.display(),
                        error = %e,
                        "hazard excluded from composite"
                    );
                    failures.push(format!("{}: {e}", hazard.path.display()));
                }
            }
        }

        if prepared.is_empty() {
            return Err(ProcessingError::Operation {
                op: "hazard_composite",
                reason: format!("all hazards failed: {}", failures.join("; ")),
            }
            .into());
        }
        debug!(
            indicator = indicator_id,
            used = prepared.len(),
            failed = failures.len(),
            "hazard composite"
        );

        // Per cell: weighted mean of the normalized hazards present at
        // that cell, weights renormalized over contributors, scaled to 0-5.
        let mut raster = ctx.grid.empty_raster();
        for row in 0..ctx.grid.rows {
            ctx.check_cancelled()?;
            for col in 0..ctx.grid.cols {
                let mut weighted = 0.0f64;
                let mut weight_sum = 0.0f64;
                for (weight, hazard) in &prepared {
                    let v = hazard.get(row, col);
                    if !hazard.is_nodata(v) {
                        weighted += weight * f64::from(v);
                        weight_sum += weight;
                    }
                }
                if weight_sum > 0.0 {
                    raster.set(row, col, (5.0 * weighted / weight_sum) as f32);
                }
            }
        }

        let raster_path = write_score_raster(ctx, indicator_id, raster)?;
        Ok(WorkflowOutput {
            raster_path,
            warnings: failures.len() as u32,
        })
    }
}

/// Load one hazard, recondition nodata, bring it onto the grid, and
/// normalize to [0, 1] by its own value range.
fn prepare_hazard(ctx: &WorkflowCtx, hazard: &HazardConfig) -> Result<Raster> {
    let raster = ctx.adapter.load_raster(&hazard.path)?;
    let filled = fill_nodata(&raster)?;
    let mut aligned = resample(&filled, &ctx.grid, Resampling::Nearest)?;

    let (lo, hi) = aligned
        .value_range()
        .ok_or_else(|| ProcessingError::Operation {
            op: "hazard_normalize",
            reason: "raster has no valid cells after resampling".to_string(),
        })?;
    let span = hi - lo;
    let nodata = aligned.nodata;
    for v in &mut aligned.data {
        if (*v - nodata).abs() >= f32::EPSILON && !v.is_nan() {
            *v = if span > 0.0 { (*v - lo) / span } else { 0.0 };
        }
    }
    Ok(aligned)
}
