//! Buffer-based point workflows: multi-ring distance decay and the
//! single-buffer binary case.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{nearest_distance, write_score_raster, WorkflowCtx, WorkflowExecutor, WorkflowOutput};
use crate::error::{LoadError, Result};
use crate::grid::Raster;
use crate::layer::{reproject, Coord, GeometryType, VectorLayer};

/// Point layer scored by N ascending buffer rings: the innermost ring
/// scores 5, each further ring steps down linearly, beyond the last ring
/// is 0. A cell's score comes from its nearest point, which is the max
/// over per-point band scores.
pub struct MultiBufferDistanceDecay {
    pub layer: PathBuf,
    /// Strictly increasing, validated at config time.
    pub distances: Vec<f64>,
}

impl WorkflowExecutor for MultiBufferDistanceDecay {
    fn run(&self, indicator_id: &str, ctx: &WorkflowCtx) -> Result<WorkflowOutput> {
        let points = load_points(ctx, &self.layer)?;
        debug!(
            indicator = indicator_id,
            points = points.len(),
            rings = self.distances.len(),
            "multi-buffer decay"
        );

        let raster = score_by_distance(ctx, &points, |d| band_score(&self.distances, d))?;
        let raster_path = write_score_raster(ctx, indicator_id, raster)?;
        Ok(WorkflowOutput {
            raster_path,
            warnings: 0,
        })
    }
}

/// Binary in/out raster: 5 within the buffer distance, 0 outside.
pub struct SingleBufferPoint {
    pub layer: PathBuf,
    pub distance: f64,
}

impl WorkflowExecutor for SingleBufferPoint {
    fn run(&self, indicator_id: &str, ctx: &WorkflowCtx) -> Result<WorkflowOutput> {
        let points = load_points(ctx, &self.layer)?;
        debug!(
            indicator = indicator_id,
            points = points.len(),
            distance = self.distance,
            "single buffer"
        );

        let raster = score_by_distance(ctx, &points, |d| {
            if d <= self.distance {
                5.0
            } else {
                0.0
            }
        })?;
        let raster_path = write_score_raster(ctx, indicator_id, raster)?;
        Ok(WorkflowOutput {
            raster_path,
            warnings: 0,
        })
    }
}

/// Load, check geometry, and bring a point layer onto the grid CRS.
pub(crate) fn load_points(ctx: &WorkflowCtx, path: &Path) -> Result<Vec<Coord>> {
    let layer = ctx.adapter.load_vector(path)?;
    require_points(&layer, path)?;
    let layer = reproject(&layer, &ctx.grid.crs)?;
    Ok(layer.points())
}

fn require_points(layer: &Arc<VectorLayer>, path: &Path) -> Result<()> {
    if layer.geometry_type != GeometryType::Point {
        return Err(LoadError::GeometryMismatch {
            path: path.to_path_buf(),
            expected: "point",
            found: layer.geometry_type.name(),
        }
        .into());
    }
    Ok(())
}

/// Per-cell score from the distance to the nearest point. Cells with no
/// point anywhere (empty layer) score 0 rather than nodata: absence of
/// the amenity is a real, scoreable condition.
fn score_by_distance(
    ctx: &WorkflowCtx,
    points: &[Coord],
    score: impl Fn(f64) -> f32,
) -> Result<Raster> {
    let mut raster = ctx.grid.empty_raster();
    for row in 0..ctx.grid.rows {
        ctx.check_cancelled()?;
        for col in 0..ctx.grid.cols {
            let (x, y) = ctx.grid.cell_center(row, col);
            let v = match nearest_distance(points, x, y) {
                Some(d) => score(d),
                None => 0.0,
            };
            raster.set(row, col, v);
        }
    }
    Ok(raster)
}

/// Descending step function over the ring distances: band i of N scores
/// `5 * (N - i) / N`, beyond the last ring scores 0.
fn band_score(distances: &[f64], d: f64) -> f32 {
    let n = distances.len();
    for (i, ring) in distances.iter().enumerate() {
        if d <= *ring {
            return (5.0 * (n - i) as f64 / n as f64) as f32;
        }
    }
    0.0
}
