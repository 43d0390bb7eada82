//! Fixed index score: no spatial input, uniform fill.

use std::path::PathBuf;

use tracing::debug;

use super::{write_score_raster, WorkflowCtx, WorkflowExecutor, WorkflowOutput};
use crate::error::Result;
use crate::layer::{reproject, GeometryType};

/// Fills the indicator's footprint (or the whole study area when no
/// footprint is configured) uniformly with the configured 0-5 value.
pub struct FixedIndexScore {
    pub value: f64,
    pub footprint: Option<PathBuf>,
}

impl WorkflowExecutor for FixedIndexScore {
    fn run(&self, indicator_id: &str, ctx: &WorkflowCtx) -> Result<WorkflowOutput> {
        let raster = match &self.footprint {
            None => ctx.grid.filled_raster(self.value as f32),
            Some(path) => {
                let layer = ctx.adapter.load_vector(path)?;
                if layer.geometry_type != GeometryType::Polygon {
                    return Err(crate::error::LoadError::GeometryMismatch {
                        path: path.clone(),
                        expected: "polygon",
                        found: layer.geometry_type.name(),
                    }
                    .into());
                }
                let layer = reproject(&layer, &ctx.grid.crs)?;

                let mut raster = ctx.grid.empty_raster();
                for row in 0..ctx.grid.rows {
                    ctx.check_cancelled()?;
                    for col in 0..ctx.grid.cols {
                        let (x, y) = ctx.grid.cell_center(row, col);
                        if layer.features.iter().any(|f| f.geometry.contains(x, y)) {
                            raster.set(row, col, self.value as f32);
                        }
                    }
                }
                raster
            }
        };

        debug!(indicator = indicator_id, value = self.value, "fixed index fill");
        let raster_path = write_score_raster(ctx, indicator_id, raster)?;
        Ok(WorkflowOutput {
            raster_path,
            warnings: 0,
        })
    }
}
