//! Polygon attribute classification into discrete scores.

use std::path::PathBuf;

use tracing::{debug, warn};

use super::{write_score_raster, WorkflowCtx, WorkflowExecutor, WorkflowOutput};
use crate::error::{LoadError, Result};
use crate::config::ClassRange;
use crate::layer::{reproject, GeometryType};

/// Loads a polygon layer, reprojects it onto the grid CRS, classifies the
/// configured numeric attribute into discrete scores, and rasterizes by
/// cell-center containment.
///
/// The reprojection step is where a CRS-less layer would historically
/// surface as a confusing processing failure; it cannot here, because the
/// adapter refuses to load such a layer in the first place.
pub struct ClassifyPolygonIntoClasses {
    pub layer: PathBuf,
    pub attribute: String,
    pub classes: Vec<ClassRange>,
}

impl WorkflowExecutor for ClassifyPolygonIntoClasses {
    fn run(&self, indicator_id: &str, ctx: &WorkflowCtx) -> Result<WorkflowOutput> {
        let layer = ctx.adapter.load_vector(&self.layer)?;
        if layer.geometry_type != GeometryType::Polygon {
            return Err(LoadError::GeometryMismatch {
                path: self.layer.clone(),
                expected: "polygon",
                found: layer.geometry_type.name(),
            }
            .into());
        }
        let layer = reproject(&layer, &ctx.grid.crs)?;

        // Score per feature; features whose attribute is missing or
        // matches no class leave their cells unscored and count as
        // warnings.
        let mut scored: Vec<(usize, f32)> = Vec::new();
        let mut warnings = 0u32;
        for (i, feature) in layer.features.iter().enumerate() {
            let score = feature
                .numeric_attribute(&self.attribute)
                .and_then(|v| self.class_score(v));
            match score {
                Some(s) => scored.push((i, s)),
                None => {
                    warn!(
                        indicator = indicator_id,
                        feature = i,
                        attribute = %self.attribute,
                        "polygon attribute missing or unclassified"
                    );
                    warnings += 1;
                }
            }
        }
        debug!(
            indicator = indicator_id,
            polygons = layer.features.len(),
            classified = scored.len(),
            "polygon classification"
        );

        let mut raster = ctx.grid.empty_raster();
        for row in 0..ctx.grid.rows {
            ctx.check_cancelled()?;
            for col in 0..ctx.grid.cols {
                let (x, y) = ctx.grid.cell_center(row, col);
                for (i, score) in &scored {
                    if layer.features[*i].geometry.contains(x, y) {
                        raster.set(row, col, *score);
                        break;
                    }
                }
            }
        }

        let raster_path = write_score_raster(ctx, indicator_id, raster)?;
        Ok(WorkflowOutput {
            raster_path,
            warnings,
        })
    }
}

impl ClassifyPolygonIntoClasses {
    /// First matching half-open range [min, max) wins.
    fn class_score(&self, value: f64) -> Option<f32> {
        self.classes
            .iter()
            .find(|c| value >= c.min && value < c.max)
            .map(|c| c.score as f32)
    }
}
