//! Indicator workflows: seven interchangeable algorithms that each turn
//! one configured indicator into a classified 0-5 raster on the common
//! grid.
//!
//! Dispatch is by variant, not by mode string: [`executor_for`] selects
//! one [`WorkflowExecutor`] per indicator at construction time, so adding
//! a mode is additive and no call site branches on mode names.

mod buffer;
mod classify_polygon;
mod csv_points;
mod fixed;
mod hazard;
mod polyline;

pub use buffer::{MultiBufferDistanceDecay, SingleBufferPoint};
pub use classify_polygon::ClassifyPolygonIntoClasses;
pub use csv_points::CsvToPointThenImpact;
pub use fixed::FixedIndexScore;
pub use hazard::EnvironmentalHazardComposite;
pub use polyline::PolylinePerCell;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AnalysisMode;
use crate::error::{EngineError, Result};
use crate::grid::{write_ascii_grid, Raster, StudyAreaGrid};
use crate::layer::{Coord, LayerProvider};

/// Shared read-only context handed to every workflow invocation.
#[derive(Clone)]
pub struct WorkflowCtx {
    pub grid: Arc<StudyAreaGrid>,
    pub adapter: Arc<dyn LayerProvider>,
    pub out_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl WorkflowCtx {
    /// Cooperative cancellation point; workflows call this between row
    /// sweeps so a cancelled run stops promptly instead of finishing the
    /// grid.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What a successful workflow hands back: where it wrote its raster, and
/// how many non-fatal problems it swallowed along the way.
#[derive(Debug, Clone)]
pub struct WorkflowOutput {
    pub raster_path: PathBuf,
    pub warnings: u32,
}

/// One implementation per analysis mode.
pub trait WorkflowExecutor: Send + Sync {
    fn run(&self, indicator_id: &str, ctx: &WorkflowCtx) -> Result<WorkflowOutput>;
}

/// Select the executor for an indicator's analysis mode. Called once at
/// indicator construction.
pub fn executor_for(mode: &AnalysisMode) -> Box<dyn WorkflowExecutor> {
    match mode.clone() {
        AnalysisMode::FixedIndexScore { value, footprint } => {
            Box::new(FixedIndexScore { value, footprint })
        }
        AnalysisMode::MultiBufferDistanceDecay { layer, distances } => {
            Box::new(MultiBufferDistanceDecay { layer, distances })
        }
        AnalysisMode::SingleBufferPoint { layer, distance } => {
            Box::new(SingleBufferPoint { layer, distance })
        }
        AnalysisMode::PolylinePerCell { layer } => Box::new(PolylinePerCell { layer }),
        AnalysisMode::CsvToPointThenImpact {
            file,
            x_column,
            y_column,
            impact_distance,
            crs,
        } => Box::new(CsvToPointThenImpact {
            file,
            x_column,
            y_column,
            impact_distance,
            crs,
        }),
        AnalysisMode::ClassifyPolygonIntoClasses {
            layer,
            attribute,
            classes,
        } => Box::new(ClassifyPolygonIntoClasses {
            layer,
            attribute,
            classes,
        }),
        AnalysisMode::EnvironmentalHazardComposite { hazards } => {
            Box::new(EnvironmentalHazardComposite { hazards })
        }
    }
}

/// Clamp to the score scale and write the indicator raster.
pub(crate) fn write_score_raster(
    ctx: &WorkflowCtx,
    indicator_id: &str,
    mut raster: Raster,
) -> Result<PathBuf> {
    raster.clamp_values(0.0, 5.0);
    let path = ctx.out_dir.join(format!("{indicator_id}.asc"));
    write_ascii_grid(&raster, &path)?;
    Ok(path)
}

/// Squared-distance nearest-point search. Plain scan; point layers in
/// this pipeline are small relative to the grid.
pub(crate) fn nearest_distance(points: &[Coord], x: f64, y: f64) -> Option<f64> {
    points
        .iter()
        .map(|p| {
            let (dx, dy) = (p.x - x, p.y - y);
            dx * dx + dy * dy
        })
        .fold(None, |best: Option<f64>, d2| match best {
            Some(b) if b <= d2 => Some(b),
            _ => Some(d2),
        })
        .map(f64::sqrt)
}
