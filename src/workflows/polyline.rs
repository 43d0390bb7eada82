//! Per-cell polyline presence/density scoring.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;

use super::{write_score_raster, WorkflowCtx, WorkflowExecutor, WorkflowOutput};
use crate::error::{LoadError, Result};
use crate::layer::{reproject, Coord, Geometry, GeometryType};

/// Counts, per grid cell, the distinct line features passing through it,
/// then normalizes counts to 0-5 over the grid-wide maximum. A study area
/// no line touches yields a valid all-zero raster.
pub struct PolylinePerCell {
    pub layer: PathBuf,
}

impl WorkflowExecutor for PolylinePerCell {
    fn run(&self, indicator_id: &str, ctx: &WorkflowCtx) -> Result<WorkflowOutput> {
        let layer = ctx.adapter.load_vector(&self.layer)?;
        if layer.geometry_type != GeometryType::Line {
            return Err(LoadError::GeometryMismatch {
                path: self.layer.clone(),
                expected: "line",
                found: layer.geometry_type.name(),
            }
            .into());
        }
        let layer = reproject(&layer, &ctx.grid.crs)?;

        let mut counts = vec![0u32; ctx.grid.cell_count()];
        for feature in &layer.features {
            ctx.check_cancelled()?;
            let Geometry::Line(vertices) = &feature.geometry else {
                continue;
            };
            // Each feature contributes at most once per cell.
            let mut touched = HashSet::new();
            for pair in vertices.windows(2) {
                trace_segment(ctx, &pair[0], &pair[1], &mut touched);
            }
            for (row, col) in touched {
                counts[row * ctx.grid.cols + col] += 1;
            }
        }

        let max = counts.iter().copied().max().unwrap_or(0);
        debug!(
            indicator = indicator_id,
            features = layer.features.len(),
            max_density = max,
            "polyline density"
        );

        let mut raster = ctx.grid.filled_raster(0.0);
        if max > 0 {
            for (i, count) in counts.iter().enumerate() {
                raster.data[i] = 5.0 * *count as f32 / max as f32;
            }
        }

        let raster_path = write_score_raster(ctx, indicator_id, raster)?;
        Ok(WorkflowOutput {
            raster_path,
            warnings: 0,
        })
    }
}

/// Collect cells crossed by a segment by sampling at half-cell steps.
fn trace_segment(ctx: &WorkflowCtx, a: &Coord, b: &Coord, touched: &mut HashSet<(usize, usize)>) {
    let length = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
    let step = ctx.grid.cell_size / 2.0;
    let samples = (length / step).ceil().max(1.0) as usize;
    for i in 0..=samples {
        let t = i as f64 / samples as f64;
        let x = a.x + (b.x - a.x) * t;
        let y = a.y + (b.y - a.y) * t;
        if let Some(cell) = ctx.grid.cell_at(x, y) {
            touched.insert(cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::test_support::{read_output, test_ctx, TEST_CRS};
    use tempfile::TempDir;

    fn write_line_layer(dir: &TempDir, name: &str, lines: &[Vec<(f64, f64)>]) -> PathBuf {
        let features: Vec<String> = lines
            .iter()
            .map(|line| {
                let coords: Vec<String> =
                    line.iter().map(|(x, y)| format!("[{x}, {y}]")).collect();
                format!(
                    r#"{{"type": "Feature", "geometry": {{"type": "LineString", "coordinates": [{}]}}, "properties": {{}}}}"#,
                    coords.join(",")
                )
            })
            .collect();
        let doc = format!(
            r#"{{"type": "FeatureCollection",
                "crs": {{"type": "name", "properties": {{"name": "{TEST_CRS}"}}}},
                "features": [{}]}}"#,
            features.join(",")
        );
        let path = dir.path().join(name);
        std::fs::write(&path, doc).unwrap();
        path
    }

    #[test]
    fn test_single_line_marks_crossed_cells() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        // Horizontal line through the middle row (y = 250).
        let layer = write_line_layer(&dir, "road.geojson", &[vec![(0.0, 250.0), (500.0, 250.0)]]);

        let wf = PolylinePerCell { layer };
        let output = wf.run("roads", &ctx).unwrap();
        let raster = read_output(&output);

        // Every cell in the middle row has max density -> 5.
        for x in [50.0, 150.0, 250.0, 350.0, 450.0] {
            assert_eq!(raster.value_at(x, 250.0), Some(5.0));
        }
        // Rows away from the line are 0.
        assert_eq!(raster.value_at(250.0, 450.0), Some(0.0));
    }

    #[test]
    fn test_density_normalizes_over_grid_max() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        // Two lines overlap in the middle row; one more crosses vertically.
        let layer = write_line_layer(
            &dir,
            "roads.geojson",
            &[
                vec![(0.0, 250.0), (500.0, 250.0)],
                vec![(0.0, 250.0), (500.0, 250.0)],
            ],
        );

        let wf = PolylinePerCell { layer };
        let output = wf.run("roads", &ctx).unwrap();
        let raster = read_output(&output);

        // Overlapping cells have count 2 (the max) -> 5; empty cells 0.
        assert_eq!(raster.value_at(250.0, 250.0), Some(5.0));
        assert_eq!(raster.value_at(250.0, 50.0), Some(0.0));
    }

    #[test]
    fn test_no_lines_in_extent_is_valid_zero_raster() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        // Line entirely outside the study area.
        let layer = write_line_layer(
            &dir,
            "far.geojson",
            &[vec![(9000.0, 9000.0), (9500.0, 9000.0)]],
        );

        let wf = PolylinePerCell { layer };
        let output = wf.run("far", &ctx).unwrap();
        let raster = read_output(&output);
        assert_eq!(raster.value_range(), Some((0.0, 0.0)));
    }

    #[test]
    fn test_point_layer_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let layer =
            crate::workflows::test_support::write_point_layer(&dir, "pts.geojson", &[(1.0, 1.0)]);
        let wf = PolylinePerCell { layer };
        assert_eq!(wf.run("bad", &ctx).unwrap_err().kind(), "load");
    }
}
