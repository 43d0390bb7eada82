//! Tabular coordinates to points, then impact-distance decay.
//!
//! Row-level failures are counted and skipped; a malformed row never
//! aborts the file. The engine surfaces the skip count as warnings, which
//! downgrades the indicator to CompletedWithWarnings.

use std::path::PathBuf;

use tracing::{debug, warn};

use super::{nearest_distance, write_score_raster, WorkflowCtx, WorkflowExecutor, WorkflowOutput};
use crate::error::{CsvParseError, LoadError, Result};
use crate::layer::Coord;

/// Parse a CSV of coordinate rows into points, then score each cell by
/// linear decay from 5 at distance 0 to 0 at the impact distance.
pub struct CsvToPointThenImpact {
    pub file: PathBuf,
    pub x_column: String,
    pub y_column: String,
    pub impact_distance: f64,
    /// CRS the coordinate columns are expressed in.
    pub crs: String,
}

impl WorkflowExecutor for CsvToPointThenImpact {
    fn run(&self, indicator_id: &str, ctx: &WorkflowCtx) -> Result<WorkflowOutput> {
        // Tabular files carry no spatial reference of their own; the
        // configured CRS must match the grid, same rule as any layer.
        if self.crs != ctx.grid.crs {
            return Err(crate::error::ProcessingError::UnsupportedReprojection {
                from: self.crs.clone(),
                to: ctx.grid.crs.clone(),
            }
            .into());
        }

        let (points, bad_rows) = self.parse_points()?;
        for bad in &bad_rows {
            warn!(file = %self.file.display(), "skipping malformed CSV row: {bad}");
        }
        debug!(
            indicator = indicator_id,
            points = points.len(),
            skipped = bad_rows.len(),
            "csv point conversion"
        );

        let mut raster = ctx.grid.empty_raster();
        for row in 0..ctx.grid.rows {
            ctx.check_cancelled()?;
            for col in 0..ctx.grid.cols {
                let (x, y) = ctx.grid.cell_center(row, col);
                let v = match nearest_distance(&points, x, y) {
                    Some(d) if d <= self.impact_distance => {
                        (5.0 * (1.0 - d / self.impact_distance)) as f32
                    }
                    _ => 0.0,
                };
                raster.set(row, col, v);
            }
        }

        let raster_path = write_score_raster(ctx, indicator_id, raster)?;
        Ok(WorkflowOutput {
            raster_path,
            warnings: bad_rows.len() as u32,
        })
    }
}

impl CsvToPointThenImpact {
    /// Returns the parsed points and the rows skipped as malformed
    /// (unparseable record, missing field, or bad number). Row errors are
    /// never fatal for the file.
    fn parse_points(&self) -> Result<(Vec<Coord>, Vec<CsvParseError>)> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.file)
            .map_err(|e| LoadError::InvalidLayer {
                path: self.file.clone(),
                reason: format!("cannot open CSV: {e}"),
            })?;

        let headers = reader
            .headers()
            .map_err(|e| LoadError::InvalidLayer {
                path: self.file.clone(),
                reason: format!("cannot read CSV header: {e}"),
            })?
            .clone();
        let x_idx = headers.iter().position(|h| h == self.x_column);
        let y_idx = headers.iter().position(|h| h == self.y_column);
        let (Some(x_idx), Some(y_idx)) = (x_idx, y_idx) else {
            return Err(LoadError::InvalidLayer {
                path: self.file.clone(),
                reason: format!(
                    "missing coordinate columns '{}'/'{}'",
                    self.x_column, self.y_column
                ),
            }
            .into());
        };

        let mut points = Vec::new();
        let mut bad_rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let row = line as u64 + 1;
            match parse_row(record, x_idx, y_idx) {
                Ok(coord) => points.push(coord),
                Err(reason) => bad_rows.push(CsvParseError { row, reason }),
            }
        }
        Ok((points, bad_rows))
    }
}

fn parse_row(
    record: std::result::Result<csv::StringRecord, csv::Error>,
    x_idx: usize,
    y_idx: usize,
) -> std::result::Result<Coord, String> {
    let record = record.map_err(|e| e.to_string())?;
    let field = |idx: usize, axis: &str| {
        record
            .get(idx)
            .ok_or_else(|| format!("missing {axis} field"))
    };
    // parse::<f64> accepts "NaN" and "inf", which would poison the
    // distance search, so non-finite coordinates are malformed too.
    let coordinate = |idx: usize, axis: &str| -> std::result::Result<f64, String> {
        let v = field(idx, axis)?
            .parse::<f64>()
            .map_err(|e| format!("bad {axis} coordinate: {e}"))?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err(format!("bad {axis} coordinate: non-finite value"))
        }
    };
    Ok(Coord {
        x: coordinate(x_idx, "x")?,
        y: coordinate(y_idx, "y")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::test_support::{read_output, test_ctx, TEST_CRS};
    use tempfile::TempDir;

    fn workflow(file: PathBuf, impact: f64) -> CsvToPointThenImpact {
        CsvToPointThenImpact {
            file,
            x_column: "x".to_string(),
            y_column: "y".to_string(),
            impact_distance: impact,
            crs: TEST_CRS.to_string(),
        }
    }

    #[test]
    fn test_malformed_rows_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incidents.csv");
        // 10 valid rows, 2 malformed.
        let mut rows = String::from("x,y,severity\n");
        for i in 0..5 {
            rows.push_str(&format!("{}.0,{}.0,1\n", i * 10, i * 10));
        }
        rows.push_str("not-a-number,50.0,1\n");
        for i in 5..10 {
            rows.push_str(&format!("{}.0,{}.0,2\n", i * 10, i * 10));
        }
        rows.push_str("60.0\n");
        std::fs::write(&path, rows).unwrap();

        let wf = workflow(path, 100.0);
        let (points, bad_rows) = wf.parse_points().unwrap();
        assert_eq!(points.len(), 10);
        assert_eq!(bad_rows.len(), 2);
        assert!(bad_rows[0].to_string().contains("bad x coordinate"));
    }

    #[test]
    fn test_non_finite_coordinates_are_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incidents.csv");
        std::fs::write(&path, "x,y\n10.0,20.0\nNaN,NaN\ninf,30.0\n40.0,-inf\n").unwrap();

        let wf = workflow(path, 100.0);
        let (points, bad_rows) = wf.parse_points().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(bad_rows.len(), 3);
        assert!(bad_rows
            .iter()
            .all(|e| e.to_string().contains("non-finite value")));
    }

    #[test]
    fn test_impact_decay_linear() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let path = dir.path().join("events.csv");
        // One point at a cell center (250, 250).
        std::fs::write(&path, "x,y\n250.0,250.0\n").unwrap();

        let wf = workflow(path, 200.0);
        let output = wf.run("incidents", &ctx).unwrap();
        assert_eq!(output.warnings, 0);
        let raster = read_output(&output);

        // At the point: full 5. One cell over (100 away): half decayed.
        assert_eq!(raster.value_at(250.0, 250.0), Some(5.0));
        assert_eq!(raster.value_at(350.0, 250.0), Some(2.5));
        // Beyond the impact distance: 0.
        assert_eq!(raster.value_at(450.0, 450.0), Some(0.0));
    }

    #[test]
    fn test_warning_count_flows_to_output() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "x,y\n250.0,250.0\nbroken,row\n").unwrap();

        let wf = workflow(path, 200.0);
        let output = wf.run("incidents", &ctx).unwrap();
        assert_eq!(output.warnings, 1);
    }

    #[test]
    fn test_missing_columns_is_load_error() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "lon,lat\n1.0,2.0\n").unwrap();

        let wf = workflow(path, 200.0);
        assert_eq!(wf.run("bad", &ctx).unwrap_err().kind(), "load");
    }

    #[test]
    fn test_foreign_crs_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "x,y\n1.0,2.0\n").unwrap();

        let mut wf = workflow(path, 200.0);
        wf.crs = "EPSG:4326".to_string();
        assert_eq!(wf.run("bad", &ctx).unwrap_err().kind(), "processing");
    }
}
