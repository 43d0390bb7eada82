//! Common analysis grid and in-memory rasters.
//!
//! Every raster produced anywhere in the pipeline aligns to one
//! [`StudyAreaGrid`] (same CRS, origin, cell size, and shape) before it may
//! participate in aggregation. The grid is immutable for the whole run.

mod ascii;

pub use ascii::{read_ascii_grid, write_ascii_grid};

use crate::error::{GridAlignmentError, ProcessingError};

/// Sentinel written for cells with no value.
pub const NODATA: f32 = -9999.0;

/// Tolerance for comparing grid origins and cell sizes.
const GEO_EPSILON: f64 = 1e-6;

/// The common analysis raster frame: CRS, lower-left origin, square cell
/// size, and shape. Owned by the orchestrator, shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyAreaGrid {
    /// Spatial reference code, e.g. "EPSG:32633".
    pub crs: String,
    /// X of the lower-left corner.
    pub origin_x: f64,
    /// Y of the lower-left corner.
    pub origin_y: f64,
    /// Cell edge length in CRS units.
    pub cell_size: f64,
    pub rows: usize,
    pub cols: usize,
}

impl StudyAreaGrid {
    /// Build a grid covering the given extent. The extent is expanded up to
    /// one cell so rows/cols cover it completely.
    pub fn from_extent(
        crs: impl Into<String>,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
        cell_size: f64,
    ) -> Self {
        let cols = ((max_x - min_x) / cell_size).ceil().max(1.0) as usize;
        let rows = ((max_y - min_y) / cell_size).ceil().max(1.0) as usize;
        Self {
            crs: crs.into(),
            origin_x: min_x,
            origin_y: min_y,
            cell_size,
            rows,
            cols,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// World coordinate of a cell center. Row 0 is the top row.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.origin_x + (col as f64 + 0.5) * self.cell_size;
        let y = self.origin_y + (self.rows - row) as f64 * self.cell_size - 0.5 * self.cell_size;
        (x, y)
    }

    /// Cell containing a world coordinate, or None when outside the grid.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.origin_x) / self.cell_size).floor();
        let row_from_bottom = ((y - self.origin_y) / self.cell_size).floor();
        if col < 0.0
            || row_from_bottom < 0.0
            || col >= self.cols as f64
            || row_from_bottom >= self.rows as f64
        {
            return None;
        }
        Some((self.rows - 1 - row_from_bottom as usize, col as usize))
    }

    /// (min_x, min_y, max_x, max_y) covered by the grid.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        (
            self.origin_x,
            self.origin_y,
            self.origin_x + self.cols as f64 * self.cell_size,
            self.origin_y + self.rows as f64 * self.cell_size,
        )
    }

    /// Empty raster in this frame, filled with nodata.
    pub fn empty_raster(&self) -> Raster {
        Raster {
            grid: self.clone(),
            data: vec![NODATA; self.cell_count()],
            nodata: NODATA,
        }
    }

    /// Raster in this frame uniformly filled with a value.
    pub fn filled_raster(&self, value: f32) -> Raster {
        Raster {
            grid: self.clone(),
            data: vec![value; self.cell_count()],
            nodata: NODATA,
        }
    }
}

/// Resampling policy for bringing a foreign raster onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    Nearest,
}

/// Single-band in-memory raster with its own frame.
#[derive(Debug, Clone)]
pub struct Raster {
    pub grid: StudyAreaGrid,
    pub data: Vec<f32>,
    pub nodata: f32,
}

impl Raster {
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.grid.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.grid.cols + col] = value;
    }

    pub fn is_nodata(&self, value: f32) -> bool {
        (value - self.nodata).abs() < f32::EPSILON || value.is_nan()
    }

    /// Value at a world coordinate, None when outside or nodata.
    pub fn value_at(&self, x: f64, y: f64) -> Option<f32> {
        let (row, col) = self.grid.cell_at(x, y)?;
        let v = self.get(row, col);
        if self.is_nodata(v) {
            None
        } else {
            Some(v)
        }
    }

    /// A raster is non-empty when at least one cell holds a value.
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&v| self.is_nodata(v))
    }

    /// Exact frame match against the study-area grid: CRS, origin, cell
    /// size, and shape.
    pub fn is_aligned_to(&self, grid: &StudyAreaGrid) -> bool {
        self.grid.crs == grid.crs
            && (self.grid.origin_x - grid.origin_x).abs() < GEO_EPSILON
            && (self.grid.origin_y - grid.origin_y).abs() < GEO_EPSILON
            && (self.grid.cell_size - grid.cell_size).abs() < GEO_EPSILON
            && self.grid.rows == grid.rows
            && self.grid.cols == grid.cols
    }

    /// Minimum and maximum over valid cells.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        let mut range: Option<(f32, f32)> = None;
        for &v in &self.data {
            if self.is_nodata(v) {
                continue;
            }
            range = Some(match range {
                None => (v, v),
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
            });
        }
        range
    }

    /// Clamp every valid cell into [lo, hi].
    pub fn clamp_values(&mut self, lo: f32, hi: f32) {
        let nodata = self.nodata;
        for v in &mut self.data {
            if (*v - nodata).abs() >= f32::EPSILON && !v.is_nan() {
                *v = v.clamp(lo, hi);
            }
        }
    }
}

/// Bring a raster onto the study-area grid.
///
/// Inputs with no spatial reference are rejected outright; inputs in a
/// different CRS are rejected too, because coordinate transforms belong to
/// the host GIS, not this engine. An already-aligned raster passes through
/// unchanged.
pub fn resample(
    input: &Raster,
    grid: &StudyAreaGrid,
    _policy: Resampling,
) -> Result<Raster, GridAlignmentError> {
    if input.grid.crs.trim().is_empty() {
        return Err(GridAlignmentError::MissingCrs);
    }
    if input.grid.crs != grid.crs {
        return Err(GridAlignmentError::CrsMismatch {
            input: input.grid.crs.clone(),
            grid: grid.crs.clone(),
        });
    }
    if input.is_aligned_to(grid) {
        return Ok(input.clone());
    }

    // Nearest neighbor: sample the source at each target cell center.
    let mut out = grid.empty_raster();
    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let (x, y) = grid.cell_center(row, col);
            if let Some(v) = input.value_at(x, y) {
                out.set(row, col, v);
            }
        }
    }
    Ok(out)
}

/// Fill nodata cells from the mean of their valid 3x3 neighbors, repeating
/// until the raster is filled or no pass makes progress. A raster with no
/// valid cells at all cannot be filled and is a processing failure.
pub fn fill_nodata(input: &Raster) -> Result<Raster, ProcessingError> {
    if input.is_empty() {
        return Err(ProcessingError::Operation {
            op: "fill_nodata",
            reason: "raster has no valid cells".to_string(),
        });
    }

    let mut out = input.clone();
    loop {
        let mut holes = Vec::new();
        for row in 0..out.grid.rows {
            for col in 0..out.grid.cols {
                if out.is_nodata(out.get(row, col)) {
                    holes.push((row, col));
                }
            }
        }
        if holes.is_empty() {
            return Ok(out);
        }

        let mut filled_any = false;
        let snapshot = out.clone();
        for (row, col) in holes {
            let mut sum = 0.0f64;
            let mut n = 0u32;
            for dr in -1i64..=1 {
                for dc in -1i64..=1 {
                    let (nr, nc) = (row as i64 + dr, col as i64 + dc);
                    if nr < 0 || nc < 0 || nr >= out.grid.rows as i64 || nc >= out.grid.cols as i64
                    {
                        continue;
                    }
                    let v = snapshot.get(nr as usize, nc as usize);
                    if !snapshot.is_nodata(v) {
                        sum += v as f64;
                        n += 1;
                    }
                }
            }
            if n > 0 {
                out.set(row, col, (sum / n as f64) as f32);
                filled_any = true;
            }
        }
        if !filled_any {
            // Unreachable given at least one valid cell, kept as a guard.
            return Err(ProcessingError::Operation {
                op: "fill_nodata",
                reason: "fill made no progress".to_string(),
            });
        }
    }
}
