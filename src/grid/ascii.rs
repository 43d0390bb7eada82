//! ESRI ASCII grid (.asc) reading and writing.
//!
//! The spatial reference travels in a plain-text sidecar next to the
//! raster (`foo.asc` + `foo.crs` containing e.g. `EPSG:32633`). A raster
//! without a resolvable sidecar never loads; that failure belongs to the
//! loader, not to whatever processing step would have tripped over it.

use std::fs;
use std::io::Write;
use std::path::Path;

use atomic_write_file::AtomicWriteFile;

use super::{Raster, StudyAreaGrid, NODATA};
use crate::error::LoadError;

/// Sidecar path for a raster's CRS file.
fn crs_sidecar(path: &Path) -> std::path::PathBuf {
    path.with_extension("crs")
}

fn invalid(path: &Path, reason: impl Into<String>) -> LoadError {
    LoadError::InvalidLayer {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Read an ASCII grid plus its CRS sidecar.
pub fn read_ascii_grid(path: &Path) -> Result<Raster, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let crs = fs::read_to_string(crs_sidecar(path))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if crs.is_empty() {
        return Err(LoadError::UnresolvedCrs {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| invalid(path, e.to_string()))?;
    let mut tokens = content.split_whitespace();

    let mut cols = None;
    let mut rows = None;
    let mut origin_x = None;
    let mut origin_y = None;
    let mut cell_size = None;
    let mut nodata = NODATA;

    // Header lines are "key value" pairs; data starts at the first token
    // that is not a known key.
    let mut first_value: Option<f32> = None;
    while let Some(token) = tokens.next() {
        let key = token.to_ascii_lowercase();
        let known = matches!(
            key.as_str(),
            "ncols" | "nrows" | "xllcorner" | "yllcorner" | "cellsize" | "nodata_value"
        );
        if !known {
            first_value = Some(
                token
                    .parse::<f32>()
                    .map_err(|_| invalid(path, format!("unexpected token '{token}'")))?,
            );
            break;
        }
        let value = tokens
            .next()
            .ok_or_else(|| invalid(path, format!("missing value for '{key}'")))?;
        match key.as_str() {
            "ncols" => cols = Some(parse_usize(path, value)?),
            "nrows" => rows = Some(parse_usize(path, value)?),
            "xllcorner" => origin_x = Some(parse_f64(path, value)?),
            "yllcorner" => origin_y = Some(parse_f64(path, value)?),
            "cellsize" => cell_size = Some(parse_f64(path, value)?),
            "nodata_value" => nodata = parse_f64(path, value)? as f32,
            _ => unreachable!(),
        }
    }

    let (Some(cols), Some(rows), Some(origin_x), Some(origin_y), Some(cell_size)) =
        (cols, rows, origin_x, origin_y, cell_size)
    else {
        return Err(invalid(path, "incomplete ASCII grid header"));
    };

    let grid = StudyAreaGrid {
        crs,
        origin_x,
        origin_y,
        cell_size,
        rows,
        cols,
    };

    let mut data = Vec::with_capacity(grid.cell_count());
    if let Some(v) = first_value {
        data.push(v);
    }
    for token in tokens {
        let v = token
            .parse::<f32>()
            .map_err(|_| invalid(path, format!("bad cell value '{token}'")))?;
        data.push(v);
    }
    if data.len() != grid.cell_count() {
        return Err(invalid(
            path,
            format!(
                "expected {} cells, found {}",
                grid.cell_count(),
                data.len()
            ),
        ));
    }

    Ok(Raster { grid, data, nodata })
}

/// Write an ASCII grid and its CRS sidecar atomically, so a crashed run
/// never leaves a torn raster behind for a later existence check to find.
pub fn write_ascii_grid(raster: &Raster, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = AtomicWriteFile::open(path)?;
    writeln!(file, "ncols {}", raster.grid.cols)?;
    writeln!(file, "nrows {}", raster.grid.rows)?;
    writeln!(file, "xllcorner {}", raster.grid.origin_x)?;
    writeln!(file, "yllcorner {}", raster.grid.origin_y)?;
    writeln!(file, "cellsize {}", raster.grid.cell_size)?;
    writeln!(file, "NODATA_value {}", raster.nodata)?;
    for row in 0..raster.grid.rows {
        let line: Vec<String> = (0..raster.grid.cols)
            .map(|col| format!("{}", raster.get(row, col)))
            .collect();
        writeln!(file, "{}", line.join(" "))?;
    }
    file.commit()?;

    let mut crs_file = AtomicWriteFile::open(crs_sidecar(path))?;
    writeln!(crs_file, "{}", raster.grid.crs)?;
    crs_file.commit()?;
    Ok(())
}

fn parse_usize(path: &Path, value: &str) -> Result<usize, LoadError> {
    value
        .parse::<usize>()
        .map_err(|_| invalid(path, format!("bad header value '{value}'")))
}

fn parse_f64(path: &Path, value: &str) -> Result<f64, LoadError> {
    value
        .parse::<f64>()
        .map_err(|_| invalid(path, format!("bad header value '{value}'")))
}
