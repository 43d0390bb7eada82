//! File-backed layer provider: GeoJSON vectors, ASCII-grid rasters, and a
//! per-run read-only cache of loaded reference layers.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::debug;

use super::{Coord, Feature, Geometry, GeometryType, LayerProvider, VectorLayer};
use crate::error::LoadError;
use crate::grid::{read_ascii_grid, Raster};

/// Loads vector layers from GeoJSON and rasters from ASCII grids.
///
/// Vector layers are cached for the duration of the run; the cache is
/// read-only after insertion (workflows only ever receive `Arc` clones).
pub struct FileAdapter {
    vector_cache: Mutex<HashMap<PathBuf, Arc<VectorLayer>>>,
}

impl FileAdapter {
    pub fn new() -> Self {
        Self {
            vector_cache: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for FileAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerProvider for FileAdapter {
    fn load_vector(&self, path: &Path) -> Result<Arc<VectorLayer>, LoadError> {
        if let Some(layer) = self.vector_cache.lock().unwrap().get(path) {
            debug!(path = %path.display(), "vector layer served from cache");
            return Ok(Arc::clone(layer));
        }

        let layer = Arc::new(load_geojson(path)?);
        debug!(
            path = %path.display(),
            features = layer.features.len(),
            crs = %layer.crs,
            "vector layer loaded"
        );
        self.vector_cache
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Arc::clone(&layer));
        Ok(layer)
    }

    fn load_raster(&self, path: &Path) -> Result<Raster, LoadError> {
        let raster = read_ascii_grid(path)?;
        debug!(
            path = %path.display(),
            rows = raster.grid.rows,
            cols = raster.grid.cols,
            crs = %raster.grid.crs,
            "raster loaded"
        );
        Ok(raster)
    }
}

#[derive(Deserialize)]
struct GeoJsonDoc {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    crs: Option<GeoJsonCrs>,
    #[serde(default)]
    features: Vec<GeoJsonFeature>,
}

#[derive(Deserialize)]
struct GeoJsonCrs {
    properties: GeoJsonCrsProps,
}

#[derive(Deserialize)]
struct GeoJsonCrsProps {
    name: String,
}

#[derive(Deserialize)]
struct GeoJsonFeature {
    geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct GeoJsonGeometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: serde_json::Value,
}

fn load_geojson(path: &Path) -> Result<VectorLayer, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| LoadError::InvalidLayer {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let doc: GeoJsonDoc =
        serde_json::from_str(&content).map_err(|e| LoadError::InvalidLayer {
            path: path.to_path_buf(),
            reason: format!("not valid GeoJSON: {e}"),
        })?;
    if doc.kind != "FeatureCollection" {
        return Err(LoadError::InvalidLayer {
            path: path.to_path_buf(),
            reason: format!("expected FeatureCollection, found {}", doc.kind),
        });
    }

    // CRS resolution order: document crs member, then sidecar file. No
    // fallback default; an unresolved CRS is a load failure by contract.
    let crs = doc
        .crs
        .map(|c| normalize_crs(&c.properties.name))
        .filter(|c| !c.is_empty())
        .or_else(|| {
            fs::read_to_string(path.with_extension("crs"))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|c| !c.is_empty())
        })
        .ok_or_else(|| LoadError::UnresolvedCrs {
            path: path.to_path_buf(),
        })?;

    let mut features = Vec::new();
    for gf in doc.features {
        let Some(geometry) = gf.geometry else {
            continue; // null geometry carries nothing to rasterize
        };
        let attributes: HashMap<String, serde_json::Value> =
            gf.properties.into_iter().collect();
        for geom in parse_geometry(path, &geometry)? {
            features.push(Feature {
                geometry: geom,
                attributes: attributes.clone(),
            });
        }
    }

    let geometry_type = features
        .first()
        .map(|f| f.geometry.geometry_type())
        .unwrap_or(GeometryType::Point);
    if let Some(odd) = features
        .iter()
        .find(|f| f.geometry.geometry_type() != geometry_type)
    {
        return Err(LoadError::GeometryMismatch {
            path: path.to_path_buf(),
            expected: geometry_type.name(),
            found: odd.geometry.geometry_type().name(),
        });
    }

    Ok(VectorLayer::from_features(crs, geometry_type, features))
}

/// Accepts "EPSG:4326" as-is and urn forms like
/// "urn:ogc:def:crs:EPSG::4326", normalized to "EPSG:4326".
fn normalize_crs(name: &str) -> String {
    let name = name.trim();
    if let Some(rest) = name.strip_prefix("urn:ogc:def:crs:") {
        let mut parts = rest.split(':').filter(|p| !p.is_empty());
        if let (Some(authority), Some(code)) = (parts.next(), parts.last()) {
            return format!("{authority}:{code}");
        }
    }
    name.to_string()
}

/// Multi-part geometries are flattened into one feature per part.
fn parse_geometry(path: &Path, geom: &GeoJsonGeometry) -> Result<Vec<Geometry>, LoadError> {
    let bad = |reason: String| LoadError::InvalidLayer {
        path: path.to_path_buf(),
        reason,
    };

    let parsed = match geom.kind.as_str() {
        "Point" => vec![Geometry::Point(parse_coord(&geom.coordinates).ok_or_else(
            || bad("bad Point coordinates".to_string()),
        )?)],
        "MultiPoint" => coord_array(&geom.coordinates)
            .ok_or_else(|| bad("bad MultiPoint coordinates".to_string()))?
            .into_iter()
            .map(Geometry::Point)
            .collect(),
        "LineString" => vec![Geometry::Line(
            coord_array(&geom.coordinates)
                .ok_or_else(|| bad("bad LineString coordinates".to_string()))?,
        )],
        "MultiLineString" => nested_coord_array(&geom.coordinates)
            .ok_or_else(|| bad("bad MultiLineString coordinates".to_string()))?
            .into_iter()
            .map(Geometry::Line)
            .collect(),
        "Polygon" => vec![Geometry::Polygon(
            nested_coord_array(&geom.coordinates)
                .ok_or_else(|| bad("bad Polygon coordinates".to_string()))?,
        )],
        "MultiPolygon" => {
            let polys = geom
                .coordinates
                .as_array()
                .ok_or_else(|| bad("bad MultiPolygon coordinates".to_string()))?;
            let mut out = Vec::with_capacity(polys.len());
            for p in polys {
                out.push(Geometry::Polygon(nested_coord_array(p).ok_or_else(
                    || bad("bad MultiPolygon coordinates".to_string()),
                )?));
            }
            out
        }
        other => return Err(bad(format!("unsupported geometry type {other}"))),
    };
    Ok(parsed)
}

fn parse_coord(value: &serde_json::Value) -> Option<Coord> {
    let arr = value.as_array()?;
    if arr.len() < 2 {
        return None;
    }
    Some(Coord {
        x: arr[0].as_f64()?,
        y: arr[1].as_f64()?,
    })
}

fn coord_array(value: &serde_json::Value) -> Option<Vec<Coord>> {
    value.as_array()?.iter().map(parse_coord).collect()
}

fn nested_coord_array(value: &serde_json::Value) -> Option<Vec<Vec<Coord>>> {
    value.as_array()?.iter().map(coord_array).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_layer(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const POINTS_WITH_CRS: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "EPSG:32633"}},
        "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [150.0, 250.0]},
             "properties": {"name": "clinic"}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [50.0, 50.0]},
             "properties": {}}
        ]
    }"#;

    #[test]
    fn test_load_points_with_document_crs() {
        let dir = TempDir::new().unwrap();
        let path = write_layer(&dir, "clinics.geojson", POINTS_WITH_CRS);

        let adapter = FileAdapter::new();
        let layer = adapter.load_vector(&path).unwrap();
        assert_eq!(layer.crs, "EPSG:32633");
        assert_eq!(layer.geometry_type, GeometryType::Point);
        assert_eq!(layer.points().len(), 2);
    }

    #[test]
    fn test_load_uses_cache_on_second_call() {
        let dir = TempDir::new().unwrap();
        let path = write_layer(&dir, "clinics.geojson", POINTS_WITH_CRS);

        let adapter = FileAdapter::new();
        let first = adapter.load_vector(&path).unwrap();
        // Delete the backing file; a cache hit must still succeed.
        fs::remove_file(&path).unwrap();
        let second = adapter.load_vector(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_crs_is_load_failure_not_layer() {
        let dir = TempDir::new().unwrap();
        let path = write_layer(
            &dir,
            "no_crs.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 2]}, "properties": {}}
            ]}"#,
        );

        let adapter = FileAdapter::new();
        let err = adapter.load_vector(&path).unwrap_err();
        assert!(matches!(err, LoadError::UnresolvedCrs { .. }));
    }

    #[test]
    fn test_sidecar_crs_resolves_when_document_has_none() {
        let dir = TempDir::new().unwrap();
        let path = write_layer(
            &dir,
            "sidecar.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 2]}, "properties": {}}
            ]}"#,
        );
        fs::write(path.with_extension("crs"), "EPSG:32633\n").unwrap();

        let adapter = FileAdapter::new();
        let layer = adapter.load_vector(&path).unwrap();
        assert_eq!(layer.crs, "EPSG:32633");
    }

    #[test]
    fn test_urn_crs_is_normalized() {
        assert_eq!(normalize_crs("urn:ogc:def:crs:EPSG::32633"), "EPSG:32633");
        assert_eq!(normalize_crs("EPSG:4326"), "EPSG:4326");
    }

    #[test]
    fn test_multipolygon_flattens_to_polygon_features() {
        let dir = TempDir::new().unwrap();
        let path = write_layer(
            &dir,
            "zones.geojson",
            r#"{"type": "FeatureCollection",
                "crs": {"type": "name", "properties": {"name": "EPSG:32633"}},
                "features": [
                {"type": "Feature",
                 "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[0,0],[10,0],[10,10],[0,10],[0,0]]],
                    [[[20,20],[30,20],[30,30],[20,30],[20,20]]]
                 ]},
                 "properties": {"class": 2}}
            ]}"#,
        );

        let adapter = FileAdapter::new();
        let layer = adapter.load_vector(&path).unwrap();
        assert_eq!(layer.geometry_type, GeometryType::Polygon);
        assert_eq!(layer.features.len(), 2);
        assert_eq!(layer.features[0].numeric_attribute("class"), Some(2.0));
    }

    #[test]
    fn test_mixed_geometry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_layer(
            &dir,
            "mixed.geojson",
            r#"{"type": "FeatureCollection",
                "crs": {"type": "name", "properties": {"name": "EPSG:32633"}},
                "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 2]}, "properties": {}},
                {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}, "properties": {}}
            ]}"#,
        );

        let adapter = FileAdapter::new();
        let err = adapter.load_vector(&path).unwrap_err();
        assert!(matches!(err, LoadError::GeometryMismatch { .. }));
    }

    #[test]
    fn test_not_geojson_is_invalid_layer() {
        let dir = TempDir::new().unwrap();
        let path = write_layer(&dir, "garbage.geojson", "not json at all");
        let adapter = FileAdapter::new();
        let err = adapter.load_vector(&path).unwrap_err();
        assert!(matches!(err, LoadError::InvalidLayer { .. }));
    }
}
