//! Vector layer model and the layer acquisition seam.
//!
//! [`LayerProvider`] is the capability boundary toward the host GIS: the
//! engine asks it for validated layers and never works around it. The one
//! invariant it guarantees is that a successfully loaded layer always has
//! a resolved CRS; the failure mode for an unresolvable spatial reference
//! is a [`LoadError`] at load time, never a half-loaded layer that fails a
//! later CRS check.

mod adapter;

pub use adapter::FileAdapter;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{LoadError, ProcessingError};
use crate::grid::Raster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryType {
    Point,
    Line,
    Polygon,
}

impl GeometryType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Line => "line",
            Self::Polygon => "polygon",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    /// Open polyline, at least two vertices.
    Line(Vec<Coord>),
    /// Rings; the first is the exterior, the rest are holes.
    Polygon(Vec<Vec<Coord>>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::Line(_) => GeometryType::Line,
            Geometry::Polygon(_) => GeometryType::Polygon,
        }
    }

    /// Ray-casting containment test against the exterior ring minus holes.
    /// Only meaningful for polygons.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let Geometry::Polygon(rings) = self else {
            return false;
        };
        let Some(exterior) = rings.first() else {
            return false;
        };
        if !ring_contains(exterior, x, y) {
            return false;
        }
        !rings[1..].iter().any(|hole| ring_contains(hole, x, y))
    }
}

fn ring_contains(ring: &[Coord], x: f64, y: f64) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (&ring[i], &ring[j]);
        if ((a.y > y) != (b.y > y)) && (x < (b.x - a.x) * (y - a.y) / (b.y - a.y) + a.x) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// One vector feature: geometry plus attribute map.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Feature {
    /// Numeric attribute lookup, accepting JSON numbers and numeric strings.
    pub fn numeric_attribute(&self, name: &str) -> Option<f64> {
        match self.attributes.get(name)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A loaded, validated vector layer. `crs` is always non-empty.
#[derive(Debug, Clone)]
pub struct VectorLayer {
    pub crs: String,
    pub geometry_type: GeometryType,
    pub features: Vec<Feature>,
    /// (min_x, min_y, max_x, max_y) over all vertices.
    pub extent: (f64, f64, f64, f64),
}

impl VectorLayer {
    pub fn from_features(
        crs: impl Into<String>,
        geometry_type: GeometryType,
        features: Vec<Feature>,
    ) -> Self {
        let mut extent = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        let mut any = false;
        for feature in &features {
            let coords: Box<dyn Iterator<Item = &Coord>> = match &feature.geometry {
                Geometry::Point(c) => Box::new(std::iter::once(c)),
                Geometry::Line(cs) => Box::new(cs.iter()),
                Geometry::Polygon(rings) => Box::new(rings.iter().flatten()),
            };
            for c in coords {
                any = true;
                extent.0 = extent.0.min(c.x);
                extent.1 = extent.1.min(c.y);
                extent.2 = extent.2.max(c.x);
                extent.3 = extent.3.max(c.y);
            }
        }
        if !any {
            extent = (0.0, 0.0, 0.0, 0.0);
        }
        Self {
            crs: crs.into(),
            geometry_type,
            features,
            extent,
        }
    }

    /// All point coordinates of a point layer.
    pub fn points(&self) -> Vec<Coord> {
        self.features
            .iter()
            .filter_map(|f| match &f.geometry {
                Geometry::Point(c) => Some(*c),
                _ => None,
            })
            .collect()
    }
}

/// Layer acquisition capability consumed by workflows.
///
/// Implementations must uphold the load invariant: never return a layer or
/// raster without a resolved CRS.
pub trait LayerProvider: Send + Sync {
    fn load_vector(&self, path: &Path) -> Result<Arc<VectorLayer>, LoadError>;
    fn load_raster(&self, path: &Path) -> Result<Raster, LoadError>;
}

/// Reprojection seam toward the host's geoprocessing primitives.
///
/// The built-in engine only supports the identity case; a differing CRS is
/// a processing failure because coordinate transforms belong to the host.
/// Note the precondition: `layer.crs` is non-empty by the load invariant,
/// so "layer has no CRS" cannot occur here.
pub fn reproject(layer: &VectorLayer, target_crs: &str) -> Result<VectorLayer, ProcessingError> {
    if layer.crs == target_crs {
        return Ok(layer.clone());
    }
    Err(ProcessingError::UnsupportedReprojection {
        from: layer.crs.clone(),
        to: target_crs.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> Vec<Coord> {
        vec![
            Coord { x: min, y: min },
            Coord { x: max, y: min },
            Coord { x: max, y: max },
            Coord { x: min, y: max },
            Coord { x: min, y: min },
        ]
    }

    #[test]
    fn test_polygon_contains_point() {
        let poly = Geometry::Polygon(vec![square(0.0, 10.0)]);
        assert!(poly.contains(5.0, 5.0));
        assert!(!poly.contains(15.0, 5.0));
    }

    #[test]
    fn test_polygon_hole_excludes_point() {
        let poly = Geometry::Polygon(vec![square(0.0, 10.0), square(4.0, 6.0)]);
        assert!(poly.contains(2.0, 2.0));
        assert!(!poly.contains(5.0, 5.0));
    }

    #[test]
    fn test_extent_spans_all_features() {
        let layer = VectorLayer::from_features(
            "EPSG:32633",
            GeometryType::Point,
            vec![
                Feature {
                    geometry: Geometry::Point(Coord { x: 10.0, y: 20.0 }),
                    attributes: HashMap::new(),
                },
                Feature {
                    geometry: Geometry::Point(Coord { x: -5.0, y: 100.0 }),
                    attributes: HashMap::new(),
                },
            ],
        );
        assert_eq!(layer.extent, (-5.0, 20.0, 10.0, 100.0));
    }

    #[test]
    fn test_numeric_attribute_from_string() {
        let mut attributes = HashMap::new();
        attributes.insert(
            "severity".to_string(),
            serde_json::Value::String(" 3.5 ".to_string()),
        );
        let f = Feature {
            geometry: Geometry::Point(Coord { x: 0.0, y: 0.0 }),
            attributes,
        };
        assert_eq!(f.numeric_attribute("severity"), Some(3.5));
        assert_eq!(f.numeric_attribute("missing"), None);
    }

    #[test]
    fn test_reproject_identity() {
        let layer = VectorLayer::from_features("EPSG:32633", GeometryType::Point, vec![]);
        assert!(reproject(&layer, "EPSG:32633").is_ok());
    }

    #[test]
    fn test_reproject_foreign_crs_fails_as_processing() {
        let layer = VectorLayer::from_features("EPSG:4326", GeometryType::Point, vec![]);
        let err = reproject(&layer, "EPSG:32633").unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::UnsupportedReprojection { .. }
        ));
    }
}
