use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level run configuration.
///
/// Example YAML:
/// ```yaml
/// grid:
///   crs: "EPSG:32633"
///   cell_size: 100
///   min_x: 0
///   min_y: 0
///   max_x: 5000
///   max_y: 5000
/// output_dir: ./out
/// workflow_timeout: "5m"
/// dimensions:
///   - id: CON
///     name: Contextual
///     weight: 0.10
///     factors:
///       - id: CON_POL
///         name: Policy
///         weight: 1.0
///         indicators:
///           - id: workplace_index
///             name: Workplace discrimination index
///             weight: 1.0
///             analysis:
///               mode: fixed_index_score
///               value: 3.5
/// composite:
///   weights:
///     CON: 0.10
///     ACC: 0.45
///     PLA: 0.45
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub grid: GridConfig,
    pub output_dir: PathBuf,

    /// Worker pool size for parallel indicator execution.
    /// Defaults to the available CPU parallelism.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Per-workflow invocation timeout, humantime format (e.g. "90s", "5m").
    #[serde(default)]
    pub workflow_timeout: Option<String>,

    pub dimensions: Vec<DimensionConfig>,
    pub composite: CompositeConfig,
}

/// Study-area grid definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GridConfig {
    pub crs: String,
    pub cell_size: f64,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Per-unit inclusion state.
///
/// Neither `DoNotUse` nor `Excluded` units run or aggregate; the
/// distinction is intent (toggled off for this run vs not applicable to
/// the study area) and is preserved in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    #[default]
    Use,
    DoNotUse,
    Excluded,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionConfig {
    pub id: String,
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub usage: Usage,
    pub factors: Vec<FactorConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FactorConfig {
    pub id: String,
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub usage: Usage,
    pub indicators: Vec<IndicatorConfig>,
}

/// One leaf unit of analysis.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorConfig {
    pub id: String,
    pub name: String,
    /// Weight within the owning factor, in [0, 1]. Renormalized at
    /// aggregation time over the indicators actually contributing.
    pub weight: f64,
    #[serde(default)]
    pub usage: Usage,
    pub analysis: AnalysisMode,
}

/// The analysis workflow computing this indicator, with its parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalysisMode {
    /// No spatial input; fills the footprint (or the whole grid)
    /// uniformly with a configured 0-5 value.
    FixedIndexScore {
        value: f64,
        #[serde(default)]
        footprint: Option<PathBuf>,
    },

    /// Point layer scored by ascending buffer rings; closer rings score
    /// higher, beyond the last ring scores zero.
    MultiBufferDistanceDecay {
        layer: PathBuf,
        /// Strictly increasing ring distances in CRS units. At least one.
        distances: Vec<f64>,
    },

    /// Binary in/out raster within a single buffer distance.
    SingleBufferPoint { layer: PathBuf, distance: f64 },

    /// Per-cell presence/density of intersecting line features.
    PolylinePerCell { layer: PathBuf },

    /// Tabular coordinates to points, then linear impact-distance decay.
    /// Malformed rows are skipped and counted, never file-fatal.
    CsvToPointThenImpact {
        file: PathBuf,
        #[serde(default = "default_x_column")]
        x_column: String,
        #[serde(default = "default_y_column")]
        y_column: String,
        impact_distance: f64,
        /// CRS of the coordinates in the file.
        crs: String,
    },

    /// Polygon layer classified by a numeric attribute into discrete
    /// scores, then rasterized.
    ClassifyPolygonIntoClasses {
        layer: PathBuf,
        attribute: String,
        classes: Vec<ClassRange>,
    },

    /// Up to five hazard rasters, independently reconditioned and
    /// normalized, combined by per-hazard weights.
    EnvironmentalHazardComposite { hazards: Vec<HazardConfig> },
}

fn default_x_column() -> String {
    "x".to_string()
}

fn default_y_column() -> String {
    "y".to_string()
}

impl AnalysisMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FixedIndexScore { .. } => "fixed_index_score",
            Self::MultiBufferDistanceDecay { .. } => "multi_buffer_distance_decay",
            Self::SingleBufferPoint { .. } => "single_buffer_point",
            Self::PolylinePerCell { .. } => "polyline_per_cell",
            Self::CsvToPointThenImpact { .. } => "csv_to_point_then_impact",
            Self::ClassifyPolygonIntoClasses { .. } => "classify_polygon_into_classes",
            Self::EnvironmentalHazardComposite { .. } => "environmental_hazard_composite",
        }
    }
}

/// Attribute range mapped to a discrete score. The range is half-open:
/// `min <= value < max`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClassRange {
    pub min: f64,
    pub max: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HazardConfig {
    pub path: PathBuf,
    pub weight: f64,
}

/// Composite (WEE) configuration over the three dimensions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeConfig {
    /// Unit id of the composite output. Defaults to "WEE".
    #[serde(default = "default_composite_id")]
    pub id: String,

    /// Dimension id -> weight. Must cover exactly the configured
    /// dimensions.
    pub weights: HashMap<String, f64>,

    /// Optional per-cell modulation by population density.
    #[serde(default)]
    pub population_raster: Option<PathBuf>,

    /// Optional job-location mask; cells outside the mask become nodata.
    #[serde(default)]
    pub job_mask: Option<PathBuf>,
}

fn default_composite_id() -> String {
    "WEE".to_string()
}
