mod schema;
mod validation;

pub use schema::{
    AnalysisMode, ClassRange, CompositeConfig, DimensionConfig, FactorConfig, GridConfig,
    HazardConfig, IndicatorConfig, RunConfig, Usage,
};
pub use validation::validate_config;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Load a run configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if the file does not exist, cannot be read, or is not
/// valid YAML for the schema. Semantic validation is separate; call
/// [`validate_config`] on the result.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        anyhow::bail!("Config file not found at {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let config: RunConfig = serde_saphyr::from_str(&content)
        .with_context(|| format!("Failed to parse config: invalid YAML in {}", path.display()))?;

    Ok(config)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("/nonexistent/run.yaml"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_load_config_from_yaml() {
        let yaml = r#"
grid:
  crs: "EPSG:32633"
  cell_size: 100
  min_x: 0
  min_y: 0
  max_x: 1000
  max_y: 1000
output_dir: ./out
dimensions:
  - id: CON
    name: Contextual
    weight: 0.10
    factors:
      - id: CON_POL
        name: Policy
        weight: 1.0
        indicators:
          - id: workplace_index
            name: Workplace discrimination index
            weight: 1.0
            analysis:
              mode: fixed_index_score
              value: 3.5
  - id: ACC
    name: Accessibility
    weight: 0.45
    factors:
      - id: ACC_TRA
        name: Transit
        weight: 1.0
        indicators:
          - id: transit_stops
            name: Transit stops
            weight: 1.0
            usage: do_not_use
            analysis:
              mode: multi_buffer_distance_decay
              layer: transit.geojson
              distances: [500, 1000, 2000]
  - id: PLA
    name: Place Characterization
    weight: 0.45
    factors:
      - id: PLA_SAF
        name: Safety
        weight: 1.0
        indicators:
          - id: incidents
            name: Safety incidents
            weight: 1.0
            analysis:
              mode: csv_to_point_then_impact
              file: incidents.csv
              impact_distance: 1500
              crs: "EPSG:32633"
composite:
  weights:
    CON: 0.10
    ACC: 0.45
    PLA: 0.45
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.dimensions.len(), 3);
        assert_eq!(
            config.dimensions[1].factors[0].indicators[0].usage,
            Usage::DoNotUse
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_config_rejects_unknown_fields() {
        let yaml = r#"
grid:
  crs: "EPSG:32633"
  cell_size: 100
  min_x: 0
  min_y: 0
  max_x: 1000
  max_y: 1000
  projection: utm
output_dir: ./out
dimensions: []
composite:
  weights: {}
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
