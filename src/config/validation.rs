//! Startup validation of the run configuration.
//!
//! Collects every problem at once instead of stopping at the first, so a
//! user fixing a config file gets the full picture in one pass.

use std::collections::HashSet;

use super::schema::{AnalysisMode, RunConfig, Usage};

/// Validate a run configuration. Returns all validation errors.
pub fn validate_config(config: &RunConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.grid.cell_size <= 0.0 {
        errors.push("grid.cell_size: must be positive".to_string());
    }
    if config.grid.max_x <= config.grid.min_x || config.grid.max_y <= config.grid.min_y {
        errors.push("grid: extent must have positive width and height".to_string());
    }
    if config.grid.crs.trim().is_empty() {
        errors.push("grid.crs: must not be empty".to_string());
    }

    if let Some(ref timeout) = config.workflow_timeout {
        if let Err(e) = humantime::parse_duration(timeout) {
            errors.push(format!(
                "workflow_timeout: invalid duration '{timeout}' - {e}"
            ));
        }
    }
    if config.workers == Some(0) {
        errors.push("workers: must be at least 1".to_string());
    }

    if config.dimensions.is_empty() {
        errors.push("dimensions: at least one dimension is required".to_string());
    }

    for dim in &config.dimensions {
        check_weight(&mut errors, &format!("dimension {}", dim.id), dim.weight);
        if dim.factors.is_empty() && dim.usage == Usage::Use {
            errors.push(format!("dimension {}: has no factors", dim.id));
        }
        for factor in &dim.factors {
            let factor_path = format!("factor {}.{}", dim.id, factor.id);
            check_weight(&mut errors, &factor_path, factor.weight);
            if factor.indicators.is_empty() && factor.usage == Usage::Use {
                errors.push(format!("{factor_path}: has no indicators"));
            }
            for indicator in &factor.indicators {
                let path = format!("indicator {}.{}.{}", dim.id, factor.id, indicator.id);
                check_weight(&mut errors, &path, indicator.weight);
                check_mode(&mut errors, &path, &indicator.analysis);
            }
        }
    }

    // Unit ids name result records and output rasters, so two units
    // sharing one id would also share one output file.
    let mut ids: Vec<&str> = Vec::new();
    for dim in &config.dimensions {
        ids.push(&dim.id);
        for factor in &dim.factors {
            ids.push(&factor.id);
            for indicator in &factor.indicators {
                ids.push(&indicator.id);
            }
        }
    }
    ids.push(&config.composite.id);
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            errors.push(format!("duplicate unit id {id}"));
        }
    }

    // The composite combines exactly the configured dimensions, and the
    // canonical model has three of them.
    let dim_ids: Vec<&str> = config.dimensions.iter().map(|d| d.id.as_str()).collect();
    if dim_ids.len() != 3 {
        errors.push(format!(
            "dimensions: composite requires exactly 3 dimensions, found {}",
            dim_ids.len()
        ));
    }
    for id in &dim_ids {
        if !config.composite.weights.contains_key(*id) {
            errors.push(format!("composite.weights: missing weight for dimension {id}"));
        }
    }
    for id in config.composite.weights.keys() {
        if !dim_ids.contains(&id.as_str()) {
            errors.push(format!("composite.weights: unknown dimension {id}"));
        }
    }
    for (id, weight) in &config.composite.weights {
        check_weight(&mut errors, &format!("composite weight {id}"), *weight);
    }
    if config.composite.population_raster.is_some() && config.composite.job_mask.is_some() {
        errors.push(
            "composite: population_raster and job_mask are mutually exclusive".to_string(),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_weight(errors: &mut Vec<String>, path: &str, weight: f64) {
    if !(0.0..=1.0).contains(&weight) {
        errors.push(format!("{path}: weight {weight} outside [0, 1]"));
    }
}

fn check_mode(errors: &mut Vec<String>, path: &str, mode: &AnalysisMode) {
    match mode {
        AnalysisMode::FixedIndexScore { value, .. } => {
            if !(0.0..=5.0).contains(value) {
                errors.push(format!("{path}: fixed index value {value} outside [0, 5]"));
            }
        }
        AnalysisMode::MultiBufferDistanceDecay { distances, .. } => {
            if distances.is_empty() {
                errors.push(format!("{path}: at least one buffer distance required"));
            }
            if distances.iter().any(|d| *d <= 0.0) {
                errors.push(format!("{path}: buffer distances must be positive"));
            }
            if distances.windows(2).any(|w| w[1] <= w[0]) {
                errors.push(format!("{path}: buffer distances must be strictly increasing"));
            }
        }
        AnalysisMode::SingleBufferPoint { distance, .. } => {
            if *distance <= 0.0 {
                errors.push(format!("{path}: buffer distance must be positive"));
            }
        }
        AnalysisMode::PolylinePerCell { .. } => {}
        AnalysisMode::CsvToPointThenImpact {
            impact_distance,
            crs,
            ..
        } => {
            if *impact_distance <= 0.0 {
                errors.push(format!("{path}: impact distance must be positive"));
            }
            if crs.trim().is_empty() {
                errors.push(format!("{path}: csv crs must not be empty"));
            }
        }
        AnalysisMode::ClassifyPolygonIntoClasses {
            attribute, classes, ..
        } => {
            if attribute.trim().is_empty() {
                errors.push(format!("{path}: attribute name must not be empty"));
            }
            if classes.is_empty() {
                errors.push(format!("{path}: at least one class range required"));
            }
            for (i, class) in classes.iter().enumerate() {
                if class.max <= class.min {
                    errors.push(format!(
                        "{path}: classes[{i}] range [{}, {}) is empty",
                        class.min, class.max
                    ));
                }
                if !(0.0..=5.0).contains(&class.score) {
                    errors.push(format!(
                        "{path}: classes[{i}] score {} outside [0, 5]",
                        class.score
                    ));
                }
            }
        }
        AnalysisMode::EnvironmentalHazardComposite { hazards } => {
            if hazards.is_empty() {
                errors.push(format!("{path}: at least one hazard required"));
            }
            if hazards.len() > 5 {
                errors.push(format!(
                    "{path}: at most 5 hazards supported, found {}",
                    hazards.len()
                ));
            }
            if hazards.iter().any(|h| h.weight <= 0.0) {
                errors.push(format!("{path}: hazard weights must be positive"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::minimal_config;
    use crate::config::AnalysisMode;

    #[test]
    fn test_minimal_config_is_valid() {
        assert!(validate_config(&minimal_config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = minimal_config();
        config.grid.cell_size = -1.0; // error 1
        config.dimensions[0].weight = 1.5; // error 2
        config.workers = Some(0); // error 3
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_non_increasing_distances_rejected() {
        let mut config = minimal_config();
        config.dimensions[0].factors[0].indicators[0].analysis =
            AnalysisMode::MultiBufferDistanceDecay {
                layer: "transit.geojson".into(),
                distances: vec![500.0, 500.0, 2000.0],
            };
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("strictly increasing")));
    }

    #[test]
    fn test_empty_distances_rejected() {
        let mut config = minimal_config();
        config.dimensions[0].factors[0].indicators[0].analysis =
            AnalysisMode::MultiBufferDistanceDecay {
                layer: "transit.geojson".into(),
                distances: vec![],
            };
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("at least one buffer")));
    }

    #[test]
    fn test_indicator_id_reused_across_factors_rejected() {
        let mut config = minimal_config();
        config.dimensions[1].factors[0].indicators[0].id = "CON_I1".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate unit id CON_I1")));
    }

    #[test]
    fn test_composite_id_must_not_collide_with_dimension() {
        let mut config = minimal_config();
        config.composite.id = "CON".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate unit id CON")));
    }

    #[test]
    fn test_composite_weight_must_cover_dimensions() {
        let mut config = minimal_config();
        config.composite.weights.remove("ACC");
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.contains("missing weight for dimension ACC")));
    }

    #[test]
    fn test_too_many_hazards_rejected() {
        let mut config = minimal_config();
        config.dimensions[0].factors[0].indicators[0].analysis =
            AnalysisMode::EnvironmentalHazardComposite {
                hazards: (0..6)
                    .map(|i| crate::config::HazardConfig {
                        path: format!("hazard{i}.asc").into(),
                        weight: 0.2,
                    })
                    .collect(),
            };
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("at most 5 hazards")));
    }

    #[test]
    fn test_population_and_mask_are_exclusive() {
        let mut config = minimal_config();
        config.composite.population_raster = Some("pop.asc".into());
        config.composite.job_mask = Some("jobs.asc".into());
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("mutually exclusive")));
    }
}
