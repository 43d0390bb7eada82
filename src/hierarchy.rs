//! Runtime model of the scoring hierarchy, built once from the run
//! configuration.
//!
//! Each indicator resolves its workflow executor here, at construction
//! time; nothing downstream branches on analysis-mode names. The model
//! also answers the two questions the orchestrator keeps asking: which
//! indicators actually run (usage flags apply transitively down the
//! tree), and what the child set of each aggregate looks like.

use std::path::PathBuf;
use std::sync::Arc;

use crate::aggregate::ChildRef;
use crate::config::{RunConfig, Usage};
use crate::workflows::{executor_for, WorkflowExecutor};

pub struct Indicator {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub usage: Usage,
    /// Analysis mode name, for logs and the run summary.
    pub mode: &'static str,
    pub executor: Arc<dyn WorkflowExecutor>,
}

pub struct Factor {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub usage: Usage,
    pub indicators: Vec<Indicator>,
}

pub struct Dimension {
    pub id: String,
    pub name: String,
    pub usage: Usage,
    /// Weight within the composite, from the composite weight map.
    pub composite_weight: f64,
    pub factors: Vec<Factor>,
}

pub struct Hierarchy {
    pub dimensions: Vec<Dimension>,
    pub composite_id: String,
    pub population_raster: Option<PathBuf>,
    pub job_mask: Option<PathBuf>,
}

impl Factor {
    pub fn children(&self) -> Vec<ChildRef> {
        self.indicators
            .iter()
            .map(|i| ChildRef {
                id: i.id.clone(),
                weight: i.weight,
                usage: i.usage,
            })
            .collect()
    }
}

impl Dimension {
    pub fn children(&self) -> Vec<ChildRef> {
        self.factors
            .iter()
            .map(|f| ChildRef {
                id: f.id.clone(),
                weight: f.weight,
                usage: f.usage,
            })
            .collect()
    }
}

impl Hierarchy {
    pub fn from_config(config: &RunConfig) -> Self {
        let dimensions = config
            .dimensions
            .iter()
            .map(|d| Dimension {
                id: d.id.clone(),
                name: d.name.clone(),
                usage: d.usage,
                composite_weight: config
                    .composite
                    .weights
                    .get(&d.id)
                    .copied()
                    .unwrap_or(d.weight),
                factors: d
                    .factors
                    .iter()
                    .map(|f| Factor {
                        id: f.id.clone(),
                        name: f.name.clone(),
                        weight: f.weight,
                        usage: f.usage,
                        indicators: f
                            .indicators
                            .iter()
                            .map(|i| Indicator {
                                id: i.id.clone(),
                                name: i.name.clone(),
                                weight: i.weight,
                                usage: i.usage,
                                mode: i.analysis.name(),
                                executor: Arc::from(executor_for(&i.analysis)),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            dimensions,
            composite_id: config.composite.id.clone(),
            population_raster: config.composite.population_raster.clone(),
            job_mask: config.composite.job_mask.clone(),
        }
    }

    /// Children of the composite: the dimensions, weighted by the
    /// composite weight map.
    pub fn composite_children(&self) -> Vec<ChildRef> {
        self.dimensions
            .iter()
            .map(|d| ChildRef {
                id: d.id.clone(),
                weight: d.composite_weight,
                usage: d.usage,
            })
            .collect()
    }

    /// Indicators that will actually execute: usage Use on the indicator
    /// and on every ancestor.
    pub fn runnable_indicators(&self) -> Vec<&Indicator> {
        self.dimensions
            .iter()
            .filter(|d| d.usage == Usage::Use)
            .flat_map(|d| d.factors.iter().filter(|f| f.usage == Usage::Use))
            .flat_map(|f| f.indicators.iter().filter(|i| i.usage == Usage::Use))
            .collect()
    }
}
