//! Run orchestrator.
//!
//! Execution happens in two phases. All runnable indicators go into a
//! single semaphore-bounded pool and run in parallel; each invocation is
//! a blocking task under an optional timeout. Aggregation then walks the
//! hierarchy bottom-up over terminal results only, so factor and
//! dimension barriers hold by construction. A failed branch stops at its
//! parent (the parent fails naming the children) while sibling branches
//! keep going.
//!
//! Cancellation: units not yet started become Skipped, in-flight
//! workflows bail at their next cooperative check, completed results are
//! retained and the summary is still written.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::{collect_children, weighted_combine, write_mosaic, ChildRef};
use crate::classify::classify_raster;
use crate::config::{RunConfig, Usage};
use crate::error::{EngineError, ProcessingError, Result};
use crate::grid::{resample, write_ascii_grid, Raster, Resampling, StudyAreaGrid, NODATA};
use crate::hierarchy::Hierarchy;
use crate::layer::LayerProvider;
use crate::store::{ResultStore, UnitKind, UnitStatus};
use crate::summary::RunSummary;
use crate::workflows::WorkflowCtx;

pub struct Engine {
    hierarchy: Hierarchy,
    grid: Arc<StudyAreaGrid>,
    adapter: Arc<dyn LayerProvider>,
    out_dir: PathBuf,
    workers: usize,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    store: Arc<ResultStore>,
}

impl Engine {
    pub fn new(
        config: &RunConfig,
        adapter: Arc<dyn LayerProvider>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let grid = StudyAreaGrid::from_extent(
            &config.grid.crs,
            config.grid.min_x,
            config.grid.min_y,
            config.grid.max_x,
            config.grid.max_y,
            config.grid.cell_size,
        );
        let timeout = config
            .workflow_timeout
            .as_deref()
            .map(humantime::parse_duration)
            .transpose()
            .map_err(|e| ProcessingError::Operation {
                op: "parse_timeout",
                reason: e.to_string(),
            })?;
        let workers = config.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });

        Ok(Self {
            hierarchy: Hierarchy::from_config(config),
            store: Arc::new(ResultStore::new(grid.clone())),
            grid: Arc::new(grid),
            adapter,
            out_dir: config.output_dir.clone(),
            workers,
            timeout,
            cancel,
        })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let started = chrono::Utc::now();
        std::fs::create_dir_all(&self.out_dir)?;

        self.register_units()?;
        self.apply_usage_skips();

        let runnable = self.hierarchy.runnable_indicators().len();
        info!(
            indicators = runnable,
            workers = self.workers,
            "starting indicator phase"
        );
        self.run_indicators().await;

        self.run_aggregation();

        let summary = RunSummary::new(started, chrono::Utc::now(), self.store.snapshot());
        summary.write_json(&self.out_dir.join("run_summary.json"))?;
        Ok(summary)
    }

    /// Every unit gets a record up front, including ones that will only
    /// ever be Skipped, so the summary enumerates the whole hierarchy.
    ///
    /// Ids must be unique across the whole tree: a reused id would alias
    /// one record and one output raster between two units, so a duplicate
    /// aborts the run before any workflow starts.
    fn register_units(&self) -> Result<()> {
        let register = |id: &str, kind: UnitKind| -> Result<()> {
            if self.store.register(id, kind) {
                Ok(())
            } else {
                Err(ProcessingError::Operation {
                    op: "register",
                    reason: format!("duplicate unit id '{id}'"),
                }
                .into())
            }
        };

        for dimension in &self.hierarchy.dimensions {
            for factor in &dimension.factors {
                for indicator in &factor.indicators {
                    register(&indicator.id, UnitKind::Indicator)?;
                }
                register(&factor.id, UnitKind::Factor)?;
            }
            register(&dimension.id, UnitKind::Dimension)?;
        }
        register(&self.hierarchy.composite_id, UnitKind::Composite)
    }

    /// Skip non-Use units and their whole subtrees before anything runs.
    fn apply_usage_skips(&self) {
        fn reason(usage: Usage) -> Option<&'static str> {
            match usage {
                Usage::Use => None,
                Usage::DoNotUse => Some("do_not_use"),
                Usage::Excluded => Some("excluded"),
            }
        }

        for dimension in &self.hierarchy.dimensions {
            let dim_reason = reason(dimension.usage);
            if let Some(r) = dim_reason {
                self.store.skip(&dimension.id, r);
            }
            for factor in &dimension.factors {
                let fac_reason = dim_reason.or(reason(factor.usage));
                if let Some(r) = fac_reason {
                    self.store.skip(&factor.id, r);
                }
                for indicator in &factor.indicators {
                    if let Some(r) = fac_reason.or(reason(indicator.usage)) {
                        self.store.skip(&indicator.id, r);
                    }
                }
            }
        }
    }

    async fn run_indicators(&self) {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = FuturesUnordered::new();

        for indicator in self.hierarchy.runnable_indicators() {
            let id = indicator.id.clone();
            let mode = indicator.mode;
            let executor = Arc::clone(&indicator.executor);
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let timeout = self.timeout;
            let ctx = WorkflowCtx {
                grid: Arc::clone(&self.grid),
                adapter: Arc::clone(&self.adapter),
                out_dir: self.out_dir.clone(),
                cancel: self.cancel.child_token(),
            };

            tasks.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                if cancel.is_cancelled() {
                    store.skip(&id, "cancelled");
                    return;
                }

                store.mark_running(&id);
                debug!(indicator = %id, mode, "workflow started");

                let task_cancel = ctx.cancel.clone();
                let worker_id = id.clone();
                let handle = tokio::task::spawn_blocking(move || executor.run(&worker_id, &ctx));
                let joined = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            // A blocking task cannot be aborted; cancel
                            // its token so it bails at the next check,
                            // and record the timeout now.
                            task_cancel.cancel();
                            warn!(indicator = %id, ?limit, "workflow timed out");
                            store.fail(&id, &EngineError::Timeout(limit), Vec::new());
                            return;
                        }
                    },
                    None => handle.await,
                };

                match joined {
                    Ok(Ok(output)) => {
                        // complete() re-verifies the output; a rejected
                        // raster is already recorded as Failed when this
                        // errors.
                        if let Err(e) = store.complete(&id, &output.raster_path, output.warnings) {
                            warn!(indicator = %id, error = %e, "completion rejected");
                        } else {
                            debug!(indicator = %id, warnings = output.warnings, "workflow finished");
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(indicator = %id, error = %e, "workflow failed");
                        store.fail(&id, &e, Vec::new());
                    }
                    Err(join_err) => {
                        let e = EngineError::Processing(ProcessingError::Operation {
                            op: "workflow",
                            reason: join_err.to_string(),
                        });
                        warn!(indicator = %id, error = %e, "workflow panicked");
                        store.fail(&id, &e, Vec::new());
                    }
                }
            });
        }

        while tasks.next().await.is_some() {}
    }

    /// Factors, then dimensions, then the composite. Strictly after the
    /// indicator phase, so every input status is terminal.
    fn run_aggregation(&self) {
        for dimension in &self.hierarchy.dimensions {
            if dimension.usage != Usage::Use {
                continue;
            }
            for factor in &dimension.factors {
                if factor.usage != Usage::Use {
                    continue;
                }
                self.aggregate_unit(&factor.id, &factor.children(), false);
            }
            self.aggregate_unit(&dimension.id, &dimension.children(), false);
        }
        self.aggregate_unit(
            &self.hierarchy.composite_id,
            &self.hierarchy.composite_children(),
            true,
        );
    }

    fn aggregate_unit(&self, id: &str, children: &[ChildRef], is_composite: bool) {
        if self.cancel.is_cancelled() {
            self.store.skip(id, "cancelled");
            return;
        }
        if children.iter().all(|c| c.usage != Usage::Use) {
            self.store.skip(id, "no included children");
            return;
        }

        self.store.mark_running(id);
        if let Err(e) = self.compute_aggregate(id, children, is_composite) {
            let caused_by = match &e {
                EngineError::Aggregation(a) => a.missing.clone(),
                _ => Vec::new(),
            };
            warn!(unit = id, error = %e, "aggregation failed");
            // complete() records its own verification failures.
            if self.store.status(id) != Some(UnitStatus::Failed) {
                self.store.fail(id, &e, caused_by);
            }
        } else {
            debug!(unit = id, "aggregate written");
        }
    }

    fn compute_aggregate(&self, id: &str, children: &[ChildRef], is_composite: bool) -> Result<()> {
        let inputs = collect_children(id, children, &self.store)?;
        let mut raster = weighted_combine(&inputs, &self.grid);
        if is_composite {
            self.apply_population(&mut raster)?;
            self.apply_job_mask(&mut raster)?;
        }

        let path = self.out_dir.join(format!("{id}.asc"));
        write_ascii_grid(&raster, &path)?;
        write_ascii_grid(
            &classify_raster(&raster),
            &self.out_dir.join(format!("{id}_class.asc")),
        )?;
        write_mosaic(&self.out_dir, id, &inputs, &self.store)?;

        let warnings = inputs.iter().filter(|c| c.had_warnings).count() as u32;
        self.store.complete(id, &path, warnings)?;
        Ok(())
    }

    /// Multiply each composite cell by its population share of the grid
    /// maximum. Cells without population data become nodata.
    fn apply_population(&self, raster: &mut Raster) -> Result<()> {
        let Some(path) = &self.hierarchy.population_raster else {
            return Ok(());
        };
        let population = self.adapter.load_raster(path)?;
        let population = resample(&population, &self.grid, Resampling::Nearest)?;
        let max = population.value_range().map(|(_, max)| max).unwrap_or(0.0);
        if max <= 0.0 {
            return Err(ProcessingError::Operation {
                op: "population_modulation",
                reason: "population raster has no positive values".to_string(),
            }
            .into());
        }

        for row in 0..self.grid.rows {
            for col in 0..self.grid.cols {
                let v = raster.get(row, col);
                if raster.is_nodata(v) {
                    continue;
                }
                let p = population.get(row, col);
                if population.is_nodata(p) || p < 0.0 {
                    raster.set(row, col, NODATA);
                } else {
                    raster.set(row, col, v * (p / max));
                }
            }
        }
        Ok(())
    }

    /// Cells outside the job-location mask become nodata.
    fn apply_job_mask(&self, raster: &mut Raster) -> Result<()> {
        let Some(path) = &self.hierarchy.job_mask else {
            return Ok(());
        };
        let mask = self.adapter.load_raster(path)?;
        let mask = resample(&mask, &self.grid, Resampling::Nearest)?;
        for row in 0..self.grid.rows {
            for col in 0..self.grid.cols {
                let m = mask.get(row, col);
                if mask.is_nodata(m) || m <= 0.0 {
                    raster.set(row, col, NODATA);
                }
            }
        }
        Ok(())
    }
}
