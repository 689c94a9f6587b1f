/// Ingestion pipeline: bounds estimation, voxel staging, then idempotent commits.
use crate::bounds::PointCloudBounds;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::ingester::{ChunkIngester, IngestReport};
use crate::loader::{PointCloudLoader, file_identity, open_loader};
use crate::progress::point_counter;
use crate::staging::ChunkStagingStore;
use crate::store::ChunkStore;
use crate::voxel_grid::VoxelGrid;
use log::{error, info};
use serde::Serialize;
use std::fmt;

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    NotStarted,
    BoundsEstimated,
    Staging,
    Staged,
    Ingesting,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::NotStarted => "not started",
            RunState::BoundsEstimated => "bounds estimated",
            RunState::Staging => "staging",
            RunState::Staged => "staged",
            RunState::Ingesting => "ingesting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What one completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub file: String,
    pub bounds: PointCloudBounds,
    pub grid_dimensions: [usize; 3],
    pub staged_chunks: usize,
    pub staged_points: u64,
    pub report: IngestReport,
}

/// Single-threaded, sequential ingestion of one source into the chunk store.
pub struct IngestPipeline<'a> {
    config: &'a IngestConfig,
    state: RunState,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(config: &'a IngestConfig) -> Self {
        Self {
            config,
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        info!("Pipeline {} -> {}", self.state, next);
        self.state = next;
    }

    /// Open the configured source and run the whole pipeline against `store`.
    pub fn run(&mut self, store: &mut ChunkStore) -> Result<RunSummary> {
        let opened = self
            .config
            .validate()
            .and_then(|_| open_loader(self.config.loader, &self.config.source));
        let loader = match opened {
            Ok(loader) => loader,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };
        let file = file_identity(&self.config.source);
        self.run_with_loader(loader.as_ref(), &file, store)
    }

    /// Run against an already opened loader, persisting under `file`.
    pub fn run_with_loader(
        &mut self,
        loader: &dyn PointCloudLoader,
        file: &str,
        store: &mut ChunkStore,
    ) -> Result<RunSummary> {
        let result = self.execute(loader, file, store);
        if let Err(err) = &result {
            self.fail(err);
        }
        result
    }

    fn fail(&mut self, err: &IngestError) {
        error!("Pipeline failed while {}: {}", self.state, err);
        self.state = RunState::Failed;
    }

    fn execute(
        &mut self,
        loader: &dyn PointCloudLoader,
        file: &str,
        store: &mut ChunkStore,
    ) -> Result<RunSummary> {
        self.config.validate_parameters()?;

        info!("Estimating bounds of {}", loader.source_path().display());
        let bounds = loader.get_bounds()?;
        let grid = VoxelGrid::new(&bounds, self.config.voxel_size)?;
        self.transition(RunState::BoundsEstimated);
        print_bounds(&bounds, &grid);

        // Scratch space lives until the end of this function on every path.
        let mut staging = ChunkStagingStore::new(self.config.scratch_dir.as_deref())?;
        self.transition(RunState::Staging);
        self.stage(loader, &grid, &mut staging)?;
        self.transition(RunState::Staged);
        info!(
            "Staged {} points into {} chunks",
            staging.total_rows(),
            staging.len()
        );

        self.transition(RunState::Ingesting);
        let report = ChunkIngester::new(store, file, self.config.max_chunk_bytes)
            .with_progress(self.config.show_progress)
            .ingest(&staging)?;

        let summary = RunSummary {
            file: file.to_string(),
            bounds,
            grid_dimensions: grid.dimensions(),
            staged_chunks: staging.len(),
            staged_points: staging.total_rows(),
            report,
        };
        staging.close()?;
        self.transition(RunState::Done);
        Ok(summary)
    }

    /// Stream the source once, routing each point to its voxel's container.
    fn stage(
        &self,
        loader: &dyn PointCloudLoader,
        grid: &VoxelGrid,
        staging: &mut ChunkStagingStore,
    ) -> Result<()> {
        let pb = point_counter(self.config.show_progress);
        pb.set_message("Staging points by voxel");

        for batch in loader.iter_chunks(self.config.batch_size)? {
            let batch = batch?;
            batch.validate()?;
            for (voxel_id, rows) in grid.partition(&batch)? {
                staging.append(voxel_id, &batch.select(&rows))?;
            }
            pb.inc(batch.len() as u64);
        }

        pb.finish_with_message("Points staged");
        Ok(())
    }
}

/// Validate and open the configured source, then open the store, optionally
/// reset its schema, ingest, and release the connection on every path.
pub fn ingest_file(config: &IngestConfig) -> Result<RunSummary> {
    config.validate()?;
    // The schema is only dropped once the source is known to be readable.
    let loader = open_loader(config.loader, &config.source)?;
    let file = file_identity(&config.source);

    let mut store = ChunkStore::open(&config.store)?;
    let result = if config.recreate_schema {
        store.recreate_schema()
    } else {
        Ok(())
    }
    .and_then(|_| IngestPipeline::new(config).run_with_loader(loader.as_ref(), &file, &mut store));

    let closed = store.close();
    let summary = result?;
    closed?;
    Ok(summary)
}

/// Print grid extents for validation.
fn print_bounds(bounds: &PointCloudBounds, grid: &VoxelGrid) {
    let [w, h, d] = grid.dimensions();
    info!("Bounds:");
    info!("  X: {:.3} to {:.3}", bounds.min[0], bounds.max[0]);
    info!("  Y: {:.3} to {:.3}", bounds.min[1], bounds.max[1]);
    info!("  Z: {:.3} to {:.3}", bounds.min[2], bounds.max[2]);
    info!("  Grid: {} x {} x {} voxels", w, h, d);
}
