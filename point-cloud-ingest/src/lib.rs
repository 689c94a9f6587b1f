/// Out-of-core point cloud ingestion into a voxel-partitioned chunk store
pub mod batch;
pub mod bounds;
pub mod config;
pub mod constants;
pub mod error;
pub mod geometry;
pub mod ingester;
pub mod loader;
pub mod pipeline;
pub mod progress;
pub mod staging;
pub mod store;
pub mod voxel_grid;

pub use batch::{AttributeArray, PointBatch};
pub use bounds::PointCloudBounds;
pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use ingester::{ChunkIngester, IngestReport};
pub use loader::{LoaderKind, PointCloudLoader};
pub use pipeline::{IngestPipeline, RunState, RunSummary, ingest_file};
pub use staging::ChunkStagingStore;
pub use store::ChunkStore;
pub use voxel_grid::{AxisBounds, VoxelGrid, VoxelId};
