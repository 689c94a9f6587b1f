/// Error taxonomy shared by loaders, staging, the chunk store and the pipeline.
use crate::voxel_grid::VoxelId;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("las error: {0}")]
    Las(#[from] las::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing, corrupt or unreadable point source.
    #[error("source error in {path}: {reason}")]
    Source { path: PathBuf, reason: String },

    #[error("unsupported point cloud format: {0}")]
    UnsupportedFormat(String),

    #[error("point source {0} contains no points")]
    EmptySource(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Arrays within one batch disagree on row count or width.
    #[error("malformed batch: {0}")]
    BatchShape(String),

    #[error("point ({x}, {y}, {z}) lies outside the voxel grid")]
    OutsideGrid { x: f64, y: f64, z: f64 },

    #[error("voxel grid too large: {0}")]
    GridTooLarge(String),

    #[error("staged chunk {voxel_id} is too large to load ({bytes} bytes)")]
    ChunkTooLarge { voxel_id: VoxelId, bytes: u64 },

    #[error("invalid geometry: {0}")]
    Geometry(String),
}

impl IngestError {
    pub fn bad_source<P: Into<PathBuf>, T: ToString>(path: P, reason: T) -> Self {
        IngestError::Source {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn batch_shape<T: ToString>(msg: T) -> Self {
        IngestError::BatchShape(msg.to_string())
    }
}
