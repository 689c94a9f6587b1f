/// Run configuration passed explicitly into the pipeline
use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_CHUNK_BYTES, DEFAULT_VOXEL_SIZE};
use crate::error::{IngestError, Result};
use crate::loader::LoaderKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SQLite database holding the chunk table.
    pub store: PathBuf,
    /// Point cloud file to ingest.
    pub source: PathBuf,
    pub loader: LoaderKind,
    /// Points read per loader batch.
    pub batch_size: usize,
    /// Voxel edge length in source units.
    pub voxel_size: f64,
    /// Drop and recreate the chunk schema before running.
    pub recreate_schema: bool,
    /// Parent of the run's scratch directory; system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub max_chunk_bytes: u64,
    pub show_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from("point_cloud.sqlite"),
            source: PathBuf::new(),
            loader: LoaderKind::Auto,
            batch_size: DEFAULT_BATCH_SIZE,
            voxel_size: DEFAULT_VOXEL_SIZE,
            recreate_schema: false,
            scratch_dir: None,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            show_progress: true,
        }
    }
}

impl IngestConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Full check, including that a source is named.
    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(IngestError::InvalidConfig(
                "no source file given".to_string(),
            ));
        }
        self.validate_parameters()
    }

    /// Batch, grid and memory parameters only.
    pub fn validate_parameters(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
            return Err(IngestError::InvalidConfig(format!(
                "voxel_size must be positive and finite, got {}",
                self.voxel_size
            )));
        }
        if self.max_chunk_bytes == 0 {
            return Err(IngestError::InvalidConfig(
                "max_chunk_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
