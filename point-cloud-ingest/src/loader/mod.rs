/// Point cloud sources: the loader contract and its concrete readers
pub mod laz;
pub mod memory;
pub mod ply;

use crate::batch::PointBatch;
use crate::bounds::PointCloudBounds;
use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use laz::LasLoader;
pub use memory::MemoryLoader;
pub use ply::PlyLoader;

/// Lazy, finite sequence of batches from one pass over a source.
pub type PointBatches<'a> = Box<dyn Iterator<Item = Result<PointBatch>> + 'a>;

/// Replayable point cloud source.
///
/// Every call to `iter_chunks` starts a fresh pass from the beginning of the
/// source and yields identical data; no cursor is shared between calls.
pub trait PointCloudLoader {
    /// Tightest axis-aligned box around every point of the source.
    fn get_bounds(&self) -> Result<PointCloudBounds>;

    /// Stream the source in batches of at most `batch_size` points.
    fn iter_chunks(&self, batch_size: usize) -> Result<PointBatches<'_>>;

    /// Path or name identifying the source, used in error reports.
    fn source_path(&self) -> &Path;
}

/// Shared `get_bounds` body: fold one full pass of batches.
pub(crate) fn scan_bounds<L: PointCloudLoader + ?Sized>(
    loader: &L,
    batch_size: usize,
) -> Result<PointCloudBounds> {
    let bounds = PointCloudBounds::from_batches(loader.iter_chunks(batch_size)?)?;
    if !bounds.is_valid() {
        return Err(IngestError::EmptySource(loader.source_path().to_path_buf()));
    }
    Ok(bounds)
}

pub(crate) fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(IngestError::InvalidConfig(
            "batch size must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Loader variant selected at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// Pick by file extension.
    #[default]
    Auto,
    #[value(alias = "laz")]
    Las,
    Ply,
}

impl std::str::FromStr for LoaderKind {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "las" | "laz" => Ok(Self::Las),
            "ply" => Ok(Self::Ply),
            other => Err(IngestError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl LoaderKind {
    pub fn resolve(self, path: &Path) -> Result<Self> {
        if self != Self::Auto {
            return Ok(self);
        }
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "las" | "laz" => Ok(Self::Las),
            "ply" => Ok(Self::Ply),
            _ => Err(IngestError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Open the loader for `path`, validating the source before any staging.
pub fn open_loader(kind: LoaderKind, path: &Path) -> Result<Box<dyn PointCloudLoader>> {
    if !path.is_file() {
        return Err(IngestError::bad_source(path, "file does not exist"));
    }

    match kind.resolve(path)? {
        LoaderKind::Las => Ok(Box::new(LasLoader::open(path)?)),
        LoaderKind::Ply => Ok(Box::new(PlyLoader::open(path)?)),
        LoaderKind::Auto => Err(IngestError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Identity under which a source's chunks are persisted.
pub fn file_identity(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
