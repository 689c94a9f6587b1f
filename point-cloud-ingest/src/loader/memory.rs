use super::{PointBatches, PointCloudLoader, check_batch_size, scan_bounds};
use crate::batch::PointBatch;
use crate::bounds::PointCloudBounds;
use crate::constants::BOUNDS_SCAN_BATCH_SIZE;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Loader over a point set already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryLoader {
    name: PathBuf,
    points: PointBatch,
}

impl MemoryLoader {
    pub fn new(name: &str, points: PointBatch) -> Result<Self> {
        points.validate()?;
        Ok(Self {
            name: PathBuf::from(name),
            points,
        })
    }
}

impl PointCloudLoader for MemoryLoader {
    fn get_bounds(&self) -> Result<PointCloudBounds> {
        scan_bounds(self, BOUNDS_SCAN_BATCH_SIZE)
    }

    fn iter_chunks(&self, batch_size: usize) -> Result<PointBatches<'_>> {
        check_batch_size(batch_size)?;
        let total = self.points.len();
        Ok(Box::new((0..total).step_by(batch_size).map(move |start| {
            let rows: Vec<usize> = (start..(start + batch_size).min(total)).collect();
            Ok(self.points.select(&rows))
        })))
    }

    fn source_path(&self) -> &Path {
        &self.name
    }
}
