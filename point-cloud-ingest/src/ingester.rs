/// Drains staged chunks into the persistent chunk table, one transaction per chunk
use crate::batch::PointBatch;
use crate::constants::COLOR_KEY;
use crate::error::Result;
use crate::geometry::MultiPoint;
use crate::progress::progress_bar;
use crate::staging::ChunkStagingStore;
use crate::store::{ChunkStore, CommitOutcome};
use log::{debug, info};
use serde::Serialize;

/// Totals from one ingestion loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub committed: usize,
    pub skipped: usize,
    /// Points written by committed chunks.
    pub points: u64,
}

pub struct ChunkIngester<'a> {
    store: &'a mut ChunkStore,
    file: String,
    max_chunk_bytes: u64,
    show_progress: bool,
}

impl<'a> ChunkIngester<'a> {
    pub fn new(store: &'a mut ChunkStore, file: &str, max_chunk_bytes: u64) -> Self {
        Self {
            store,
            file: file.to_string(),
            max_chunk_bytes,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Commit every staged chunk not already persisted for this file.
    /// A failure leaves earlier chunks committed; rerunning skips them.
    pub fn ingest(&mut self, staging: &ChunkStagingStore) -> Result<IngestReport> {
        let pb = progress_bar(staging.len() as u64, self.show_progress);
        pb.set_message("Inserting chunks");

        let mut report = IngestReport::default();
        for (voxel_id, chunk) in staging.list_chunks() {
            if self.store.chunk_exists(&self.file, voxel_id)? {
                debug!("Chunk {} already persisted", voxel_id);
                report.skipped += 1;
                pb.inc(1);
                continue;
            }

            let PointBatch {
                coordinates,
                attributes,
            } = chunk.read(self.max_chunk_bytes)?;
            let point_count = coordinates.len() as u64;
            let colors = attributes.iter().find(|a| a.name == COLOR_KEY);
            let geometry = MultiPoint::new(coordinates);

            match self.store.commit_chunk(&self.file, voxel_id, &geometry, colors)? {
                CommitOutcome::Committed => {
                    report.committed += 1;
                    report.points += point_count;
                }
                CommitOutcome::Skipped => report.skipped += 1,
            }
            pb.inc(1);
        }

        pb.finish_with_message("Chunks inserted");
        info!(
            "Ingested {}: {} chunks committed ({} points), {} already present",
            self.file, report.committed, report.points, report.skipped
        );
        Ok(report)
    }
}
