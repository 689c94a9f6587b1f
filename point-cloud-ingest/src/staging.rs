/// Out-of-core per-voxel staging in a run-scoped scratch directory
use crate::batch::{AttributeArray, PointBatch};
use crate::error::{IngestError, Result};
use crate::voxel_grid::VoxelId;
use bytemuck::{Pod, Zeroable};
use log::debug;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const COORDINATE_ROW_BYTES: u64 = 3 * 8;
const ATTRIBUTE_VALUE_BYTES: u64 = 4;

/// Attribute column of a staged chunk.
#[derive(Debug, Clone)]
pub struct StagedAttribute {
    pub name: String,
    pub width: usize,
    path: PathBuf,
}

/// Append-only on-disk container for one voxel's rows.
#[derive(Debug, Clone)]
pub struct StagedChunk {
    voxel_id: VoxelId,
    rows: u64,
    coordinates: PathBuf,
    attributes: Vec<StagedAttribute>,
}

impl StagedChunk {
    fn create(dir: &Path, voxel_id: VoxelId, batch: &PointBatch) -> Self {
        let attributes = batch
            .attributes
            .iter()
            .enumerate()
            .map(|(idx, a)| StagedAttribute {
                name: a.name.clone(),
                width: a.width,
                path: dir.join(format!("chunk_{}.attr{}.bin", voxel_id, idx)),
            })
            .collect();

        Self {
            voxel_id,
            rows: 0,
            coordinates: dir.join(format!("chunk_{}.xyz.bin", voxel_id)),
            attributes,
        }
    }

    pub fn voxel_id(&self) -> VoxelId {
        self.voxel_id
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn attributes(&self) -> &[StagedAttribute] {
        &self.attributes
    }

    /// Bytes needed to hold every array of the chunk in memory.
    pub fn byte_size(&self) -> u64 {
        let per_row = COORDINATE_ROW_BYTES
            + self
                .attributes
                .iter()
                .map(|a| a.width as u64 * ATTRIBUTE_VALUE_BYTES)
                .sum::<u64>();
        self.rows.saturating_mul(per_row)
    }

    fn check_schema(&self, batch: &PointBatch) -> Result<()> {
        let matches = self.attributes.len() == batch.attributes.len()
            && self
                .attributes
                .iter()
                .zip(&batch.attributes)
                .all(|(staged, incoming)| staged.name == incoming.name && staged.width == incoming.width);
        if matches {
            return Ok(());
        }
        Err(IngestError::batch_shape(format!(
            "attributes {:?} do not match those staged for chunk {}: {:?}",
            batch
                .attributes
                .iter()
                .map(|a| (&a.name, a.width))
                .collect::<Vec<_>>(),
            self.voxel_id,
            self.attributes
                .iter()
                .map(|a| (&a.name, a.width))
                .collect::<Vec<_>>()
        )))
    }

    fn append(&mut self, batch: &PointBatch) -> Result<()> {
        self.check_schema(batch)?;
        append_rows(&self.coordinates, &batch.coordinates)?;
        for (staged, incoming) in self.attributes.iter().zip(&batch.attributes) {
            append_rows(&staged.path, &incoming.values)?;
        }
        self.rows += batch.len() as u64;
        Ok(())
    }

    /// Load the full container, failing with the voxel id when it cannot fit.
    pub fn read(&self, max_bytes: u64) -> Result<PointBatch> {
        let bytes = self.byte_size();
        if bytes > max_bytes {
            return Err(IngestError::ChunkTooLarge {
                voxel_id: self.voxel_id,
                bytes,
            });
        }

        let rows = usize::try_from(self.rows).map_err(|_| IngestError::ChunkTooLarge {
            voxel_id: self.voxel_id,
            bytes,
        })?;

        let coordinates = self.read_array::<[f64; 3]>(&self.coordinates, rows, bytes)?;
        let mut attributes = Vec::with_capacity(self.attributes.len());
        for staged in &self.attributes {
            let values = self.read_array::<i32>(&staged.path, rows * staged.width, bytes)?;
            attributes.push(AttributeArray::new(&staged.name, staged.width, values));
        }

        Ok(PointBatch {
            coordinates,
            attributes,
        })
    }

    fn read_array<T: Pod + Zeroable>(&self, path: &Path, count: usize, bytes: u64) -> Result<Vec<T>> {
        let mut values: Vec<T> = Vec::new();
        values
            .try_reserve_exact(count)
            .map_err(|_| IngestError::ChunkTooLarge {
                voxel_id: self.voxel_id,
                bytes,
            })?;
        values.resize(count, T::zeroed());

        let mut file = File::open(path)?;
        let expected = (count * std::mem::size_of::<T>()) as u64;
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "staged file {} holds {} bytes, expected {}",
                    path.display(),
                    actual,
                    expected
                ),
            )));
        }
        file.read_exact(bytemuck::cast_slice_mut(&mut values))?;
        Ok(values)
    }
}

fn append_rows<T: Pod>(path: &Path, rows: &[T]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytemuck::cast_slice(rows))?;
    Ok(())
}

/// Scratch-directory-backed collection of staged chunks, addressed by voxel id.
/// Dropping the store removes the directory and everything in it.
pub struct ChunkStagingStore {
    dir: TempDir,
    chunks: BTreeMap<VoxelId, StagedChunk>,
}

impl ChunkStagingStore {
    /// Create the scratch directory under `root`, or the system temp dir.
    pub fn new(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("point-cloud-staging-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!("Staging directory: {}", dir.path().display());

        Ok(Self {
            dir,
            chunks: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Append rows to the voxel's container, creating it on first use.
    pub fn append(&mut self, voxel_id: VoxelId, batch: &PointBatch) -> Result<()> {
        batch.validate()?;
        if batch.is_empty() {
            return Ok(());
        }

        let dir = self.dir.path();
        self.chunks
            .entry(voxel_id)
            .or_insert_with(|| StagedChunk::create(dir, voxel_id, batch))
            .append(batch)
    }

    pub fn get(&self, voxel_id: VoxelId) -> Option<&StagedChunk> {
        self.chunks.get(&voxel_id)
    }

    /// Staged chunks in ascending voxel id order.
    pub fn list_chunks(&self) -> impl Iterator<Item = (VoxelId, &StagedChunk)> {
        self.chunks.iter().map(|(&id, chunk)| (id, chunk))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_rows(&self) -> u64 {
        self.chunks.values().map(|c| c.rows).sum()
    }

    /// Remove the scratch directory now, reporting any failure.
    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(start: usize, n: usize) -> PointBatch {
        let coords = (start..start + n)
            .map(|i| [i as f64, i as f64 * 0.5, -(i as f64)])
            .collect();
        let colours = (start..start + n)
            .flat_map(|i| [i as i32, i as i32 + 1, i as i32 + 2])
            .collect();
        PointBatch::new(coords).with_attribute(AttributeArray::new("color", 3, colours))
    }

    fn concat(parts: &[PointBatch]) -> PointBatch {
        let mut out = PointBatch::new(Vec::new())
            .with_attribute(AttributeArray::new("color", 3, Vec::new()));
        for part in parts {
            out.coordinates.extend_from_slice(&part.coordinates);
            out.attributes[0]
                .values
                .extend_from_slice(&part.attributes[0].values);
        }
        out
    }

    #[test]
    fn staging_in_parts_equals_staging_concatenation() {
        let parts = [batch(0, 4), batch(4, 1), batch(5, 3)];

        let mut split = ChunkStagingStore::new(None).unwrap();
        for part in &parts {
            split.append(9, part).unwrap();
        }

        let mut whole = ChunkStagingStore::new(None).unwrap();
        whole.append(9, &concat(&parts)).unwrap();

        let a = split.get(9).unwrap().read(u64::MAX).unwrap();
        let b = whole.get(9).unwrap().read(u64::MAX).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_eq!(split.get(9).unwrap().rows(), 8);
    }

    #[test]
    fn containers_are_created_lazily_per_voxel() {
        let mut store = ChunkStagingStore::new(None).unwrap();
        assert!(store.is_empty());
        store.append(3, &batch(0, 2)).unwrap();
        store.append(1, &batch(2, 1)).unwrap();
        store.append(3, &PointBatch::default().with_attribute(AttributeArray::new("color", 3, vec![]))).unwrap();

        let ids: Vec<VoxelId> = store.list_chunks().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(store.total_rows(), 3);
    }

    #[test]
    fn mismatched_attributes_are_rejected() {
        let mut store = ChunkStagingStore::new(None).unwrap();
        store.append(0, &batch(0, 2)).unwrap();
        let bare = PointBatch::new(vec![[0.0, 0.0, 0.0]]);
        assert!(matches!(store.append(0, &bare), Err(IngestError::BatchShape(_))));
    }

    #[test]
    fn oversized_chunk_reports_voxel_id() {
        let mut store = ChunkStagingStore::new(None).unwrap();
        store.append(42, &batch(0, 10)).unwrap();
        let chunk = store.get(42).unwrap();
        assert_eq!(chunk.byte_size(), 10 * (24 + 12));
        match chunk.read(100) {
            Err(IngestError::ChunkTooLarge { voxel_id, bytes }) => {
                assert_eq!(voxel_id, 42);
                assert_eq!(bytes, 360);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn scratch_directory_is_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = {
            let mut store = ChunkStagingStore::new(Some(tmp.path())).unwrap();
            store.append(0, &batch(0, 3)).unwrap();
            let path = store.path().to_path_buf();
            assert!(path.join("chunk_0.xyz.bin").exists());
            path
        };
        assert!(!path.exists());
    }
}
