/// Persistent spatial chunk table backed by SQLite with an R*Tree bbox index
use crate::batch::AttributeArray;
use crate::bounds::PointCloudBounds;
use crate::constants::{CHUNK_BBOX_TABLE, CHUNK_TABLE};
use crate::error::{IngestError, Result};
use crate::geometry::{MultiPoint, distance_squared};
use crate::voxel_grid::VoxelId;
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;

/// Outcome of one idempotent commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// A row with the same (file, chunk id) already exists.
    Skipped,
}

/// Chunk id and point count, as listed for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
    pub chunk_id: VoxelId,
    pub point_count: u64,
}

/// Full persisted row contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedChunk {
    pub file: String,
    pub chunk_id: VoxelId,
    pub points: Vec<[f64; 3]>,
    /// Row-major colour values, `points.len() * color_width` long.
    pub colors: Option<Vec<i32>>,
    pub color_width: usize,
}

/// Points within a radius of a selection's centroid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadiusSelection {
    pub center: [f64; 3],
    pub radius: f64,
    pub points: Vec<[f64; 3]>,
    pub colors: Vec<i32>,
    pub color_width: usize,
}

/// Connection to the chunk table, held open for a whole ingestion loop.
pub struct ChunkStore {
    conn: Connection,
}

impl ChunkStore {
    /// Open or create the store at the provided sqlite path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.create_schema()?;
        Ok(store)
    }

    /// Open an existing store for reading without touching the schema.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("store {} does not exist", path.display()),
            )));
        }
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.create_schema()?;
        Ok(store)
    }

    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id INTEGER NOT NULL,
                file TEXT NOT NULL,
                points BLOB NOT NULL,
                point_count INTEGER NOT NULL,
                colors BLOB,
                color_width INTEGER,
                UNIQUE (file, chunk_id)
             );
             CREATE VIRTUAL TABLE IF NOT EXISTS {bbox} USING rtree(
                id, min_x, max_x, min_y, max_y, min_z, max_z
             );",
            table = CHUNK_TABLE,
            bbox = CHUNK_BBOX_TABLE
        ))?;
        Ok(())
    }

    pub fn drop_schema(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {bbox}; DROP TABLE IF EXISTS {table};",
            table = CHUNK_TABLE,
            bbox = CHUNK_BBOX_TABLE
        ))?;
        Ok(())
    }

    /// Drop and recreate the destination schema.
    pub fn recreate_schema(&self) -> Result<()> {
        info!("Recreating chunk schema");
        self.drop_schema()?;
        self.create_schema()
    }

    pub fn chunk_exists(&self, file: &str, chunk_id: VoxelId) -> Result<bool> {
        exists(&self.conn, file, chunk_id)
    }

    /// Commit one chunk in its own transaction unless it is already persisted.
    pub fn commit_chunk(
        &mut self,
        file: &str,
        chunk_id: VoxelId,
        geometry: &MultiPoint,
        colors: Option<&AttributeArray>,
    ) -> Result<CommitOutcome> {
        if geometry.is_empty() {
            return Err(IngestError::Geometry(format!(
                "chunk {} of {} has no points",
                chunk_id, file
            )));
        }
        if let Some(colors) = colors {
            if colors.rows() != geometry.len() || colors.values.len() != geometry.len() * colors.width {
                return Err(IngestError::batch_shape(format!(
                    "chunk {} colour rows {} do not match {} points",
                    chunk_id,
                    colors.rows(),
                    geometry.len()
                )));
            }
        }

        let chunk_key = to_sql_id(chunk_id)?;
        let point_count = geometry.len() as i64;
        let wkb = geometry.to_wkb();
        let color_blob = colors.map(|c| encode_i32_blob(&c.values));
        let color_width = colors.map(|c| c.width as i64);
        let bounds = geometry.bounds();

        let tx = self.conn.transaction()?;

        if exists(&tx, file, chunk_id)? {
            debug!("Chunk {} of {} already persisted, skipping", chunk_id, file);
            return Ok(CommitOutcome::Skipped);
        }

        tx.execute(
            &format!(
                "INSERT INTO {} (chunk_id, file, points, point_count, colors, color_width)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                CHUNK_TABLE
            ),
            params![chunk_key, file, wkb, point_count, color_blob, color_width],
        )?;
        let row_id = tx.last_insert_rowid();
        tx.execute(
            &format!(
                "INSERT INTO {} (id, min_x, max_x, min_y, max_y, min_z, max_z)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                CHUNK_BBOX_TABLE
            ),
            params![
                row_id,
                bounds.min[0],
                bounds.max[0],
                bounds.min[1],
                bounds.max[1],
                bounds.min[2],
                bounds.max[2]
            ],
        )?;

        tx.commit()?;
        Ok(CommitOutcome::Committed)
    }

    /// Distinct file identities with at least one chunk.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT DISTINCT file FROM {} ORDER BY file", CHUNK_TABLE))?;
        let files = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn list_chunks(&self, file: &str) -> Result<Vec<ChunkSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT chunk_id, point_count FROM {} WHERE file = ?1 ORDER BY chunk_id",
            CHUNK_TABLE
        ))?;
        let rows = stmt
            .query_map(params![file], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(chunk_id, point_count)| ChunkSummary {
                chunk_id: chunk_id as VoxelId,
                point_count: point_count as u64,
            })
            .collect())
    }

    pub fn count_chunks(&self, file: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE file = ?1", CHUNK_TABLE),
            params![file],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Full geometry and attributes for the requested chunks; unknown ids are
    /// omitted. Results follow the order of `chunk_ids`.
    pub fn fetch_chunks(&self, file: &str, chunk_ids: &[VoxelId]) -> Result<Vec<PersistedChunk>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT points, colors, color_width FROM {} WHERE file = ?1 AND chunk_id = ?2",
            CHUNK_TABLE
        ))?;

        let mut chunks = Vec::with_capacity(chunk_ids.len());
        for &chunk_id in chunk_ids {
            let row = stmt
                .query_row(params![file, to_sql_id(chunk_id)?], |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Option<Vec<u8>>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                })
                .optional()?;

            if let Some((wkb, colors, width)) = row {
                let points = MultiPoint::from_wkb(&wkb)?.points;
                let colors = colors.map(|blob| decode_i32_blob(&blob)).transpose()?;
                let color_width = usize::try_from(width.unwrap_or(0)).unwrap_or(0);
                if let Some(values) = &colors {
                    let expected = points.len().checked_mul(color_width);
                    if color_width == 0 || expected != Some(values.len()) {
                        return Err(IngestError::Geometry(format!(
                            "chunk {} of {} holds {} colour values for {} points of width {}",
                            chunk_id,
                            file,
                            values.len(),
                            points.len(),
                            color_width
                        )));
                    }
                }
                chunks.push(PersistedChunk {
                    file: file.to_string(),
                    chunk_id,
                    points,
                    colors,
                    color_width,
                });
            }
        }
        Ok(chunks)
    }

    /// Points of `file` within `radius` of the centroid of the selected chunks.
    /// Candidate chunks come from the bbox index; the 3D distance test is exact.
    pub fn points_within_radius(
        &self,
        file: &str,
        chunk_ids: &[VoxelId],
        radius: f64,
    ) -> Result<Option<RadiusSelection>> {
        if !(radius.is_finite() && radius >= 0.0) {
            return Err(IngestError::InvalidConfig(format!(
                "radius must be non-negative, got {}",
                radius
            )));
        }

        let selected: Vec<[f64; 3]> = self
            .fetch_chunks(file, chunk_ids)?
            .into_iter()
            .flat_map(|c| c.points)
            .collect();
        let center = match MultiPoint::new(selected).centroid() {
            Some(center) => center,
            None => return Ok(None),
        };

        let mut query = PointCloudBounds::new();
        query.update([center[0] - radius, center[1] - radius, center[2] - radius]);
        query.update([center[0] + radius, center[1] + radius, center[2] + radius]);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT c.chunk_id FROM {table} c JOIN {bbox} b ON b.id = c.id
             WHERE c.file = ?1
               AND b.max_x >= ?2 AND b.min_x <= ?3
               AND b.max_y >= ?4 AND b.min_y <= ?5
               AND b.max_z >= ?6 AND b.min_z <= ?7
             ORDER BY c.chunk_id",
            table = CHUNK_TABLE,
            bbox = CHUNK_BBOX_TABLE
        ))?;
        let candidates = stmt
            .query_map(
                params![
                    file,
                    query.min[0],
                    query.max[0],
                    query.min[1],
                    query.max[1],
                    query.min[2],
                    query.max[2]
                ],
                |row| row.get::<_, i64>(0),
            )?
            .map(|r| r.map(|id| id as VoxelId))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let radius_sq = radius * radius;
        let mut selection = RadiusSelection {
            center,
            radius,
            points: Vec::new(),
            colors: Vec::new(),
            color_width: 0,
        };

        for chunk in self.fetch_chunks(file, &candidates)? {
            if chunk.color_width > 0 {
                selection.color_width = chunk.color_width;
            }
            for (row, &point) in chunk.points.iter().enumerate() {
                if distance_squared(point, center) > radius_sq {
                    continue;
                }
                selection.points.push(point);
                if let Some(colors) = &chunk.colors {
                    let w = chunk.color_width;
                    selection.colors.extend_from_slice(&colors[row * w..(row + 1) * w]);
                }
            }
        }

        Ok(Some(selection))
    }

    /// Release the connection explicitly.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| IngestError::Store(err))
    }
}

fn exists(conn: &Connection, file: &str, chunk_id: VoxelId) -> Result<bool> {
    let found = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE file = ?1 AND chunk_id = ?2)",
            CHUNK_TABLE
        ),
        params![file, to_sql_id(chunk_id)?],
        |row| row.get::<_, i64>(0),
    )? == 1;
    Ok(found)
}

fn to_sql_id(chunk_id: VoxelId) -> Result<i64> {
    i64::try_from(chunk_id)
        .map_err(|_| IngestError::GridTooLarge(format!("chunk id {} exceeds i64", chunk_id)))
}

fn encode_i32_blob(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_i32_blob(blob: &[u8]) -> Result<Vec<i32>> {
    if blob.len() % 4 != 0 {
        return Err(IngestError::Geometry(format!(
            "attribute blob of {} bytes is not a whole number of i32 values",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colours(n: usize) -> AttributeArray {
        AttributeArray::new("color", 3, (0..n as i32 * 3).collect())
    }

    #[test]
    fn commit_is_idempotent_per_file_and_chunk() {
        let mut store = ChunkStore::open_in_memory().unwrap();
        let geom = MultiPoint::new(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);

        assert_eq!(
            store.commit_chunk("a.ply", 5, &geom, Some(&colours(2))).unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.commit_chunk("a.ply", 5, &geom, Some(&colours(2))).unwrap(),
            CommitOutcome::Skipped
        );
        assert_eq!(
            store.commit_chunk("b.ply", 5, &geom, None).unwrap(),
            CommitOutcome::Committed
        );

        assert_eq!(store.count_chunks("a.ply").unwrap(), 1);
        assert_eq!(store.list_files().unwrap(), vec!["a.ply", "b.ply"]);
        assert!(store.chunk_exists("b.ply", 5).unwrap());
        assert!(!store.chunk_exists("b.ply", 6).unwrap());
    }

    #[test]
    fn rejects_misaligned_colours() {
        let mut store = ChunkStore::open_in_memory().unwrap();
        let geom = MultiPoint::new(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        assert!(store.commit_chunk("a.ply", 0, &geom, Some(&colours(3))).is_err());
        assert_eq!(store.count_chunks("a.ply").unwrap(), 0);
    }

    #[test]
    fn fetch_returns_geometry_and_colours() {
        let mut store = ChunkStore::open_in_memory().unwrap();
        let geom = MultiPoint::new(vec![[0.5, 1.5, 2.5], [3.0, 2.0, 1.0], [9.0, 9.0, 9.0]]);
        store.commit_chunk("scan", 3, &geom, Some(&colours(3))).unwrap();

        let summaries = store.list_chunks("scan").unwrap();
        assert_eq!(
            summaries,
            vec![ChunkSummary {
                chunk_id: 3,
                point_count: 3
            }]
        );

        let chunks = store.fetch_chunks("scan", &[3, 99]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].points, geom.points);
        assert_eq!(chunks[0].colors.as_deref(), Some(&(0..9).collect::<Vec<i32>>()[..]));
        assert_eq!(chunks[0].color_width, 3);
    }

    #[test]
    fn radius_filter_uses_selection_centroid() {
        let mut store = ChunkStore::open_in_memory().unwrap();
        store
            .commit_chunk(
                "scan",
                0,
                &MultiPoint::new(vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]]),
                Some(&colours(2)),
            )
            .unwrap();
        store
            .commit_chunk(
                "scan",
                1,
                &MultiPoint::new(vec![[1.0, 0.5, 0.0], [10.0, 10.0, 10.0]]),
                Some(&colours(2)),
            )
            .unwrap();
        store
            .commit_chunk("other", 0, &MultiPoint::new(vec![[1.0, 0.0, 0.0]]), None)
            .unwrap();

        let selection = store.points_within_radius("scan", &[0], 0.75).unwrap().unwrap();
        assert_eq!(selection.center, [1.0, 0.0, 0.0]);
        assert_eq!(selection.points, vec![[1.0, 0.5, 0.0]]);
        assert_eq!(selection.colors, vec![0, 1, 2]);

        assert!(store.points_within_radius("scan", &[77], 1.0).unwrap().is_none());
        assert!(store.points_within_radius("scan", &[0], -1.0).is_err());
    }

    #[test]
    fn recreate_schema_empties_the_table() {
        let mut store = ChunkStore::open_in_memory().unwrap();
        store
            .commit_chunk("scan", 0, &MultiPoint::new(vec![[1.0, 2.0, 3.0]]), None)
            .unwrap();
        store.recreate_schema().unwrap();
        assert!(store.list_files().unwrap().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let mut store = ChunkStore::open_in_memory().unwrap();
        assert!(store.commit_chunk("scan", 0, &MultiPoint::default(), None).is_err());
    }

    #[test]
    fn colour_length_mismatch_is_reported_not_panicked() {
        let mut store = ChunkStore::open_in_memory().unwrap();
        store
            .commit_chunk(
                "scan",
                0,
                &MultiPoint::new(vec![[0.0, 0.0, 0.0], [0.5, 0.5, 0.5]]),
                Some(&colours(2)),
            )
            .unwrap();
        store
            .conn
            .execute(&format!("UPDATE {} SET color_width = 5", CHUNK_TABLE), [])
            .unwrap();

        assert!(matches!(
            store.fetch_chunks("scan", &[0]),
            Err(IngestError::Geometry(_))
        ));
        assert!(matches!(
            store.points_within_radius("scan", &[0], 10.0),
            Err(IngestError::Geometry(_))
        ));
    }
}
