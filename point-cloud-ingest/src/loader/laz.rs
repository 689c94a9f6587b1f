use super::{PointBatches, PointCloudLoader, check_batch_size, scan_bounds};
use crate::batch::{AttributeArray, PointBatch};
use crate::bounds::PointCloudBounds;
use crate::constants::{BOUNDS_SCAN_BATCH_SIZE, COLOR_KEY};
use crate::error::Result;
use las::Reader;
use las::point::Format;
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Create LAS file reader for point cloud access.
/// Handles both .las and .laz compressed formats.
pub fn create_reader(file_path: &Path) -> Result<Reader> {
    let file = File::open(file_path)?;
    let buf_reader = BufReader::new(file);
    Ok(Reader::new(buf_reader)?)
}

/// Numeric point format code, or "custom" for formats without one.
fn point_format_label(format: &Format) -> String {
    format
        .to_u8()
        .map(|code| code.to_string())
        .unwrap_or_else(|_| "custom".to_string())
}

/// LAS/LAZ loader streaming points through a fresh reader per pass.
#[derive(Debug)]
pub struct LasLoader {
    path: PathBuf,
    has_colour: bool,
    point_count: u64,
}

impl LasLoader {
    /// Open and validate the header; points are not read yet.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = create_reader(path)?;
        let header = reader.header();

        let loader = Self {
            path: path.to_path_buf(),
            has_colour: header.point_format().has_color,
            point_count: header.number_of_points(),
        };

        info!(
            "LAS/LAZ source {}: version {}.{}, {} points, format {}, colour: {}",
            path.display(),
            header.version().major,
            header.version().minor,
            loader.point_count,
            point_format_label(header.point_format()),
            loader.has_colour
        );

        Ok(loader)
    }

    pub fn point_count(&self) -> u64 {
        self.point_count
    }

    pub fn has_colour(&self) -> bool {
        self.has_colour
    }
}

impl PointCloudLoader for LasLoader {
    fn get_bounds(&self) -> Result<PointCloudBounds> {
        scan_bounds(self, BOUNDS_SCAN_BATCH_SIZE)
    }

    fn iter_chunks(&self, batch_size: usize) -> Result<PointBatches<'_>> {
        check_batch_size(batch_size)?;
        Ok(Box::new(LasBatches {
            reader: create_reader(&self.path)?,
            batch_size,
            has_colour: self.has_colour,
            finished: false,
        }))
    }

    fn source_path(&self) -> &Path {
        &self.path
    }
}

struct LasBatches {
    reader: Reader,
    batch_size: usize,
    has_colour: bool,
    finished: bool,
}

impl LasBatches {
    fn read_batch(&mut self) -> Result<PointBatch> {
        let mut coordinates = Vec::with_capacity(self.batch_size);
        let mut colours = Vec::new();

        for point_result in self.reader.points().take(self.batch_size) {
            let point = point_result?;
            coordinates.push([point.x, point.y, point.z]);

            if self.has_colour {
                let (r, g, b) = point
                    .color
                    .map(|c| (c.red, c.green, c.blue))
                    .unwrap_or((0, 0, 0));
                colours.extend_from_slice(&[i32::from(r), i32::from(g), i32::from(b)]);
            }
        }

        let mut batch = PointBatch::new(coordinates);
        if self.has_colour {
            batch = batch.with_attribute(AttributeArray::new(COLOR_KEY, 3, colours));
        }
        Ok(batch)
    }
}

impl Iterator for LasBatches {
    type Item = Result<PointBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_batch() {
            Ok(batch) if batch.is_empty() => {
                self.finished = true;
                None
            }
            Ok(batch) => {
                if batch.len() < self.batch_size {
                    self.finished = true;
                }
                Some(Ok(batch))
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
