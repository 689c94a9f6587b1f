/// Uniform voxel grid over the global extents with flattened cell ids
use crate::batch::PointBatch;
use crate::bounds::PointCloudBounds;
use crate::constants::MAX_AXIS_CELLS;
use crate::error::{IngestError, Result};
use std::collections::BTreeMap;

/// Flattened cell identifier: `z * width * height + y * width + x`.
pub type VoxelId = u64;

/// Ascending boundary sequence along one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisBounds {
    values: Vec<f64>,
}

impl AxisBounds {
    /// Boundaries `min, min + step, ...` while strictly below `max`, closed by `max`.
    /// A degenerate axis (`min == max`) yields `[min, max]`, one zero-width bin.
    pub fn build(min: f64, max: f64, step: f64) -> Result<Self> {
        if !(step.is_finite() && step > 0.0) {
            return Err(IngestError::InvalidConfig(format!(
                "voxel size must be positive and finite, got {}",
                step
            )));
        }
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(IngestError::InvalidConfig(format!(
                "invalid axis extent [{}, {}]",
                min, max
            )));
        }

        let estimate = ((max - min) / step).ceil();
        if estimate > MAX_AXIS_CELLS as f64 {
            return Err(IngestError::GridTooLarge(format!(
                "extent {} at voxel size {} needs {} cells per axis (limit {})",
                max - min,
                step,
                estimate,
                MAX_AXIS_CELLS
            )));
        }

        let mut values = Vec::with_capacity(estimate as usize + 2);
        values.push(min);

        // Offsets are computed from min rather than accumulated to avoid drift.
        let mut i = 1u64;
        loop {
            let value = min + i as f64 * step;
            if value >= max {
                break;
            }
            if value <= values[values.len() - 1] {
                return Err(IngestError::GridTooLarge(format!(
                    "voxel size {} is below coordinate precision near {}",
                    step, value
                )));
            }
            values.push(value);
            i += 1;
        }
        values.push(max);

        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn min(&self) -> f64 {
        self.values[0]
    }

    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Number of intervals, always at least one.
    pub fn intervals(&self) -> usize {
        self.values.len() - 1
    }

    /// Bin of a coordinate via right-biased search: the first boundary strictly
    /// greater than the coordinate, minus one. A coordinate on an internal
    /// boundary belongs to the bin that starts there; the axis maximum belongs
    /// to the last bin. Coordinates outside `[min, max]` have no bin.
    pub fn bin_of(&self, coordinate: f64) -> Option<usize> {
        let upper = self.values.partition_point(|&b| b <= coordinate);
        if upper == 0 {
            return None;
        }
        let bin = upper - 1;
        if bin < self.intervals() {
            Some(bin)
        } else if coordinate <= self.max() {
            Some(self.intervals() - 1)
        } else {
            None
        }
    }
}

/// Per-axis boundaries of the whole grid.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    pub x: AxisBounds,
    pub y: AxisBounds,
    pub z: AxisBounds,
}

impl VoxelGrid {
    pub fn new(bounds: &PointCloudBounds, voxel_size: f64) -> Result<Self> {
        let grid = Self {
            x: AxisBounds::build(bounds.min[0], bounds.max[0], voxel_size)?,
            y: AxisBounds::build(bounds.min[1], bounds.max[1], voxel_size)?,
            z: AxisBounds::build(bounds.min[2], bounds.max[2], voxel_size)?,
        };
        grid.cell_count()?;
        Ok(grid)
    }

    /// (width, height, depth) in cells.
    pub fn dimensions(&self) -> [usize; 3] {
        [self.x.intervals(), self.y.intervals(), self.z.intervals()]
    }

    pub fn cell_count(&self) -> Result<u64> {
        let [w, h, d] = self.dimensions();
        (w as u64)
            .checked_mul(h as u64)
            .and_then(|wh| wh.checked_mul(d as u64))
            .ok_or_else(|| {
                IngestError::GridTooLarge(format!("{}x{}x{} cells overflow a voxel id", w, h, d))
            })
    }

    /// Flatten per-axis bin indices.
    pub fn flatten(&self, cell: [usize; 3]) -> VoxelId {
        let [w, h, _] = self.dimensions();
        cell[2] as u64 * w as u64 * h as u64 + cell[1] as u64 * w as u64 + cell[0] as u64
    }

    /// Inverse of `flatten`.
    pub fn unflatten(&self, id: VoxelId) -> [usize; 3] {
        let [w, h, _] = self.dimensions();
        let (w, h) = (w as u64, h as u64);
        [(id % w) as usize, ((id / w) % h) as usize, (id / (w * h)) as usize]
    }

    pub fn cell_of(&self, point: [f64; 3]) -> Option<[usize; 3]> {
        Some([
            self.x.bin_of(point[0])?,
            self.y.bin_of(point[1])?,
            self.z.bin_of(point[2])?,
        ])
    }

    pub fn index_of(&self, point: [f64; 3]) -> Option<VoxelId> {
        self.cell_of(point).map(|cell| self.flatten(cell))
    }

    /// Group batch rows by voxel id, preserving row order inside each group.
    pub fn partition(&self, batch: &PointBatch) -> Result<BTreeMap<VoxelId, Vec<usize>>> {
        let mut groups: BTreeMap<VoxelId, Vec<usize>> = BTreeMap::new();
        for (row, &point) in batch.coordinates.iter().enumerate() {
            let id = self.index_of(point).ok_or(IngestError::OutsideGrid {
                x: point[0],
                y: point[1],
                z: point[2],
            })?;
            groups.entry(id).or_default().push(row);
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(min: f64, max: f64) -> PointCloudBounds {
        PointCloudBounds {
            min: [min; 3],
            max: [max; 3],
        }
    }

    fn assert_axis_invariants(axis: &AxisBounds, min: f64, max: f64, step: f64) {
        let v = axis.values();
        assert_eq!(v[0], min);
        assert_eq!(v[v.len() - 1], max);
        for pair in v.windows(2) {
            assert!(pair[0] < pair[1], "not increasing: {:?}", v);
        }
        let gaps: Vec<f64> = v.windows(2).map(|p| p[1] - p[0]).collect();
        let (last, internal) = gaps.split_last().unwrap();
        for gap in internal {
            assert!((gap - step).abs() < 1e-9, "gap {} != {}", gap, step);
        }
        assert!(*last <= step + 1e-9);
    }

    #[test]
    fn axis_bounds_invariants_hold_across_inputs() {
        let cases = [
            (0.0, 1.0, 1.0),
            (0.0, 2.0, 1.0),
            (0.0, 2.5, 1.0),
            (-3.7, 12.2, 0.25),
            (100.0, 100.4, 5.0),
            (-1.0, -0.1, 0.3),
            (0.0, 10.0, 0.1),
        ];
        for (min, max, step) in cases {
            let axis = AxisBounds::build(min, max, step).unwrap();
            assert_axis_invariants(&axis, min, max, step);
        }
    }

    #[test]
    fn short_extent_still_has_one_interval() {
        let axis = AxisBounds::build(5.0, 5.5, 10.0).unwrap();
        assert_eq!(axis.values(), &[5.0, 5.5]);
        assert_eq!(axis.intervals(), 1);
    }

    #[test]
    fn degenerate_axis_has_one_zero_width_bin() {
        let axis = AxisBounds::build(2.0, 2.0, 1.0).unwrap();
        assert_eq!(axis.values(), &[2.0, 2.0]);
        assert_eq!(axis.intervals(), 1);
        assert_eq!(axis.bin_of(2.0), Some(0));
    }

    #[test]
    fn rejects_bad_voxel_size() {
        assert!(AxisBounds::build(0.0, 1.0, 0.0).is_err());
        assert!(AxisBounds::build(0.0, 1.0, -1.0).is_err());
        assert!(AxisBounds::build(0.0, 1.0, f64::NAN).is_err());
    }

    #[test]
    fn rejects_oversized_axis() {
        let err = AxisBounds::build(0.0, 1.0e9, 1.0e-3).unwrap_err();
        assert!(matches!(err, IngestError::GridTooLarge(_)));
    }

    #[test]
    fn unit_cube_maps_everything_to_zero() {
        let grid = VoxelGrid::new(&cube(0.0, 1.0), 1.0).unwrap();
        assert_eq!(grid.x.values(), &[0.0, 1.0]);
        assert_eq!(grid.dimensions(), [1, 1, 1]);
        assert_eq!(grid.index_of([0.9, 0.1, 0.5]), Some(0));
        assert_eq!(grid.index_of([0.0, 0.0, 0.0]), Some(0));
        assert_eq!(grid.index_of([1.0, 1.0, 1.0]), Some(0));
    }

    #[test]
    fn two_cube_grid_flattens_row_major() {
        let grid = VoxelGrid::new(&cube(0.0, 2.0), 1.0).unwrap();
        assert_eq!(grid.y.values(), &[0.0, 1.0, 2.0]);
        assert_eq!(grid.dimensions(), [2, 2, 2]);
        assert_eq!(grid.cell_of([1.5, 1.5, 1.5]), Some([1, 1, 1]));
        assert_eq!(grid.index_of([1.5, 1.5, 1.5]), Some(7));
        assert_eq!(grid.index_of([0.1, 0.1, 0.1]), Some(0));
        assert_eq!(grid.index_of([1.5, 0.1, 0.1]), Some(1));
        assert_eq!(grid.index_of([0.1, 1.5, 0.1]), Some(2));
        assert_eq!(grid.index_of([0.1, 0.1, 1.5]), Some(4));
    }

    #[test]
    fn maximum_corner_lands_in_last_cell() {
        let bounds = PointCloudBounds {
            min: [0.0, -1.0, 10.0],
            max: [2.5, 3.0, 10.7],
        };
        let grid = VoxelGrid::new(&bounds, 1.0).unwrap();
        let total = grid.cell_count().unwrap();
        assert_eq!(grid.index_of(bounds.max), Some(total - 1));
        assert_eq!(grid.index_of(bounds.min), Some(0));
    }

    #[test]
    fn internal_boundary_belongs_to_upper_bin() {
        let axis = AxisBounds::build(0.0, 3.0, 1.0).unwrap();
        assert_eq!(axis.bin_of(1.0), Some(1));
        assert_eq!(axis.bin_of(2.0), Some(2));
        assert_eq!(axis.bin_of(0.999), Some(0));
    }

    #[test]
    fn outside_points_have_no_cell() {
        let grid = VoxelGrid::new(&cube(0.0, 2.0), 1.0).unwrap();
        assert_eq!(grid.index_of([-0.1, 0.0, 0.0]), None);
        assert_eq!(grid.index_of([0.0, 2.1, 0.0]), None);
    }

    #[test]
    fn ids_are_in_range_and_cell_unique() {
        let bounds = PointCloudBounds {
            min: [-2.0, 0.0, 1.0],
            max: [3.0, 4.5, 2.2],
        };
        let grid = VoxelGrid::new(&bounds, 0.5).unwrap();
        let total = grid.cell_count().unwrap();
        let [w, h, d] = grid.dimensions();

        let mut seen = std::collections::HashMap::new();
        for zi in 0..=24 {
            for yi in 0..=24 {
                for xi in 0..=24 {
                    let p = [
                        bounds.min[0] + (bounds.max[0] - bounds.min[0]) * xi as f64 / 24.0,
                        bounds.min[1] + (bounds.max[1] - bounds.min[1]) * yi as f64 / 24.0,
                        bounds.min[2] + (bounds.max[2] - bounds.min[2]) * zi as f64 / 24.0,
                    ];
                    let cell = grid.cell_of(p).unwrap();
                    assert!(cell[0] < w && cell[1] < h && cell[2] < d);
                    let id = grid.index_of(p).unwrap();
                    assert!(id < total);
                    assert_eq!(grid.unflatten(id), cell);
                    if let Some(prev) = seen.insert(id, cell) {
                        assert_eq!(prev, cell);
                    }
                }
            }
        }
    }

    #[test]
    fn partition_groups_rows_in_order() {
        let grid = VoxelGrid::new(&cube(0.0, 2.0), 1.0).unwrap();
        let batch = PointBatch::new(vec![
            [1.5, 1.5, 1.5],
            [0.1, 0.1, 0.1],
            [1.9, 1.2, 1.1],
            [0.2, 0.3, 0.4],
        ]);
        let groups = grid.partition(&batch).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&0], vec![1, 3]);
        assert_eq!(groups[&7], vec![0, 2]);
    }

    #[test]
    fn partition_reports_outside_point() {
        let grid = VoxelGrid::new(&cube(0.0, 1.0), 1.0).unwrap();
        let batch = PointBatch::new(vec![[0.5, 0.5, 0.5], [5.0, 0.5, 0.5]]);
        assert!(matches!(
            grid.partition(&batch),
            Err(IngestError::OutsideGrid { .. })
        ));
    }
}
