/// Point cloud coordinate extents folded across streamed batches
use crate::batch::PointBatch;
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointCloudBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl PointCloudBounds {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Update bounds with a new point
    pub fn update(&mut self, point: [f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }

    /// Widen to cover another set of bounds.
    pub fn merge(&mut self, other: &PointCloudBounds) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    /// Tightest bounds of a single batch.
    pub fn of_batch(batch: &PointBatch) -> Self {
        let mut bounds = Self::new();
        for &point in &batch.coordinates {
            bounds.update(point);
        }
        bounds
    }

    /// Fold successive batches' per-axis min/max.
    pub fn from_batches<I>(batches: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<PointBatch>>,
    {
        let mut bounds = Self::new();
        for batch in batches {
            bounds.merge(&Self::of_batch(&batch?));
        }
        Ok(bounds)
    }

    /// False until at least one point has been folded in.
    pub fn is_valid(&self) -> bool {
        (0..3).all(|axis| self.min[axis] <= self.max[axis])
    }

    pub fn contains(&self, point: [f64; 3]) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// Get world space dimensions
    pub fn dimensions(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

impl Default for PointCloudBounds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bounds_are_invalid() {
        assert!(!PointCloudBounds::new().is_valid());
    }

    #[test]
    fn folding_batches_matches_single_pass() {
        let a = PointBatch::new(vec![[1.0, 5.0, -2.0], [3.0, 0.0, 4.0]]);
        let b = PointBatch::new(vec![[-1.0, 2.0, 9.0]]);

        let folded = PointCloudBounds::from_batches(vec![Ok(a.clone()), Ok(b.clone())]).unwrap();

        let mut single = PointCloudBounds::new();
        for p in a.coordinates.iter().chain(b.coordinates.iter()) {
            single.update(*p);
        }

        assert_eq!(folded, single);
        assert_eq!(folded.min, [-1.0, 0.0, -2.0]);
        assert_eq!(folded.max, [3.0, 5.0, 9.0]);
        assert_eq!(folded.dimensions(), [4.0, 5.0, 11.0]);
    }

    #[test]
    fn empty_batches_are_skipped() {
        let bounds = PointCloudBounds::from_batches(vec![
            Ok(PointBatch::default()),
            Ok(PointBatch::new(vec![[0.5, 0.5, 0.5]])),
        ])
        .unwrap();
        assert!(bounds.is_valid());
        assert!(bounds.contains([0.5, 0.5, 0.5]));
        assert!(!bounds.contains([0.6, 0.5, 0.5]));
    }
}
