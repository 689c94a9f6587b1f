/// Transient point batches produced by loaders
use crate::error::{IngestError, Result};

/// Named N×k integer array travelling alongside the coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeArray {
    pub name: String,
    /// Values per row (3 for RGB colour).
    pub width: usize,
    /// Row-major values, `rows() * width` long.
    pub values: Vec<i32>,
}

impl AttributeArray {
    pub fn new(name: &str, width: usize, values: Vec<i32>) -> Self {
        Self {
            name: name.to_string(),
            width,
            values,
        }
    }

    pub fn rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.values.len() / self.width
        }
    }

    pub fn row(&self, index: usize) -> &[i32] {
        &self.values[index * self.width..(index + 1) * self.width]
    }

    /// Copy the listed rows, in the given order, into a new array.
    pub fn select(&self, rows: &[usize]) -> Self {
        let mut values = Vec::with_capacity(rows.len() * self.width);
        for &row in rows {
            values.extend_from_slice(self.row(row));
        }
        Self {
            name: self.name.clone(),
            width: self.width,
            values,
        }
    }
}

/// Coordinates plus zero or more row-aligned attribute arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointBatch {
    pub coordinates: Vec<[f64; 3]>,
    pub attributes: Vec<AttributeArray>,
}

impl PointBatch {
    pub fn new(coordinates: Vec<[f64; 3]>) -> Self {
        Self {
            coordinates,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeArray) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeArray> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Check that every attribute shares the coordinate row count and that
    /// attribute names are unique.
    pub fn validate(&self) -> Result<()> {
        for (idx, attribute) in self.attributes.iter().enumerate() {
            if attribute.width == 0 {
                return Err(IngestError::batch_shape(format!(
                    "attribute '{}' has zero width",
                    attribute.name
                )));
            }
            if attribute.values.len() != self.len() * attribute.width {
                return Err(IngestError::batch_shape(format!(
                    "attribute '{}' holds {} values, expected {} rows of width {}",
                    attribute.name,
                    attribute.values.len(),
                    self.len(),
                    attribute.width
                )));
            }
            if self.attributes[..idx].iter().any(|a| a.name == attribute.name) {
                return Err(IngestError::batch_shape(format!(
                    "attribute '{}' appears twice",
                    attribute.name
                )));
            }
        }

        if let Some(bad) = self
            .coordinates
            .iter()
            .find(|p| p.iter().any(|c| !c.is_finite()))
        {
            return Err(IngestError::batch_shape(format!(
                "non-finite coordinate {:?}",
                bad
            )));
        }

        Ok(())
    }

    /// Gather the listed rows of every array into a new batch.
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            coordinates: rows.iter().map(|&r| self.coordinates[r]).collect(),
            attributes: self.attributes.iter().map(|a| a.select(rows)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coloured_batch() -> PointBatch {
        PointBatch::new(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]).with_attribute(
            AttributeArray::new("color", 3, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]),
        )
    }

    #[test]
    fn select_keeps_rows_aligned() {
        let picked = coloured_batch().select(&[2, 0]);
        assert_eq!(picked.coordinates, vec![[2.0, 2.0, 2.0], [0.0, 0.0, 0.0]]);
        assert_eq!(picked.attributes[0].values, vec![7, 8, 9, 1, 2, 3]);
    }

    #[test]
    fn validate_rejects_short_attribute() {
        let mut batch = coloured_batch();
        batch.attributes[0].values.pop();
        assert!(matches!(batch.validate(), Err(IngestError::BatchShape(_))));
    }

    #[test]
    fn validate_rejects_nan() {
        let batch = PointBatch::new(vec![[0.0, f64::NAN, 0.0]]);
        assert!(batch.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let batch = PointBatch::new(vec![[0.0; 3]])
            .with_attribute(AttributeArray::new("color", 1, vec![1]))
            .with_attribute(AttributeArray::new("color", 1, vec![2]));
        assert!(batch.validate().is_err());
    }

    #[test]
    fn well_formed_batch_validates() {
        assert!(coloured_batch().validate().is_ok());
        assert_eq!(coloured_batch().attribute("color").map(|a| a.rows()), Some(3));
    }
}
