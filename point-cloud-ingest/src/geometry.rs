/// 3D multi-point geometry with ISO WKB (MultiPointZ) encoding
use crate::bounds::PointCloudBounds;
use crate::error::{IngestError, Result};

const WKB_LITTLE_ENDIAN: u8 = 1;
const WKB_POINT_Z: u32 = 1001;
const WKB_MULTI_POINT_Z: u32 = 1004;
const WKB_HEADER_LEN: usize = 1 + 4 + 4;
const WKB_POINT_LEN: usize = 1 + 4 + 3 * 8;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiPoint {
    pub points: Vec<[f64; 3]>,
}

impl MultiPoint {
    pub fn new(points: Vec<[f64; 3]>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounds(&self) -> PointCloudBounds {
        let mut bounds = PointCloudBounds::new();
        for &point in &self.points {
            bounds.update(point);
        }
        bounds
    }

    /// Mean of all points, `None` when empty.
    pub fn centroid(&self) -> Option<[f64; 3]> {
        if self.points.is_empty() {
            return None;
        }
        let mut sum = [0.0; 3];
        for point in &self.points {
            for axis in 0..3 {
                sum[axis] += point[axis];
            }
        }
        let n = self.points.len() as f64;
        Some([sum[0] / n, sum[1] / n, sum[2] / n])
    }

    pub fn to_wkb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WKB_HEADER_LEN + self.points.len() * WKB_POINT_LEN);
        out.push(WKB_LITTLE_ENDIAN);
        out.extend_from_slice(&WKB_MULTI_POINT_Z.to_le_bytes());
        out.extend_from_slice(&(self.points.len() as u32).to_le_bytes());
        for point in &self.points {
            out.push(WKB_LITTLE_ENDIAN);
            out.extend_from_slice(&WKB_POINT_Z.to_le_bytes());
            for c in point {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out
    }

    /// Decode a MultiPointZ; every member point may use either byte order.
    pub fn from_wkb(bytes: &[u8]) -> Result<Self> {
        let mut cursor = WkbCursor { bytes, pos: 0 };

        let big_endian = cursor.byte_order()?;
        let kind = cursor.u32(big_endian)?;
        if kind != WKB_MULTI_POINT_Z {
            return Err(IngestError::Geometry(format!(
                "expected MultiPointZ (type {}), found type {}",
                WKB_MULTI_POINT_Z, kind
            )));
        }
        let count = cursor.u32(big_endian)? as usize;
        if count.saturating_mul(WKB_POINT_LEN) > bytes.len() {
            return Err(IngestError::Geometry(format!(
                "declared {} points exceed a {}-byte blob",
                count,
                bytes.len()
            )));
        }

        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let point_order = cursor.byte_order()?;
            let point_kind = cursor.u32(point_order)?;
            if point_kind != WKB_POINT_Z {
                return Err(IngestError::Geometry(format!(
                    "expected PointZ member, found type {}",
                    point_kind
                )));
            }
            points.push([
                cursor.f64(point_order)?,
                cursor.f64(point_order)?,
                cursor.f64(point_order)?,
            ]);
        }

        if cursor.pos != bytes.len() {
            return Err(IngestError::Geometry(format!(
                "{} trailing bytes after geometry",
                bytes.len() - cursor.pos
            )));
        }

        Ok(Self { points })
    }
}

struct WkbCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl WkbCursor<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| IngestError::Geometry("truncated WKB".to_string()))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    /// True for big endian (XDR).
    fn byte_order(&mut self) -> Result<bool> {
        match self.take::<1>()?[0] {
            0 => Ok(true),
            1 => Ok(false),
            other => Err(IngestError::Geometry(format!("invalid byte order {}", other))),
        }
    }

    fn u32(&mut self, big_endian: bool) -> Result<u32> {
        let raw = self.take::<4>()?;
        Ok(if big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        })
    }

    fn f64(&mut self, big_endian: bool) -> Result<f64> {
        let raw = self.take::<8>()?;
        Ok(if big_endian {
            f64::from_be_bytes(raw)
        } else {
            f64::from_le_bytes(raw)
        })
    }
}

/// Squared Euclidean distance in 3D.
pub fn distance_squared(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wkb_layout_is_iso_multipoint_z() {
        let geom = MultiPoint::new(vec![[1.0, 2.0, 3.0]]);
        let wkb = geom.to_wkb();
        assert_eq!(wkb.len(), WKB_HEADER_LEN + WKB_POINT_LEN);
        assert_eq!(wkb[0], 1);
        assert_eq!(u32::from_le_bytes([wkb[1], wkb[2], wkb[3], wkb[4]]), 1004);
        assert_eq!(u32::from_le_bytes([wkb[5], wkb[6], wkb[7], wkb[8]]), 1);
        assert_eq!(MultiPoint::from_wkb(&wkb).unwrap(), geom);
    }

    #[test]
    fn decodes_big_endian_members() {
        let mut wkb = vec![0u8];
        wkb.extend_from_slice(&1004u32.to_be_bytes());
        wkb.extend_from_slice(&1u32.to_be_bytes());
        wkb.push(0);
        wkb.extend_from_slice(&1001u32.to_be_bytes());
        for c in [4.0f64, -5.0, 6.5] {
            wkb.extend_from_slice(&c.to_be_bytes());
        }
        let geom = MultiPoint::from_wkb(&wkb).unwrap();
        assert_eq!(geom.points, vec![[4.0, -5.0, 6.5]]);
    }

    #[test]
    fn rejects_truncated_and_wrong_type() {
        let wkb = MultiPoint::new(vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).to_wkb();
        assert!(MultiPoint::from_wkb(&wkb[..wkb.len() - 1]).is_err());

        let mut wrong = wkb.clone();
        wrong[1] = 0xE9;
        wrong[2] = 0x03; // 1001 little endian
        assert!(MultiPoint::from_wkb(&wrong).is_err());

        let mut trailing = wkb;
        trailing.push(0);
        assert!(MultiPoint::from_wkb(&trailing).is_err());
    }

    #[test]
    fn centroid_and_bounds() {
        let geom = MultiPoint::new(vec![[0.0, 0.0, 0.0], [2.0, 4.0, -6.0]]);
        assert_eq!(geom.centroid(), Some([1.0, 2.0, -3.0]));
        assert_eq!(geom.bounds().max, [2.0, 4.0, 0.0]);
        assert_eq!(MultiPoint::default().centroid(), None);
        assert_eq!(distance_squared([0.0; 3], [1.0, 2.0, 2.0]), 9.0);
    }
}
