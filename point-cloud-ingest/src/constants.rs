/// Shared configuration for point cloud ingestion

/// Batch size used when scanning a source for its extents.
pub const BOUNDS_SCAN_BATCH_SIZE: usize = 10_000;

/// Default number of points read per loader batch.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Default voxel edge length in source units.
pub const DEFAULT_VOXEL_SIZE: f64 = 10.0;

/// Upper limit on the bytes of one staged chunk loaded at ingestion time.
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 1 << 30;

/// Maximum number of intervals along any single grid axis.
pub const MAX_AXIS_CELLS: usize = 1 << 21;

/// Attribute name carried into the persisted colour column.
pub const COLOR_KEY: &str = "color";

/// Persistent chunk table and its spatial index.
pub const CHUNK_TABLE: &str = "point_cloud_chunks";
pub const CHUNK_BBOX_TABLE: &str = "point_cloud_chunks_bbox";

/// Progress bar glyphs shared by every stage.
pub const PROGRESS_CHARS: &str = "▉▊▋▌▍▎▏ ";
