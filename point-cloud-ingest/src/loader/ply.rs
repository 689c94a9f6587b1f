use super::{PointBatches, PointCloudLoader, check_batch_size, scan_bounds};
use crate::batch::{AttributeArray, PointBatch};
use crate::bounds::PointCloudBounds;
use crate::constants::{BOUNDS_SCAN_BATCH_SIZE, COLOR_KEY};
use crate::error::{IngestError, Result};
use log::info;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "char" | "int8" => Some(Self::I8),
            "uchar" | "uint8" => Some(Self::U8),
            "short" | "int16" => Some(Self::I16),
            "ushort" | "uint16" => Some(Self::U16),
            "int" | "int32" => Some(Self::I32),
            "uint" | "uint32" => Some(Self::U32),
            "float" | "float32" => Some(Self::F32),
            "double" | "float64" => Some(Self::F64),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone)]
struct Property {
    name: String,
    kind: PropertyKind,
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: u64,
    properties: Vec<Property>,
}

#[derive(Debug, Clone)]
struct Header {
    encoding: Encoding,
    elements: Vec<Element>,
}

/// Where the fields the loader needs sit inside a vertex row.
#[derive(Debug, Clone, Copy)]
struct VertexLayout {
    element: usize,
    xyz: [usize; 3],
    rgb: Option<[usize; 3]>,
}

fn parse_header<R: BufRead>(reader: &mut R, path: &Path) -> Result<Header> {
    let mut line = String::new();
    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();
    let mut first = true;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(IngestError::bad_source(path, "unexpected end of PLY header"));
        }
        let trimmed = line.trim();

        if first {
            if trimmed != "ply" {
                return Err(IngestError::bad_source(path, "missing 'ply' magic line"));
            }
            first = false;
            continue;
        }

        let mut tokens = trimmed.split_whitespace();
        match tokens.next() {
            Some("format") => {
                encoding = Some(match tokens.next() {
                    Some("ascii") => Encoding::Ascii,
                    Some("binary_little_endian") => Encoding::BinaryLittleEndian,
                    Some("binary_big_endian") => Encoding::BinaryBigEndian,
                    other => {
                        return Err(IngestError::bad_source(
                            path,
                            format!("unknown PLY format {:?}", other),
                        ));
                    }
                });
            }
            Some("element") => {
                let name = tokens.next();
                let count = tokens.next().and_then(|c| c.parse::<u64>().ok());
                match (name, count) {
                    (Some(name), Some(count)) => elements.push(Element {
                        name: name.to_string(),
                        count,
                        properties: Vec::new(),
                    }),
                    _ => {
                        return Err(IngestError::bad_source(
                            path,
                            format!("malformed element line '{}'", trimmed),
                        ));
                    }
                }
            }
            Some("property") => {
                let malformed =
                    || IngestError::bad_source(path, format!("malformed property line '{}'", trimmed));
                let element = elements.last_mut().ok_or_else(malformed)?;
                let kind = match tokens.next() {
                    Some("list") => {
                        let count = tokens.next().and_then(ScalarType::parse);
                        let item = tokens.next().and_then(ScalarType::parse);
                        match (count, item) {
                            (Some(count), Some(item)) => PropertyKind::List { count, item },
                            _ => return Err(malformed()),
                        }
                    }
                    Some(ty) => PropertyKind::Scalar(ScalarType::parse(ty).ok_or_else(malformed)?),
                    None => return Err(malformed()),
                };
                let name = tokens.next().ok_or_else(malformed)?;
                element.properties.push(Property {
                    name: name.to_string(),
                    kind,
                });
            }
            Some("end_header") => break,
            Some("comment") | Some("obj_info") | None => {}
            Some(other) => {
                return Err(IngestError::bad_source(
                    path,
                    format!("unknown PLY header keyword '{}'", other),
                ));
            }
        }
    }

    let encoding = encoding.ok_or_else(|| IngestError::bad_source(path, "PLY header has no format line"))?;
    Ok(Header { encoding, elements })
}

fn vertex_layout(header: &Header, path: &Path) -> Result<VertexLayout> {
    let element = header
        .elements
        .iter()
        .position(|e| e.name == "vertex")
        .ok_or_else(|| IngestError::bad_source(path, "PLY file has no vertex element"))?;

    let scalar_index = |name: &str| {
        header.elements[element]
            .properties
            .iter()
            .position(|p| p.name == name && matches!(p.kind, PropertyKind::Scalar(_)))
    };

    let xyz = match (scalar_index("x"), scalar_index("y"), scalar_index("z")) {
        (Some(x), Some(y), Some(z)) => [x, y, z],
        _ => {
            return Err(IngestError::bad_source(
                path,
                "vertex element lacks scalar x, y and z properties",
            ));
        }
    };

    let rgb = match (scalar_index("red"), scalar_index("green"), scalar_index("blue")) {
        (Some(r), Some(g), Some(b)) => Some([r, g, b]),
        _ => None,
    };

    Ok(VertexLayout { element, xyz, rgb })
}

fn read_scalar<R: Read>(reader: &mut R, ty: ScalarType, big_endian: bool) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    let bytes = &mut buf[..ty.size()];
    reader.read_exact(bytes)?;

    macro_rules! decode {
        ($t:ty, $n:expr) => {{
            let mut raw = [0u8; $n];
            raw.copy_from_slice(bytes);
            if big_endian {
                <$t>::from_be_bytes(raw) as f64
            } else {
                <$t>::from_le_bytes(raw) as f64
            }
        }};
    }

    Ok(match ty {
        ScalarType::I8 => decode!(i8, 1),
        ScalarType::U8 => decode!(u8, 1),
        ScalarType::I16 => decode!(i16, 2),
        ScalarType::U16 => decode!(u16, 2),
        ScalarType::I32 => decode!(i32, 4),
        ScalarType::U32 => decode!(u32, 4),
        ScalarType::F32 => decode!(f32, 4),
        ScalarType::F64 => decode!(f64, 8),
    })
}

/// PLY loader; only the vertex element is read, other elements are skipped.
#[derive(Debug)]
pub struct PlyLoader {
    path: PathBuf,
    header: Header,
    layout: VertexLayout,
}

impl PlyLoader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = parse_header(&mut reader, path)?;
        let layout = vertex_layout(&header, path)?;

        info!(
            "PLY source {}: {:?}, {} vertices, colour: {}",
            path.display(),
            header.encoding,
            header.elements[layout.element].count,
            layout.rgb.is_some()
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            layout,
        })
    }

    pub fn vertex_count(&self) -> u64 {
        self.header.elements[self.layout.element].count
    }

    pub fn has_colour(&self) -> bool {
        self.layout.rgb.is_some()
    }
}

impl PointCloudLoader for PlyLoader {
    fn get_bounds(&self) -> Result<PointCloudBounds> {
        scan_bounds(self, BOUNDS_SCAN_BATCH_SIZE)
    }

    fn iter_chunks(&self, batch_size: usize) -> Result<PointBatches<'_>> {
        check_batch_size(batch_size)?;

        let mut reader = BufReader::new(File::open(&self.path)?);
        parse_header(&mut reader, &self.path)?;

        let mut batches = PlyBatches {
            loader: self,
            reader,
            remaining: self.vertex_count(),
            batch_size,
            line: String::new(),
            row: Vec::new(),
            finished: false,
        };
        for element in &self.header.elements[..self.layout.element] {
            batches.skip_element(element)?;
        }

        Ok(Box::new(batches))
    }

    fn source_path(&self) -> &Path {
        &self.path
    }
}

struct PlyBatches<'a> {
    loader: &'a PlyLoader,
    reader: BufReader<File>,
    remaining: u64,
    batch_size: usize,
    line: String,
    /// Scalar values of the current row; list properties hold NaN.
    row: Vec<f64>,
    finished: bool,
}

impl PlyBatches<'_> {
    fn truncated(&self) -> IngestError {
        IngestError::bad_source(&self.loader.path, "PLY body ends before the declared element count")
    }

    fn big_endian(&self) -> bool {
        self.loader.header.encoding == Encoding::BinaryBigEndian
    }

    fn next_line(&mut self) -> Result<()> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Err(self.truncated());
        }
        Ok(())
    }

    fn skip_element(&mut self, element: &Element) -> Result<()> {
        for _ in 0..element.count {
            self.read_row(element)?;
        }
        Ok(())
    }

    /// Read one element instance into `self.row`.
    fn read_row(&mut self, element: &Element) -> Result<()> {
        self.row.clear();

        if self.loader.header.encoding == Encoding::Ascii {
            self.next_line()?;
            let mut tokens = self.line.split_whitespace();
            for property in &element.properties {
                let token = tokens.next().ok_or_else(|| {
                    IngestError::bad_source(&self.loader.path, "PLY row has too few values")
                })?;
                match property.kind {
                    PropertyKind::Scalar(_) => {
                        let number = token.parse::<f64>().map_err(|_| {
                            IngestError::bad_source(
                                &self.loader.path,
                                format!("invalid PLY number '{}'", token),
                            )
                        })?;
                        self.row.push(number);
                    }
                    PropertyKind::List { .. } => {
                        let count = token.parse::<u64>().map_err(|_| {
                            IngestError::bad_source(
                                &self.loader.path,
                                format!("invalid PLY list length '{}'", token),
                            )
                        })?;
                        for _ in 0..count {
                            if tokens.next().is_none() {
                                return Err(IngestError::bad_source(
                                    &self.loader.path,
                                    "PLY row has too few values",
                                ));
                            }
                        }
                        self.row.push(f64::NAN);
                    }
                }
            }
            return Ok(());
        }

        let big_endian = self.big_endian();
        for property in &element.properties {
            match property.kind {
                PropertyKind::Scalar(ty) => {
                    let value = read_scalar(&mut self.reader, ty, big_endian)
                        .map_err(|_| self.truncated())?;
                    self.row.push(value);
                }
                PropertyKind::List { count, item } => {
                    let n = read_scalar(&mut self.reader, count, big_endian)
                        .map_err(|_| self.truncated())? as u64;
                    let bytes = n.saturating_mul(item.size() as u64);
                    let skipped = io::copy(&mut (&mut self.reader).take(bytes), &mut io::sink())?;
                    if skipped != bytes {
                        return Err(self.truncated());
                    }
                    self.row.push(f64::NAN);
                }
            }
        }
        Ok(())
    }

    fn read_batch(&mut self) -> Result<PointBatch> {
        let take = self.remaining.min(self.batch_size as u64) as usize;
        let loader = self.loader;
        let layout = loader.layout;
        let element = &loader.header.elements[layout.element];

        let mut coordinates = Vec::with_capacity(take);
        let mut colours = Vec::with_capacity(if layout.rgb.is_some() { take * 3 } else { 0 });

        for _ in 0..take {
            self.read_row(element)?;
            let [x, y, z] = layout.xyz;
            coordinates.push([self.row[x], self.row[y], self.row[z]]);
            if let Some([r, g, b]) = layout.rgb {
                colours.extend_from_slice(&[self.row[r] as i32, self.row[g] as i32, self.row[b] as i32]);
            }
        }
        self.remaining -= take as u64;

        let mut batch = PointBatch::new(coordinates);
        if layout.rgb.is_some() {
            batch = batch.with_attribute(AttributeArray::new(COLOR_KEY, 3, colours));
        }
        batch.validate()?;
        Ok(batch)
    }
}

impl Iterator for PlyBatches<'_> {
    type Item = Result<PointBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.remaining == 0 {
            return None;
        }
        let result = self.read_batch();
        if result.is_err() {
            self.finished = true;
        }
        Some(result)
    }
}
