//! Raw planar pixel files.
//!
//! A pixel set `N` is stored in a directory as two files:
//!
//! - `N.json`: [`RawMetadata`] (dimensions, sample type, byte order)
//! - `N.raw`: every sample in XYZCT order (X fastest), packed in the
//!   declared type and byte order with no header or padding
//!
//! [`RawPixelStore`] serves these through [`PixelAccess`]. Each handle
//! memory-maps the data file read-only; the map and its file descriptor
//! are released when the handle drops.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use roiscope_core::{
    CoreConfig, PixelAccess, PixelBuffer, PixelSetDimensions, PixelSetId, PixelType, Plane,
    RoiError,
};
use serde::{Deserialize, Serialize};

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

/// Sidecar describing a raw data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetadata {
    /// Declared extents.
    pub dimensions: PixelSetDimensions,
    /// Sample storage type.
    pub pixel_type: PixelType,
    /// Byte order of multi-byte samples.
    #[serde(default)]
    pub byte_order: ByteOrder,
}

impl RawMetadata {
    /// Expected size of the data file in bytes.
    #[must_use]
    pub const fn data_len(&self) -> usize {
        self.dimensions.total_len() * self.pixel_type.byte_width()
    }
}

fn invalid_data(message: String) -> RoiError {
    RoiError::Io(std::io::Error::new(ErrorKind::InvalidData, message))
}

fn short_read(pixel_set: PixelSetId) -> RoiError {
    RoiError::Io(std::io::Error::new(
        ErrorKind::UnexpectedEof,
        format!("{pixel_set} data file is shorter than declared"),
    ))
}

/// Directory of raw pixel sets.
#[derive(Debug, Clone)]
pub struct RawPixelStore {
    root: PathBuf,
    limits: (u32, u32),
}

impl RawPixelStore {
    /// A store rooted at `root` with the default plane limits.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, &CoreConfig::default())
    }

    /// A store rooted at `root` taking plane limits from `config`.
    #[must_use]
    pub fn with_config(root: impl Into<PathBuf>, config: &CoreConfig) -> Self {
        Self {
            root: root.into(),
            limits: (config.max_plane_width, config.max_plane_height),
        }
    }

    /// Directory the store reads from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_path(&self, pixel_set: PixelSetId) -> PathBuf {
        self.root.join(format!("{}.json", pixel_set.0))
    }

    fn data_path(&self, pixel_set: PixelSetId) -> PathBuf {
        self.root.join(format!("{}.raw", pixel_set.0))
    }

    /// Read the sidecar of a pixel set.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::PixelSetNotFound`] if the sidecar does not
    /// exist, [`RoiError::Io`] if it cannot be read or parsed.
    pub fn metadata(&self, pixel_set: PixelSetId) -> Result<RawMetadata, RoiError> {
        let text = match std::fs::read_to_string(self.metadata_path(pixel_set)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RoiError::PixelSetNotFound(pixel_set));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map_err(|e| invalid_data(format!("{pixel_set} metadata is malformed: {e}")))
    }
}

impl PixelAccess for RawPixelStore {
    fn dimensions(&self, pixel_set: PixelSetId) -> Result<PixelSetDimensions, RoiError> {
        Ok(self.metadata(pixel_set)?.dimensions)
    }

    fn open(&self, pixel_set: PixelSetId) -> Result<Box<dyn PixelBuffer + '_>, RoiError> {
        let metadata = self.metadata(pixel_set)?;
        let file = File::open(self.data_path(pixel_set)).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                RoiError::PixelSetNotFound(pixel_set)
            } else {
                e.into()
            }
        })?;
        // SAFETY: the map is read-only and private to this handle. The
        // store does not support data files being truncated while a handle
        // is open; every access is bounds-checked against the map length.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < metadata.data_len() {
            return Err(short_read(pixel_set));
        }
        tracing::debug!(%pixel_set, bytes = map.len(), "mapped raw pixel data");
        Ok(Box::new(RawBuffer {
            pixel_set,
            metadata,
            map,
        }))
    }

    fn plane_limits(&self) -> (u32, u32) {
        self.limits
    }
}

/// Read handle on one mapped data file.
struct RawBuffer {
    pixel_set: PixelSetId,
    metadata: RawMetadata,
    map: Mmap,
}

impl RawBuffer {
    fn decode_at(&self, index: usize) -> Result<f64, RoiError> {
        let width = self.metadata.pixel_type.byte_width();
        let start = index * width;
        let bytes = self
            .map
            .get(start..start + width)
            .ok_or_else(|| short_read(self.pixel_set))?;
        decode(self.metadata.pixel_type, self.metadata.byte_order, bytes)
            .ok_or_else(|| short_read(self.pixel_set))
    }
}

impl PixelBuffer for RawBuffer {
    fn pixel_set(&self) -> PixelSetId {
        self.pixel_set
    }

    fn dimensions(&self) -> PixelSetDimensions {
        self.metadata.dimensions
    }

    fn sample(&self, x: i64, y: i64, z: u32, c: u32, t: u32) -> Result<f64, RoiError> {
        let index = self
            .metadata
            .dimensions
            .offset(self.pixel_set, x, y, z, c, t)?;
        self.decode_at(index)
    }

    fn plane(&self, z: u32, c: u32, t: u32) -> Result<Plane, RoiError> {
        let dims = self.metadata.dimensions;
        let start = dims.offset(self.pixel_set, 0, 0, z, c, t)?;
        let samples = (start..start + dims.plane_len())
            .map(|i| self.decode_at(i))
            .collect::<Result<Vec<f64>, RoiError>>()?;
        Ok(Plane {
            width: dims.size_x,
            height: dims.size_y,
            samples,
        })
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        tracing::trace!(pixel_set = %self.pixel_set, "released raw pixel map");
    }
}

macro_rules! decode_as {
    ($ty:ty, $order:expr, $bytes:expr) => {{
        let raw: [u8; std::mem::size_of::<$ty>()] = $bytes.try_into().ok()?;
        f64::from(match $order {
            ByteOrder::Little => <$ty>::from_le_bytes(raw),
            ByteOrder::Big => <$ty>::from_be_bytes(raw),
        })
    }};
}

/// Decode one sample; `None` if `bytes` has the wrong length.
fn decode(pixel_type: PixelType, order: ByteOrder, bytes: &[u8]) -> Option<f64> {
    Some(match pixel_type {
        PixelType::Uint8 => decode_as!(u8, order, bytes),
        PixelType::Int8 => decode_as!(i8, order, bytes),
        PixelType::Uint16 => decode_as!(u16, order, bytes),
        PixelType::Int16 => decode_as!(i16, order, bytes),
        PixelType::Uint32 => decode_as!(u32, order, bytes),
        PixelType::Int32 => decode_as!(i32, order, bytes),
        PixelType::Float => decode_as!(f32, order, bytes),
        PixelType::Double => decode_as!(f64, order, bytes),
    })
}

macro_rules! encode_as {
    ($ty:ty, $value:expr, $order:expr) => {{
        // Float-to-integer `as` saturates at the type bounds.
        let v = $value as $ty;
        match $order {
            ByteOrder::Little => v.to_le_bytes().to_vec(),
            ByteOrder::Big => v.to_be_bytes().to_vec(),
        }
    }};
}

/// Encode one sample, rounding to the nearest integer for integer types.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode(pixel_type: PixelType, order: ByteOrder, value: f64) -> Vec<u8> {
    match pixel_type {
        PixelType::Uint8 => encode_as!(u8, value.round(), order),
        PixelType::Int8 => encode_as!(i8, value.round(), order),
        PixelType::Uint16 => encode_as!(u16, value.round(), order),
        PixelType::Int16 => encode_as!(i16, value.round(), order),
        PixelType::Uint32 => encode_as!(u32, value.round(), order),
        PixelType::Int32 => encode_as!(i32, value.round(), order),
        PixelType::Float => encode_as!(f32, value, order),
        PixelType::Double => encode_as!(f64, value, order),
    }
}

/// Write a pixel set into `root` as `<id>.json` + `<id>.raw`.
///
/// `samples` are in XYZCT order and are converted to the declared type,
/// rounding and saturating for integer types.
///
/// # Errors
///
/// Returns [`RoiError::Io`] if `samples` does not match the declared
/// extents or a file cannot be written.
pub fn write_pixel_set(
    root: &Path,
    pixel_set: PixelSetId,
    metadata: &RawMetadata,
    samples: &[f64],
) -> Result<(), RoiError> {
    let expected = metadata.dimensions.total_len();
    if samples.len() != expected {
        return Err(invalid_data(format!(
            "{pixel_set} declares {expected} samples, got {}",
            samples.len()
        )));
    }
    std::fs::create_dir_all(root)?;

    let mut data = BufWriter::new(File::create(root.join(format!("{}.raw", pixel_set.0)))?);
    for &value in samples {
        data.write_all(&encode(metadata.pixel_type, metadata.byte_order, value))?;
    }
    data.flush()?;

    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| invalid_data(format!("cannot serialize {pixel_set} metadata: {e}")))?;
    std::fs::write(root.join(format!("{}.json", pixel_set.0)), json)?;
    tracing::debug!(%pixel_set, samples = samples.len(), "wrote raw pixel set");
    Ok(())
}
