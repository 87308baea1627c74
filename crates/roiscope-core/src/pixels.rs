//! Pixel access: a narrow seam over an external pixel store.
//!
//! [`PixelAccess`] opens a [`PixelBuffer`] handle for one pixel set. The
//! handle may own OS resources (file descriptors, memory maps), so it is
//! released by dropping it; [`with_buffer`] scopes that to a closure so the
//! release happens on every exit path.
//!
//! [`InMemoryPixelStore`] is the in-process implementation used by tests
//! and the bench tool. The filesystem implementation lives in
//! `roiscope-io`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::types::{PixelSetId, RoiError};

/// Declared extents of a pixel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSetDimensions {
    /// Columns.
    pub size_x: u32,
    /// Rows.
    pub size_y: u32,
    /// Z-sections.
    pub size_z: u32,
    /// Channels.
    pub size_c: u32,
    /// Timepoints.
    pub size_t: u32,
}

impl PixelSetDimensions {
    /// Create a dimension record.
    #[must_use]
    pub const fn new(size_x: u32, size_y: u32, size_z: u32, size_c: u32, size_t: u32) -> Self {
        Self {
            size_x,
            size_y,
            size_z,
            size_c,
            size_t,
        }
    }

    /// Samples in one XY plane.
    #[must_use]
    pub const fn plane_len(&self) -> usize {
        self.size_x as usize * self.size_y as usize
    }

    /// Samples in the whole set.
    #[must_use]
    pub const fn total_len(&self) -> usize {
        self.plane_len() * self.size_z as usize * self.size_c as usize * self.size_t as usize
    }

    /// All channel indices, ascending.
    #[must_use]
    pub fn channels(&self) -> Vec<u32> {
        (0..self.size_c).collect()
    }

    /// Whether `(x, y, z, c, t)` lies inside the declared extents.
    #[must_use]
    pub fn contains(&self, x: i64, y: i64, z: u32, c: u32, t: u32) -> bool {
        (0..i64::from(self.size_x)).contains(&x)
            && (0..i64::from(self.size_y)).contains(&y)
            && z < self.size_z
            && c < self.size_c
            && t < self.size_t
    }

    /// Check `(x, y, z, c, t)` and return the linear XYZCT sample index.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::OutOfBounds`] if any coordinate exceeds the
    /// declared extents.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn offset(
        &self,
        pixel_set: PixelSetId,
        x: i64,
        y: i64,
        z: u32,
        c: u32,
        t: u32,
    ) -> Result<usize, RoiError> {
        if !self.contains(x, y, z, c, t) {
            return Err(RoiError::OutOfBounds {
                pixel_set,
                x,
                y,
                z,
                c,
                t,
            });
        }
        let plane = self.plane_index(z, c, t);
        Ok(plane * self.plane_len() + y as usize * self.size_x as usize + x as usize)
    }

    /// Index of plane `(z, c, t)` in XYZCT order. Does not bounds-check.
    #[must_use]
    pub const fn plane_index(&self, z: u32, c: u32, t: u32) -> usize {
        (t as usize * self.size_c as usize + c as usize) * self.size_z as usize + z as usize
    }

    /// Whether a plane exceeds the given width/height limits.
    #[must_use]
    pub const fn exceeds_plane(&self, max_width: u32, max_height: u32) -> bool {
        self.size_x > max_width || self.size_y > max_height
    }
}

/// Sample storage type of a pixel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    /// Unsigned 8-bit.
    Uint8,
    /// Signed 8-bit.
    Int8,
    /// Unsigned 16-bit.
    Uint16,
    /// Signed 16-bit.
    Int16,
    /// Unsigned 32-bit.
    Uint32,
    /// Signed 32-bit.
    Int32,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
}

impl PixelType {
    /// Bytes per sample.
    #[must_use]
    pub const fn byte_width(self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float => 4,
            Self::Double => 8,
        }
    }
}

/// One contiguous XY plane of samples, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// `width * height` samples.
    pub samples: Vec<f64>,
}

impl Plane {
    /// Sample at `(x, y)`, `None` outside the plane.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.samples
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// Open read handle on one pixel set.
///
/// Dropping the handle releases whatever the store acquired for it.
pub trait PixelBuffer: Send {
    /// The pixel set this handle reads.
    fn pixel_set(&self) -> PixelSetId;

    /// Declared extents.
    fn dimensions(&self) -> PixelSetDimensions;

    /// Read one sample.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::OutOfBounds`] for coordinates outside the
    /// declared extents, [`RoiError::Io`] if the underlying read fails.
    fn sample(&self, x: i64, y: i64, z: u32, c: u32, t: u32) -> Result<f64, RoiError>;

    /// Read a whole plane.
    ///
    /// The default reads sample by sample; stores with contiguous storage
    /// override it.
    ///
    /// # Errors
    ///
    /// Same as [`sample`](Self::sample).
    fn plane(&self, z: u32, c: u32, t: u32) -> Result<Plane, RoiError> {
        let dims = self.dimensions();
        let mut samples = Vec::with_capacity(dims.plane_len());
        for y in 0..i64::from(dims.size_y) {
            for x in 0..i64::from(dims.size_x) {
                samples.push(self.sample(x, y, z, c, t)?);
            }
        }
        Ok(Plane {
            width: dims.size_x,
            height: dims.size_y,
            samples,
        })
    }
}

/// Source of pixel buffers.
pub trait PixelAccess: Send + Sync {
    /// Declared extents of a pixel set.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::PixelSetNotFound`] if the metadata lookup fails.
    fn dimensions(&self, pixel_set: PixelSetId) -> Result<PixelSetDimensions, RoiError>;

    /// Open a read handle.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::PixelSetNotFound`] if the metadata lookup fails,
    /// [`RoiError::Io`] if the backing storage cannot be opened.
    fn open(&self, pixel_set: PixelSetId) -> Result<Box<dyn PixelBuffer + '_>, RoiError>;

    /// Largest plane `(width, height)` served by whole-plane reads.
    fn plane_limits(&self) -> (u32, u32) {
        (
            CoreConfig::DEFAULT_MAX_PLANE_WIDTH,
            CoreConfig::DEFAULT_MAX_PLANE_HEIGHT,
        )
    }

    /// Whether callers should use tiled/pyramid access for this pixel set.
    ///
    /// # Errors
    ///
    /// Same as [`dimensions`](Self::dimensions).
    fn needs_tiled_access(&self, pixel_set: PixelSetId) -> Result<bool, RoiError> {
        let (max_width, max_height) = self.plane_limits();
        Ok(self
            .dimensions(pixel_set)?
            .exceeds_plane(max_width, max_height))
    }
}

/// Open a handle, run `f` on it, and release it whatever `f` returns.
///
/// # Errors
///
/// Propagates failures from [`PixelAccess::open`] and from `f`.
pub fn with_buffer<A, R, F>(access: &A, pixel_set: PixelSetId, f: F) -> Result<R, RoiError>
where
    A: PixelAccess + ?Sized,
    F: FnOnce(&dyn PixelBuffer) -> Result<R, RoiError>,
{
    let buffer = access.open(pixel_set)?;
    let result = f(buffer.as_ref());
    drop(buffer);
    result
}

/// Pixel sets held in memory as `f64` samples in XYZCT order.
#[derive(Debug, Default)]
pub struct InMemoryPixelStore {
    sets: HashMap<PixelSetId, (PixelSetDimensions, Vec<f64>)>,
    limits: Option<(u32, u32)>,
    open_handles: AtomicUsize,
}

impl InMemoryPixelStore {
    /// An empty store using the default plane limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store taking plane limits from `config`.
    #[must_use]
    pub fn with_config(config: &CoreConfig) -> Self {
        Self {
            limits: Some((config.max_plane_width, config.max_plane_height)),
            ..Self::default()
        }
    }

    /// Add (or replace) a pixel set where every sample equals `value`.
    pub fn insert_constant(&mut self, pixel_set: PixelSetId, dims: PixelSetDimensions, value: f64) {
        self.sets
            .insert(pixel_set, (dims, vec![value; dims.total_len()]));
    }

    /// Add (or replace) a pixel set whose samples come from `f(x, y, z, c, t)`.
    pub fn insert_with<F>(&mut self, pixel_set: PixelSetId, dims: PixelSetDimensions, f: F)
    where
        F: Fn(u32, u32, u32, u32, u32) -> f64,
    {
        let mut samples = Vec::with_capacity(dims.total_len());
        for t in 0..dims.size_t {
            for c in 0..dims.size_c {
                for z in 0..dims.size_z {
                    for y in 0..dims.size_y {
                        for x in 0..dims.size_x {
                            samples.push(f(x, y, z, c, t));
                        }
                    }
                }
            }
        }
        self.sets.insert(pixel_set, (dims, samples));
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

impl PixelAccess for InMemoryPixelStore {
    fn dimensions(&self, pixel_set: PixelSetId) -> Result<PixelSetDimensions, RoiError> {
        self.sets
            .get(&pixel_set)
            .map(|(dims, _)| *dims)
            .ok_or(RoiError::PixelSetNotFound(pixel_set))
    }

    fn open(&self, pixel_set: PixelSetId) -> Result<Box<dyn PixelBuffer + '_>, RoiError> {
        let (dims, samples) = self
            .sets
            .get(&pixel_set)
            .ok_or(RoiError::PixelSetNotFound(pixel_set))?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryBuffer {
            pixel_set,
            dims: *dims,
            samples,
            open_handles: &self.open_handles,
        }))
    }

    fn plane_limits(&self) -> (u32, u32) {
        self.limits.unwrap_or((
            CoreConfig::DEFAULT_MAX_PLANE_WIDTH,
            CoreConfig::DEFAULT_MAX_PLANE_HEIGHT,
        ))
    }
}

/// Handle into an [`InMemoryPixelStore`].
struct InMemoryBuffer<'a> {
    pixel_set: PixelSetId,
    dims: PixelSetDimensions,
    samples: &'a [f64],
    open_handles: &'a AtomicUsize,
}

impl PixelBuffer for InMemoryBuffer<'_> {
    fn pixel_set(&self) -> PixelSetId {
        self.pixel_set
    }

    fn dimensions(&self) -> PixelSetDimensions {
        self.dims
    }

    fn sample(&self, x: i64, y: i64, z: u32, c: u32, t: u32) -> Result<f64, RoiError> {
        let offset = self.dims.offset(self.pixel_set, x, y, z, c, t)?;
        self.samples.get(offset).copied().ok_or_else(|| {
            RoiError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} holds fewer samples than declared", self.pixel_set),
            ))
        })
    }

    fn plane(&self, z: u32, c: u32, t: u32) -> Result<Plane, RoiError> {
        let start = self.dims.offset(self.pixel_set, 0, 0, z, c, t)?;
        let end = start + self.dims.plane_len();
        let samples = self.samples.get(start..end).ok_or_else(|| {
            RoiError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} holds fewer samples than declared", self.pixel_set),
            ))
        })?;
        Ok(Plane {
            width: self.dims.size_x,
            height: self.dims.size_y,
            samples: samples.to_vec(),
        })
    }
}

impl Drop for InMemoryBuffer<'_> {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
