//! Vector shape model: geometry variants, per-shape attributes and the
//! ordered outline ("boundary points") used to derive index keys.
//!
//! Geometry is a closed enum, so every operation over shapes is an
//! exhaustive `match`. Adding a variant fails to compile until area
//! enumeration ([`crate::area`]), boundary tracing (here) and the
//! [`registry`](crate::registry) all handle it.

use std::f64::consts::TAU;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::area::AreaPoints;
use crate::config::CoreConfig;
use crate::types::{BoundingBox, PixelSetId, Point, RoiError, RoiId, ShapeId};

/// Stable tag identifying a geometry variant on the wire and in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Single point.
    Point,
    /// Straight segment.
    Line,
    /// Axis-aligned rectangle.
    Rectangle,
    /// Axis-aligned ellipse.
    Ellipse,
    /// Closed vertex list, boundary-inclusive fill.
    Polygon,
    /// Open vertex list.
    Polyline,
    /// Closed vertex list, even-odd fill.
    Path,
    /// Bitmap.
    Mask,
}

impl ShapeKind {
    /// Every variant, in registry order.
    pub const ALL: [Self; 8] = [
        Self::Point,
        Self::Line,
        Self::Rectangle,
        Self::Ellipse,
        Self::Polygon,
        Self::Polyline,
        Self::Path,
        Self::Mask,
    ];

    /// The wire tag for this kind.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Line => "line",
            Self::Rectangle => "rectangle",
            Self::Ellipse => "ellipse",
            Self::Polygon => "polygon",
            Self::Polyline => "polyline",
            Self::Path => "path",
            Self::Mask => "mask",
        }
    }

    /// Look up a kind by its wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::UnknownShapeVariant`] for an unrecognized tag.
    pub fn from_tag(tag: &str) -> Result<Self, RoiError> {
        Self::ALL
            .into_iter()
            .find(|k| k.tag() == tag)
            .ok_or_else(|| RoiError::UnknownShapeVariant(tag.to_owned()))
    }
}

/// A bitmap region anchored at `(x, y)`.
///
/// `bits` is packed row-major, most significant bit first; bit `i` of the
/// stream covers column `i % width`, row `i / width`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    /// Left edge in image coordinates.
    pub x: f64,
    /// Top edge in image coordinates.
    pub y: f64,
    /// Columns in the bitmap.
    pub width: u32,
    /// Rows in the bitmap.
    pub height: u32,
    /// Packed bitmap, `ceil(width * height / 8)` bytes.
    pub bits: Vec<u8>,
}

impl Mask {
    /// Build a mask, checking that `bits` has exactly the packed length.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidShape`] if `bits` has the wrong length.
    pub fn new(x: f64, y: f64, width: u32, height: u32, bits: Vec<u8>) -> Result<Self, RoiError> {
        let expected = Self::packed_len(width, height);
        if bits.len() != expected {
            return Err(RoiError::InvalidShape {
                tag: ShapeKind::Mask.tag().to_owned(),
                reason: format!("expected {expected} bitmap bytes, got {}", bits.len()),
            });
        }
        Ok(Self {
            x,
            y,
            width,
            height,
            bits,
        })
    }

    /// Build a mask from an 8-bit image: non-zero pixels are set.
    #[must_use]
    pub fn from_gray(x: f64, y: f64, image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let mut bits = vec![0u8; Self::packed_len(width, height)];
        for (i, pixel) in image.pixels().enumerate() {
            if pixel.0[0] != 0 {
                bits[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Self {
            x,
            y,
            width,
            height,
            bits,
        }
    }

    /// Number of bytes needed to pack `width * height` bits.
    #[must_use]
    pub const fn packed_len(width: u32, height: u32) -> usize {
        (width as usize * height as usize).div_ceil(8)
    }

    /// Whether the bit at bitmap column `col`, row `row` is set.
    ///
    /// Out-of-range positions read as unset.
    #[must_use]
    pub fn is_set(&self, col: u32, row: u32) -> bool {
        if col >= self.width || row >= self.height {
            return false;
        }
        let i = row as usize * self.width as usize + col as usize;
        self.bits
            .get(i / 8)
            .is_some_and(|byte| byte & (0x80 >> (i % 8)) != 0)
    }
}

/// Geometry of one shape.
///
/// Serialized internally tagged by `type`, using the [`ShapeKind`] tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeGeometry {
    /// A single location.
    Point {
        /// Column.
        x: f64,
        /// Row.
        y: f64,
    },
    /// Segment from `(x1, y1)` to `(x2, y2)`.
    Line {
        /// Start column.
        x1: f64,
        /// Start row.
        y1: f64,
        /// End column.
        x2: f64,
        /// End row.
        y2: f64,
    },
    /// Rectangle with top-left corner `(x, y)`.
    Rectangle {
        /// Left edge.
        x: f64,
        /// Top edge.
        y: f64,
        /// Extent along x.
        width: f64,
        /// Extent along y.
        height: f64,
    },
    /// Ellipse centered on `(x, y)`.
    Ellipse {
        /// Center column.
        x: f64,
        /// Center row.
        y: f64,
        /// Semi-axis along x.
        radius_x: f64,
        /// Semi-axis along y.
        radius_y: f64,
    },
    /// Closed polygon; the last vertex connects back to the first.
    Polygon {
        /// Vertices in drawing order.
        points: Vec<Point>,
    },
    /// Open chain of segments.
    Polyline {
        /// Vertices in drawing order.
        points: Vec<Point>,
    },
    /// Closed free-form path filled with the even-odd rule.
    Path {
        /// Vertices in drawing order.
        points: Vec<Point>,
    },
    /// Bitmap region.
    Mask(Mask),
}

impl ShapeGeometry {
    /// The kind tag of this geometry.
    #[must_use]
    pub const fn kind(&self) -> ShapeKind {
        match self {
            Self::Point { .. } => ShapeKind::Point,
            Self::Line { .. } => ShapeKind::Line,
            Self::Rectangle { .. } => ShapeKind::Rectangle,
            Self::Ellipse { .. } => ShapeKind::Ellipse,
            Self::Polygon { .. } => ShapeKind::Polygon,
            Self::Polyline { .. } => ShapeKind::Polyline,
            Self::Path { .. } => ShapeKind::Path,
            Self::Mask(_) => ShapeKind::Mask,
        }
    }

    /// Ordered outline of the geometry, traced once.
    ///
    /// Uses [`CoreConfig::DEFAULT_ELLIPSE_VERTICES`] for ellipses; see
    /// [`boundary_points_with`](Self::boundary_points_with).
    #[must_use]
    pub fn boundary_points(&self) -> Vec<Point> {
        self.boundary_points_with(CoreConfig::DEFAULT_ELLIPSE_VERTICES)
    }

    /// Ordered outline of the geometry, approximating ellipses with
    /// `ellipse_vertices` vertices.
    ///
    /// The outline is not closed explicitly (the first vertex is not
    /// repeated); index-key construction closes it.
    #[must_use]
    pub fn boundary_points_with(&self, ellipse_vertices: usize) -> Vec<Point> {
        match self {
            Self::Point { x, y } => vec![Point::new(*x, *y)],
            Self::Line { x1, y1, x2, y2 } => vec![Point::new(*x1, *y1), Point::new(*x2, *y2)],
            Self::Rectangle {
                x,
                y,
                width,
                height,
            } => corners(*x, *y, *width, *height),
            Self::Ellipse {
                x,
                y,
                radius_x,
                radius_y,
            } => {
                let n = ellipse_vertices.max(CoreConfig::MIN_ELLIPSE_VERTICES);
                (0..n)
                    .map(|k| {
                        #[allow(clippy::cast_precision_loss)]
                        let angle = TAU * k as f64 / n as f64;
                        Point::new(
                            radius_x.mul_add(angle.cos(), *x),
                            radius_y.mul_add(angle.sin(), *y),
                        )
                    })
                    .collect()
            }
            Self::Polygon { points } | Self::Polyline { points } | Self::Path { points } => {
                points.clone()
            }
            Self::Mask(mask) => corners(
                mask.x,
                mask.y,
                f64::from(mask.width),
                f64::from(mask.height),
            ),
        }
    }

    /// Axis-aligned extents of the geometry, `None` for vertex lists with
    /// no vertices.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match self {
            Self::Ellipse {
                x,
                y,
                radius_x,
                radius_y,
            } => Some(BoundingBox {
                min_x: x - radius_x.abs(),
                min_y: y - radius_y.abs(),
                max_x: x + radius_x.abs(),
                max_y: y + radius_y.abs(),
            }),
            _ => BoundingBox::of_points(&self.boundary_points()),
        }
    }

    /// Integer pixel coordinates covered by the geometry.
    ///
    /// See [`crate::area`] for the per-variant rules.
    #[must_use]
    pub fn area_points(&self) -> AreaPoints<'_> {
        crate::area::area_points(self)
    }
}

/// The four corners of a rectangle, clockwise from the top-left.
fn corners(x: f64, y: f64, width: f64, height: f64) -> Vec<Point> {
    vec![
        Point::new(x, y),
        Point::new(x + width, y),
        Point::new(x + width, y + height),
        Point::new(x, y + height),
    ]
}

/// One vector primitive belonging to a [`Roi`].
///
/// `z`/`t` of `None` mean the shape applies to every Z-section/timepoint.
/// `channels` of `None` (or an empty list) means every channel of the
/// owning pixel set. `visible`/`locked` of `None` mean the flag was never
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    /// Identity.
    pub id: ShapeId,
    /// Owning roi.
    pub roi: RoiId,
    /// Pinned Z-section.
    pub z: Option<u32>,
    /// Pinned timepoint.
    pub t: Option<u32>,
    /// Channel restriction.
    pub channels: Option<Vec<u32>>,
    /// Visibility flag.
    pub visible: Option<bool>,
    /// Lock flag.
    pub locked: Option<bool>,
    /// Geometry.
    pub geometry: ShapeGeometry,
}

impl Shape {
    /// A shape with no pins, no channel restriction and unset flags.
    #[must_use]
    pub const fn new(id: ShapeId, roi: RoiId, geometry: ShapeGeometry) -> Self {
        Self {
            id,
            roi,
            z: None,
            t: None,
            channels: None,
            visible: None,
            locked: None,
            geometry,
        }
    }

    /// Pin to a Z-section.
    #[must_use]
    pub const fn with_z(mut self, z: u32) -> Self {
        self.z = Some(z);
        self
    }

    /// Pin to a timepoint.
    #[must_use]
    pub const fn with_t(mut self, t: u32) -> Self {
        self.t = Some(t);
        self
    }

    /// Restrict to the given channels.
    #[must_use]
    pub fn with_channels(mut self, channels: impl Into<Vec<u32>>) -> Self {
        self.channels = Some(channels.into());
        self
    }

    /// Set the visibility flag.
    #[must_use]
    pub const fn with_visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    /// Set the lock flag.
    #[must_use]
    pub const fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    /// The kind tag of this shape's geometry.
    #[must_use]
    pub const fn kind(&self) -> ShapeKind {
        self.geometry.kind()
    }

    /// See [`ShapeGeometry::area_points`].
    #[must_use]
    pub fn area_points(&self) -> AreaPoints<'_> {
        self.geometry.area_points()
    }

    /// Number of area points. Enumerates the geometry.
    #[must_use]
    pub fn area_point_count(&self) -> usize {
        self.area_points().count()
    }

    /// See [`ShapeGeometry::boundary_points`].
    #[must_use]
    pub fn boundary_points(&self) -> Vec<Point> {
        self.geometry.boundary_points()
    }

    /// See [`ShapeGeometry::bounding_box`].
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.geometry.bounding_box()
    }
}

/// A named group of shapes annotating one pixel set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// Identity.
    pub id: RoiId,
    /// Pixel set every shape of this roi annotates.
    pub pixel_set: PixelSetId,
    /// Optional display name.
    pub name: Option<String>,
}

impl Roi {
    /// An unnamed roi.
    #[must_use]
    pub const fn new(id: RoiId, pixel_set: PixelSetId) -> Self {
        Self {
            id,
            pixel_set,
            name: None,
        }
    }
}
