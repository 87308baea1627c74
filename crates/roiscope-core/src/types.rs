//! Shared types for the roiscope engine: identifiers, coordinates and the
//! error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(
    /// Opaque identity of a [`Shape`](crate::shape::Shape).
    ShapeId,
    "shape"
);
id_type!(
    /// Opaque identity of a [`Roi`](crate::shape::Roi).
    RoiId,
    "roi"
);
id_type!(
    /// Opaque identity of an external pixel set (the raw X/Y/Z/C/T array of
    /// one image).
    PixelSetId,
    "pixels"
);

/// A 2D point in image coordinates.
///
/// Used for vector geometry (vertices, centers, corners). Integer pixel
/// positions covered by a shape are [`GridPoint`]s instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }
}

impl From<Point> for geo::Coord<f64> {
    fn from(p: Point) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// An integer pixel coordinate covered by a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPoint {
    /// Column.
    pub x: i64,
    /// Row.
    pub y: i64,
}

impl GridPoint {
    /// Create a new grid point.
    #[must_use]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned extents of a shape's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Smallest x.
    pub min_x: f64,
    /// Smallest y.
    pub min_y: f64,
    /// Largest x.
    pub max_x: f64,
    /// Largest y.
    pub max_y: f64,
}

impl BoundingBox {
    /// Extents of a non-empty point set, `None` if `points` is empty.
    #[must_use]
    pub fn of_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        Some(points.iter().skip(1).fold(
            Self {
                min_x: first.x,
                min_y: first.y,
                max_x: first.x,
                max_y: first.y,
            },
            |b, p| Self {
                min_x: b.min_x.min(p.x),
                min_y: b.min_y.min(p.y),
                max_x: b.max_x.max(p.x),
                max_y: b.max_y.max(p.y),
            },
        ))
    }

    /// Whether two boxes share at least one point (edges inclusive).
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// Errors surfaced by the roiscope engine.
///
/// The engine never swallows failures. Callers use
/// [`is_transient`](Self::is_transient) and [`is_benign`](Self::is_benign)
/// to decide between retrying, ignoring and reporting.
#[derive(Debug, thiserror::Error)]
pub enum RoiError {
    /// No registry entry exists for the given shape tag.
    #[error("unknown shape variant: {0:?}")]
    UnknownShapeVariant(String),

    /// A registry payload could not be turned into a shape of its tag.
    #[error("invalid {tag} shape: {reason}")]
    InvalidShape {
        /// Registry tag the payload claimed.
        tag: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The shape disappeared between notification and processing.
    #[error("{0} not found")]
    ShapeNotFound(ShapeId),

    /// The roi owning a shape could not be loaded.
    #[error("{0} not found")]
    RoiNotFound(RoiId),

    /// The index store rejected a write. Transient.
    #[error("geometry index write failed: {0}")]
    IndexWriteFailed(String),

    /// The index store could not answer a query. Transient.
    #[error("geometry index read failed: {0}")]
    IndexReadFailed(String),

    /// Pixel set metadata lookup failed.
    #[error("{0} not found")]
    PixelSetNotFound(PixelSetId),

    /// A sample coordinate lies outside the pixel set's dimensions.
    #[error("sample ({x}, {y}, z={z}, c={c}, t={t}) is outside {pixel_set}")]
    OutOfBounds {
        /// Pixel set that was read.
        pixel_set: PixelSetId,
        /// Column.
        x: i64,
        /// Row.
        y: i64,
        /// Z-section.
        z: u32,
        /// Channel.
        c: u32,
        /// Timepoint.
        t: u32,
    },

    /// The pixel store failed to read. Transient.
    #[error("pixel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Random shape count outside `[1, 100000]`.
    #[error("random shape count {count} is outside [1, {max}]")]
    CountOutOfBounds {
        /// Requested count.
        count: usize,
        /// Largest accepted count.
        max: usize,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A cancellation check stopped a long-running operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl RoiError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::IndexWriteFailed(_) | Self::IndexReadFailed(_) | Self::Io(_)
        )
    }

    /// Whether the failure means "nothing to do" rather than a fault.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::ShapeNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        assert_eq!(ShapeId(7).to_string(), "shape:7");
        assert_eq!(RoiId(3).to_string(), "roi:3");
        assert_eq!(PixelSetId(1).to_string(), "pixels:1");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ShapeId(42)).unwrap_or_default();
        assert_eq!(json, "42");
    }

    #[test]
    fn bounding_box_of_points() {
        let b = BoundingBox::of_points(&[
            Point::new(3.0, -1.0),
            Point::new(-2.0, 4.0),
            Point::new(0.0, 0.0),
        ]);
        assert_eq!(
            b,
            Some(BoundingBox {
                min_x: -2.0,
                min_y: -1.0,
                max_x: 3.0,
                max_y: 4.0,
            })
        );
        assert_eq!(BoundingBox::of_points(&[]), None);
    }

    #[test]
    fn touching_boxes_intersect() {
        let a = BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        };
        let b = BoundingBox {
            min_x: 1.0,
            min_y: 1.0,
            max_x: 2.0,
            max_y: 2.0,
        };
        let c = BoundingBox {
            min_x: 1.5,
            min_y: 0.0,
            max_x: 2.0,
            max_y: 0.5,
        };
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn error_classification() {
        assert!(RoiError::IndexWriteFailed("disk full".into()).is_transient());
        assert!(RoiError::Io(std::io::Error::other("eio")).is_transient());
        assert!(!RoiError::ShapeNotFound(ShapeId(1)).is_transient());
        assert!(RoiError::ShapeNotFound(ShapeId(1)).is_benign());
        assert!(!RoiError::Cancelled.is_benign());
    }
}
