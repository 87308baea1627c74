//! roiscope-core: region-of-interest engine over multi-dimensional pixel
//! sets (sans-IO).
//!
//! Shapes drawn over an image stack (X, Y, Z-sections, channels,
//! timepoints) are:
//!
//! 1. rasterized into the integer pixel coordinates they cover
//!    ([`area`]) and traced into an ordered outline ([`shape`]),
//! 2. projected into a normalized vertex-path key kept in a spatial
//!    index ([`index`]), synchronized with the authoritative shapes on
//!    change notifications ([`sync`], [`inbox`]),
//! 3. queried for overlap with caller regions under Z/T/visibility/lock
//!    pins, and
//! 4. measured: per-channel count, min, max, sum, mean and sample
//!    standard deviation over the pixels they enclose ([`stats`]).
//!
//! This crate has **no I/O dependencies**. Shapes are read through
//! [`ShapeSource`], pixels through [`PixelAccess`]; the filesystem pixel
//! store lives in `roiscope-io`.

pub mod area;
pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod inbox;
pub mod index;
pub mod pixels;
pub mod registry;
pub mod shape;
pub mod stats;
pub mod sync;
pub mod types;

pub use catalog::{ShapeCatalog, ShapeSource};
pub use config::CoreConfig;
pub use inbox::{BatchReport, ChangeInbox};
pub use index::{
    GeometryIndexStore, IndexKey, IndexRecord, OverlapQuery, RTreeIndexStore, SyncOutcome,
};
pub use pixels::{
    InMemoryPixelStore, PixelAccess, PixelBuffer, PixelSetDimensions, PixelType, Plane,
    with_buffer,
};
pub use registry::{ShapeRegistry, ShapeVariant};
pub use shape::{Mask, Roi, Shape, ShapeGeometry, ShapeKind};
pub use stats::{
    Cancellation, ChannelStatistics, NeverCancel, ShapeStatistics, StatisticsAggregator,
    StatsRestriction, StatsResult,
};
pub use sync::{BatchResult, GeometryIndexSynchronizer, SyncState};
pub use types::{BoundingBox, GridPoint, PixelSetId, Point, RoiError, RoiId, ShapeId};
