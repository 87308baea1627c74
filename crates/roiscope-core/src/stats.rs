//! Per-channel descriptive statistics over the pixels a shape covers.
//!
//! For every area point, every resolved channel and every resolved (Z, T)
//! pair, one sample is read and folded into running count, min, max, sum
//! and sum of squares. Mean and sample standard deviation are derived at
//! the end; an empty channel keeps every field at zero.
//!
//! Channel resolution: a restriction's channel list wins, then the shape's
//! own non-empty channel list, then every channel of the pixel set.
//! Z/T resolution: a shape's own pin wins, then the restriction's pin,
//! then the full extent of the pixel set.
//!
//! The combined statistic takes its channel order and identifying fields
//! from the first shape and accumulates every sample of every shape whose
//! channel appears in that order. One pixel handle is opened per distinct
//! pixel set per call and released when the call returns, error or not.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::catalog::ShapeSource;
use crate::pixels::{PixelAccess, PixelBuffer};
use crate::shape::Shape;
use crate::types::{PixelSetId, RoiError, RoiId, ShapeId};

/// Cooperative cancellation hook, polled once per area point.
pub trait Cancellation: Sync {
    /// Whether the caller wants the computation abandoned.
    fn is_cancelled(&self) -> bool;
}

impl Cancellation for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// A [`Cancellation`] that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Caller-supplied narrowing of a statistics request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRestriction {
    /// Z-section for shapes that do not pin one.
    pub z: Option<u32>,
    /// Timepoint for shapes that do not pin one.
    pub t: Option<u32>,
    /// Channels for every shape.
    pub channels: Option<Vec<u32>>,
}

/// Statistics for one shape, or the combination of several.
///
/// The per-channel vectors are indexed in lock-step with `channels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStatistics {
    /// Shape, `None` for a combined statistic.
    pub shape_id: Option<ShapeId>,
    /// Roi of the (first) shape.
    pub roi: RoiId,
    /// Pixel set of the (first) shape.
    pub pixel_set: PixelSetId,
    /// Channel ids.
    pub channels: Vec<u32>,
    /// Samples read.
    pub count: Vec<u64>,
    /// Smallest sample.
    pub min: Vec<f64>,
    /// Largest sample.
    pub max: Vec<f64>,
    /// Sum of samples.
    pub sum: Vec<f64>,
    /// Arithmetic mean.
    pub mean: Vec<f64>,
    /// Sample standard deviation.
    pub std_dev: Vec<f64>,
}

/// One channel's slice of a [`ShapeStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelStatistics {
    /// Channel id.
    pub channel: u32,
    /// Samples read.
    pub count: u64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Sum of samples.
    pub sum: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation.
    pub std_dev: f64,
}

impl ShapeStatistics {
    /// The statistics of channel `channel`, `None` if it was not measured.
    #[must_use]
    pub fn channel(&self, channel: u32) -> Option<ChannelStatistics> {
        let i = self.channels.iter().position(|&w| w == channel)?;
        Some(ChannelStatistics {
            channel,
            count: *self.count.get(i)?,
            min: *self.min.get(i)?,
            max: *self.max.get(i)?,
            sum: *self.sum.get(i)?,
            mean: *self.mean.get(i)?,
            std_dev: *self.std_dev.get(i)?,
        })
    }

    /// Samples read across every channel.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.count.iter().sum()
    }
}

/// Result of a statistics request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResult {
    /// One entry per requested shape, in request order.
    pub per_shape: Vec<ShapeStatistics>,
    /// Combination of every shape, `None` for an empty request.
    pub combined: Option<ShapeStatistics>,
}

/// Running sums for a fixed channel list.
struct Accumulator {
    channels: Vec<u32>,
    count: Vec<u64>,
    min: Vec<f64>,
    max: Vec<f64>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Accumulator {
    fn new(channels: Vec<u32>) -> Self {
        let n = channels.len();
        Self {
            channels,
            count: vec![0; n],
            min: vec![f64::INFINITY; n],
            max: vec![f64::NEG_INFINITY; n],
            sum: vec![0.0; n],
            sum_sq: vec![0.0; n],
        }
    }

    fn slot(&self, channel: u32) -> Option<usize> {
        self.channels.iter().position(|&w| w == channel)
    }

    fn add(&mut self, slot: usize, value: f64) {
        self.count[slot] += 1;
        self.min[slot] = self.min[slot].min(value);
        self.max[slot] = self.max[slot].max(value);
        self.sum[slot] += value;
        self.sum_sq[slot] = value.mul_add(value, self.sum_sq[slot]);
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self, shape_id: Option<ShapeId>, roi: RoiId, pixel_set: PixelSetId) -> ShapeStatistics {
        let n = self.channels.len();
        let mut stats = ShapeStatistics {
            shape_id,
            roi,
            pixel_set,
            channels: self.channels,
            count: self.count,
            min: vec![0.0; n],
            max: vec![0.0; n],
            sum: self.sum,
            mean: vec![0.0; n],
            std_dev: vec![0.0; n],
        };
        for i in 0..n {
            let count = stats.count[i];
            if count == 0 {
                stats.sum[i] = 0.0;
                continue;
            }
            let c = count as f64;
            stats.min[i] = self.min[i];
            stats.max[i] = self.max[i];
            stats.mean[i] = stats.sum[i] / c;
            if count > 1 {
                let variance = (self.sum_sq[i] - stats.sum[i] * stats.sum[i] / c) / (c - 1.0);
                stats.std_dev[i] = variance.max(0.0).sqrt();
            }
        }
        stats
    }
}

/// Computes statistics by reading shapes from a [`ShapeSource`] and
/// samples from a [`PixelAccess`].
pub struct StatisticsAggregator {
    source: Arc<dyn ShapeSource>,
    pixels: Arc<dyn PixelAccess>,
}

impl std::fmt::Debug for StatisticsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsAggregator").finish_non_exhaustive()
    }
}

/// Open handles for one call, keyed by pixel set.
type HandleCache<'a> = HashMap<PixelSetId, Box<dyn PixelBuffer + 'a>>;

impl StatisticsAggregator {
    /// Wire an aggregator to its collaborators.
    #[must_use]
    pub fn new(source: Arc<dyn ShapeSource>, pixels: Arc<dyn PixelAccess>) -> Self {
        Self { source, pixels }
    }

    /// Per-shape and combined statistics with no restriction.
    ///
    /// # Errors
    ///
    /// See [`stats_for_shapes_restricted`](Self::stats_for_shapes_restricted).
    pub fn stats_for_shapes(&self, shapes: &[ShapeId]) -> Result<StatsResult, RoiError> {
        self.stats_for_shapes_restricted(shapes, &StatsRestriction::default(), &NeverCancel)
    }

    /// Per-shape and combined statistics narrowed by `restriction`.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::ShapeNotFound`]/[`RoiError::RoiNotFound`] for
    /// missing entities, [`RoiError::PixelSetNotFound`] if a pixel set
    /// cannot be opened, [`RoiError::OutOfBounds`] or [`RoiError::Io`] on
    /// the first failed read, and [`RoiError::Cancelled`] if `cancel`
    /// fires. No partial result is returned.
    pub fn stats_for_shapes_restricted(
        &self,
        shapes: &[ShapeId],
        restriction: &StatsRestriction,
        cancel: &dyn Cancellation,
    ) -> Result<StatsResult, RoiError> {
        let mut handles: HandleCache<'_> = HashMap::new();
        let mut combined: Option<(Accumulator, RoiId, PixelSetId)> = None;
        let mut per_shape = Vec::with_capacity(shapes.len());

        for &id in shapes {
            let shape = self.source.shape(id).ok_or(RoiError::ShapeNotFound(id))?;
            let pixel_set = self
                .source
                .roi(shape.roi)
                .ok_or(RoiError::RoiNotFound(shape.roi))?
                .pixel_set;
            if !handles.contains_key(&pixel_set) {
                handles.insert(pixel_set, self.pixels.open(pixel_set)?);
            }
            let Some(buffer) = handles.get(&pixel_set) else {
                return Err(RoiError::PixelSetNotFound(pixel_set));
            };

            let mut acc = Accumulator::new(resolve_channels(&shape, restriction, buffer.as_ref()));
            let (combined_acc, _, _) = combined.get_or_insert_with(|| {
                (Accumulator::new(acc.channels.clone()), shape.roi, pixel_set)
            });
            accumulate(&shape, restriction, buffer.as_ref(), cancel, &mut acc, combined_acc)?;

            let stats = acc.finish(Some(id), shape.roi, pixel_set);
            tracing::debug!(shape = %id, %pixel_set, samples = stats.total_count(), "shape statistics");
            per_shape.push(stats);
        }

        let combined = combined.map(|(acc, roi, pixel_set)| acc.finish(None, roi, pixel_set));
        Ok(StatsResult {
            per_shape,
            combined,
        })
    }
}

fn resolve_channels(shape: &Shape, restriction: &StatsRestriction, buffer: &dyn PixelBuffer) -> Vec<u32> {
    if let Some(channels) = &restriction.channels {
        return channels.clone();
    }
    match &shape.channels {
        Some(channels) if !channels.is_empty() => channels.clone(),
        _ => buffer.dimensions().channels(),
    }
}

fn plane_range(pinned: Option<u32>, requested: Option<u32>, size: u32) -> RangeInclusive<u32> {
    match pinned.or(requested) {
        Some(index) => index..=index,
        // An empty range when the dimension has no extent.
        None if size == 0 => 1..=0,
        None => 0..=size - 1,
    }
}

fn accumulate(
    shape: &Shape,
    restriction: &StatsRestriction,
    buffer: &dyn PixelBuffer,
    cancel: &dyn Cancellation,
    acc: &mut Accumulator,
    combined: &mut Accumulator,
) -> Result<(), RoiError> {
    let dims = buffer.dimensions();
    let zs = plane_range(shape.z, restriction.z, dims.size_z);
    let ts = plane_range(shape.t, restriction.t, dims.size_t);
    let slots: Vec<(usize, u32, Option<usize>)> = acc
        .channels
        .iter()
        .enumerate()
        .map(|(i, &w)| (i, w, combined.slot(w)))
        .collect();

    for point in shape.area_points() {
        if cancel.is_cancelled() {
            return Err(RoiError::Cancelled);
        }
        for &(slot, channel, combined_slot) in &slots {
            for z in zs.clone() {
                for t in ts.clone() {
                    let value = buffer.sample(point.x, point.y, z, channel, t)?;
                    acc.add(slot, value);
                    if let Some(j) = combined_slot {
                        combined.add(j, value);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::catalog::ShapeCatalog;
    use crate::pixels::{InMemoryPixelStore, PixelSetDimensions};
    use crate::shape::{Roi, ShapeGeometry};
    use crate::types::Point;

    const SET: PixelSetId = PixelSetId(1);

    fn rect(x: f64, y: f64, w: f64, h: f64) -> ShapeGeometry {
        ShapeGeometry::Rectangle {
            x,
            y,
            width: w,
            height: h,
        }
    }

    struct Fixture {
        catalog: Arc<ShapeCatalog>,
        pixels: Arc<InMemoryPixelStore>,
        aggregator: StatisticsAggregator,
    }

    fn fixture(pixels: InMemoryPixelStore, shapes: Vec<Shape>) -> Fixture {
        let catalog = ShapeCatalog::new();
        for shape in shapes {
            catalog.upsert_roi(Roi::new(shape.roi, SET));
            catalog.upsert_shape(shape);
        }
        let catalog = Arc::new(catalog);
        let pixels = Arc::new(pixels);
        let aggregator = StatisticsAggregator::new(catalog.clone(), pixels.clone());
        Fixture {
            catalog,
            pixels,
            aggregator,
        }
    }

    /// Samples equal 5 at z=2 and 1 elsewhere.
    fn z2_store() -> InMemoryPixelStore {
        let mut store = InMemoryPixelStore::new();
        store.insert_with(SET, PixelSetDimensions::new(20, 20, 3, 1, 1), |_, _, z, _, _| {
            if z == 2 { 5.0 } else { 1.0 }
        });
        store
    }

    // --- single shape tests ---

    #[test]
    fn pinned_rectangle_over_constant_plane() {
        let shape = Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 10.0, 10.0)).with_z(2);
        let f = fixture(z2_store(), vec![shape]);
        let result = f.aggregator.stats_for_shapes(&[ShapeId(1)]).unwrap();
        let stats = result.per_shape[0].channel(0).unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 5.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.sum, 500.0);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn unpinned_shape_spans_every_plane() {
        let shape = Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 2.0, 2.0));
        let f = fixture(z2_store(), vec![shape]);
        let stats = f.aggregator.stats_for_shapes(&[ShapeId(1)]).unwrap().per_shape[0]
            .channel(0)
            .unwrap();
        assert_eq!(stats.count, 12);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.sum, 28.0);
    }

    #[test]
    fn zero_area_shape_has_neutral_statistics() {
        let shape = Shape::new(ShapeId(1), RoiId(1), ShapeGeometry::Polygon { points: vec![] });
        let f = fixture(z2_store(), vec![shape]);
        let result = f.aggregator.stats_for_shapes(&[ShapeId(1)]).unwrap();
        let stats = &result.per_shape[0];
        assert_eq!(stats.count, vec![0]);
        assert_eq!(stats.min, vec![0.0]);
        assert_eq!(stats.max, vec![0.0]);
        assert_eq!(stats.mean, vec![0.0]);
        assert_eq!(stats.std_dev, vec![0.0]);
        assert!(stats.mean[0].is_finite());
    }

    #[test]
    fn single_sample_has_zero_deviation() {
        let shape = Shape::new(ShapeId(1), RoiId(1), ShapeGeometry::Point { x: 3.0, y: 4.0 }).with_z(0);
        let mut store = InMemoryPixelStore::new();
        store.insert_with(SET, PixelSetDimensions::new(8, 8, 1, 1, 1), |x, y, _, _, _| {
            f64::from(x).mul_add(1e7, f64::from(y) * 0.1)
        });
        let f = fixture(store, vec![shape]);
        let stats = f.aggregator.stats_for_shapes(&[ShapeId(1)]).unwrap().per_shape[0]
            .channel(0)
            .unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn sample_standard_deviation() {
        // Values 0..4 along a row.
        let shape = Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 5.0, 1.0));
        let mut store = InMemoryPixelStore::new();
        store.insert_with(SET, PixelSetDimensions::new(5, 1, 1, 1, 1), |x, _, _, _, _| f64::from(x));
        let f = fixture(store, vec![shape]);
        let stats = f.aggregator.stats_for_shapes(&[ShapeId(1)]).unwrap().per_shape[0]
            .channel(0)
            .unwrap();
        assert_eq!(stats.mean, 2.0);
        assert!((stats.std_dev - 2.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn declared_channels_restrict_and_empty_means_all() {
        let mut store = InMemoryPixelStore::new();
        store.insert_with(SET, PixelSetDimensions::new(4, 4, 1, 3, 1), |_, _, _, c, _| f64::from(c));
        let declared = Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 2.0, 2.0)).with_channels(vec![2_u32]);
        let empty = Shape::new(ShapeId(2), RoiId(2), rect(0.0, 0.0, 2.0, 2.0)).with_channels(Vec::<u32>::new());
        let f = fixture(store, vec![declared, empty]);
        let result = f.aggregator.stats_for_shapes(&[ShapeId(1), ShapeId(2)]).unwrap();
        assert_eq!(result.per_shape[0].channels, vec![2]);
        assert_eq!(result.per_shape[0].mean, vec![2.0]);
        assert_eq!(result.per_shape[1].channels, vec![0, 1, 2]);
    }

    #[test]
    fn channel_view_tolerates_ragged_vectors() {
        let stats = ShapeStatistics {
            shape_id: Some(ShapeId(1)),
            roi: RoiId(1),
            pixel_set: SET,
            channels: vec![0, 1],
            count: vec![3, 4],
            min: vec![1.0, 2.0],
            max: vec![5.0],
            sum: vec![9.0, 10.0],
            mean: vec![3.0, 2.5],
            std_dev: vec![0.5, 0.5],
        };
        assert_eq!(stats.channel(0).map(|c| c.max), Some(5.0));
        assert!(stats.channel(1).is_none());
        assert!(stats.channel(7).is_none());
    }

    // --- combined tests ---

    #[test]
    fn combined_uses_first_shape_channels() {
        let mut store = InMemoryPixelStore::new();
        store.insert_with(SET, PixelSetDimensions::new(10, 10, 1, 2, 1), |_, _, _, c, _| {
            f64::from(c) + 1.0
        });
        let first = Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 2.0, 2.0)).with_channels(vec![1_u32]);
        let second = Shape::new(ShapeId(2), RoiId(2), rect(5.0, 5.0, 1.0, 1.0));
        let f = fixture(store, vec![first, second]);
        let result = f.aggregator.stats_for_shapes(&[ShapeId(1), ShapeId(2)]).unwrap();
        let combined = result.combined.unwrap();
        assert_eq!(combined.shape_id, None);
        assert_eq!(combined.roi, RoiId(1));
        assert_eq!(combined.channels, vec![1]);
        // 4 samples from the first shape, 1 from the second's channel 1.
        assert_eq!(combined.count, vec![5]);
        assert_eq!(combined.sum, vec![10.0]);
        assert_eq!(result.per_shape[1].count, vec![1, 1]);
    }

    #[test]
    fn shapes_on_two_pixel_sets_open_one_handle_each() {
        let other = PixelSetId(2);
        let mut store = InMemoryPixelStore::new();
        store.insert_constant(SET, PixelSetDimensions::new(4, 4, 1, 1, 1), 1.0);
        store.insert_constant(other, PixelSetDimensions::new(4, 4, 1, 1, 1), 3.0);
        let f = fixture(
            store,
            vec![
                Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 1.0, 1.0)),
                Shape::new(ShapeId(3), RoiId(1), rect(1.0, 1.0, 1.0, 1.0)),
            ],
        );
        f.catalog.upsert_roi(Roi::new(RoiId(2), other));
        f.catalog
            .upsert_shape(Shape::new(ShapeId(2), RoiId(2), rect(0.0, 0.0, 1.0, 1.0)));
        let result = f
            .aggregator
            .stats_for_shapes(&[ShapeId(1), ShapeId(2), ShapeId(3)])
            .unwrap();
        assert_eq!(result.per_shape[1].pixel_set, other);
        let combined = result.combined.unwrap();
        assert_eq!(combined.pixel_set, SET);
        assert_eq!(combined.sum, vec![5.0]);
        assert_eq!(f.pixels.open_handles(), 0);
    }

    #[test]
    fn empty_request_has_no_combined() {
        let f = fixture(z2_store(), vec![]);
        let result = f.aggregator.stats_for_shapes(&[]).unwrap();
        assert!(result.per_shape.is_empty());
        assert!(result.combined.is_none());
    }

    // --- restriction and failure tests ---

    #[test]
    fn restriction_applies_to_unpinned_shapes_only() {
        let pinned = Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 1.0, 1.0)).with_z(0);
        let unpinned = Shape::new(ShapeId(2), RoiId(2), rect(0.0, 0.0, 1.0, 1.0));
        let f = fixture(z2_store(), vec![pinned, unpinned]);
        let restriction = StatsRestriction {
            z: Some(2),
            ..StatsRestriction::default()
        };
        let result = f
            .aggregator
            .stats_for_shapes_restricted(&[ShapeId(1), ShapeId(2)], &restriction, &NeverCancel)
            .unwrap();
        assert_eq!(result.per_shape[0].sum, vec![1.0]);
        assert_eq!(result.per_shape[1].sum, vec![5.0]);
    }

    #[test]
    fn out_of_bounds_aborts_and_releases_handle() {
        let inside = Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 2.0, 2.0));
        let outside = Shape::new(ShapeId(2), RoiId(2), rect(18.0, 18.0, 4.0, 4.0));
        let f = fixture(z2_store(), vec![inside, outside]);
        let err = f
            .aggregator
            .stats_for_shapes(&[ShapeId(1), ShapeId(2)])
            .unwrap_err();
        assert!(matches!(err, RoiError::OutOfBounds { .. }));
        assert_eq!(f.pixels.open_handles(), 0);
    }

    #[test]
    fn huge_shapes_fail_out_of_bounds() {
        let ellipse = ShapeGeometry::Ellipse {
            x: 0.0,
            y: 0.0,
            radius_x: 2.0,
            radius_y: 1e19,
        };
        let polygon = ShapeGeometry::Polygon {
            points: vec![
                Point::new(-4e9, -4e9),
                Point::new(4e9, -4e9),
                Point::new(0.0, 4e9),
            ],
        };
        let f = fixture(
            z2_store(),
            vec![
                Shape::new(ShapeId(1), RoiId(1), ellipse).with_z(0),
                Shape::new(ShapeId(2), RoiId(2), polygon).with_z(0),
            ],
        );
        for id in [ShapeId(1), ShapeId(2)] {
            let err = f.aggregator.stats_for_shapes(&[id]).unwrap_err();
            assert!(matches!(err, RoiError::OutOfBounds { .. }), "{id}: {err}");
        }
        assert_eq!(f.pixels.open_handles(), 0);
    }

    #[test]
    fn missing_shape_and_pixel_set_fail() {
        let f = fixture(z2_store(), vec![]);
        assert!(matches!(
            f.aggregator.stats_for_shapes(&[ShapeId(4)]),
            Err(RoiError::ShapeNotFound(ShapeId(4)))
        ));
        f.catalog.upsert_roi(Roi::new(RoiId(9), PixelSetId(9)));
        f.catalog.upsert_shape(Shape::new(
            ShapeId(9),
            RoiId(9),
            ShapeGeometry::Point { x: 0.0, y: 0.0 },
        ));
        assert!(matches!(
            f.aggregator.stats_for_shapes(&[ShapeId(9)]),
            Err(RoiError::PixelSetNotFound(PixelSetId(9)))
        ));
    }

    #[test]
    fn cancellation_is_honoured() {
        let shape = Shape::new(
            ShapeId(1),
            RoiId(1),
            ShapeGeometry::Polygon {
                points: vec![
                    Point::new(0.0, 0.0),
                    Point::new(10.0, 0.0),
                    Point::new(0.0, 10.0),
                ],
            },
        );
        let f = fixture(z2_store(), vec![shape]);
        let cancel = AtomicBool::new(true);
        let err = f
            .aggregator
            .stats_for_shapes_restricted(&[ShapeId(1)], &StatsRestriction::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, RoiError::Cancelled));
        assert_eq!(f.pixels.open_handles(), 0);
    }
}
