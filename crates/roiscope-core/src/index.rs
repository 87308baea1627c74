//! Geometry index: normalized vertex-path keys, the records that carry
//! them, and an R-tree backed store answering overlap queries.
//!
//! A key is derived from a shape's boundary points by quantizing every
//! vertex to `1 / coordinate_precision`, dropping consecutive duplicates
//! and closing the ring. The canonical text of the key is hashed with
//! SipHash-1-3 so a store can recognise an unchanged key without
//! comparing vertex lists.
//!
//! Overlap is tested in two steps: the R-tree yields candidates whose
//! envelope intersects the query envelope, then `geo::Intersects` decides
//! exact overlap between the two key geometries.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::hash::Hasher;
use std::sync::{PoisonError, RwLock};

use geo::{Area, Coord, Geometry, Intersects, Line, LineString, Polygon};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::config::CoreConfig;
use crate::shape::Shape;
use crate::types::{BoundingBox, PixelSetId, Point, RoiError, RoiId, ShapeId};

// ---------------------------------------------------------------------------
// IndexKey
// ---------------------------------------------------------------------------

/// Normalized, closed vertex path in quantized integer units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    precision: u32,
    vertices: Vec<(i64, i64)>,
}

impl IndexKey {
    /// Build a key from an ordered outline.
    ///
    /// Rings with at least two distinct vertices are closed by repeating
    /// the first vertex.
    #[must_use]
    pub fn from_boundary(points: &[Point], precision: u32) -> Self {
        let precision = precision.max(1);
        let scale = f64::from(precision);
        let mut vertices: Vec<(i64, i64)> = Vec::with_capacity(points.len() + 1);
        for p in points {
            let q = (quantize(p.x, scale), quantize(p.y, scale));
            if vertices.last() != Some(&q) {
                vertices.push(q);
            }
        }
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() > 1 {
            vertices.push(vertices[0]);
        }
        Self {
            precision,
            vertices,
        }
    }

    /// Build a key from a shape's outline using the configured ellipse
    /// resolution and precision.
    #[must_use]
    pub fn for_shape(shape: &Shape, config: &CoreConfig) -> Self {
        Self::from_boundary(
            &shape.geometry.boundary_points_with(config.ellipse_vertices),
            config.coordinate_precision,
        )
    }

    /// Quantized vertices, ring closed.
    #[must_use]
    pub fn vertices(&self) -> &[(i64, i64)] {
        &self.vertices
    }

    /// Whether the outline had no vertices at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Canonical text form: `precision;x,y;x,y;...` in quantized units.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = self.precision.to_string();
        for (x, y) in &self.vertices {
            // Writing to a String cannot fail.
            let _ = write!(out, ";{x},{y}");
        }
        out
    }

    /// SipHash-1-3 digest of [`canonical`](Self::canonical).
    #[must_use]
    pub fn digest(&self) -> u64 {
        let mut hasher = SipHasher13::new();
        hasher.write(self.canonical().as_bytes());
        hasher.finish()
    }

    fn coords(&self) -> Vec<Coord<f64>> {
        let scale = f64::from(self.precision);
        self.vertices
            .iter()
            .map(|&(x, y)| Coord {
                x: dequantize(x, scale),
                y: dequantize(y, scale),
            })
            .collect()
    }

    /// Overlap geometry: a point for one vertex, a line for two, a polygon
    /// for a ring with area, a line string for a collapsed ring.
    #[must_use]
    pub fn geometry(&self) -> Option<Geometry<f64>> {
        let coords = self.coords();
        match coords.as_slice() {
            [] => None,
            [only] => Some(Geometry::Point((*only).into())),
            [a, b, _] => Some(Geometry::Line(Line::new(*a, *b))),
            _ => {
                let polygon = Polygon::new(LineString::new(coords.clone()), Vec::new());
                if polygon.unsigned_area() > 0.0 {
                    Some(Geometry::Polygon(polygon))
                } else {
                    Some(Geometry::LineString(LineString::new(coords)))
                }
            }
        }
    }

    /// Float extents of the key.
    #[must_use]
    pub fn envelope(&self) -> Option<BoundingBox> {
        let points: Vec<Point> = self
            .coords()
            .into_iter()
            .map(|c| Point::new(c.x, c.y))
            .collect();
        BoundingBox::of_points(&points)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn quantize(value: f64, scale: f64) -> i64 {
    (value * scale).round() as i64
}

#[allow(clippy::cast_precision_loss)]
fn dequantize(value: i64, scale: f64) -> f64 {
    value as f64 / scale
}

// ---------------------------------------------------------------------------
// Records and queries
// ---------------------------------------------------------------------------

/// Derived index row for one shape: the key plus the shape attributes
/// overlap predicates filter on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Shape the record was derived from.
    pub shape: ShapeId,
    /// Owning roi.
    pub roi: RoiId,
    /// Pixel set of the owning roi.
    pub pixel_set: PixelSetId,
    /// Pinned Z-section.
    pub z: Option<u32>,
    /// Pinned timepoint.
    pub t: Option<u32>,
    /// Visibility flag.
    pub visible: Option<bool>,
    /// Lock flag.
    pub locked: Option<bool>,
    /// Normalized outline.
    pub key: IndexKey,
    /// Digest of the key.
    pub digest: u64,
}

impl IndexRecord {
    /// Derive the record for `shape`, which belongs to a roi on `pixel_set`.
    #[must_use]
    pub fn derive(shape: &Shape, pixel_set: PixelSetId, config: &CoreConfig) -> Self {
        let key = IndexKey::for_shape(shape, config);
        Self {
            shape: shape.id,
            roi: shape.roi,
            pixel_set,
            z: shape.z,
            t: shape.t,
            visible: shape.visible,
            locked: shape.locked,
            digest: key.digest(),
            key,
        }
    }
}

/// One query region plus its attribute pins.
///
/// A pin of `None` places no restriction. A pinned attribute matches
/// candidates that carry the same value or leave the attribute unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapQuery {
    /// Required Z-section.
    pub z: Option<u32>,
    /// Required timepoint.
    pub t: Option<u32>,
    /// Required visibility.
    pub visible: Option<bool>,
    /// Required lock flag.
    pub locked: Option<bool>,
    /// Query outline.
    pub key: IndexKey,
}

impl OverlapQuery {
    /// Query with the outline and pins of `shape`.
    #[must_use]
    pub fn for_shape(shape: &Shape, config: &CoreConfig) -> Self {
        Self {
            z: shape.z,
            t: shape.t,
            visible: shape.visible,
            locked: shape.locked,
            key: IndexKey::for_shape(shape, config),
        }
    }

    /// Whether `record` satisfies every pin. Geometry is not consulted.
    #[must_use]
    pub fn pins_match(&self, record: &IndexRecord) -> bool {
        pin_matches(self.z, record.z)
            && pin_matches(self.t, record.t)
            && pin_matches(self.visible, record.visible)
            && pin_matches(self.locked, record.locked)
    }
}

fn pin_matches<T: PartialEq>(pin: Option<T>, candidate: Option<T>) -> bool {
    match (pin, candidate) {
        (Some(want), Some(have)) => want == have,
        _ => true,
    }
}

/// Result of writing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The stored record changed.
    Written,
    /// An identical record was already stored.
    Unchanged,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A spatial-capable store of index records.
///
/// A write for one shape must be atomic with respect to readers: a query
/// never observes a record mixing two versions of a shape.
pub trait GeometryIndexStore: Send + Sync {
    /// Insert or replace the record for `record.shape`.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::IndexWriteFailed`] if the store rejects the write.
    fn put(&self, record: IndexRecord) -> Result<SyncOutcome, RoiError>;

    /// The stored record for a shape.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::IndexReadFailed`] if the store cannot be read.
    fn get(&self, shape: ShapeId) -> Result<Option<IndexRecord>, RoiError>;

    /// Drop the record for a shape, returning it if present.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::IndexWriteFailed`] if the store rejects the write.
    fn remove(&self, shape: ShapeId) -> Result<Option<IndexRecord>, RoiError>;

    /// Distinct rois on `pixel_set` with at least one record matching any
    /// of `queries`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::IndexReadFailed`] if the store cannot be read.
    fn find_overlapping(
        &self,
        pixel_set: PixelSetId,
        queries: &[OverlapQuery],
    ) -> Result<BTreeSet<RoiId>, RoiError>;
}

type Envelope = GeomWithData<Rectangle<[f64; 2]>, ShapeId>;

fn envelope_entry(bounds: BoundingBox, shape: ShapeId) -> Envelope {
    GeomWithData::new(
        Rectangle::from_corners([bounds.min_x, bounds.min_y], [bounds.max_x, bounds.max_y]),
        shape,
    )
}

#[derive(Debug)]
struct Entry {
    record: IndexRecord,
    geometry: Option<Geometry<f64>>,
    envelope: Option<Envelope>,
}

#[derive(Debug, Default)]
struct Tables {
    tree: RTree<Envelope>,
    entries: HashMap<ShapeId, Entry>,
}

impl Tables {
    fn take(&mut self, shape: ShapeId) -> Option<Entry> {
        let entry = self.entries.remove(&shape)?;
        if let Some(envelope) = &entry.envelope {
            self.tree.remove(envelope);
        }
        Some(entry)
    }
}

/// In-process store: an R*-tree of key envelopes and a record table,
/// both behind one read/write lock.
#[derive(Debug, Default)]
pub struct RTreeIndexStore {
    tables: RwLock<Tables>,
}

impl RTreeIndexStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GeometryIndexStore for RTreeIndexStore {
    fn put(&self, record: IndexRecord) -> Result<SyncOutcome, RoiError> {
        let geometry = record.key.geometry();
        let envelope = record.key.envelope().map(|b| envelope_entry(b, record.shape));

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = tables.entries.get(&record.shape)
            && existing.record.digest == record.digest
            && existing.record == record
        {
            return Ok(SyncOutcome::Unchanged);
        }
        tables.take(record.shape);
        if let Some(envelope) = &envelope {
            tables.tree.insert(envelope.clone());
        }
        tables.entries.insert(
            record.shape,
            Entry {
                record,
                geometry,
                envelope,
            },
        );
        Ok(SyncOutcome::Written)
    }

    fn get(&self, shape: ShapeId) -> Result<Option<IndexRecord>, RoiError> {
        Ok(self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(&shape)
            .map(|e| e.record.clone()))
    }

    fn remove(&self, shape: ShapeId) -> Result<Option<IndexRecord>, RoiError> {
        Ok(self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take(shape)
            .map(|e| e.record))
    }

    fn find_overlapping(
        &self,
        pixel_set: PixelSetId,
        queries: &[OverlapQuery],
    ) -> Result<BTreeSet<RoiId>, RoiError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut rois = BTreeSet::new();
        for query in queries {
            let (Some(query_geometry), Some(bounds)) = (query.key.geometry(), query.key.envelope())
            else {
                continue;
            };
            let search = AABB::from_corners([bounds.min_x, bounds.min_y], [bounds.max_x, bounds.max_y]);
            for candidate in tables.tree.locate_in_envelope_intersecting(&search) {
                let Some(entry) = tables.entries.get(&candidate.data) else {
                    continue;
                };
                if rois.contains(&entry.record.roi)
                    || entry.record.pixel_set != pixel_set
                    || !query.pins_match(&entry.record)
                {
                    continue;
                }
                if entry
                    .geometry
                    .as_ref()
                    .is_some_and(|g| g.intersects(&query_geometry))
                {
                    rois.insert(entry.record.roi);
                }
            }
        }
        Ok(rois)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shape::ShapeGeometry;

    fn rect(x: f64, y: f64, w: f64, h: f64) -> ShapeGeometry {
        ShapeGeometry::Rectangle {
            x,
            y,
            width: w,
            height: h,
        }
    }

    fn record(id: u64, roi: u64, geometry: ShapeGeometry) -> IndexRecord {
        IndexRecord::derive(
            &Shape::new(ShapeId(id), RoiId(roi), geometry),
            PixelSetId(1),
            &CoreConfig::default(),
        )
    }

    fn query(geometry: ShapeGeometry) -> OverlapQuery {
        OverlapQuery::for_shape(
            &Shape::new(ShapeId(0), RoiId(0), geometry),
            &CoreConfig::default(),
        )
    }

    // --- IndexKey tests ---

    #[test]
    fn key_closes_ring_and_drops_duplicates() {
        let key = IndexKey::from_boundary(
            &[
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(1.0, 1.0),
            ],
            10,
        );
        assert_eq!(key.vertices(), &[(0, 0), (10, 0), (10, 10), (0, 0)]);
    }

    #[test]
    fn key_quantizes_to_precision() {
        let a = IndexKey::from_boundary(&[Point::new(0.10004, 0.0), Point::new(2.0, 2.0)], 1000);
        let b = IndexKey::from_boundary(&[Point::new(0.1, 0.0), Point::new(2.0, 2.0)], 1000);
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.canonical(), "1000;100,0;2000,2000;100,0");
    }

    #[test]
    fn key_geometry_by_vertex_count() {
        let single = IndexKey::from_boundary(&[Point::new(3.0, 4.0)], 1000);
        assert!(matches!(single.geometry(), Some(Geometry::Point(_))));

        let line = IndexKey::from_boundary(&[Point::new(0.0, 0.0), Point::new(5.0, 0.0)], 1000);
        assert!(matches!(line.geometry(), Some(Geometry::Line(_))));

        let square = IndexKey::for_shape(
            &Shape::new(ShapeId(1), RoiId(1), rect(0.0, 0.0, 2.0, 2.0)),
            &CoreConfig::default(),
        );
        assert!(matches!(square.geometry(), Some(Geometry::Polygon(_))));

        let collinear = IndexKey::from_boundary(
            &[
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(2.0, 0.0),
            ],
            1000,
        );
        assert!(matches!(collinear.geometry(), Some(Geometry::LineString(_))));

        assert!(IndexKey::from_boundary(&[], 1000).geometry().is_none());
    }

    #[test]
    fn key_is_reproducible_byte_for_byte() {
        let shape = Shape::new(
            ShapeId(1),
            RoiId(1),
            ShapeGeometry::Ellipse {
                x: 10.3,
                y: 7.1,
                radius_x: 4.0,
                radius_y: 2.5,
            },
        );
        let config = CoreConfig::default();
        assert_eq!(
            IndexKey::for_shape(&shape, &config).canonical(),
            IndexKey::for_shape(&shape, &config).canonical()
        );
    }

    // --- OverlapQuery tests ---

    #[test]
    fn unset_pins_match_anything() {
        let q = query(rect(0.0, 0.0, 1.0, 1.0));
        let mut r = record(1, 1, rect(0.0, 0.0, 1.0, 1.0));
        r.z = Some(3);
        r.locked = Some(true);
        assert!(q.pins_match(&r));
    }

    #[test]
    fn pinned_query_excludes_other_pinned_values_only() {
        let mut q = query(rect(0.0, 0.0, 1.0, 1.0));
        q.z = Some(5);
        let mut pinned = record(1, 1, rect(0.0, 0.0, 1.0, 1.0));
        pinned.z = Some(0);
        let unpinned = record(2, 1, rect(0.0, 0.0, 1.0, 1.0));
        assert!(!q.pins_match(&pinned));
        assert!(q.pins_match(&unpinned));
    }

    // --- RTreeIndexStore tests ---

    #[test]
    fn identical_put_is_unchanged() {
        let store = RTreeIndexStore::new();
        let r = record(1, 1, rect(0.0, 0.0, 4.0, 4.0));
        assert_eq!(store.put(r.clone()).unwrap(), SyncOutcome::Written);
        assert_eq!(store.put(r.clone()).unwrap(), SyncOutcome::Unchanged);
        assert_eq!(store.get(ShapeId(1)).unwrap(), Some(r));
    }

    #[test]
    fn attribute_change_rewrites_record() {
        let store = RTreeIndexStore::new();
        let mut r = record(1, 1, rect(0.0, 0.0, 4.0, 4.0));
        store.put(r.clone()).unwrap();
        r.z = Some(2);
        assert_eq!(store.put(r).unwrap(), SyncOutcome::Written);
        assert_eq!(store.get(ShapeId(1)).unwrap().unwrap().z, Some(2));
    }

    #[test]
    fn replaced_geometry_moves_envelope() {
        let store = RTreeIndexStore::new();
        store.put(record(1, 1, rect(0.0, 0.0, 4.0, 4.0))).unwrap();
        store.put(record(1, 1, rect(100.0, 100.0, 4.0, 4.0))).unwrap();
        assert_eq!(store.len(), 1);
        let old_area = store
            .find_overlapping(PixelSetId(1), &[query(rect(1.0, 1.0, 1.0, 1.0))])
            .unwrap();
        assert!(old_area.is_empty());
        let new_area = store
            .find_overlapping(PixelSetId(1), &[query(rect(101.0, 101.0, 1.0, 1.0))])
            .unwrap();
        assert_eq!(new_area, BTreeSet::from([RoiId(1)]));
    }

    #[test]
    fn overlap_requires_exact_intersection() {
        let store = RTreeIndexStore::new();
        // Triangle occupying the lower-left half of a 10x10 box.
        store
            .put(record(
                1,
                1,
                ShapeGeometry::Polygon {
                    points: vec![
                        Point::new(0.0, 0.0),
                        Point::new(0.0, 10.0),
                        Point::new(10.0, 10.0),
                    ],
                },
            ))
            .unwrap();
        // Envelopes overlap, geometries do not.
        let miss = store
            .find_overlapping(PixelSetId(1), &[query(rect(7.0, 1.0, 2.0, 2.0))])
            .unwrap();
        assert!(miss.is_empty());
        let hit = store
            .find_overlapping(PixelSetId(1), &[query(rect(1.0, 7.0, 2.0, 2.0))])
            .unwrap();
        assert_eq!(hit, BTreeSet::from([RoiId(1)]));
    }

    #[test]
    fn queries_are_or_combined_and_scoped() {
        let store = RTreeIndexStore::new();
        store.put(record(1, 3, rect(0.0, 0.0, 2.0, 2.0))).unwrap();
        store.put(record(2, 1, rect(50.0, 50.0, 2.0, 2.0))).unwrap();
        let mut elsewhere = record(3, 2, rect(0.0, 0.0, 2.0, 2.0));
        elsewhere.pixel_set = PixelSetId(9);
        store.put(elsewhere).unwrap();

        let rois = store
            .find_overlapping(
                PixelSetId(1),
                &[query(rect(1.0, 1.0, 1.0, 1.0)), query(rect(51.0, 51.0, 1.0, 1.0))],
            )
            .unwrap();
        assert_eq!(rois.into_iter().collect::<Vec<_>>(), vec![RoiId(1), RoiId(3)]);
    }

    #[test]
    fn remove_drops_record_and_envelope() {
        let store = RTreeIndexStore::new();
        store.put(record(1, 1, rect(0.0, 0.0, 4.0, 4.0))).unwrap();
        assert!(store.remove(ShapeId(1)).unwrap().is_some());
        assert!(store.is_empty());
        assert!(store
            .find_overlapping(PixelSetId(1), &[query(rect(0.0, 0.0, 4.0, 4.0))])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn empty_outline_never_matches() {
        let store = RTreeIndexStore::new();
        store
            .put(record(1, 1, ShapeGeometry::Polygon { points: vec![] }))
            .unwrap();
        assert!(store
            .find_overlapping(PixelSetId(1), &[query(rect(-1e6, -1e6, 2e6, 2e6))])
            .unwrap()
            .is_empty());
    }
}
