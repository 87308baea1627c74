//! Shape registry: a static table mapping each variant tag to its
//! constructor, deserializer and randomizer.
//!
//! Shapes arriving from storage or the wire carry a tag (`"rectangle"`,
//! `"mask"`, ...). [`ShapeRegistry`] resolves the tag once and dispatches
//! through the entry's function pointers, so there is no central
//! conditional over tags and no runtime type discovery.
//!
//! The randomizers back [`ShapeRegistry::random`], which synthesizes
//! fixtures for tests and load generation. Every random shape fits inside
//! the `[0, RANDOM_EXTENT)` square.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::shape::{Mask, Shape, ShapeGeometry, ShapeKind};
use crate::types::{Point, RoiError, RoiId, ShapeId};

/// Side of the square random shapes are confined to.
pub const RANDOM_EXTENT: f64 = 512.0;

/// Random shapes pin Z/T to values in `[0, RANDOM_PLANES)`.
pub const RANDOM_PLANES: u32 = 4;

/// Largest count accepted by [`ShapeRegistry::random`].
pub const MAX_RANDOM_COUNT: usize = 100_000;

/// Largest extent of a single random shape along either axis.
const RANDOM_SPAN: u32 = 32;

/// One registry entry.
pub struct ShapeVariant {
    kind: ShapeKind,
    construct: fn() -> ShapeGeometry,
    deserialize: fn(Value) -> Result<ShapeGeometry, serde_json::Error>,
    randomize: fn(&mut StdRng) -> ShapeGeometry,
}

impl ShapeVariant {
    /// The kind this entry builds.
    #[must_use]
    pub const fn kind(&self) -> ShapeKind {
        self.kind
    }

    /// The wire tag of this entry.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    /// A blank geometry of this kind (zero extents, no vertices).
    #[must_use]
    pub fn construct(&self) -> ShapeGeometry {
        (self.construct)()
    }

    /// Parse a JSON payload as this kind.
    ///
    /// The payload may omit the `type` field; if present it must match.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidShape`] if the payload does not describe
    /// a valid geometry of this kind.
    pub fn deserialize(&self, payload: Value) -> Result<ShapeGeometry, RoiError> {
        let invalid = |reason: String| RoiError::InvalidShape {
            tag: self.tag().to_owned(),
            reason,
        };
        if let Some(declared) = payload.get("type").and_then(Value::as_str)
            && declared != self.tag()
        {
            return Err(invalid(format!("payload declares type {declared:?}")));
        }
        let geometry = (self.deserialize)(payload).map_err(|e| invalid(e.to_string()))?;
        if let ShapeGeometry::Mask(mask) = &geometry {
            let expected = Mask::packed_len(mask.width, mask.height);
            if mask.bits.len() != expected {
                return Err(invalid(format!(
                    "expected {expected} bitmap bytes, got {}",
                    mask.bits.len()
                )));
            }
        }
        Ok(geometry)
    }

    /// A pseudo-random geometry of this kind, reproducible from `seed`.
    #[must_use]
    pub fn randomize(&self, seed: u64) -> ShapeGeometry {
        (self.randomize)(&mut StdRng::seed_from_u64(seed))
    }
}

/// Insert the kind tag and deserialize through the tagged representation.
fn deserialize_as(kind: ShapeKind, mut payload: Value) -> Result<ShapeGeometry, serde_json::Error> {
    if let Value::Object(map) = &mut payload {
        map.insert("type".to_owned(), Value::from(kind.tag()));
    }
    serde_json::from_value(payload)
}

static VARIANTS: [ShapeVariant; 8] = [
    ShapeVariant {
        kind: ShapeKind::Point,
        construct: || ShapeGeometry::Point { x: 0.0, y: 0.0 },
        deserialize: |v| deserialize_as(ShapeKind::Point, v),
        randomize: random_point,
    },
    ShapeVariant {
        kind: ShapeKind::Line,
        construct: || ShapeGeometry::Line {
            x1: 0.0,
            y1: 0.0,
            x2: 0.0,
            y2: 0.0,
        },
        deserialize: |v| deserialize_as(ShapeKind::Line, v),
        randomize: random_line,
    },
    ShapeVariant {
        kind: ShapeKind::Rectangle,
        construct: || ShapeGeometry::Rectangle {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        },
        deserialize: |v| deserialize_as(ShapeKind::Rectangle, v),
        randomize: random_rectangle,
    },
    ShapeVariant {
        kind: ShapeKind::Ellipse,
        construct: || ShapeGeometry::Ellipse {
            x: 0.0,
            y: 0.0,
            radius_x: 0.0,
            radius_y: 0.0,
        },
        deserialize: |v| deserialize_as(ShapeKind::Ellipse, v),
        randomize: random_ellipse,
    },
    ShapeVariant {
        kind: ShapeKind::Polygon,
        construct: || ShapeGeometry::Polygon { points: Vec::new() },
        deserialize: |v| deserialize_as(ShapeKind::Polygon, v),
        randomize: |rng| ShapeGeometry::Polygon {
            points: random_star(rng),
        },
    },
    ShapeVariant {
        kind: ShapeKind::Polyline,
        construct: || ShapeGeometry::Polyline { points: Vec::new() },
        deserialize: |v| deserialize_as(ShapeKind::Polyline, v),
        randomize: random_polyline,
    },
    ShapeVariant {
        kind: ShapeKind::Path,
        construct: || ShapeGeometry::Path { points: Vec::new() },
        deserialize: |v| deserialize_as(ShapeKind::Path, v),
        randomize: |rng| ShapeGeometry::Path {
            points: random_star(rng),
        },
    },
    ShapeVariant {
        kind: ShapeKind::Mask,
        construct: || {
            ShapeGeometry::Mask(Mask {
                x: 0.0,
                y: 0.0,
                width: 0,
                height: 0,
                bits: Vec::new(),
            })
        },
        deserialize: |v| deserialize_as(ShapeKind::Mask, v),
        randomize: random_mask,
    },
];

/// Facade over the static variant table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeRegistry;

impl ShapeRegistry {
    /// Every registered variant, in [`ShapeKind::ALL`] order.
    #[must_use]
    pub fn variants() -> &'static [ShapeVariant] {
        &VARIANTS
    }

    /// Resolve a tag to its registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::UnknownShapeVariant`] for an unregistered tag.
    pub fn lookup(tag: &str) -> Result<&'static ShapeVariant, RoiError> {
        VARIANTS
            .iter()
            .find(|v| v.tag() == tag)
            .ok_or_else(|| RoiError::UnknownShapeVariant(tag.to_owned()))
    }

    /// A blank geometry for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::UnknownShapeVariant`] for an unregistered tag.
    pub fn construct(tag: &str) -> Result<ShapeGeometry, RoiError> {
        Ok(Self::lookup(tag)?.construct())
    }

    /// Parse a JSON payload stored under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::UnknownShapeVariant`] for an unregistered tag,
    /// [`RoiError::InvalidShape`] for a malformed payload.
    pub fn deserialize(tag: &str, payload: Value) -> Result<ShapeGeometry, RoiError> {
        Self::lookup(tag)?.deserialize(payload)
    }

    /// A reproducible random geometry for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::UnknownShapeVariant`] for an unregistered tag.
    pub fn randomize(tag: &str, seed: u64) -> Result<ShapeGeometry, RoiError> {
        Ok(Self::lookup(tag)?.randomize(seed))
    }

    /// Generate `count` random shapes covering every variant round-robin.
    ///
    /// Shape ids run `1..=count`; each shape gets its own roi with the same
    /// numeric id. Z and T are each pinned with probability one half.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::CountOutOfBounds`] unless
    /// `1 <= count <= MAX_RANDOM_COUNT`.
    pub fn random(count: usize, seed: u64) -> Result<Vec<Shape>, RoiError> {
        if !(1..=MAX_RANDOM_COUNT).contains(&count) {
            return Err(RoiError::CountOutOfBounds {
                count,
                max: MAX_RANDOM_COUNT,
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let shapes = (1..=count as u64)
            .zip(VARIANTS.iter().cycle())
            .map(|(id, variant)| {
                let mut shape = Shape::new(ShapeId(id), RoiId(id), (variant.randomize)(&mut rng));
                if rng.gen_bool(0.5) {
                    shape.z = Some(rng.gen_range(0..RANDOM_PLANES));
                }
                if rng.gen_bool(0.5) {
                    shape.t = Some(rng.gen_range(0..RANDOM_PLANES));
                }
                shape.visible = Some(rng.gen_bool(0.9));
                shape.locked = Some(rng.gen_bool(0.1));
                shape
            })
            .collect();
        Ok(shapes)
    }
}

// ---------------------------------------------------------------------------
// Randomizers
// ---------------------------------------------------------------------------

/// Integer-valued coordinate in `[lo, hi)`.
fn coord(rng: &mut StdRng, lo: u32, hi: u32) -> f64 {
    f64::from(rng.gen_range(lo..hi))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const EXTENT: u32 = RANDOM_EXTENT as u32;

fn random_point(rng: &mut StdRng) -> ShapeGeometry {
    ShapeGeometry::Point {
        x: coord(rng, 0, EXTENT),
        y: coord(rng, 0, EXTENT),
    }
}

fn random_line(rng: &mut StdRng) -> ShapeGeometry {
    let x1 = coord(rng, 0, EXTENT - RANDOM_SPAN);
    let y1 = coord(rng, 0, EXTENT - RANDOM_SPAN);
    ShapeGeometry::Line {
        x1,
        y1,
        x2: x1 + coord(rng, 0, RANDOM_SPAN),
        y2: y1 + coord(rng, 0, RANDOM_SPAN),
    }
}

fn random_rectangle(rng: &mut StdRng) -> ShapeGeometry {
    ShapeGeometry::Rectangle {
        x: coord(rng, 0, EXTENT - RANDOM_SPAN),
        y: coord(rng, 0, EXTENT - RANDOM_SPAN),
        width: coord(rng, 1, RANDOM_SPAN + 1),
        height: coord(rng, 1, RANDOM_SPAN + 1),
    }
}

fn random_ellipse(rng: &mut StdRng) -> ShapeGeometry {
    ShapeGeometry::Ellipse {
        x: coord(rng, RANDOM_SPAN, EXTENT - RANDOM_SPAN),
        y: coord(rng, RANDOM_SPAN, EXTENT - RANDOM_SPAN),
        radius_x: coord(rng, 1, RANDOM_SPAN),
        radius_y: coord(rng, 1, RANDOM_SPAN),
    }
}

/// Star-shaped vertex ring: vertices at increasing angles around a center,
/// so the ring never self-intersects.
fn random_star(rng: &mut StdRng) -> Vec<Point> {
    let cx = coord(rng, RANDOM_SPAN, EXTENT - RANDOM_SPAN);
    let cy = coord(rng, RANDOM_SPAN, EXTENT - RANDOM_SPAN);
    let n = rng.gen_range(3..=8u32);
    (0..n)
        .map(|k| {
            let angle = std::f64::consts::TAU * f64::from(k) / f64::from(n);
            let radius = coord(rng, 2, RANDOM_SPAN);
            Point::new(
                radius.mul_add(angle.cos(), cx).round(),
                radius.mul_add(angle.sin(), cy).round(),
            )
        })
        .collect()
}

fn random_polyline(rng: &mut StdRng) -> ShapeGeometry {
    let ox = coord(rng, 0, EXTENT - RANDOM_SPAN);
    let oy = coord(rng, 0, EXTENT - RANDOM_SPAN);
    let n = rng.gen_range(2..=6u32);
    ShapeGeometry::Polyline {
        points: (0..n)
            .map(|_| {
                Point::new(
                    ox + coord(rng, 0, RANDOM_SPAN),
                    oy + coord(rng, 0, RANDOM_SPAN),
                )
            })
            .collect(),
    }
}

fn random_mask(rng: &mut StdRng) -> ShapeGeometry {
    let width = rng.gen_range(1..=RANDOM_SPAN);
    let height = rng.gen_range(1..=RANDOM_SPAN);
    let bits = (0..Mask::packed_len(width, height))
        .map(|_| rng.r#gen::<u8>())
        .collect();
    ShapeGeometry::Mask(Mask {
        x: coord(rng, 0, EXTENT - RANDOM_SPAN),
        y: coord(rng, 0, EXTENT - RANDOM_SPAN),
        width,
        height,
        bits,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::GridPoint;

    #[test]
    fn every_kind_is_registered_once() {
        let kinds: Vec<ShapeKind> = ShapeRegistry::variants().iter().map(ShapeVariant::kind).collect();
        assert_eq!(kinds, ShapeKind::ALL.to_vec());
    }

    #[test]
    fn construct_returns_requested_kind() {
        for kind in ShapeKind::ALL {
            assert_eq!(ShapeRegistry::construct(kind.tag()).unwrap().kind(), kind);
        }
    }

    #[test]
    fn unknown_tag_is_rejected_everywhere() {
        assert!(matches!(
            ShapeRegistry::construct("label"),
            Err(RoiError::UnknownShapeVariant(_))
        ));
        assert!(matches!(
            ShapeRegistry::randomize("label", 1),
            Err(RoiError::UnknownShapeVariant(_))
        ));
        assert!(matches!(
            ShapeRegistry::deserialize("label", serde_json::json!({})),
            Err(RoiError::UnknownShapeVariant(_))
        ));
    }

    #[test]
    fn deserialize_without_type_field() {
        let geom = ShapeRegistry::deserialize(
            "rectangle",
            serde_json::json!({ "x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0 }),
        )
        .unwrap();
        assert_eq!(
            geom,
            ShapeGeometry::Rectangle {
                x: 1.0,
                y: 2.0,
                width: 3.0,
                height: 4.0
            }
        );
    }

    #[test]
    fn deserialize_rejects_mismatched_type() {
        let result = ShapeRegistry::deserialize(
            "ellipse",
            serde_json::json!({ "type": "rectangle", "x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0 }),
        );
        assert!(matches!(result, Err(RoiError::InvalidShape { tag, .. }) if tag == "ellipse"));
    }

    #[test]
    fn deserialize_rejects_missing_fields() {
        let result = ShapeRegistry::deserialize("line", serde_json::json!({ "x1": 0.0 }));
        assert!(matches!(result, Err(RoiError::InvalidShape { .. })));
    }

    #[test]
    fn deserialize_rejects_short_mask_bitmap() {
        let result = ShapeRegistry::deserialize(
            "mask",
            serde_json::json!({ "x": 0.0, "y": 0.0, "width": 4, "height": 4, "bits": [255] }),
        );
        assert!(matches!(result, Err(RoiError::InvalidShape { .. })));
    }

    #[test]
    fn randomize_is_reproducible() {
        for variant in ShapeRegistry::variants() {
            assert_eq!(variant.randomize(17), variant.randomize(17));
        }
    }

    #[test]
    fn random_count_bounds() {
        assert!(matches!(
            ShapeRegistry::random(0, 1),
            Err(RoiError::CountOutOfBounds { count: 0, .. })
        ));
        assert!(matches!(
            ShapeRegistry::random(MAX_RANDOM_COUNT + 1, 1),
            Err(RoiError::CountOutOfBounds { count: 100_001, .. })
        ));
    }

    #[test]
    fn random_five_shapes_are_instantiable() {
        let shapes = ShapeRegistry::random(5, 7).unwrap();
        assert_eq!(shapes.len(), 5);
        for (i, shape) in shapes.iter().enumerate() {
            assert_eq!(shape.id, ShapeId(i as u64 + 1));
            // Round-trip through the registry by tag.
            let payload = serde_json::to_value(&shape.geometry).unwrap();
            let parsed = ShapeRegistry::deserialize(shape.kind().tag(), payload).unwrap();
            assert_eq!(parsed, shape.geometry);
        }
    }

    #[test]
    fn random_shapes_cover_every_variant_and_fit_extent() {
        let shapes = ShapeRegistry::random(64, 99).unwrap();
        for kind in ShapeKind::ALL {
            assert!(shapes.iter().any(|s| s.kind() == kind), "missing {kind:?}");
        }
        let limit = GridPoint::new(512, 512);
        for shape in &shapes {
            for p in shape.area_points() {
                assert!(
                    p.x >= 0 && p.y >= 0 && p.x < limit.x && p.y < limit.y,
                    "{:?} covers {p:?}",
                    shape.kind()
                );
            }
            if let Some(z) = shape.z {
                assert!(z < RANDOM_PLANES);
            }
        }
    }
}
