//! Area-point enumeration: the integer pixel coordinates a shape covers.
//!
//! Pixel `(col, row)` is treated as the sample at the integer position
//! `(col, row)`. Each variant has its own rule:
//!
//! | Variant   | Covered pixels                                              |
//! |-----------|-------------------------------------------------------------|
//! | Point     | `(floor(x), floor(y))`                                      |
//! | Line      | Bresenham walk between the floored endpoints                |
//! | Rectangle | `ceil(x) <= col < ceil(x + w)`, same for rows               |
//! | Ellipse   | per-row span of integer columns inside or on the ellipse    |
//! | Polygon   | positions inside or on the polygon (`geo::Intersects`)      |
//! | Polyline  | union of Bresenham walks along every segment, deduplicated  |
//! | Path      | even-odd scanline fill, spans `ceil(xa) <= col < ceil(xb)`  |
//! | Mask      | set bits, offset by the floored mask origin                 |
//!
//! Enumeration is lazy except for polylines (which must deduplicate
//! segment joints), restartable, and depends only on the geometry.

use std::collections::BTreeSet;

use geo::Intersects;
use imageproc::drawing::BresenhamLineIter;

use crate::shape::{Mask, ShapeGeometry};
use crate::types::{GridPoint, Point};

/// Lazy sequence of covered pixel coordinates.
pub type AreaPoints<'a> = Box<dyn Iterator<Item = GridPoint> + Send + 'a>;

/// Enumerate the pixels covered by `geometry`.
#[must_use]
pub fn area_points(geometry: &ShapeGeometry) -> AreaPoints<'_> {
    match geometry {
        ShapeGeometry::Point { x, y } => {
            Box::new(std::iter::once(GridPoint::new(floor(*x), floor(*y))))
        }
        ShapeGeometry::Line { x1, y1, x2, y2 } => Box::new(bresenham(
            Point::new(*x1, *y1),
            Point::new(*x2, *y2),
        )),
        ShapeGeometry::Rectangle {
            x,
            y,
            width,
            height,
        } => Box::new(rectangle_points(*x, *y, *width, *height)),
        ShapeGeometry::Ellipse {
            x,
            y,
            radius_x,
            radius_y,
        } => Box::new(ellipse_points(*x, *y, radius_x.abs(), radius_y.abs())),
        ShapeGeometry::Polygon { points } => polygon_points(points),
        ShapeGeometry::Polyline { points } => Box::new(polyline_points(points).into_iter()),
        ShapeGeometry::Path { points } => Box::new(even_odd_points(points)),
        ShapeGeometry::Mask(mask) => Box::new(mask_points(mask)),
    }
}

/// Largest magnitude a rasterized coordinate may take. Beyond it every
/// pixel lies outside any pixel set, and spans up to twice this wide
/// still fit in `i64`.
const COORD_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Floor to the containing integer column/row, clamped to
/// [`COORD_LIMIT`]. NaN becomes 0.
#[allow(clippy::cast_possible_truncation)]
fn floor(v: f64) -> i64 {
    v.floor().clamp(-COORD_LIMIT, COORD_LIMIT) as i64
}

/// Smallest integer not below `v`, clamped to [`COORD_LIMIT`].
#[allow(clippy::cast_possible_truncation)]
fn ceil(v: f64) -> i64 {
    v.ceil().clamp(-COORD_LIMIT, COORD_LIMIT) as i64
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(v: i64) -> f64 {
    v as f64
}

/// Endpoint magnitude for Bresenham walks, which step in `i32`.
const LINE_LIMIT: i64 = 1 << 30;

/// Bresenham walk between the floored endpoints, both inclusive.
#[allow(clippy::cast_precision_loss)]
fn bresenham(a: Point, b: Point) -> impl Iterator<Item = GridPoint> + Send {
    let grid = |v: f64| floor(v).clamp(-LINE_LIMIT, LINE_LIMIT) as f32;
    let start = (grid(a.x), grid(a.y));
    let end = (grid(b.x), grid(b.y));
    BresenhamLineIter::new(start, end).map(|(x, y)| GridPoint::new(i64::from(x), i64::from(y)))
}

fn rectangle_points(
    x: f64,
    y: f64,
    width: f64,
    height: f64,
) -> impl Iterator<Item = GridPoint> + Send {
    let (x0, x1) = (ceil(x), ceil(x + width));
    let (y0, y1) = (ceil(y), ceil(y + height));
    (y0..y1).flat_map(move |row| (x0..x1).map(move |col| GridPoint::new(col, row)))
}

fn ellipse_points(
    cx: f64,
    cy: f64,
    rx: f64,
    ry: f64,
) -> impl Iterator<Item = GridPoint> + Send {
    let rows = if rx > 0.0 && ry > 0.0 {
        ceil(cy - ry)..=floor(cy + ry)
    } else {
        1..=0
    };
    rows.flat_map(move |row| {
        let v = (as_f64(row) - cy) / ry;
        let span = (1.0 - v * v).max(0.0).sqrt() * rx;
        (ceil(cx - span)..=floor(cx + span)).map(move |col| GridPoint::new(col, row))
    })
}

fn polygon_points(points: &[Point]) -> AreaPoints<'_> {
    if points.len() < 3 {
        return Box::new(std::iter::empty());
    }
    let exterior: Vec<geo::Coord<f64>> = points.iter().copied().map(Into::into).collect();
    let polygon = geo::Polygon::new(geo::LineString::new(exterior), Vec::new());

    let (min_x, min_y, max_x, max_y) = extents(points);
    let (x0, x1) = (ceil(min_x), floor(max_x));
    let (y0, y1) = (ceil(min_y), floor(max_y));

    Box::new(
        (y0..=y1)
            .flat_map(move |row| (x0..=x1).map(move |col| GridPoint::new(col, row)))
            .filter(move |p| polygon.intersects(&geo::Point::new(as_f64(p.x), as_f64(p.y)))),
    )
}

fn polyline_points(points: &[Point]) -> Vec<GridPoint> {
    let mut covered = BTreeSet::new();
    match points {
        [] => {}
        [only] => {
            covered.insert(GridPoint::new(floor(only.x), floor(only.y)));
        }
        _ => {
            for pair in points.windows(2) {
                covered.extend(bresenham(pair[0], pair[1]));
            }
        }
    }
    covered.into_iter().collect()
}

fn even_odd_points(points: &[Point]) -> impl Iterator<Item = GridPoint> + Send + '_ {
    let rows = if points.len() < 3 {
        1..=0
    } else {
        let (_, min_y, _, max_y) = extents(points);
        ceil(min_y)..=floor(max_y)
    };
    rows.flat_map(move |row| scanline_spans(points, as_f64(row)))
}

/// Covered pixels of one scanline under the even-odd rule.
fn scanline_spans(points: &[Point], y: f64) -> Vec<GridPoint> {
    let n = points.len();
    let mut crossings: Vec<f64> = (0..n)
        .filter_map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            // Half-open in y so a vertex shared by two edges counts once.
            ((a.y <= y) != (b.y <= y)).then(|| {
                let f = (y - a.y) / (b.y - a.y);
                f.mul_add(b.x - a.x, a.x)
            })
        })
        .collect();
    crossings.sort_by(f64::total_cmp);

    #[allow(clippy::cast_possible_truncation)]
    let row = y as i64;
    crossings
        .chunks_exact(2)
        .flat_map(|span| (ceil(span[0])..ceil(span[1])).map(move |col| GridPoint::new(col, row)))
        .collect()
}

fn mask_points(mask: &Mask) -> impl Iterator<Item = GridPoint> + Send + '_ {
    let (x0, y0) = (floor(mask.x), floor(mask.y));
    (0..mask.height).flat_map(move |row| {
        (0..mask.width)
            .filter(move |&col| mask.is_set(col, row))
            .map(move |col| GridPoint::new(x0 + i64::from(col), y0 + i64::from(row)))
    })
}

fn extents(points: &[Point]) -> (f64, f64, f64, f64) {
    points.iter().fold(
        (
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        ),
        |(min_x, min_y, max_x, max_y), p| {
            (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
        },
    )
}
