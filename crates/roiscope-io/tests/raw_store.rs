//! Integration test: write raw pixel sets to a scratch directory, read them
//! back through memory-mapped handles, and measure shapes over them.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::io::Cursor;
use std::sync::Arc;

use roiscope_core::{
    PixelAccess, PixelSetDimensions, PixelSetId, PixelType, Roi, RoiError, RoiId, Shape,
    ShapeCatalog, ShapeGeometry, ShapeId, StatisticsAggregator, with_buffer,
};
use roiscope_io::{ByteOrder, RawMetadata, RawPixelStore, import_image, load_mask, write_pixel_set};

const SET: PixelSetId = PixelSetId(7);

fn gradient(dims: PixelSetDimensions) -> Vec<f64> {
    let mut samples = Vec::with_capacity(dims.total_len());
    for t in 0..dims.size_t {
        for c in 0..dims.size_c {
            for z in 0..dims.size_z {
                for y in 0..dims.size_y {
                    for x in 0..dims.size_x {
                        samples.push(f64::from(x + 10 * y + 100 * z + 1000 * c + 10_000 * t));
                    }
                }
            }
        }
    }
    samples
}

fn write_gradient(root: &std::path::Path, pixel_type: PixelType, byte_order: ByteOrder) -> RawMetadata {
    let metadata = RawMetadata {
        dimensions: PixelSetDimensions::new(8, 6, 2, 2, 2),
        pixel_type,
        byte_order,
    };
    write_pixel_set(root, SET, &metadata, &gradient(metadata.dimensions)).unwrap();
    metadata
}

#[test]
fn samples_round_trip_in_every_wide_type() {
    for (pixel_type, byte_order) in [
        (PixelType::Uint16, ByteOrder::Big),
        (PixelType::Int32, ByteOrder::Little),
        (PixelType::Float, ByteOrder::Big),
        (PixelType::Double, ByteOrder::Little),
    ] {
        let dir = tempfile::tempdir().unwrap();
        write_gradient(dir.path(), pixel_type, byte_order);
        let store = RawPixelStore::new(dir.path());
        let value = with_buffer(&store, SET, |buffer| buffer.sample(3, 4, 1, 1, 1)).unwrap();
        assert_eq!(value, 11_143.0, "{pixel_type:?} {byte_order:?}");
    }
}

#[test]
fn plane_reads_contiguous_samples() {
    let dir = tempfile::tempdir().unwrap();
    write_gradient(dir.path(), PixelType::Uint16, ByteOrder::Little);
    let store = RawPixelStore::new(dir.path());
    let plane = with_buffer(&store, SET, |buffer| buffer.plane(1, 0, 1)).unwrap();
    assert_eq!((plane.width, plane.height), (8, 6));
    assert_eq!(plane.get(0, 0), Some(10_100.0));
    assert_eq!(plane.get(7, 5), Some(10_157.0));
}

#[test]
fn out_of_bounds_and_missing_sets_are_typed() {
    let dir = tempfile::tempdir().unwrap();
    write_gradient(dir.path(), PixelType::Uint8, ByteOrder::Little);
    let store = RawPixelStore::new(dir.path());

    let err = with_buffer(&store, SET, |buffer| buffer.sample(8, 0, 0, 0, 0)).unwrap_err();
    assert!(matches!(err, RoiError::OutOfBounds { x: 8, .. }));

    let err = with_buffer(&store, SET, |buffer| buffer.sample(0, 0, 0, 2, 0)).unwrap_err();
    assert!(matches!(err, RoiError::OutOfBounds { c: 2, .. }));

    assert!(matches!(
        store.open(PixelSetId(99)).err(),
        Some(RoiError::PixelSetNotFound(PixelSetId(99)))
    ));
}

#[test]
fn truncated_data_is_an_io_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_gradient(dir.path(), PixelType::Uint16, ByteOrder::Little);
    let data = dir.path().join("7.raw");
    let bytes = std::fs::read(&data).unwrap();
    std::fs::write(&data, &bytes[..bytes.len() / 2]).unwrap();

    let store = RawPixelStore::new(dir.path());
    let err = store.open(SET).err().unwrap();
    assert!(err.is_transient(), "{err}");
}

#[test]
fn mismatched_sample_count_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = RawMetadata {
        dimensions: PixelSetDimensions::new(2, 2, 1, 1, 1),
        pixel_type: PixelType::Uint8,
        byte_order: ByteOrder::Little,
    };
    assert!(write_pixel_set(dir.path(), SET, &metadata, &[1.0, 2.0, 3.0]).is_err());
}

#[test]
fn statistics_over_raw_store() {
    let dir = tempfile::tempdir().unwrap();
    write_gradient(dir.path(), PixelType::Uint16, ByteOrder::Big);

    let catalog = ShapeCatalog::new();
    catalog.upsert_roi(Roi::new(RoiId(1), SET));
    catalog.upsert_shape(
        Shape::new(
            ShapeId(1),
            RoiId(1),
            ShapeGeometry::Rectangle {
                x: 0.0,
                y: 0.0,
                width: 2.0,
                height: 1.0,
            },
        )
        .with_z(0)
        .with_t(0)
        .with_channels(vec![1_u32]),
    );
    let aggregator = StatisticsAggregator::new(Arc::new(catalog), Arc::new(RawPixelStore::new(dir.path())));
    let result = aggregator.stats_for_shapes(&[ShapeId(1)]).unwrap();
    let stats = result.per_shape[0].channel(1).unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.min, 1000.0);
    assert_eq!(stats.max, 1001.0);
    assert_eq!(stats.mean, 1000.5);
}

#[test]
fn imported_png_is_readable() {
    let image = image::DynamicImage::ImageRgb8(image::ImageBuffer::from_fn(4, 4, |x, y| {
        image::Rgb([(x * 10) as u8, (y * 10) as u8, 7])
    }));
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let metadata = import_image(&png, dir.path(), SET).unwrap();
    assert_eq!(metadata.dimensions, PixelSetDimensions::new(4, 4, 1, 3, 1));

    let store = RawPixelStore::new(dir.path());
    assert!(!store.needs_tiled_access(SET).unwrap());
    let (red, green, blue) = with_buffer(&store, SET, |buffer| {
        Ok((
            buffer.sample(3, 1, 0, 0, 0)?,
            buffer.sample(3, 1, 0, 1, 0)?,
            buffer.sample(3, 1, 0, 2, 0)?,
        ))
    })
    .unwrap();
    assert_eq!((red, green, blue), (30.0, 10.0, 7.0));
}

#[test]
fn mask_from_png_covers_set_pixels() {
    let image = image::DynamicImage::ImageLuma8(image::ImageBuffer::from_fn(5, 3, |x, _| {
        image::Luma([if x < 2 { 255 } else { 0 }])
    }));
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    let mask = load_mask(&png, 10.0, 20.0).unwrap();
    let shape = Shape::new(ShapeId(1), RoiId(1), ShapeGeometry::Mask(mask));
    assert_eq!(shape.area_point_count(), 6);
}
