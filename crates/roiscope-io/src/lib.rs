//! roiscope-io: filesystem pixel store for roiscope.
//!
//! Pixel sets live in a directory as raw planar data files with a JSON
//! sidecar ([`raw`]), served through memory-mapped read handles.
//! Ordinary raster images (PNG, JPEG, TIFF, BMP) can be imported into
//! that layout, or decoded into mask shapes ([`import`]).
//!
//! All filesystem interaction lives here; `roiscope-core` stays sans-IO.

pub mod import;
pub mod raw;

pub use import::{ImportError, import_image, load_mask, pixel_set_from_image};
pub use raw::{ByteOrder, RawMetadata, RawPixelStore, write_pixel_set};
