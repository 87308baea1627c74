//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::types::RoiError;

/// Tunables shared by the synchronizer, the change inbox and pixel access.
///
/// Every field has a default; a JSON document may override any subset:
///
/// ```
/// use roiscope_core::CoreConfig;
///
/// let config: CoreConfig = serde_json::from_str(r#"{ "ellipse_vertices": 64 }"#).unwrap();
/// assert_eq!(config.ellipse_vertices, 64);
/// assert_eq!(config.max_plane_width, CoreConfig::DEFAULT_MAX_PLANE_WIDTH);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Planes wider than this need tiled/pyramid access.
    pub max_plane_width: u32,

    /// Planes taller than this need tiled/pyramid access.
    pub max_plane_height: u32,

    /// Number of vertices used to approximate an ellipse outline in the
    /// geometry index.
    pub ellipse_vertices: usize,

    /// Index-key vertices are rounded to `1 / coordinate_precision`.
    pub coordinate_precision: u32,

    /// How many times the change inbox retries a transient index failure
    /// before reporting it.
    pub sync_retry_limit: u32,

    /// Base delay between inbox retries; attempt `n` waits `n * backoff`.
    pub sync_retry_backoff_ms: u64,

    /// Number of lock stripes serializing writes for the same shape id.
    pub write_lock_stripes: usize,
}

impl CoreConfig {
    /// Default for [`max_plane_width`](Self::max_plane_width).
    pub const DEFAULT_MAX_PLANE_WIDTH: u32 = 3192;
    /// Default for [`max_plane_height`](Self::max_plane_height).
    pub const DEFAULT_MAX_PLANE_HEIGHT: u32 = 3192;
    /// Default for [`ellipse_vertices`](Self::ellipse_vertices).
    pub const DEFAULT_ELLIPSE_VERTICES: usize = 36;
    /// Smallest accepted [`ellipse_vertices`](Self::ellipse_vertices).
    pub const MIN_ELLIPSE_VERTICES: usize = 8;
    /// Default for [`coordinate_precision`](Self::coordinate_precision).
    pub const DEFAULT_COORDINATE_PRECISION: u32 = 1000;
    /// Default for [`sync_retry_limit`](Self::sync_retry_limit).
    pub const DEFAULT_SYNC_RETRY_LIMIT: u32 = 3;
    /// Default for [`sync_retry_backoff_ms`](Self::sync_retry_backoff_ms).
    pub const DEFAULT_SYNC_RETRY_BACKOFF_MS: u64 = 25;
    /// Default for [`write_lock_stripes`](Self::write_lock_stripes).
    pub const DEFAULT_WRITE_LOCK_STRIPES: usize = 64;

    /// Check field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), RoiError> {
        if self.max_plane_width == 0 || self.max_plane_height == 0 {
            return Err(RoiError::InvalidConfig(
                "max_plane_width and max_plane_height must be positive".into(),
            ));
        }
        if self.ellipse_vertices < Self::MIN_ELLIPSE_VERTICES {
            return Err(RoiError::InvalidConfig(format!(
                "ellipse_vertices must be at least {}, got {}",
                Self::MIN_ELLIPSE_VERTICES,
                self.ellipse_vertices
            )));
        }
        if self.coordinate_precision == 0 {
            return Err(RoiError::InvalidConfig(
                "coordinate_precision must be positive".into(),
            ));
        }
        if self.write_lock_stripes == 0 {
            return Err(RoiError::InvalidConfig(
                "write_lock_stripes must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_plane_width: Self::DEFAULT_MAX_PLANE_WIDTH,
            max_plane_height: Self::DEFAULT_MAX_PLANE_HEIGHT,
            ellipse_vertices: Self::DEFAULT_ELLIPSE_VERTICES,
            coordinate_precision: Self::DEFAULT_COORDINATE_PRECISION,
            sync_retry_limit: Self::DEFAULT_SYNC_RETRY_LIMIT,
            sync_retry_backoff_ms: Self::DEFAULT_SYNC_RETRY_BACKOFF_MS,
            write_lock_stripes: Self::DEFAULT_WRITE_LOCK_STRIPES,
        }
    }
}
