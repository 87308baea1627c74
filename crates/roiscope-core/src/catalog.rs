//! The authoritative source of shapes and rois.
//!
//! Persistence is external; the engine reads through [`ShapeSource`].
//! [`ShapeCatalog`] is the in-memory implementation used by tests and the
//! bench tool.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::shape::{Roi, Shape};
use crate::types::{RoiId, ShapeId};

/// Read access to the authoritative shape definitions.
pub trait ShapeSource: Send + Sync {
    /// Current version of a shape, `None` if it no longer exists.
    fn shape(&self, id: ShapeId) -> Option<Shape>;

    /// A roi, `None` if it no longer exists.
    fn roi(&self, id: RoiId) -> Option<Roi>;
}

/// Shapes and rois held in memory behind read/write locks.
#[derive(Debug, Default)]
pub struct ShapeCatalog {
    shapes: RwLock<HashMap<ShapeId, Shape>>,
    rois: RwLock<HashMap<RoiId, Roi>>,
}

impl ShapeCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a roi.
    pub fn upsert_roi(&self, roi: Roi) {
        self.rois
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(roi.id, roi);
    }

    /// Add or replace a shape, returning the previous version.
    pub fn upsert_shape(&self, shape: Shape) -> Option<Shape> {
        self.shapes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(shape.id, shape)
    }

    /// Remove a shape, returning it if it existed.
    pub fn remove_shape(&self, id: ShapeId) -> Option<Shape> {
        self.shapes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Ids of every shape belonging to `roi`, ascending.
    #[must_use]
    pub fn shapes_of(&self, roi: RoiId) -> Vec<ShapeId> {
        let mut ids: Vec<ShapeId> = self
            .shapes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.roi == roi)
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of every shape, ascending.
    #[must_use]
    pub fn shape_ids(&self) -> Vec<ShapeId> {
        let mut ids: Vec<ShapeId> = self
            .shapes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of shapes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the catalog holds no shapes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ShapeSource for ShapeCatalog {
    fn shape(&self, id: ShapeId) -> Option<Shape> {
        self.shapes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn roi(&self, id: RoiId) -> Option<Roi> {
        self.rois
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}
