//! Keeps the geometry index consistent with the authoritative shapes.
//!
//! [`GeometryIndexSynchronizer::synchronize`] reloads a shape, rederives
//! its [`IndexRecord`] from scratch and writes it. The record is never
//! patched incrementally, so any sequence of geometry edits converges to
//! the record of the latest version.
//!
//! Writes for one shape id are serialized through a fixed set of lock
//! stripes; writes for different ids proceed in parallel. Per-id progress
//! is tracked as a [`SyncState`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::ShapeSource;
use crate::config::CoreConfig;
use crate::index::{GeometryIndexStore, IndexRecord, OverlapQuery, SyncOutcome};
use crate::shape::Shape;
use crate::types::{PixelSetId, RoiError, RoiId, ShapeId};

/// Per-shape synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Never synchronized, or the last attempt failed.
    #[default]
    Unsynchronized,
    /// A write is in flight.
    Synchronizing,
    /// The index holds the record of the last version loaded.
    Synchronized,
}

/// Outcome of one id within a batch, in input order.
pub type BatchResult = Vec<(ShapeId, Result<SyncOutcome, RoiError>)>;

/// Derives index records from a [`ShapeSource`] and writes them to a
/// [`GeometryIndexStore`].
pub struct GeometryIndexSynchronizer {
    source: Arc<dyn ShapeSource>,
    store: Arc<dyn GeometryIndexStore>,
    config: CoreConfig,
    states: Mutex<HashMap<ShapeId, SyncState>>,
    stripes: Vec<Mutex<()>>,
}

impl std::fmt::Debug for GeometryIndexSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryIndexSynchronizer")
            .field("config", &self.config)
            .field("stripes", &self.stripes.len())
            .finish_non_exhaustive()
    }
}

impl GeometryIndexSynchronizer {
    /// Wire a synchronizer to its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        source: Arc<dyn ShapeSource>,
        store: Arc<dyn GeometryIndexStore>,
        config: CoreConfig,
    ) -> Result<Self, RoiError> {
        config.validate()?;
        let stripes = (0..config.write_lock_stripes)
            .map(|_| Mutex::new(()))
            .collect();
        Ok(Self {
            source,
            store,
            config,
            states: Mutex::new(HashMap::new()),
            stripes,
        })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The index store records are written to.
    #[must_use]
    pub fn store(&self) -> &dyn GeometryIndexStore {
        self.store.as_ref()
    }

    /// Current state of a shape id.
    #[must_use]
    pub fn state(&self, shape: ShapeId) -> SyncState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&shape)
            .copied()
            .unwrap_or_default()
    }

    /// Number of ids with a recorded state.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop the recorded state of an id; it reads as
    /// [`SyncState::Unsynchronized`] afterwards.
    pub fn forget(&self, shape: ShapeId) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&shape);
    }

    fn set_state(&self, shape: ShapeId, state: SyncState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(shape, state);
    }

    fn stripe(&self, shape: ShapeId) -> &Mutex<()> {
        let len = self.stripes.len() as u64;
        let slot = usize::try_from(shape.0 % len).unwrap_or(0);
        &self.stripes[slot]
    }

    /// Rederive and write the index record of one shape.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::ShapeNotFound`] if the shape no longer exists,
    /// [`RoiError::RoiNotFound`] if its roi is missing, and whatever the
    /// store returns for a failed write.
    pub fn synchronize(&self, shape: ShapeId) -> Result<SyncOutcome, RoiError> {
        let _serial = self.stripe(shape).lock().unwrap_or_else(PoisonError::into_inner);
        self.set_state(shape, SyncState::Synchronizing);
        let result = self.write_record(shape);
        match &result {
            Ok(outcome) => {
                self.set_state(shape, SyncState::Synchronized);
                tracing::debug!(%shape, ?outcome, "synchronized");
            }
            Err(e) => {
                if e.is_benign() {
                    self.forget(shape);
                    tracing::debug!(%shape, "shape vanished before synchronization");
                } else {
                    self.set_state(shape, SyncState::Unsynchronized);
                    tracing::warn!(%shape, error = %e, "synchronization failed");
                }
            }
        }
        result
    }

    fn write_record(&self, id: ShapeId) -> Result<SyncOutcome, RoiError> {
        let shape = self.source.shape(id).ok_or(RoiError::ShapeNotFound(id))?;
        let roi = self
            .source
            .roi(shape.roi)
            .ok_or(RoiError::RoiNotFound(shape.roi))?;
        self.store
            .put(IndexRecord::derive(&shape, roi.pixel_set, &self.config))
    }

    /// Synchronize many ids in parallel.
    ///
    /// A failure for one id never affects the others. The result list
    /// follows the order of `shapes`; duplicate ids are synchronized once
    /// per occurrence, one after another.
    #[must_use]
    pub fn synchronize_batch(&self, shapes: &[ShapeId]) -> BatchResult {
        let results: BatchResult = shapes
            .par_iter()
            .map(|&id| (id, self.synchronize(id)))
            .collect();
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        tracing::debug!(total = shapes.len(), failed, "batch synchronized");
        results
    }

    /// An overlap query built from `shape` with the configured resolution.
    #[must_use]
    pub fn query_for(&self, shape: &Shape) -> OverlapQuery {
        OverlapQuery::for_shape(shape, &self.config)
    }

    /// Distinct rois on `pixel_set` overlapping any of `queries`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::IndexReadFailed`] if the store cannot be read.
    pub fn find_overlapping(
        &self,
        pixel_set: PixelSetId,
        queries: &[OverlapQuery],
    ) -> Result<BTreeSet<RoiId>, RoiError> {
        let rois = self.store.find_overlapping(pixel_set, queries)?;
        tracing::debug!(%pixel_set, queries = queries.len(), matched = rois.len(), "overlap query");
        Ok(rois)
    }
}
