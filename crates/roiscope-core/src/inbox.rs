//! Change-notification inbox: a dedicated worker that consumes batches of
//! changed shape ids and synchronizes them.
//!
//! Batches are processed strictly in arrival order, which preserves the
//! order of changes to any single shape. Within a batch each id is
//! synchronized once (first occurrence wins) and transient index failures
//! are retried with linear backoff. One [`BatchReport`] is published per
//! batch.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::index::SyncOutcome;
use crate::sync::GeometryIndexSynchronizer;
use crate::types::{RoiError, ShapeId};

/// Summary of one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Zero-based arrival index of the batch.
    pub sequence: u64,
    /// Ids received, duplicates included.
    pub received: usize,
    /// Distinct ids processed.
    pub distinct: usize,
    /// Ids whose record changed.
    pub written: usize,
    /// Ids whose record was already current.
    pub unchanged: usize,
    /// Ids whose shape no longer exists.
    pub vanished: Vec<ShapeId>,
    /// Ids that still failed after retries, with the last error.
    pub failed: Vec<(ShapeId, String)>,
    /// Retry rounds spent on transient failures.
    pub retries: u32,
}

impl BatchReport {
    /// Whether every id either synchronized or had vanished.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Handle on the inbox worker thread.
///
/// Dropping the handle closes the inbox and joins the worker.
#[derive(Debug)]
pub struct ChangeInbox {
    sender: Option<Sender<Vec<ShapeId>>>,
    reports: Receiver<BatchReport>,
    worker: Option<JoinHandle<()>>,
}

impl ChangeInbox {
    /// Start the worker.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::Io`] if the thread cannot be spawned.
    pub fn spawn(synchronizer: Arc<GeometryIndexSynchronizer>) -> Result<Self, RoiError> {
        let (sender, batches) = crossbeam_channel::unbounded::<Vec<ShapeId>>();
        let (report_tx, reports) = crossbeam_channel::unbounded::<BatchReport>();
        let worker = thread::Builder::new()
            .name("roiscope-inbox".to_string())
            .spawn(move || run_worker(&synchronizer, &batches, &report_tx))?;
        tracing::info!("change inbox started");
        Ok(Self {
            sender: Some(sender),
            reports,
            worker: Some(worker),
        })
    }

    /// Queue a batch of changed shape ids.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::IndexWriteFailed`] if the worker has stopped.
    pub fn submit(&self, shapes: Vec<ShapeId>) -> Result<(), RoiError> {
        self.sender
            .as_ref()
            .ok_or_else(|| RoiError::IndexWriteFailed("change inbox is closed".into()))?
            .send(shapes)
            .map_err(|_| RoiError::IndexWriteFailed("change inbox worker has stopped".into()))
    }

    /// Reports published so far.
    #[must_use]
    pub const fn reports(&self) -> &Receiver<BatchReport> {
        &self.reports
    }

    /// Close the inbox, let the worker drain queued batches, join it and
    /// return every report not yet received.
    #[must_use]
    pub fn shutdown(mut self) -> Vec<BatchReport> {
        self.close();
        self.reports.try_iter().collect()
    }

    fn close(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("change inbox worker panicked");
            }
            tracing::info!("change inbox stopped");
        }
    }
}

impl Drop for ChangeInbox {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(
    synchronizer: &GeometryIndexSynchronizer,
    batches: &Receiver<Vec<ShapeId>>,
    reports: &Sender<BatchReport>,
) {
    for (sequence, batch) in (0u64..).zip(batches.iter()) {
        let report = process_batch(synchronizer, sequence, &batch);
        if !report.is_clean() {
            tracing::warn!(sequence, failed = report.failed.len(), "batch left failures");
        }
        if reports.send(report).is_err() {
            tracing::debug!("report receiver dropped");
        }
    }
}

/// First occurrence of every id, in order.
fn dedup(batch: &[ShapeId]) -> Vec<ShapeId> {
    let mut seen = std::collections::HashSet::with_capacity(batch.len());
    batch.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn process_batch(
    synchronizer: &GeometryIndexSynchronizer,
    sequence: u64,
    batch: &[ShapeId],
) -> BatchReport {
    let mut pending = dedup(batch);
    let mut report = BatchReport {
        sequence,
        received: batch.len(),
        distinct: pending.len(),
        ..BatchReport::default()
    };

    let config = synchronizer.config();
    let mut attempt = 0;
    loop {
        let mut retry = Vec::new();
        for (id, result) in synchronizer.synchronize_batch(&pending) {
            match result {
                Ok(SyncOutcome::Written) => report.written += 1,
                Ok(SyncOutcome::Unchanged) => report.unchanged += 1,
                Err(e) if e.is_benign() => report.vanished.push(id),
                Err(e) if e.is_transient() && attempt < config.sync_retry_limit => retry.push(id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }
        if retry.is_empty() {
            break;
        }
        attempt += 1;
        report.retries = attempt;
        let delay = Duration::from_millis(config.sync_retry_backoff_ms.saturating_mul(u64::from(attempt)));
        tracing::warn!(sequence, attempt, ids = retry.len(), ?delay, "retrying transient index failures");
        thread::sleep(delay);
        pending = retry;
    }
    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::ShapeCatalog;
    use crate::config::CoreConfig;
    use crate::index::{GeometryIndexStore, RTreeIndexStore};
    use crate::shape::Roi;
    use crate::sync::tests::{FlakyStore, rect};
    use crate::types::PixelSetId;

    fn catalog(ids: &[u32]) -> Arc<ShapeCatalog> {
        let catalog = ShapeCatalog::new();
        for &id in ids {
            let id64 = u64::from(id);
            catalog.upsert_roi(Roi::new(crate::types::RoiId(id64), PixelSetId(1)));
            catalog.upsert_shape(rect(id64, id64, f64::from(id) * 20.0, 0.0));
        }
        Arc::new(catalog)
    }

    fn fast_config() -> CoreConfig {
        CoreConfig {
            sync_retry_backoff_ms: 1,
            ..CoreConfig::default()
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let ids = [ShapeId(3), ShapeId(1), ShapeId(3), ShapeId(2), ShapeId(1)];
        assert_eq!(dedup(&ids), vec![ShapeId(3), ShapeId(1), ShapeId(2)]);
    }

    #[test]
    fn batches_are_reported_in_order() {
        let store = Arc::new(RTreeIndexStore::new());
        let sync = Arc::new(
            GeometryIndexSynchronizer::new(catalog(&[1, 2, 3]), store.clone(), fast_config()).unwrap(),
        );
        let inbox = ChangeInbox::spawn(sync).unwrap();
        inbox
            .submit(vec![ShapeId(1), ShapeId(2), ShapeId(1)])
            .unwrap();
        inbox.submit(vec![ShapeId(3), ShapeId(9)]).unwrap();
        inbox.submit(vec![ShapeId(1)]).unwrap();
        let reports = inbox.shutdown();

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].sequence, 0);
        assert_eq!(reports[0].received, 3);
        assert_eq!(reports[0].distinct, 2);
        assert_eq!(reports[0].written, 2);
        assert_eq!(reports[1].vanished, vec![ShapeId(9)]);
        assert!(reports[1].is_clean());
        assert_eq!(reports[2].unchanged, 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn transient_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(2));
        let sync = Arc::new(
            GeometryIndexSynchronizer::new(catalog(&[1]), store.clone(), fast_config()).unwrap(),
        );
        let inbox = ChangeInbox::spawn(sync).unwrap();
        inbox.submit(vec![ShapeId(1)]).unwrap();
        let reports = inbox.shutdown();
        assert_eq!(reports[0].retries, 2);
        assert_eq!(reports[0].written, 1);
        assert!(reports[0].is_clean());
        assert!(store.get(ShapeId(1)).unwrap().is_some());
    }

    #[test]
    fn exhausted_retries_are_reported() {
        let config = CoreConfig {
            sync_retry_limit: 1,
            ..fast_config()
        };
        let sync = Arc::new(
            GeometryIndexSynchronizer::new(catalog(&[1]), Arc::new(FlakyStore::new(5)), config)
                .unwrap(),
        );
        let inbox = ChangeInbox::spawn(sync).unwrap();
        inbox.submit(vec![ShapeId(1)]).unwrap();
        let reports = inbox.shutdown();
        assert_eq!(reports[0].retries, 1);
        assert_eq!(reports[0].failed.len(), 1);
        assert_eq!(reports[0].failed[0].0, ShapeId(1));
    }
}
