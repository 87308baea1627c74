//! Run diagnostics: timing and counts for each phase of an engine run.
//!
//! A run is the sequence a driver such as `roiscope-bench` performs:
//! generate shapes, synchronize them into the geometry index, issue
//! overlap queries, then compute statistics. Each phase records its
//! wall-clock duration and phase-specific metrics.
//!
//! Time is read through the [`Clock`] trait so the core never touches a
//! platform clock itself; callers inject one.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Injected time source.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Run `f`, returning its result and how long it took according to `clock`.
pub fn timed<C: Clock, R>(clock: &C, f: impl FnOnce() -> R) -> (R, Duration) {
    let start = clock.now();
    let result = f();
    (result, clock.elapsed(&start))
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Shape generation or loading.
    pub generate: PhaseDiagnostics,
    /// Index synchronization through the change inbox.
    pub synchronize: PhaseDiagnostics,
    /// Overlap query (absent when no query was issued).
    pub query: Option<PhaseDiagnostics>,
    /// Statistics over the matched (or all) shapes.
    pub statistics: PhaseDiagnostics,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across phases.
    pub summary: RunSummary,
}

/// Diagnostics for one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDiagnostics {
    /// Wall-clock duration of this phase (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Phase-specific metrics.
    pub metrics: PhaseMetrics,
}

/// Metrics that vary by phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PhaseMetrics {
    /// Shape generation.
    Generate {
        /// Shapes produced.
        shape_count: usize,
        /// Area points across every shape.
        area_points: u64,
    },
    /// Index synchronization.
    Synchronize {
        /// Batches submitted to the inbox.
        batches: usize,
        /// Records written.
        written: usize,
        /// Records already current.
        unchanged: usize,
        /// Ids whose shape had vanished.
        vanished: usize,
        /// Ids that failed after retries.
        failed: usize,
        /// Retry rounds across batches.
        retries: u32,
    },
    /// Overlap query.
    Query {
        /// Query regions OR-ed together.
        queries: usize,
        /// Distinct rois matched.
        matched_rois: usize,
    },
    /// Statistics.
    Statistics {
        /// Shapes measured.
        shapes: usize,
        /// Channels in the combined statistic.
        channels: usize,
        /// Samples read across every shape.
        samples: u64,
    },
}

/// High-level summary counts for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Pixel set extents as `[x, y, z, c, t]`.
    pub dimensions: [u32; 5],
    /// Shapes in the catalog.
    pub shape_count: usize,
    /// Records in the geometry index after synchronization.
    pub indexed_count: usize,
    /// Rois matched by the overlap query.
    pub matched_rois: usize,
    /// Whether the pixel set needs tiled access.
    pub tiled: bool,
}

impl RunDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Run Diagnostics Report\n{}", "=".repeat(60)));
        let [x, y, z, c, t] = self.summary.dimensions;
        lines.push(format!(
            "Pixel set: {x}x{y}, Z={z} C={c} T={t}{}",
            if self.summary.tiled { " (tiled)" } else { "" },
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Phase", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut phases = vec![("Generate", &self.generate), ("Synchronize", &self.synchronize)];
        if let Some(ref q) = self.query {
            phases.push(("Query", q));
        }
        phases.push(("Statistics", &self.statistics));

        for (name, diag) in &phases {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Shapes: {}  |  Indexed: {}  |  Matched rois: {}",
            self.summary.shape_count, self.summary.indexed_count, self.summary.matched_rois,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format phase metrics into a compact detail string.
fn format_metrics(metrics: &PhaseMetrics) -> String {
    match metrics {
        PhaseMetrics::Generate {
            shape_count,
            area_points,
        } => format!("{shape_count} shapes, {area_points} area points"),
        PhaseMetrics::Synchronize {
            batches,
            written,
            unchanged,
            vanished,
            failed,
            retries,
        } => format!(
            "{batches} batches: written={written} unchanged={unchanged} vanished={vanished} failed={failed} retries={retries}"
        ),
        PhaseMetrics::Query {
            queries,
            matched_rois,
        } => format!("{queries} regions -> {matched_rois} rois"),
        PhaseMetrics::Statistics {
            shapes,
            channels,
            samples,
        } => format!("{shapes} shapes x {channels} channels, {samples} samples"),
    }
}
