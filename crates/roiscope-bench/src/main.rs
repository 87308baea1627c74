//! roiscope-bench: CLI tool for exercising the ROI engine and collecting
//! diagnostics.
//!
//! Synthesizes (or opens) a pixel set, generates random shapes through the
//! shape registry, pushes them through the change inbox into the geometry
//! index, optionally runs an overlap query, and computes statistics over
//! the matched shapes (or every shape). Useful for:
//!
//! - Measuring synchronization and statistics throughput per shape count
//! - Checking how Z/T pins narrow overlap queries
//! - Comparing the in-memory and memory-mapped pixel stores
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin roiscope-bench -- [OPTIONS]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use roiscope_core::diagnostics::{
    Clock, PhaseDiagnostics, PhaseMetrics, RunDiagnostics, RunSummary, timed,
};
use roiscope_core::registry::{RANDOM_EXTENT, RANDOM_PLANES};
use roiscope_core::{
    ChangeInbox, CoreConfig, GeometryIndexSynchronizer, InMemoryPixelStore, PixelAccess,
    PixelSetDimensions, PixelSetId, PixelType, RTreeIndexStore, Roi, RoiError, RoiId, Shape,
    ShapeCatalog, ShapeGeometry, ShapeId, ShapeRegistry, ShapeStatistics, StatisticsAggregator,
};
use roiscope_io::{ByteOrder, RawMetadata, RawPixelStore, write_pixel_set};
use tracing_subscriber::EnvFilter;

/// The single pixel set every generated shape annotates.
const PIXEL_SET: PixelSetId = PixelSetId(1);

/// Shape ids submitted to the change inbox per batch.
const INBOX_BATCH: usize = 256;

/// Smallest plane side that holds every random shape.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const MIN_SIDE: u64 = RANDOM_EXTENT as u64;

/// Smallest Z/T extent that holds every random pin.
#[allow(clippy::cast_lossless)]
const MIN_PLANES: u64 = RANDOM_PLANES as u64;

/// Index synchronization, overlap query and ROI statistics diagnostics.
///
/// Generates random shapes over a synthetic pixel set and prints
/// per-phase timing and count diagnostics.
#[derive(Parser)]
#[command(name = "roiscope-bench", version)]
struct Cli {
    /// Number of random shapes to generate.
    #[arg(long, default_value_t = 1000, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=100_000))]
    shapes: usize,

    /// Seed for shape generation.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Pixel set columns (random shapes need at least 512).
    #[arg(long, default_value_t = 512, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(MIN_SIDE..))]
    size_x: u32,

    /// Pixel set rows (random shapes need at least 512).
    #[arg(long, default_value_t = 512, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(MIN_SIDE..))]
    size_y: u32,

    /// Z-sections (random pins need at least 4).
    #[arg(long, default_value_t = 4, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(MIN_PLANES..))]
    size_z: u32,

    /// Channels.
    #[arg(long, default_value_t = 2, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    size_c: u32,

    /// Timepoints (random pins need at least 4).
    #[arg(long, default_value_t = 4, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(MIN_PLANES..))]
    size_t: u32,

    /// Constant sample value. Without it samples follow `x + y + z + c + t`.
    #[arg(long)]
    fill: Option<f64>,

    /// Serve pixels from a raw store in this directory, writing the
    /// synthetic pixel set there first if it does not exist.
    #[arg(long)]
    pixel_dir: Option<PathBuf>,

    /// Overlap query rectangle as `x,y,width,height`.
    #[arg(long, value_parser = parse_rect)]
    query: Option<[f64; 4]>,

    /// Pin the overlap query to a Z-section.
    #[arg(long, requires = "query")]
    query_z: Option<u32>,

    /// Pin the overlap query to a timepoint.
    #[arg(long, requires = "query")]
    query_t: Option<u32>,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full engine config as a JSON string.
    ///
    /// Any field left out keeps its default.
    #[arg(long)]
    config_json: Option<String>,

    /// Enable debug logging (`RUST_LOG` overrides the level).
    #[arg(long)]
    verbose: bool,
}

/// Parse `x,y,width,height`.
fn parse_rect(s: &str) -> Result<[f64; 4], String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<_, _>>()?;
    <[f64; 4]>::try_from(parts)
        .map_err(|parts| format!("expected x,y,width,height, got {} values", parts.len()))
}

/// Initialise logging to stderr, keeping stdout for the report.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::new("info")
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Build a [`CoreConfig`] from `--config-json` or the defaults.
fn config_from_cli(cli: &Cli) -> Result<CoreConfig, RoiError> {
    let config = match cli.config_json {
        Some(ref json) => serde_json::from_str(json)
            .map_err(|e| RoiError::InvalidConfig(format!("--config-json: {e}")))?,
        None => CoreConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Sample value at `(x, y, z, c, t)`.
fn synthetic_sample(fill: Option<f64>, x: u32, y: u32, z: u32, c: u32, t: u32) -> f64 {
    fill.unwrap_or_else(|| f64::from(x) + f64::from(y) + f64::from(z) + f64::from(c) + f64::from(t))
}

/// Pixel access for the run: a raw store on disk or an in-memory set.
fn pixel_access(
    cli: &Cli,
    dims: PixelSetDimensions,
    config: &CoreConfig,
) -> Result<Arc<dyn PixelAccess>, RoiError> {
    let Some(ref dir) = cli.pixel_dir else {
        let mut store = InMemoryPixelStore::with_config(config);
        store.insert_with(PIXEL_SET, dims, |x, y, z, c, t| {
            synthetic_sample(cli.fill, x, y, z, c, t)
        });
        return Ok(Arc::new(store));
    };

    let store = RawPixelStore::with_config(dir, config);
    match store.metadata(PIXEL_SET) {
        Ok(existing) => {
            tracing::info!(dir = %dir.display(), "using existing raw pixel set");
            if existing.dimensions != dims {
                tracing::warn!(?existing, "raw pixel set dimensions differ from --size-* flags");
            }
        }
        Err(RoiError::PixelSetNotFound(_)) => {
            let metadata = RawMetadata {
                dimensions: dims,
                pixel_type: PixelType::Double,
                byte_order: ByteOrder::Little,
            };
            let mut samples = Vec::with_capacity(dims.total_len());
            for t in 0..dims.size_t {
                for c in 0..dims.size_c {
                    for z in 0..dims.size_z {
                        for y in 0..dims.size_y {
                            for x in 0..dims.size_x {
                                samples.push(synthetic_sample(cli.fill, x, y, z, c, t));
                            }
                        }
                    }
                }
            }
            write_pixel_set(dir, PIXEL_SET, &metadata, &samples)?;
            tracing::info!(dir = %dir.display(), "wrote raw pixel set");
        }
        Err(e) => return Err(e),
    }
    Ok(Arc::new(store))
}

/// Everything a run produces.
struct Outcome {
    diagnostics: RunDiagnostics,
    combined: Option<ShapeStatistics>,
}

fn run(cli: &Cli, clock: &StdClock) -> Result<Outcome, RoiError> {
    let start = clock.now();
    let config = config_from_cli(cli)?;
    let dims = PixelSetDimensions::new(cli.size_x, cli.size_y, cli.size_z, cli.size_c, cli.size_t);
    let pixels = pixel_access(cli, dims, &config)?;
    let tiled = pixels.needs_tiled_access(PIXEL_SET)?;

    // Generate.
    let (shapes, generate_duration) = timed(clock, || ShapeRegistry::random(cli.shapes, cli.seed));
    let shapes = shapes?;
    let catalog = Arc::new(ShapeCatalog::new());
    let mut area_points = 0u64;
    for shape in &shapes {
        area_points += shape.area_point_count() as u64;
        catalog.upsert_roi(Roi::new(shape.roi, PIXEL_SET));
        catalog.upsert_shape(shape.clone());
    }

    // Synchronize through the change inbox.
    let store = Arc::new(RTreeIndexStore::new());
    let synchronizer = Arc::new(GeometryIndexSynchronizer::new(
        catalog.clone(),
        store.clone(),
        config.clone(),
    )?);
    let ids: Vec<ShapeId> = shapes.iter().map(|s| s.id).collect();
    let (reports, sync_duration) = timed(clock, || -> Result<_, RoiError> {
        let inbox = ChangeInbox::spawn(synchronizer.clone())?;
        for chunk in ids.chunks(INBOX_BATCH) {
            inbox.submit(chunk.to_vec())?;
        }
        Ok(inbox.shutdown())
    });
    let reports = reports?;
    let synchronize = PhaseDiagnostics {
        duration: sync_duration,
        metrics: PhaseMetrics::Synchronize {
            batches: reports.len(),
            written: reports.iter().map(|r| r.written).sum(),
            unchanged: reports.iter().map(|r| r.unchanged).sum(),
            vanished: reports.iter().map(|r| r.vanished.len()).sum(),
            failed: reports.iter().map(|r| r.failed.len()).sum(),
            retries: reports.iter().map(|r| r.retries).sum(),
        },
    };

    // Query.
    let (query, measured) = match cli.query {
        Some([x, y, width, height]) => {
            let mut probe = Shape::new(
                ShapeId(0),
                RoiId(0),
                ShapeGeometry::Rectangle {
                    x,
                    y,
                    width,
                    height,
                },
            );
            probe.z = cli.query_z;
            probe.t = cli.query_t;
            let queries = [synchronizer.query_for(&probe)];
            let (rois, duration) = timed(clock, || synchronizer.find_overlapping(PIXEL_SET, &queries));
            let rois = rois?;
            let measured: Vec<ShapeId> = rois.iter().flat_map(|&roi| catalog.shapes_of(roi)).collect();
            let diag = PhaseDiagnostics {
                duration,
                metrics: PhaseMetrics::Query {
                    queries: queries.len(),
                    matched_rois: rois.len(),
                },
            };
            (Some((diag, rois.len())), measured)
        }
        None => (None, ids),
    };

    // Statistics.
    let aggregator = StatisticsAggregator::new(catalog.clone(), pixels);
    let (result, stats_duration) = timed(clock, || aggregator.stats_for_shapes(&measured));
    let result = result?;
    let statistics = PhaseDiagnostics {
        duration: stats_duration,
        metrics: PhaseMetrics::Statistics {
            shapes: result.per_shape.len(),
            channels: result.combined.as_ref().map_or(0, |c| c.channels.len()),
            samples: result.per_shape.iter().map(ShapeStatistics::total_count).sum(),
        },
    };

    let matched_rois = query.as_ref().map_or(0, |(_, n)| *n);
    let diagnostics = RunDiagnostics {
        generate: PhaseDiagnostics {
            duration: generate_duration,
            metrics: PhaseMetrics::Generate {
                shape_count: shapes.len(),
                area_points,
            },
        },
        synchronize,
        query: query.map(|(diag, _)| diag),
        statistics,
        total_duration: clock.elapsed(&start),
        summary: RunSummary {
            dimensions: [dims.size_x, dims.size_y, dims.size_z, dims.size_c, dims.size_t],
            shape_count: catalog.len(),
            indexed_count: store.len(),
            matched_rois,
            tiled,
        },
    };
    Ok(Outcome {
        diagnostics,
        combined: result.combined,
    })
}

/// Format the combined statistic, one line per channel.
fn format_combined(combined: &ShapeStatistics) -> String {
    let mut lines = vec![format!(
        "{:<8} {:>10} {:>12} {:>12} {:>14} {:>12}",
        "Channel", "Count", "Min", "Max", "Mean", "Std dev"
    )];
    for &channel in &combined.channels {
        if let Some(s) = combined.channel(channel) {
            lines.push(format!(
                "{:<8} {:>10} {:>12.3} {:>12.3} {:>14.3} {:>12.3}",
                s.channel, s.count, s.min, s.max, s.mean, s.std_dev
            ));
        }
    }
    lines.join("\n")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match run(&cli, &StdClock) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        let value = serde_json::json!({
            "diagnostics": outcome.diagnostics,
            "combined": outcome.combined,
        });
        match serde_json::to_string_pretty(&value) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing diagnostics: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", outcome.diagnostics.report());
        if let Some(ref combined) = outcome.combined {
            println!();
            println!("{}", format_combined(combined));
        }
    }

    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}
