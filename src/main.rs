//! Perceptor Service
//!
//! Thin service wrapper around [`perceptor::PerceptionManager`]: maps CLI
//! arguments onto the service configuration, ingests newline-delimited JSON
//! events from stdin, and exposes health and Prometheus endpoints.
//!
//! ```text
//! stdin (JSON lines) ──▶ record_event ──▶ PerceptionManager
//!                                           │
//!              /healthz /readyz ◀── hyper ──┤
//!              /metrics         ◀── hyper ──┘
//! ```

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use once_cell::sync::Lazy;
use prometheus::{Gauge, IntGauge, IntGaugeVec};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use perceptor::{
    BufferConfig, BufferedEvent, ManagerConfig, PerceptionManager, SamplerConfig,
    SnapshotCacheConfig, StatsSnapshot,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Perceptor - telemetry aggregation for conversational agents
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Buffer flush interval in seconds
    #[arg(long, env = "FLUSH_INTERVAL_SECONDS", default_value = "2")]
    flush_interval_seconds: u64,

    /// Buffered-event count that triggers an immediate flush
    #[arg(long, env = "FLUSH_THRESHOLD", default_value = "10")]
    flush_threshold: usize,

    /// Hard bound on the write buffer
    #[arg(long, env = "BUFFER_MAX_LEN", default_value = "50")]
    buffer_max_len: usize,

    /// Snapshot cache TTL in seconds
    #[arg(long, env = "SNAPSHOT_TTL_SECONDS", default_value = "60")]
    snapshot_ttl_seconds: u64,

    /// Initial snapshot cache capacity (the auto-tuner may move it)
    #[arg(long, env = "SNAPSHOT_CACHE_CAPACITY", default_value = "100")]
    snapshot_cache_capacity: usize,

    /// Device sampling interval in seconds
    #[arg(long, env = "SAMPLER_INTERVAL_SECONDS", default_value = "2")]
    sampler_interval_seconds: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Seconds between stats digest log lines
    #[arg(long, env = "STATS_INTERVAL_SECONDS", default_value = "60")]
    stats_interval_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            buffer: BufferConfig {
                flush_threshold: self.flush_threshold,
                flush_interval: Duration::from_secs(self.flush_interval_seconds),
                max_len: self.buffer_max_len,
            },
            snapshot_cache: SnapshotCacheConfig {
                ttl: Duration::from_secs(self.snapshot_ttl_seconds),
                max_entries: self.snapshot_cache_capacity,
            },
            sampler: SamplerConfig {
                interval: Duration::from_secs(self.sampler_interval_seconds),
                ..SamplerConfig::default()
            },
            ..ManagerConfig::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting perceptor");
    info!("  Flush interval: {}s", args.flush_interval_seconds);
    info!("  Flush threshold: {}", args.flush_threshold);
    info!("  Snapshot cache: {} entries, TTL {}s", args.snapshot_cache_capacity, args.snapshot_ttl_seconds);
    info!("  Sampler interval: {}s", args.sampler_interval_seconds);

    let manager = PerceptionManager::new(args.manager_config())
        .context("invalid service configuration")?;
    manager.start();

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Refresh the exported gauges and periodically log a digest
    let stats_manager = manager.clone();
    let digest_every = (args.stats_interval_seconds / GAUGE_REFRESH_SECONDS).max(1) as u32;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(GAUGE_REFRESH_SECONDS));
        let mut ticks = 0u32;
        loop {
            tick.tick().await;
            let stats = stats_manager.get_stats();
            refresh_gauges(&stats);

            ticks += 1;
            if ticks >= digest_every {
                ticks = 0;
                info!(
                    received = stats.total_received,
                    processed = stats.total_processed,
                    flushes = stats.batch_flush_count,
                    cache_hit_rate = format!("{:.2}", stats.cache_hit_rate),
                    cache_size = stats.cache_size,
                    tiered_hit_rate = format!("{:.2}", stats.tiered.hit_rate),
                    "stats digest"
                );
            }
        }
    });

    // Ingest newline-delimited JSON events from stdin
    let ingest_manager = manager.clone();
    tokio::spawn(async move {
        ingest_events(ingest_manager).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    manager.shutdown().await?;
    info!("Perceptor shutdown complete");
    Ok(())
}

// =============================================================================
// Event Ingestion
// =============================================================================

/// Read events from stdin, one JSON object per line, until EOF.
async fn ingest_events(manager: std::sync::Arc<PerceptionManager>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<BufferedEvent>(line) {
                    Ok(event) => manager.record_event(
                        &event.scope_id,
                        &event.subject_id,
                        &event.payload,
                        &event.label,
                        Some(event.timestamp),
                    ),
                    Err(e) => warn!(error = %e, "ignoring undecodable event line"),
                }
            }
            Ok(None) => {
                info!("stdin closed, event ingestion stopped");
                return;
            }
            Err(e) => {
                error!(error = %e, "stdin read failed, event ingestion stopped");
                return;
            }
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Exported Metrics
// =============================================================================

const GAUGE_REFRESH_SECONDS: u64 = 10;

static EVENTS_RECEIVED: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("perceptor_events_received_total", "Events accepted")
        .expect("metric registration")
});

static EVENTS_PROCESSED: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!(
        "perceptor_events_processed_total",
        "Events applied to analyzers"
    )
    .expect("metric registration")
});

static EVENTS_DROPPED: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!(
        "perceptor_events_dropped_total",
        "Events dropped on buffer overflow"
    )
    .expect("metric registration")
});

static BATCH_FLUSHES: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("perceptor_batch_flushes_total", "Completed batch flushes")
        .expect("metric registration")
});

static BUFFER_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("perceptor_buffer_size", "Events waiting in the write buffer")
        .expect("metric registration")
});

static BUFFER_THRESHOLD: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("perceptor_buffer_threshold", "Current flush threshold")
        .expect("metric registration")
});

static CACHE_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("perceptor_snapshot_cache_size", "Cached snapshots")
        .expect("metric registration")
});

static CACHE_CAPACITY: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!(
        "perceptor_snapshot_cache_capacity",
        "Current snapshot cache entry limit"
    )
    .expect("metric registration")
});

static CACHE_HIT_RATE: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!(
        "perceptor_snapshot_cache_hit_rate",
        "Snapshot cache hit rate"
    )
    .expect("metric registration")
});

static CACHE_INVALIDATIONS: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!(
        "perceptor_snapshot_cache_invalidations_total",
        "Snapshot entries removed by selective invalidation"
    )
    .expect("metric registration")
});

static TIERED_ENTRIES: Lazy<IntGaugeVec> = Lazy::new(|| {
    prometheus::register_int_gauge_vec!(
        "perceptor_tiered_cache_entries",
        "Sub-result cache occupancy per tier",
        &["tier"]
    )
    .expect("metric registration")
});

static TIERED_HIT_RATE: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!(
        "perceptor_tiered_cache_hit_rate",
        "Sub-result cache hit rate"
    )
    .expect("metric registration")
});

fn refresh_gauges(stats: &StatsSnapshot) {
    EVENTS_RECEIVED.set(stats.total_received as i64);
    EVENTS_PROCESSED.set(stats.total_processed as i64);
    EVENTS_DROPPED.set(stats.events_dropped as i64);
    BATCH_FLUSHES.set(stats.batch_flush_count as i64);
    BUFFER_SIZE.set(stats.buffer_size as i64);
    BUFFER_THRESHOLD.set(stats.buffer_threshold as i64);
    CACHE_SIZE.set(stats.cache_size as i64);
    CACHE_CAPACITY.set(stats.cache_max_size as i64);
    CACHE_HIT_RATE.set(stats.cache_hit_rate);
    CACHE_INVALIDATIONS.set(stats.cache_invalidations as i64);
    TIERED_ENTRIES
        .with_label_values(&["hot"])
        .set(stats.tiered.hot_entries as i64);
    TIERED_ENTRIES
        .with_label_values(&["warm"])
        .set(stats.tiered.warm_entries as i64);
    TIERED_ENTRIES
        .with_label_values(&["cold"])
        .set(stats.tiered.cold_entries as i64);
    TIERED_HIT_RATE.set(stats.tiered.hit_rate);
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("ok")))
                .unwrap(),
            "/readyz" => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("ok")))
                .unwrap(),
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr.parse().context("invalid health server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind health server")?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("health server accept error")?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                encoder.encode(&metric_families, &mut buffer).unwrap();

                Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", encoder.format_type())
                    .body(Full::new(Bytes::from(buffer)))
                    .unwrap()
            }
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr.parse().context("invalid metrics server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept error")?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
