//! EmberKV Server Binary
//!
//! Starts the TCP server for EmberKV.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use emberkv::network::Server;
use emberkv::{CompactionTrigger, Config, Engine, FsyncPolicy};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Fsync {
    /// fsync after every record
    Always,
    /// fsync every `--fsync-every` records
    Batch,
    /// fsync when `--fsync-interval-ms` has elapsed since the last one
    Interval,
}

/// EmberKV Server
#[derive(Parser, Debug)]
#[command(name = "emberkv-server")]
#[command(about = "Log-structured key-value store server")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./emberkv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Segment size in MB before rotation
    #[arg(short = 's', long, default_value = "4")]
    segment_mb: u64,

    /// Durability policy for appends
    #[arg(long, value_enum, default_value = "always")]
    fsync: Fsync,

    /// Records per fsync with `--fsync batch`
    #[arg(long, default_value = "64")]
    fsync_every: usize,

    /// Milliseconds between fsyncs with `--fsync interval`
    #[arg(long, default_value = "100")]
    fsync_interval_ms: u64,

    /// Compact once this many closed segments exist (0 = manual only)
    #[arg(short = 'c', long, default_value = "8")]
    compact_after: usize,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,emberkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("EmberKV Server v{}", emberkv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let fsync_policy = match args.fsync {
        Fsync::Always => FsyncPolicy::EveryWrite,
        Fsync::Batch => FsyncPolicy::EveryNWrites {
            count: args.fsync_every,
        },
        Fsync::Interval => FsyncPolicy::Interval {
            millis: args.fsync_interval_ms,
        },
    };
    let compaction_trigger = match args.compact_after {
        0 => CompactionTrigger::Manual,
        n => CompactionTrigger::SegmentCount { closed_segments: n },
    };

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .segment_size_threshold(args.segment_mb * 1024 * 1024)
        .fsync_policy(fsync_policy)
        .compaction_trigger(compaction_trigger)
        .build();

    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Engine initialized successfully");

    let mut server = match Server::bind(config, engine) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
