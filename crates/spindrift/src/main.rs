//! SPINDRIFT headless host
//!
//! Runs a seeded particle fountain for a fixed simulated duration and
//! mirrors every tick on a consumer thread through the sync feed.

mod demo;

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use spindrift_core::{Change, FeedReader, SimTime, SpindriftResult, StepController, SystemConfig};
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::demo::{Fountain, Gravity, Hopper, Tally};

#[derive(Parser, Debug)]
#[command(name = "spindrift")]
#[command(about = "Run the headless SPINDRIFT particle fountain", long_about = None)]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Tick length in milliseconds
    #[arg(short, long, default_value = "16")]
    tick_ms: i64,

    /// Particles emitted per second
    #[arg(short, long, default_value = "2000")]
    rate: f32,

    /// Age in milliseconds at which sparks become embers
    #[arg(long, default_value = "600")]
    hop_ms: i64,

    /// Seed for emission jitter
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// What the consumer thread saw.
#[derive(Debug, Default)]
struct FeedStats {
    digests: u64,
    last_tick: u64,
    /// Ticks whose digest was dropped while the consumer lagged.
    skipped: u64,
    loads: u64,
    reloads: u64,
    releases: u64,
    snapshots: u64,
    lowest_y: f32,
}

fn consume(reader: &FeedReader) -> FeedStats {
    let mut stats = FeedStats::default();
    while let Ok(digest) = reader.recv() {
        stats.digests += 1;
        stats.skipped += digest.tick.saturating_sub(stats.last_tick + 1);
        stats.last_tick = digest.tick;
        for change in &digest.changes {
            match change {
                Change::Loaded(_) => stats.loads += 1,
                Change::Reloaded(_) => stats.reloads += 1,
                Change::Released(_) => stats.releases += 1,
                Change::Resized { .. } => {}
            }
        }
        let now = SimTime::from_ms(digest.now_ms).secs();
        for particle in &digest.snapshots {
            stats.snapshots += 1;
            stats.lowest_y = stats.lowest_y.max(particle.cur_y(now));
        }
    }
    stats
}

fn run(args: &Args) -> SpindriftResult<()> {
    let config = match &args.config {
        Some(path) => SystemConfig::from_toml_file(path)?,
        None => SystemConfig::default(),
    };
    let mut controller = StepController::new(&config)?;

    let sparks = controller.add_emitter(Fountain::new("sparks", args.rate, 1200, 300, args.seed));
    let embers = controller.system_mut().group("embers");
    controller.add_affector(Gravity::new(9.8));
    controller.set_state_engine(Hopper::new(sparks, embers, args.hop_ms));
    let tally = Tally::default();
    let counts = tally.counts();
    controller.add_painter(tally);

    let reader = controller.attach_feed(config.feed_capacity)?;
    let consumer = thread::spawn(move || consume(&reader));

    controller.start()?;
    info!(
        rate = args.rate,
        tick_ms = args.tick_ms,
        duration = args.duration,
        "fountain running"
    );

    let tick_ms = args.tick_ms.max(1);
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let ticks = (args.duration * 1000.0 / tick_ms as f64) as i64;
    let mut moved = 0;
    let mut peak = 0;
    for step in 0..=ticks {
        let Some(summary) = controller.advance(step * tick_ms)? else {
            continue;
        };
        moved += summary.moved;
        peak = peak.max(summary.live);
        if summary.empty_changed {
            info!(tick = summary.tick, empty = summary.empty, "emptiness changed");
        }
        if summary.tick % 60 == 0 {
            debug!(
                tick = summary.tick,
                live = summary.live,
                sparks = controller.system().live(sparks).count(),
                embers = controller.system().live(embers).count(),
                "progress"
            );
        }
        controller.sync()?;
    }

    let system = controller.system();
    for store in system.group_stores() {
        info!(
            group = system.group_name(store.id()).unwrap_or_default(),
            size = store.size(),
            live = store.live_count(),
            heap_nodes = store.queue().len(),
            "group"
        );
    }
    info!(
        ticks = controller.tick(),
        peak,
        moved,
        indices = system.index_table().live_count(),
        "simulation finished"
    );

    let tally = counts.lock().clone();
    info!(
        loads = tally.loads,
        reloads = tally.reloads,
        resizes = tally.resizes,
        groups = tally.loads_by_group.len(),
        "painter tally"
    );

    // Discards every particle, then closes the feed so the consumer drains.
    controller.stop()?;
    controller.destroy();

    let stats = consumer.join().unwrap_or_default();
    info!(
        digests = stats.digests,
        last_tick = stats.last_tick,
        skipped = stats.skipped,
        loads = stats.loads,
        reloads = stats.reloads,
        releases = stats.releases,
        snapshots = stats.snapshots,
        lowest_y = stats.lowest_y,
        "consumer finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
        return ExitCode::FAILURE;
    }

    info!("SPINDRIFT v{}", env!("CARGO_PKG_VERSION"));
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "spindrift failed");
            ExitCode::FAILURE
        }
    }
}
