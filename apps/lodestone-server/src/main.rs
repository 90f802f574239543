use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};
use lodestone_common::ChunkPos;
use lodestone_kernel::{Ticker, World};
use lodestone_persist::{ChunkStore, RegionFile};
use lodestone_protocol::PacketRegistry;
use lodestone_protocol::packets::{PROTOCOL_VERSION, StatusResponse};
use tracing_subscriber::EnvFilter;

mod config;
mod server;

use config::ServerConfig;
use server::{ByteCounter, Server};

#[derive(Parser)]
#[command(name = "lodestone-server", about = "Tick loop, chunk streaming and region storage")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON config file; missing keys use defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, protocol and effective config
    Info,
    /// Run the tick loop with one simulated viewer
    Run {
        /// Stop after this many ticks; runs until killed if omitted
        #[arg(short, long)]
        ticks: Option<u64>,
        /// Viewer speed along +x in blocks per tick
        #[arg(long, default_value = "0")]
        walk: f64,
        /// World directory (overrides config)
        #[arg(long)]
        world: Option<PathBuf>,
        /// Ticks per second (overrides config)
        #[arg(long)]
        tick_rate: Option<u32>,
        /// View distance in chunks (overrides config)
        #[arg(long)]
        view_distance: Option<i32>,
    },
    /// List the chunks stored in a region file
    InspectRegion {
        /// Path to an r.<x>.<z>.mca file
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ServerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            let registry = PacketRegistry::standard()?;
            println!("lodestone-server v{}", env!("CARGO_PKG_VERSION"));
            println!("protocol: {PROTOCOL_VERSION} ({} packets registered)", registry.len());
            let status = StatusResponse::new(
                "1.8",
                PROTOCOL_VERSION,
                0,
                config.max_players,
                &config.motd,
            );
            println!("status: {}", status.json);
            println!("config: {}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run {
            ticks,
            walk,
            world,
            tick_rate,
            view_distance,
        } => {
            if let Some(world) = world {
                config.world_dir = world;
            }
            if let Some(rate) = tick_rate {
                config.tick_rate = rate;
            }
            if let Some(distance) = view_distance {
                config.view_distance = distance;
            }
            run(config, ticks, walk)?;
        }
        Commands::InspectRegion { path } => inspect_region(&path)?,
    }

    Ok(())
}

fn run(config: ServerConfig, ticks: Option<u64>, walk: f64) -> anyhow::Result<()> {
    let store = ChunkStore::open(&config.world_dir, &config.region_extension, config.dimension)
        .with_context(|| format!("opening world {}", config.world_dir.display()))?;
    let dimension = store.meta().dimension;
    let start_tick = store.meta().tick;
    tracing::info!(
        world = %config.world_dir.display(),
        ?dimension,
        start_tick,
        rate = config.tick_rate,
        view_distance = config.view_distance,
        "starting"
    );

    let registry = Arc::new(PacketRegistry::standard()?);
    let mut ticker = Ticker::new(World::new(dimension), config.tick_rate);
    let tick_rate = config.tick_rate;
    let mut server = Server::join(
        config,
        store,
        ticker.world_mut(),
        registry,
        ByteCounter::default(),
    )?
    .with_walk(walk);

    let running = AtomicBool::new(true);
    ticker.run(&running, |world, report| {
        server.on_tick(world, report);
        if ticks.is_some_and(|limit| report.tick >= limit) {
            running.store(false, Ordering::Release);
        }
    });

    let mut world = ticker.into_world();
    let sent = server.shutdown(&mut world);
    println!(
        "ran {} ticks at {tick_rate} Hz, {} chunks loaded, {} bytes sent",
        world.tick(),
        world.chunk_count(),
        sent.bytes
    );
    Ok(())
}

fn inspect_region(path: &std::path::Path) -> anyhow::Result<()> {
    anyhow::ensure!(path.is_file(), "{} is not a region file", path.display());
    let mut region = RegionFile::open(path)?;
    println!(
        "{}: {} chunks in {} sectors",
        path.display(),
        region.chunk_count(),
        region.sector_count()
    );
    for z in 0..32 {
        for x in 0..32 {
            let pos = ChunkPos::new(x, z);
            if !region.has_chunk(pos) {
                continue;
            }
            let timestamp = region.timestamp(pos);
            match region.read_chunk(pos) {
                Ok(Some(data)) => println!("  [{x:2}, {z:2}] {:6} bytes, saved at {timestamp}", data.len()),
                Ok(None) => {}
                Err(err) => println!("  [{x:2}, {z:2}] unreadable: {err}"),
            }
        }
    }
    Ok(())
}
