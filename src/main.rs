//! Binary entrypoint for the Trophyrack CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and seeds file
//! - `status` - print every holder's achievements and the reward total
//! - `play <game> [--solved <level>] [--duration <ms>]` - simulate one game session
//! - `claim <game> <id>` - claim an achieved reward
//! - `daily` - run the daily reset and list today's daily achievements
//!
//! See the library crate docs for module‑level details: `trophyrack::`.
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use trophyrack::achievement::AchievementView;
use trophyrack::config::Config;
use trophyrack::daily::DailyScheduler;
use trophyrack::dependency::FeatureFlags;
use trophyrack::logutil::escape_log;
use trophyrack::metrics;
use trophyrack::persistence::JsonFileBackend;
use trophyrack::registry::AchievementRegistry;
use trophyrack::scoped::LEVEL_NOT_SOLVED;
use trophyrack::seeds;
use trophyrack::store::UpdatePolicy;

/// Instance key holding the session duration written by `play`.
const KEY_DURATION: &str = "duration_ms";
/// Aggregate key holding the best solved duration.
const KEY_BEST: &str = "best_ms";
/// Aggregate key counting every session, and the time keeper of sessions.
const KEY_SESSIONS: &str = "sessions";

#[derive(Parser)]
#[command(name = "trophyrack")]
#[command(about = "Achievement engine for mini-game collections")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and starter seeds
    Init,
    /// Show every holder's achievements and the reward total
    Status,
    /// Simulate one session of a game
    Play {
        /// Game type (e.g. tinyhack)
        game: String,
        /// Level reached; omit for a lost session
        #[arg(short, long)]
        solved: Option<i64>,
        /// Session duration in milliseconds
        #[arg(short, long, default_value_t = 0)]
        duration: i64,
    },
    /// Claim the reward of an achieved achievement
    Claim {
        game: String,
        id: u32,
    },
    /// Run the daily reset and list today's daily achievements
    Daily,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config, so there is nothing to load yet.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Some(Config::load(&cli.config).await?),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new trophyrack configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);

            let cfg = Config::default();
            tokio::fs::create_dir_all(&cfg.engine.data_dir).await?;
            let seeds_path = cfg.seeds_path();
            if tokio::fs::try_exists(&seeds_path).await? {
                warn!("Keeping existing seeds at {}", seeds_path.display());
            } else {
                let serialized = serde_json::to_string_pretty(&seeds::starter_seeds())?;
                tokio::fs::write(&seeds_path, serialized).await?;
                info!("Starter seeds written to {}", seeds_path.display());
            }
        }
        Commands::Status => {
            let config = require_config(pre_config)?;
            let registry = open_registry(&config)?;
            for holder in registry.holders() {
                println!("{}{}", holder.game_type(), if holder.is_daily() { " (daily)" } else { "" });
                print_views(&holder.views());
            }
            println!("Reward total: {}", registry.reward_total());
        }
        Commands::Play {
            game,
            solved,
            duration,
        } => {
            let config = require_config(pre_config)?;
            let registry = open_registry(&config)?;
            let level = solved.unwrap_or(LEVEL_NOT_SOLVED);
            info!("Playing a {} session (level {}, {} ms)", escape_log(&game), level, duration);

            let data = registry.game_data(&game);
            data.instance.load(None)?;
            data.instance.put_value(KEY_DURATION, duration, UpdatePolicy::Always);
            data.aggregate.increment(KEY_SESSIONS, 1, 0);
            if duration > 0 {
                data.timers.on_time_keeper_update(KEY_SESSIONS, duration);
                if level > LEVEL_NOT_SOLVED && data.aggregate.record_minimum(KEY_BEST, duration) {
                    println!("New best time: {} ms", duration);
                }
            }
            data.instance.close(level)?;

            if let Ok(holder) = registry.holder(&game) {
                print_views(&holder.views());
            }
            let saved = registry.save_all()?;
            debug!("Saved {} stores", saved);
        }
        Commands::Claim { game, id } => {
            let config = require_config(pre_config)?;
            let registry = open_registry(&config)?;
            let points = registry.claim_reward(&game, id)?;
            registry.save_all()?;
            println!("Claimed {} points, total {}", points, registry.reward_total());
        }
        Commands::Daily => {
            let config = require_config(pre_config)?;
            let registry = open_registry(&config)?;
            let today = chrono::Utc::now().date_naive();
            for holder in registry.holders().into_iter().filter(|h| h.is_daily()) {
                let rng = match config.daily.rng_seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let mut scheduler = DailyScheduler::new(Arc::clone(&holder), config.daily.max_per_day, rng);
                let reset = scheduler.refresh(today);
                println!("{} for {} ({} reset)", holder.game_type(), today, reset);
                let available: Vec<AchievementView> =
                    scheduler.list_available().iter().map(|a| a.view()).collect();
                print_views(&available);
            }
            registry.save_all()?;
        }
    }

    let stats = metrics::snapshot();
    debug!(
        "metrics: events={} listener_failures={} achieved={} claimed={} corrupt_loads={}",
        stats.events_dispatched,
        stats.listener_failures,
        stats.achievements_achieved,
        stats.rewards_claimed,
        stats.corrupt_loads
    );
    Ok(())
}

fn require_config(config: Option<Config>) -> Result<Config> {
    config.ok_or_else(|| anyhow!("configuration not loaded"))
}

fn open_registry(config: &Config) -> Result<AchievementRegistry> {
    let seeds_path = config.seeds_path();
    let holder_seeds = seeds::load_seeds_from_json(&seeds_path).map_err(|e| {
        anyhow!(
            "Failed to load seeds {}: {} (run `trophyrack init` first)",
            seeds_path.display(),
            e
        )
    })?;
    let flags = Arc::new(FeatureFlags::new());
    for seed in &holder_seeds {
        flags.unlock(&seed.game_type);
    }
    let backend = Arc::new(JsonFileBackend::new(config.state_path()));
    let registry = AchievementRegistry::new(backend, flags);
    registry.bootstrap(seeds::blueprints(holder_seeds))?;
    Ok(registry)
}

fn print_views(views: &[AchievementView]) {
    for view in views {
        println!(
            "  #{:<3} {:<9} {:>5}/{:<5} {}  [{}]",
            view.id,
            view.state.label(),
            view.value,
            view.target,
            view.description,
            view.reward_description
        );
    }
}

fn log_line(record: &log::Record) -> String {
    format!(
        "{} [{}] {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        record.level(),
        record.args()
    )
}

/// `-v` flags win over `RUST_LOG`, which wins over the configured level.
/// With a log file configured, the console only gets a copy on a TTY.
fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    match verbosity {
        0 => match std::env::var("RUST_LOG") {
            Ok(filters) => {
                builder.parse_filters(&filters);
            }
            Err(_) => {
                let level = config
                    .as_ref()
                    .and_then(|cfg| cfg.logging.level.parse().ok())
                    .unwrap_or(log::LevelFilter::Info);
                builder.filter_level(level);
            }
        },
        1 => {
            builder.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
        }
    }

    let sink = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_deref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        })
        .map(std::sync::Mutex::new);
    let echo = sink.is_none() || atty::is(atty::Stream::Stdout);

    builder.format(move |fmt, record| {
        let line = log_line(record);
        if let Some(file) = &sink {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{line}");
            }
        }
        if echo {
            writeln!(fmt, "{line}")
        } else {
            Ok(())
        }
    });
    let _ = builder.try_init();
}
