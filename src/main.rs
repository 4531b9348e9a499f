//! Daily Streak Bot
//!
//! Command-line entry point: runs the daily scheduler, or performs one-off
//! operations against the configured table storage.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use daily_streak_bot::{
    AzureTableService, BroadcastJob, ChannelRegistry, DailyBroadcast, DailyChallenge,
    DailyScheduler, Difficulty, EntityCache, EntityCacheConfig, Error, InMemoryTableService,
    LoggingNotifier, ReleaseSchedule, Result, RolloverJob, SchedulerConfig, ServerConfigEntity,
    StaticChallengeSource, StaticUserDirectory, StatsEngine, StatsEngineConfig, SystemClock,
    TableServiceRef, UserStatsEntity, DEFAULT_ROLLOVER_LEAD,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Daily Streak Bot - daily challenge broadcast and streak tracking
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Table storage connection string
    #[arg(long, env = "STORAGE_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,

    /// Use a throwaway in-memory store instead of table storage
    #[arg(long, env = "IN_MEMORY")]
    in_memory: bool,

    /// Deployment environment (production, development)
    #[arg(long, env = "ENVIRONMENT", default_value = "production")]
    environment: String,

    /// Log level (trace, debug, info, warn, error); defaults by environment
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Daily release hour (UTC)
    #[arg(long, env = "RELEASE_HOUR", default_value = "11")]
    release_hour: u32,

    /// Daily release minute (UTC)
    #[arg(long, env = "RELEASE_MINUTE", default_value = "0")]
    release_minute: u32,

    /// Local cache time-to-live in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "3600")]
    cache_ttl_secs: u64,

    /// Users processed concurrently during rollover
    #[arg(long, env = "ROLLOVER_CONCURRENCY", default_value = "16")]
    rollover_concurrency: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daily rollover and broadcast until interrupted
    Run {
        /// Users visited by the daily rollover
        #[arg(long, env = "KNOWN_USERS", value_delimiter = ',')]
        known_users: Vec<u64>,

        /// Guilds that receive the daily broadcast
        #[arg(long, env = "GUILDS", value_delimiter = ',')]
        guilds: Vec<u64>,

        /// Title of the challenge to broadcast; broadcast is off without it
        #[arg(long)]
        challenge_title: Option<String>,

        /// Link to the challenge
        #[arg(long, default_value = "")]
        challenge_link: String,

        /// Challenge difficulty label
        #[arg(long, default_value = "medium")]
        challenge_difficulty: String,

        /// Challenge acceptance rate in percent
        #[arg(long, default_value = "0")]
        challenge_acceptance: f64,
    },

    /// Record a completion for a user
    Complete {
        user_id: u64,

        /// easy, medium or hard
        difficulty: String,

        /// Completion time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Run the daily rollover once
    Rollover {
        /// Users to roll over
        #[arg(long, env = "KNOWN_USERS", value_delimiter = ',')]
        users: Vec<u64>,

        /// Run even though the current release day is not about to close
        #[arg(long)]
        force: bool,
    },

    /// Print a user's stats
    ShowUser { user_id: u64 },

    /// Set the notification channel of a guild
    SetChannel { guild_id: u64, channel_id: u64 },

    /// Print the notification channel of a guild
    ShowChannel { guild_id: u64 },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Daily Streak Bot");
    info!("  Version: {}", daily_streak_bot::VERSION);
    info!("  Environment: {}", args.environment);

    let services = Services::build(&args).await?;

    match args.command {
        Command::Run {
            known_users,
            guilds,
            challenge_title,
            challenge_link,
            challenge_difficulty,
            challenge_acceptance,
        } => {
            let challenge = challenge_title.map(|title| DailyChallenge {
                date: Utc::now().date_naive(),
                title,
                link: challenge_link,
                difficulty: Difficulty::from_label(&challenge_difficulty),
                acceptance_rate: challenge_acceptance,
            });
            run(services, known_users, guilds, challenge).await
        }

        Command::Complete {
            user_id,
            difficulty,
            at,
        } => {
            let outcome = services
                .engine
                .log_completion(
                    user_id,
                    at.unwrap_or_else(Utc::now),
                    Difficulty::from_label(&difficulty),
                )
                .await;
            println!("{:?}", outcome);
            Ok(())
        }

        Command::Rollover { users, force } => {
            let lead = chrono::Duration::from_std(DEFAULT_ROLLOVER_LEAD)
                .map_err(|e| Error::Internal(format!("rollover lead out of range: {}", e)))?;
            let now = Utc::now();
            if !force && !services.release.is_closing(now, lead) {
                return Err(Error::Configuration(format!(
                    "release day is still open until {}, rollover allowed from {} (use --force to override)",
                    services.release.next_release(now).to_rfc3339(),
                    (services.release.next_release(now) - lead).to_rfc3339()
                )));
            }
            let report = services.engine.daily_rollover(&users).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Command::ShowUser { user_id } => {
            match services.engine.user_summary(user_id).await {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => println!("No stats for user {}", user_id),
            }
            Ok(())
        }

        Command::SetChannel {
            guild_id,
            channel_id,
        } => {
            if services.channels.set_channel(guild_id, channel_id).await {
                println!("Guild {} now uses channel {}", guild_id, channel_id);
                Ok(())
            } else {
                Err(Error::Internal(format!(
                    "could not save channel for guild {}",
                    guild_id
                )))
            }
        }

        Command::ShowChannel { guild_id } => {
            match services.channels.channel_for(guild_id).await {
                0 => println!("No channel configured for guild {}", guild_id),
                channel_id => println!("Guild {} uses channel {}", guild_id, channel_id),
            }
            Ok(())
        }
    }
}

// =============================================================================
// Service Wiring
// =============================================================================

struct Services {
    release: ReleaseSchedule,
    engine: Arc<StatsEngine>,
    channels: Arc<ChannelRegistry>,
}

impl Services {
    async fn build(args: &Args) -> Result<Self> {
        let clock = SystemClock::shared();
        let release = ReleaseSchedule::at(args.release_hour, args.release_minute).ok_or_else(|| {
            Error::Configuration(format!(
                "invalid release time {:02}:{:02}",
                args.release_hour, args.release_minute
            ))
        })?;

        let service: TableServiceRef = if args.in_memory {
            warn!("Using in-memory table storage, nothing will be persisted");
            Arc::new(InMemoryTableService::new())
        } else {
            let connection_string = args.connection_string.as_deref().ok_or_else(|| {
                Error::Configuration(
                    "STORAGE_CONNECTION_STRING is not set (use --in-memory for a throwaway store)".into(),
                )
            })?;
            Arc::new(AzureTableService::from_connection_string(connection_string)?)
        };

        let cache_config = EntityCacheConfig::with_ttl(Duration::from_secs(args.cache_ttl_secs));
        let users: Arc<EntityCache<UserStatsEntity>> =
            Arc::new(EntityCache::new(cache_config.clone(), clock.clone()));
        let servers: Arc<EntityCache<ServerConfigEntity>> =
            Arc::new(EntityCache::new(cache_config, clock.clone()));

        // An unbound cache degrades to misses and failed saves
        users.initialize(service.clone()).await;
        servers.initialize(service).await;

        let engine = Arc::new(StatsEngine::new(
            users,
            clock,
            release,
            StatsEngineConfig {
                rollover_concurrency: args.rollover_concurrency,
            },
        ));

        info!("  Release: {}", release);
        info!("  Cache TTL: {}s", args.cache_ttl_secs);

        Ok(Self {
            release,
            engine,
            channels: Arc::new(ChannelRegistry::new(servers)),
        })
    }
}

async fn run(
    services: Services,
    known_users: Vec<u64>,
    guilds: Vec<u64>,
    challenge: Option<DailyChallenge>,
) -> Result<()> {
    let config = SchedulerConfig {
        release: services.release,
        ..Default::default()
    };

    let mut scheduler = DailyScheduler::new(SystemClock::shared());
    scheduler.add(
        config.rollover_time(),
        Arc::new(RolloverJob::new(
            services.engine.clone(),
            Arc::new(StaticUserDirectory::new(known_users)),
        )),
    );

    match challenge {
        Some(challenge) => {
            let broadcast = DailyBroadcast::new(
                Arc::new(StaticChallengeSource::new(challenge)),
                Arc::new(LoggingNotifier),
                services.channels.clone(),
            );
            scheduler.add(
                config.broadcast_time(),
                Arc::new(BroadcastJob::new(Arc::new(broadcast), guilds)),
            );
        }
        None => info!("No challenge configured, daily broadcast disabled"),
    }

    let cancel = CancellationToken::new();
    let handles = scheduler.spawn(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("Cannot listen for shutdown signal: {}", e)))?;
    info!("Shutdown requested");
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }

    info!("Daily Streak Bot shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let default_level = if args.environment.eq_ignore_ascii_case("development") {
        "debug"
    } else {
        "info"
    };

    let level = match args
        .log_level
        .as_deref()
        .unwrap_or(default_level)
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

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
