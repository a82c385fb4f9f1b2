use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{self, EnvFilter};

use history_rust::types::time::days;
use history_rust::types::{FaviconBitmapType, PageTransition, Time};
use history_rust::{Config, HistoryService};
use history_rust::storage::Database;

#[derive(Parser)]
#[command(name = "history-rust")]
#[command(about = "Browsing history expiration engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Data directory
    #[arg(short, long)]
    datadir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background expiration sweep until interrupted
    Run,

    /// Record a visit
    Visit {
        /// Page URL
        url: String,

        /// Visit time in microseconds; defaults to now
        #[arg(short, long)]
        time: Option<Time>,

        /// Transition, e.g. `typed` or `link|chain_start`
        #[arg(long, default_value = "link")]
        transition: PageTransition,

        /// Visit this one was redirected or linked from
        #[arg(long)]
        referrer: Option<i64>,

        /// Map the page to this icon URL
        #[arg(long)]
        favicon: Option<String>,

        /// Store the favicon as fetched on demand
        #[arg(long, requires = "favicon")]
        on_demand: bool,
    },

    /// Delete URLs and all of their visits
    DeleteUrl {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Only delete visits up to this time
        #[arg(long)]
        until: Option<Time>,
    },

    /// Delete visits in [begin, end)
    ExpireBetween {
        /// Restrict to these URLs
        #[arg(long = "url")]
        urls: Vec<String>,

        #[arg(long, default_value = "null")]
        begin: Time,

        /// `null` for no upper bound
        #[arg(long, default_value = "null")]
        end: Time,

        /// Report the deletion as background expiration
        #[arg(long)]
        expired: bool,
    },

    /// Delete visits at exactly the given times
    ExpireTimes {
        #[arg(required = true)]
        times: Vec<Time>,
    },

    /// Expire every visit older than the given age or time
    ExpireBefore {
        /// Absolute time in microseconds
        #[arg(long, conflicts_with = "days")]
        time: Option<Time>,

        /// Age in days; defaults to the configured threshold
        #[arg(long)]
        days: Option<u64>,
    },

    /// Delete on-demand favicons that were not requested recently
    ClearFavicons,

    /// Bookmark management
    Bookmark {
        #[command(subcommand)]
        command: BookmarkCommands,
    },

    /// Print store statistics and metrics
    Inspect,

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum BookmarkCommands {
    /// Remove bookmarks and drop the URLs kept only for them
    Remove {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(datadir) = cli.datadir {
        config.database.datadir = datadir;
    }
    let level = cli.log_level.clone().unwrap_or_else(|| config.log.level.clone());

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&level));

    if config.log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("{}", history_rust::client_version());
    if config.database.in_memory {
        let service = HistoryService::in_memory(config)?;
        execute(service, cli.command).await
    } else {
        let service = HistoryService::open(config)?;
        execute(service, cli.command).await
    }
}

async fn execute<D: Database + 'static>(
    mut service: HistoryService<D>,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Run => {
            if !service.start_expiration()? {
                return Ok(());
            }
            info!("History expiration running, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            service.stop_expiration().await?;
            println!("{}", serde_json::to_string_pretty(&service.stats()?)?);
        }

        Commands::Visit {
            url,
            time,
            transition,
            referrer,
            favicon,
            on_demand,
        } => {
            let time = time.unwrap_or_else(Time::now);
            let visit = service.record_visit(&url, time, transition, referrer)?;
            if let Some(icon_url) = favicon {
                let bitmap_type = if on_demand {
                    FaviconBitmapType::OnDemand
                } else {
                    FaviconBitmapType::OnVisit
                };
                service.set_favicon(&url, &icon_url, bitmap_type, time)?;
            }
            println!("{}", serde_json::to_string_pretty(&visit)?);
        }

        Commands::DeleteUrl { urls, until } => match until {
            Some(until) => {
                let pairs: Vec<(String, Time)> = urls.into_iter().map(|url| (url, until)).collect();
                service.delete_urls_until(&pairs)?;
            }
            None => service.delete_urls(&urls)?,
        },

        Commands::ExpireBetween {
            urls,
            begin,
            end,
            expired,
        } => {
            let restrict: BTreeSet<String> = urls.into_iter().collect();
            service.expire_history_between(&restrict, begin, end, !expired)?;
        }

        Commands::ExpireTimes { times } => {
            info!("Expiring visits at {} times", times.len());
            service.expire_history_for_times(&times)?;
        }

        Commands::ExpireBefore { time, days: age } => {
            let end_time = match (time, age) {
                (Some(time), _) => time,
                (None, Some(age)) => Time::now() - days(age),
                (None, None) => Time::now() - service.config().expiry.expiration_threshold(),
            };
            info!("Expiring history before {}", end_time);
            service.expire_history_before(end_time)?;
        }

        Commands::ClearFavicons => service.clear_old_on_demand_favicons(Time::now())?,

        Commands::Bookmark { command } => match command {
            BookmarkCommands::Remove { urls } => service.urls_no_longer_bookmarked(&urls)?,
        },

        Commands::Inspect => {
            println!("{}", serde_json::to_string_pretty(&service.stats()?)?);
            print!("{}", service.gather_metrics()?);
        }

        Commands::Config => print!("{}", service.config().to_toml()?),
    }

    Ok(())
}
