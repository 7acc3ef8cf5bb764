use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use evaluation_live_rankings::config::Config;
use evaluation_live_rankings::db::{self, PgDocumentStore};
use evaluation_live_rankings::models::Category;
use evaluation_live_rankings::subscription::SubscriptionSettings;
use evaluation_live_rankings::{rankings, report, suppression, LiveRankings};

#[derive(Parser)]
#[command(name = "evaluation-rankings")]
#[command(about = "Live faculty evaluation rankings over the evaluation document store", long_about = None)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the document store schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import evaluation rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Read the store once and print the leaderboard
    Rankings {
        #[arg(long)]
        department: Option<String>,
        /// Limit output to one category (e.g. "research")
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Keep the leaderboard live, reprinting on every new snapshot
    Watch {
        #[arg(long)]
        department: Option<String>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

fn parse_category(name: &str) -> anyhow::Result<Category> {
    let wanted = name.trim().to_lowercase();
    Category::ALL
        .into_iter()
        .find(|c| c.label().to_lowercase().starts_with(&wanted))
        .with_context(|| format!("unknown category {name:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();
    suppression::install_panic_hook();

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to the evaluation store's Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let written = db::import_csv(&pool, &csv).await?;
            println!("Wrote {written} evaluations from {}.", csv.display());
        }
        Commands::Rankings {
            department,
            category,
            limit,
        } => {
            let categories = match category.as_deref() {
                Some(name) => vec![parse_category(name)?],
                None => Category::ALL.to_vec(),
            };
            let store = PgDocumentStore::new(pool, config.poll_interval());
            let settings = SubscriptionSettings::from(&config);
            let snapshot = rankings::load_once(&store, &settings, department.as_deref())
                .await
                .context("failed to read evaluations")?;
            print!(
                "{}",
                report::build_leaderboard(department.as_deref(), &snapshot, &categories, limit)
            );
        }
        Commands::Watch { department, limit } => {
            let store = Arc::new(PgDocumentStore::new(pool, config.poll_interval()));
            let mut live = LiveRankings::start(store, &config, department.as_deref());
            let mut board = live.board();
            info!("watching evaluations; press Ctrl-C to stop");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = board.changed() => {
                        if !changed {
                            break;
                        }
                        print!(
                            "{}",
                            report::build_leaderboard(
                                department.as_deref(),
                                &board.snapshot(),
                                &Category::ALL,
                                limit,
                            )
                        );
                    }
                    Some(err) = live.next_error() => {
                        warn!(error = %err, "evaluation store reported an error");
                    }
                }
            }
            live.shutdown().await;
        }
    }

    Ok(())
}
