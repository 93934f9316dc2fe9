mod analyze;
mod db;
mod graph;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tgnet-cli")]
#[command(about = "Channel relationship inference command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Analyse one channel and store the result
    Analyze {
        channel_id: i64,

        /// Comma-separated analysis types (content, temporal, network)
        #[arg(long, value_delimiter = ',', default_values = ["content", "temporal", "network"])]
        types: Vec<String>,

        /// Neighbourhood depth for network metrics
        #[arg(long)]
        depth: Option<u32>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored connections, strongest first
    Connections {
        /// Only edges leaving this channel
        #[arg(long)]
        source: Option<i64>,

        /// Only edges entering this channel
        #[arg(long)]
        target: Option<i64>,

        /// Only this connection type
        #[arg(long = "type")]
        connection_type: Option<String>,

        #[arg(long)]
        min_strength: Option<f64>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show graph-wide statistics
    Stats,
    /// Delete connections not refreshed within the staleness window
    Prune,
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
    /// Upsert channels from the YAML seed file
    Seed {
        /// Seed file; defaults to `TGNET_CHANNELS_PATH`
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("tgnet-cli ready; run with --help for commands");
        return Ok(());
    };

    let config = tgnet_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = tgnet_db::PoolConfig::from_app_config(&config);
    let pool = tgnet_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db { command } => match command {
            DbCommands::Ping => db::run_ping(&pool).await,
            DbCommands::Migrate => db::run_migrate(&pool).await,
            DbCommands::Seed { path } => {
                let path = path.unwrap_or_else(|| config.channels_path.clone());
                db::run_seed(&pool, &path).await
            }
        },
        Commands::Analyze {
            channel_id,
            types,
            depth,
            json,
        } => analyze::run_analyze(pool, &config, channel_id, &types, depth, json).await,
        Commands::Connections {
            source,
            target,
            connection_type,
            min_strength,
            limit,
        } => {
            let filter = graph::connection_filter(
                source,
                target,
                connection_type.as_deref(),
                min_strength,
                limit,
            )?;
            graph::run_connections(pool, &config, &filter).await
        }
        Commands::Stats => graph::run_stats(pool, &config).await,
        Commands::Prune => graph::run_prune(pool, &config).await,
    }
}
