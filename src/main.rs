use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::MigrationHarness;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use contributor_info::auth::JwtService;
use contributor_info::billing_config::{ProductCatalog, billing_config_path};
use contributor_info::polar_config::PolarConfig;
use contributor_info::spam::SpamIndicator;
use contributor_info::subscriptions::BillingCycle;
use contributor_info::web::{AppState, PgPool};
use contributor_info::{MIGRATIONS, TierMapper, metrics, telemetry, web};

#[derive(Parser)]
#[command(name = "contributor-info")]
#[command(about = "contributor.info billing and spam services")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Web {
        /// Interface to bind to
        #[arg(long, default_value = "127.0.0.1")]
        interface: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Serve Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,
        /// Skip applying pending migrations on startup
        #[arg(long)]
        skip_migrations: bool,
    },
    /// Apply pending database migrations and exit
    Migrate,
    /// Print the tier and badge for a spam score
    ClassifySpam {
        /// Score in 0..=100
        score: i32,
    },
    /// Print the tier and limits a Polar product id maps to
    MapProduct {
        product_id: String,
        /// Polar recurring interval ("month" or "year")
        #[arg(long)]
        interval: Option<String>,
    },
    /// Write the product catalog from POLAR_PRODUCT_ID_* variables to a billing config file
    WriteBillingConfig {
        /// Destination (defaults to the resolved billing config path)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

fn create_pool() -> Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let manager = ConnectionManager::<PgConnection>::new(&database_url);
    Pool::builder()
        .max_size(10)
        .build(manager)
        .context("Failed to create database connection pool")
}

fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut conn = pool.get().context("Failed to get database connection")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    if applied.is_empty() {
        info!("Database schema is up to date");
    } else {
        for version in &applied {
            info!(%version, "Applied migration");
        }
    }
    Ok(())
}

async fn run_web(
    interface: String,
    port: u16,
    metrics_port: Option<u16>,
    skip_migrations: bool,
) -> Result<()> {
    let pool = create_pool()?;
    if !skip_migrations {
        let migration_pool = pool.clone();
        tokio::task::spawn_blocking(move || run_migrations(&migration_pool)).await??;
    }

    let polar = match PolarConfig::from_env() {
        Ok(config) => {
            info!(?config, "Polar webhooks enabled");
            Some(Arc::new(config))
        }
        Err(e) => {
            warn!(error = %e, "Polar webhooks disabled");
            None
        }
    };

    let jwt = match JwtService::from_env() {
        Ok(service) => Some(Arc::new(service)),
        Err(e) => {
            warn!(error = %e, "Authenticated routes disabled");
            None
        }
    };

    if let Some(metrics_port) = metrics_port {
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_port).await {
                warn!(error = %e, "Metrics server stopped");
            }
        });
    }

    web::start_web_server(interface, port, AppState { pool, polar, jwt }).await
}

fn classify_spam(score: i32) -> Result<()> {
    let indicator = SpamIndicator::from_score(Some(score))?;
    let tier = indicator
        .tier()
        .context("an assessed score always has a tier")?;
    println!("score:   {}", score);
    println!("tier:    {:?}", tier);
    println!("is_spam: {}", indicator.is_spam());
    match indicator.badge() {
        Some(badge) => println!("badge:   {}", badge),
        None => println!("badge:   (none)"),
    }
    Ok(())
}

fn map_product(product_id: &str, interval: Option<&str>) -> Result<()> {
    let catalog = ProductCatalog::load_default()?;
    let (tier, mismatch) = TierMapper::new(&catalog).resolve_tier(product_id);
    let limits = tier.limits();

    println!("config:                  {}", billing_config_path().display());
    println!("product:                 {}", product_id);
    println!("tier:                    {}", tier);
    println!("max_workspaces:          {}", limits.max_workspaces);
    println!("max_repos_per_workspace: {}", limits.max_repos_per_workspace);
    if let Some(interval) = interval {
        match BillingCycle::from_interval(interval) {
            Some(cycle) => println!("billing_cycle:           {:?}", cycle),
            None => println!("billing_cycle:           (none for {:?})", interval),
        }
    }
    if mismatch.is_some() {
        println!("warning: product is not in the catalog, falling back to free");
    }
    Ok(())
}

fn write_billing_config(output: Option<PathBuf>, force: bool) -> Result<()> {
    let path = output.unwrap_or_else(billing_config_path);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }

    let catalog = ProductCatalog::from_env()?;
    if catalog.is_empty() {
        warn!("No POLAR_PRODUCT_ID_* products set, writing an empty catalog");
    }
    catalog.to_config_file().save(&path)?;
    info!(products = catalog.len(), path = %path.display(), "Wrote billing config");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let env = telemetry::environment();
    let _sentry_guard = telemetry::init_sentry(&env);
    telemetry::init_tracing()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Web {
            interface,
            port,
            metrics_port,
            skip_migrations,
        } => run_web(interface, port, metrics_port, skip_migrations).await,
        Commands::Migrate => {
            let pool = create_pool()?;
            tokio::task::spawn_blocking(move || run_migrations(&pool)).await?
        }
        Commands::ClassifySpam { score } => classify_spam(score),
        Commands::MapProduct {
            product_id,
            interval,
        } => map_product(&product_id, interval.as_deref()),
        Commands::WriteBillingConfig { output, force } => write_billing_config(output, force),
    }
}
