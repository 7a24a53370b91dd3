use std::{net::SocketAddr, sync::Arc};

use chrono::{Duration, Utc};
use clap::Parser;
use portcullis::{
    Portcullis, PortcullisBuilder, ProtectionConfig, RouteConfig, SqliteAttemptStore,
    StaticCredentialVerifier,
};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Command line interface for Portcullis
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(
        long,
        global = true,
        env = "PORTCULLIS_DATABASE_URL",
        default_value = "sqlite://portcullis.db?mode=rwc"
    )]
    db_url: String,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(clap::Subcommand)]
enum Commands {
    /// Serve the login endpoint
    Serve(ServeArgs),
    /// Run database migrations
    Migrate,
    /// Show the counters for an account or an address
    Status {
        #[arg(long, required_unless_present = "address")]
        account: Option<String>,
        #[arg(long, conflicts_with = "account")]
        address: Option<String>,
    },
    /// Lift an account lock and reset its counter
    UnlockAccount { account: String },
    /// Lift an address block and reset its counter
    UnblockAddress { address: String },
    /// Print version information
    Version,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "PORTCULLIS_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Take the client address from X-Forwarded-For / X-Real-IP
    #[arg(long, env = "PORTCULLIS_TRUST_FORWARDED_HEADERS")]
    trust_forwarded_headers: bool,

    /// Browser origins allowed to call the API cross-origin
    #[arg(
        long = "allowed-origin",
        env = "PORTCULLIS_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_values = ["http://localhost:3000", "http://localhost:5173"]
    )]
    allowed_origins: Vec<String>,

    /// Demo credentials as email:password, repeatable
    #[arg(long = "user", env = "PORTCULLIS_USERS", value_delimiter = ',')]
    users: Vec<String>,

    #[command(flatten)]
    protection: ProtectionArgs,
}

#[derive(clap::Args)]
struct ProtectionArgs {
    /// Turn protection off entirely
    #[arg(long, env = "PORTCULLIS_DISABLED")]
    disabled: bool,

    #[arg(long, env = "PORTCULLIS_ACCOUNT_THRESHOLD", default_value_t = 5)]
    account_threshold: u32,

    #[arg(long, env = "PORTCULLIS_ACCOUNT_LOCK_MINUTES", default_value_t = 15)]
    account_lock_minutes: i64,

    /// Only count account failures within this many minutes
    #[arg(long, env = "PORTCULLIS_ACCOUNT_WINDOW_MINUTES")]
    account_window_minutes: Option<i64>,

    #[arg(long, env = "PORTCULLIS_ADDRESS_THRESHOLD", default_value_t = 100)]
    address_threshold: u32,

    /// Expire address blocks after this many minutes instead of never
    #[arg(long, env = "PORTCULLIS_ADDRESS_BLOCK_MINUTES")]
    address_block_minutes: Option<i64>,

    /// Only count address failures within this many minutes
    #[arg(long, env = "PORTCULLIS_ADDRESS_WINDOW_MINUTES")]
    address_window_minutes: Option<i64>,

    #[arg(long, env = "PORTCULLIS_RETENTION_DAYS", default_value_t = 7)]
    retention_days: i64,

    #[arg(long, env = "PORTCULLIS_CLEANUP_INTERVAL_SECS", default_value_t = 3600)]
    cleanup_interval_secs: u64,
}

impl ProtectionArgs {
    fn into_config(self) -> Result<ProtectionConfig, BoxError> {
        Ok(ProtectionConfig {
            enabled: !self.disabled,
            account_threshold: self.account_threshold,
            account_lock_duration: minutes("account lock", self.account_lock_minutes)?,
            account_failure_window: self
                .account_window_minutes
                .map(|m| minutes("account window", m))
                .transpose()?,
            address_threshold: self.address_threshold,
            address_block_duration: self
                .address_block_minutes
                .map(|m| minutes("address block", m))
                .transpose()?,
            address_failure_window: self
                .address_window_minutes
                .map(|m| minutes("address window", m))
                .transpose()?,
            retention_period: Duration::try_days(self.retention_days)
                .ok_or_else(|| format!("retention of {} days is out of range", self.retention_days))?,
            cleanup_interval: std::time::Duration::from_secs(self.cleanup_interval_secs),
        })
    }
}

fn minutes(what: &str, value: i64) -> Result<Duration, BoxError> {
    Duration::try_minutes(value)
        .ok_or_else(|| format!("{what} of {value} minutes is out of range").into())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve(&cli.db_url, args).await?,
        Commands::Migrate => {
            println!("Running migrations...");
            open(&cli.db_url, ProtectionConfig::default()).await?;
            println!("Migrations applied");
        }
        Commands::Status { account, address } => {
            let portcullis = open(&cli.db_url, ProtectionConfig::default()).await?;
            let guard = portcullis.guard();
            let status = match (account, address) {
                (Some(account), _) => serde_json::to_value(guard.account_status(&account).await?)?,
                (None, Some(address)) => {
                    serde_json::to_value(guard.address_status(&address).await?)?
                }
                (None, None) => return Err("either --account or --address is required".into()),
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::UnlockAccount { account } => {
            let portcullis = open(&cli.db_url, ProtectionConfig::default()).await?;
            if portcullis.guard().unlock_account(&account, Utc::now()).await? {
                println!("Unlocked {account}");
            } else {
                println!("{account} was not locked");
            }
        }
        Commands::UnblockAddress { address } => {
            let portcullis = open(&cli.db_url, ProtectionConfig::default()).await?;
            if portcullis.guard().unblock_address(&address, Utc::now()).await? {
                println!("Unblocked {address}");
            } else {
                println!("{address} was not blocked");
            }
        }
        Commands::Version => {
            println!("Portcullis v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn open(
    db_url: &str,
    config: ProtectionConfig,
) -> Result<Portcullis<SqliteAttemptStore>, BoxError> {
    let portcullis = PortcullisBuilder::new()
        .with_sqlite(db_url)
        .await?
        .with_config(config)
        .apply_migrations(true)
        .build()
        .await?;
    Ok(portcullis)
}

async fn serve(db_url: &str, args: ServeArgs) -> Result<(), BoxError> {
    let portcullis = open(db_url, args.protection.into_config()?).await?;

    let verifier = StaticCredentialVerifier::from_pairs(&args.users)?;
    if verifier.is_empty() {
        tracing::warn!("No users configured; every login will be rejected");
    }

    let route_config = RouteConfig {
        trust_forwarded_headers: args.trust_forwarded_headers,
        allowed_origins: args.allowed_origins,
    };
    let app = axum::Router::new().nest("/api", portcullis.router(Arc::new(verifier), route_config));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let cleanup = portcullis.start_cleanup_task(shutdown_rx);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        address = %args.bind,
        trust_forwarded_headers = args.trust_forwarded_headers,
        "Listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    })
    .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = cleanup.await {
        tracing::warn!(error = %e, "Cleanup task ended abnormally");
    }

    tracing::info!("Shut down");
    Ok(())
}
