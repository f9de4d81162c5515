use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "bks")]
#[command(about = "Booking sync operator CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (repeatable). Env overrides apply last.
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Pull remote clients and appointments into the local store
    Sync {
        #[command(subcommand)]
        cmd: SyncCmd,
    },

    /// Push outbox commands
    Push {
        #[command(subcommand)]
        cmd: PushCmd,
    },

    /// Log reminders for upcoming appointments
    Remind {
        /// daily (all of tomorrow, UTC) | hourly (the next hour)
        #[arg(long)]
        window: String,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum SyncCmd {
    /// One reconcile pass. Ctrl-c stops it between records.
    Run {
        /// Print the full report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Check the remote service through the gateway
    Health,
}

#[derive(Subcommand)]
enum PushCmd {
    /// Push every task due now, then exit
    Drain,
    /// Outbox counts by status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = bks_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = bks_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_clients_table={} has_push_outbox_table={}",
                        s.ok, s.has_clients_table, s.has_push_outbox_table
                    );
                }
                DbCmd::Migrate => {
                    bks_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let (loaded, _) = commands::load_config(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Sync { cmd } => match cmd {
            SyncCmd::Run { json } => commands::sync::run(&cli.config_paths, json).await?,
            SyncCmd::Health => commands::sync::health(&cli.config_paths).await?,
        },

        Commands::Push { cmd } => match cmd {
            PushCmd::Drain => commands::push::drain(&cli.config_paths).await?,
            PushCmd::Status => commands::push::status().await?,
        },

        Commands::Remind { window } => commands::remind::run(&window).await?,
    }

    Ok(())
}

/// Logs go to stderr; stdout carries the `key=value` results.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
