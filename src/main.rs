//! cabinet - back-office server and admin CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use cabinet::api::{self, AppState};
use cabinet::config::Config;
use cabinet::export::{self, ExportKind, Period};
use cabinet::settings::Settings;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

/// cabinet - timesheets, invoicing and office tools for small firms
#[derive(Parser, Debug)]
#[command(name = "cabinet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the settings file (defaults to $CABINET_CONFIG or ./cabinet.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API until interrupted
    Serve,

    /// Apply pending database migrations and exit
    Migrate,

    /// Create a tenant with its first admin and print the admin's token
    Bootstrap {
        /// Cabinet legal name
        #[arg(long)]
        name: String,

        /// Admin email
        #[arg(long)]
        email: String,

        /// Admin display name (defaults to the email's local part)
        #[arg(long)]
        display_name: Option<String>,
    },

    /// Issue a fresh API token for an existing profile
    Token {
        #[arg(long)]
        email: String,
    },

    /// Write a CSV export for one tenant
    Export {
        #[arg(long)]
        tenant: Uuid,

        /// timesheet, sales-journal, expenses or purchases
        #[arg(long)]
        kind: String,

        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check sequence numbers and hash links of the audit log
    AuditVerify {
        /// Audit file (defaults to the configured path)
        path: Option<PathBuf>,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter.as_str()));
    let json = config.log.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings_path = cli.config.unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&settings_path).context("Failed to load settings")?;
    let config = Config::resolve(&settings).context("Invalid configuration")?;
    init_tracing(&config);

    if let Commands::AuditVerify { path } = &cli.command {
        let path = path.clone().unwrap_or_else(|| config.audit.path.clone());
        let report = cabinet::audit::verify(&path)?;
        println!(
            "{}: {} events, {} hashed, chain intact",
            path.display(),
            report.events,
            report.hashed
        );
        return Ok(());
    }
    cabinet::audit::init(&config.audit).with_context(|| {
        format!(
            "Cannot resume audit log {}; run `cabinet audit-verify` and repair or move it",
            config.audit.path.display()
        )
    })?;

    let db = cabinet::db::connect_from_config(&config.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;

    match cli.command {
        Commands::Serve => serve(db, &config).await,
        Commands::Migrate => {
            // connect_from_config already migrated.
            tracing::info!(path = %config.database.path.display(), "Database is up to date");
            Ok(())
        }
        Commands::Bootstrap {
            name,
            email,
            display_name,
        } => {
            if name.trim().is_empty() || !email.contains('@') {
                bail!("--name must not be empty and --email must be an email address");
            }
            let created = cabinet::auth::bootstrap_tenant(
                db.as_ref(),
                &name,
                &email,
                display_name.as_deref(),
                &config.defaults,
            )
            .await
            .context("Failed to bootstrap tenant")?;
            println!("tenant_id: {}", created.tenant.id);
            println!("slug:      {}", created.tenant.slug);
            println!("admin:     {} ({})", created.admin.email, created.admin.id);
            println!("token:     {}", created.token);
            Ok(())
        }
        Commands::Token { email } => {
            let email = email.trim().to_lowercase();
            let profile = db
                .get_profile_by_email(&email)
                .await?
                .with_context(|| format!("No profile with email {email}"))?;
            let token = cabinet::auth::issue_token(db.as_ref(), profile.id).await?;
            println!("{token}");
            Ok(())
        }
        Commands::AuditVerify { .. } => Ok(()),
        Commands::Export {
            tenant,
            kind,
            from,
            to,
            output,
        } => {
            let kind = ExportKind::from_name(&kind)?;
            let csv = export::export(
                db.as_ref(),
                tenant,
                kind,
                Period { from, to },
                &config.export,
            )
            .await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "Export written");
                }
                None => print!("{csv}"),
            }
            Ok(())
        }
    }
}

async fn serve(db: Arc<dyn cabinet::db::Database>, config: &Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(db, config));
    let addr = api::start_server(config.server.bind, state.clone(), &config.server.allowed_origins)
        .await?;
    tracing::info!(%addr, "cabinet ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    state.shutdown().await;
    Ok(())
}
