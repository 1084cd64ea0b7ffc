use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use emr_config::secrets::resolve_secrets_for_mode;
use emr_config::{report_unused_keys, ConfigMode, StoreBackend, UnusedKeyPolicy};
use emr_notify::{PreferenceBook, TracingNotifier};
use emr_service::{LifecycleService, ServicePolicy, SweepReport, SystemClock};
use emr_store::PgStore;

#[derive(Parser)]
#[command(name = "emr")]
#[command(about = "Clinic EMR lifecycle CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands (reads EMR_DATABASE_URL)
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> environment -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// One-shot lifecycle sweeps against the configured store
    Jobs {
        #[command(subcommand)]
        cmd: JobsCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum JobsCmd {
    /// Expire every pending update request past its decision deadline.
    ExpireUpdateRequests {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Flag and notify approved appointments due within the reminder lead time.
    SendReminders {
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = emr_store::connect_from_env(emr_store::ENV_DB_URL).await?;
            match cmd {
                DbCmd::Status => {
                    let s = emr_store::status(&pool).await?;
                    println!(
                        "db_ok={} has_appointments_table={}",
                        s.ok, s.has_appointments_table
                    );
                }
                DbCmd::Migrate => {
                    emr_store::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = emr_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Jobs { cmd } => match cmd {
            JobsCmd::ExpireUpdateRequests { config_paths } => {
                let svc = jobs_service(&config_paths).await?;
                let report = svc.sweep_expired_update_requests().await?;
                print_report("expire_update_requests", &report);
            }
            JobsCmd::SendReminders { config_paths } => {
                let svc = jobs_service(&config_paths).await?;
                let report = svc.send_appointment_reminders().await?;
                print_report("send_reminders", &report);
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

type JobsService = LifecycleService<PgStore, TracingNotifier, SystemClock>;

/// Config -> JOBS secrets -> Postgres-backed service.
async fn jobs_service(config_paths: &[String]) -> Result<JobsService> {
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = emr_config::load_layered_yaml(&path_refs)?;
    let settings = loaded.settings()?;

    let unused = report_unused_keys(ConfigMode::Jobs, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "config keys not read by jobs");
    }

    if settings.store_backend != StoreBackend::Postgres {
        bail!(
            "JOBS_REQUIRE_POSTGRES: store backend is '{}'; sweep jobs need /store/backend: postgres",
            settings.store_backend
        );
    }

    let secrets = resolve_secrets_for_mode(&loaded.config_json, ConfigMode::Jobs)?;
    let prefs = PreferenceBook::from_config_json(&loaded.config_json)?;
    let Some(url) = secrets.database_url.as_deref() else {
        bail!("SECRETS_MISSING: {} is not set", secrets.database_url_env);
    };
    let pool = emr_store::connect(url)
        .await
        .with_context(|| format!("connect via {}", secrets.database_url_env))?;

    Ok(LifecycleService::new(
        PgStore::new(pool),
        TracingNotifier::new(prefs),
        SystemClock,
        ServicePolicy::from_settings(&settings),
    ))
}

fn print_report(job: &str, r: &SweepReport) {
    println!("job={job}");
    println!("scanned={}", r.scanned);
    println!("processed={}", r.processed);
    println!("conflicts={}", r.conflicts);
    println!("delivery_failures={}", r.delivery_failures);
}
