/*
newsforge - command line entry point.
Runs the publishing pipeline for configured users and edits their preferences.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::{init_db_pool, sync_users, Config, PreferenceStore, UserConfigUpdate};
use newsforge::llm;
use newsforge::pipeline::{Pipeline, PipelineOptions};
use newsforge::sources::SourceCatalog;

#[derive(Parser, Debug)]
#[command(name = "newsforge", about = "Collect, enrich, curate and publish a news digest")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline for one user, or every user that is due
    Run {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        skip_email: bool,
        #[arg(long)]
        skip_audio: bool,
        /// Run even when the user's frequency says it is too early
        #[arg(long)]
        force: bool,
    },
    /// Show or edit user preferences
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List the known domains and their feeds
    Domains,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show {
        #[arg(long, default_value = "default")]
        user: String,
    },
    Set(SetArgs),
}

#[derive(ClapArgs, Debug)]
struct SetArgs {
    #[arg(long, default_value = "default")]
    user: String,
    /// Domain key or free-text topic
    #[arg(long)]
    domain: Option<String>,
    #[arg(long)]
    article_count: Option<i64>,
    /// daily, weekly or monthly
    #[arg(long)]
    frequency: Option<String>,
    #[arg(long)]
    llm_filter: Option<bool>,
    /// Comma-separated list, replaces the current recipients
    #[arg(long, value_delimiter = ',')]
    recipients: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    if let Command::Domains = args.command {
        list_domains(&config);
        return Ok(());
    }

    let db_path_abs = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => config.database.path.clone(),
    };
    info!(db_path = %db_path_abs, "resolved DB path");
    let pool = init_db_pool(&db_path_abs).await?;
    let store = PreferenceStore::new(pool);
    store.ensure_schema().await?;
    let seeded = sync_users(&config, &store).await?;
    if seeded > 0 {
        info!("{} configured users synchronized into the preference store", seeded);
    }

    match args.command {
        Command::Run {
            user,
            skip_email,
            skip_audio,
            force,
        } => {
            let options = PipelineOptions {
                skip_email,
                skip_audio,
                ..Default::default()
            };
            run(&config, &store, user, options, force).await
        }
        Command::Config { action } => match action {
            ConfigAction::Show { user } => {
                let prefs = store.get(&user).await?;
                println!("{}", serde_json::to_string_pretty(&prefs)?);
                Ok(())
            }
            ConfigAction::Set(set) => {
                let update = UserConfigUpdate {
                    domain_or_topic: set.domain,
                    article_count: set.article_count,
                    frequency: set.frequency,
                    use_llm_filter: set.llm_filter,
                    recipients: set.recipients,
                };
                let prefs = store.update(&set.user, update).await?;
                info!(user = %set.user, "preferences updated");
                println!("{}", serde_json::to_string_pretty(&prefs)?);
                Ok(())
            }
        },
        Command::Domains => Ok(()),
    }
}

fn list_domains(config: &Config) {
    let catalog = SourceCatalog::with_overrides(&config.sources);
    for (domain, feeds) in catalog.domains() {
        println!("{} ({} feeds)", domain, feeds.len());
        for feed in feeds {
            println!("  {}", feed);
        }
    }
}

async fn run(
    config: &Config,
    store: &PreferenceStore,
    user: Option<String>,
    options: PipelineOptions,
    force: bool,
) -> Result<()> {
    let provider = llm::provider_from_config(config.llm.as_ref()).context("failed to initialize LLM provider")?;
    if provider.is_none() {
        warn!("No LLM configured, running with deterministic fallbacks only");
    }
    let pipeline = Pipeline::from_config(config, provider)?;

    let users: Vec<String> = match user {
        Some(u) => vec![u],
        None if config.users.is_empty() => vec!["default".to_string()],
        None => config.users.iter().map(|u| u.id.clone()).collect(),
    };

    let mut failures = 0;
    for user_id in users {
        let prefs = store.get(&user_id).await?;
        let now = Utc::now();
        if !force && !prefs.is_due(now) {
            info!(user = %user_id, frequency = %prefs.frequency, "not due yet, skipping (use --force)");
            continue;
        }
        match pipeline.run(&user_id, &prefs, &options).await {
            Ok(report) => {
                store.mark_run(&user_id, now).await?;
                if let Some(delivery) = &report.delivery {
                    for (recipient, reason) in &delivery.failed {
                        warn!(user = %user_id, %recipient, %reason, "email not delivered");
                    }
                }
                info!(user = %user_id, selected = report.selected, "run complete");
            }
            Err(e) => {
                failures += 1;
                error!(user = %user_id, "run failed: {:#}", e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} run(s) failed", failures);
    }
    Ok(())
}
