use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use vigil_client::{BrowserPool, OpenAiEmbedder, OpenAiLlmClassifier, ReqwestFetcher};
use vigil_core::models::{AlertStatus, NewSite, SiteThresholds};
use vigil_core::schedule::Schedule;
use vigil_core::traits::{Fetcher, MonitorStore, TracingAlertSink};
use vigil_core::{CheckWorkflow, MonitorConfig, Orchestrator};
use vigil_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "vigil", version, about = "Website defacement monitoring engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage monitored sites
    Site {
        #[command(subcommand)]
        action: SiteCommands,
    },

    /// Run the monitoring engine until interrupted
    Run {
        /// Render pages in a headless browser instead of plain HTTP
        #[arg(long, default_value_t = false)]
        browser: bool,

        /// API key for LLM and embedding calls
        #[arg(long, env = "VIGIL_API_KEY")]
        api_key: String,

        /// Chat model used by the LLM classifier
        #[arg(long, env = "VIGIL_LLM_MODEL", default_value = "gpt-4o-mini")]
        llm_model: String,

        /// Embedding model used by the vectorizer
        #[arg(
            long,
            env = "VIGIL_EMBED_MODEL",
            default_value = "text-embedding-3-small"
        )]
        embed_model: String,

        /// OpenAI-compatible API base URL
        #[arg(
            long,
            env = "VIGIL_BASE_URL",
            default_value = "https://api.openai.com/v1"
        )]
        base_url: String,
    },

    /// Run a single immediate check for one site
    Check {
        /// Site ID
        #[arg(value_name = "SITE_ID")]
        id: Uuid,

        /// Render pages in a headless browser instead of plain HTTP
        #[arg(long, default_value_t = false)]
        browser: bool,

        /// API key for LLM and embedding calls
        #[arg(long, env = "VIGIL_API_KEY")]
        api_key: String,

        /// Chat model used by the LLM classifier
        #[arg(long, env = "VIGIL_LLM_MODEL", default_value = "gpt-4o-mini")]
        llm_model: String,

        /// Embedding model used by the vectorizer
        #[arg(
            long,
            env = "VIGIL_EMBED_MODEL",
            default_value = "text-embedding-3-small"
        )]
        embed_model: String,

        /// OpenAI-compatible API base URL
        #[arg(
            long,
            env = "VIGIL_BASE_URL",
            default_value = "https://api.openai.com/v1"
        )]
        base_url: String,
    },

    /// Inspect and adjudicate alerts
    Alerts {
        #[command(subcommand)]
        action: AlertCommands,
    },
}

#[derive(Subcommand)]
enum AlertCommands {
    /// List open alerts
    List {
        /// Filter by site ID
        #[arg(short, long)]
        site: Option<Uuid>,

        /// Number of results to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Mark an alert as confirmed and handled
    Resolve {
        /// Alert ID
        #[arg(value_name = "ALERT_ID")]
        id: Uuid,
    },

    /// Dismiss an alert as a false positive; feeds the site's
    /// historical confidence factor
    Dismiss {
        /// Alert ID
        #[arg(value_name = "ALERT_ID")]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum SiteCommands {
    /// Register a site for monitoring
    Add {
        /// Target URL
        #[arg(short, long)]
        url: String,

        /// Display name (defaults to the URL)
        #[arg(short, long)]
        name: Option<String>,

        /// Check schedule: interval (e.g. "5m") or five-field cron
        #[arg(short, long, default_value = "5m")]
        schedule: String,

        /// Crawl fanout for linked pages
        #[arg(long, default_value_t = 1)]
        max_depth: u32,

        /// Scheduling priority
        #[arg(long, default_value_t = 0)]
        priority: i32,

        /// Snapshots retained for this site (global default when omitted)
        #[arg(long)]
        keep_scans: Option<u32>,
    },

    /// List registered sites
    List,

    /// Remove a site and all of its data
    Remove {
        /// Site ID
        #[arg(value_name = "SITE_ID")]
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("vigil=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Site { action } => {
            let db = connect_db().await?;
            match action {
                SiteCommands::Add {
                    url,
                    name,
                    schedule,
                    max_depth,
                    priority,
                    keep_scans,
                } => {
                    let schedule =
                        Schedule::parse(&schedule).map_err(|e| anyhow::anyhow!(e))?;
                    let site = NewSite {
                        name: name.unwrap_or_else(|| url.clone()),
                        url,
                        schedule,
                        max_depth,
                        priority,
                        thresholds: SiteThresholds::default(),
                        keep_scans,
                    };
                    let created = db.create_site(site).await.map_err(|e| anyhow::anyhow!(e))?;
                    println!("Registered site: {} ({})", created.id, created.url);
                }

                SiteCommands::List => {
                    let sites = db.list_sites(false).await.map_err(|e| anyhow::anyhow!(e))?;
                    if sites.is_empty() {
                        println!("No sites registered.");
                        return Ok(());
                    }
                    println!(
                        "{:<38} {:<8} {:<12} {:<40}",
                        "ID", "ACTIVE", "SCHEDULE", "URL"
                    );
                    println!("{}", "-".repeat(100));
                    for site in &sites {
                        println!(
                            "{:<38} {:<8} {:<12} {:<40}",
                            site.id,
                            site.active,
                            site.schedule.as_str(),
                            site.url
                        );
                    }
                    println!("\nTotal: {} sites", sites.len());
                }

                SiteCommands::Remove { id } => {
                    db.delete_site(id).await.map_err(|e| anyhow::anyhow!(e))?;
                    println!("Removed site: {id}");
                }
            }
        }

        Commands::Run {
            browser,
            api_key,
            llm_model,
            embed_model,
            base_url,
        } => {
            let db = connect_db().await?;
            let llm = OpenAiLlmClassifier::with_base_url(
                &api_key,
                &llm_model,
                config.classifier.llm_max_tokens,
                &base_url,
            )
            .map_err(|e| anyhow::anyhow!(e))?;
            let embedder = OpenAiEmbedder::with_base_url(
                &api_key,
                &embed_model,
                config.vectorizer.dimension,
                &base_url,
            )
            .map_err(|e| anyhow::anyhow!(e))?;

            if browser {
                let fetcher = BrowserPool::launch(config.browser.clone())
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                run_monitor(fetcher, embedder, llm, db, config).await?;
            } else {
                let ua = config
                    .browser
                    .user_agents
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "Mozilla/5.0 (compatible; Vigil/0.1)".into());
                let fetcher = ReqwestFetcher::new(&ua).map_err(|e| anyhow::anyhow!(e))?;
                run_monitor(fetcher, embedder, llm, db, config).await?;
            }
        }

        Commands::Check {
            id,
            browser,
            api_key,
            llm_model,
            embed_model,
            base_url,
        } => {
            let db = connect_db().await?;
            let site = db
                .get_site(id)
                .await
                .map_err(|e| anyhow::anyhow!(e))?
                .with_context(|| format!("site not found: {id}"))?;

            let llm = OpenAiLlmClassifier::with_base_url(
                &api_key,
                &llm_model,
                config.classifier.llm_max_tokens,
                &base_url,
            )
            .map_err(|e| anyhow::anyhow!(e))?;
            let embedder = OpenAiEmbedder::with_base_url(
                &api_key,
                &embed_model,
                config.vectorizer.dimension,
                &base_url,
            )
            .map_err(|e| anyhow::anyhow!(e))?;

            let outcome = if browser {
                let fetcher = BrowserPool::launch(config.browser.clone())
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                run_single_check(fetcher, embedder, llm, db, config, &site).await?
            } else {
                let ua = config
                    .browser
                    .user_agents
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "Mozilla/5.0 (compatible; Vigil/0.1)".into());
                let fetcher = ReqwestFetcher::new(&ua).map_err(|e| anyhow::anyhow!(e))?;
                run_single_check(fetcher, embedder, llm, db, config, &site).await?
            };

            println!("Check {} for {}", outcome.execution_id, site.url);
            println!("  Change:   {:?}", outcome.change);
            println!("  Verdict:  {:?}", outcome.verdict);
            println!("  Alerts:   {}", outcome.alerts_emitted);
            for record in &outcome.report.steps {
                println!(
                    "  {:<10} {:?} ({} ms)",
                    record.step.name(),
                    record.status,
                    record.elapsed.as_millis()
                );
            }
        }

        Commands::Alerts { action } => {
            let db = connect_db().await?;
            match action {
                AlertCommands::List { site, limit } => {
                    let alerts = db
                        .open_alerts(site, limit)
                        .await
                        .map_err(|e| anyhow::anyhow!(e))?;
                    if alerts.is_empty() {
                        println!("No open alerts.");
                        return Ok(());
                    }
                    println!(
                        "{:<38} {:<12} {:<10} {:<40}",
                        "ID", "KIND", "SEVERITY", "TITLE"
                    );
                    println!("{}", "-".repeat(100));
                    for alert in &alerts {
                        println!(
                            "{:<38} {:<12} {:<10} {:<40}",
                            alert.id, alert.kind, alert.severity, alert.title
                        );
                    }
                    println!("\nTotal: {} open alerts", alerts.len());
                }

                AlertCommands::Resolve { id } => {
                    db.alerts()
                        .update_status(id, AlertStatus::Resolved)
                        .await
                        .map_err(|e| anyhow::anyhow!(e))?;
                    println!("Resolved alert: {id}");
                }

                AlertCommands::Dismiss { id } => {
                    db.alerts()
                        .update_status(id, AlertStatus::FalsePositive)
                        .await
                        .map_err(|e| anyhow::anyhow!(e))?;
                    println!("Dismissed alert as false positive: {id}");
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<MonitorConfig> {
    match path {
        Some(p) => MonitorConfig::from_file(p).map_err(|e| anyhow::anyhow!(e)),
        None => Ok(MonitorConfig::default()),
    }
}

/// Connect to PostgreSQL and run migrations.
async fn connect_db() -> Result<Database> {
    let db_config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&db_config)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

/// Start the orchestrator and run until ctrl-c.
async fn run_monitor<F>(
    fetcher: F,
    embedder: OpenAiEmbedder,
    llm: OpenAiLlmClassifier,
    db: Database,
    config: MonitorConfig,
) -> Result<()>
where
    F: Fetcher + 'static,
{
    let workflow = CheckWorkflow::new(
        fetcher,
        embedder,
        llm,
        db.clone(),
        TracingAlertSink,
        config.clone(),
    )
    .map_err(|e| anyhow::anyhow!(e))?;

    let mut orchestrator = Orchestrator::new(workflow, db, config);
    orchestrator.start().await.map_err(|e| anyhow::anyhow!(e))?;

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown signal received");
    orchestrator.stop().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

/// Run one workflow directly, outside the scheduler.
async fn run_single_check<F>(
    fetcher: F,
    embedder: OpenAiEmbedder,
    llm: OpenAiLlmClassifier,
    db: Database,
    config: MonitorConfig,
    site: &vigil_core::Site,
) -> Result<vigil_core::CheckOutcome>
where
    F: Fetcher + 'static,
{
    let workflow = CheckWorkflow::new(fetcher, embedder, llm, db, TracingAlertSink, config)
        .map_err(|e| anyhow::anyhow!(e))?;
    workflow.run(site, 0).await.map_err(|e| anyhow::anyhow!(e))
}
