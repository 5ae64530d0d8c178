use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use nutri_scan::config::AppConfig;
use nutri_scan::db::{self, PgAnalysisStore};
use nutri_scan::notifications::ProgressHub;
use nutri_scan::observability::{self, ReadinessChecks};
use nutri_scan::store::{AnalysisStore, InMemoryAnalysisStore};
use nutri_scan::{AnalysisService, ImageInput};

/// Nutrition label analysis from the command line
#[derive(Parser, Debug)]
#[command(name = "nutri-scan")]
#[command(about = "Read a nutrition label photo, score it and keep the history")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a label image and store the result
    Analyze {
        #[arg(short, long)]
        user: i64,
        image: PathBuf,
    },
    /// List stored analyses, newest first
    History {
        #[arg(short, long)]
        user: i64,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show one stored analysis
    Show {
        #[arg(short, long)]
        user: i64,
        analysis_id: i64,
    },
    /// Delete a stored analysis and its image
    Delete {
        #[arg(short, long)]
        user: i64,
        analysis_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // Tracing goes first so the database setup below is logged
    let metrics_handle = observability::init_observability_with_config(&config.observability)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    info!("{}", config.summary());

    let pool = match &config.database.url {
        Some(_) => {
            let pool = db::connect(&config.database).await?;
            db::init_database_schema(&pool).await?;
            Some(pool)
        }
        None => None,
    };

    observability::serve_metrics_if_enabled(
        &config.observability,
        metrics_handle,
        ReadinessChecks {
            db_pool: pool.clone(),
            ocr_languages: Some(config.ocr.languages.clone()),
        },
    )
    .await?;

    let store: Arc<dyn AnalysisStore> = match pool {
        Some(pool) => Arc::new(PgAnalysisStore::new(pool)),
        None => {
            info!("DATABASE_URL not set, analyses are kept in memory for this run only");
            Arc::new(InMemoryAnalysisStore::new())
        }
    };
    let hub = Arc::new(ProgressHub::new(config.pipeline.event_channel_capacity));
    let service = AnalysisService::from_config(&config, store, hub.clone());

    match cli.command {
        Command::Analyze { user, image } => {
            let data = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let original_name = image
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());

            let mut events = hub.subscribe(user);
            let printer = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            if let Ok(line) = serde_json::to_string(&event) {
                                eprintln!("{line}");
                            }
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            let result = service
                .run_analysis(
                    user,
                    ImageInput::Bytes {
                        data,
                        original_name,
                    },
                )
                .await;

            // Let the printer drain what was already published
            drop(service);
            drop(hub);
            let _ = printer.await;

            print_json(&result?)?;
        }
        Command::History { user, page, limit } => {
            let history = service.history(user, page, limit).await?;
            print_json(&history)?;
        }
        Command::Show { user, analysis_id } => {
            let analysis = service
                .get_analysis(analysis_id, user)
                .await?
                .with_context(|| format!("Analysis {analysis_id} not found"))?;
            print_json(&analysis)?;
        }
        Command::Delete { user, analysis_id } => {
            let deleted = service.delete_analysis(analysis_id, user).await?;
            print_json(&serde_json::json!({ "id": analysis_id, "deleted": deleted }))?;
        }
    }

    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode output")?
    );
    Ok(())
}
