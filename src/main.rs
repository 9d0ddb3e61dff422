use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use star_predictor::api;
use star_predictor::collector;
use star_predictor::config::Config;
use star_predictor::features::{self, FeatureSet, FeatureTable};
use star_predictor::github::{GithubClient, OfflineCommits};
use star_predictor::model::{self, TrainOptions};
use star_predictor::state::AppState;
use star_predictor::worker::{RemoteWorker, WorkerPool};

/// Predict GitHub star counts from repository metadata
#[derive(Parser)]
#[command(name = "star-predictor")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download repository search pages from GitHub
    Collect {
        /// Search query
        #[arg(short, long)]
        query: Option<String>,

        /// Number of pages to fetch
        #[arg(short, long)]
        pages: Option<u32>,

        /// Output directory for raw pages
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Turn raw pages into the feature table
    BuildFeatures {
        /// Directory containing repos_page_*.json
        #[arg(short, long)]
        raw_dir: Option<PathBuf>,

        /// Output feature table
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Skip commit lookups (all commit counts are 0)
        #[arg(long)]
        offline: bool,
    },

    /// Fit candidate regressors and save the best one
    Train {
        /// Feature set to train on
        #[arg(short, long, value_enum, default_value = "form")]
        feature_set: FeatureSet,

        /// Input feature table
        #[arg(long)]
        features: Option<PathBuf>,
    },

    /// Run the web service with in-process workers
    Serve {
        /// Number of in-process workers (0 relies on remote workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Run a worker that pulls tasks from a remote broker
    Worker {
        /// Broker base URL
        #[arg(short, long)]
        broker_url: Option<String>,

        /// Model artifact to load
        #[arg(short, long = "model")]
        model_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());

    match cli.command {
        Commands::Collect {
            query,
            pages,
            out_dir,
        } => {
            let client = GithubClient::from_config(&config.github)?;
            let query = query.unwrap_or_else(|| config.collector.query.clone());
            let pages = pages.unwrap_or(config.collector.pages);
            let out_dir = out_dir.unwrap_or_else(|| config.raw_dir());
            let written = collector::collect_pages(
                &client,
                &query,
                pages,
                config.collector.per_page,
                &out_dir,
            )
            .await?;
            tracing::info!(pages = written.len(), "Collection finished");
        }
        Commands::BuildFeatures {
            raw_dir,
            out,
            offline,
        } => {
            let raw_dir = raw_dir.unwrap_or_else(|| config.raw_dir());
            let out = out.unwrap_or_else(|| config.features_path());
            let window = chrono::Duration::days(config.collector.commit_window_days);
            let concurrency = config.collector.commit_fetch_concurrency;

            let (table, report) = if offline {
                features::build_feature_table(&raw_dir, &OfflineCommits, Utc::now(), window, concurrency)
                    .await?
            } else {
                let client = GithubClient::from_config(&config.github)?;
                features::build_feature_table(&raw_dir, &client, Utc::now(), window, concurrency)
                    .await?
            };
            table.save(&out)?;
            tracing::info!(
                pages = report.pages,
                rows = report.rows,
                skipped = report.skipped_items,
                commit_failures = report.commit_failures,
                "Wrote feature table to {}",
                out.display()
            );
        }
        Commands::Train {
            feature_set,
            features,
        } => {
            let path = features.unwrap_or_else(|| config.features_path());
            let table = FeatureTable::load(&path)?;
            let (artifact, report) =
                model::train(&table, feature_set, &TrainOptions::default())?;

            let name = feature_set.name();
            let artifact_path = config.artifacts_dir().join(format!("{name}_model.json"));
            let metrics_path = config.metrics_dir().join(format!("{name}_metrics.json"));
            artifact.save(&artifact_path)?;
            report.save(&metrics_path)?;
            tracing::info!(
                best = %report.best,
                test_r2 = artifact.metrics.test_r2,
                "Saved model to {}",
                artifact_path.display()
            );
        }
        Commands::Serve { workers } => {
            let workers = workers.unwrap_or(config.serving.local_workers);
            serve(config, workers).await?;
        }
        Commands::Worker {
            broker_url,
            model_path,
        } => {
            let broker_url = broker_url.unwrap_or_else(|| config.broker.url.clone());
            let path = model_path.unwrap_or_else(|| config.serving.form_model_path.clone());
            let predictor = model::load_shared(&path)?;
            let worker = RemoteWorker::new(
                &broker_url,
                predictor,
                Duration::from_secs(config.broker.claim_poll_secs),
            )?;
            tokio::select! {
                _ = worker.run() => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("Worker shutting down"),
            }
        }
    }

    Ok(())
}

async fn serve(config: Config, workers: usize) -> Result<()> {
    let state = AppState::from_config(config.clone());

    // The form model is only needed when this process computes predictions.
    let _pool = if workers > 0 {
        let predictor = model::load_shared(&config.serving.form_model_path)
            .context("Form model is required for in-process workers")?;
        let expected = features::FORM_COLUMNS.len();
        if predictor.feature_count() != expected {
            anyhow::bail!(
                "Form model takes {} features, expected {expected}",
                predictor.feature_count()
            );
        }
        Some(WorkerPool::spawn(workers, state.broker.clone(), predictor))
    } else {
        tracing::info!("No local workers; waiting for remote workers on /broker");
        None
    };

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
