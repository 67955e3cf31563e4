// Main entry point for the pipeline worker process

use std::sync::Arc;

use anyhow::{Context, Result};
use pipeline_core::analyzer::Analyzer;
use pipeline_core::generator::Generator;
use pipeline_core::jobs::{
    AnalyzeJobHandler, CrawlJobHandler, GenerateJobHandler, JobConsumer, MatchJobHandler,
};
use pipeline_core::kernel::{embedding_service_from_config, OpenAIClient};
use pipeline_core::matcher::Matcher;
use pipeline_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pipeline_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting content migration pipeline worker");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Wire up external clients
    let openai_api_key = config
        .openai_api_key
        .clone()
        .context("OPENAI_API_KEY must be set")?;
    let ai = Arc::new(OpenAIClient::new(openai_api_key));
    let embedder = embedding_service_from_config(&config)?;

    let analyzer = Arc::new(Analyzer::new(ai.clone(), embedder.clone()));
    let matcher = Arc::new(Matcher::new(embedder.clone()));
    let generator = Arc::new(Generator::new(ai.clone()));

    // One consumer per job type
    let shutdown = CancellationToken::new();
    let consumers = vec![
        tokio::spawn(
            JobConsumer::new(Arc::new(CrawlJobHandler), pool.clone()).run(shutdown.clone()),
        ),
        tokio::spawn(
            JobConsumer::new(Arc::new(AnalyzeJobHandler::new(analyzer)), pool.clone())
                .run(shutdown.clone()),
        ),
        tokio::spawn(
            JobConsumer::new(Arc::new(MatchJobHandler::new(matcher)), pool.clone())
                .run(shutdown.clone()),
        ),
        tokio::spawn(
            JobConsumer::new(Arc::new(GenerateJobHandler::new(generator)), pool.clone())
                .run(shutdown.clone()),
        ),
    ];
    tracing::info!("Job consumers started");

    // Wait for shutdown signal, then let consumers finish their in-flight jobs
    wait_for_signal().await?;
    tracing::info!("Shutdown signal received, stopping consumers");
    shutdown.cancel();

    for consumer in consumers {
        if let Err(e) = consumer.await {
            tracing::error!(error = %e, "Consumer task panicked");
        }
    }

    tracing::info!("Pipeline worker stopped");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
        }
        _ = sigterm.recv() => {}
    }
    Ok(())
}
