use anyhow::{bail, Context};
use background_service::{
    BackgroundService, FailureReason, ProcessMemoryProbe, SyncOrchestrator, SyncOutcome,
    TracingObserver,
};
use bsky_client::BskyApiClient;
use chrono::{TimeZone, Utc};
use clap::Parser;
use database::{last_run, Database, Table, VectorStore};
use embedding_engine::{EmbeddingEngine, ModelAssets};
use mindfeed_core::{AppConfig, StaticSession};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

const DEFAULT_LOG_FILTER: &str =
    "mindfeed=info,background_service=info,bsky_client=info,database=info,embedding_engine=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = cli::Args::parse();
    let config = AppConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    match args.command {
        cli::Command::Sync => sync(&config).await,
        cli::Command::Daemon => daemon(&config).await,
        cli::Command::Feed { limit } => feed(&config, limit.unwrap_or(config.ranking.feed_limit)).await,
        cli::Command::Status => status(&config).await,
        cli::Command::FetchModel => fetch_model(&config).await,
        cli::Command::Reset { likes } => reset(&config, likes).await,
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Database> {
    Database::open(&config.store.database_url)
        .await
        .with_context(|| format!("opening {}", config.store.database_url))
}

/// The orchestrator plus its API client, kept for usage reporting.
async fn build_orchestrator(
    config: &AppConfig,
) -> anyhow::Result<(SyncOrchestrator, Arc<BskyApiClient>)> {
    let store = Arc::new(open_store(config).await?);
    let session = Arc::new(StaticSession::new(config.session.session()));
    let client = Arc::new(BskyApiClient::new(&config.api, session.clone())?);
    let embedder = Arc::new(EmbeddingEngine::from_config(&config.model));

    let orchestrator = SyncOrchestrator::new(client.clone(), embedder, store, session, config)
        .with_observer(Arc::new(TracingObserver::new()))
        .with_memory_probe(Box::new(ProcessMemoryProbe::new()));
    Ok((orchestrator, client))
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            token.cancel();
        }
    });
}

async fn sync(config: &AppConfig) -> anyhow::Result<()> {
    let (orchestrator, client) = build_orchestrator(config).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let outcome = orchestrator.run(&cancel).await;
    client.log_usage().await;

    match outcome {
        SyncOutcome::Success(report) => {
            println!(
                "Scored {} of {} posts against {} likes ({} new) in {:.1}s",
                report.scored,
                report.candidates,
                report.likes,
                report.new_likes,
                report.elapsed.as_secs_f64()
            );
            Ok(())
        }
        SyncOutcome::Retry { reason } => bail!("sync failed, try again later: {}", reason),
        SyncOutcome::Failure(FailureReason::Unauthenticated) => {
            bail!("not signed in: set MINDFEED_DID and MINDFEED_ACCESS_JWT")
        }
        SyncOutcome::Failure(FailureReason::EmbeddingUnavailable) => {
            bail!("embedding model unavailable: run `mindfeed fetch-model`")
        }
        SyncOutcome::Failure(FailureReason::Cancelled) => bail!("sync cancelled"),
    }
}

async fn daemon(config: &AppConfig) -> anyhow::Result<()> {
    let (orchestrator, client) = build_orchestrator(config).await?;
    let service = BackgroundService::new(Arc::new(orchestrator), &config.schedule)?;
    cancel_on_ctrl_c(service.shutdown_token());
    service.start().await?;
    client.log_usage().await;
    Ok(())
}

async fn feed(config: &AppConfig, limit: usize) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let posts = store.query_ranked_candidates(Some(limit)).await?;
    if posts.is_empty() {
        println!("Feed is empty, run `mindfeed sync` first");
        return Ok(());
    }

    for post in posts {
        let text: String = post.text.chars().take(120).collect();
        println!(
            "{:>6.3}  {}\n        {}",
            post.score.unwrap_or_default(),
            post.uri,
            text.replace('\n', " ")
        );
    }
    Ok(())
}

async fn status(config: &AppConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let (status, at) = last_run(&store).await?;
    let when = at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());

    println!("Last run:   {} ({})", status, when);
    println!("Candidates: {}", store.count(Table::Candidates).await?);
    println!("Likes:      {}", store.count(Table::LikeVectors).await?);

    let assets = ModelAssets::from_config(&config.model);
    if !assets.is_complete() {
        println!("Model:      missing {}", assets.missing().join(", "));
    }
    Ok(())
}

async fn fetch_model(config: &AppConfig) -> anyhow::Result<()> {
    let assets = ModelAssets::from_config(&config.model);
    let client = reqwest::Client::builder()
        .user_agent(config.api.user_agent.clone())
        .build()?;
    let fetched = assets.download_missing(&client).await?;
    println!("Model ready ({} files downloaded)", fetched);
    Ok(())
}

async fn reset(config: &AppConfig, likes: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let removed = store.remove_all(Table::Candidates).await?;
    println!("Removed {} candidates", removed);
    if likes {
        let removed = store.remove_all(Table::LikeVectors).await?;
        println!("Removed {} likes", removed);
    }
    Ok(())
}
