use crate::fetcher::{FeedFetcher, FetchTargets};
use crate::harvester::LikeHarvester;
use crate::progress::{percent_of, ProgressObserver, ProgressReporter, SyncStage, TracingObserver};
use crate::resources::{MemoryProbe, ProcessMemoryProbe, ResourceGovernor};
use bsky_client::FeedSource;
use chrono::Utc;
use database::{record_run_status, CandidateRebuild, VectorStore};
use embedding_engine::{score_at, Embedder};
use mindfeed_core::{
    AppConfig, CandidatePost, CoreError, ErrorExt, ErrorReporter, FeedApiError, LikeVector,
    Post, RunStatus, ScoringWeights, SessionProvider, SyncConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub candidates: usize,
    pub scored: usize,
    pub skipped: usize,
    pub likes: usize,
    pub new_likes: usize,
    pub elapsed: Duration,
}

/// Why a run ended without a result that retrying would change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No session, or the server rejected it. The user has to sign in again.
    Unauthenticated,
    /// Model assets are missing or unreadable.
    EmbeddingUnavailable,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success(SyncReport),
    /// Transient failure; a later run may succeed.
    Retry { reason: String },
    Failure(FailureReason),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success(_))
    }

    fn from_error(error: &CoreError) -> Self {
        if error.is_cancelled() {
            SyncOutcome::Failure(FailureReason::Cancelled)
        } else if error.is_unauthenticated() {
            SyncOutcome::Failure(FailureReason::Unauthenticated)
        } else if error.is_embedding_unavailable() {
            SyncOutcome::Failure(FailureReason::EmbeddingUnavailable)
        } else {
            SyncOutcome::Retry {
                reason: error.user_friendly_message(),
            }
        }
    }
}

/// One full ingestion run: fetch, harvest likes, embed and score, persist.
pub struct SyncOrchestrator {
    source: Arc<dyn FeedSource>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    session: Arc<dyn SessionProvider>,
    observer: Arc<dyn ProgressObserver>,
    governor: Arc<ResourceGovernor>,
    sync: SyncConfig,
    weights: ScoringWeights,
    discovery_feed: String,
    errors: ErrorReporter,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn FeedSource>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        session: Arc<dyn SessionProvider>,
        config: &AppConfig,
    ) -> Self {
        Self {
            source,
            embedder,
            store,
            session,
            observer: Arc::new(TracingObserver::new()),
            governor: Arc::new(ResourceGovernor::new(
                Box::new(ProcessMemoryProbe::new()),
                &config.sync,
            )),
            sync: config.sync.clone(),
            weights: config.ranking.weights,
            discovery_feed: config.api.discovery_feed.clone(),
            errors: ErrorReporter::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_memory_probe(mut self, probe: Box<dyn MemoryProbe>) -> Self {
        self.governor = Arc::new(ResourceGovernor::new(probe, &self.sync));
        self
    }

    /// Never panics and never returns an error; every failure becomes an outcome.
    pub async fn run(&self, cancel: &CancellationToken) -> SyncOutcome {
        let started = Instant::now();
        let reporter = ProgressReporter::new(
            self.observer.as_ref(),
            Duration::from_millis(self.sync.progress_interval_ms),
        );
        reporter.enter(SyncStage::Starting, 0, false);

        match self.execute(&reporter, cancel, started).await {
            Ok(report) => {
                info!(
                    "Sync finished in {:?}: {} of {} candidates scored against {} likes",
                    report.elapsed, report.scored, report.candidates, report.likes
                );
                reporter.enter(SyncStage::Complete, 100, false);
                SyncOutcome::Success(report)
            }
            Err(error) => {
                let outcome = SyncOutcome::from_error(&error);
                if error.is_cancelled() {
                    info!("Sync cancelled after {:?}", started.elapsed());
                } else {
                    self.errors.report_error(&error);
                    if let Err(e) = record_run_status(
                        self.store.as_ref(),
                        RunStatus::Failed,
                        Utc::now().timestamp(),
                    )
                    .await
                    {
                        warn!("Could not record failed run: {}", e);
                    }
                }
                reporter.enter(SyncStage::Failed, 0, false);
                outcome
            }
        }
    }

    async fn execute(
        &self,
        reporter: &ProgressReporter<'_>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<SyncReport, CoreError> {
        reporter.enter(SyncStage::Connecting, 0, true);
        let session = self.session.current_session().ok_or_else(|| {
            CoreError::FeedApi(FeedApiError::AuthenticationFailed {
                reason: "no session".to_string(),
            })
        })?;
        self.embedder.ensure_ready().await?;
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        record_run_status(self.store.as_ref(), RunStatus::Pending, Utc::now().timestamp()).await?;

        let fetcher = FeedFetcher::new(
            self.source.clone(),
            self.governor.clone(),
            self.discovery_feed.clone(),
            &self.sync,
        );
        let harvester = LikeHarvester::new(
            self.source.clone(),
            self.embedder.clone(),
            self.store.clone(),
            self.governor.clone(),
            &self.sync,
        );

        let (posts, harvest) = tokio::try_join!(
            fetcher.fetch(FetchTargets::from_config(&self.sync), reporter, cancel),
            harvester.harvest(&session.did, reporter, cancel),
        )?;

        let (scored, skipped) = self
            .process(&posts, &harvest.profile, reporter, cancel)
            .await?;

        reporter.enter(SyncStage::UpdatingStore, 0, false);
        record_run_status(
            self.store.as_ref(),
            RunStatus::Succeeded,
            Utc::now().timestamp(),
        )
        .await?;
        reporter.enter(SyncStage::UpdatingStore, 100, false);

        Ok(SyncReport {
            candidates: posts.len(),
            scored,
            skipped: skipped + harvest.skipped,
            likes: harvest.profile.len(),
            new_likes: harvest.added,
            elapsed: started.elapsed(),
        })
    }

    /// Rebuilds the candidate snapshot batch by batch. A cancelled batch is never written.
    async fn process(
        &self,
        posts: &[Post],
        likes: &[LikeVector],
        reporter: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize), CoreError> {
        reporter.enter(SyncStage::ProcessingPosts, 0, posts.is_empty());
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let now = Utc::now().timestamp();
        let mut rebuild = CandidateRebuild::begin(self.store.clone()).await?;
        let mut done = 0;
        let mut skipped = 0;

        for (index, batch) in posts.chunks(self.sync.batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            self.governor.checkpoint(index, cancel).await?;

            let mut scored = Vec::with_capacity(batch.len());
            for post in batch {
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                done += 1;
                if let Some(candidate) = self.score_post(post, likes, now).await? {
                    scored.push(candidate);
                } else {
                    skipped += 1;
                }
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                reporter.report(SyncStage::ProcessingPosts, percent_of(done, posts.len()));
            }

            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let written = rebuild.write_batch(&scored).await?;
            debug!("Batch {}: wrote {} candidates", index, written);
            self.governor.cooldown(cancel).await?;
        }

        Ok((rebuild.written(), skipped))
    }

    /// `Ok(None)` when the post is skipped.
    async fn score_post(
        &self,
        post: &Post,
        likes: &[LikeVector],
        now: i64,
    ) -> Result<Option<CandidatePost>, CoreError> {
        if post.text.trim().is_empty() {
            debug!("Skipping post {} with no text", post.uri);
            return Ok(None);
        }

        let embedding = match self.embedder.encode(&post.text).await {
            Ok(embedding) => embedding,
            Err(e) if e.is_cancelled() || e.is_embedding_unavailable() => return Err(e),
            Err(e) => {
                warn!("Skipping post {}: {}", post.uri, e.user_friendly_message());
                return Ok(None);
            }
        };

        let mut candidate = CandidatePost {
            id: None,
            uri: post.uri.clone(),
            text: post.text.clone(),
            embedding,
            author_id: post.author_id.clone(),
            created_at: post.created_at,
            score: None,
        };
        let score = score_at(&candidate, likes, &self.weights, now);
        if !score.is_finite() {
            warn!("Skipping post {}: score is {}", post.uri, score);
            return Ok(None);
        }
        candidate.score = Some(score);
        Ok(Some(candidate))
    }
}
