use crate::pagination::{retry_page, PageLimits, Pagination};
use crate::progress::{percent_of, ProgressReporter, SyncStage};
use crate::resources::ResourceGovernor;
use bsky_client::{FeedSource, RetryConfig};
use database::VectorStore;
use embedding_engine::Embedder;
use mindfeed_core::{CoreError, ErrorExt, LikeVector, LikedItem, SyncConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Taste profile after a harvest.
#[derive(Debug, Clone, Default)]
pub struct Harvest {
    /// Every stored like vector, old and new.
    pub profile: Vec<LikeVector>,
    pub added: usize,
    pub skipped: usize,
}

/// Embeds the user's likes into the store. Already stored likes are never re-embedded.
pub struct LikeHarvester {
    source: Arc<dyn FeedSource>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    governor: Arc<ResourceGovernor>,
    limits: PageLimits,
    persist_batch: usize,
    retry: RetryConfig,
}

impl LikeHarvester {
    pub fn new(
        source: Arc<dyn FeedSource>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        governor: Arc<ResourceGovernor>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            source,
            embedder,
            store,
            governor,
            limits: PageLimits {
                target: None,
                page_size: config.likes_page_size,
                max_pages: config.max_like_pages,
            },
            persist_batch: config.like_persist_batch.max(1),
            retry: RetryConfig::fixed(
                config.retry_attempts,
                Duration::from_millis(config.retry_delay_ms),
            ),
        }
    }

    pub async fn harvest(
        &self,
        actor_id: &str,
        reporter: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Harvest, CoreError> {
        reporter.enter(SyncStage::PullingLikes, 0, false);

        let mut harvest = Harvest {
            profile: self.store.all_like_vectors().await?,
            ..Harvest::default()
        };
        let mut known: HashSet<String> = harvest.profile.iter().map(|l| l.uri.clone()).collect();
        debug!("Taste profile starts with {} likes", known.len());

        let mut pagination = Pagination::new(self.limits);
        let mut pending = Vec::with_capacity(self.persist_batch);

        let outcome = self
            .walk(
                actor_id,
                &mut pagination,
                &mut known,
                &mut pending,
                &mut harvest,
                reporter,
                cancel,
            )
            .await;

        // Whatever was embedded before a stop is kept, cancelled or not
        self.flush(&mut pending, &mut harvest).await?;
        outcome?;

        info!(
            "Taste profile has {} likes ({} new, {} skipped, {} pages)",
            harvest.profile.len(),
            harvest.added,
            harvest.skipped,
            pagination.pages()
        );
        reporter.enter(SyncStage::PullingLikes, 100, false);
        Ok(harvest)
    }

    #[allow(clippy::too_many_arguments)]
    async fn walk(
        &self,
        actor_id: &str,
        pagination: &mut Pagination,
        known: &mut HashSet<String>,
        pending: &mut Vec<LikeVector>,
        harvest: &mut Harvest,
        reporter: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            if let Some(reason) = pagination.exhausted() {
                debug!("Likes pagination stopped: {:?}", reason);
                return Ok(());
            }
            if self.governor.under_pressure() {
                warn!("Stopping likes pagination under memory pressure");
                return Ok(());
            }

            let cursor = pagination.cursor().map(str::to_owned);
            let limit = pagination.request_limit();
            let page = retry_page(&self.retry, cancel, "likes", || {
                self.source
                    .fetch_actor_likes(actor_id, cursor.as_deref(), limit)
            })
            .await?;
            let Some(page) = page else {
                return Ok(());
            };

            let page_len = page.items.len();
            for item in page.items {
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                if known.contains(&item.uri) {
                    continue;
                }
                match self.embed_like(&item).await? {
                    Some(like) => {
                        known.insert(like.uri.clone());
                        pending.push(like);
                        if pending.len() >= self.persist_batch {
                            self.flush(pending, harvest).await?;
                        }
                    }
                    None => harvest.skipped += 1,
                }
            }

            reporter.report(
                SyncStage::PullingLikes,
                percent_of(pagination.pages() + 1, self.limits.max_pages),
            );
            if let Some(reason) = pagination.advance(page_len, page.next_cursor) {
                debug!("Likes pagination stopped: {:?}", reason);
                return Ok(());
            }
            self.governor.cooldown(cancel).await?;
        }
    }

    /// `Ok(None)` for an item that should be skipped.
    async fn embed_like(&self, item: &LikedItem) -> Result<Option<LikeVector>, CoreError> {
        if item.text.trim().is_empty() {
            warn!("Skipping like {} with no text", item.uri);
            return Ok(None);
        }

        match self.embedder.encode(&item.text).await {
            Ok(embedding) => Ok(Some(LikeVector {
                id: None,
                uri: item.uri.clone(),
                cid: item.cid.clone(),
                created_at: item.created_at,
                embedding,
            })),
            Err(e) if e.is_cancelled() || e.is_embedding_unavailable() => Err(e),
            Err(e) => {
                warn!("Skipping like {}: {}", item.uri, e.user_friendly_message());
                Ok(None)
            }
        }
    }

    async fn flush(
        &self,
        pending: &mut Vec<LikeVector>,
        harvest: &mut Harvest,
    ) -> Result<(), CoreError> {
        if pending.is_empty() {
            return Ok(());
        }
        let inserted = self.store.upsert_like_vectors(pending).await?;
        debug!("Persisted {} like vectors", inserted);
        harvest.added += inserted;
        harvest.profile.append(pending);
        Ok(())
    }
}
