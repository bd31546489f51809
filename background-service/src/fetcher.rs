use crate::pagination::{retry_page, PageLimits, Pagination, StopReason};
use crate::progress::{percent_of, ProgressReporter, SyncStage};
use crate::resources::ResourceGovernor;
use bsky_client::{FeedSource, RetryConfig};
use mindfeed_core::{CoreError, Page, Post, SyncConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Timeline,
    Discovery,
}

impl FeedKind {
    fn stage(&self) -> SyncStage {
        match self {
            FeedKind::Timeline => SyncStage::FetchingTimeline,
            FeedKind::Discovery => SyncStage::FetchingDiscovery,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FeedKind::Timeline => "timeline",
            FeedKind::Discovery => "discovery feed",
        }
    }
}

/// How many posts to pull from each feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTargets {
    pub timeline: usize,
    pub discovery: usize,
}

impl FetchTargets {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            timeline: config.timeline_target,
            discovery: config.discovery_target,
        }
    }
}

/// Collects the candidate pool from the timeline and one discovery feed.
pub struct FeedFetcher {
    source: Arc<dyn FeedSource>,
    governor: Arc<ResourceGovernor>,
    discovery_feed: String,
    page_size: u32,
    max_pages: usize,
    retry: RetryConfig,
}

impl FeedFetcher {
    pub fn new(
        source: Arc<dyn FeedSource>,
        governor: Arc<ResourceGovernor>,
        discovery_feed: impl Into<String>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            source,
            governor,
            discovery_feed: discovery_feed.into(),
            page_size: config.page_size,
            max_pages: config.max_feed_pages,
            retry: RetryConfig::fixed(
                config.retry_attempts,
                Duration::from_millis(config.retry_delay_ms),
            ),
        }
    }

    /// Timeline without replies, followed by the discovery feed, unique by uri.
    ///
    /// A feed that keeps failing contributes whatever it had collected so far.
    pub async fn fetch(
        &self,
        targets: FetchTargets,
        reporter: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Post>, CoreError> {
        let timeline = self
            .paginate(FeedKind::Timeline, targets.timeline, reporter, cancel)
            .await?;
        let before = timeline.len();
        let timeline: Vec<Post> = timeline.into_iter().filter(|p| !p.is_reply).collect();
        debug!("Dropped {} replies from timeline", before - timeline.len());

        let discovery = self
            .paginate(FeedKind::Discovery, targets.discovery, reporter, cancel)
            .await?;

        let combined = merge_unique(timeline, discovery);
        info!("Collected {} candidate posts", combined.len());
        Ok(combined)
    }

    async fn paginate(
        &self,
        kind: FeedKind,
        target: usize,
        reporter: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Post>, CoreError> {
        reporter.enter(kind.stage(), 0, false);

        let mut pagination = Pagination::new(PageLimits {
            target: Some(target),
            page_size: self.page_size,
            max_pages: self.max_pages,
        });
        let mut posts = Vec::new();

        let stop = loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            if let Some(reason) = pagination.exhausted() {
                break reason;
            }
            if self.governor.under_pressure() {
                break StopReason::MemoryPressure;
            }

            let cursor = pagination.cursor().map(str::to_owned);
            let limit = pagination.request_limit();
            let page = retry_page(&self.retry, cancel, kind.label(), || {
                self.fetch_page(kind, cursor.as_deref(), limit)
            })
            .await?;

            let Some(page) = page else {
                break StopReason::RetriesExhausted;
            };

            let page_len = page.items.len();
            posts.extend(page.items);
            reporter.report(kind.stage(), percent_of(posts.len(), target));

            if let Some(reason) = pagination.advance(page_len, page.next_cursor) {
                break reason;
            }
            self.governor.cooldown(cancel).await?;
        };

        info!(
            "Stopped paging {} after {} pages with {} posts ({:?})",
            kind.label(),
            pagination.pages(),
            posts.len(),
            stop
        );
        reporter.enter(kind.stage(), 100, false);
        Ok(posts)
    }

    async fn fetch_page(
        &self,
        kind: FeedKind,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Post>, CoreError> {
        match kind {
            FeedKind::Timeline => self.source.fetch_timeline(cursor, limit).await,
            FeedKind::Discovery => {
                self.source
                    .fetch_discovery_feed(&self.discovery_feed, cursor, limit)
                    .await
            }
        }
    }
}

/// Concatenates `first` and `second`, keeping the first post seen for each uri.
pub fn merge_unique(first: Vec<Post>, second: Vec<Post>) -> Vec<Post> {
    let mut seen = HashSet::new();
    first
        .into_iter()
        .chain(second)
        .filter(|post| seen.insert(post.uri.clone()))
        .collect()
}
