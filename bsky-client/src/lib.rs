pub mod api;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

#[cfg(test)]
mod tests;

pub use api::BskyApiClient;
pub use retry::{calculate_delay, get_retry_strategy, RetryConfig, RetryStrategy};

use async_trait::async_trait;
use mindfeed_core::{CoreError, LikedItem, Page, Post};

/// Paginated, cursor-based read access to the user's feeds.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_timeline(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Post>, CoreError>;

    async fn fetch_discovery_feed(
        &self,
        feed_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Post>, CoreError>;

    async fn fetch_actor_likes(
        &self,
        actor_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<LikedItem>, CoreError>;
}

#[async_trait]
impl FeedSource for BskyApiClient {
    async fn fetch_timeline(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Post>, CoreError> {
        let response = self.get_timeline(cursor, limit).await?;
        Ok(response.into_page(api::FeedViewPost::to_post))
    }

    async fn fetch_discovery_feed(
        &self,
        feed_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Post>, CoreError> {
        let response = self.get_feed(feed_id, cursor, limit).await?;
        Ok(response.into_page(api::FeedViewPost::to_post))
    }

    async fn fetch_actor_likes(
        &self,
        actor_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<LikedItem>, CoreError> {
        let response = self.get_actor_likes(actor_id, cursor, limit).await?;
        Ok(response.into_page(api::FeedViewPost::to_liked_item))
    }
}
