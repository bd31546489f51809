use crate::metrics::{ApiMetrics, MetricsCollector, RequestMetrics};
use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use chrono::{DateTime, Utc};
use mindfeed_core::{
    ApiConfig, ConfigError, CoreError, FeedApiError, LikedItem, Page, Post, SessionProvider,
};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

pub const TIMELINE_ENDPOINT: &str = "app.bsky.feed.getTimeline";
pub const FEED_ENDPOINT: &str = "app.bsky.feed.getFeed";
pub const ACTOR_LIKES_ENDPOINT: &str = "app.bsky.feed.getActorLikes";

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub feed: Vec<FeedViewPost>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedViewPost {
    pub post: PostView,
    /// Present when the timeline shows this post as part of a thread.
    #[serde(default)]
    pub reply: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: AuthorView,
    pub record: serde_json::Value,
    #[serde(default)]
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorView {
    pub did: String,
    #[serde(default)]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    pub created_at: String,
    #[serde(default)]
    pub reply: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XrpcErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

impl PostView {
    fn decode_record(&self) -> Result<PostRecord, FeedApiError> {
        if !self.record.is_object() {
            return Err(FeedApiError::MalformedRecord {
                uri: self.uri.clone(),
                details: "record is not an object".to_string(),
            });
        }
        serde_json::from_value(self.record.clone()).map_err(|e| FeedApiError::MalformedRecord {
            uri: self.uri.clone(),
            details: e.to_string(),
        })
    }

    fn created_at(&self, record: &PostRecord) -> Result<i64, FeedApiError> {
        parse_timestamp(&record.created_at).ok_or_else(|| FeedApiError::MalformedRecord {
            uri: self.uri.clone(),
            details: format!("bad createdAt '{}'", record.created_at),
        })
    }
}

impl FeedViewPost {
    pub fn to_post(&self) -> Result<Post, FeedApiError> {
        let record = self.post.decode_record()?;
        let created_at = self.post.created_at(&record)?;
        Ok(Post {
            uri: self.post.uri.clone(),
            author_id: self.post.author.did.clone(),
            is_reply: self.reply.is_some() || record.reply.is_some(),
            text: record.text,
            created_at,
        })
    }

    pub fn to_liked_item(&self) -> Result<LikedItem, FeedApiError> {
        let record = self.post.decode_record()?;
        let created_at = self.post.created_at(&record)?;
        Ok(LikedItem {
            uri: self.post.uri.clone(),
            cid: self.post.cid.clone(),
            text: record.text,
            created_at,
        })
    }
}

impl FeedResponse {
    /// Converts the raw feed into a page, dropping items whose record cannot be decoded.
    pub fn into_page<T>(self, convert: impl Fn(&FeedViewPost) -> Result<T, FeedApiError>) -> Page<T> {
        let mut items = Vec::with_capacity(self.feed.len());
        for item in &self.feed {
            match convert(item) {
                Ok(converted) => items.push(converted),
                Err(e) => warn!("Skipping feed item: {}", e),
            }
        }

        let next_cursor = self.cursor.filter(|c| !c.is_empty());
        Page::new(items, next_cursor)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).timestamp())
        .ok()
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(seconds) = header("retry-after") {
        return seconds.max(0) as u64;
    }
    // AppView sends the reset instant as epoch seconds
    if let Some(reset_at) = header("ratelimit-reset") {
        return (reset_at - Utc::now().timestamp()).max(1) as u64;
    }
    DEFAULT_RETRY_AFTER_SECS
}

/// Maps a non-success XRPC status to the feed error taxonomy.
pub fn map_status_error(
    status: StatusCode,
    endpoint: &str,
    retry_after: u64,
    body: &XrpcErrorBody,
) -> FeedApiError {
    let code = body.error.as_deref().unwrap_or_default();
    match status.as_u16() {
        429 => FeedApiError::RateLimitExceeded { retry_after },
        401 => FeedApiError::InvalidToken,
        400 if code == "ExpiredToken" || code == "InvalidToken" => FeedApiError::InvalidToken,
        400 if code == "UnknownFeed" => FeedApiError::FeedNotFound {
            feed: body.message.clone().unwrap_or_else(|| endpoint.to_string()),
        },
        403 => FeedApiError::Forbidden {
            resource: endpoint.to_string(),
        },
        404 => FeedApiError::InvalidResponse {
            details: format!("{} not found", endpoint),
        },
        s if status.is_server_error() => FeedApiError::ServerError { status_code: s },
        s => FeedApiError::InvalidResponse {
            details: format!(
                "{} returned {}: {}",
                endpoint,
                s,
                body.message.as_deref().unwrap_or(code)
            ),
        },
    }
}

fn error_kind(error: &CoreError) -> &'static str {
    match error {
        CoreError::FeedApi(FeedApiError::RateLimitExceeded { .. }) => "rate_limited",
        CoreError::FeedApi(FeedApiError::InvalidToken) => "unauthorized",
        CoreError::FeedApi(FeedApiError::AuthenticationFailed { .. }) => "no_session",
        CoreError::FeedApi(FeedApiError::Forbidden { .. }) => "forbidden",
        CoreError::FeedApi(FeedApiError::ServerError { .. }) => "server_error",
        CoreError::FeedApi(FeedApiError::RequestTimeout) => "timeout",
        CoreError::Network(_) => "network_error",
        _ => "bad_response",
    }
}

pub struct BskyApiClient {
    http_client: Client,
    base_url: Url,
    rate_limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    session: Arc<dyn SessionProvider>,
}

impl std::fmt::Debug for BskyApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BskyApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl BskyApiClient {
    pub fn new(config: &ApiConfig, session: Arc<dyn SessionProvider>) -> Result<Self, CoreError> {
        let base_url = Url::parse(&config.base_url).map_err(|_| ConfigError::InvalidValue {
            field: "api.base_url".to_string(),
            value: config.base_url.clone(),
        })?;

        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::bluesky_appview())),
            metrics: Arc::new(MetricsCollector::new()),
            session,
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, CoreError> {
        self.base_url
            .join(&format!("/xrpc/{}", endpoint))
            .map_err(|e| CoreError::internal(format!("bad endpoint {}: {}", endpoint, e)))
    }

    pub async fn make_request(
        &self,
        endpoint: &str,
        query_params: &[(&str, String)],
    ) -> Result<Response, CoreError> {
        let session = self.session.current_session().ok_or_else(|| {
            CoreError::FeedApi(FeedApiError::AuthenticationFailed {
                reason: "no active session".to_string(),
            })
        })?;
        let url = self.endpoint_url(endpoint)?;

        let permit = self.rate_limiter.acquire_permit().await?;
        debug!(
            "Requesting {} (queued {:?})",
            endpoint, permit.queue_wait_time
        );

        let start_time = Instant::now();
        let result = self.send(url, &session.access_jwt, endpoint, query_params).await;

        let status_code = match &result {
            Ok(response) => Some(response.status().as_u16()),
            Err(CoreError::FeedApi(FeedApiError::ServerError { status_code })) => Some(*status_code),
            _ => None,
        };
        self.metrics
            .record_request(RequestMetrics {
                endpoint: endpoint.to_string(),
                status_code,
                response_time: start_time.elapsed(),
                success: result.is_ok(),
                rate_limited: matches!(
                    result,
                    Err(CoreError::FeedApi(FeedApiError::RateLimitExceeded { .. }))
                ),
                error_kind: result.as_ref().err().map(error_kind),
            })
            .await;

        result
    }

    async fn send(
        &self,
        url: Url,
        access_jwt: &str,
        endpoint: &str,
        query_params: &[(&str, String)],
    ) -> Result<Response, CoreError> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_jwt)
            .query(query_params)
            .send()
            .await
            .map_err(|e| {
                error!("Network error for {}: {}", endpoint, e);
                if e.is_timeout() {
                    CoreError::FeedApi(FeedApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after_secs(response.headers());
        let body: XrpcErrorBody = response.json().await.unwrap_or_default();
        let api_error = map_status_error(status, endpoint, retry_after, &body);
        warn!("{} failed with {}: {}", endpoint, status, api_error);
        Err(CoreError::FeedApi(api_error))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, String)],
    ) -> Result<T, CoreError> {
        let response = self.make_request(endpoint, query_params).await?;
        response.json().await.map_err(|e| {
            error!("Failed to parse {} response: {}", endpoint, e);
            CoreError::FeedApi(FeedApiError::InvalidResponse {
                details: format!("Failed to parse {} response", endpoint),
            })
        })
    }

    pub async fn get_timeline(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<FeedResponse, CoreError> {
        let mut params = vec![
            ("algorithm", "reverse-chronological".to_string()),
            ("limit", limit.to_string()),
        ];
        push_cursor(&mut params, cursor);
        self.get_json(TIMELINE_ENDPOINT, &params).await
    }

    pub async fn get_feed(
        &self,
        feed_uri: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<FeedResponse, CoreError> {
        let mut params = vec![("feed", feed_uri.to_string()), ("limit", limit.to_string())];
        push_cursor(&mut params, cursor);
        self.get_json(FEED_ENDPOINT, &params).await
    }

    pub async fn get_actor_likes(
        &self,
        actor: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<FeedResponse, CoreError> {
        let mut params = vec![("actor", actor.to_string()), ("limit", limit.to_string())];
        push_cursor(&mut params, cursor);
        self.get_json(ACTOR_LIKES_ENDPOINT, &params).await
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.snapshot().await
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.status().await
    }

    /// Logs request totals and rate-limit headroom; the full breakdown goes out at debug level.
    pub async fn log_usage(&self) {
        let metrics = self.get_metrics().await;
        let limits = self.get_rate_limit_status().await;
        info!("{}", usage_summary(&metrics, &limits));
        if limits.is_near_limit() {
            warn!(
                "Rate limit nearly used up: {} of {} tokens left",
                limits.available_tokens, limits.max_tokens
            );
        }
        match self.metrics.export_json().await {
            Ok(json) => debug!("API metrics: {}", json),
            Err(e) => warn!("Could not export API metrics: {}", e),
        }
    }
}

fn usage_summary(metrics: &ApiMetrics, limits: &RateLimitStatus) -> String {
    format!(
        "API usage: {} requests ({} failed, {} rate limited), avg {} ms, rate limit {:.0}% used",
        metrics.total_requests,
        metrics.failed_requests,
        metrics.rate_limited_requests,
        metrics.average_response_time().as_millis(),
        limits.utilization_percentage()
    )
}

fn push_cursor(params: &mut Vec<(&'static str, String)>, cursor: Option<&str>) {
    if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
        params.push(("cursor", cursor.to_string()));
    }
}
