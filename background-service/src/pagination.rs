use crate::resources::pause;
use bsky_client::{calculate_delay, get_retry_strategy, RetryConfig};
use mindfeed_core::{CoreError, ErrorExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EmptyPage,
    TargetReached,
    NoCursor,
    PageCap,
    MemoryPressure,
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    /// Items wanted; `None` pages until the feed runs out or the cap is hit.
    pub target: Option<usize>,
    pub page_size: u32,
    pub max_pages: usize,
}

/// Cursor bookkeeping for one sequential walk through a paged feed.
#[derive(Debug)]
pub struct Pagination {
    limits: PageLimits,
    cursor: Option<String>,
    pages: usize,
    collected: usize,
}

impl Pagination {
    pub fn new(limits: PageLimits) -> Self {
        Self {
            limits,
            cursor: None,
            pages: 0,
            collected: 0,
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn collected(&self) -> usize {
        self.collected
    }

    /// Page size for the next request, shrunk to what the target still needs.
    pub fn request_limit(&self) -> u32 {
        match self.limits.target {
            Some(target) => {
                let remaining = target.saturating_sub(self.collected).max(1);
                (remaining as u32).min(self.limits.page_size)
            }
            None => self.limits.page_size,
        }
    }

    /// Checked before each request.
    pub fn exhausted(&self) -> Option<StopReason> {
        if self.pages >= self.limits.max_pages {
            return Some(StopReason::PageCap);
        }
        match self.limits.target {
            Some(target) if self.collected >= target => Some(StopReason::TargetReached),
            _ => None,
        }
    }

    /// Records a fetched page and says whether pagination should stop.
    pub fn advance(&mut self, page_len: usize, next_cursor: Option<String>) -> Option<StopReason> {
        self.pages += 1;
        if page_len == 0 {
            return Some(StopReason::EmptyPage);
        }
        self.collected += page_len;
        self.cursor = next_cursor.filter(|c| !c.is_empty());
        if self.cursor.is_none() {
            return Some(StopReason::NoCursor);
        }
        self.exhausted()
    }
}

/// Runs `fetch` until it succeeds or the attempts run out.
///
/// Unauthenticated and cancelled errors propagate. Any other exhausted or permanent
/// failure yields `Ok(None)` so the caller keeps what it already has.
pub async fn retry_page<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    mut fetch: F,
) -> Result<Option<T>, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let attempts = config.max_attempts.max(1);
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let error = match fetch().await {
            Ok(value) => return Ok(Some(value)),
            Err(e) if e.is_cancelled() || e.is_unauthenticated() => return Err(e),
            Err(e) => e,
        };

        let strategy = get_retry_strategy(&error);
        let delay = match calculate_delay(&strategy, config) {
            Some(delay) if attempt < attempts => delay,
            _ => {
                warn!(
                    "{}: giving up after attempt {}/{} ({})",
                    label,
                    attempt,
                    attempts,
                    error.error_code()
                );
                error.log_warn();
                return Ok(None);
            }
        };

        debug!(
            "{}: attempt {}/{} failed ({}), retrying in {:?}",
            label, attempt, attempts, error, delay
        );
        pause(delay, cancel).await?;
    }
    Ok(None)
}
