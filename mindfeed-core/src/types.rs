use serde::{Deserialize, Serialize};

/// A post in the scored snapshot. `score` stays `None` until the scorer has run.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePost {
    pub id: Option<i64>,
    pub uri: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub author_id: String,
    pub created_at: i64,
    pub score: Option<f32>,
}

/// One entry of the taste profile, keyed by `uri`.
#[derive(Debug, Clone, PartialEq)]
pub struct LikeVector {
    pub id: Option<i64>,
    pub uri: String,
    pub cid: String,
    pub created_at: i64,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub uri: String,
    pub author_id: String,
    pub text: String,
    pub created_at: i64,
    pub is_reply: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikedItem {
    pub uri: String,
    pub cid: String,
    pub text: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub did: String,
    pub access_jwt: String,
}

/// Source of the signed-in user's credentials. Token storage and refresh live elsewhere.
pub trait SessionProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    session: Option<Session>,
}

impl StaticSession {
    pub fn new(session: Option<Session>) -> Self {
        Self { session }
    }
}

impl SessionProvider for StaticSession {
    fn current_session(&self) -> Option<Session> {
        self.session.clone()
    }
}

/// Only `similarity` and `recency` contribute to the score; the rest are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub similarity: f32,
    pub recency: f32,
    pub engagement: f32,
    pub diversity: f32,
    pub small_creator: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            similarity: 1.0,
            recency: 1.0,
            engagement: 0.5,
            diversity: 0.3,
            small_creator: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RunStatus::Pending),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator does when process memory crosses the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressurePolicy {
    #[default]
    Continue,
    Suspend,
}
