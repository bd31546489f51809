use chrono::Utc;
use mindfeed_core::{CandidatePost, LikeVector, ScoringWeights};

const SECONDS_PER_HOUR: f64 = 3600.0;
const RECENCY_DECAY_HOURS: f64 = 24.0;

/// `dot(a, b) / (|a| * |b|)`. Zero for zero-magnitude or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// `exp(-hours / 24)`: 1.0 at post time, about 0.37 a day later.
pub fn recency(hours_since_post: f64) -> f64 {
    let hours = hours_since_post.max(0.0);
    (-hours / RECENCY_DECAY_HOURS).exp()
}

pub fn hours_since(created_at: i64, now: i64) -> f64 {
    ((now - created_at) as f64 / SECONDS_PER_HOUR).max(0.0)
}

/// Mean similarity against every like vector; zero for an empty profile.
pub fn average_similarity(embedding: &[f32], likes: &[LikeVector]) -> f64 {
    if likes.is_empty() {
        return 0.0;
    }
    let total: f64 = likes
        .iter()
        .map(|like| cosine_similarity(embedding, &like.embedding) as f64)
        .sum();
    total / likes.len() as f64
}

/// Deterministic score for a post as of `now` (epoch seconds).
///
/// Only the similarity and recency weights take part; the other weight fields are reserved.
pub fn score_at(
    post: &CandidatePost,
    likes: &[LikeVector],
    weights: &ScoringWeights,
    now: i64,
) -> f32 {
    let similarity = average_similarity(&post.embedding, likes);
    let recency = recency(hours_since(post.created_at, now));
    (similarity * weights.similarity as f64 + recency * weights.recency as f64) as f32
}

pub fn score(post: &CandidatePost, likes: &[LikeVector], weights: &ScoringWeights) -> f32 {
    score_at(post, likes, weights, Utc::now().timestamp())
}
