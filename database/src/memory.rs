use crate::{Table, VectorStore};
use async_trait::async_trait;
use mindfeed_core::{CandidatePost, CoreError, LikeVector};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    likes: Vec<LikeVector>,
    candidates: Vec<CandidatePost>,
    settings: HashMap<String, String>,
    next_id: i64,
}

impl MemoryState {
    fn assign_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store with the same insert-or-ignore semantics as the SQLite one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn put_candidate(&self, post: &CandidatePost) -> Result<(), CoreError> {
        self.put_candidates(std::slice::from_ref(post)).await?;
        Ok(())
    }

    async fn put_candidates(&self, posts: &[CandidatePost]) -> Result<usize, CoreError> {
        let mut state = self.state.write().await;
        let mut written = 0;
        for post in posts {
            if state.candidates.iter().any(|c| c.uri == post.uri) {
                continue;
            }
            let id = state.assign_id();
            state.candidates.push(CandidatePost {
                id: Some(id),
                ..post.clone()
            });
            written += 1;
        }
        Ok(written)
    }

    async fn remove_all(&self, table: Table) -> Result<u64, CoreError> {
        let mut state = self.state.write().await;
        let removed = match table {
            Table::LikeVectors => std::mem::take(&mut state.likes).len(),
            Table::Candidates => std::mem::take(&mut state.candidates).len(),
        };
        Ok(removed as u64)
    }

    async fn upsert_like_vectors(&self, likes: &[LikeVector]) -> Result<usize, CoreError> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for like in likes {
            if state.likes.iter().any(|l| l.uri == like.uri) {
                continue;
            }
            let id = state.assign_id();
            state.likes.push(LikeVector {
                id: Some(id),
                ..like.clone()
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn all_like_vectors(&self) -> Result<Vec<LikeVector>, CoreError> {
        Ok(self.state.read().await.likes.clone())
    }

    async fn all_candidates(&self) -> Result<Vec<CandidatePost>, CoreError> {
        Ok(self.state.read().await.candidates.clone())
    }

    async fn count(&self, table: Table) -> Result<u64, CoreError> {
        let state = self.state.read().await;
        let count = match table {
            Table::LikeVectors => state.likes.len(),
            Table::Candidates => state.candidates.len(),
        };
        Ok(count as u64)
    }

    async fn save_setting(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.state
            .write()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.state.read().await.settings.get(key).cloned())
    }
}
