pub mod codec;
pub mod memory;
pub mod ranking;

#[cfg(test)]
mod tests;

pub use memory::MemoryStore;
pub use ranking::rank_with_jitter;

use async_trait::async_trait;
use chrono::Utc;
use codec::{decode_embedding, encode_embedding};
use mindfeed_core::{CandidatePost, CoreError, DatabaseError, LikeVector, RunStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const LAST_RUN_STATUS_KEY: &str = "last_run_status";
pub const LAST_RUN_AT_KEY: &str = "last_run_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    LikeVectors,
    Candidates,
}

impl Table {
    fn name(&self) -> &'static str {
        match self {
            Table::LikeVectors => "like_vectors",
            Table::Candidates => "candidate_posts",
        }
    }
}

/// Local persistence for the taste profile and the scored snapshot.
///
/// One writer at a time; readers may query while a run is writing.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn put_candidate(&self, post: &CandidatePost) -> Result<(), CoreError>;

    /// Insert-or-ignore by `uri`. Returns the number of rows written.
    async fn put_candidates(&self, posts: &[CandidatePost]) -> Result<usize, CoreError>;

    async fn remove_all(&self, table: Table) -> Result<u64, CoreError>;

    /// Insert-or-ignore by `uri`. Returns the number of new rows.
    async fn upsert_like_vectors(&self, likes: &[LikeVector]) -> Result<usize, CoreError>;

    async fn all_like_vectors(&self) -> Result<Vec<LikeVector>, CoreError>;

    async fn all_candidates(&self) -> Result<Vec<CandidatePost>, CoreError>;

    async fn count(&self, table: Table) -> Result<u64, CoreError>;

    async fn save_setting(&self, key: &str, value: &str) -> Result<(), CoreError>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// Scored candidates in display order, jittered afresh on every call.
    async fn query_ranked_candidates(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<CandidatePost>, CoreError> {
        let rows = self.all_candidates().await?;
        let mut rng = fastrand::Rng::new();
        Ok(rank_with_jitter(rows, &mut rng, limit))
    }
}

/// Truncate-then-refill of the candidate snapshot.
///
/// The table is emptied once in `begin`; batches are appended in call order. Not atomic:
/// a concurrent reader can see an empty or partially filled table.
pub struct CandidateRebuild {
    store: Arc<dyn VectorStore>,
    written: usize,
}

impl CandidateRebuild {
    pub async fn begin(store: Arc<dyn VectorStore>) -> Result<Self, CoreError> {
        let removed = store.remove_all(Table::Candidates).await?;
        debug!("Cleared {} candidates from previous snapshot", removed);
        Ok(Self { store, written: 0 })
    }

    pub async fn write_batch(&mut self, batch: &[CandidatePost]) -> Result<usize, CoreError> {
        let written = self.store.put_candidates(batch).await?;
        self.written += written;
        Ok(written)
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

pub async fn record_run_status(
    store: &dyn VectorStore,
    status: RunStatus,
    at: i64,
) -> Result<(), CoreError> {
    store.save_setting(LAST_RUN_STATUS_KEY, status.as_str()).await?;
    store.save_setting(LAST_RUN_AT_KEY, &at.to_string()).await
}

pub async fn last_run(store: &dyn VectorStore) -> Result<(RunStatus, Option<i64>), CoreError> {
    let status = store
        .get_setting(LAST_RUN_STATUS_KEY)
        .await?
        .and_then(|raw| RunStatus::parse(&raw))
        .unwrap_or(RunStatus::Pending);
    let at = store
        .get_setting(LAST_RUN_AT_KEY)
        .await?
        .and_then(|raw| raw.parse().ok());
    Ok((status, at))
}

pub struct Database {
    connection_string: String,
    pool: Option<SqlitePool>,
}

impl Database {
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            pool: None,
        }
    }

    /// Opens (creating if needed) the database file in WAL mode.
    pub async fn connect(&mut self) -> Result<(), CoreError> {
        let options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to {}", self.connection_string);
        self.pool = Some(pool);
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(self.pool()?)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        debug!("Migrations applied");
        Ok(())
    }

    pub async fn open(connection_string: &str) -> Result<Self, CoreError> {
        let mut db = Self::new(connection_string.to_string());
        db.connect().await?;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }

    fn pool(&self) -> Result<&SqlitePool, DatabaseError> {
        self.pool.as_ref().ok_or(DatabaseError::NotConnected)
    }

    async fn insert_candidates(&self, posts: &[CandidatePost]) -> Result<usize, DatabaseError> {
        let mut tx = self.pool()?.begin().await?;
        let mut written = 0;
        for post in posts {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO candidate_posts \
                 (uri, text, embedding, author_id, created_at, score) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&post.uri)
            .bind(&post.text)
            .bind(encode_embedding(&post.embedding))
            .bind(&post.author_id)
            .bind(post.created_at)
            .bind(post.score)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn insert_likes(&self, likes: &[LikeVector]) -> Result<usize, DatabaseError> {
        let mut tx = self.pool()?.begin().await?;
        let mut inserted = 0;
        for like in likes {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO like_vectors (uri, cid, created_at, embedding) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&like.uri)
            .bind(&like.cid)
            .bind(like.created_at)
            .bind(encode_embedding(&like.embedding))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn fetch_likes(&self) -> Result<Vec<LikeVector>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, uri, cid, created_at, embedding FROM like_vectors ORDER BY id",
        )
        .fetch_all(self.pool()?)
        .await?;
        rows.iter().map(like_from_row).collect()
    }

    async fn fetch_candidates(&self) -> Result<Vec<CandidatePost>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, uri, text, embedding, author_id, created_at, score \
             FROM candidate_posts ORDER BY id",
        )
        .fetch_all(self.pool()?)
        .await?;
        rows.iter().map(candidate_from_row).collect()
    }

    async fn delete_all(&self, table: Table) -> Result<u64, DatabaseError> {
        let sql = format!("DELETE FROM {}", table.name());
        let result = sqlx::query(&sql).execute(self.pool()?).await?;
        Ok(result.rows_affected())
    }

    async fn count_rows(&self, table: Table) -> Result<u64, DatabaseError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(self.pool()?).await?;
        Ok(count as u64)
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(self.pool()?)
        .await?;
        Ok(())
    }

    async fn read_setting(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool()?)
            .await?;
        Ok(row.map(|r| r.try_get("value")).transpose()?)
    }
}

fn like_from_row(row: &SqliteRow) -> Result<LikeVector, DatabaseError> {
    let uri: String = row.try_get("uri")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(LikeVector {
        id: Some(row.try_get("id")?),
        embedding: decode_embedding(&uri, &blob)?,
        cid: row.try_get("cid")?,
        created_at: row.try_get("created_at")?,
        uri,
    })
}

fn candidate_from_row(row: &SqliteRow) -> Result<CandidatePost, DatabaseError> {
    let uri: String = row.try_get("uri")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    let score: Option<f64> = row.try_get("score")?;
    Ok(CandidatePost {
        id: Some(row.try_get("id")?),
        embedding: decode_embedding(&uri, &blob)?,
        text: row.try_get("text")?,
        author_id: row.try_get("author_id")?,
        created_at: row.try_get("created_at")?,
        score: score.map(|s| s as f32),
        uri,
    })
}

#[async_trait]
impl VectorStore for Database {
    async fn put_candidate(&self, post: &CandidatePost) -> Result<(), CoreError> {
        self.insert_candidates(std::slice::from_ref(post)).await?;
        Ok(())
    }

    async fn put_candidates(&self, posts: &[CandidatePost]) -> Result<usize, CoreError> {
        Ok(self.insert_candidates(posts).await?)
    }

    async fn remove_all(&self, table: Table) -> Result<u64, CoreError> {
        Ok(self.delete_all(table).await?)
    }

    async fn upsert_like_vectors(&self, likes: &[LikeVector]) -> Result<usize, CoreError> {
        Ok(self.insert_likes(likes).await?)
    }

    async fn all_like_vectors(&self) -> Result<Vec<LikeVector>, CoreError> {
        Ok(self.fetch_likes().await?)
    }

    async fn all_candidates(&self) -> Result<Vec<CandidatePost>, CoreError> {
        Ok(self.fetch_candidates().await?)
    }

    async fn count(&self, table: Table) -> Result<u64, CoreError> {
        Ok(self.count_rows(table).await?)
    }

    async fn save_setting(&self, key: &str, value: &str) -> Result<(), CoreError> {
        Ok(self.upsert_setting(key, value).await?)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.read_setting(key).await?)
    }
}
