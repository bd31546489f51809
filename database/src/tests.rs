use crate::{
    last_run, record_run_status, CandidateRebuild, Database, MemoryStore, Table, VectorStore,
};
use mindfeed_core::{CandidatePost, LikeVector, RunStatus};
use std::env;
use std::sync::Arc;

async fn setup_test_db() -> Database {
    let db_path = env::temp_dir().join(format!("test_mindfeed_{}.db", uuid::Uuid::new_v4()));
    let db_url = format!("sqlite://{}", db_path.display());

    let mut db = Database::new(db_url);
    db.connect()
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    db
}

fn like(uri: &str, embedding: Vec<f32>) -> LikeVector {
    LikeVector {
        id: None,
        uri: uri.to_string(),
        cid: format!("cid-{}", uri),
        created_at: 1_700_000_000,
        embedding,
    }
}

fn candidate(uri: &str, score: Option<f32>) -> CandidatePost {
    CandidatePost {
        id: None,
        uri: uri.to_string(),
        text: format!("text of {}", uri),
        embedding: vec![0.25, -0.5, 1.0],
        author_id: "did:plc:author".to_string(),
        created_at: 1_700_000_100,
        score,
    }
}

async fn stores() -> Vec<(&'static str, Arc<dyn VectorStore>)> {
    vec![
        ("sqlite", Arc::new(setup_test_db().await) as Arc<dyn VectorStore>),
        ("memory", Arc::new(MemoryStore::new()) as Arc<dyn VectorStore>),
    ]
}

#[tokio::test]
async fn test_like_vectors_dedup_by_uri() {
    for (name, store) in stores().await {
        let first = store
            .upsert_like_vectors(&[like("at://a", vec![1.0, 0.0]), like("at://b", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(first, 2, "{}", name);

        let again = store
            .upsert_like_vectors(&[like("at://a", vec![9.0, 9.0]), like("at://c", vec![0.5, 0.5])])
            .await
            .unwrap();
        assert_eq!(again, 1, "{}", name);

        let likes = store.all_like_vectors().await.unwrap();
        assert_eq!(likes.len(), 3, "{}", name);
        let a = likes.iter().find(|l| l.uri == "at://a").unwrap();
        assert_eq!(a.embedding, vec![1.0, 0.0], "{}: first write wins", name);
        assert!(a.id.is_some());
        assert_eq!(store.count(Table::LikeVectors).await.unwrap(), 3);
    }
}

#[tokio::test]
async fn test_candidates_round_trip_and_unique() {
    for (name, store) in stores().await {
        let written = store
            .put_candidates(&[
                candidate("at://1", Some(0.75)),
                candidate("at://2", None),
                candidate("at://1", Some(5.0)),
            ])
            .await
            .unwrap();
        assert_eq!(written, 2, "{}", name);

        store.put_candidate(&candidate("at://3", Some(0.1))).await.unwrap();

        let rows = store.all_candidates().await.unwrap();
        let uris: Vec<_> = rows.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, vec!["at://1", "at://2", "at://3"], "{}", name);
        assert_eq!(rows[0].score, Some(0.75));
        assert_eq!(rows[0].embedding, vec![0.25, -0.5, 1.0]);
        assert_eq!(rows[1].score, None);
    }
}

#[tokio::test]
async fn test_ranked_query_skips_unscored() {
    for (name, store) in stores().await {
        store
            .put_candidates(&[
                candidate("at://low", Some(0.1)),
                candidate("at://none", None),
                candidate("at://high", Some(2.0)),
            ])
            .await
            .unwrap();

        let ranked = store.query_ranked_candidates(None).await.unwrap();
        let uris: Vec<_> = ranked.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, vec!["at://high", "at://low"], "{}", name);

        let top = store.query_ranked_candidates(Some(1)).await.unwrap();
        assert_eq!(top.len(), 1);
    }
}

#[tokio::test]
async fn test_rebuild_replaces_snapshot_but_keeps_likes() {
    for (name, store) in stores().await {
        store.upsert_like_vectors(&[like("at://liked", vec![1.0])]).await.unwrap();
        store
            .put_candidates(&[candidate("at://old-1", Some(1.0)), candidate("at://old-2", Some(1.0))])
            .await
            .unwrap();

        let mut rebuild = CandidateRebuild::begin(store.clone()).await.unwrap();
        assert_eq!(store.count(Table::Candidates).await.unwrap(), 0, "{}", name);

        rebuild.write_batch(&[candidate("at://new-1", Some(0.5))]).await.unwrap();
        rebuild
            .write_batch(&[candidate("at://new-2", Some(0.4)), candidate("at://new-3", Some(0.3))])
            .await
            .unwrap();
        assert_eq!(rebuild.written(), 3);

        let uris: Vec<_> = store
            .all_candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.uri)
            .collect();
        assert_eq!(uris, vec!["at://new-1", "at://new-2", "at://new-3"], "{}", name);
        assert_eq!(store.count(Table::LikeVectors).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_run_status_settings() {
    for (name, store) in stores().await {
        let (status, at) = last_run(store.as_ref()).await.unwrap();
        assert_eq!(status, RunStatus::Pending, "{}", name);
        assert_eq!(at, None);

        record_run_status(store.as_ref(), RunStatus::Succeeded, 1_700_000_500)
            .await
            .unwrap();
        record_run_status(store.as_ref(), RunStatus::Failed, 1_700_000_900)
            .await
            .unwrap();

        let (status, at) = last_run(store.as_ref()).await.unwrap();
        assert_eq!(status, RunStatus::Failed, "{}", name);
        assert_eq!(at, Some(1_700_000_900));
    }
}

#[tokio::test]
async fn test_basic_settings() {
    let db = setup_test_db().await;

    db.save_setting("test_key", "test_value")
        .await
        .expect("Failed to save setting");
    let value = db
        .get_setting("test_key")
        .await
        .expect("Failed to get setting");
    assert_eq!(value, Some("test_value".to_string()));
    assert_eq!(db.get_setting("missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_unconnected_database_errors() {
    let db = Database::new("sqlite://unused.db".to_string());
    let err = db.all_like_vectors().await.unwrap_err();
    assert_eq!(
        mindfeed_core::ErrorExt::error_code(&err),
        "DATABASE".to_string()
    );
}

#[tokio::test]
async fn test_migrations_are_repeatable() {
    let db = setup_test_db().await;
    db.run_migrations().await.expect("second migration run");
    db.close().await;
}
