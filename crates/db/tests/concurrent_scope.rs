use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use tokio::task::JoinSet;

use santa_core::domain::participant::{Participant, UserId};
use santa_core::domain::scope::{Scope, ScopeStatus};
use santa_core::matching::MatchingEngine;
use santa_core::store::{ParticipantStore, StoreError};
use santa_db::{connect_with_settings, migrations, SqlParticipantStore};

async fn file_store() -> (Arc<SqlParticipantStore>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("santa.db").display());
    let pool = connect_with_settings(&url, 8, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    (Arc::new(SqlParticipantStore::new(pool)), dir)
}

fn channel(channel_id: &str) -> Scope {
    Scope::new(None, Some("T1".into()), Some(channel_id.to_string()), 2024)
}

fn participant(scope: &Scope, user: &str) -> Participant {
    Participant::new(
        scope.clone(),
        UserId(user.to_string()),
        format!("{user}-name"),
        format!("{user} Main St"),
        format!("https://hooks.slack.test/{user}"),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enrollments_all_land() {
    let (store, _dir) = file_store().await;
    let scope = channel("C1");
    store.open_scope(&participant(&scope, "U0").as_host()).await.expect("open");

    let mut joins = JoinSet::new();
    for index in 1..=60 {
        let store = Arc::clone(&store);
        let joiner = participant(&scope, &format!("U{index}"));
        joins.spawn(async move { store.enroll(&joiner).await });
    }

    let mut failures = Vec::new();
    while let Some(result) = joins.join_next().await {
        if let Err(error) = result.expect("task") {
            failures.push(error);
        }
    }

    assert!(failures.is_empty(), "enrollments failed: {failures:?}");
    assert_eq!(store.count_all(&scope.key()).await.expect("count"), 61);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initialization_has_one_host() {
    let (store, _dir) = file_store().await;
    let scope = channel("C1");

    let mut joins = JoinSet::new();
    for index in 0..8 {
        let store = Arc::clone(&store);
        let host = participant(&scope, &format!("U{index}")).as_host();
        joins.spawn(async move { store.open_scope(&host).await });
    }

    let (mut opened, mut exists) = (0, 0);
    while let Some(result) = joins.join_next().await {
        match result.expect("task") {
            Ok(()) => opened += 1,
            Err(StoreError::ScopeExists { .. }) => exists += 1,
            Err(error) => panic!("unexpected error: {error:?}"),
        }
    }

    assert_eq!((opened, exists), (1, 7));
    let everyone = store.get_all(&scope.key()).await.expect("all");
    assert_eq!(everyone.len(), 1);
    assert!(everyone[0].is_host);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_randomize_claims_scope_once() {
    let (store, _dir) = file_store().await;
    let scope = channel("C1");
    let key = scope.key();
    store.open_scope(&participant(&scope, "U0").as_host()).await.expect("open");
    store.enroll(&participant(&scope, "U1")).await.expect("enroll");

    let mut joins = JoinSet::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let key = key.clone();
        joins.spawn(async move { store.begin_matching(&key).await });
    }

    let (mut claimed, mut busy) = (0, 0);
    while let Some(result) = joins.join_next().await {
        match result.expect("task") {
            Ok(()) => claimed += 1,
            Err(StoreError::ScopeBusy { status: ScopeStatus::Matching, .. }) => busy += 1,
            Err(error) => panic!("unexpected error: {error:?}"),
        }
    }

    assert_eq!((claimed, busy), (1, 7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn finish_matching_racing_enrollments_never_strands_scope() {
    let (store, _dir) = file_store().await;

    for round in 0..20u64 {
        let scope = channel(&format!("C{round}"));
        let key = scope.key();
        store.open_scope(&participant(&scope, "U0").as_host()).await.expect("open");
        for user in ["U1", "U2", "U3"] {
            store.enroll(&participant(&scope, user)).await.expect("enroll");
        }

        store.begin_matching(&key).await.expect("begin");
        MatchingEngine::default()
            .run(store.as_ref(), &key, &mut StdRng::seed_from_u64(round))
            .await
            .expect("run");

        let mut joins = JoinSet::new();
        for index in 10..16 {
            let store = Arc::clone(&store);
            let joiner = participant(&scope, &format!("U{index}"));
            joins.spawn(async move { store.enroll(&joiner).await });
        }
        let finished = store.finish_matching(&key).await;

        while let Some(result) = joins.join_next().await {
            let error = result.expect("task").expect_err("enrollment after the draw");
            assert!(matches!(error, StoreError::ScopeBusy { .. }), "round {round}: {error:?}");
        }

        assert_eq!(finished, Ok(ScopeStatus::Matched), "round {round}");
        assert_eq!(
            store.scope_status(&key).await.expect("status"),
            Some(ScopeStatus::Matched),
            "round {round}"
        );
        assert!(store.get_unmatched(&key).await.expect("unmatched").is_empty());
    }
}
