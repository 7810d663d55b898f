//! Integration tests for PgProblemStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use problembank_common::{
    NewCluster, NewMembership, Origin, ProblemBankError, SimilarityEdge,
};
use problembank_store::testing::open_problem;
use problembank_store::{CycleSource, PgProblemStore, ProblemStore};

/// Get a migrated, empty test store, or skip if no test DB is available.
async fn test_store() -> Option<PgProblemStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    let store = PgProblemStore::new(pool);
    store.migrate().await.ok()?;

    // Clean slate for each test
    sqlx::query(
        "TRUNCATE cluster_memberships, problem_clusters, problem_similarities, \
         problem_evidence, problems, impact_assessments, value_assessments, \
         cycle_contexts, cycle_problems, cycles, users, institutions CASCADE",
    )
    .execute(store.pool())
    .await
    .ok()?;

    Some(store)
}

async fn seed_cycle(store: &PgProblemStore) -> (Uuid, Uuid, Uuid) {
    let institution_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO institutions (name) VALUES ('Test University') RETURNING id",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    let user_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO users (institution_id) VALUES ($1) RETURNING id",
    )
    .bind(institution_id)
    .fetch_one(store.pool())
    .await
    .unwrap();
    let cycle_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO cycles (name, user_id) VALUES ('Attendance', $1) RETURNING id",
    )
    .bind(user_id)
    .fetch_one(store.pool())
    .await
    .unwrap();
    sqlx::query("INSERT INTO cycle_problems (cycle_id, raw_question) VALUES ($1, $2)")
        .bind(cycle_id)
        .bind("Takes too long to reconcile attendance")
        .execute(store.pool())
        .await
        .unwrap();
    (institution_id, user_id, cycle_id)
}

#[tokio::test]
async fn load_cycle_reads_sub_records() {
    let Some(store) = test_store().await else {
        return;
    };
    let (institution_id, user_id, cycle_id) = seed_cycle(&store).await;

    let cycle = store.load_cycle(cycle_id).await.unwrap().unwrap();
    assert_eq!(cycle.user_id, user_id);
    assert_eq!(
        cycle.problem.unwrap().raw_question.as_deref(),
        Some("Takes too long to reconcile attendance")
    );
    assert!(cycle.context.is_none());
    assert!(cycle.value_assessment.is_none());

    assert_eq!(
        store.institution_for_user(user_id).await.unwrap(),
        Some(institution_id)
    );
    assert!(store.load_cycle(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn second_insert_for_same_cycle_is_duplicate() {
    let Some(store) = test_store().await else {
        return;
    };
    let (_, _, cycle_id) = seed_cycle(&store).await;

    let mut problem = open_problem("Attendance", "Reconciling takes hours", Some("education"));
    problem.source_cycle_id = Some(cycle_id);

    let first = store.insert_problem(&problem).await.unwrap();
    let err = store.insert_problem(&problem).await.unwrap_err();
    match err {
        ProblemBankError::DuplicateExtraction { problem_id, .. } => {
            assert_eq!(problem_id, first.id)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn edge_upsert_overwrites_score() {
    let Some(store) = test_store().await else {
        return;
    };
    let a = store
        .insert_problem(&open_problem("A", "patient wait times", Some("healthcare")))
        .await
        .unwrap();
    let b = store
        .insert_problem(&open_problem("B", "patient wait lists", Some("healthcare")))
        .await
        .unwrap();

    let edge = SimilarityEdge::canonical(a.id, b.id, 0.4, Utc::now()).unwrap();
    store.upsert_edges(&[edge]).await.unwrap();
    let edge = SimilarityEdge::canonical(b.id, a.id, 0.6, Utc::now()).unwrap();
    store.upsert_edges(&[edge]).await.unwrap();

    let edges = store.edges_for_problem(a.id, 10).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].similarity_score, 0.6);
}

#[tokio::test]
async fn cluster_members_and_stats() {
    let Some(store) = test_store().await else {
        return;
    };
    let mut first = open_problem("A", "students miss class", Some("education"));
    first.severity_rating = Some(4);
    let mut second = open_problem("B", "teachers overloaded", Some("education"));
    second.severity_rating = Some(8);
    let first = store.insert_problem(&first).await.unwrap();
    let second = store.insert_problem(&second).await.unwrap();

    let cluster = store
        .upsert_cluster_by_slug(&NewCluster {
            name: "Education & Learning".into(),
            slug: "theme-education".into(),
            primary_theme: Some("education".into()),
            description: None,
            created_by: Origin::Auto,
        })
        .await
        .unwrap()
        .unwrap();

    store
        .upsert_memberships(&[
            NewMembership::auto(cluster.id, first.id, 0.8),
            NewMembership::auto(cluster.id, second.id, 0.8),
        ])
        .await
        .unwrap();

    let refreshed = store.refresh_cluster_stats(cluster.id).await.unwrap().unwrap();
    assert_eq!(refreshed.problem_count, 2);
    assert_eq!(refreshed.avg_severity, Some(6.0));

    let members = store.cluster_members(cluster.id, 10).await.unwrap();
    assert_eq!(members.len(), 2);

    let archived = store.archive_cluster(cluster.id).await.unwrap().unwrap();
    assert!(!archived.is_active());
    assert!(store.list_clusters(None, false).await.unwrap().is_empty());
}
