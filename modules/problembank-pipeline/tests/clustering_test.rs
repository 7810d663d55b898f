//! Theme and manual clustering through the ProblemBank facade.

use std::sync::Arc;

use uuid::Uuid;

use problembank_common::{
    ClusterStatus, NewCluster, NewMembership, Origin, ProblemBankError,
};
use problembank_pipeline::{
    CreateClusterRequest, ListClustersQuery, ProblemBank, SimilarityRequest,
};
use problembank_store::testing::{open_problem, MemoryCycleSource, MemoryStore};
use problembank_store::ProblemStore;

fn bank() -> (ProblemBank, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let bank = ProblemBank::new(store.clone(), Arc::new(MemoryCycleSource::new()));
    (bank, store)
}

async fn seed_education_and_agriculture(store: &MemoryStore) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for (title, statement, theme) in [
        ("Attendance", "registers reconciled by hand", "education"),
        ("Homework", "assignments go missing", "education"),
        ("Exams", "results arrive late", "education"),
        ("Pests", "locusts destroy harvests", "agriculture"),
    ] {
        let mut problem = open_problem(title, statement, Some(theme));
        problem.severity_rating = Some(ids.len() as i16 + 4);
        ids.push(store.insert_problem(&problem).await.unwrap().id);
    }
    ids
}

fn manual_request(name: &str, problem_ids: Vec<Uuid>) -> CreateClusterRequest {
    CreateClusterRequest {
        name: name.to_string(),
        description: None,
        primary_theme: None,
        problem_ids,
    }
}

#[tokio::test]
async fn themes_below_two_members_get_no_cluster() {
    let (bank, store) = bank();
    let ids = seed_education_and_agriculture(&store).await;

    let report = bank
        .compute_similarities(&SimilarityRequest::recompute_all(0.3))
        .await
        .unwrap();
    assert_eq!(report.clusters_updated, 1);

    let clusters = store.all_clusters();
    assert_eq!(clusters.len(), 1);
    let cluster = &clusters[0];
    assert_eq!(cluster.slug, "theme-education");
    assert_eq!(cluster.name, "Education & Learning");
    assert_eq!(cluster.primary_theme.as_deref(), Some("education"));
    assert_eq!(cluster.created_by, Origin::Auto);
    assert_eq!(cluster.problem_count, 3);
    // Severities 4, 5 and 6.
    assert_eq!(cluster.avg_severity, Some(5.0));

    let members = store.memberships_for(cluster.id);
    assert_eq!(members.len(), 3);
    assert!(members.iter().all(|m| m.membership_score == 0.8 && !m.is_centroid));
    assert!(members.iter().all(|m| m.problem_id != ids[3]));
}

#[tokio::test]
async fn auto_clustering_leaves_manual_memberships_alone() {
    let (bank, store) = bank();
    let ids = seed_education_and_agriculture(&store).await;

    bank.compute_similarities(&SimilarityRequest::recompute_all(0.3))
        .await
        .unwrap();
    let cluster = store.all_clusters().remove(0);
    store
        .upsert_memberships(&[NewMembership::manual(cluster.id, ids[0], 1.0, true)])
        .await
        .unwrap();

    bank.compute_similarities(&SimilarityRequest::recompute_all(0.3))
        .await
        .unwrap();

    let pinned = store
        .memberships_for(cluster.id)
        .into_iter()
        .find(|m| m.problem_id == ids[0])
        .unwrap();
    assert_eq!(pinned.added_by, Origin::Manual);
    assert_eq!(pinned.membership_score, 1.0);
    assert!(pinned.is_centroid);
}

#[tokio::test]
async fn archived_theme_cluster_stays_archived() {
    let (bank, store) = bank();
    seed_education_and_agriculture(&store).await;

    bank.compute_similarities(&SimilarityRequest::recompute_all(0.3))
        .await
        .unwrap();
    let cluster = store.all_clusters().remove(0);
    bank.archive_cluster(cluster.id).await.unwrap();

    let report = bank
        .compute_similarities(&SimilarityRequest::recompute_all(0.3))
        .await
        .unwrap();
    assert_eq!(report.clusters_updated, 0);

    let clusters = store.all_clusters();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].status, ClusterStatus::Archived);
}

#[tokio::test]
async fn manual_theme_slug_is_not_taken_over() {
    let (bank, store) = bank();
    seed_education_and_agriculture(&store).await;
    store
        .insert_cluster(&NewCluster {
            name: "Curated education".into(),
            slug: "theme-education".into(),
            primary_theme: Some("education".into()),
            description: None,
            created_by: Origin::Manual,
        })
        .await
        .unwrap();

    let report = bank
        .compute_similarities(&SimilarityRequest::recompute_all(0.3))
        .await
        .unwrap();
    assert_eq!(report.clusters_updated, 0);
    assert_eq!(store.all_clusters()[0].name, "Curated education");
}

#[tokio::test]
async fn manual_cluster_first_member_is_centroid() {
    let (bank, store) = bank();
    let ids = seed_education_and_agriculture(&store).await;

    let cluster = bank
        .create_cluster(&manual_request(
            "Assessment & Grading",
            vec![ids[2], ids[1], ids[2]],
        ))
        .await
        .unwrap();

    assert_eq!(cluster.slug, "assessment-grading");
    assert_eq!(cluster.created_by, Origin::Manual);
    assert_eq!(cluster.problem_count, 2);

    let detail = bank.get_cluster(cluster.id).await.unwrap();
    assert_eq!(detail.problems.len(), 2);
    assert_eq!(detail.problems[0].problem.id, ids[2]);
    assert!(detail.problems[0].is_centroid);
    assert_eq!(detail.problems[0].membership_score, 1.0);
    assert_eq!(detail.problems[1].membership_score, 0.9);
    assert!(!detail.problems[1].is_centroid);
}

#[tokio::test]
async fn manual_cluster_rejects_missing_problems_and_taken_slugs() {
    let (bank, store) = bank();
    let ids = seed_education_and_agriculture(&store).await;

    let missing = Uuid::new_v4();
    let err = bank
        .create_cluster(&manual_request("Pests", vec![ids[3], missing]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProblemBankError::NotFound { id, .. } if id == missing));
    assert!(store.all_clusters().is_empty());

    bank.create_cluster(&manual_request("Pests", vec![ids[3]]))
        .await
        .unwrap();
    let err = bank
        .create_cluster(&manual_request("  PESTS!  ", vec![ids[3]]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProblemBankError::DuplicateSlug(slug) if slug == "pests"));

    let err = bank
        .create_cluster(&manual_request("???", vec![ids[3]]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProblemBankError::Validation(_)));
}

#[tokio::test]
async fn archive_is_idempotent_and_hides_from_listing() {
    let (bank, store) = bank();
    let ids = seed_education_and_agriculture(&store).await;
    let cluster = bank
        .create_cluster(&manual_request("Grading", vec![ids[2]]))
        .await
        .unwrap();

    let first = bank.archive_cluster(cluster.id).await.unwrap();
    let second = bank.archive_cluster(cluster.id).await.unwrap();
    assert_eq!(first.status, ClusterStatus::Archived);
    assert_eq!(second.status, ClusterStatus::Archived);
    assert_eq!(first.updated_at, second.updated_at);

    let visible = bank
        .list_clusters(&ListClustersQuery::default())
        .await
        .unwrap();
    assert!(visible.is_empty());

    let all = bank
        .list_clusters(&ListClustersQuery {
            include_archived: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);

    let err = bank.archive_cluster(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ProblemBankError::NotFound { kind: "Cluster", .. }));
}

#[tokio::test]
async fn listing_orders_by_size_and_attaches_members() {
    let (bank, store) = bank();
    let institution = Uuid::new_v4();
    let mut ids = Vec::new();
    for statement in ["pumps fail", "wells dry up", "seed costs rise"] {
        let mut problem = open_problem("Farm", statement, Some("agriculture"));
        problem.institution_id = Some(institution);
        ids.push(store.insert_problem(&problem).await.unwrap().id);
    }

    bank.create_cluster(&manual_request("Big", ids.clone()))
        .await
        .unwrap();
    bank.create_cluster(&manual_request("Alpha", vec![ids[0]]))
        .await
        .unwrap();
    bank.create_cluster(&manual_request("Beta", vec![ids[1]]))
        .await
        .unwrap();

    let listings = bank
        .list_clusters(&ListClustersQuery {
            include_problems: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let names: Vec<&str> = listings.iter().map(|l| l.cluster.name.as_str()).collect();
    assert_eq!(names, vec!["Big", "Alpha", "Beta"]);
    assert_eq!(listings[0].problems.as_ref().unwrap().len(), 3);
    assert_eq!(listings[0].institutions, Some(vec![institution]));

    let bare = bank
        .list_clusters(&ListClustersQuery::default())
        .await
        .unwrap();
    assert!(bare.iter().all(|l| l.problems.is_none() && l.institutions.is_none()));
}

#[tokio::test]
async fn refresh_stats_recounts_members() {
    let (bank, store) = bank();
    let ids = seed_education_and_agriculture(&store).await;
    let cluster = bank
        .create_cluster(&manual_request("Mixed", vec![ids[0], ids[3]]))
        .await
        .unwrap();

    let refreshed = bank.refresh_cluster_stats(cluster.id).await.unwrap();
    assert_eq!(refreshed.problem_count, 2);
    // Severities 4 and 7.
    assert_eq!(refreshed.avg_severity, Some(5.5));

    let err = bank.refresh_cluster_stats(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ProblemBankError::NotFound { .. }));
}
