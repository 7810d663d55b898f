//! Router tests against in-memory doubles, driven with `oneshot`.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use problembank_api::{build_router, AppState};
use problembank_pipeline::ProblemBank;
use problembank_store::testing::{cycle, open_problem, MemoryCycleSource, MemoryStore};
use problembank_store::ProblemStore;

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    cycles: Arc<MemoryCycleSource>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cycles = Arc::new(MemoryCycleSource::new());
    let state = AppState {
        bank: ProblemBank::new(store.clone(), cycles.clone()),
        similarity_threshold: 0.3,
    };
    Harness {
        app: build_router(state, &[]),
        store,
        cycles,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_is_ok() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn extract_then_duplicate_conflict() {
    let h = harness();
    let fixture = cycle().raw_question("Clinic queues are long").build();
    let cycle_id = fixture.id;
    h.cycles.add_cycle(fixture);

    let uri = format!("/api/cycles/{cycle_id}/extract");
    let (status, body) = send(&h.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CREATED);
    let problem_id = body["problem_id"].as_str().unwrap().to_string();
    assert_eq!(body["evidence_written"], 0);

    let (status, body) = send(&h.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["problem_id"], problem_id.as_str());
    assert!(body["error"].is_string());

    let (status, body) = send(&h.app, "GET", &format!("/api/problems/{problem_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Clinic queues are long");
    assert_eq!(body["validation_status"], "unvalidated");
}

#[tokio::test]
async fn unknown_cycle_is_404() {
    let h = harness();
    let uri = format!("/api/cycles/{}/extract", Uuid::new_v4());
    let (status, _) = send(&h.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn similarities_then_similar_problems() {
    let h = harness();
    let a = h
        .store
        .insert_problem(&open_problem("Patient", "wait hours", Some("healthcare")))
        .await
        .unwrap();
    let b = h
        .store
        .insert_problem(&open_problem("Patient", "wait lists", Some("healthcare")))
        .await
        .unwrap();

    let (status, report) = send(&h.app, "POST", "/api/similarities", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["similarities_computed"], 1);
    assert_eq!(report["threshold"], 0.3);

    let uri = format!("/api/problems/{}/similar?limit=5", a.id);
    let (status, similar) = send(&h.app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(similar[0]["problem_id"], b.id.to_string().as_str());
    assert_eq!(similar[0]["similarity_score"], 0.5);
}

#[tokio::test]
async fn bodiless_similarity_post_uses_defaults() {
    let h = harness();
    for statement in ["wait hours", "wait lists"] {
        h.store
            .insert_problem(&open_problem("Patient", statement, Some("healthcare")))
            .await
            .unwrap();
    }

    let (status, report) = send(&h.app, "POST", "/api/similarities", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["problem_count"], 2);
    assert_eq!(report["similarities_computed"], 1);
    assert_eq!(report["clusters_updated"], 0);
    assert_eq!(report["threshold"], 0.3);
}

#[tokio::test]
async fn invalid_threshold_is_400() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/similarities",
        Some(json!({ "threshold": 2.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("threshold"));
}

#[tokio::test]
async fn cluster_lifecycle() {
    let h = harness();
    let problem = h
        .store
        .insert_problem(&open_problem("Pests", "locusts destroy harvests", Some("agriculture")))
        .await
        .unwrap();

    let (status, created) = send(
        &h.app,
        "POST",
        "/api/clusters",
        Some(json!({ "name": "Crop Loss", "problem_ids": [problem.id] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["slug"], "crop-loss");
    let cluster_id = created["cluster_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &h.app,
        "POST",
        "/api/clusters",
        Some(json!({ "name": "crop loss", "problem_ids": [problem.id] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, listings) =
        send(&h.app, "GET", "/api/clusters?include_problems=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listings.as_array().unwrap().len(), 1);
    assert_eq!(listings[0]["name"], "Crop Loss");
    assert_eq!(listings[0]["problems"][0]["is_centroid"], true);

    let (status, detail) = send(&h.app, "GET", &format!("/api/clusters/{cluster_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["problem_count"], 1);

    let uri = format!("/api/clusters/{cluster_id}/archive");
    let (status, archived) = send(&h.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(archived["status"], "archived");

    let (_, listings) = send(&h.app, "GET", "/api/clusters", None).await;
    assert!(listings.as_array().unwrap().is_empty());
    let (_, listings) = send(&h.app, "GET", "/api/clusters?include_archived=true", None).await;
    assert_eq!(listings.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn blank_cluster_name_is_400() {
    let h = harness();
    let (status, _) = send(
        &h.app,
        "POST",
        "/api/clusters",
        Some(json!({ "name": "  ", "problem_ids": [Uuid::new_v4()] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_resources_are_404() {
    let h = harness();
    let id = Uuid::new_v4();
    for uri in [
        format!("/api/problems/{id}"),
        format!("/api/problems/{id}/evidence"),
        format!("/api/problems/{id}/similar"),
        format!("/api/clusters/{id}"),
    ] {
        let (status, _) = send(&h.app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
    for uri in [
        format!("/api/clusters/{id}/archive"),
        format!("/api/clusters/{id}/refresh"),
    ] {
        let (status, _) = send(&h.app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn open_problems_filter_by_theme() {
    let h = harness();
    for theme in ["education", "education", "platform"] {
        h.store
            .insert_problem(&open_problem("Problem", "statement text", Some(theme)))
            .await
            .unwrap();
    }

    let (status, problems) = send(&h.app, "GET", "/api/problems?theme=education", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(problems.as_array().unwrap().len(), 2);

    let (_, problems) = send(&h.app, "GET", "/api/problems", None).await;
    assert_eq!(problems.as_array().unwrap().len(), 3);
}
