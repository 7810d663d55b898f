//! HTTP surface for the problem bank.

pub mod rest;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use problembank_pipeline::ProblemBank;

#[derive(Clone)]
pub struct AppState {
    pub bank: ProblemBank,
    /// Applied when a similarity request omits its own threshold.
    pub similarity_threshold: f64,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        // Pipeline
        .route("/api/cycles/{cycle_id}/extract", post(rest::api_extract))
        .route("/api/similarities", post(rest::api_compute_similarities))
        // Clusters
        .route(
            "/api/clusters",
            get(rest::api_list_clusters).post(rest::api_create_cluster),
        )
        .route("/api/clusters/{id}", get(rest::api_cluster_detail))
        .route("/api/clusters/{id}/archive", post(rest::api_archive_cluster))
        .route("/api/clusters/{id}/refresh", post(rest::api_refresh_cluster))
        // Problems
        .route("/api/problems", get(rest::api_open_problems))
        .route("/api/problems/{id}", get(rest::api_problem_detail))
        .route("/api/problems/{id}/similar", get(rest::api_similar_problems))
        .route("/api/problems/{id}/evidence", get(rest::api_problem_evidence))
        .with_state(state)
        .layer(cors)
        // Method + path only, no query params
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
