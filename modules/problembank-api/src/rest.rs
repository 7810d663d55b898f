use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use problembank_common::ProblemBankError;
use problembank_pipeline::service::DEFAULT_SIMILAR_LIMIT;
use problembank_pipeline::{CreateClusterRequest, ListClustersQuery, SimilarityRequest};

use crate::AppState;

// --- Query / body structs ---

#[derive(Default, Deserialize)]
pub struct SimilarityBody {
    problem_id: Option<Uuid>,
    threshold: Option<f64>,
    recompute_all: Option<bool>,
}

#[derive(Deserialize)]
pub struct ThemeQuery {
    theme: Option<String>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

// --- Errors ---

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Map a pipeline error onto a status code and JSON body.
pub fn error_response(err: ProblemBankError) -> Response {
    match err {
        ProblemBankError::Validation(msg) => error_body(StatusCode::BAD_REQUEST, msg),
        ProblemBankError::NotFound { .. } => error_body(StatusCode::NOT_FOUND, err.to_string()),
        ProblemBankError::DuplicateExtraction { problem_id, .. } => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": err.to_string(),
                "problem_id": problem_id,
            })),
        )
            .into_response(),
        ProblemBankError::DuplicateSlug(_) => error_body(StatusCode::CONFLICT, err.to_string()),
        ProblemBankError::Persistence(_) | ProblemBankError::Other(_) => {
            error!(error = %err, "Request failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
        }
    }
}

// --- Pipeline ---

pub async fn api_extract(
    State(state): State<AppState>,
    Path(cycle_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.bank.extract(cycle_id).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => {
            warn!(cycle_id = %cycle_id, error = %e, "Extraction rejected");
            error_response(e)
        }
    }
}

pub async fn api_compute_similarities(
    State(state): State<AppState>,
    body: Option<Json<SimilarityBody>>,
) -> impl IntoResponse {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let request = SimilarityRequest {
        problem_id: body.problem_id,
        threshold: body.threshold.unwrap_or(state.similarity_threshold),
        recompute_all: body.recompute_all.unwrap_or(false),
    };
    match state.bank.compute_similarities(&request).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

// --- Clusters ---

pub async fn api_create_cluster(
    State(state): State<AppState>,
    Json(body): Json<CreateClusterRequest>,
) -> impl IntoResponse {
    match state.bank.create_cluster(&body).await {
        Ok(cluster) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "cluster_id": cluster.id,
                "slug": cluster.slug,
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Cluster creation rejected");
            error_response(e)
        }
    }
}

pub async fn api_list_clusters(
    State(state): State<AppState>,
    Query(query): Query<ListClustersQuery>,
) -> impl IntoResponse {
    match state.bank.list_clusters(&query).await {
        Ok(listings) => Json(listings).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_cluster_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.bank.get_cluster(id).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_archive_cluster(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.bank.archive_cluster(id).await {
        Ok(cluster) => Json(cluster).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_refresh_cluster(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.bank.refresh_cluster_stats(id).await {
        Ok(cluster) => Json(cluster).into_response(),
        Err(e) => error_response(e),
    }
}

// --- Problems ---

pub async fn api_open_problems(
    State(state): State<AppState>,
    Query(query): Query<ThemeQuery>,
) -> impl IntoResponse {
    match state.bank.list_open_problems(query.theme.as_deref()).await {
        Ok(problems) => Json(problems).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_problem_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.bank.get_problem(id).await {
        Ok(problem) => Json(problem).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_similar_problems(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);
    match state.bank.similar_problems(id, limit).await {
        Ok(similar) => Json(similar).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_problem_evidence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.bank.problem_evidence(id).await {
        Ok(evidence) => Json(evidence).into_response(),
        Err(e) => error_response(e),
    }
}
