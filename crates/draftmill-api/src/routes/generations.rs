//! Job creation, inspection, and the continue endpoint.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use draftmill_store::{JobStore, ProjectStore, QueueStore};
use draftmill_types::{ArticleType, InternalLink, Job, JobConfig, JobStatus};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{ApiError, AppState, AuthPrincipal, Envelope};

fn default_language() -> String {
    "en".to_string()
}

fn default_region() -> String {
    "us".to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGenerationBody {
    #[serde(default)]
    main_keyword: String,
    article_type: ArticleType,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default = "default_region")]
    region: String,
    #[serde(default)]
    lsi_keywords: Vec<String>,
    #[serde(default)]
    style_comment: Option<String>,
    #[serde(default)]
    continuous: bool,
    #[serde(default)]
    internal_links: Vec<InternalLink>,
}

/// `POST /api/projects/{id}/generations` — create and enqueue a job.
pub async fn create(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(project_id): Path<Uuid>,
    Json(body): Json<CreateGenerationBody>,
) -> Result<(StatusCode, Json<Envelope>), ApiError> {
    if body.main_keyword.trim().is_empty() {
        return Err(ApiError::BadRequest("mainKeyword is required".into()));
    }
    if body.internal_links.iter().any(|l| l.url.trim().is_empty()) {
        return Err(ApiError::BadRequest("internal link urls must not be empty".into()));
    }
    // Ownership check doubles as the existence check.
    state.store.project_by_id(project_id, principal.id).await?;

    let config = JobConfig {
        main_keyword: body.main_keyword.trim().to_string(),
        article_type: body.article_type,
        keywords: body.keywords,
        language: body.language,
        region: body.region,
        lsi_keywords: body.lsi_keywords,
        style_comment: body.style_comment,
        continuous: body.continuous,
        internal_links: body.internal_links,
    };
    let job = Job::new(project_id, principal.id, config);
    state.store.insert_job(&job).await?;
    state.store.enqueue(job.id, principal.id, None).await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(job))))
}

/// `GET /api/projects/{id}/generations`
pub async fn list_in_project(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Envelope>, ApiError> {
    state.store.project_by_id(project_id, principal.id).await?;
    let jobs = state
        .store
        .list_jobs_in_project(project_id, principal.id)
        .await?;
    Ok(Json(Envelope::ok(jobs)))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

/// `GET /api/generations` — the owner's jobs, filterable and paginated.
pub async fn list(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<ListQuery>,
) -> Result<Json<Envelope>, ApiError> {
    let status = match &query.status {
        Some(raw) => Some(
            JobStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * limit;

    let result = state
        .store
        .list_jobs_for_owner(principal.id, status, offset, limit)
        .await?;
    Ok(Json(Envelope::ok(json!({
        "generations": result.jobs,
        "total": result.total,
        "page": page,
        "limit": limit,
    }))))
}

/// `GET /api/generations/{id}` — full job record.
pub async fn fetch(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope>, ApiError> {
    let job = state.store.fetch_job_for_owner(id, principal.id).await?;
    Ok(Json(Envelope::ok(job)))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    since: Option<String>,
}

/// `GET /api/generations/{id}/logs?since=<iso>` — incremental log slice.
pub async fn logs_since(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Envelope>, ApiError> {
    let since = match &query.since {
        Some(raw) => Some(
            raw.parse::<DateTime<Utc>>()
                .map_err(|_| ApiError::BadRequest("since must be an ISO-8601 instant".into()))?,
        ),
        None => None,
    };
    let logs = state.store.logs_since(id, principal.id, since).await?;
    Ok(Json(Envelope::ok(logs)))
}

/// `POST /api/generations/{id}/continue` — resume a paused job.
pub async fn resume(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope>, ApiError> {
    let job = state.store.fetch_job_for_owner(id, principal.id).await?;
    if !job.status.is_pause_point() {
        return Err(ApiError::BadRequest(format!(
            "job is not paused (status: {})",
            job.status
        )));
    }
    state
        .store
        .enqueue(job.id, principal.id, Some(job.status))
        .await?;
    Ok(Json(Envelope::message("continue queued")))
}

/// `DELETE /api/generations/{id}`
pub async fn remove(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope>, ApiError> {
    state.store.delete_job(id, principal.id).await?;
    Ok(Json(Envelope::message("generation deleted")))
}

/// `GET /api/generations/queue/stats`
pub async fn queue_stats(
    State(state): State<AppState>,
    AuthPrincipal(_principal): AuthPrincipal,
) -> Result<Json<Envelope>, ApiError> {
    let stats = state.store.stats().await?;
    state.metrics.set_queue_stats(&stats);
    Ok(Json(Envelope::ok(stats)))
}
