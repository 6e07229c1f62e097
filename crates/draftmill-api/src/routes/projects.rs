//! Project CRUD, owner-scoped.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use draftmill_store::ProjectStore;
use draftmill_types::{MAX_PROJECT_DESCRIPTION, MAX_PROJECT_NAME, Project};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiError, AppState, AuthPrincipal, Envelope};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
}

fn validate(body: &ProjectBody) -> Result<(), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    if name.chars().count() > MAX_PROJECT_NAME {
        return Err(ApiError::BadRequest(format!(
            "name must be at most {MAX_PROJECT_NAME} characters"
        )));
    }
    if let Some(description) = &body.description
        && description.chars().count() > MAX_PROJECT_DESCRIPTION
    {
        return Err(ApiError::BadRequest(format!(
            "description must be at most {MAX_PROJECT_DESCRIPTION} characters"
        )));
    }
    Ok(())
}

/// `POST /api/projects`
pub async fn create(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<ProjectBody>,
) -> Result<(StatusCode, Json<Envelope>), ApiError> {
    validate(&body)?;
    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4(),
        owner_id: principal.id,
        name: body.name.trim().to_string(),
        description: body.description.clone(),
        created_at: now,
        updated_at: now,
    };
    state.store.insert_project(&project).await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(project))))
}

/// `GET /api/projects`
pub async fn list(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Envelope>, ApiError> {
    let projects = state.store.list_projects(principal.id).await?;
    Ok(Json(Envelope::ok(projects)))
}

/// `GET /api/projects/{id}`
pub async fn fetch(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope>, ApiError> {
    let project = state.store.project_by_id(id, principal.id).await?;
    Ok(Json(Envelope::ok(project)))
}

/// `PUT /api/projects/{id}`
pub async fn update(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
    Json(body): Json<ProjectBody>,
) -> Result<Json<Envelope>, ApiError> {
    validate(&body)?;
    let project = state
        .store
        .update_project(id, principal.id, body.name.trim(), body.description.as_deref())
        .await?;
    Ok(Json(Envelope::ok(project)))
}

/// `DELETE /api/projects/{id}` — cascades to the project's jobs.
pub async fn remove(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope>, ApiError> {
    state.store.delete_project(id, principal.id).await?;
    Ok(Json(Envelope::message("project deleted")))
}
