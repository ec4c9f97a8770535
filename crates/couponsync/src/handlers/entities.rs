//! Entity handlers.
//!
//! Mutations go through the update coordinator and answer with the full
//! per-stage [`UpdateOperationResult`]. The status code reflects the primary
//! write only: a committed mutation with degraded side effects is still a
//! success.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use couponsync_core::entity::{Entity, EntityType, Fields};
use couponsync_core::storage::{repository_error_to_status_code, RepositoryError};

use super::error::RequestError;
use crate::{coordinator::UpdateOperationResult, handlers::AppError, state::AppState};

fn parse_entity_type(raw: &str) -> Result<EntityType, AppError> {
    raw.parse()
        .map_err(|e: String| AppError::from(RequestError::UnknownEntityType(e)))
}

fn operation_response(result: UpdateOperationResult, success: StatusCode) -> Response {
    let status = match &result.database_error {
        None => success,
        Some(e) => StatusCode::from_u16(repository_error_to_status_code(e))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    };
    (status, Json(result)).into_response()
}

/// Create an entity (POST /api/{type}).
pub async fn create_entity(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    Json(fields): Json<Fields>,
) -> Result<Response, AppError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let result = state.coordinator.create_entity(entity_type, fields).await;
    Ok(operation_response(result, StatusCode::CREATED))
}

/// Get a single entity (GET /api/{type}/{id}).
pub async fn get_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<Json<Entity>, AppError> {
    let entity_type = parse_entity_type(&entity_type)?;

    let entity = state
        .coordinator
        .get_entity(entity_type, &id)
        .await?
        .ok_or_else(|| RepositoryError::NotFound {
            entity_type: entity_type.as_str(),
            id,
        })?;

    Ok(Json(entity))
}

/// Partially update an entity (PUT /api/{type}/{id}).
pub async fn update_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
    Json(patch): Json<Fields>,
) -> Result<Response, AppError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let result = state.coordinator.update_entity(entity_type, &id, patch).await;
    Ok(operation_response(result, StatusCode::OK))
}

/// Delete an entity (DELETE /api/{type}/{id}).
pub async fn delete_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let result = state.coordinator.delete_entity(entity_type, &id).await;
    Ok(operation_response(result, StatusCode::OK))
}
