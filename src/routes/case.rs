/**
 * Case Routes
 * CRUD endpoints for case studies, multipart in and JSON out
 */
use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::PathRejection,
        Multipart, Path, State,
    },
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{Case, CaseList, CaseWithSections};
use crate::error::ApiError;
use crate::forms::MultipartForm;
use crate::services::cases::{CaseUpdate, NewCase};
use crate::AppState;

/// Response for DELETE /case/:id
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /case - Create a case from metadata, three images and indexed sections
pub async fn create_case(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Case>, ApiError> {
    let form = MultipartForm::read(multipart?).await?;
    let input = NewCase::from_form(form)?;
    let case = state.cases.create(input).await?;
    Ok(Json(case))
}

/// GET /case - List every case with its sections
pub async fn list_cases(State(state): State<AppState>) -> Result<Json<CaseList>, ApiError> {
    Ok(Json(state.cases.list().await?))
}

/// GET /case/:id - Single case, `null` when it does not exist
pub async fn get_case(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Option<CaseWithSections>>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.cases.find_by_id(id).await?))
}

/// GET /case/link/:caseLink - Single case by its link slug
pub async fn get_case_by_link(
    State(state): State<AppState>,
    Path(case_link): Path<String>,
) -> Result<Json<CaseWithSections>, ApiError> {
    Ok(Json(state.cases.find_by_link(&case_link).await?))
}

/// PATCH /case/:id - Replace fields, optional images and the JSON section list
pub async fn update_case(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CaseWithSections>, ApiError> {
    let Path(id) = id?;
    let form = MultipartForm::read(multipart?).await?;
    let input = CaseUpdate::from_form(form)?;
    Ok(Json(state.cases.update(id, input).await?))
}

/// DELETE /case/:id - Delete a case with its sections and images
pub async fn delete_case(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path(id) = id?;
    state.cases.delete(id).await?;
    Ok(Json(MessageResponse {
        message: "Case deleted successfully".to_string(),
    }))
}
