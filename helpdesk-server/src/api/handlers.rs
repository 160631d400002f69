//! HTTP handlers. Each one is a thin wrapper over a `HelpDesk` operation.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use helpdesk_core::{HelpRequest, RequestId, Supervisor};
use serde_json::{json, Value};
use tracing::error;

use super::types::{
    ErrorBody, ListQuery, ReassignBody, RecentQuery, RequestListResponse, StatusUpdateBody,
    SubmitQuestionBody,
};
use crate::notify::NotificationRecord;
use crate::service::Handoff;
use crate::state_machine::repository::DEFAULT_PAGE_SIZE;
use crate::state_machine::StoreError;
use crate::statistics::Statistics;
use crate::AppState;

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Map a store error onto its HTTP status.
pub fn store_error_response(err: StoreError) -> Response {
    let status = match &err {
        StoreError::Validation(_) => StatusCode::BAD_REQUEST,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidTransition(_) => StatusCode::CONFLICT,
        StoreError::Persistence(e) => {
            error!("Storage failure while serving request: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, err.to_string())
}

#[allow(clippy::result_large_err)]
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| error_response(StatusCode::BAD_REQUEST, rejection.body_text()))
}

#[allow(clippy::result_large_err)]
fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, Response> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| error_response(StatusCode::BAD_REQUEST, rejection.body_text()))
}

#[allow(clippy::result_large_err)]
fn request_id(id: Result<Path<i64>, PathRejection>) -> Result<RequestId, Response> {
    id.map(|Path(id)| RequestId(id))
        .map_err(|rejection| error_response(StatusCode::BAD_REQUEST, rejection.body_text()))
}

/// Handler: GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": state.version,
    }))
}

/// Handler: POST /requests
pub async fn submit_question(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitQuestionBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Handoff>), Response> {
    let submission = body(payload)?;
    let handoff = state
        .help_desk
        .submit_question(submission.into())
        .await
        .map_err(store_error_response)?;
    Ok((StatusCode::CREATED, Json(handoff)))
}

/// Handler: GET /requests
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<RequestListResponse>, Response> {
    let params = query(params)?;
    let page = params.page();
    let requests = state
        .help_desk
        .list_requests(&params.filter(), page)
        .await
        .map_err(store_error_response)?;
    Ok(Json(RequestListResponse {
        requests,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// Handler: GET /requests/:id
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<HelpRequest>, Response> {
    let id = request_id(id)?;
    state
        .help_desk
        .get_request(id)
        .await
        .map(Json)
        .map_err(store_error_response)
}

/// Handler: POST /requests/:id/status
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<StatusUpdateBody>, JsonRejection>,
) -> Result<Json<HelpRequest>, Response> {
    let id = request_id(id)?;
    let update = body(payload)?;
    state
        .help_desk
        .set_status(id, update.status, update.resolution)
        .await
        .map(Json)
        .map_err(store_error_response)
}

/// Handler: POST /requests/:id/reassign
pub async fn reassign_request(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ReassignBody>, JsonRejection>,
) -> Result<Json<Handoff>, Response> {
    let id = request_id(id)?;
    let reassign = body(payload)?;
    state
        .help_desk
        .reassign_request(id, reassign.supervisor_id)
        .await
        .map(Json)
        .map_err(store_error_response)
}

/// Handler: GET /requests/:id/notifications
pub async fn notifications_for(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Vec<NotificationRecord>>, Response> {
    let id = request_id(id)?;
    state
        .help_desk
        .notifications_for(id)
        .await
        .map(Json)
        .map_err(store_error_response)
}

/// Handler: GET /notifications
pub async fn recent_notifications(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Vec<NotificationRecord>>, Response> {
    let params = query(params)?;
    state
        .help_desk
        .recent_notifications(params.limit.unwrap_or(DEFAULT_PAGE_SIZE))
        .await
        .map(Json)
        .map_err(store_error_response)
}

/// Handler: GET /statistics
pub async fn statistics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Statistics>, Response> {
    state
        .help_desk
        .get_statistics()
        .await
        .map(Json)
        .map_err(store_error_response)
}

/// Handler: GET /supervisors
pub async fn supervisors(State(state): State<Arc<AppState>>) -> Json<Vec<Supervisor>> {
    Json(state.help_desk.supervisors().into_iter().cloned().collect())
}
