//! HTTP handlers
//!
//! Body and query extractors are taken as `Result` so malformed input is
//! answered with the structured 400 body instead of axum's plain-text one.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use super::error::ApiError;
use super::routes::AppState;
use super::types::{
    ConsensusQuery, DeregisterAgentRequest, EnqueueWorkItemRequest, RegisterAgentRequest,
    TraceQuery, DEFAULT_TRACE_LIMIT,
};
use crate::engine::HealthReport;
use crate::registry::AgentState;
use crate::state::{
    ConsensusSnapshot, CoordinationRequest, CoordinationResponse, IntelligenceTrace, WorkItem,
};

/// POST /coordinate
pub async fn coordinate(
    State(state): State<AppState>,
    payload: Result<Json<CoordinationRequest>, JsonRejection>,
) -> Result<Json<CoordinationResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.engine.coordinate(request).await?))
}

/// GET /consensus?work_item_id=...
pub async fn consensus(
    State(state): State<AppState>,
    query: Result<Query<ConsensusQuery>, QueryRejection>,
) -> Result<Json<ConsensusSnapshot>, ApiError> {
    let Query(query) = query?;
    Ok(Json(
        state.engine.consensus(query.work_item_id.as_deref()).await?,
    ))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.engine.health().await)
}

/// POST /agents/register
pub async fn register_agent(
    State(state): State<AppState>,
    payload: Result<Json<RegisterAgentRequest>, JsonRejection>,
) -> Result<Json<AgentState>, ApiError> {
    let Json(request) = payload?;
    if request.agent_id.trim().is_empty() {
        return Err(ApiError::bad_request("MALFORMED_BODY", "agent_id is empty"));
    }
    Ok(Json(state.engine.register_agent(
        request.agent_id,
        request.level,
        request.capabilities,
    )?))
}

/// POST /agents/deregister
pub async fn deregister_agent(
    State(state): State<AppState>,
    payload: Result<Json<DeregisterAgentRequest>, JsonRejection>,
) -> Result<Json<AgentState>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.engine.deregister_agent(&request.agent_id)?))
}

/// POST /work-items
pub async fn enqueue_work_item(
    State(state): State<AppState>,
    payload: Result<Json<EnqueueWorkItemRequest>, JsonRejection>,
) -> Result<Json<WorkItem>, ApiError> {
    let Json(request) = payload?;
    if request.work_item_id.trim().is_empty() {
        return Err(ApiError::bad_request("MALFORMED_BODY", "work_item_id is empty"));
    }
    Ok(Json(
        state
            .engine
            .enqueue_work_item(request.work_item_id, request.phases)
            .await?,
    ))
}

/// POST /work-items/:id/cancel
pub async fn cancel_work_item(
    State(state): State<AppState>,
    Path(work_item_id): Path<String>,
) -> Result<Json<WorkItem>, ApiError> {
    Ok(Json(state.engine.cancel_work_item(&work_item_id).await?))
}

/// GET /traces?from=&to= or GET /traces?limit=
pub async fn list_traces(
    State(state): State<AppState>,
    query: Result<Query<TraceQuery>, QueryRejection>,
) -> Result<Json<Vec<IntelligenceTrace>>, ApiError> {
    let Query(query) = query?;
    let traces = match (query.from, query.to) {
        (Some(from), Some(to)) => state.engine.trace_range(&from, &to)?,
        (None, None) => state
            .engine
            .recent_traces(query.limit.unwrap_or(DEFAULT_TRACE_LIMIT))?,
        _ => {
            return Err(ApiError::bad_request(
                "MALFORMED_QUERY",
                "from and to must be given together",
            ))
        }
    };
    Ok(Json(traces))
}

/// GET /traces/:work_item_id
pub async fn get_trace(
    State(state): State<AppState>,
    Path(work_item_id): Path<String>,
) -> Result<Json<IntelligenceTrace>, ApiError> {
    Ok(Json(state.engine.trace(&work_item_id)?))
}
