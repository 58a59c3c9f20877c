use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use procapi_common::{InputData, OutputData};
use serde::Deserialize;

use crate::error::Result;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub id: String,
}

/// POST /prediction/short - wait for the prediction.
async fn short(
    State(state): State<Arc<AppState>>,
    Json(input): Json<InputData>,
) -> Result<Json<OutputData>> {
    let output = state.gateway.dispatch_bounded(input).await?;
    Ok(Json(output))
}

/// POST /prediction/long - queue the prediction and return its id.
async fn long(
    State(state): State<Arc<AppState>>,
    Json(input): Json<InputData>,
) -> Result<Json<String>> {
    let id = state.gateway.dispatch_deferred(input).await?;
    Ok(Json(id.to_string()))
}

/// GET /prediction/result?id= - 200 with the prediction, 204 while it is pending.
async fn result(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultQuery>,
) -> Result<Response> {
    let response = match state.gateway.lookup_result(&query.id).await? {
        Some(output) => Json(output).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    };
    Ok(response)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/short", post(short))
        .route("/long", post(long))
        .route("/result", get(result))
        .with_state(state)
}
