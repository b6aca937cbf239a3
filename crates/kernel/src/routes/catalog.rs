//! Product catalog batch API.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};

use crate::catalog::{BatchRequest, BatchResponse};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Fetch a batch of products.
///
/// POST /api/catalog/products/batch
///
/// Responds with the decoded records, or with a single string when the
/// request asked for compression. Validation failures, including bodies that
/// do not deserialize into a batch request, are 400 responses whose body is
/// the message as a JSON string.
async fn products_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> AppResult<Json<BatchResponse>> {
    let Json(request) =
        payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    match state.catalog().handle(&request).await? {
        BatchResponse::Invalid(message) => Err(AppError::BadRequest(message)),
        response => Ok(Json(response)),
    }
}

/// Create the catalog router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/catalog/products/batch", post(products_batch))
}
