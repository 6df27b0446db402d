//! Operational surface: inspect pending confirmations and failed
//! deliveries, force a resend. Exists for operability, not for end users.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use centavo_core::error::ApiError;
use centavo_core::model::{ConfirmationView, ResendResponse};

use crate::delivery::DeliveryOutcome;
use crate::error::AppError;
use crate::state::AppState;

const LIST_LIMIT: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/ops/confirmations/pending", get(list_pending))
        .route("/v1/ops/deliveries/failed", get(list_failed))
        .route("/v1/ops/deliveries/{id}/resend", post(resend_delivery))
}

fn token_matches(expected: Option<&str>, authorization: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token == expected)
            .unwrap_or(false),
    }
}

fn require_ops_token(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok());

    if token_matches(state.ops_token.as_deref(), authorization) {
        Ok(())
    } else {
        Err(AppError::Unauthorized {
            message: "Missing or invalid service token".to_string(),
        })
    }
}

/// List confirmations currently waiting for a user reply.
#[utoipa::path(
    get,
    path = "/v1/ops/confirmations/pending",
    responses(
        (status = 200, description = "Pending confirmations", body = Vec<ConfirmationView>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "ops"
)]
pub async fn list_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConfirmationView>>, AppError> {
    require_ops_token(&state, &headers)?;

    let rows = state.store.list_pending(LIST_LIMIT).await?;
    Ok(Json(rows.into_iter().map(|row| row.into_view()).collect()))
}

/// List confirmed records that exhausted their delivery attempts.
#[utoipa::path(
    get,
    path = "/v1/ops/deliveries/failed",
    responses(
        (status = 200, description = "Failed deliveries", body = Vec<ConfirmationView>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "ops"
)]
pub async fn list_failed(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConfirmationView>>, AppError> {
    require_ops_token(&state, &headers)?;

    let rows = state
        .store
        .list_failed(state.delivery_max_attempts, LIST_LIMIT)
        .await?;
    Ok(Json(rows.into_iter().map(|row| row.into_view()).collect()))
}

/// Force one delivery attempt for a confirmation, ignoring the retry cap.
#[utoipa::path(
    post,
    path = "/v1/ops/deliveries/{id}/resend",
    params(
        ("id" = Uuid, Path, description = "Confirmation id")
    ),
    responses(
        (status = 200, description = "Resend attempted", body = ResendResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Confirmation not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "ops"
)]
pub async fn resend_delivery(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ResendResponse>, AppError> {
    require_ops_token(&state, &headers)?;

    let Some(outcome) = state.delivery.resend(id).await? else {
        return Err(AppError::NotFound {
            resource: format!("confirmation {id}"),
        });
    };

    let response = match outcome {
        DeliveryOutcome::Delivered {
            remote_transaction_id,
        } => ResendResponse {
            id,
            delivered: true,
            remote_transaction_id: Some(remote_transaction_id),
            error: None,
        },
        DeliveryOutcome::AlreadyDelivered => ResendResponse {
            id,
            delivered: true,
            remote_transaction_id: None,
            error: None,
        },
        DeliveryOutcome::Failed { error, .. } => ResendResponse {
            id,
            delivered: false,
            remote_transaction_id: None,
            error: Some(error),
        },
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::token_matches;

    #[test]
    fn no_configured_token_means_open_access() {
        assert!(token_matches(None, None));
        assert!(token_matches(None, Some("Bearer anything")));
    }

    #[test]
    fn configured_token_requires_an_exact_bearer_match() {
        assert!(token_matches(Some("secret"), Some("Bearer secret")));
        assert!(!token_matches(Some("secret"), Some("Bearer wrong")));
        assert!(!token_matches(Some("secret"), Some("secret")));
        assert!(!token_matches(Some("secret"), None));
    }
}
