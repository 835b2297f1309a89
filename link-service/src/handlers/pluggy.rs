use axum::{Json, extract::State, response::IntoResponse};
use service_core::middleware::tracing::RequestId;

use crate::AppState;
use crate::dtos::{DataEnvelope, PluggyLinkData, PluggyLinkRequest};
use crate::error::ErrorResponse;
use crate::models::Provider;
use crate::services::orchestrator::LinkParams;
use crate::utils::validation::ValidatedJson;

/// POST /pluggy/link
pub async fn create_link(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(payload): ValidatedJson<PluggyLinkRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let token = state
        .orchestrator
        .create_link(
            Provider::Pluggy,
            LinkParams {
                user_id: payload.user_id,
                environment: Some(payload.environment),
                language: None,
                access_token: None,
            },
        )
        .await
        .map_err(|e| ErrorResponse::new(e, request_id))?;

    Ok(Json(DataEnvelope {
        data: PluggyLinkData {
            access_token: token.token,
        },
    }))
}
