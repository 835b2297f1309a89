use axum::{
    Json,
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use service_core::middleware::tracing::REQUEST_ID_HEADER;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ErrorResponse, LinkError};

/// JSON extractor that runs `validator` rules and renders both parse and
/// validation failures as the normalized error body.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            ErrorResponse::new(
                LinkError::validation(format!("Json parse error: {}", e)),
                request_id.clone(),
            )
            .into_response()
        })?;

        value.validate().map_err(|e| {
            ErrorResponse::new(
                LinkError::validation(format!("Validation error: {}", e)),
                request_id.clone(),
            )
            .into_response()
        })?;

        Ok(ValidatedJson(value))
    }
}
