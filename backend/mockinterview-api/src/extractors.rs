use axum::{
    extract::{FromRequest, Request},
    Json,
};
use validator::Validate;

use crate::handlers::error::ApiError;

/// JSON body extractor that validates the payload and answers every
/// rejection with a 400 JSON error instead of axum's plain-text one.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                let message = format!(
                    "Failed to parse JSON request body: {}",
                    rejection.body_text()
                );
                tracing::warn!("{}", message);
                ApiError::bad_request(message)
            })?;

        value
            .validate()
            .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

        Ok(AppJson(value))
    }
}
