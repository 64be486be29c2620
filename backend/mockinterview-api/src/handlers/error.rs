use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::services::mock_interview_service::InterviewError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<InterviewError> for ApiError {
    fn from(err: InterviewError) -> Self {
        let message = err.to_string();
        match err {
            InterviewError::InvalidInput(_) | InterviewError::EmptySession => {
                ApiError::BadRequest(message)
            }
            InterviewError::UserNotFound(_)
            | InterviewError::SessionNotFound(_)
            | InterviewError::QuestionNotFound(_) => ApiError::NotFound(message),
            InterviewError::SessionCompleted(_) => ApiError::Conflict(message),
            InterviewError::Generation(_) | InterviewError::Persistence(_) => {
                tracing::error!("Mock interview request failed: {}", message);
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(message)
            | ApiError::Unauthorized(message)
            | ApiError::NotFound(message)
            | ApiError::Conflict(message)
            | ApiError::Internal(message) => message,
        };
        let json_response = serde_json::json!({
            "message": message,
            "status": status.as_u16()
        });
        (status, Json(json_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::question_generator::GenerationError;

    #[test]
    fn interview_errors_map_to_status_codes() {
        let cases = [
            (InterviewError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (InterviewError::EmptySession, StatusCode::BAD_REQUEST),
            (InterviewError::UserNotFound("u".into()), StatusCode::NOT_FOUND),
            (InterviewError::SessionNotFound("t".into()), StatusCode::NOT_FOUND),
            (InterviewError::QuestionNotFound("q9".into()), StatusCode::NOT_FOUND),
            (InterviewError::SessionCompleted("t".into()), StatusCode::CONFLICT),
            (
                InterviewError::Generation(GenerationError::InvalidPayload("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (InterviewError::Persistence("db".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }
}
