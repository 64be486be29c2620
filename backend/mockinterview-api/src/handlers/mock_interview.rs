use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    extractors::AppJson,
    handlers::error::ApiError,
    middlewares::auth::JwtClaims,
    models::{
        CreateMockInterviewRequest, CreateMockInterviewResponse, MockSessionView,
        SubmitMockAnswerRequest,
    },
    services::AppState,
};

/// POST /api/v1/mockinterview
pub async fn create_mock_interview(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateMockInterviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Creating mock interview for user={} domain={} difficulty={}",
        claims.sub,
        req.domain,
        req.difficulty
    );

    let session = state
        .interviews
        .create(&claims.sub, &req.domain, req.difficulty)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateMockInterviewResponse::from(&session)),
    ))
}

/// GET /api/v1/mockinterview
pub async fn list_mock_interviews(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.interviews.list_sessions(&claims.sub).await?;
    Ok(Json(sessions))
}

/// GET /api/v1/mockinterview/{session_id}
pub async fn get_mock_interview(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .interviews
        .get_session_for(&claims.sub, &session_id)
        .await?;
    Ok(Json(MockSessionView::from(&session)))
}

/// POST /api/v1/mockinterview/{session_id}
pub async fn submit_mock_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SubmitMockAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Submitting answer for session={} question={}",
        session_id,
        req.question_id
    );

    let verdict = state
        .interviews
        .submit_answer(
            &claims.sub,
            &session_id,
            &req.question_id,
            &req.answer,
            req.time_spent,
        )
        .await?;

    Ok(Json(verdict))
}

/// POST /api/v1/mockinterview/{session_id}/complete
pub async fn complete_mock_interview(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Completing mock interview: {}", session_id);

    let summary = state.interviews.complete(&claims.sub, &session_id).await?;
    Ok(Json(summary))
}
