use std::sync::Arc;

use serde_json::Value;

use crate::models::{MockSession, SessionStats};
use crate::services::completion::{
    parse_json_payload, CompletionClient, CompletionError, CompletionPurpose, CompletionRequest,
};

pub const DEFAULT_OVERALL_FEEDBACK: &str = "Thank you for completing the mock interview. \
     Detailed overall feedback is unavailable right now; review the feedback on each answer \
     to see where to improve.";

const REVIEW_SYSTEM_PROMPT: &str = "You are a senior interviewer writing a debrief for a \
candidate after a mock interview. Be specific and constructive. Respond only with JSON: \
{\"overallFeedback\": \"<paragraph>\", \"strengths\": [\"...\"], \"improvements\": [\"...\"], \
\"recommendations\": [\"...\"]}";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReview {
    pub overall_feedback: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub recommendations: Vec<String>,
}

impl SessionReview {
    pub fn fallback() -> Self {
        Self {
            overall_feedback: DEFAULT_OVERALL_FEEDBACK.to_string(),
            strengths: Vec::new(),
            improvements: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// Writes the overall debrief for a finished session.
pub struct SessionReviewer {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl SessionReviewer {
    pub fn new(client: Arc<dyn CompletionClient>, model: String) -> Self {
        Self { client, model }
    }

    /// Never fails; a default review replaces any service or parsing failure.
    pub async fn review(&self, session: &MockSession, stats: &SessionStats) -> SessionReview {
        match self.request_review(session, stats).await {
            Ok(review) => review,
            Err(e) => {
                tracing::warn!(
                    "Overall feedback unavailable for session={} ({}), using default",
                    session.session_id,
                    e
                );
                SessionReview::fallback()
            }
        }
    }

    async fn request_review(
        &self,
        session: &MockSession,
        stats: &SessionStats,
    ) -> Result<SessionReview, CompletionError> {
        let raw = self
            .client
            .complete(CompletionRequest {
                purpose: CompletionPurpose::SessionReview,
                model: self.model.clone(),
                system_prompt: REVIEW_SYSTEM_PROMPT.to_string(),
                user_prompt: build_prompt(session, stats),
                json_output: true,
                max_tokens: 800,
                temperature: 0.4,
            })
            .await?;

        parse_review(&parse_json_payload(&raw)?)
    }
}

fn build_prompt(session: &MockSession, stats: &SessionStats) -> String {
    let answers: Vec<Value> = session
        .answers
        .iter()
        .map(|a| {
            serde_json::json!({
                "rating": a.rating,
                "timeSpent": a.time_spent,
                "feedback": a.feedback,
            })
        })
        .collect();

    format!(
        "Domain: {}\nDifficulty: {}\nQuestions: {}\nAnswered: {}\nAverage rating: {:.1}/10\n\
         Total time spent: {} seconds\nPer-answer results: {}",
        session.domain,
        session.difficulty,
        stats.total_questions,
        stats.answered_questions,
        stats.mean_rating,
        stats.total_time_spent,
        Value::Array(answers)
    )
}

pub fn parse_review(value: &Value) -> Result<SessionReview, CompletionError> {
    let overall_feedback = value
        .get("overallFeedback")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| CompletionError::Malformed("overallFeedback is missing".to_string()))?;

    Ok(SessionReview {
        overall_feedback: overall_feedback.to_string(),
        strengths: string_list(value, "strengths"),
        improvements: string_list(value, "improvements"),
        recommendations: string_list(value, "recommendations"),
    })
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
