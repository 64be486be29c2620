use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::time::truncate_to_millis;

/// Number of questions generated for every mock interview.
pub const QUESTIONS_PER_SESSION: usize = 5;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Difficulty {
    #[serde(alias = "beginner")]
    Beginner,
    #[serde(alias = "intermediate")]
    Intermediate,
    #[serde(alias = "advanced")]
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "Beginner",
            Difficulty::Intermediate => "Intermediate",
            Difficulty::Advanced => "Advanced",
        }
    }

    /// Time allowance used when the generator omits one or returns a non-positive value.
    pub fn default_time_limit_seconds(&self) -> u32 {
        match self {
            Difficulty::Beginner => 120,
            Difficulty::Intermediate => 180,
            Difficulty::Advanced => 240,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterviewQuestion {
    pub id: String,
    pub title: String,
    pub description: String,
    pub reference_answer: String,
    pub time_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterviewAnswer {
    pub question_id: String,
    pub answer: String,
    pub rating: u8,
    pub feedback: String,
    pub time_spent: u32,
}

/// Fields written exactly once, when the session is finalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompletion {
    pub completed_at: DateTime<Utc>,
    pub overall_rating: f64,
    pub overall_feedback: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub recommendations: Vec<String>,
    pub total_time_spent: u32,
    pub points_awarded: u32,
}

/// One mock-interview attempt.
///
/// The session is active while `completion` is unset. The same structure is
/// mirrored into the session cache, so it serializes to plain JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MockSession {
    pub session_id: String,
    pub user_id: String,
    pub domain: String,
    pub difficulty: Difficulty,
    pub questions: Vec<InterviewQuestion>,
    #[serde(default)]
    pub answers: Vec<InterviewAnswer>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<SessionCompletion>,
}

impl MockSession {
    pub fn new(
        session_id: String,
        user_id: String,
        domain: String,
        difficulty: Difficulty,
        questions: Vec<InterviewQuestion>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            domain,
            difficulty,
            questions,
            answers: Vec::new(),
            created_at: truncate_to_millis(Utc::now()),
            completion: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_some()
    }

    pub fn question(&self, question_id: &str) -> Option<&InterviewQuestion> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Stores the answer, replacing an earlier answer to the same question.
    pub fn record_answer(&mut self, answer: InterviewAnswer) {
        match self
            .answers
            .iter_mut()
            .find(|existing| existing.question_id == answer.question_id)
        {
            Some(existing) => *existing = answer,
            None => self.answers.push(answer),
        }
    }
}

/// Aggregate figures computed at completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    pub total_questions: usize,
    pub answered_questions: usize,
    pub mean_rating: f64,
    pub total_time_spent: u32,
}

impl SessionStats {
    pub fn from_session(session: &MockSession) -> Self {
        let answered_questions = session.answers.len();
        let rating_sum: u32 = session.answers.iter().map(|a| u32::from(a.rating)).sum();
        let mean_rating = if answered_questions == 0 {
            0.0
        } else {
            f64::from(rating_sum) / answered_questions as f64
        };

        Self {
            total_questions: session.questions.len(),
            answered_questions,
            mean_rating,
            total_time_spent: session
                .answers
                .iter()
                .fold(0u32, |total, a| total.saturating_add(a.time_spent)),
        }
    }

    /// Mean rating rounded to one decimal place.
    pub fn overall_rating(&self) -> f64 {
        (self.mean_rating * 10.0).round() / 10.0
    }
}

// ---- HTTP payloads ----

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMockInterviewRequest {
    #[validate(length(min = 1, max = 200, message = "domain must not be empty"))]
    pub domain: String,
    pub difficulty: Difficulty,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMockAnswerRequest {
    #[validate(length(min = 1, message = "questionId must not be empty"))]
    pub question_id: String,
    #[validate(length(min = 1, message = "answer must not be empty"))]
    pub answer: String,
    pub time_spent: i64,
}

/// Question as shown to the candidate; the reference answer stays server-side.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub time_limit: u32,
}

impl From<&InterviewQuestion> for QuestionView {
    fn from(question: &InterviewQuestion) -> Self {
        Self {
            id: question.id.clone(),
            title: question.title.clone(),
            description: question.description.clone(),
            time_limit: question.time_limit,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMockInterviewResponse {
    pub session_id: String,
    pub domain: String,
    pub difficulty: Difficulty,
    pub questions: Vec<QuestionView>,
}

impl From<&MockSession> for CreateMockInterviewResponse {
    fn from(session: &MockSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            domain: session.domain.clone(),
            difficulty: session.difficulty,
            questions: session.questions.iter().map(QuestionView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockSessionView {
    pub session_id: String,
    pub domain: String,
    pub difficulty: Difficulty,
    pub questions: Vec<QuestionView>,
    pub answers: Vec<InterviewAnswer>,
    pub current_question_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&MockSession> for MockSessionView {
    fn from(session: &MockSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            domain: session.domain.clone(),
            difficulty: session.difficulty,
            questions: session.questions.iter().map(QuestionView::from).collect(),
            answers: session.answers.clone(),
            current_question_index: session.answers.len().min(session.questions.len()),
            completed_at: session.completion.as_ref().map(|c| c.completed_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerVerdict {
    pub rating: u8,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerBreakdown {
    pub question_id: String,
    pub question: String,
    pub answer: String,
    pub rating: u8,
    pub feedback: String,
    pub time_spent: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub session_id: String,
    pub overall_rating: f64,
    pub total_questions: usize,
    pub answered_questions: usize,
    pub total_time_spent: u32,
    pub overall_feedback: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub recommendations: Vec<String>,
    pub individual_answers: Vec<AnswerBreakdown>,
    pub points_awarded: u32,
}

impl CompletionSummary {
    /// Builds the client-facing summary of a finalized session.
    pub fn new(session: &MockSession, completion: &SessionCompletion) -> Self {
        let individual_answers = session
            .answers
            .iter()
            .map(|answer| AnswerBreakdown {
                question_id: answer.question_id.clone(),
                question: session
                    .question(&answer.question_id)
                    .map(|q| q.title.clone())
                    .unwrap_or_default(),
                answer: answer.answer.clone(),
                rating: answer.rating,
                feedback: answer.feedback.clone(),
                time_spent: answer.time_spent,
            })
            .collect();

        Self {
            session_id: session.session_id.clone(),
            overall_rating: completion.overall_rating,
            total_questions: session.questions.len(),
            answered_questions: session.answers.len(),
            total_time_spent: completion.total_time_spent,
            overall_feedback: completion.overall_feedback.clone(),
            strengths: completion.strengths.clone(),
            improvements: completion.improvements.clone(),
            recommendations: completion.recommendations.clone(),
            individual_answers,
            points_awarded: completion.points_awarded,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub domain: String,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_rating: Option<f64>,
    pub answered_questions: usize,
    pub total_questions: usize,
}

impl From<&MockSession> for SessionSummary {
    fn from(session: &MockSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            domain: session.domain.clone(),
            difficulty: session.difficulty,
            created_at: session.created_at,
            completed_at: session.completion.as_ref().map(|c| c.completed_at),
            overall_rating: session.completion.as_ref().map(|c| c.overall_rating),
            answered_questions: session.answers.len(),
            total_questions: session.questions.len(),
        }
    }
}
