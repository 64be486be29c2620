use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use crate::metrics::ANSWERS_JUDGED_TOTAL;
use crate::models::{AnswerVerdict, MAX_RATING, MIN_RATING};
use crate::services::completion::{
    parse_json_payload, CompletionClient, CompletionError, CompletionPurpose, CompletionRequest,
};

pub const FALLBACK_FEEDBACK: &str = "We're sorry, automated evaluation is temporarily unavailable. \
     Your answer has been recorded and received a provisional score.";

const DEFAULT_FALLBACK_RANGE: RangeInclusive<u8> = 5..=8;

const EVALUATION_SYSTEM_PROMPT: &str = "You are a strict technical interviewer evaluating a \
candidate's answer. Compare the answer with the reference answer. Rate it from 1 to 10 where \
1 is wrong or irrelevant and 10 is complete and precise. Do not inflate scores. Give 2-3 \
sentences of concrete feedback. Respond only with JSON: {\"rating\": <integer 1-10>, \
\"feedback\": \"<text>\"}";

/// Input for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct JudgeInput<'a> {
    pub question: &'a str,
    pub description: &'a str,
    pub reference_answer: &'a str,
    pub submitted_answer: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Model,
    Fallback,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::Model => "model",
            VerdictSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub verdict: AnswerVerdict,
    pub source: VerdictSource,
}

/// Scores a free-text answer. Never fails: every path yields a rating in
/// `1..=10` and a feedback text.
#[async_trait]
pub trait AnswerJudge: Send + Sync {
    async fn score(&self, input: JudgeInput<'_>) -> Judgement;
}

pub fn clamp_rating(raw: f64) -> u8 {
    if raw.is_nan() {
        return MIN_RATING;
    }
    raw.round().clamp(f64::from(MIN_RATING), f64::from(MAX_RATING)) as u8
}

/// Placeholder verdict used whenever the model cannot be consulted.
#[derive(Debug, Clone)]
pub struct FallbackJudge {
    range: RangeInclusive<u8>,
}

impl Default for FallbackJudge {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_RANGE)
    }
}

impl FallbackJudge {
    pub fn new(range: RangeInclusive<u8>) -> Self {
        let low = (*range.start()).clamp(MIN_RATING, MAX_RATING);
        let high = (*range.end()).clamp(low, MAX_RATING);
        Self { range: low..=high }
    }

    pub fn range(&self) -> &RangeInclusive<u8> {
        &self.range
    }

    pub fn verdict(&self) -> AnswerVerdict {
        let rating = rand::rng().random_range(self.range.clone());
        AnswerVerdict {
            rating: clamp_rating(f64::from(rating)),
            feedback: FALLBACK_FEEDBACK.to_string(),
        }
    }
}

#[async_trait]
impl AnswerJudge for FallbackJudge {
    async fn score(&self, _input: JudgeInput<'_>) -> Judgement {
        ANSWERS_JUDGED_TOTAL
            .with_label_values(&[VerdictSource::Fallback.as_str()])
            .inc();
        Judgement {
            verdict: self.verdict(),
            source: VerdictSource::Fallback,
        }
    }
}

/// Judge backed by the completion service, degrading to [`FallbackJudge`].
pub struct AiAnswerJudge {
    client: Arc<dyn CompletionClient>,
    model: String,
    fallback: FallbackJudge,
}

impl AiAnswerJudge {
    pub fn new(client: Arc<dyn CompletionClient>, model: String, fallback: FallbackJudge) -> Self {
        Self {
            client,
            model,
            fallback,
        }
    }

    fn build_prompt(input: &JudgeInput<'_>) -> String {
        format!(
            "Question: {}\nContext: {}\nReference answer: {}\nCandidate answer: {}\n\n\
             Evaluate the candidate answer.",
            input.question, input.description, input.reference_answer, input.submitted_answer
        )
    }

    async fn ask_model(&self, input: &JudgeInput<'_>) -> Result<AnswerVerdict, CompletionError> {
        let raw = self
            .client
            .complete(CompletionRequest {
                purpose: CompletionPurpose::AnswerEvaluation,
                model: self.model.clone(),
                system_prompt: EVALUATION_SYSTEM_PROMPT.to_string(),
                user_prompt: Self::build_prompt(input),
                json_output: true,
                max_tokens: 300,
                temperature: 0.2,
            })
            .await?;

        parse_verdict(&parse_json_payload(&raw)?)
    }
}

#[async_trait]
impl AnswerJudge for AiAnswerJudge {
    async fn score(&self, input: JudgeInput<'_>) -> Judgement {
        match self.ask_model(&input).await {
            Ok(verdict) => {
                ANSWERS_JUDGED_TOTAL
                    .with_label_values(&[VerdictSource::Model.as_str()])
                    .inc();
                Judgement {
                    verdict,
                    source: VerdictSource::Model,
                }
            }
            Err(e) => {
                tracing::warn!("Answer evaluation failed ({}), using fallback verdict", e);
                self.fallback.score(input).await
            }
        }
    }
}

/// Validates the `{rating, feedback}` shape and clamps the rating.
pub fn parse_verdict(value: &Value) -> Result<AnswerVerdict, CompletionError> {
    let rating = value
        .get("rating")
        .and_then(Value::as_f64)
        .ok_or_else(|| CompletionError::Malformed("rating is not numeric".to_string()))?;
    let feedback = value
        .get("feedback")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| CompletionError::Malformed("feedback is not a string".to_string()))?;

    Ok(AnswerVerdict {
        rating: clamp_rating(rating),
        feedback: feedback.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedClient {
        reply: Mutex<Option<Result<String, CompletionError>>>,
    }

    impl CannedClient {
        fn new(reply: Result<String, CompletionError>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for CannedClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, CompletionError> {
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(CompletionError::Empty))
        }
    }

    fn input() -> JudgeInput<'static> {
        JudgeInput {
            question: "What is REST?",
            description: "Explain the architectural style",
            reference_answer: "Stateless resource-oriented HTTP APIs",
            submitted_answer: "uses REST and caching",
        }
    }

    fn judge(reply: Result<String, CompletionError>) -> AiAnswerJudge {
        AiAnswerJudge::new(CannedClient::new(reply), "test-model".into(), FallbackJudge::default())
    }

    #[test]
    fn clamp_rating_bounds_values() {
        assert_eq!(clamp_rating(-3.0), 1);
        assert_eq!(clamp_rating(0.0), 1);
        assert_eq!(clamp_rating(6.4), 6);
        assert_eq!(clamp_rating(6.5), 7);
        assert_eq!(clamp_rating(42.0), 10);
        assert_eq!(clamp_rating(f64::NAN), 1);
    }

    #[test]
    fn parse_verdict_rejects_wrong_shapes() {
        assert!(parse_verdict(&json!({"rating": "seven", "feedback": "x"})).is_err());
        assert!(parse_verdict(&json!({"rating": 7, "feedback": 3})).is_err());
        assert!(parse_verdict(&json!({"rating": 7, "feedback": "  "})).is_err());
        assert!(parse_verdict(&json!({"feedback": "x"})).is_err());
    }

    #[test]
    fn fallback_ratings_stay_in_range() {
        let fallback = FallbackJudge::default();
        for _ in 0..500 {
            let verdict = fallback.verdict();
            assert!(fallback.range().contains(&verdict.rating));
            assert!((1..=10).contains(&verdict.rating));
            assert_eq!(verdict.feedback, FALLBACK_FEEDBACK);
        }
    }

    #[test]
    fn fallback_range_is_forced_into_rating_bounds() {
        let fallback = FallbackJudge::new(0..=15);
        assert_eq!(fallback.range(), &(1..=10));
    }

    #[tokio::test]
    async fn model_verdict_is_clamped() {
        let judgement = judge(Ok(r#"{"rating": 14, "feedback": "Excellent depth."}"#.into()))
            .score(input())
            .await;
        assert_eq!(judgement.source, VerdictSource::Model);
        assert_eq!(judgement.verdict.rating, 10);
        assert_eq!(judgement.verdict.feedback, "Excellent depth.");
    }

    #[tokio::test]
    async fn malformed_reply_falls_back() {
        let judgement = judge(Ok("I would give this a seven".into()))
            .score(input())
            .await;
        assert_eq!(judgement.source, VerdictSource::Fallback);
        assert!((5..=8).contains(&judgement.verdict.rating));
    }

    #[tokio::test]
    async fn service_errors_fall_back() {
        for error in [
            CompletionError::RateLimited,
            CompletionError::Empty,
            CompletionError::Transport("connection reset".into()),
        ] {
            let judgement = judge(Err(error)).score(input()).await;
            assert_eq!(judgement.source, VerdictSource::Fallback);
            assert_eq!(judgement.verdict.feedback, FALLBACK_FEEDBACK);
        }
    }
}
