use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::models::{Difficulty, InterviewQuestion};
use crate::services::completion::{
    parse_json_payload, CompletionClient, CompletionError, CompletionPurpose, CompletionRequest,
};

const GENERATION_SYSTEM_PROMPT: &str = "You are an experienced technical interviewer. Write \
realistic interview questions for the requested domain and difficulty. Each question needs a \
concise reference answer an expert would give. Respond only with JSON.";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("question generation failed: {0}")]
    Completion(#[from] CompletionError),
    #[error("question payload is invalid: {0}")]
    InvalidPayload(String),
    #[error("expected {expected} questions, generator returned {actual}")]
    TooFewQuestions { expected: usize, actual: usize },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedQuestion {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    reference_answer: String,
    #[serde(default)]
    time_limit: Value,
}

/// Asks the completion service for the question set of a new session.
pub struct QuestionGenerator {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl QuestionGenerator {
    pub fn new(client: Arc<dyn CompletionClient>, model: String) -> Self {
        Self { client, model }
    }

    pub async fn generate(
        &self,
        domain: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<InterviewQuestion>, GenerationError> {
        let raw = self
            .client
            .complete(CompletionRequest {
                purpose: CompletionPurpose::QuestionGeneration,
                model: self.model.clone(),
                system_prompt: GENERATION_SYSTEM_PROMPT.to_string(),
                user_prompt: build_prompt(domain, difficulty, count),
                json_output: true,
                max_tokens: 2000,
                temperature: 0.7,
            })
            .await?;

        let payload = parse_json_payload(&raw)?;
        let questions = parse_questions(&payload, difficulty, count)?;

        tracing::info!(
            "Generated {} questions for domain={} difficulty={}",
            questions.len(),
            domain,
            difficulty
        );

        Ok(questions)
    }
}

fn build_prompt(domain: &str, difficulty: Difficulty, count: usize) -> String {
    format!(
        "Generate exactly {count} {difficulty} level interview questions about \"{domain}\".\n\
         Return JSON of the form:\n\
         {{\"questions\": [{{\"id\": \"q1\", \"title\": \"<question>\", \
         \"description\": \"<what the interviewer expects>\", \
         \"referenceAnswer\": \"<model answer>\", \"timeLimit\": <seconds>}}]}}\n\
         Use a time limit between 60 and 600 seconds that fits the question."
    )
}

/// Turns the `questions` array into exactly `count` questions.
///
/// Entries without a title are skipped. Surplus entries are dropped. Blank or
/// repeated ids become `q<n>`; missing or non-positive time limits use the
/// difficulty default.
pub fn parse_questions(
    payload: &Value,
    difficulty: Difficulty,
    count: usize,
) -> Result<Vec<InterviewQuestion>, GenerationError> {
    let entries = payload
        .get("questions")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerationError::InvalidPayload("missing questions array".to_string()))?;

    let mut seen_ids = HashSet::new();
    let mut questions = Vec::with_capacity(count);

    for entry in entries {
        if questions.len() == count {
            break;
        }
        let Ok(generated) = serde_json::from_value::<GeneratedQuestion>(entry.clone()) else {
            continue;
        };
        let title = generated.title.trim();
        if title.is_empty() {
            continue;
        }

        let position = questions.len() + 1;
        let mut id = match &generated.id {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        if id.is_empty() || seen_ids.contains(&id) {
            let mut n = position;
            id = format!("q{}", n);
            while seen_ids.contains(&id) {
                n += count;
                id = format!("q{}", n);
            }
        }
        seen_ids.insert(id.clone());

        let time_limit = generated
            .time_limit
            .as_f64()
            .filter(|secs| *secs >= 1.0)
            .map(|secs| secs.round().min(f64::from(u32::MAX)) as u32)
            .unwrap_or_else(|| difficulty.default_time_limit_seconds());

        questions.push(InterviewQuestion {
            id,
            title: title.to_string(),
            description: generated.description.trim().to_string(),
            reference_answer: generated.reference_answer.trim().to_string(),
            time_limit,
        });
    }

    if questions.len() < count {
        return Err(GenerationError::TooFewQuestions {
            expected: count,
            actual: questions.len(),
        });
    }

    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: Value, title: &str, time_limit: Value) -> Value {
        json!({
            "id": id,
            "title": title,
            "description": "desc",
            "referenceAnswer": "ref",
            "timeLimit": time_limit,
        })
    }

    #[test]
    fn parses_five_questions() {
        let payload = json!({
            "questions": (1..=5)
                .map(|i| entry(json!(format!("q{}", i)), &format!("Question {}", i), json!(90)))
                .collect::<Vec<_>>()
        });

        let questions = parse_questions(&payload, Difficulty::Beginner, 5).unwrap();
        assert_eq!(questions.len(), 5);
        assert_eq!(questions[2].id, "q3");
        assert!(questions.iter().all(|q| q.time_limit == 90));
        assert_eq!(questions[0].reference_answer, "ref");
    }

    #[test]
    fn truncates_surplus_and_repairs_ids_and_time_limits() {
        let payload = json!({
            "questions": [
                entry(json!("a"), "One", json!(0)),
                entry(json!("a"), "Two", json!(null)),
                entry(json!(7), "Three", json!(-20)),
                entry(json!(""), "Four", json!(45.6)),
                entry(json!(null), "Five", json!("soon")),
                entry(json!("f"), "Six", json!(60)),
            ]
        });

        let questions = parse_questions(&payload, Difficulty::Advanced, 5).unwrap();
        let ids: Vec<&str> = questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "q2", "7", "q4", "q5"]);
        assert_eq!(questions[0].time_limit, 240);
        assert_eq!(questions[1].time_limit, 240);
        assert_eq!(questions[2].time_limit, 240);
        assert_eq!(questions[3].time_limit, 46);
        assert!(questions.iter().all(|q| q.time_limit > 0));
    }

    #[test]
    fn too_few_questions_is_an_error() {
        let payload = json!({
            "questions": [entry(json!("q1"), "Only one", json!(60)), entry(json!("q2"), "  ", json!(60))]
        });

        let err = parse_questions(&payload, Difficulty::Intermediate, 5).unwrap_err();
        assert!(matches!(
            err,
            GenerationError::TooFewQuestions {
                expected: 5,
                actual: 1
            }
        ));
    }

    #[test]
    fn missing_array_is_an_error() {
        let err = parse_questions(&json!({"items": []}), Difficulty::Beginner, 5).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidPayload(_)));
    }
}
