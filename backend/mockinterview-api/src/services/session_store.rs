//! Durable persistence of mock-interview sessions.
//!
//! The store is the authoritative replica of a session. Inserts report
//! duplicate session tokens as [`StoreError::DuplicateKey`] so callers can
//! mint a new token and retry; every other failure is a plain backend error.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, DateTime as BsonDateTime},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::metrics::track_db_operation;
use crate::models::{
    Difficulty, InterviewAnswer, InterviewQuestion, MockSession, SessionCompletion,
};
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

pub const MOCK_SESSIONS_COLLECTION: &str = "mock_sessions";

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session token already exists: {0}")]
    DuplicateKey(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session store error: {0}")]
    Backend(String),
    #[error("session document could not be (de)serialized: {0}")]
    Serialization(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        if let ErrorKind::Write(WriteFailure::WriteError(ref we)) = *err.kind {
            if we.code == DUPLICATE_KEY_CODE {
                return StoreError::DuplicateKey(we.message.clone());
            }
        }
        StoreError::Backend(err.to_string())
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result of the guarded completion update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// This call moved the session from active to completed.
    Completed,
    /// Another call completed the session first; nothing was written.
    AlreadyCompleted,
    /// No session with that token exists.
    NotFound,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &MockSession) -> Result<(), StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<MockSession>, StoreError>;

    /// Sessions owned by `user_id`, newest first.
    async fn find_by_owner(&self, user_id: &str) -> Result<Vec<MockSession>, StoreError>;

    /// Writes the completion fields and the final answer set, only if the
    /// session is still active.
    async fn complete(
        &self,
        token: &str,
        answers: &[InterviewAnswer],
        completion: &SessionCompletion,
    ) -> Result<CompleteOutcome, StoreError>;

    /// Atomically stores `answer`, replacing an earlier answer to the same
    /// question of the same active session.
    async fn upsert_answer(&self, token: &str, answer: &InterviewAnswer) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Storage shape of a session in MongoDB. Completion fields are flattened so
/// they can be set in a single `$set`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDocument {
    session_id: String,
    user_id: String,
    domain: String,
    difficulty: Difficulty,
    questions: Vec<InterviewQuestion>,
    #[serde(default)]
    answers: Vec<InterviewAnswer>,
    created_at: BsonDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<BsonDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    overall_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    overall_feedback: Option<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_time_spent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    points_awarded: Option<u32>,
}

impl From<&MockSession> for SessionDocument {
    fn from(session: &MockSession) -> Self {
        let completion = session.completion.as_ref();
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            domain: session.domain.clone(),
            difficulty: session.difficulty,
            questions: session.questions.clone(),
            answers: session.answers.clone(),
            created_at: chrono_to_bson(session.created_at),
            completed_at: completion.map(|c| chrono_to_bson(c.completed_at)),
            overall_rating: completion.map(|c| c.overall_rating),
            overall_feedback: completion.map(|c| c.overall_feedback.clone()),
            strengths: completion.map(|c| c.strengths.clone()).unwrap_or_default(),
            improvements: completion.map(|c| c.improvements.clone()).unwrap_or_default(),
            recommendations: completion
                .map(|c| c.recommendations.clone())
                .unwrap_or_default(),
            total_time_spent: completion.map(|c| c.total_time_spent),
            points_awarded: completion.map(|c| c.points_awarded),
        }
    }
}

impl From<SessionDocument> for MockSession {
    fn from(document: SessionDocument) -> Self {
        let completion = document.completed_at.map(|completed_at| SessionCompletion {
            completed_at: bson_to_chrono(completed_at),
            overall_rating: document.overall_rating.unwrap_or_default(),
            overall_feedback: document.overall_feedback.clone().unwrap_or_default(),
            strengths: document.strengths.clone(),
            improvements: document.improvements.clone(),
            recommendations: document.recommendations.clone(),
            total_time_spent: document.total_time_spent.unwrap_or_default(),
            points_awarded: document.points_awarded.unwrap_or_default(),
        });

        MockSession {
            session_id: document.session_id,
            user_id: document.user_id,
            domain: document.domain,
            difficulty: document.difficulty,
            questions: document.questions,
            answers: document.answers,
            created_at: bson_to_chrono(document.created_at),
            completion,
        }
    }
}

pub struct MongoSessionStore {
    mongo: Database,
    sessions: Collection<SessionDocument>,
}

impl MongoSessionStore {
    pub fn new(mongo: Database) -> Self {
        let sessions = mongo.collection(MOCK_SESSIONS_COLLECTION);
        Self { mongo, sessions }
    }

    /// Unique index on the session token, listing index on the owner.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let token_index = IndexModel::builder()
            .keys(doc! { "sessionId": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let owner_index = IndexModel::builder()
            .keys(doc! { "userId": 1, "createdAt": -1 })
            .build();

        self.sessions
            .create_indexes([token_index, owner_index])
            .await?;

        tracing::info!("Indexes ensured on {}", MOCK_SESSIONS_COLLECTION);
        Ok(())
    }

    async fn set_answer_in_place(
        &self,
        token: &str,
        answer: &InterviewAnswer,
        answer_bson: &Bson,
    ) -> Result<bool, StoreError> {
        let result = self
            .sessions
            .update_one(
                doc! {
                    "sessionId": token,
                    "completedAt": Bson::Null,
                    "answers.questionId": &answer.question_id,
                },
                doc! { "$set": { "answers.$": answer_bson.clone() } },
            )
            .await?;
        Ok(result.matched_count > 0)
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn insert(&self, session: &MockSession) -> Result<(), StoreError> {
        let document = SessionDocument::from(session);
        track_db_operation("insert", MOCK_SESSIONS_COLLECTION, async {
            self.sessions.insert_one(&document).await?;
            Ok::<(), StoreError>(())
        })
        .await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<MockSession>, StoreError> {
        track_db_operation("find_one", MOCK_SESSIONS_COLLECTION, async {
            let document = self.sessions.find_one(doc! { "sessionId": token }).await?;
            Ok::<_, StoreError>(document.map(MockSession::from))
        })
        .await
    }

    async fn find_by_owner(&self, user_id: &str) -> Result<Vec<MockSession>, StoreError> {
        track_db_operation("find", MOCK_SESSIONS_COLLECTION, async {
            let options = FindOptions::builder()
                .sort(doc! { "createdAt": -1 })
                .build();
            let cursor = self
                .sessions
                .find(doc! { "userId": user_id })
                .with_options(options)
                .await?;
            let documents: Vec<SessionDocument> = cursor.try_collect().await?;
            Ok::<_, StoreError>(documents.into_iter().map(MockSession::from).collect())
        })
        .await
    }

    async fn complete(
        &self,
        token: &str,
        answers: &[InterviewAnswer],
        completion: &SessionCompletion,
    ) -> Result<CompleteOutcome, StoreError> {
        let answers_bson = bson::to_bson(answers)?;

        track_db_operation("complete", MOCK_SESSIONS_COLLECTION, async {
            let result = self
                .sessions
                .update_one(
                    doc! { "sessionId": token, "completedAt": Bson::Null },
                    doc! {
                        "$set": {
                            "answers": answers_bson,
                            "completedAt": chrono_to_bson(completion.completed_at),
                            "overallRating": completion.overall_rating,
                            "overallFeedback": &completion.overall_feedback,
                            "strengths": &completion.strengths,
                            "improvements": &completion.improvements,
                            "recommendations": &completion.recommendations,
                            "totalTimeSpent": i64::from(completion.total_time_spent),
                            "pointsAwarded": i64::from(completion.points_awarded),
                        }
                    },
                )
                .await?;

            if result.matched_count > 0 {
                return Ok(CompleteOutcome::Completed);
            }

            let existing = self.sessions.find_one(doc! { "sessionId": token }).await?;
            Ok::<_, StoreError>(match existing {
                Some(_) => CompleteOutcome::AlreadyCompleted,
                None => CompleteOutcome::NotFound,
            })
        })
        .await
    }

    async fn upsert_answer(&self, token: &str, answer: &InterviewAnswer) -> Result<(), StoreError> {
        let answer_bson = bson::to_bson(answer)?;

        track_db_operation("upsert_answer", MOCK_SESSIONS_COLLECTION, async {
            if self.set_answer_in_place(token, answer, &answer_bson).await? {
                return Ok(());
            }

            let pushed = self
                .sessions
                .update_one(
                    doc! {
                        "sessionId": token,
                        "completedAt": Bson::Null,
                        "answers.questionId": { "$ne": &answer.question_id },
                    },
                    doc! { "$push": { "answers": answer_bson.clone() } },
                )
                .await?;
            if pushed.matched_count > 0 {
                return Ok(());
            }

            // A concurrent submit for the same question won the push.
            if self.set_answer_in_place(token, answer, &answer_bson).await? {
                return Ok(());
            }

            Err(StoreError::NotFound(format!(
                "no active session with token {}",
                token
            )))
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            self.mongo.run_command(doc! { "ping": 1 }),
        )
        .await
        .map_err(|_| StoreError::Backend("MongoDB timeout after 1s".to_string()))??;
        Ok(())
    }
}

/// Store kept in process memory, with the same semantics as the MongoDB
/// store. Used by the test suite and for running without a database.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, MockSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &MockSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::DuplicateKey(session.session_id.clone()));
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<MockSession>, StoreError> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn find_by_owner(&self, user_id: &str) -> Result<Vec<MockSession>, StoreError> {
        let mut owned: Vec<MockSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn complete(
        &self,
        token: &str,
        answers: &[InterviewAnswer],
        completion: &SessionCompletion,
    ) -> Result<CompleteOutcome, StoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(token) else {
            return Ok(CompleteOutcome::NotFound);
        };
        if session.is_completed() {
            return Ok(CompleteOutcome::AlreadyCompleted);
        }
        session.answers = answers.to_vec();
        session.completion = Some(completion.clone());
        Ok(CompleteOutcome::Completed)
    }

    async fn upsert_answer(&self, token: &str, answer: &InterviewAnswer) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token) {
            Some(session) if !session.is_completed() => {
                session.record_answer(answer.clone());
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!(
                "no active session with token {}",
                token
            ))),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
