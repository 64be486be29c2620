//! Session lifecycle: create, read, answer, complete, list.
//!
//! The store is read first and is authoritative; the cache backs it up on the
//! hot path. Completion is the only step that synchronizes the two: the
//! store gets the guarded completion update and the cache entry is evicted.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::Utc;

use crate::metrics::{
    record_cache_hit, record_cache_miss, SESSIONS_ACTIVE, SESSIONS_TOTAL, STORE_FAILURES_TOTAL,
};
use crate::models::{
    AnswerVerdict, CompletionSummary, Difficulty, InterviewAnswer, MockSession, SessionCompletion,
    SessionStats, SessionSummary, UserAccount, QUESTIONS_PER_SESSION,
};
use crate::services::answer_judge::{AiAnswerJudge, AnswerJudge, FallbackJudge, JudgeInput};
use crate::services::completion::CompletionClient;
use crate::services::points_ledger::{PointsAward, PointsLedger};
use crate::services::question_generator::{GenerationError, QuestionGenerator};
use crate::services::session_cache::SessionCache;
use crate::services::session_review::SessionReviewer;
use crate::services::session_store::{CompleteOutcome, SessionStore, StoreError};
use crate::services::user_directory::UserDirectory;
use crate::utils::retry::RetryConfig;
use crate::utils::time::truncate_to_millis;
use crate::utils::token::{completion_variant, mint_session_token};

#[derive(Debug, thiserror::Error)]
pub enum InterviewError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("mock interview session not found: {0}")]
    SessionNotFound(String),
    #[error("question {0} is not part of this session")]
    QuestionNotFound(String),
    #[error("cannot complete a session without answers")]
    EmptySession,
    #[error("mock interview session {0} is already completed")]
    SessionCompleted(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("failed to persist mock interview session: {0}")]
    Persistence(String),
}

/// Collaborators of the interview service.
#[derive(Clone)]
pub struct InterviewBackends {
    pub store: Arc<dyn SessionStore>,
    pub cache: Arc<dyn SessionCache>,
    pub completion: Arc<dyn CompletionClient>,
    pub ledger: Arc<dyn PointsLedger>,
    pub users: Arc<dyn UserDirectory>,
}

#[derive(Debug, Clone)]
pub struct InterviewSettings {
    pub model: String,
    pub question_count: usize,
    pub creation_retry: RetryConfig,
    pub fallback_ratings: RangeInclusive<u8>,
}

impl Default for InterviewSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            question_count: QUESTIONS_PER_SESSION,
            creation_retry: RetryConfig::token_collision(),
            fallback_ratings: 5..=8,
        }
    }
}

pub struct MockInterviewService {
    store: Arc<dyn SessionStore>,
    cache: Arc<dyn SessionCache>,
    ledger: Arc<dyn PointsLedger>,
    users: Arc<dyn UserDirectory>,
    generator: QuestionGenerator,
    judge: Box<dyn AnswerJudge>,
    reviewer: SessionReviewer,
    question_count: usize,
    creation_retry: RetryConfig,
}

impl MockInterviewService {
    pub fn new(backends: InterviewBackends, settings: InterviewSettings) -> Self {
        let judge = AiAnswerJudge::new(
            backends.completion.clone(),
            settings.model.clone(),
            FallbackJudge::new(settings.fallback_ratings),
        );

        Self {
            store: backends.store,
            cache: backends.cache,
            ledger: backends.ledger,
            users: backends.users,
            generator: QuestionGenerator::new(backends.completion.clone(), settings.model.clone()),
            judge: Box::new(judge),
            reviewer: SessionReviewer::new(backends.completion, settings.model),
            question_count: settings.question_count,
            creation_retry: settings.creation_retry,
        }
    }

    /// Starts a session with freshly generated questions.
    pub async fn create(
        &self,
        auth_id: &str,
        domain: &str,
        difficulty: Difficulty,
    ) -> Result<MockSession, InterviewError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(InterviewError::InvalidInput(
                "domain must not be empty".to_string(),
            ));
        }

        let user = self.resolve_user(auth_id).await?;

        let questions = self
            .generator
            .generate(domain, difficulty, self.question_count)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    "Question generation failed for user={} domain={}: {}",
                    user.id,
                    domain,
                    e
                )
            })?;

        let session = MockSession::new(
            mint_session_token(),
            user.id.clone(),
            domain.to_string(),
            difficulty,
            questions,
        );
        let session = self.insert_with_fresh_token(session).await?;

        if let Err(e) = self.cache.set(&session.session_id, &session).await {
            tracing::warn!(
                "Failed to mirror session={} into cache: {}",
                session.session_id,
                e
            );
        }

        SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        SESSIONS_ACTIVE.inc();

        tracing::info!(
            "Mock interview created: {} for user: {} ({}, {})",
            session.session_id,
            user.id,
            domain,
            difficulty
        );

        Ok(session)
    }

    /// Inserts the session, minting a new token after each duplicate-key
    /// failure until the retry budget is spent.
    async fn insert_with_fresh_token(
        &self,
        mut session: MockSession,
    ) -> Result<MockSession, InterviewError> {
        let max_attempts = self.creation_retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.store.insert(&session).await {
                Ok(()) => return Ok(session),
                Err(StoreError::DuplicateKey(_)) if attempt < max_attempts => {
                    tracing::warn!(
                        "Session token collision on {} (attempt {}/{}), minting a new token",
                        session.session_id,
                        attempt,
                        max_attempts
                    );
                    self.creation_retry.pause_after(attempt).await;
                    session.session_id = mint_session_token();
                }
                Err(StoreError::DuplicateKey(token)) => {
                    tracing::error!(
                        "Giving up after {} session token collisions (last: {})",
                        attempt,
                        token
                    );
                    return Err(InterviewError::Persistence(format!(
                        "could not allocate a unique session token after {} attempts",
                        attempt
                    )));
                }
                Err(e) => {
                    tracing::error!("Failed to insert session {}: {}", session.session_id, e);
                    return Err(InterviewError::Persistence(e.to_string()));
                }
            }
        }
    }

    /// Resolves a session, store first, cache second.
    pub async fn get_session(&self, token: &str) -> Result<MockSession, InterviewError> {
        match self.store.find_by_token(token).await {
            Ok(Some(session)) => {
                if !session.is_completed() {
                    self.refresh_cache(session.clone());
                }
                return Ok(session);
            }
            Ok(None) => {
                tracing::debug!("Session {} not in store, trying cache", token);
            }
            Err(e) => {
                tracing::warn!("Store lookup for session {} failed ({}), trying cache", token, e);
            }
        }

        match self.cache.get(token).await {
            Ok(Some(session)) => {
                record_cache_hit();
                Ok(session)
            }
            Ok(None) => {
                record_cache_miss();
                Err(InterviewError::SessionNotFound(token.to_string()))
            }
            Err(e) => {
                tracing::warn!("Cache lookup for session {} failed: {}", token, e);
                Err(InterviewError::SessionNotFound(token.to_string()))
            }
        }
    }

    /// Like [`Self::get_session`], but only for the owner.
    pub async fn get_session_for(
        &self,
        auth_id: &str,
        token: &str,
    ) -> Result<MockSession, InterviewError> {
        let user = self.resolve_user(auth_id).await?;
        self.owned_session(&user, token).await
    }

    pub async fn submit_answer(
        &self,
        auth_id: &str,
        token: &str,
        question_id: &str,
        answer_text: &str,
        time_spent: i64,
    ) -> Result<AnswerVerdict, InterviewError> {
        if answer_text.trim().is_empty() {
            return Err(InterviewError::InvalidInput(
                "answer must not be empty".to_string(),
            ));
        }
        if time_spent < 0 {
            return Err(InterviewError::InvalidInput(
                "timeSpent must not be negative".to_string(),
            ));
        }

        let user = self.resolve_user(auth_id).await?;
        let mut session = self.owned_session(&user, token).await?;
        if session.is_completed() {
            return Err(InterviewError::SessionCompleted(token.to_string()));
        }

        let question = session
            .question(question_id)
            .cloned()
            .ok_or_else(|| InterviewError::QuestionNotFound(question_id.to_string()))?;

        let judgement = self
            .judge
            .score(JudgeInput {
                question: &question.title,
                description: &question.description,
                reference_answer: &question.reference_answer,
                submitted_answer: answer_text,
            })
            .await;

        let answer = InterviewAnswer {
            question_id: question.id.clone(),
            answer: answer_text.to_string(),
            rating: judgement.verdict.rating,
            feedback: judgement.verdict.feedback.clone(),
            time_spent: u32::try_from(time_spent).unwrap_or(u32::MAX),
        };

        session.record_answer(answer.clone());
        if let Err(e) = self.cache.set(token, &session).await {
            tracing::warn!("Failed to update cached session={}: {}", token, e);
        }

        if let Err(e) = self.store.upsert_answer(token, &answer).await {
            STORE_FAILURES_TOTAL
                .with_label_values(&["upsert_answer"])
                .inc();
            tracing::error!(
                "Failed to store answer for session={} question={}: {}",
                token,
                question.id,
                e
            );
        }

        tracing::info!(
            "Answer recorded: session={} question={} rating={} ({})",
            token,
            question.id,
            answer.rating,
            judgement.source.as_str()
        );

        Ok(judgement.verdict)
    }

    /// Finalizes the session. Points are credited only by the call that
    /// performs the transition; repeated calls get the stored summary.
    pub async fn complete(
        &self,
        auth_id: &str,
        token: &str,
    ) -> Result<CompletionSummary, InterviewError> {
        let user = self.resolve_user(auth_id).await?;
        let mut session = self.owned_session(&user, token).await?;

        if let Some(completion) = &session.completion {
            tracing::info!("Session {} already completed, returning stored summary", token);
            return Ok(CompletionSummary::new(&session, completion));
        }
        if session.answers.is_empty() {
            return Err(InterviewError::EmptySession);
        }

        let stats = SessionStats::from_session(&session);
        let review = self.reviewer.review(&session, &stats).await;
        let award = PointsAward::mock_interview(session.difficulty, stats.mean_rating);

        let completion = SessionCompletion {
            completed_at: truncate_to_millis(Utc::now()),
            overall_rating: stats.overall_rating(),
            overall_feedback: review.overall_feedback,
            strengths: review.strengths,
            improvements: review.improvements,
            recommendations: review.recommendations,
            total_time_spent: stats.total_time_spent,
            points_awarded: award.total(),
        };

        match self
            .store
            .complete(token, &session.answers, &completion)
            .await
        {
            Ok(CompleteOutcome::Completed) => {
                session.completion = Some(completion);
            }
            Ok(CompleteOutcome::AlreadyCompleted) => {
                self.evict(token).await;
                return self.stored_summary(token).await;
            }
            Ok(CompleteOutcome::NotFound) => {
                tracing::warn!("Session {} missing from store at completion", token);
                session = self.preserve_completed(session, completion).await?;
            }
            Err(e) => {
                STORE_FAILURES_TOTAL.with_label_values(&["complete"]).inc();
                tracing::error!("Completion update for session {} failed: {}", token, e);
                session = self.preserve_completed(session, completion).await?;
            }
        }

        if let Err(e) = self.ledger.award(&session.user_id, award).await {
            tracing::error!(
                "Failed to award {} points to user={} for session={}: {}",
                award.total(),
                session.user_id,
                session.session_id,
                e
            );
        }

        self.evict(token).await;

        SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
        if SESSIONS_ACTIVE.get() > 0 {
            SESSIONS_ACTIVE.dec();
        }

        let Some(completion) = session.completion.as_ref() else {
            return Err(InterviewError::Persistence(format!(
                "session {} has no completion after finalizing",
                token
            )));
        };
        tracing::info!(
            "Mock interview completed: {} rating={} points={}",
            session.session_id,
            completion.overall_rating,
            completion.points_awarded
        );

        Ok(CompletionSummary::new(&session, completion))
    }

    /// Sessions of the caller, newest first.
    pub async fn list_sessions(&self, auth_id: &str) -> Result<Vec<SessionSummary>, InterviewError> {
        let user = self.resolve_user(auth_id).await?;
        let sessions = self
            .store
            .find_by_owner(&user.id)
            .await
            .map_err(|e| InterviewError::Persistence(e.to_string()))?;
        Ok(sessions.iter().map(SessionSummary::from).collect())
    }

    async fn resolve_user(&self, auth_id: &str) -> Result<UserAccount, InterviewError> {
        match self.users.find_by_auth_id(auth_id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(InterviewError::UserNotFound(auth_id.to_string())),
            Err(e) => {
                tracing::error!("User lookup for {} failed: {}", auth_id, e);
                Err(InterviewError::Persistence(e.to_string()))
            }
        }
    }

    async fn owned_session(
        &self,
        user: &UserAccount,
        token: &str,
    ) -> Result<MockSession, InterviewError> {
        let session = self.get_session(token).await?;
        if session.user_id != user.id {
            tracing::warn!(
                "User {} requested session {} owned by someone else",
                user.id,
                token
            );
            return Err(InterviewError::SessionNotFound(token.to_string()));
        }
        Ok(session)
    }

    /// Detached cache refresh. An existing entry is left alone, since it may
    /// hold answers the store missed. If the session got completed while the
    /// refresh was in flight, the entry is dropped again so eviction holds.
    fn refresh_cache(&self, session: MockSession) {
        let cache = self.cache.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let token = session.session_id.clone();
            match cache.set_if_absent(&token, &session).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    tracing::warn!("Failed to refresh cached session={}: {}", token, e);
                    return;
                }
            }
            if let Ok(Some(latest)) = store.find_by_token(&token).await {
                if latest.is_completed() {
                    if let Err(e) = cache.delete(&token).await {
                        tracing::warn!("Failed to evict cached session={}: {}", token, e);
                    }
                }
            }
        });
    }

    async fn evict(&self, token: &str) {
        if let Err(e) = self.cache.delete(token).await {
            tracing::warn!("Failed to evict cached session={}: {}", token, e);
        }
    }

    async fn stored_summary(&self, token: &str) -> Result<CompletionSummary, InterviewError> {
        let stored = self
            .store
            .find_by_token(token)
            .await
            .map_err(|e| InterviewError::Persistence(e.to_string()))?;

        match stored {
            Some(session) => match session.completion.as_ref() {
                Some(completion) => Ok(CompletionSummary::new(&session, completion)),
                None => Err(InterviewError::Persistence(format!(
                    "session {} reported completed but has no completion",
                    token
                ))),
            },
            None => Err(InterviewError::SessionNotFound(token.to_string())),
        }
    }

    /// Saves the completed session under a new token when the original record
    /// could not be updated.
    async fn preserve_completed(
        &self,
        mut session: MockSession,
        completion: SessionCompletion,
    ) -> Result<MockSession, InterviewError> {
        let original = session.session_id.clone();
        session.session_id = completion_variant(&original);
        session.completion = Some(completion);

        match self.store.insert(&session).await {
            Ok(()) => {
                tracing::warn!(
                    "Completed session {} preserved as {}",
                    original,
                    session.session_id
                );
                Ok(session)
            }
            Err(e) => {
                STORE_FAILURES_TOTAL
                    .with_label_values(&["completion_fallback_insert"])
                    .inc();
                tracing::error!(
                    "Failed to preserve completed session {}: {}",
                    original,
                    e
                );
                Err(InterviewError::Persistence(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::completion::{CompletionError, CompletionPurpose, CompletionRequest};
    use crate::services::session_cache::InMemorySessionCache;
    use crate::services::session_store::InMemorySessionStore;
    use crate::services::user_directory::InMemoryAccounts;
    use async_trait::async_trait;
    use serde_json::json;

    /// Generates valid questions and fails every other purpose.
    struct QuestionsOnly;

    #[async_trait]
    impl CompletionClient for QuestionsOnly {
        async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
            match request.purpose {
                CompletionPurpose::QuestionGeneration => {
                    let questions: Vec<_> = (1..=5)
                        .map(|i| {
                            json!({
                                "id": format!("q{}", i),
                                "title": format!("Question {}", i),
                                "description": "desc",
                                "referenceAnswer": "ref",
                                "timeLimit": 120
                            })
                        })
                        .collect();
                    Ok(json!({ "questions": questions }).to_string())
                }
                _ => Err(CompletionError::RateLimited),
            }
        }
    }

    async fn service() -> (MockInterviewService, Arc<InMemoryAccounts>, Arc<InMemorySessionCache>) {
        let accounts = Arc::new(InMemoryAccounts::new());
        accounts
            .insert_user(UserAccount::new("u1", "auth|1"))
            .await;
        let cache = Arc::new(InMemorySessionCache::new());

        let backends = InterviewBackends {
            store: Arc::new(InMemorySessionStore::new()),
            cache: cache.clone(),
            completion: Arc::new(QuestionsOnly),
            ledger: accounts.clone(),
            users: accounts.clone(),
        };
        let settings = InterviewSettings {
            creation_retry: RetryConfig::immediate(3),
            ..InterviewSettings::default()
        };
        (MockInterviewService::new(backends, settings), accounts, cache)
    }

    #[tokio::test]
    async fn blank_domain_is_rejected() {
        let (service, _, _) = service().await;
        let err = service
            .create("auth|1", "   ", Difficulty::Beginner)
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_user_cannot_create() {
        let (service, _, _) = service().await;
        let err = service
            .create("auth|nobody", "Databases", Difficulty::Beginner)
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn full_lifecycle_with_degraded_model() {
        let (service, accounts, cache) = service().await;
        let session = service
            .create("auth|1", "Databases", Difficulty::Beginner)
            .await
            .unwrap();
        assert_eq!(session.questions.len(), 5);
        assert!(cache.contains(&session.session_id).await.unwrap());

        let verdict = service
            .submit_answer("auth|1", &session.session_id, "q1", "indexes", 30)
            .await
            .unwrap();
        assert!((5..=8).contains(&verdict.rating));

        let summary = service.complete("auth|1", &session.session_id).await.unwrap();
        assert_eq!(summary.answered_questions, 1);
        assert_eq!(summary.total_questions, 5);
        assert_eq!(summary.points_awarded, 20 + u32::from(verdict.rating));
        assert!(!cache.contains(&session.session_id).await.unwrap());

        let account = accounts.account("u1").await.unwrap();
        assert_eq!(account.points, i64::from(summary.points_awarded));
        assert_eq!(account.mock_interviews_completed, 1);
    }

    #[tokio::test]
    async fn negative_time_spent_is_rejected() {
        let (service, _, _) = service().await;
        let session = service
            .create("auth|1", "Databases", Difficulty::Beginner)
            .await
            .unwrap();
        let err = service
            .submit_answer("auth|1", &session.session_id, "q1", "text", -1)
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::InvalidInput(_)));
    }
}
