#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use mockinterview_api::{
    config::{AiSettings, CacheBackend, CacheSettings, Config},
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{InterviewAnswer, MockSession, SessionCompletion, UserAccount},
    services::{
        completion::{CompletionClient, CompletionError, CompletionPurpose, CompletionRequest},
        mock_interview_service::{InterviewBackends, InterviewSettings},
        session_cache::InMemorySessionCache,
        session_store::{CompleteOutcome, InMemorySessionStore, SessionStore, StoreError},
        user_directory::InMemoryAccounts,
        AppState,
    },
    utils::retry::RetryConfig,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "test-secret";

pub fn test_config() -> Config {
    Config {
        environment: "test".to_string(),
        mongo_uri: "mongodb://localhost:27017".to_string(),
        mongo_database: "mockinterview_test".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        cache: CacheSettings {
            backend: CacheBackend::Memory,
            redis_uri: None,
            ttl_seconds: None,
        },
        ai: AiSettings {
            api_url: "http://localhost:0".to_string(),
            api_key: String::new(),
            model: "test-model".to_string(),
            timeout_seconds: 1,
        },
    }
}

/// What the scripted model answers for answer evaluation.
#[derive(Debug, Clone)]
pub enum EvaluationReply {
    Rating(f64),
    Raw(String),
    Unavailable,
}

/// Completion client that answers by purpose, without any network.
pub struct ScriptedCompletion {
    questions: Mutex<Option<String>>,
    evaluation: Mutex<EvaluationReply>,
    review_available: AtomicBool,
    calls: Mutex<Vec<CompletionPurpose>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self {
            questions: Mutex::new(None),
            evaluation: Mutex::new(EvaluationReply::Rating(7.0)),
            review_available: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_questions_payload(&self, payload: impl Into<String>) {
        *self.questions.lock().unwrap() = Some(payload.into());
    }

    pub fn set_evaluation(&self, reply: EvaluationReply) {
        *self.evaluation.lock().unwrap() = reply;
    }

    pub fn set_review_available(&self, available: bool) {
        self.review_available.store(available, Ordering::SeqCst);
    }

    pub fn calls_for(&self, purpose: CompletionPurpose) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| **p == purpose)
            .count()
    }

    pub fn five_questions() -> String {
        let questions: Vec<Value> = (1..=5)
            .map(|i| {
                json!({
                    "id": format!("q{}", i),
                    "title": format!("Question {}", i),
                    "description": format!("Explain topic {}", i),
                    "referenceAnswer": format!("Reference answer {}", i),
                    "timeLimit": 150
                })
            })
            .collect();
        json!({ "questions": questions }).to_string()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        self.calls.lock().unwrap().push(request.purpose);

        match request.purpose {
            CompletionPurpose::QuestionGeneration => Ok(self
                .questions
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(Self::five_questions)),
            CompletionPurpose::AnswerEvaluation => match self.evaluation.lock().unwrap().clone() {
                EvaluationReply::Rating(rating) => Ok(format!(
                    "```json\n{}\n```",
                    json!({ "rating": rating, "feedback": "Clear and mostly correct." })
                )),
                EvaluationReply::Raw(raw) => Ok(raw),
                EvaluationReply::Unavailable => Err(CompletionError::RateLimited),
            },
            CompletionPurpose::SessionReview => {
                if !self.review_available.load(Ordering::SeqCst) {
                    return Err(CompletionError::Transport("connection refused".to_string()));
                }
                Ok(json!({
                    "overallFeedback": "Good grasp of the fundamentals.",
                    "strengths": ["Structured answers"],
                    "improvements": ["Discuss trade-offs"],
                    "recommendations": ["Practice system design"]
                })
                .to_string())
            }
        }
    }
}

/// In-memory store with switchable failures.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemorySessionStore,
    duplicate_inserts: AtomicUsize,
    fail_inserts: AtomicBool,
    fail_upserts: AtomicBool,
    fail_complete: AtomicBool,
    fail_reads: AtomicBool,
    insert_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` inserts fail with a duplicate-key error.
    pub fn collide_next_inserts(&self, count: usize) {
        self.duplicate_inserts.store(count, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_complete(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    fn backend_down() -> StoreError {
        StoreError::Backend("connection pool closed".to_string())
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn insert(&self, session: &MockSession) -> Result<(), StoreError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .duplicate_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::DuplicateKey(session.session_id.clone()));
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::backend_down());
        }
        self.inner.insert(session).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<MockSession>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::backend_down());
        }
        self.inner.find_by_token(token).await
    }

    async fn find_by_owner(&self, user_id: &str) -> Result<Vec<MockSession>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::backend_down());
        }
        self.inner.find_by_owner(user_id).await
    }

    async fn complete(
        &self,
        token: &str,
        answers: &[InterviewAnswer],
        completion: &SessionCompletion,
    ) -> Result<CompleteOutcome, StoreError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(Self::backend_down());
        }
        self.inner.complete(token, answers, completion).await
    }

    async fn upsert_answer(&self, token: &str, answer: &InterviewAnswer) -> Result<(), StoreError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(Self::backend_down());
        }
        self.inner.upsert_answer(token, answer).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::backend_down());
        }
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<FlakyStore>,
    pub cache: Arc<InMemorySessionCache>,
    pub accounts: Arc<InMemoryAccounts>,
    pub completion: Arc<ScriptedCompletion>,
}

/// Auth id and durable id of the user seeded into every test app.
pub const ALICE_AUTH: &str = "auth|alice";
pub const ALICE_ID: &str = "65f1c2a4b7e8d90012345601";
pub const BOB_AUTH: &str = "auth|bob";
pub const BOB_ID: &str = "65f1c2a4b7e8d90012345602";

pub async fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(FlakyStore::new());
    let cache = Arc::new(InMemorySessionCache::new());
    let accounts = Arc::new(InMemoryAccounts::new());
    let completion = Arc::new(ScriptedCompletion::new());

    accounts
        .insert_user(UserAccount::new(ALICE_ID, ALICE_AUTH))
        .await;
    accounts
        .insert_user(UserAccount::new(BOB_ID, BOB_AUTH))
        .await;

    let backends = InterviewBackends {
        store: store.clone(),
        cache: cache.clone(),
        completion: completion.clone(),
        ledger: accounts.clone(),
        users: accounts.clone(),
    };
    let settings = InterviewSettings {
        model: "test-model".to_string(),
        creation_retry: RetryConfig::immediate(3),
        ..InterviewSettings::default()
    };

    let app_state = Arc::new(AppState::from_backends(test_config(), backends, settings));

    TestApp {
        router: create_router(app_state),
        store,
        cache,
        accounts,
        completion,
    }
}

pub fn token_for(auth_id: &str) -> String {
    JwtService::new(JWT_SECRET)
        .generate_token(&JwtClaims::new(auth_id, "user", 3600))
        .unwrap()
}

impl TestApp {
    /// Sends a request and returns the status with the parsed JSON body
    /// (`Value::Null` for empty bodies).
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        auth_id: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth_id) = auth_id {
            builder = builder.header("authorization", format!("Bearer {}", token_for(auth_id)));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, json)
    }

    pub async fn create_session(&self, auth_id: &str, domain: &str, difficulty: &str) -> Value {
        let (status, body) = self
            .send(
                "POST",
                "/api/v1/mockinterview",
                Some(auth_id),
                Some(json!({ "domain": domain, "difficulty": difficulty })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "unexpected body {}", body);
        body
    }

    pub async fn submit(
        &self,
        auth_id: &str,
        session_id: &str,
        question_id: &str,
        answer: &str,
        time_spent: i64,
    ) -> (StatusCode, Value) {
        self.send(
            "POST",
            &format!("/api/v1/mockinterview/{}", session_id),
            Some(auth_id),
            Some(json!({
                "questionId": question_id,
                "answer": answer,
                "timeSpent": time_spent
            })),
        )
        .await
    }

    pub async fn complete(&self, auth_id: &str, session_id: &str) -> (StatusCode, Value) {
        self.send(
            "POST",
            &format!("/api/v1/mockinterview/{}/complete", session_id),
            Some(auth_id),
            None,
        )
        .await
    }
}
