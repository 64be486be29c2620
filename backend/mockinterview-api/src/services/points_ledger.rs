use async_trait::async_trait;
use mongodb::{
    bson::{doc, Document},
    Collection, Database,
};

use crate::metrics::{track_db_operation, POINTS_AWARDED_TOTAL};
use crate::models::Difficulty;
use crate::services::user_directory::{user_id_filter, USERS_COLLECTION};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("points ledger error: {0}")]
    Backend(String),
}

impl From<mongodb::error::Error> for LedgerError {
    fn from(err: mongodb::error::Error) -> Self {
        LedgerError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    MockInterview,
    PracticeSession,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::MockInterview => "mock_interview",
            ActivityKind::PracticeSession => "practice_session",
        }
    }

    /// Completed-count field on the user record bumped with the points.
    pub fn counter_field(&self) -> &'static str {
        match self {
            ActivityKind::MockInterview => "mockInterviewsCompleted",
            ActivityKind::PracticeSession => "practiceSessionsCompleted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsAward {
    pub kind: ActivityKind,
    pub base: u32,
    pub bonus: u32,
}

impl PointsAward {
    /// Base by difficulty plus the mean rating rounded to an integer.
    pub fn mock_interview(difficulty: Difficulty, mean_rating: f64) -> Self {
        let base = match difficulty {
            Difficulty::Beginner => 20,
            Difficulty::Intermediate => 30,
            Difficulty::Advanced => 40,
        };
        let bonus = if mean_rating.is_finite() {
            mean_rating.round().clamp(0.0, 10.0) as u32
        } else {
            0
        };
        Self {
            kind: ActivityKind::MockInterview,
            base,
            bonus,
        }
    }

    pub fn practice_session(difficulty: Difficulty) -> Self {
        let base = match difficulty {
            Difficulty::Beginner => 10,
            Difficulty::Intermediate => 15,
            Difficulty::Advanced => 20,
        };
        Self {
            kind: ActivityKind::PracticeSession,
            base,
            bonus: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.base + self.bonus
    }
}

#[async_trait]
pub trait PointsLedger: Send + Sync {
    /// Credits the award and bumps the matching completed-count, atomically.
    async fn award(&self, user_id: &str, award: PointsAward) -> Result<(), LedgerError>;
}

pub struct MongoPointsLedger {
    users: Collection<Document>,
}

impl MongoPointsLedger {
    pub fn new(mongo: &Database) -> Self {
        Self {
            users: mongo.collection(USERS_COLLECTION),
        }
    }
}

#[async_trait]
impl PointsLedger for MongoPointsLedger {
    async fn award(&self, user_id: &str, award: PointsAward) -> Result<(), LedgerError> {
        let mut increments = Document::new();
        increments.insert("points", i64::from(award.total()));
        increments.insert(award.kind.counter_field(), 1_i64);
        let update = doc! { "$inc": increments };

        let result = track_db_operation("award_points", USERS_COLLECTION, async {
            Ok::<_, LedgerError>(self.users.update_one(user_id_filter(user_id), update).await?)
        })
        .await?;

        if result.matched_count == 0 {
            return Err(LedgerError::UserNotFound(user_id.to_string()));
        }

        POINTS_AWARDED_TOTAL
            .with_label_values(&[award.kind.as_str()])
            .inc_by(u64::from(award.total()));

        tracing::info!(
            "Awarded {} points ({} base + {} bonus) to user={} for {}",
            award.total(),
            award.base,
            award.bonus,
            user_id,
            award.kind.as_str()
        );
        Ok(())
    }
}
