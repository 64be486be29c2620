use std::collections::HashMap;

use async_trait::async_trait;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, Document},
    Collection, Database,
};
use tokio::sync::RwLock;

use crate::metrics::track_db_operation;
use crate::models::UserAccount;
use crate::services::points_ledger::{ActivityKind, LedgerError, PointsAward, PointsLedger};

pub const USERS_COLLECTION: &str = "users";

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("user directory error: {0}")]
    Backend(String),
}

impl From<mongodb::error::Error> for DirectoryError {
    fn from(err: mongodb::error::Error) -> Self {
        DirectoryError::Backend(err.to_string())
    }
}

/// Resolves identity-provider ids to durable user records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_auth_id(&self, auth_id: &str) -> Result<Option<UserAccount>, DirectoryError>;
}

/// `_id` filter accepting both ObjectId hex strings and plain string ids.
pub fn user_id_filter(user_id: &str) -> Document {
    match ObjectId::parse_str(user_id) {
        Ok(object_id) => doc! { "_id": object_id },
        Err(_) => doc! { "_id": user_id },
    }
}

pub struct MongoUserDirectory {
    users: Collection<Document>,
}

impl MongoUserDirectory {
    pub fn new(mongo: &Database) -> Self {
        Self {
            users: mongo.collection(USERS_COLLECTION),
        }
    }
}

#[async_trait]
impl UserDirectory for MongoUserDirectory {
    async fn find_by_auth_id(&self, auth_id: &str) -> Result<Option<UserAccount>, DirectoryError> {
        let user = track_db_operation("find_one", USERS_COLLECTION, async {
            Ok::<_, DirectoryError>(self.users.find_one(doc! { "authId": auth_id }).await?)
        })
        .await?;

        Ok(user.and_then(|doc| account_from_document(&doc)))
    }
}

fn account_from_document(doc: &Document) -> Option<UserAccount> {
    let id = match doc.get("_id")? {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    };

    Some(UserAccount {
        id,
        auth_id: doc.get_str("authId").ok()?.to_string(),
        points: counter(doc, "points"),
        mock_interviews_completed: counter(doc, "mockInterviewsCompleted"),
        practice_sessions_completed: counter(doc, "practiceSessionsCompleted"),
    })
}

fn counter(doc: &Document, key: &str) -> i64 {
    doc.get_i64(key)
        .or_else(|_| doc.get_i32(key).map(i64::from))
        .unwrap_or(0)
}

/// User records held in memory. Serves as both directory and ledger so the
/// whole interview flow can run without MongoDB.
#[derive(Default)]
pub struct InMemoryAccounts {
    accounts: RwLock<HashMap<String, UserAccount>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, account: UserAccount) {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account);
    }

    pub async fn account(&self, user_id: &str) -> Option<UserAccount> {
        self.accounts.read().await.get(user_id).cloned()
    }
}

#[async_trait]
impl UserDirectory for InMemoryAccounts {
    async fn find_by_auth_id(&self, auth_id: &str) -> Result<Option<UserAccount>, DirectoryError> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|account| account.auth_id == auth_id)
            .cloned())
    }
}

#[async_trait]
impl PointsLedger for InMemoryAccounts {
    async fn award(&self, user_id: &str, award: PointsAward) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        account.points += i64::from(award.total());
        match award.kind {
            ActivityKind::MockInterview => account.mock_interviews_completed += 1,
            ActivityKind::PracticeSession => account.practice_sessions_completed += 1,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;
    use std::sync::Arc;

    #[test]
    fn id_filter_parses_object_ids() {
        let hex = "65f1c2a4b7e8d90012345678";
        let filter = user_id_filter(hex);
        assert!(matches!(filter.get("_id"), Some(Bson::ObjectId(_))));

        let filter = user_id_filter("user-42");
        assert_eq!(filter.get_str("_id").unwrap(), "user-42");
    }

    #[test]
    fn document_mapping_reads_mixed_integer_widths() {
        let oid = ObjectId::new();
        let doc = doc! {
            "_id": oid,
            "authId": "auth|1",
            "name": "Ada",
            "role": "admin",
            "points": 120_i32,
            "mockInterviewsCompleted": 4_i64,
        };

        let account = account_from_document(&doc).unwrap();
        assert_eq!(account.id, oid.to_hex());
        assert_eq!(account.points, 120);
        assert_eq!(account.mock_interviews_completed, 4);
        assert_eq!(account.practice_sessions_completed, 0);
    }

    #[test]
    fn document_without_auth_id_is_skipped() {
        assert!(account_from_document(&doc! { "_id": "u1", "name": "x" }).is_none());
    }

    #[tokio::test]
    async fn in_memory_directory_resolves_by_auth_id() {
        let accounts = InMemoryAccounts::new();
        accounts
            .insert_user(UserAccount::new("u1", "auth|1"))
            .await;

        let found = accounts.find_by_auth_id("auth|1").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(accounts.find_by_auth_id("auth|2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn award_to_missing_user_fails() {
        let accounts = InMemoryAccounts::new();
        let award = PointsAward::mock_interview(Difficulty::Beginner, 7.0);
        assert!(matches!(
            accounts.award("ghost", award).await,
            Err(LedgerError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_awards_are_not_lost() {
        let accounts = Arc::new(InMemoryAccounts::new());
        accounts
            .insert_user(UserAccount::new("u1", "auth|1"))
            .await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let accounts = accounts.clone();
                tokio::spawn(async move {
                    let award = PointsAward::mock_interview(Difficulty::Beginner, 7.0);
                    accounts.award("u1", award).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let account = accounts.account("u1").await.unwrap();
        assert_eq!(account.points, 20 * 27);
        assert_eq!(account.mock_interviews_completed, 20);
    }
}
