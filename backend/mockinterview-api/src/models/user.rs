use serde::{Deserialize, Serialize};

/// Durable user record, as far as the interview core needs it.
///
/// `id` is the store's own identifier; `auth_id` is the opaque id issued by
/// the identity provider and carried in the JWT `sub` claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: String,
    pub auth_id: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub mock_interviews_completed: i64,
    #[serde(default)]
    pub practice_sessions_completed: i64,
}

impl UserAccount {
    pub fn new(id: impl Into<String>, auth_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            auth_id: auth_id.into(),
            points: 0,
            mock_interviews_completed: 0,
            practice_sessions_completed: 0,
        }
    }
}
