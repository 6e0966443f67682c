use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use super::vote::{OptionCount, Vote};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub is_public: bool,
    pub expires_at: DateTime<Utc>,
    pub author_id: i64,
    /// Only populated for private polls.
    pub allowed_user_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Poll {
    /// A poll is open up to and including its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// Row shape of the `polls` table; the allow-list lives in its own table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PollRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub options: Json<Vec<String>>,
    pub is_public: bool,
    pub expires_at: DateTime<Utc>,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PollRow {
    pub(crate) fn into_poll(self, allowed_user_ids: Vec<i64>) -> Poll {
        Poll {
            id: self.id,
            title: self.title,
            description: self.description,
            options: self.options.0,
            is_public: self.is_public,
            expires_at: self.expires_at,
            author_id: self.author_id,
            allowed_user_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoll {
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub is_public: bool,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,
}

/// Partial update. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub options: Option<Vec<String>>,
    pub is_public: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
    pub allowed_user_ids: Option<Vec<i64>>,
}

/// A poll together with every vote cast on it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollWithVotes {
    #[serde(flatten)]
    pub poll: Poll,
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollResults {
    pub poll: Poll,
    pub results: Vec<OptionCount>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll_expiring_at(expires_at: DateTime<Utc>) -> Poll {
        Poll {
            id: 1,
            title: "t".into(),
            description: None,
            options: vec!["A".into(), "B".into()],
            is_public: true,
            expires_at,
            author_id: 1,
            allowed_user_ids: vec![],
            created_at: expires_at - Duration::hours(1),
            updated_at: expires_at - Duration::hours(1),
        }
    }

    #[test]
    fn poll_is_open_at_its_expiry_instant() {
        let now = Utc::now();
        let poll = poll_expiring_at(now);
        assert!(!poll.is_expired(now));
        assert!(poll.is_expired(now + Duration::milliseconds(1)));
    }

    #[test]
    fn has_option_is_exact_match() {
        let poll = poll_expiring_at(Utc::now());
        assert!(poll.has_option("A"));
        assert!(!poll.has_option("a"));
        assert!(!poll.has_option("C"));
    }

    #[test]
    fn new_poll_allow_list_defaults_to_empty() {
        let body = r#"{"title":"Lunch","options":["Pizza"],"isPublic":true,"expiresAt":"2030-01-01T00:00:00Z"}"#;
        let new: NewPoll = serde_json::from_str(body).unwrap();
        assert!(new.is_public);
        assert!(new.allowed_user_ids.is_empty());
        assert_eq!(new.description, None);
    }
}
