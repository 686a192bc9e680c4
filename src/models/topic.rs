//! Topic model and vote results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A posted topic with its current tally and resolved author name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub id: i64,
    pub description: String,
    pub post_date: DateTime<Utc>,
    pub author_id: i64,
    pub author_name: String,
    pub votes: i64,
}

/// Form body for `POST /add_topic`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddTopicForm {
    #[serde(default)]
    pub description: String,
}

/// Result of an upvote or downvote.
#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    pub topic: Topic,
    /// Whether the caller's vote edge was added or removed by this call
    pub changed: bool,
}
