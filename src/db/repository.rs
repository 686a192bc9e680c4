//! Database repository for users, topics, votes and sessions.
//!
//! Uses prepared statements and transactions for data integrity.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::{Topic, User, VoteOutcome};

const SELECT_TOPICS: &str = r#"SELECT t.id, t.description, t.post_date, t.author_id,
                                      u.username AS author_name, t.votes
                               FROM topic t JOIN user u ON u.id = t.author_id
                               ORDER BY t.post_date, t.id"#;

const SELECT_TOPICS_BY_AUTHOR: &str = r#"SELECT t.id, t.description, t.post_date, t.author_id,
                                                u.username AS author_name, t.votes
                                         FROM topic t JOIN user u ON u.id = t.author_id
                                         WHERE t.author_id = ?
                                         ORDER BY t.post_date, t.id"#;

const SELECT_TOPIC_BY_ID: &str = r#"SELECT t.id, t.description, t.post_date, t.author_id,
                                           u.username AS author_name, t.votes
                                    FROM topic t JOIN user u ON u.id = t.author_id
                                    WHERE t.id = ?"#;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== USER OPERATIONS ====================

    /// Insert a new user with an already hashed password.
    ///
    /// A clash on the unique username index comes back as
    /// [`AppError::UsernameTaken`], including when a concurrent registration
    /// won the race after the caller's own existence check.
    pub async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        passwd: &str,
    ) -> Result<User, AppError> {
        let result = sqlx::query("INSERT INTO user (username, email, passwd) VALUES (?, ?, ?)")
            .bind(username)
            .bind(email)
            .bind(passwd)
            .execute(&self.pool)
            .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tracing::info!("Username {:?} lost a registration race", username);
                return Err(AppError::UsernameTaken);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            email: email.map(str::to_string),
            passwd: passwd.to_string(),
        })
    }

    /// Get a user by ID.
    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let row = sqlx::query("SELECT id, username, email, passwd FROM user WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Get a user by exact (case-sensitive) username.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query("SELECT id, username, email, passwd FROM user WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    // ==================== TOPIC OPERATIONS ====================

    /// List every topic, oldest first.
    pub async fn list_topics(&self) -> Result<Vec<Topic>, AppError> {
        let rows = sqlx::query(SELECT_TOPICS).fetch_all(&self.pool).await?;

        rows.iter().map(topic_from_row).collect()
    }

    /// List the topics posted by one author, oldest first.
    pub async fn list_topics_by_author(&self, author_id: i64) -> Result<Vec<Topic>, AppError> {
        let rows = sqlx::query(SELECT_TOPICS_BY_AUTHOR)
            .bind(author_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(topic_from_row).collect()
    }

    /// Get a topic by ID.
    pub async fn get_topic(&self, id: i64) -> Result<Option<Topic>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_topic(&mut conn, id).await
    }

    /// Post a new topic as `author`. The post date is taken from the clock here.
    pub async fn create_topic(&self, author: &User, description: &str) -> Result<Topic, AppError> {
        self.insert_topic(author.id, description, Utc::now()).await
    }

    async fn insert_topic(
        &self,
        author_id: i64,
        description: &str,
        post_date: DateTime<Utc>,
    ) -> Result<Topic, AppError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(AppError::Validation("Description required".to_string()));
        }

        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query(
            "INSERT INTO topic (description, post_date, author_id, votes) VALUES (?, ?, ?, 0)",
        )
        .bind(description)
        .bind(format_timestamp(post_date))
        .bind(author_id)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!("User {} posted topic {}", author_id, id);

        fetch_topic(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Topic {} vanished after insert", id)))
    }

    // ==================== VOTE OPERATIONS ====================

    /// Record `user`'s vote on a topic. Voting twice is a no-op.
    pub async fn upvote(&self, topic_id: i64, user: &User) -> Result<VoteOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        // Starting with the write takes SQLite's write lock before anything is read.
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO user_topic (user_id, topic_id) SELECT ?, id FROM topic WHERE id = ?",
        )
        .bind(user.id)
        .bind(topic_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            sqlx::query("UPDATE topic SET votes = votes + 1 WHERE id = ?")
                .bind(topic_id)
                .execute(&mut *tx)
                .await?;
        }

        let topic = fetch_topic(&mut tx, topic_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Topic {} not found", topic_id)))?;

        tx.commit().await?;

        if inserted > 0 {
            tracing::info!("User {} upvoted topic {}", user.id, topic_id);
        }

        Ok(VoteOutcome {
            topic,
            changed: inserted > 0,
        })
    }

    /// Withdraw `user`'s vote on a topic. Without a prior vote this is a no-op,
    /// so the tally never drops below the number of voters.
    pub async fn downvote(&self, topic_id: i64, user: &User) -> Result<VoteOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM user_topic WHERE user_id = ? AND topic_id = ?")
            .bind(user.id)
            .bind(topic_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed > 0 {
            sqlx::query("UPDATE topic SET votes = votes - 1 WHERE id = ?")
                .bind(topic_id)
                .execute(&mut *tx)
                .await?;
        }

        let topic = fetch_topic(&mut tx, topic_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Topic {} not found", topic_id)))?;

        tx.commit().await?;

        if removed > 0 {
            tracing::info!("User {} withdrew their vote on topic {}", user.id, topic_id);
        }

        Ok(VoteOutcome {
            topic,
            changed: removed > 0,
        })
    }

    // ==================== SESSION OPERATIONS ====================

    /// Open a session for `user_id` and return its opaque token.
    pub async fn create_session(&self, user_id: i64, ttl: Duration) -> Result<String, AppError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO session (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(format_timestamp(now))
        .bind(format_timestamp(now + ttl))
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    /// Resolve a session token to its user. Unknown and expired tokens give `None`.
    pub async fn resolve_session(&self, token: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            r#"SELECT u.id, u.username, u.email, u.passwd
               FROM session s JOIN user u ON u.id = s.user_id
               WHERE s.token = ? AND s.expires_at > ?"#,
        )
        .bind(token)
        .bind(format_timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Delete a session. Returns whether a session was removed.
    pub async fn delete_session(&self, token: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM session WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every expired session and return how many were removed.
    pub async fn purge_expired_sessions(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM session WHERE expires_at <= ?")
            .bind(format_timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// ==================== ROW MAPPING ====================

async fn fetch_topic(conn: &mut SqliteConnection, id: i64) -> Result<Option<Topic>, AppError> {
    let row = sqlx::query(SELECT_TOPIC_BY_ID)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(topic_from_row).transpose()
}

fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        passwd: row.try_get("passwd")?,
    })
}

fn topic_from_row(row: &SqliteRow) -> Result<Topic, AppError> {
    let post_date: String = row.try_get("post_date")?;

    Ok(Topic {
        id: row.try_get("id")?,
        description: row.try_get("description")?,
        post_date: parse_timestamp(&post_date)?,
        author_id: row.try_get("author_id")?,
        author_name: row.try_get("author_name")?,
        votes: row.try_get("votes")?,
    })
}

/// Fixed-width UTC timestamps so that text order matches time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Database(format!("Corrupt timestamp {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::db::init_database;

    async fn test_repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        (Repository::new(pool), temp_dir)
    }

    async fn user(repo: &Repository, name: &str) -> User {
        repo.create_user(name, Some("someone@example.com"), "digest")
            .await
            .unwrap()
    }

    async fn has_voted(repo: &Repository, user_id: i64, topic_id: i64) -> bool {
        sqlx::query("SELECT 1 FROM user_topic WHERE user_id = ? AND topic_id = ?")
            .bind(user_id)
            .bind(topic_id)
            .fetch_optional(&repo.pool)
            .await
            .unwrap()
            .is_some()
    }

    async fn edge_count(repo: &Repository, topic_id: i64) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM user_topic WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_one(&repo.pool)
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn test_duplicate_username_is_username_taken() {
        let (repo, _dir) = test_repo().await;
        user(&repo, "alice").await;

        let err = repo
            .create_user("alice", None, "other-digest")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UsernameTaken));

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM user WHERE username = 'alice'")
            .fetch_one(&repo.pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_usernames_are_case_sensitive() {
        let (repo, _dir) = test_repo().await;
        let lower = user(&repo, "alice").await;
        let upper = user(&repo, "Alice").await;

        assert_ne!(lower.id, upper.id);
        assert_eq!(
            repo.get_user_by_username("Alice").await.unwrap().unwrap().id,
            upper.id
        );
        assert!(repo.get_user_by_username("ALICE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_user_by_id() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;

        let found = repo.get_user_by_id(bob.id).await.unwrap().unwrap();
        assert_eq!(found, bob);
        assert!(repo.get_user_by_id(bob.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_topic_starts_at_zero_votes() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;

        let topic = repo.create_topic(&bob, "hello").await.unwrap();
        assert_eq!(topic.votes, 0);
        assert_eq!(topic.author_id, bob.id);
        assert_eq!(topic.author_name, "bob");
        assert_eq!(topic.description, "hello");
        assert_eq!(repo.get_topic(topic.id).await.unwrap(), Some(topic));
    }

    #[tokio::test]
    async fn test_empty_description_is_rejected_without_insert() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;

        for description in ["", "   "] {
            let err = repo.create_topic(&bob, description).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(ref msg) if msg == "Description required"));
        }
        assert!(repo.list_topics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_global_listing_orders_by_post_date() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;
        let ten = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let eleven = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();

        // Inserted out of order on purpose.
        let t2 = repo.insert_topic(bob.id, "T2", eleven).await.unwrap();
        let t1 = repo.insert_topic(bob.id, "T1", ten).await.unwrap();

        let ids: Vec<i64> = repo
            .list_topics()
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![t1.id, t2.id]);
        assert_eq!(t1.post_date, ten);
    }

    #[tokio::test]
    async fn test_listing_by_author() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;
        let carol = user(&repo, "carol").await;

        repo.create_topic(&bob, "from bob").await.unwrap();
        repo.create_topic(&carol, "from carol").await.unwrap();
        repo.create_topic(&bob, "bob again").await.unwrap();

        let bobs = repo.list_topics_by_author(bob.id).await.unwrap();
        let descriptions: Vec<&str> = bobs.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(descriptions, vec!["from bob", "bob again"]);
        assert!(bobs.iter().all(|t| t.author_name == "bob"));
        assert_eq!(repo.list_topics().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_double_upvote_counts_once() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;
        let topic = repo.create_topic(&bob, "hello").await.unwrap();

        let first = repo.upvote(topic.id, &bob).await.unwrap();
        assert!(first.changed);
        assert_eq!(first.topic.votes, 1);

        let second = repo.upvote(topic.id, &bob).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.topic.votes, 1);
        assert_eq!(edge_count(&repo, topic.id).await, 1);
    }

    #[tokio::test]
    async fn test_votes_track_edges_across_users() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;
        let carol = user(&repo, "carol").await;
        let topic = repo.create_topic(&bob, "hello").await.unwrap();

        repo.upvote(topic.id, &bob).await.unwrap();
        let outcome = repo.upvote(topic.id, &carol).await.unwrap();
        assert_eq!(outcome.topic.votes, 2);
        assert_eq!(edge_count(&repo, topic.id).await, 2);

        let outcome = repo.downvote(topic.id, &carol).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.topic.votes, 1);
        assert_eq!(edge_count(&repo, topic.id).await, 1);
        assert!(has_voted(&repo, bob.id, topic.id).await);
        assert!(!has_voted(&repo, carol.id, topic.id).await);
    }

    #[tokio::test]
    async fn test_downvote_without_vote_is_noop() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;
        let topic = repo.create_topic(&bob, "hello").await.unwrap();

        let outcome = repo.downvote(topic.id, &bob).await.unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.topic.votes, 0);
    }

    #[tokio::test]
    async fn test_vote_on_missing_topic_is_not_found() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;

        let up = repo.upvote(42, &bob).await.unwrap_err();
        assert!(matches!(up, AppError::NotFound(_)));
        let down = repo.downvote(42, &bob).await.unwrap_err();
        assert!(matches!(down, AppError::NotFound(_)));
        assert!(!has_voted(&repo, bob.id, 42).await);
    }

    #[tokio::test]
    async fn test_concurrent_upvotes_stay_consistent() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;
        let topic_id = repo.create_topic(&bob, "hello").await.unwrap().id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            let bob = bob.clone();
            handles.push(tokio::spawn(async move {
                repo.upvote(topic_id, &bob).await.unwrap()
            }));
        }
        let mut changed = 0;
        for handle in handles {
            if handle.await.unwrap().changed {
                changed += 1;
            }
        }

        assert_eq!(changed, 1);
        let topic = repo.get_topic(topic_id).await.unwrap().unwrap();
        assert_eq!(topic.votes, 1);
        assert_eq!(edge_count(&repo, topic_id).await, 1);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;

        let token = repo.create_session(bob.id, Duration::hours(1)).await.unwrap();
        assert_eq!(repo.resolve_session(&token).await.unwrap(), Some(bob));

        assert!(repo.delete_session(&token).await.unwrap());
        assert!(repo.resolve_session(&token).await.unwrap().is_none());
        assert!(!repo.delete_session(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_sessions_do_not_resolve_and_get_purged() {
        let (repo, _dir) = test_repo().await;
        let bob = user(&repo, "bob").await;

        let expired = repo
            .create_session(bob.id, Duration::seconds(-1))
            .await
            .unwrap();
        let live = repo.create_session(bob.id, Duration::hours(1)).await.unwrap();

        assert!(repo.resolve_session(&expired).await.unwrap().is_none());
        assert_eq!(repo.purge_expired_sessions().await.unwrap(), 1);
        assert!(repo.resolve_session(&live).await.unwrap().is_some());
    }

    #[test]
    fn test_timestamp_text_order_matches_time_order() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 9, 59, 59).unwrap();
        let late = early + Duration::microseconds(1);

        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(parse_timestamp(&format_timestamp(late)).unwrap(), late);
    }
}
