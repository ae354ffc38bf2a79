use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{fs, path::Path, str::FromStr};

use shared::domain::{MessageId, UserId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub profile_pic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a user record. Callers are expected to have checked for a
    /// duplicate email first; a lost race still surfaces as the unique
    /// constraint error.
    pub async fn create_user(
        &self,
        email: &str,
        full_name: &str,
        password_hash: &str,
    ) -> Result<StoredUser> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO users (email, full_name, password_hash, profile_pic, created_at, updated_at)
             VALUES (?, ?, ?, '', ?, ?)
             RETURNING id, email, full_name, password_hash, profile_pic, created_at, updated_at",
        )
        .bind(email)
        .bind(full_name)
        .bind(password_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert user")?;
        Ok(user_from_row(&row))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, email, full_name, password_hash, profile_pic, created_at, updated_at
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn load_user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, email, full_name, password_hash, profile_pic, created_at, updated_at
             FROM users WHERE id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// The sidebar roster: every user except the one asking.
    pub async fn list_users_except(&self, user_id: UserId) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query(
            "SELECT id, email, full_name, password_hash, profile_pic, created_at, updated_at
             FROM users WHERE id != ? ORDER BY id ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    pub async fn update_profile_pic(
        &self,
        user_id: UserId,
        profile_pic: &str,
    ) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "UPDATE users SET profile_pic = ?, updated_at = ? WHERE id = ?
             RETURNING id, email, full_name, password_hash, profile_pic, created_at, updated_at",
        )
        .bind(profile_pic)
        .bind(Utc::now())
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update profile picture")?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn insert_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        text: &str,
        image: Option<&str>,
    ) -> Result<StoredMessage> {
        let row = sqlx::query(
            "INSERT INTO messages (sender_id, receiver_id, text, image, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, sender_id, receiver_id, text, image, created_at",
        )
        .bind(sender_id.0)
        .bind(receiver_id.0)
        .bind(text)
        .bind(image)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert message")?;
        Ok(message_from_row(&row))
    }

    /// All messages between the two users, in both directions, oldest first.
    /// The id tiebreak keeps same-timestamp messages in insertion order.
    pub async fn conversation_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, sender_id, receiver_id, text, image, created_at FROM messages
             WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
             ORDER BY created_at ASC, id ASC",
        )
        .bind(a.0)
        .bind(b.0)
        .bind(b.0)
        .bind(a.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }
}

fn user_from_row(row: &SqliteRow) -> StoredUser {
    StoredUser {
        id: UserId(row.get("id")),
        email: row.get("email"),
        full_name: row.get("full_name"),
        password_hash: row.get("password_hash"),
        profile_pic: row.get("profile_pic"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &SqliteRow) -> StoredMessage {
    StoredMessage {
        id: MessageId(row.get("id")),
        sender_id: UserId(row.get("sender_id")),
        receiver_id: UserId(row.get("receiver_id")),
        text: row.get("text"),
        image: row.get("image"),
        created_at: row.get("created_at"),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return Ok(());
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create parent directory '{}' for database url '{database_url}'",
                    parent.display()
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
