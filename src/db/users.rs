use sqlx::{Executor, Pool, Sqlite};
use uuid::Uuid;
use crate::db::models::User;
use crate::error::AppError;

pub struct UserRepository;

impl UserRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        username: String,
        credential: &str,
    ) -> Result<User, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query_as::<_, User>(
            r#"
INSERT INTO users (id, username, credential, created_at, updated_at)
VALUES (?, ?, ?, ?, ?)
RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&username)
        .bind(credential)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            // Lost the race against a concurrent registration
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::Validation("Username already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_by_username(
        pool: &Pool<Sqlite>,
        username: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE username = ?"
        )
        .bind(username)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    pub async fn get_by_id(
        pool: &Pool<Sqlite>,
        id: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Replace the stored credential wholesale; accepts a pool or a transaction
    pub async fn update_credential<'e, E>(
        executor: E,
        id: &str,
        credential: &str,
    ) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query("UPDATE users SET credential = ?, updated_at = ? WHERE id = ?")
            .bind(credential)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a user; their sessions go with them (ON DELETE CASCADE)
    pub async fn delete(pool: &Pool<Sqlite>, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
