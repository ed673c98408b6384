/**
 * User Service
 * Registration and password login against the user table
 */
use bcrypt::{hash, verify};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::User;
use crate::error::ApiError;

/// bcrypt cost for stored passwords
pub const BCRYPT_COST: u32 = 8;

/// Hashes a password on the blocking pool; bcrypt is CPU-bound.
pub async fn hash_password(password: String) -> Result<String, ApiError> {
    let hashed = tokio::task::spawn_blocking(move || hash(password, BCRYPT_COST)).await??;
    Ok(hashed)
}

async fn verify_password(password: String, password_hash: String) -> Result<bool, ApiError> {
    let matches = tokio::task::spawn_blocking(move || verify(password, &password_hash)).await??;
    Ok(matches)
}

#[derive(Debug, Clone)]
pub struct UserService {
    pool: SqlitePool,
}

impl UserService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, email, password, created_at, updated_at FROM "user" WHERE email = ?"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<User, ApiError> {
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::bad_request("Email and password are required"));
        }

        if self.find_by_email(email).await?.is_some() {
            return Err(ApiError::bad_request("A user with this email already exists"));
        }

        let password_hash = hash_password(password.to_string()).await?;
        let now = Utc::now();

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO "user" (email, password, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, email, password, created_at, updated_at
            "#,
        )
        .bind(email)
        .bind(&password_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            // Lost a race with a concurrent registration
            let duplicate = e
                .as_database_error()
                .is_some_and(|db_err| db_err.is_unique_violation());
            if duplicate {
                ApiError::bad_request("A user with this email already exists")
            } else {
                ApiError::from(e)
            }
        })?;

        tracing::info!(user_id = user.id, "user registered");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| ApiError::bad_request("No user with this email"))?;

        if !verify_password(password.to_string(), user.password.clone()).await? {
            tracing::warn!(user_id = user.id, "login with wrong password");
            return Err(ApiError::bad_request("Wrong password"));
        }

        tracing::info!(user_id = user.id, "user logged in");
        Ok(user)
    }
}
