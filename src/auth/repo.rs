use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};
use crate::error::AppError;

const USER_COLUMNS: &str = "id, username, email, password_hash, is_active, is_admin, \
                            created_at, updated_at, last_login";

/// Persistence for user records. Uniqueness of `username` and `email` is
/// enforced by the backing store, and a violation surfaces as
/// [`AppError::Conflict`].
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn insert(&self, user: NewUser) -> Result<User, AppError>;
    /// Stamps `last_login` for an existing user in one atomic statement.
    /// Returns [`AppError::NotFound`] if the row is gone.
    async fn touch_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<OffsetDateTime, AppError>;
    async fn ping(&self) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        let inserted = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, is_active, is_admin)
            VALUES ($1, $2, $3, TRUE, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(inserted)
    }

    async fn touch_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<OffsetDateTime, AppError> {
        let stamped = sqlx::query_scalar::<_, OffsetDateTime>(
            r#"
            UPDATE users
               SET last_login = $2, updated_at = $2
             WHERE id = $1
            RETURNING last_login
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.db)
        .await?;
        stamped.ok_or(AppError::NotFound)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

fn map_unique_violation(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let on_email = db_err.constraint().is_some_and(|c| c.contains("email"));
            return AppError::Conflict(conflict_message(on_email).into());
        }
    }
    AppError::from(e)
}

pub(crate) fn conflict_message(on_email: bool) -> &'static str {
    if on_email {
        "Email already exists"
    } else {
        "Username already exists"
    }
}
