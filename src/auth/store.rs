use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::{
    password::PasswordHasher,
    repo::{conflict_message, UserRepo},
    repo_types::{NewUser, User},
};
use crate::error::AppError;

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_USERNAME_CHARS: usize = 50;
pub const MAX_EMAIL_CHARS: usize = 255;

/// Emails are compared and stored trimmed and lowercased.
pub(crate) fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Business rules on top of [`UserRepo`]: input validation, duplicate
/// checks, hashing and login bookkeeping.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn UserRepo>,
    hasher: PasswordHasher,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn UserRepo>, hasher: PasswordHasher) -> Self {
        Self { repo, hasher }
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        self.repo.find_by_username(username).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        match normalize_email(email) {
            Some(email) => self.repo.find_by_email(&email).await,
            None => Ok(None),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.repo.find_by_id(id).await
    }

    #[instrument(skip(self, password))]
    pub async fn create(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
        is_admin: bool,
    ) -> Result<User, AppError> {
        if username.is_empty() || password.is_empty() {
            return Err(AppError::Validation("Username and password are required".into()));
        }
        if username.chars().count() > MAX_USERNAME_CHARS {
            return Err(AppError::Validation(format!(
                "Username must be at most {MAX_USERNAME_CHARS} characters"
            )));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AppError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        let email = email.and_then(normalize_email);
        if let Some(e) = email.as_deref() {
            if e.chars().count() > MAX_EMAIL_CHARS {
                return Err(AppError::Validation(format!(
                    "Email must be at most {MAX_EMAIL_CHARS} characters"
                )));
            }
            if !is_valid_email(e) {
                return Err(AppError::Validation("Invalid email".into()));
            }
        }

        if self.repo.find_by_username(username).await?.is_some() {
            return Err(AppError::Conflict(conflict_message(false).into()));
        }
        if let Some(e) = email.as_deref() {
            if self.repo.find_by_email(e).await?.is_some() {
                return Err(AppError::Conflict(conflict_message(true).into()));
            }
        }

        let password_hash = self
            .hasher
            .hash_async(password)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        // The unique indexes still decide if a concurrent insert wins the race.
        let user = self
            .repo
            .insert(NewUser {
                username: username.to_string(),
                email,
                password_hash,
                is_admin,
            })
            .await?;

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn record_login(&self, user_id: Uuid) -> Result<OffsetDateTime, AppError> {
        self.repo
            .touch_last_login(user_id, OffsetDateTime::now_utc())
            .await
    }

    /// Creates an active admin unless `username` is already taken. Returns
    /// whether a user was created.
    #[instrument(skip(self, password, email))]
    pub async fn bootstrap_default_admin(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<bool, AppError> {
        if self.repo.find_by_username(username).await?.is_some() {
            info!("admin user already exists");
            return Ok(false);
        }
        match self.create(username, password, Some(email), true).await {
            Ok(_) => {
                info!("default admin user created");
                Ok(true)
            }
            // Another instance bootstrapped it between our check and insert.
            Err(AppError::Conflict(msg)) => {
                if self.repo.find_by_username(username).await?.is_some() {
                    info!("admin user already exists");
                    Ok(false)
                } else {
                    Err(AppError::Conflict(msg))
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.repo.ping().await
    }
}

#[cfg(test)]
pub(crate) fn memory_store() -> (CredentialStore, Arc<crate::auth::repo::memory::MemoryUserRepo>) {
    let repo = Arc::new(crate::auth::repo::memory::MemoryUserRepo::default());
    let store = CredentialStore::new(repo.clone(), crate::auth::password::fast_hasher());
    (store, repo)
}
