use tracing::{error, info, instrument, warn};

use crate::auth::{repo_types::User, store::CredentialStore};

pub const REASON_REQUIRED: &str = "Username and password are required";
pub const REASON_INVALID: &str = "Invalid username or password";
pub const REASON_DEACTIVATED: &str = "Account is deactivated";
pub const REASON_UNAVAILABLE: &str = "Authentication service unavailable";

/// Result of one authentication attempt. `reason` is set exactly when
/// `success` is false.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub success: bool,
    pub reason: Option<&'static str>,
    pub user: Option<User>,
}

impl AuthOutcome {
    fn granted(user: User) -> Self {
        Self {
            success: true,
            reason: None,
            user: Some(user),
        }
    }

    fn denied(reason: &'static str) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            user: None,
        }
    }
}

#[derive(Clone)]
pub struct Authenticator {
    store: CredentialStore,
}

impl Authenticator {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Gate a username/password pair. Never fails: store errors collapse
    /// into [`REASON_UNAVAILABLE`] after being logged.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, username: &str, password: &str) -> AuthOutcome {
        if username.is_empty() || password.is_empty() {
            return AuthOutcome::denied(REASON_REQUIRED);
        }

        let user = match self.store.find_by_username(username).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                self.store.hasher().verify_dummy(password).await;
                warn!("authentication failed: user not found");
                return AuthOutcome::denied(REASON_INVALID);
            }
            Err(e) => {
                error!(error = ?e, "authentication lookup failed");
                return AuthOutcome::denied(REASON_UNAVAILABLE);
            }
        };

        if !user.is_active {
            warn!(user_id = %user.id, "authentication failed: user inactive");
            return AuthOutcome::denied(REASON_DEACTIVATED);
        }

        if !self.store.hasher().verify_async(password, &user.password_hash).await {
            warn!(user_id = %user.id, "authentication failed: invalid password");
            return AuthOutcome::denied(REASON_INVALID);
        }

        match self.store.record_login(user.id).await {
            Ok(at) => {
                info!(user_id = %user.id, "user authenticated");
                AuthOutcome::granted(User {
                    last_login: Some(at),
                    updated_at: at,
                    ..user
                })
            }
            Err(e) => {
                error!(error = ?e, user_id = %user.id, "recording login failed");
                AuthOutcome::denied(REASON_UNAVAILABLE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use time::OffsetDateTime;

    use super::*;
    use crate::auth::password::PasswordHasher;
    use crate::auth::repo::memory::MemoryUserRepo;
    use crate::auth::store::memory_store;
    use crate::config::HasherConfig;

    #[tokio::test]
    async fn empty_inputs_are_rejected_without_store_access() {
        let (store, repo) = memory_store();
        repo.set_offline(true);
        let auth = Authenticator::new(store);
        for (u, p) in [("", "x"), ("x", ""), ("", "")] {
            let out = auth.authenticate(u, p).await;
            assert!(!out.success);
            assert_eq!(out.reason, Some(REASON_REQUIRED));
        }
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_identical() {
        let (store, _) = memory_store();
        store.create("bob", "rightpass", None, false).await.unwrap();
        let auth = Authenticator::new(store);

        let ghost = auth.authenticate("ghost", "whatever").await;
        let wrong = auth.authenticate("bob", "wrongpass").await;
        assert_eq!(ghost.reason, Some(REASON_INVALID));
        assert_eq!((ghost.success, ghost.reason), (wrong.success, wrong.reason));
        assert!(ghost.user.is_none() && wrong.user.is_none());
    }

    #[tokio::test]
    async fn empty_store_rejects_everyone() {
        let (store, _) = memory_store();
        let out = Authenticator::new(store).authenticate("ghost", "whatever").await;
        assert!(!out.success);
        assert_eq!(out.reason, Some(REASON_INVALID));
    }

    #[tokio::test]
    async fn inactive_user_is_denied_even_with_right_password() {
        let (store, repo) = memory_store();
        store.create("carol", "rightpass", None, false).await.unwrap();
        repo.set_active("carol", false);
        let out = Authenticator::new(store).authenticate("carol", "rightpass").await;
        assert_eq!(out.reason, Some(REASON_DEACTIVATED));
        assert!(repo.all()[0].last_login.is_none());
    }

    #[tokio::test]
    async fn success_updates_last_login() {
        let (store, repo) = memory_store();
        store.create("bob", "rightpass", None, false).await.unwrap();
        let auth = Authenticator::new(store);

        let start = OffsetDateTime::now_utc();
        let out = auth.authenticate("bob", "rightpass").await;
        assert!(out.success);
        assert_eq!(out.reason, None);
        let stored = repo.all()[0].last_login.expect("last_login set");
        assert!(stored >= start);
        assert_eq!(out.user.and_then(|u| u.last_login), Some(stored));
    }

    #[tokio::test]
    async fn store_outage_degrades_to_unavailable() {
        let (store, repo) = memory_store();
        store.create("bob", "rightpass", None, false).await.unwrap();
        repo.set_offline(true);
        let out = Authenticator::new(store).authenticate("bob", "rightpass").await;
        assert!(!out.success);
        assert_eq!(out.reason, Some(REASON_UNAVAILABLE));
    }

    #[tokio::test]
    async fn unknown_user_costs_a_full_verification() {
        let hasher = PasswordHasher::new(HasherConfig {
            memory_kib: 8 * 1024,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        let store = CredentialStore::new(Arc::new(MemoryUserRepo::default()), hasher);
        store.create("bob", "rightpass", None, false).await.unwrap();
        let auth = Authenticator::new(store);

        let started = Instant::now();
        let wrong = auth.authenticate("bob", "wrongpass").await;
        let wrong_elapsed = started.elapsed();

        let started = Instant::now();
        let ghost = auth.authenticate("ghost", "wrongpass").await;
        let ghost_elapsed = started.elapsed();

        assert_eq!(wrong.reason, ghost.reason);
        assert!(
            ghost_elapsed * 4 >= wrong_elapsed,
            "unknown user took {ghost_elapsed:?}, wrong password took {wrong_elapsed:?}"
        );
    }
}
