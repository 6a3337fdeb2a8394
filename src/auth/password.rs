use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tokio::task;
use tracing::error;

use crate::config::HasherConfig;

/// Salted argon2id hashing. The PHC string output embeds the algorithm,
/// parameters and salt, so verification needs nothing else.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    // Stand-in hash verified when a username is unknown, so the miss costs
    // the same as a wrong password.
    dummy_hash: String,
}

impl PasswordHasher {
    pub fn new(cfg: HasherConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(b"no-such-user", &salt)
            .map_err(|e| anyhow::anyhow!("argon2 dummy hash: {e}"))?
            .to_string();
        Ok(Self { argon2, dummy_hash })
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Returns `false` on mismatch and on malformed hashes.
    pub fn verify(&self, plain: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "stored password hash is malformed");
                return false;
            }
        };
        self.argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }

    /// [`hash`](Self::hash) on the blocking pool.
    pub async fn hash_async(&self, plain: &str) -> anyhow::Result<String> {
        let hasher = self.clone();
        let plain = plain.to_string();
        task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| anyhow::anyhow!("password hashing task failed: {e}"))?
    }

    /// [`verify`](Self::verify) on the blocking pool. A failed task counts
    /// as a mismatch.
    pub async fn verify_async(&self, plain: &str, hash: &str) -> bool {
        let hasher = self.clone();
        let plain = plain.to_string();
        let hash = hash.to_string();
        match task::spawn_blocking(move || hasher.verify(&plain, &hash)).await {
            Ok(ok) => ok,
            Err(e) => {
                error!(error = %e, "password verification task failed");
                false
            }
        }
    }

    /// Runs a full verification against the stand-in hash and discards the
    /// result.
    pub async fn verify_dummy(&self, plain: &str) {
        let hash = self.dummy_hash.clone();
        self.verify_async(plain, &hash).await;
    }
}

#[cfg(test)]
pub(crate) fn fast_hasher() -> PasswordHasher {
    PasswordHasher::new(HasherConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .expect("valid params")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = fast_hasher();
        let password = "Secur3P@ssw0rd!";
        let hash = hasher.hash(password).expect("hashing should succeed");
        assert!(hasher.verify(password, &hash));
        assert_ne!(hash, password);
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = fast_hasher();
        let hash = hasher.hash("correct-horse-battery-staple").unwrap();
        assert!(!hasher.verify("wrong-password", &hash));
    }

    #[test]
    fn same_input_gets_distinct_salts() {
        let hasher = fast_hasher();
        let a = hasher.hash("longenough1").unwrap();
        let b = hasher.hash("longenough1").unwrap();
        assert_ne!(a, b);
        assert!(hasher.verify("longenough1", &a));
        assert!(hasher.verify("longenough1", &b));
    }

    #[test]
    fn verify_is_false_on_malformed_hash() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("anything", "not-a-valid-hash"));
        assert!(!hasher.verify("anything", ""));
    }

    #[test]
    fn hashes_from_other_work_factors_still_verify() {
        let strong = PasswordHasher::new(HasherConfig {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        let hash = strong.hash("rotate-me-please").unwrap();
        assert!(fast_hasher().verify("rotate-me-please", &hash));
    }

    #[test]
    fn dummy_hash_uses_configured_work_factor() {
        let hasher = PasswordHasher::new(HasherConfig {
            memory_kib: 2048,
            iterations: 3,
            parallelism: 1,
        })
        .unwrap();
        let parsed = PasswordHash::new(&hasher.dummy_hash).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert!(hasher.dummy_hash.contains("m=2048,t=3,p=1"));
        assert!(!hasher.verify("", &hasher.dummy_hash));
    }

    #[tokio::test]
    async fn async_variants_match_sync_results() {
        let hasher = fast_hasher();
        let hash = hasher.hash_async("longenough1").await.unwrap();
        assert!(hasher.verify_async("longenough1", &hash).await);
        assert!(!hasher.verify_async("longenough2", &hash).await);
        assert!(hasher.verify("longenough1", &hash));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn verification_does_not_hold_the_runtime_thread() {
        let hasher = PasswordHasher::new(HasherConfig {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        let hash = hasher.hash("longenough1").unwrap();
        let ticked = AtomicBool::new(false);

        let (saw_tick, _) = tokio::join!(
            async {
                let ok = hasher.verify_async("longenough1", &hash).await;
                assert!(ok);
                ticked.load(Ordering::SeqCst)
            },
            async { ticked.store(true, Ordering::SeqCst) },
        );
        assert!(saw_tick, "other tasks must run while argon2 works");
    }
}
