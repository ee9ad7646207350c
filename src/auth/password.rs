//! One-way password hashing with Argon2id.
//!
//! Hashes are PHC strings (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`), so the
//! algorithm, version, cost and per-password salt travel with the hash and
//! verification needs nothing else.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

const SALT_LEN: usize = 16;
const DECOY_PASSWORD_LEN: usize = 32;

const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
const DEFAULT_ITERATIONS: u32 = 3;
const DEFAULT_PARALLELISM: u32 = 1;

/// Argon2id cost parameters.
///
/// The default (64 MiB, three passes, one lane) takes a little over 50ms per
/// hash on a current server core in a release build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    // Hash of a throwaway random password at this hasher's cost.
    decoy: Arc<str>,
    #[cfg(test)]
    verifications: Arc<AtomicUsize>,
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = self.argon2.params();
        f.debug_struct("CredentialHasher")
            .field("m_cost", &params.m_cost())
            .field("t_cost", &params.t_cost())
            .field("p_cost", &params.p_cost())
            .finish()
    }
}

impl CredentialHasher {
    /// Build a hasher and precompute its decoy hash, so construction costs
    /// one full hash.
    ///
    /// # Errors
    /// Returns an error if the cost parameters are outside what Argon2 accepts
    /// or the decoy hash cannot be computed.
    pub fn new(cost: HashCost) -> Result<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| anyhow!("Invalid Argon2 parameters: {e}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut password = [0u8; DECOY_PASSWORD_LEN];
        OsRng
            .try_fill_bytes(&mut password)
            .context("failed to generate decoy password")?;
        let decoy = hash_with(&argon2, Base64UrlUnpadded::encode_string(&password).as_bytes())
            .context("failed to compute decoy hash")?;

        Ok(Self {
            argon2,
            decoy: Arc::from(decoy),
            #[cfg(test)]
            verifications: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Hash a password with a freshly generated salt.
    ///
    /// # Errors
    /// Fails only when the OS entropy source or the hasher itself fails.
    pub fn hash(&self, password: &str) -> Result<String> {
        hash_with(&self.argon2, password.as_bytes())
    }

    /// Check a password against a stored hash.
    ///
    /// A wrong password and an unparsable hash both yield `false`. The cost
    /// parameters embedded in the hash are used, not the hasher's own.
    #[must_use]
    pub fn verify(&self, hash: &str, password: &str) -> bool {
        #[cfg(test)]
        self.verifications.fetch_add(1, Ordering::SeqCst);

        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// [`Self::hash`] on the blocking pool so request tasks are not stalled.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the blocking task is cancelled.
    pub async fn hash_blocking(&self, password: SecretString) -> Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(password.expose_secret()))
            .await
            .context("password hashing task failed")?
    }

    /// [`Self::verify`] on the blocking pool. A failed task counts as a mismatch.
    pub async fn verify_blocking(&self, hash: SecretString, password: SecretString) -> bool {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || {
            hasher.verify(hash.expose_secret(), password.expose_secret())
        })
        .await
        .unwrap_or(false)
    }

    /// Run one full verification against the decoy hash and discard the
    /// result. Used when no account matches, so that path costs the same as
    /// a wrong password.
    pub async fn verify_decoy_blocking(&self, password: SecretString) {
        let decoy = SecretString::from(self.decoy.as_ref());
        let _ = self.verify_blocking(decoy, password).await;
    }

    #[cfg(test)]
    pub(crate) fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &[u8]) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate password salt")?;
    let salt = SaltString::encode_b64(&salt).map_err(|e| anyhow!("Invalid salt: {e}"))?;

    let hash = argon2
        .hash_password(password, &salt)
        .map_err(|e| anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

#[cfg(test)]
pub(crate) fn cheap_hasher() -> CredentialHasher {
    match CredentialHasher::new(HashCost {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    }) {
        Ok(hasher) => hasher,
        Err(err) => panic!("minimum Argon2 cost should be valid: {err}"),
    }
}
