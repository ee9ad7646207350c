//! Users and sessions behind a narrow query interface.
//!
//! Handlers and the session manager only ever see [`Store`]; the concrete
//! backend is picked once at startup by [`connect`] and injected as an
//! `Arc<dyn Store>`.
//!
//! Uniqueness rules are enforced by the backend itself:
//! - user names are unique; [`Store::create_user`] reports a collision as
//!   [`CreateUserOutcome::Conflict`] without a prior read,
//! - session keys are unique; a colliding key is reported as
//!   [`SessionInsert::Duplicate`] and never overwrites the existing row.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use url::Url;
use utoipa::ToSchema;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Public view of an account. This is all a response ever carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// Account as stored, including the password hash.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub password_hash: SecretString,
}

impl UserRecord {
    #[must_use]
    pub fn public(&self) -> User {
        User {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Persisted session. `token_hash` is the SHA-256 digest of the cookie value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub token_hash: Vec<u8>,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    Conflict,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionInsert {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically create a user unless the name is taken.
    async fn create_user(&self, name: &str, password_hash: &str) -> Result<CreateUserOutcome>;

    async fn user_by_id(&self, id: i64) -> Result<Option<UserRecord>>;

    async fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>>;

    async fn insert_session(&self, session: &SessionRecord) -> Result<SessionInsert>;

    /// Look up a session by token digest, expired or not.
    async fn session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>>;

    /// Cheap liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<()>;

    /// Short backend name reported by the health endpoint.
    fn kind(&self) -> &'static str;
}

/// Open the store selected by `dsn`.
///
/// No DSN (or a `memory:` scheme) selects the in-process store; `postgres:`
/// and `postgresql:` DSNs connect a pool and apply the schema.
///
/// # Errors
/// Returns an error for an unparsable DSN, an unsupported scheme, or if the
/// database cannot be reached.
pub async fn connect(dsn: Option<&str>) -> Result<Arc<dyn Store>> {
    let Some(dsn) = dsn.map(str::trim).filter(|dsn| !dsn.is_empty()) else {
        info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let url = Url::parse(dsn).context("Invalid DSN")?;
    match url.scheme() {
        "memory" => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        "postgres" | "postgresql" => {
            info!(dsn = %redact(&url), "Connecting to database");
            let store = PgStore::connect(dsn).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        scheme => bail!("Unsupported DSN scheme: {scheme}"),
    }
}

/// DSN with the password removed, safe to log.
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("****"));
    }
    url.to_string()
}
