//! In-process store for development and tests. Nothing survives a restart.
//!
//! Lapsed sessions are dropped whenever a new session is inserted, so the
//! session map only holds rows that can still resolve.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::{collections::HashMap, sync::Arc};

use super::{CreateUserOutcome, SessionInsert, SessionRecord, Store, User, UserRecord};
use crate::auth::{Clock, SystemClock};

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct Inner {
    last_user_id: i64,
    users: HashMap<i64, UserRecord>,
    names: HashMap<String, i64>,
    sessions: HashMap<Vec<u8>, SessionRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store that judges session expiry by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, name: &str, password_hash: &str) -> Result<CreateUserOutcome> {
        // Check and insert under one lock so concurrent signups cannot both win.
        let mut inner = self.inner.lock();
        if inner.names.contains_key(name) {
            return Ok(CreateUserOutcome::Conflict);
        }

        inner.last_user_id += 1;
        let id = inner.last_user_id;
        inner.names.insert(name.to_string(), id);
        inner.users.insert(
            id,
            UserRecord {
                id,
                name: name.to_string(),
                password_hash: SecretString::from(password_hash),
            },
        );

        Ok(CreateUserOutcome::Created(User {
            id,
            name: name.to_string(),
        }))
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        Ok(self.inner.lock().users.get(&id).cloned())
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .names
            .get(name)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<SessionInsert> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        // Valid through the expiry instant, so keep rows with expires_at == now.
        inner.sessions.retain(|_, stored| stored.expires_at >= now);
        if inner.sessions.contains_key(&session.token_hash) {
            return Ok(SessionInsert::Duplicate);
        }
        inner
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(SessionInsert::Inserted)
    }

    async fn session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        Ok(self.inner.lock().sessions.get(token_hash).cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
