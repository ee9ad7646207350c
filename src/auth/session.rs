//! Session issuance and resolution.
//!
//! Flow Overview:
//! 1) `create` mints a random URL-safe token, fixes `expires_at = now + ttl`
//!    and stores only the token digest.
//! 2) The raw token is handed to the client once, in the `session_id` cookie.
//! 3) `resolve` digests the presented token and loads the owning user while
//!    `now <= expires_at`. Later lookups report `Expired`.
//!
//! Expiry is fixed at creation and never extended.

use anyhow::{anyhow, bail, Context, Result};
use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use std::{fmt, sync::Arc};

use super::{
    clock::Clock,
    utils::{generate_session_token, hash_session_token},
};
use crate::store::{SessionInsert, SessionRecord, Store, User};

pub const SESSION_COOKIE_NAME: &str = "session_id";

const COOKIE_EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const CREATE_ATTEMPTS: usize = 3;

/// A freshly issued session. `token` is the only copy of the raw value.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of looking up a presented token.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Valid(User),
    NotFound,
    Expired,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.store.kind())
            .field("clock", &self.clock)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl SessionManager {
    /// # Errors
    /// Returns an error if `ttl` is not positive.
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, ttl: TimeDelta) -> Result<Self> {
        if ttl <= TimeDelta::zero() {
            bail!("Session TTL must be positive, got {ttl}");
        }
        Ok(Self { store, clock, ttl })
    }

    #[must_use]
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Issue a session for `user_id`.
    ///
    /// The expiry is truncated to whole seconds so the cookie `Expires`
    /// attribute states exactly what is stored.
    ///
    /// # Errors
    /// Returns an error if entropy or the store is unavailable.
    pub async fn create(&self, user_id: i64) -> Result<Session> {
        let expires_at = (self.clock.now() + self.ttl).trunc_subsecs(0);

        for _ in 0..CREATE_ATTEMPTS {
            let token = generate_session_token()?;
            let record = SessionRecord {
                token_hash: hash_session_token(&token),
                user_id,
                expires_at,
            };
            match self
                .store
                .insert_session(&record)
                .await
                .context("failed to store session")?
            {
                SessionInsert::Inserted => return Ok(Session { token, expires_at }),
                SessionInsert::Duplicate => {}
            }
        }

        Err(anyhow!("failed to generate unique session token"))
    }

    /// Resolve a presented token into its owning user.
    ///
    /// A session is valid through its exact expiry instant. A session whose
    /// owner no longer exists resolves as `NotFound`.
    ///
    /// # Errors
    /// Returns an error only if the store fails.
    pub async fn resolve(&self, token: &str) -> Result<Resolution> {
        let Some(session) = self
            .store
            .session(&hash_session_token(token))
            .await
            .context("failed to lookup session")?
        else {
            return Ok(Resolution::NotFound);
        };

        if self.clock.now() > session.expires_at {
            return Ok(Resolution::Expired);
        }

        let owner = self
            .store
            .user_by_id(session.user_id)
            .await
            .context("failed to lookup session owner")?;
        Ok(owner.map_or(Resolution::NotFound, |record| {
            Resolution::Valid(record.public())
        }))
    }
}

/// Build the `Set-Cookie` value for a session.
///
/// # Errors
/// Fails only if the token contains bytes not allowed in a header.
pub fn session_cookie(session: &Session) -> Result<HeaderValue, InvalidHeaderValue> {
    let expires = session.expires_at.format(COOKIE_EXPIRES_FORMAT);
    let cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; Secure; SameSite=Strict; Expires={expires}",
        session.token
    );
    HeaderValue::from_str(&cookie)
}

/// The `session_id` value from the request's `Cookie` headers, if any.
#[must_use]
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::store::{CreateUserOutcome, MemoryStore, UserRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 250_000_000).unwrap_or_default()
    }

    async fn setup() -> Result<(Arc<MemoryStore>, Arc<ManualClock>, SessionManager, User)> {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let manager = SessionManager::new(store.clone(), clock.clone(), TimeDelta::hours(24))?;
        let CreateUserOutcome::Created(user) = store.create_user("alice", "hash").await? else {
            bail!("alice should be created");
        };
        Ok((store, clock, manager, user))
    }

    #[tokio::test]
    async fn create_then_resolve() -> Result<()> {
        let (_, _, manager, alice) = setup().await?;
        let session = manager.create(alice.id).await?;

        assert_eq!(manager.resolve(&session.token).await?, Resolution::Valid(alice));
        Ok(())
    }

    #[tokio::test]
    async fn expiry_is_fixed_ttl_in_whole_seconds() -> Result<()> {
        let (store, _, manager, alice) = setup().await?;
        let session = manager.create(alice.id).await?;

        let expected = DateTime::<Utc>::from_timestamp(1_700_000_000 + 86_400, 0).unwrap_or_default();
        assert_eq!(session.expires_at, expected);

        let stored = store
            .session(&hash_session_token(&session.token))
            .await?
            .map(|record| record.expires_at);
        assert_eq!(stored, Some(session.expires_at));
        Ok(())
    }

    #[tokio::test]
    async fn valid_through_expiry_instant_and_expired_after() -> Result<()> {
        let (_, clock, manager, alice) = setup().await?;
        let session = manager.create(alice.id).await?;

        clock.set(session.expires_at);
        assert_eq!(
            manager.resolve(&session.token).await?,
            Resolution::Valid(alice)
        );

        clock.set(session.expires_at + TimeDelta::nanoseconds(1));
        assert_eq!(manager.resolve(&session.token).await?, Resolution::Expired);

        clock.advance(TimeDelta::days(30));
        assert_eq!(manager.resolve(&session.token).await?, Resolution::Expired);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() -> Result<()> {
        let (_, _, manager, _) = setup().await?;
        assert_eq!(manager.resolve("no-such-token").await?, Resolution::NotFound);
        assert_eq!(manager.resolve("").await?, Resolution::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn session_ids_are_unique() -> Result<()> {
        let (store, _, manager, alice) = setup().await?;
        let first = manager.create(alice.id).await?;
        let second = manager.create(alice.id).await?;

        assert_ne!(first.token, second.token);
        assert!(store.session(&hash_session_token(&first.token)).await?.is_some());
        assert!(store.session(&hash_session_token(&second.token)).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn raw_token_is_never_stored() -> Result<()> {
        let (store, _, manager, alice) = setup().await?;
        let session = manager.create(alice.id).await?;
        assert!(store.session(session.token.as_bytes()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_owner_is_not_found() -> Result<()> {
        let (_, _, manager, _) = setup().await?;
        let session = manager.create(99).await?;
        assert_eq!(manager.resolve(&session.token).await?, Resolution::NotFound);
        Ok(())
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(start()));
        assert!(SessionManager::new(store.clone(), clock.clone(), TimeDelta::zero()).is_err());
        assert!(SessionManager::new(store, clock, TimeDelta::seconds(-1)).is_err());
    }

    /// Store that reports every session key as already taken.
    struct CollidingStore {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Store for CollidingStore {
        async fn create_user(&self, _: &str, _: &str) -> Result<CreateUserOutcome> {
            Ok(CreateUserOutcome::Conflict)
        }
        async fn user_by_id(&self, _: i64) -> Result<Option<UserRecord>> {
            Ok(None)
        }
        async fn user_by_name(&self, _: &str) -> Result<Option<UserRecord>> {
            Ok(None)
        }
        async fn insert_session(&self, _: &SessionRecord) -> Result<SessionInsert> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(SessionInsert::Duplicate)
        }
        async fn session(&self, _: &[u8]) -> Result<Option<SessionRecord>> {
            Ok(None)
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        fn kind(&self) -> &'static str {
            "colliding"
        }
    }

    #[tokio::test]
    async fn create_gives_up_after_repeated_collisions() -> Result<()> {
        let store = Arc::new(CollidingStore {
            attempts: AtomicUsize::new(0),
        });
        let manager =
            SessionManager::new(store.clone(), Arc::new(ManualClock::new(start())), TimeDelta::hours(1))?;

        assert!(manager.create(1).await.is_err());
        assert_eq!(store.attempts.load(Ordering::SeqCst), CREATE_ATTEMPTS);
        Ok(())
    }

    #[test]
    fn session_cookie_attributes() -> Result<()> {
        let session = Session {
            token: "abc-_123".to_string(),
            expires_at: DateTime::<Utc>::from_timestamp(1_700_086_400, 0).unwrap_or_default(),
        };
        let cookie = session_cookie(&session)?;
        assert_eq!(
            cookie.to_str()?,
            "session_id=abc-_123; Path=/; HttpOnly; Secure; SameSite=Strict; Expires=Wed, 15 Nov 2023 22:13:20 GMT"
        );
        Ok(())
    }

    #[test]
    fn session_debug_hides_token() {
        let session = Session {
            token: "super-secret".to_string(),
            expires_at: start(),
        };
        assert!(!format!("{session:?}").contains("super-secret"));
    }

    #[test]
    fn session_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; session_id=tok123; lang=en"),
        );
        assert_eq!(session_token(&headers), Some("tok123".to_string()));
    }

    #[test]
    fn session_token_across_multiple_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("session_id=tok456"));
        assert_eq!(session_token(&headers), Some("tok456".to_string()));
    }

    #[test]
    fn session_token_absent_or_empty() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(COOKIE, HeaderValue::from_static("garbage; other=1"));
        assert_eq!(session_token(&headers), None);

        headers.insert(COOKIE, HeaderValue::from_static("session_id="));
        assert_eq!(session_token(&headers), None);

        headers.insert(COOKIE, HeaderValue::from_static("xsession_id=nope"));
        assert_eq!(session_token(&headers), None);
    }
}
