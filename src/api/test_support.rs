use axum::response::Response;
use chrono::{DateTime, TimeDelta, Utc};
use http_body_util::BodyExt;
use std::sync::Arc;

use super::AppState;
use crate::{
    auth::{clock::ManualClock, password::cheap_hasher, SessionManager},
    store::{MemoryStore, Store},
};

pub(crate) fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// State over a fresh in-memory store with a cheap hasher and a manual clock
/// shared by the store and the session manager.
pub(crate) fn test_state() -> (AppState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    (state_over(store, clock.clone()), clock)
}

pub(crate) fn test_state_with(store: Arc<dyn Store>) -> (AppState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    (state_over(store, clock.clone()), clock)
}

fn state_over(store: Arc<dyn Store>, clock: Arc<ManualClock>) -> AppState {
    let sessions = match SessionManager::new(store.clone(), clock, TimeDelta::hours(24)) {
        Ok(sessions) => sessions,
        Err(err) => panic!("24h TTL should be valid: {err}"),
    };
    AppState::new(store, sessions, cheap_hasher())
}

pub(crate) async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    serde_json::from_slice(&bytes).unwrap_or_default()
}
