use crate::{
    api::{self, AppState},
    auth::{CredentialHasher, HashCost, SessionManager, SystemClock},
    store,
};
use anyhow::Result;
use chrono::TimeDelta;
use secrecy::{ExposeSecret, SecretString};
use std::{path::PathBuf, sync::Arc};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub static_dir: Option<PathBuf>,
    pub session_ttl: TimeDelta,
    pub hash_cost: HashCost,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be opened, the configuration is
/// invalid, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!(
        port = args.port,
        session_ttl = %args.session_ttl,
        hash_cost = ?args.hash_cost,
        "Starting server"
    );

    let store = store::connect(args.dsn.as_ref().map(|dsn| dsn.expose_secret())).await?;
    let hasher = CredentialHasher::new(args.hash_cost)?;
    let sessions = SessionManager::new(store.clone(), Arc::new(SystemClock), args.session_ttl)?;

    api::new(
        args.port,
        AppState::new(store, sessions, hasher),
        args.static_dir.as_deref(),
    )
    .await
}
