//! # Puyo (game server with session authentication)
//!
//! `puyo` serves account signup and signin, an authenticated profile lookup
//! and a WebSocket echo channel.
//!
//! ## Authentication
//!
//! Passwords are hashed with Argon2id and never leave the server in any
//! response. A successful signup or signin issues a session: a random,
//! URL-safe token sent to the client in the `session_id` cookie. Only the
//! SHA-256 digest of the token is persisted.
//!
//! Sessions have a fixed lifetime decided at creation. A session is valid up
//! to and including its expiry instant and is treated as absent afterwards,
//! even while still stored.
//!
//! ## Request pipeline
//!
//! Every request flows through an ordered middleware chain:
//! observability, then session resolution (which only ever enriches a request
//! with an identity), then, for protected routes, an authorization gate that
//! answers `401` when no identity is attached.
//!
//! ## Storage
//!
//! Users and sessions live behind the [`store::Store`] trait. Postgres is used
//! when a DSN is configured; otherwise an in-memory store keeps everything for
//! the lifetime of the process.

pub mod api;
pub mod auth;
pub mod cli;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Git commit the binary was built from, or `"unknown"` outside a checkout.
#[must_use]
pub fn git_commit_hash() -> &'static str {
    built_info::GIT_COMMIT_HASH.unwrap_or("unknown")
}

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
