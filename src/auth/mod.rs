//! Credential hashing, session lifecycle and the request-scoped identity.

pub mod clock;
pub mod identity;
pub mod password;
pub mod session;
mod utils;

pub use clock::{Clock, SystemClock};
pub use identity::{identity_from_extensions, identity_of, with_identity};
pub use password::{CredentialHasher, HashCost};
pub use session::{
    session_cookie, session_token, Resolution, Session, SessionManager, SESSION_COOKIE_NAME,
};
