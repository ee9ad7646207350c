//! Request-scoped identity.
//!
//! The identity lives in the request extensions under a private wrapper type,
//! so only this module can attach it and nothing else can collide with it.

use axum::http::{Extensions, Request};

use crate::store::User;

#[derive(Clone, Debug)]
struct Identity(User);

/// Return the request with `user` attached as its identity.
#[must_use]
pub fn with_identity<B>(mut request: Request<B>, user: User) -> Request<B> {
    request.extensions_mut().insert(Identity(user));
    request
}

/// The identity attached to `request`, if any.
#[must_use]
pub fn identity_of<B>(request: &Request<B>) -> Option<&User> {
    identity_from_extensions(request.extensions())
}

#[must_use]
pub fn identity_from_extensions(extensions: &Extensions) -> Option<&User> {
    extensions.get::<Identity>().map(|identity| &identity.0)
}
