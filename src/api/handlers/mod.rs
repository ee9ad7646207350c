pub mod health;
pub mod me;
pub mod signin;
pub mod signup;
pub mod types;
pub mod ws;

pub use types::Credentials;
