//! Session lifetime and password hashing cost.

use anyhow::{Context, Result};
use chrono::TimeDelta;
use clap::{Arg, ArgMatches, Command};

use crate::auth::HashCost;

pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_ARGON2_MEMORY_KIB: &str = "argon2-memory-kib";
pub const ARG_ARGON2_ITERATIONS: &str = "argon2-iterations";
pub const ARG_ARGON2_PARALLELISM: &str = "argon2-parallelism";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds, fixed when the session is issued")
                .env("PUYO_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_ARGON2_MEMORY_KIB)
                .long(ARG_ARGON2_MEMORY_KIB)
                .help("Argon2id memory cost in KiB")
                .env("PUYO_ARGON2_MEMORY_KIB")
                .default_value("65536")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ARGON2_ITERATIONS)
                .long(ARG_ARGON2_ITERATIONS)
                .help("Argon2id number of passes")
                .env("PUYO_ARGON2_ITERATIONS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ARGON2_PARALLELISM)
                .long(ARG_ARGON2_PARALLELISM)
                .help("Argon2id lanes")
                .env("PUYO_ARGON2_PARALLELISM")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
}

#[derive(Debug, PartialEq, Eq)]
pub struct Options {
    pub session_ttl: TimeDelta,
    pub hash_cost: HashCost,
}

impl Options {
    /// # Errors
    /// Returns an error if an argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let ttl_seconds = required::<u32>(matches, ARG_SESSION_TTL_SECONDS)?;
        Ok(Self {
            session_ttl: TimeDelta::seconds(i64::from(ttl_seconds)),
            hash_cost: HashCost {
                memory_kib: required(matches, ARG_ARGON2_MEMORY_KIB)?,
                iterations: required(matches, ARG_ARGON2_ITERATIONS)?,
                parallelism: required(matches, ARG_ARGON2_PARALLELISM)?,
            },
        })
    }
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}
