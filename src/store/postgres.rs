//! Postgres-backed store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tracing::Instrument;

use super::{CreateUserOutcome, SessionInsert, SessionRecord, Store, User, UserRecord};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply `sql/schema.sql`. Every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error naming the first statement that failed.
    pub async fn migrate(&self) -> Result<()> {
        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, name: &str, password_hash: &str) -> Result<CreateUserOutcome> {
        let query = "INSERT INTO users (name, password_hash) VALUES ($1, $2) RETURNING id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(name)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(row) => Ok(CreateUserOutcome::Created(User {
                id: row.get("id"),
                name: name.to_string(),
            })),
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let query = "SELECT id, name, password_hash FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;

        Ok(row.map(|row| user_record(&row)))
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>> {
        let query = "SELECT id, name, password_hash FROM users WHERE name = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by name")?;

        Ok(row.map(|row| user_record(&row)))
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<SessionInsert> {
        let query = "INSERT INTO sessions (token_hash, user_id, expires_at) VALUES ($1, $2, $3)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&session.token_hash)
            .bind(session.user_id)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(SessionInsert::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(SessionInsert::Duplicate),
            Err(err) => Err(err).context("failed to insert session"),
        }
    }

    async fn session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let query = "SELECT token_hash, user_id, expires_at FROM sessions WHERE token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        Ok(row.map(|row| SessionRecord {
            token_hash: row.get("token_hash"),
            user_id: row.get("user_id"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

fn user_record(row: &sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        name: row.get("name"),
        password_hash: SecretString::from(row.get::<String, _>("password_hash")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}
