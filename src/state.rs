//! SQLite persisted-state store
//!
//! Uses sqlx for async database access with a connection pool. Each
//! logical resource persists as a single JSON state document written in
//! one transaction, so a crash or concurrent reader never sees a partial
//! multi-field update. The region is additionally stored as its own
//! column: it is the one field legitimately read on its own, to pick a
//! connection before a full pass.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::rule::RuleSet;

/// Database connection pool type alias
pub type DbPool = SqlitePool;

/// Lifecycle of the remote object backing a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No remote object known
    #[default]
    Missing,
    /// Identity changed; a remote object from a prior identity may still
    /// exist and must eventually be retired
    Unknown,
    /// Create issued or accepted as duplicate; rules not yet guaranteed
    Starting,
    /// Remote object exists and matches the last applied desired state
    Up,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Missing => "missing",
            LifecycleState::Unknown => "unknown",
            LifecycleState::Starting => "starting",
            LifecycleState::Up => "up",
        }
    }
}

/// A superseded `(name, region)` identity awaiting deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredIdentity {
    pub name: String,
    pub region: String,
}

/// Authoritative persisted state of one security-group resource
///
/// Mirrors the definition fields once applied, plus the remote handle,
/// lifecycle state, and the retirement queue for prior identities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceState {
    pub name: Option<String>,
    pub region: Option<String>,
    pub credentials: Option<String>,
    pub description: Option<String>,
    pub scope_id: Option<String>,
    pub remote_id: Option<String>,
    #[serde(default)]
    pub rules: RuleSet,
    #[serde(default)]
    pub lifecycle: LifecycleState,
    #[serde(default)]
    pub pending_retirement: Vec<RetiredIdentity>,
}

impl ResourceState {
    /// `(name, region)` identity, once both are persisted
    pub fn identity(&self) -> Option<(&str, &str)> {
        match (&self.name, &self.region) {
            (Some(name), Some(region)) => Some((name.as_str(), region.as_str())),
            _ => None,
        }
    }

    /// Opaque remote handle, for orchestrators exposing physical specs
    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }
}

/// Transactional store of [`ResourceState`] documents keyed by logical id
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: DbPool,
}

impl StateStore {
    /// Open the state database at `path`, creating it if needed
    pub async fn open(path: &Path) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open state database")?;

        setup_schema(&pool).await?;
        Ok(StateStore { pool })
    }

    /// Open an in-memory database, mainly for tests
    ///
    /// A single connection is required: each in-memory SQLite connection
    /// is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory state database")?;

        setup_schema(&pool).await?;
        Ok(StateStore { pool })
    }

    /// Load the state document for a logical resource
    pub async fn load(&self, key: &str) -> Result<Option<ResourceState>> {
        let row = sqlx::query("SELECT state FROM resources WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let doc: String = row.get("state");
                let state =
                    serde_json::from_str(&doc).context("Invalid persisted state document")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Persist the full state document in a single transaction
    pub async fn save(&self, key: &str, state: &ResourceState) -> Result<()> {
        let doc = serde_json::to_string(state)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO resources (key, region, state, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 region = excluded.region,
                 state = excluded.state,
                 updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&state.region)
        .bind(&doc)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Clear the state entry after a successful destroy of an undeclared
    /// resource
    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM resources WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Partial read of the persisted region, without loading the document
    pub async fn region_of(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT region FROM resources WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("region")))
    }
}

/// Setup database schema
async fn setup_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            key TEXT PRIMARY KEY,
            region TEXT,
            state TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
