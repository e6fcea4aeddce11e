use anyhow::Context;
use async_trait::async_trait;
use rusqlite::types::Value;
use thiserror::Error;

use crate::db::{Database, Schema};

/// Bound-parameter ceiling per statement of the production store.
pub const DEFAULT_PARAM_CEILING: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("statement binds {count} parameters; the store accepts at most {ceiling}")]
    TooManyParameters { count: usize, ceiling: usize },
    #[error("durable store write failed: {0}")]
    Sqlite(String),
}

/// The durable relational store, seen only through "run this statement with
/// these parameters".
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Largest number of bound parameters a single statement may carry.
    fn param_ceiling(&self) -> usize;

    /// Executes one statement and returns the number of rows changed.
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize, StoreError>;
}

/// SQLite-backed durable store that enforces the same per-statement
/// parameter ceiling as the hosted database.
#[derive(Clone)]
pub struct SqliteDurableStore {
    db: Database,
    ceiling: usize,
}

impl SqliteDurableStore {
    pub fn new(db: Database, ceiling: usize) -> anyhow::Result<Self> {
        if db.schema() != Schema::Ingest {
            anyhow::bail!("durable store needs an ingest database, got {:?}", db.schema());
        }
        Ok(Self { db, ceiling })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn count_sessions(&self) -> anyhow::Result<u64> {
        self.db
            .execute(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM focus_sessions", [], |row| row.get(0))
                    .context("failed to count sessions")?;
                Ok(count.max(0) as u64)
            })
            .await
    }
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    fn param_ceiling(&self) -> usize {
        self.ceiling
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize, StoreError> {
        if params.len() > self.ceiling {
            return Err(StoreError::TooManyParameters {
                count: params.len(),
                ceiling: self.ceiling,
            });
        }

        let sql = sql.to_string();
        self.db
            .execute(move |conn| {
                let changed = conn
                    .prepare_cached(&sql)?
                    .execute(rusqlite::params_from_iter(params))?;
                Ok(changed)
            })
            .await
            .map_err(|err| StoreError::Sqlite(format!("{err:#}")))
    }
}
