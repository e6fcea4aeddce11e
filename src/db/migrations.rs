use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction};

/// Which database a [`Database`](super::Database) is opened for. The agent
/// keeps the device-local session log; the ingest server keeps the durable
/// multi-account table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Agent,
    Ingest,
}

impl Schema {
    fn migrations(self) -> &'static [&'static str] {
        match self {
            Schema::Agent => &[include_str!("schemas/agent_v1.sql")],
            Schema::Ingest => &[include_str!("schemas/ingest_v1.sql")],
        }
    }

    pub fn current_version(self) -> i32 {
        self.migrations().len() as i32
    }
}

pub fn run_migrations(conn: &mut Connection, schema: Schema) -> Result<()> {
    let target = schema.current_version();
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > target {
        bail!(
            "database version ({}) is newer than supported {:?} schema ({})",
            version,
            schema,
            target
        );
    }

    if version == target {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < target {
        let next_version = version + 1;
        apply_migration(&tx, schema, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", target)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, schema: Schema, version: i32) -> Result<()> {
    let Some(sql) = usize::try_from(version - 1)
        .ok()
        .and_then(|index| schema.migrations().get(index))
    else {
        bail!("unknown {schema:?} migration target version: {version}");
    };

    tx.execute_batch(sql)
        .with_context(|| format!("failed to execute {schema:?} schema v{version}"))
}
