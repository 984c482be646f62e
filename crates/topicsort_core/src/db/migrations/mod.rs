//! Ordered schema scripts and the runner that applies them.
//!
//! # Invariants
//! - Script `n` upgrades a database at version `n - 1` to version `n`.
//! - All pending scripts run in one transaction; a failure leaves the file
//!   at its previous version.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// Schema scripts, index `i` holding version `i + 1`.
const SCRIPTS: [&str; 2] = [
    include_str!("0001_init.sql"),
    include_str!("0002_taxonomy_versions.sql"),
];

/// Schema version this build writes.
pub fn latest_version() -> u32 {
    u32::try_from(SCRIPTS.len()).unwrap_or(u32::MAX)
}

/// Brings `conn` up to [`latest_version`].
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file is newer than this build.
/// - `MigrationFailed` naming the first script that did not apply.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from = conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?;
    let latest = latest_version();
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }
    if from == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, script) in (1u32..).zip(SCRIPTS.iter()).skip(from as usize) {
        tx.execute_batch(script)
            .and_then(|()| tx.pragma_update(None, "user_version", version))
            .map_err(|source| DbError::MigrationFailed { version, source })?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        from, latest
    );
    Ok(())
}
