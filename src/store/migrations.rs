//! Schema migrations, tracked with `PRAGMA user_version`

use rusqlite::{Connection, TransactionBehavior};

use crate::error::Result;

/// Applied in order; the index + 1 is the resulting `user_version`
const MIGRATIONS: &[&str] = &[
    // 1: initial schema
    "CREATE TABLE packages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        latest_version_id INTEGER REFERENCES package_versions(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE package_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        package_id INTEGER NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
        version INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (package_id, version)
    );

    CREATE TABLE package_version_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        package_version_id INTEGER NOT NULL REFERENCES package_versions(id) ON DELETE CASCADE,
        file_name TEXT NOT NULL,
        contents TEXT NOT NULL,
        checksum TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (package_version_id, file_name)
    );

    CREATE TABLE messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        package_id INTEGER NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        latest_version_id INTEGER REFERENCES message_versions(id) ON DELETE SET NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (package_id, name)
    );

    CREATE TABLE message_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        package_version_id INTEGER NOT NULL REFERENCES package_versions(id) ON DELETE CASCADE,
        version INTEGER NOT NULL,
        body TEXT NOT NULL,
        serialized_schema TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (message_id, version)
    );

    CREATE INDEX idx_package_versions_package ON package_versions(package_id);
    CREATE INDEX idx_package_version_files_version ON package_version_files(package_version_id);
    CREATE INDEX idx_messages_package ON messages(package_id);
    CREATE INDEX idx_message_versions_message ON message_versions(message_id);
    CREATE INDEX idx_message_versions_package_version ON message_versions(package_version_id);",
];

/// Bring the database up to the newest schema
pub(crate) fn run(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current: i64 = tx.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
        let version = index as i64 + 1;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tracing::info!(version, "applied registry migration");
    }

    tx.commit()?;
    Ok(())
}
