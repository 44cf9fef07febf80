//! Versioned registry primitives
//!
//! Every method runs against the connection or transaction it was built
//! from; callers decide the transaction boundary. Version numbers are
//! allocated as `max(existing) + 1`, and the unique `(owner, version)`
//! indexes turn a lost allocation race into a conflict error.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::checksum::Checksum;
use crate::error::{RegistryError, Result};
use crate::model::{Id, Message, MessageSummary, MessageVersion, Package, PackageVersion, PackageVersionFile, PageRequest};
use crate::schema::SourceFile;

const PACKAGE_COLUMNS: &str = "id, name, latest_version_id, created_at, updated_at";
const PACKAGE_VERSION_COLUMNS: &str = "id, package_id, version, created_at, updated_at";
const FILE_COLUMNS: &str =
    "id, package_version_id, file_name, contents, checksum, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, package_id, name, latest_version_id, body, created_at, updated_at";
const MESSAGE_VERSION_COLUMNS: &str =
    "id, message_id, package_version_id, version, body, serialized_schema, created_at, updated_at";

/// Registry operations scoped to one connection or transaction
pub struct VersionedRegistry<'c> {
    conn: &'c Connection,
}

impl<'c> VersionedRegistry<'c> {
    /// Wrap a connection; pass a `Transaction` to make the calls atomic
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    // ---------------------------------------------------------------
    // Version allocation
    // ---------------------------------------------------------------

    /// One more than the highest existing version of the package, or 1
    pub fn next_package_version(&self, package_id: Id) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM package_versions WHERE package_id = ?1",
            [package_id],
            |row| row.get(0),
        )?)
    }

    /// One more than the highest existing version of the message, or 1
    pub fn next_message_version(&self, message_id: Id) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM message_versions WHERE message_id = ?1",
            [message_id],
            |row| row.get(0),
        )?)
    }

    // ---------------------------------------------------------------
    // Packages
    // ---------------------------------------------------------------

    pub fn find_package(&self, name: &str) -> Result<Option<Package>> {
        let sql = format!("SELECT {} FROM packages WHERE name = ?1", PACKAGE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [name], row_to_package)
            .optional()?)
    }

    pub fn get_package(&self, id: Id) -> Result<Package> {
        let sql = format!("SELECT {} FROM packages WHERE id = ?1", PACKAGE_COLUMNS);
        self.conn
            .query_row(&sql, [id], row_to_package)
            .optional()?
            .ok_or_else(|| RegistryError::not_found("package", id.to_string()))
    }

    /// Return the package with this name, creating it without a latest version
    pub fn upsert_package(&self, name: &str) -> Result<Package> {
        if let Some(package) = self.find_package(name)? {
            return Ok(package);
        }

        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO packages (name, latest_version_id, created_at, updated_at)
             VALUES (?1, NULL, ?2, ?2)",
            params![name, now],
        )?;
        tracing::debug!(package = name, "created package");
        self.get_package(self.conn.last_insert_rowid())
    }

    // ---------------------------------------------------------------
    // Package versions
    // ---------------------------------------------------------------

    /// Allocate the next version, capture its files, and make it the latest
    pub fn record_package_version(&self, package_id: Id, files: &[SourceFile]) -> Result<PackageVersion> {
        let version = self.next_package_version(package_id)?;
        let now = Utc::now();

        self.conn.execute(
            "INSERT INTO package_versions (package_id, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![package_id, version, now],
        )?;
        let package_version_id = self.conn.last_insert_rowid();

        {
            let mut stmt = self.conn.prepare(
                "INSERT INTO package_version_files
                     (package_version_id, file_name, contents, checksum, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            )?;
            for file in files {
                let checksum = Checksum::of_contents(&file.contents);
                stmt.execute(params![
                    package_version_id,
                    file.file_name,
                    file.contents,
                    checksum.as_str(),
                    now,
                ])?;
            }
        }

        self.conn.execute(
            "UPDATE packages SET latest_version_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![package_version_id, now, package_id],
        )?;

        self.get_package_version(package_version_id)
    }

    pub fn get_package_version(&self, id: Id) -> Result<PackageVersion> {
        let sql = format!(
            "SELECT {} FROM package_versions WHERE id = ?1",
            PACKAGE_VERSION_COLUMNS
        );
        self.conn
            .query_row(&sql, [id], row_to_package_version)
            .optional()?
            .ok_or_else(|| RegistryError::not_found("package version", id.to_string()))
    }

    pub fn find_package_version(&self, package_id: Id, version: i64) -> Result<Option<PackageVersion>> {
        let sql = format!(
            "SELECT {} FROM package_versions WHERE package_id = ?1 AND version = ?2",
            PACKAGE_VERSION_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![package_id, version], row_to_package_version)
            .optional()?)
    }

    /// All versions of a package, oldest first
    pub fn list_package_versions(&self, package_id: Id) -> Result<Vec<PackageVersion>> {
        let sql = format!(
            "SELECT {} FROM package_versions WHERE package_id = ?1 ORDER BY version ASC",
            PACKAGE_VERSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let versions = stmt
            .query_map([package_id], row_to_package_version)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    /// Files of a package version, in capture order
    pub fn list_package_version_files(&self, package_version_id: Id) -> Result<Vec<PackageVersionFile>> {
        let sql = format!(
            "SELECT {} FROM package_version_files WHERE package_version_id = ?1 ORDER BY id ASC",
            FILE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map([package_version_id], row_to_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Delete a package version with its files and message versions, then
    /// repoint the package and affected messages at their newest remaining
    /// versions
    pub fn delete_package_version(&self, id: Id) -> Result<()> {
        let package_version = self.get_package_version(id)?;

        let affected_messages: Vec<Id> = {
            let mut stmt = self.conn.prepare(
                "SELECT DISTINCT message_id FROM message_versions WHERE package_version_id = ?1",
            )?;
            let ids = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };

        self.conn
            .execute("DELETE FROM package_versions WHERE id = ?1", [id])?;

        self.assign_latest_package_version(package_version.package_id)?;
        for message_id in &affected_messages {
            self.assign_latest_message_version(*message_id)?;
        }

        tracing::info!(
            package_id = package_version.package_id,
            version = package_version.version,
            messages = affected_messages.len(),
            "deleted package version"
        );
        Ok(())
    }

    /// Point the package at its highest remaining version, or at nothing
    pub fn assign_latest_package_version(&self, package_id: Id) -> Result<()> {
        self.conn.execute(
            "UPDATE packages
             SET latest_version_id = (
                     SELECT id FROM package_versions
                     WHERE package_id = ?1
                     ORDER BY version DESC LIMIT 1
                 ),
                 updated_at = ?2
             WHERE id = ?1",
            params![package_id, Utc::now()],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    pub fn find_message(&self, package_id: Id, name: &str) -> Result<Option<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE package_id = ?1 AND name = ?2",
            MESSAGE_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![package_id, name], row_to_message)
            .optional()?)
    }

    pub fn get_message(&self, id: Id) -> Result<Message> {
        let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
        self.conn
            .query_row(&sql, [id], row_to_message)
            .optional()?
            .ok_or_else(|| RegistryError::not_found("message", id.to_string()))
    }

    /// Every message ever published in the package, oldest first
    pub fn messages_for_package(&self, package_id: Id) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE package_id = ?1 ORDER BY id ASC",
            MESSAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map([package_id], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Return the message, refreshing its cached body, or create it
    pub fn upsert_message(&self, package_id: Id, name: &str, body: &str) -> Result<Message> {
        let now = Utc::now();
        if let Some(message) = self.find_message(package_id, name)? {
            self.conn.execute(
                "UPDATE messages SET body = ?1, updated_at = ?2 WHERE id = ?3",
                params![body, now, message.id],
            )?;
            return self.get_message(message.id);
        }

        self.conn.execute(
            "INSERT INTO messages (package_id, name, latest_version_id, body, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?4, ?4)",
            params![package_id, name, body, now],
        )?;
        self.get_message(self.conn.last_insert_rowid())
    }

    // ---------------------------------------------------------------
    // Message versions
    // ---------------------------------------------------------------

    /// Allocate the next message version and make it the latest
    pub fn record_message_version(
        &self,
        message_id: Id,
        package_version_id: Id,
        body: &str,
        serialized_schema: &str,
    ) -> Result<MessageVersion> {
        let version = self.next_message_version(message_id)?;
        let now = Utc::now();

        self.conn.execute(
            "INSERT INTO message_versions
                 (message_id, package_version_id, version, body, serialized_schema, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![message_id, package_version_id, version, body, serialized_schema, now],
        )?;
        let message_version_id = self.conn.last_insert_rowid();

        self.conn.execute(
            "UPDATE messages SET latest_version_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![message_version_id, now, message_id],
        )?;

        self.get_message_version(message_version_id)
    }

    pub fn get_message_version(&self, id: Id) -> Result<MessageVersion> {
        let sql = format!(
            "SELECT {} FROM message_versions WHERE id = ?1",
            MESSAGE_VERSION_COLUMNS
        );
        self.conn
            .query_row(&sql, [id], row_to_message_version)
            .optional()?
            .ok_or_else(|| RegistryError::not_found("message version", id.to_string()))
    }

    /// The version the message's latest pointer references, if any
    pub fn latest_message_version(&self, message: &Message) -> Result<Option<MessageVersion>> {
        message
            .latest_version_id
            .map(|id| self.get_message_version(id))
            .transpose()
    }

    /// All versions of a message, oldest first
    pub fn list_message_versions(&self, message_id: Id) -> Result<Vec<MessageVersion>> {
        let sql = format!(
            "SELECT {} FROM message_versions WHERE message_id = ?1 ORDER BY version ASC",
            MESSAGE_VERSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let versions = stmt
            .query_map([message_id], row_to_message_version)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    /// Point the message at its highest remaining version, or at nothing
    pub fn assign_latest_message_version(&self, message_id: Id) -> Result<()> {
        self.conn.execute(
            "UPDATE messages
             SET latest_version_id = (
                     SELECT id FROM message_versions
                     WHERE message_id = ?1
                     ORDER BY version DESC LIMIT 1
                 ),
                 updated_at = ?2
             WHERE id = ?1",
            params![message_id, Utc::now()],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Listings
    // ---------------------------------------------------------------

    /// Packages ordered by name
    pub fn list_packages(&self, page: &PageRequest) -> Result<Vec<Package>> {
        let sql = format!(
            "SELECT {} FROM packages
             WHERE ?1 IS NULL OR name LIKE '%' || ?1 || '%'
             ORDER BY name ASC
             LIMIT ?2 OFFSET ?3",
            PACKAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let packages = stmt
            .query_map(
                params![page.search_term(), page.limit, page.offset],
                row_to_package,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(packages)
    }

    pub fn count_packages(&self, search: Option<&str>) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM packages WHERE ?1 IS NULL OR name LIKE '%' || ?1 || '%'",
            [search],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Messages across all packages, ordered by package then message name
    pub fn list_messages(&self, page: &PageRequest) -> Result<Vec<MessageSummary>> {
        let sql = "SELECT m.id, m.package_id, m.name, m.latest_version_id, m.body,
                          m.created_at, m.updated_at, p.name
                   FROM messages m
                   JOIN packages p ON p.id = m.package_id
                   WHERE ?1 IS NULL OR m.name LIKE '%' || ?1 || '%'
                   ORDER BY p.name ASC, m.name ASC
                   LIMIT ?2 OFFSET ?3";
        let mut stmt = self.conn.prepare(sql)?;
        let messages = stmt
            .query_map(params![page.search_term(), page.limit, page.offset], |row| {
                Ok(MessageSummary {
                    message: row_to_message(row)?,
                    package_name: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn count_messages(&self, search: Option<&str>) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE ?1 IS NULL OR name LIKE '%' || ?1 || '%'",
            [search],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_messages_by_package(&self, package_id: Id) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE package_id = ?1",
            [package_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_package(row: &Row) -> rusqlite::Result<Package> {
    Ok(Package {
        id: row.get(0)?,
        name: row.get(1)?,
        latest_version_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_package_version(row: &Row) -> rusqlite::Result<PackageVersion> {
    Ok(PackageVersion {
        id: row.get(0)?,
        package_id: row.get(1)?,
        version: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_file(row: &Row) -> rusqlite::Result<PackageVersionFile> {
    Ok(PackageVersionFile {
        id: row.get(0)?,
        package_version_id: row.get(1)?,
        file_name: row.get(2)?,
        contents: row.get(3)?,
        checksum: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        package_id: row.get(1)?,
        name: row.get(2)?,
        latest_version_id: row.get(3)?,
        body: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_message_version(row: &Row) -> rusqlite::Result<MessageVersion> {
    Ok(MessageVersion {
        id: row.get(0)?,
        message_id: row.get(1)?,
        package_version_id: row.get(2)?,
        version: row.get(3)?,
        body: row.get(4)?,
        serialized_schema: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
