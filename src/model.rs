//! Persisted registry entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row id, assigned by the store
pub type Id = i64;

/// A named package; created on first publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub id: Id,
    pub name: String,
    /// Newest package version, if any remain
    pub latest_version_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One published snapshot of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageVersion {
    pub id: Id,
    pub package_id: Id,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A file captured verbatim with a package version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageVersionFile {
    pub id: Id,
    pub package_version_id: Id,
    pub file_name: String,
    pub contents: String,
    /// SHA256 of `contents` at publish time
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message tracked across versions of its package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: Id,
    pub package_id: Id,
    pub name: String,
    pub latest_version_id: Option<Id>,
    /// Source text of the most recently published definition
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One published snapshot of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageVersion {
    pub id: Id,
    pub message_id: Id,
    pub package_version_id: Id,
    pub version: i64,
    pub body: String,
    /// Structural description used as the next compatibility baseline
    pub serialized_schema: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Paging and name filtering for list accessors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: u32,
    pub offset: u32,
    /// Substring match on the name
    pub search: Option<String>,
}

impl PageRequest {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit,
            offset,
            search: None,
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Search term with empty strings treated as no filter
    pub(crate) fn search_term(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.is_empty())
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(50, 0)
    }
}

/// One page of results plus the unpaged total
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// A package with its message count, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    pub package: Package,
    pub message_count: u64,
}

/// A message with its owning package name, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub message: Message,
    pub package_name: String,
}
