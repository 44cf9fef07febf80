//! Protobuf Schema Registry
//!
//! A versioned registry for `.proto` packages that refuses backward
//! incompatible changes.
//!
//! ## Features
//!
//! - **Atomic Publishing**: Every package in a request gets a new version, or none does
//! - **Compatibility Checking**: Fields are joined by number; removals, renames,
//!   type and cardinality changes, and removed messages are rejected
//! - **Immutable Versions**: Files are captured verbatim with SHA256 checksums
//! - **Per-Message History**: Each message keeps its own version counter
//!
//! ## Architecture
//!
//! ```text
//! packages ──< package_versions ──< package_version_files
//!    │                 │
//!    └──< messages ──< message_versions
//! ```
//!
//! A publish compiles the submitted files ([`compiler`]), compares each
//! message with its latest stored version ([`compatibility`]), and records
//! new versions through [`store::VersionedRegistry`] in one transaction.

pub mod api;
pub mod checksum;
pub mod compatibility;
pub mod compiler;
pub mod config;
pub mod discover;
pub mod error;
pub mod model;
pub mod registry;
pub mod schema;
pub mod store;

pub use api::{
    GetPackageVersionResponse, PackageFiles, ProtoFile, UploadPackageVersionRequest,
    UploadPackageVersionResponse, ValidatePackageVersionRequest, ValidatePackageVersionResponse,
};
pub use checksum::Checksum;
pub use compatibility::{check_message, check_message_set, Incompatibility, MessageViolation};
pub use compiler::{ProtoCompiler, SchemaCompiler};
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use model::{Page, PageRequest};
pub use registry::{CancelToken, SchemaRegistry};
pub use schema::{Cardinality, FieldKind, SchemaField, SchemaMessage, SourceFile};
pub use store::Store;
