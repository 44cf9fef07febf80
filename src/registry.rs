//! Schema Registry
//!
//! Publishes packages of `.proto` files as numbered, immutable versions.
//! A publish compiles every file of the request, checks each declared
//! message against the latest stored version of the same message, and
//! records one new version per package, all inside a single transaction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

use crate::api::{
    GetPackageVersionResponse, PackageFiles, PackageVersionInfo, PackageVersionRef,
    UploadPackageVersionRequest, UploadPackageVersionResponse, ValidatePackageVersionRequest,
    ValidatePackageVersionResponse,
};
use crate::checksum::Checksum;
use crate::compatibility::{check_message, Incompatibility, MessageViolation};
use crate::compiler::{canonicalize, ProtoCompiler, SchemaCompiler};
use crate::error::{RegistryError, Result};
use crate::model::{
    Id, MessageSummary, MessageVersion, Package, PackageSummary, PackageVersion,
    PackageVersionFile, Page, PageRequest,
};
use crate::schema::{extract_message_body, CompiledFile, SchemaMessage, SourceFile};
use crate::store::{Store, VersionedRegistry};

/// Cooperative cancellation for an in-flight publish
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a file changed between two package versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Removed,
    Modified,
    Unchanged,
}

/// Per-file difference between two package versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub file_name: String,
    pub status: DiffStatus,
    pub insertions: usize,
    pub deletions: usize,
    /// Unified diff; empty when unchanged
    pub patch: String,
}

/// Stored file whose contents no longer match its checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumMismatch {
    pub file_name: String,
    pub expected: String,
    pub actual: String,
}

/// A message declared by the files of one package
struct DeclaredMessage {
    schema: SchemaMessage,
    body: String,
}

/// The registry service
pub struct SchemaRegistry {
    store: Store,
    compiler: Box<dyn SchemaCompiler>,
}

impl SchemaRegistry {
    /// Registry over `store` using the protobuf compiler
    pub fn open(store: Store) -> Self {
        Self::with_compiler(store, ProtoCompiler::new())
    }

    pub fn with_compiler(store: Store, compiler: impl SchemaCompiler + 'static) -> Self {
        Self {
            store,
            compiler: Box::new(compiler),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ---------------------------------------------------------------
    // Publish
    // ---------------------------------------------------------------

    /// Publish every package of the request as one atomic unit
    pub fn publish(&self, request: &UploadPackageVersionRequest) -> Result<UploadPackageVersionResponse> {
        self.publish_with_cancel(request, &CancelToken::new())
    }

    /// Publish, abandoning the transaction once `cancel` fires
    pub fn publish_with_cancel(
        &self,
        request: &UploadPackageVersionRequest,
        cancel: &CancelToken,
    ) -> Result<UploadPackageVersionResponse> {
        let result = self.publish_packages(&request.packages, cancel);
        match &result {
            Ok(response) => tracing::info!(
                packages = response.package_versions.len(),
                "publish committed"
            ),
            Err(e) => tracing::warn!(error = %e, "publish rejected"),
        }
        result
    }

    fn publish_packages(
        &self,
        packages: &[PackageFiles],
        cancel: &CancelToken,
    ) -> Result<UploadPackageVersionResponse> {
        let compiled = self.compile(packages)?;

        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;
        let mut package_versions = Vec::with_capacity(packages.len());

        {
            let registry = VersionedRegistry::new(&tx);
            for package in packages {
                if cancel.is_cancelled() {
                    return Err(RegistryError::Cancelled);
                }

                let declared = declared_messages(package, &compiled)?;
                check_against_latest(&registry, &package.package_name, &declared)?;
                ensure_no_removed_messages(&registry, &package.package_name, &declared)?;

                let row = registry.upsert_package(&package.package_name)?;
                let version = registry.record_package_version(row.id, &package.source_files())?;

                for message in &declared {
                    let serialized = message.schema.serialize()?;
                    let message_row = registry.upsert_message(row.id, &message.schema.name, &message.body)?;
                    let message_version = registry.record_message_version(
                        message_row.id,
                        version.id,
                        &message.body,
                        &serialized,
                    )?;
                    tracing::debug!(
                        message = %message.schema.full_name,
                        version = message_version.version,
                        "recorded message version"
                    );
                }

                tracing::info!(
                    package = %package.package_name,
                    version = version.version,
                    messages = declared.len(),
                    "recorded package version"
                );
                package_versions.push(PackageVersionInfo::from(version));
            }
        }

        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }
        tx.commit()?;

        Ok(UploadPackageVersionResponse { package_versions })
    }

    /// Dry-run a publish against the committed state; never fails
    pub fn validate(&self, request: &ValidatePackageVersionRequest) -> ValidatePackageVersionResponse {
        match self.validate_packages(&request.packages) {
            Ok(()) => ValidatePackageVersionResponse::valid(),
            Err(e) => {
                tracing::debug!(error = %e, "validation failed");
                ValidatePackageVersionResponse::invalid(e)
            }
        }
    }

    fn validate_packages(&self, packages: &[PackageFiles]) -> Result<()> {
        let compiled = self.compile(packages)?;
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        for package in packages {
            let declared = declared_messages(package, &compiled)?;
            check_against_latest(&registry, &package.package_name, &declared)?;
        }
        Ok(())
    }

    /// Compile all files of all packages as one batch, keyed by file name
    fn compile(&self, packages: &[PackageFiles]) -> Result<HashMap<String, CompiledFile>> {
        let sources: Vec<SourceFile> = packages.iter().flat_map(|p| p.source_files()).collect();
        let compiled = canonicalize(self.compiler.as_ref(), &sources)?;
        Ok(compiled
            .into_iter()
            .map(|file| (file.file_name.clone(), file))
            .collect())
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Files of one package version, verbatim
    pub fn get_package_version(&self, package_name: &str, version: i64) -> Result<GetPackageVersionResponse> {
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        let package_version = resolve_version(&registry, package_name, version)?;
        let files = registry
            .list_package_version_files(package_version.id)?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(GetPackageVersionResponse {
            package_version: PackageVersionRef {
                id: package_version.id,
                version: package_version.version,
            },
            files,
        })
    }

    pub fn find_package(&self, package_name: &str) -> Result<Package> {
        let conn = self.store.connect()?;
        find_package(&VersionedRegistry::new(&conn), package_name)
    }

    pub fn list_packages(&self, page: &PageRequest) -> Result<Page<PackageSummary>> {
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        let items = registry
            .list_packages(page)?
            .into_iter()
            .map(|package| {
                let message_count = registry.count_messages_by_package(package.id)?;
                Ok(PackageSummary {
                    package,
                    message_count,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let total = registry.count_packages(page.search_term())?;

        Ok(Page { items, total })
    }

    pub fn list_messages(&self, page: &PageRequest) -> Result<Page<MessageSummary>> {
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        let items = registry.list_messages(page)?;
        let total = registry.count_messages(page.search_term())?;
        Ok(Page { items, total })
    }

    pub fn list_package_versions(&self, package_name: &str) -> Result<Vec<PackageVersion>> {
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        let package = find_package(&registry, package_name)?;
        registry.list_package_versions(package.id)
    }

    pub fn list_message_versions(&self, package_name: &str, message_name: &str) -> Result<Vec<MessageVersion>> {
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        let package = find_package(&registry, package_name)?;
        let message = registry
            .find_message(package.id, message_name)?
            .ok_or_else(|| RegistryError::not_found("message", format!("{}.{}", package_name, message_name)))?;
        registry.list_message_versions(message.id)
    }

    pub fn package_version_files(&self, package_version_id: Id) -> Result<Vec<PackageVersionFile>> {
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        registry.get_package_version(package_version_id)?;
        registry.list_package_version_files(package_version_id)
    }

    // ---------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------

    /// Delete a package version by id and repoint latest versions
    pub fn delete_package_version(&self, package_version_id: Id) -> Result<()> {
        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;
        VersionedRegistry::new(&tx).delete_package_version(package_version_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a package version by package name and version number
    pub fn delete_package_version_by_number(&self, package_name: &str, version: i64) -> Result<()> {
        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;
        {
            let registry = VersionedRegistry::new(&tx);
            let package_version = resolve_version(&registry, package_name, version)?;
            registry.delete_package_version(package_version.id)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Compare the files of two versions of a package
    pub fn diff_package_versions(&self, package_name: &str, from: i64, to: i64) -> Result<Vec<FileDiff>> {
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        let old = registry.list_package_version_files(resolve_version(&registry, package_name, from)?.id)?;
        let new = registry.list_package_version_files(resolve_version(&registry, package_name, to)?.id)?;

        let new_by_name: HashMap<&str, &PackageVersionFile> =
            new.iter().map(|f| (f.file_name.as_str(), f)).collect();
        let old_names: HashSet<&str> = old.iter().map(|f| f.file_name.as_str()).collect();

        let mut diffs = Vec::new();
        for file in &old {
            let diff = match new_by_name.get(file.file_name.as_str()) {
                Some(current) => file_diff(&file.file_name, &file.contents, &current.contents),
                None => FileDiff {
                    status: DiffStatus::Removed,
                    ..file_diff(&file.file_name, &file.contents, "")
                },
            };
            diffs.push(diff);
        }
        for file in new.iter().filter(|f| !old_names.contains(f.file_name.as_str())) {
            diffs.push(FileDiff {
                status: DiffStatus::Added,
                ..file_diff(&file.file_name, "", &file.contents)
            });
        }

        Ok(diffs)
    }

    /// Recompute checksums of a stored version; returns the files that differ
    pub fn verify_package_version(&self, package_name: &str, version: i64) -> Result<Vec<ChecksumMismatch>> {
        let conn = self.store.connect()?;
        let registry = VersionedRegistry::new(&conn);

        let package_version = resolve_version(&registry, package_name, version)?;
        let mismatches: Vec<_> = registry
            .list_package_version_files(package_version.id)?
            .into_iter()
            .filter_map(|file| {
                let expected = Checksum::from(file.checksum);
                (!expected.verify(&file.contents)).then(|| ChecksumMismatch {
                    actual: Checksum::of_contents(&file.contents).to_string(),
                    expected: expected.to_string(),
                    file_name: file.file_name,
                })
            })
            .collect();

        if !mismatches.is_empty() {
            tracing::warn!(
                package = package_name,
                version,
                files = mismatches.len(),
                "stored files fail checksum verification"
            );
        }
        Ok(mismatches)
    }
}

fn find_package(registry: &VersionedRegistry, package_name: &str) -> Result<Package> {
    registry
        .find_package(package_name)?
        .ok_or_else(|| RegistryError::not_found("package", package_name))
}

fn resolve_version(registry: &VersionedRegistry, package_name: &str, version: i64) -> Result<PackageVersion> {
    let package = find_package(registry, package_name)?;
    registry
        .find_package_version(package.id, version)?
        .ok_or_else(|| RegistryError::not_found("package version", format!("{} v{}", package_name, version)))
}

/// Messages declared across a package's files, with their source bodies.
///
/// Every file must declare the requested package.
fn declared_messages(
    package: &PackageFiles,
    compiled: &HashMap<String, CompiledFile>,
) -> Result<Vec<DeclaredMessage>> {
    let mut declared = Vec::new();
    for file in &package.files {
        let compiled_file = compiled.get(&file.file_name).ok_or_else(|| RegistryError::Parse {
            file: file.file_name.clone(),
            message: "file missing from compiled output".to_string(),
        })?;

        if compiled_file.package != package.package_name {
            return Err(RegistryError::PackageNameMismatch {
                file: file.file_name.clone(),
                declared: compiled_file.package.clone(),
                requested: package.package_name.clone(),
            });
        }

        for message in &compiled_file.messages {
            let body = extract_message_body(&file.file_contents, &message.name)?;
            declared.push(DeclaredMessage {
                schema: message.clone(),
                body,
            });
        }
    }
    Ok(declared)
}

/// Check each declared message against the latest stored version of the
/// message with the same name, if any
fn check_against_latest(
    registry: &VersionedRegistry,
    package_name: &str,
    declared: &[DeclaredMessage],
) -> Result<()> {
    let Some(package) = registry.find_package(package_name)? else {
        return Ok(());
    };

    for message in declared {
        let Some(row) = registry.find_message(package.id, &message.schema.name)? else {
            continue;
        };
        let Some(latest) = registry.latest_message_version(&row)? else {
            continue;
        };

        let previous = SchemaMessage::deserialize(&latest.serialized_schema).map_err(|source| {
            RegistryError::CorruptSchema {
                message: message.schema.full_name.clone(),
                version: latest.version,
                source,
            }
        })?;

        tracing::debug!(
            message = %message.schema.full_name,
            baseline = latest.version,
            "checking compatibility"
        );
        check_message(&previous, &message.schema).map_err(|violation| RegistryError::Incompatible {
            package: package_name.to_string(),
            violation: MessageViolation {
                message: message.schema.full_name.clone(),
                violation,
            },
        })?;
    }
    Ok(())
}

/// Every message with a live version must still be declared
fn ensure_no_removed_messages(
    registry: &VersionedRegistry,
    package_name: &str,
    declared: &[DeclaredMessage],
) -> Result<()> {
    let Some(package) = registry.find_package(package_name)? else {
        return Ok(());
    };

    let names: HashSet<&str> = declared.iter().map(|m| m.schema.name.as_str()).collect();
    let removed = registry
        .messages_for_package(package.id)?
        .into_iter()
        .find(|m| m.latest_version_id.is_some() && !names.contains(m.name.as_str()));

    match removed {
        Some(message) => {
            let full_name = qualified_name(package_name, &message.name);
            Err(RegistryError::Incompatible {
                package: package_name.to_string(),
                violation: MessageViolation {
                    message: full_name.clone(),
                    violation: Incompatibility::MessageRemoved { message: full_name },
                },
            })
        }
        None => Ok(()),
    }
}

fn qualified_name(package_name: &str, message_name: &str) -> String {
    if package_name.is_empty() {
        message_name.to_string()
    } else {
        format!("{}.{}", package_name, message_name)
    }
}

fn file_diff(file_name: &str, old: &str, new: &str) -> FileDiff {
    let diff = TextDiff::from_lines(old, new);

    let mut insertions = 0;
    let mut deletions = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => insertions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }

    let (status, patch) = if insertions == 0 && deletions == 0 {
        (DiffStatus::Unchanged, String::new())
    } else {
        let patch = diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{}", file_name), &format!("b/{}", file_name))
            .to_string();
        (DiffStatus::Modified, patch)
    };

    FileDiff {
        file_name: file_name.to_string(),
        status,
        insertions,
        deletions,
        patch,
    }
}
