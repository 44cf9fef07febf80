//! Local schema tree discovery
//!
//! Finds `.proto` files under a directory and groups them into one upload
//! entry per declared package. File names are paths relative to the root,
//! with `/` separators, so imports between them resolve as written.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::api::{PackageFiles, ProtoFile, UploadPackageVersionRequest};
use crate::compiler::{canonicalize, SchemaCompiler};
use crate::error::{RegistryError, Result};
use crate::schema::{CompiledFile, SourceFile};

/// All files under `root` with the given extension, sorted
pub fn find_proto_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == extension) {
            paths.push(path.to_path_buf());
        }
    }

    if paths.is_empty() {
        return Err(RegistryError::Discovery(format!(
            "no .{} files found in {}",
            extension,
            root.display()
        )));
    }

    paths.sort();
    Ok(paths)
}

/// Read files, naming each by its path relative to `root`
pub fn read_sources(root: &Path, paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    paths
        .iter()
        .map(|path| {
            let contents = fs::read_to_string(path)?;
            Ok(SourceFile::new(relative_name(root, path), contents))
        })
        .collect()
}

fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_dir(file_name: &str) -> &str {
    file_name.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Reject a package whose files live in more than one directory
pub fn ensure_packages_in_same_directory(compiled: &[CompiledFile]) -> Result<()> {
    let mut directories: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
    for file in compiled {
        let dir = parent_dir(&file.file_name);
        match directories.get(file.package.as_str()) {
            Some((first_dir, first_file)) if *first_dir != dir => {
                return Err(RegistryError::Discovery(format!(
                    "{} declares package '{}' like {} but is in a different directory",
                    file.file_name, file.package, first_file
                )));
            }
            Some(_) => {}
            None => {
                directories.insert(&file.package, (dir, &file.file_name));
            }
        }
    }
    Ok(())
}

/// One entry per declared package, ordered by package name
pub fn group_by_package(compiled: &[CompiledFile], sources: &[SourceFile]) -> Vec<PackageFiles> {
    let contents: BTreeMap<&str, &str> = sources
        .iter()
        .map(|s| (s.file_name.as_str(), s.contents.as_str()))
        .collect();

    let mut packages: BTreeMap<&str, Vec<ProtoFile>> = BTreeMap::new();
    for file in compiled {
        let text = contents.get(file.file_name.as_str()).copied().unwrap_or_default();
        packages
            .entry(&file.package)
            .or_default()
            .push(ProtoFile::new(file.file_name.clone(), text));
    }

    packages
        .into_iter()
        .map(|(name, files)| PackageFiles::new(name, files))
        .collect()
}

/// Discover, compile and group a schema tree into an upload request
pub fn load_request(
    compiler: &dyn SchemaCompiler,
    root: &Path,
    extension: &str,
) -> Result<UploadPackageVersionRequest> {
    let paths = find_proto_files(root, extension)?;
    let sources = read_sources(root, &paths)?;
    let compiled = canonicalize(compiler, &sources)?;
    ensure_packages_in_same_directory(&compiled)?;

    let packages = group_by_package(&compiled, &sources);
    tracing::debug!(
        root = %root.display(),
        files = sources.len(),
        packages = packages.len(),
        "discovered schema tree"
    );
    Ok(UploadPackageVersionRequest { packages })
}

/// Discover and compile a schema tree without grouping
pub fn compile_tree(compiler: &dyn SchemaCompiler, root: &Path, extension: &str) -> Result<Vec<CompiledFile>> {
    let paths = find_proto_files(root, extension)?;
    let sources = read_sources(root, &paths)?;
    canonicalize(compiler, &sources)
}
