//! Request and response types of the registry service
//!
//! Field names serialize in camelCase to match the wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Id, PackageVersion, PackageVersionFile};
use crate::schema::SourceFile;

/// A schema file as submitted by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoFile {
    pub file_name: String,
    pub file_contents: String,
}

impl ProtoFile {
    pub fn new(file_name: impl Into<String>, file_contents: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_contents: file_contents.into(),
        }
    }
}

impl From<&ProtoFile> for SourceFile {
    fn from(file: &ProtoFile) -> Self {
        SourceFile::new(file.file_name.clone(), file.file_contents.clone())
    }
}

/// All files of one package in a publish or validate request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageFiles {
    pub package_name: String,
    pub files: Vec<ProtoFile>,
}

impl PackageFiles {
    pub fn new(package_name: impl Into<String>, files: Vec<ProtoFile>) -> Self {
        Self {
            package_name: package_name.into(),
            files,
        }
    }

    pub(crate) fn source_files(&self) -> Vec<SourceFile> {
        self.files.iter().map(SourceFile::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPackageVersionRequest {
    pub packages: Vec<PackageFiles>,
}

/// A newly created package version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageVersionInfo {
    pub id: Id,
    pub version: i64,
    pub package_id: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PackageVersion> for PackageVersionInfo {
    fn from(version: PackageVersion) -> Self {
        Self {
            id: version.id,
            version: version.version,
            package_id: version.package_id,
            created_at: version.created_at,
            updated_at: version.updated_at,
        }
    }
}

/// One entry per requested package, in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPackageVersionResponse {
    pub package_versions: Vec<PackageVersionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePackageVersionRequest {
    pub packages: Vec<PackageFiles>,
}

impl From<UploadPackageVersionRequest> for ValidatePackageVersionRequest {
    fn from(request: UploadPackageVersionRequest) -> Self {
        Self {
            packages: request.packages,
        }
    }
}

/// Outcome of a dry-run publish; `error` is empty when valid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePackageVersionResponse {
    pub is_valid: bool,
    pub error: String,
}

impl ValidatePackageVersionResponse {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error: String::new(),
        }
    }

    pub fn invalid(error: impl ToString) -> Self {
        Self {
            is_valid: false,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageVersionRef {
    pub id: Id,
    pub version: i64,
}

/// A stored file as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProtoFile {
    pub id: Id,
    pub file_name: String,
    pub proto_contents: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PackageVersionFile> for StoredProtoFile {
    fn from(file: PackageVersionFile) -> Self {
        Self {
            id: file.id,
            file_name: file.file_name,
            proto_contents: file.contents,
            checksum: file.checksum,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPackageVersionResponse {
    pub package_version: PackageVersionRef,
    pub files: Vec<StoredProtoFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_uses_camel_case() {
        let request = UploadPackageVersionRequest {
            packages: vec![PackageFiles::new(
                "greet",
                vec![ProtoFile::new("greet.proto", "package greet;")],
            )],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["packages"][0]["packageName"], "greet");
        assert_eq!(json["packages"][0]["files"][0]["fileName"], "greet.proto");
        assert_eq!(json["packages"][0]["files"][0]["fileContents"], "package greet;");
    }

    #[test]
    fn test_request_parses_from_wire_json() {
        let json = r#"{"packages":[{"packageName":"greet","files":[{"fileName":"a.proto","fileContents":"x"}]}]}"#;
        let request: UploadPackageVersionRequest = serde_json::from_str(json).unwrap();
        let sources = request.packages[0].source_files();
        assert_eq!(sources, vec![SourceFile::new("a.proto", "x")]);
    }

    #[test]
    fn test_validate_response_shapes() {
        let ok = serde_json::to_value(ValidatePackageVersionResponse::valid()).unwrap();
        assert_eq!(ok["isValid"], true);
        assert_eq!(ok["error"], "");

        let bad = ValidatePackageVersionResponse::invalid("field removed");
        assert!(!bad.is_valid);
        assert_eq!(bad.error, "field removed");
    }
}
