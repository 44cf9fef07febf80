//! Schema compilation
//!
//! Compiles a batch of in-memory `.proto` sources into [`CompiledFile`]s.
//! Imports resolve against the other files of the same batch first, then
//! against the well-known `google/protobuf/*` files.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use prost_reflect::{Cardinality as ReflectCardinality, FieldDescriptor, FileDescriptor, Kind, MessageDescriptor};
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};
use protox::Compiler;

use crate::error::{RegistryError, Result};
use crate::schema::{Cardinality, CompiledFile, FieldKind, SchemaField, SchemaMessage, SourceFile};

/// Turns raw schema sources into structural descriptions.
///
/// Implementations must return one [`CompiledFile`] per input, in input order.
pub trait SchemaCompiler: Send + Sync {
    fn compile(&self, sources: &[SourceFile]) -> Result<Vec<CompiledFile>>;
}

/// Reject a batch in which two files share a name
pub fn ensure_unique_file_names(sources: &[SourceFile]) -> Result<()> {
    let mut seen = HashSet::new();
    for source in sources {
        if !seen.insert(source.file_name.as_str()) {
            return Err(RegistryError::DuplicateFileName(source.file_name.clone()));
        }
    }
    Ok(())
}

/// Check file names, then compile the batch
pub fn canonicalize(compiler: &dyn SchemaCompiler, sources: &[SourceFile]) -> Result<Vec<CompiledFile>> {
    ensure_unique_file_names(sources)?;
    compiler.compile(sources)
}

/// Protobuf compiler backed by `protox`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoCompiler;

impl ProtoCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl SchemaCompiler for ProtoCompiler {
    fn compile(&self, sources: &[SourceFile]) -> Result<Vec<CompiledFile>> {
        let mut resolver = ChainFileResolver::new();
        resolver.add(BatchResolver::new(sources));
        resolver.add(GoogleFileResolver::new());

        let mut compiler = Compiler::with_file_resolver(resolver);
        compiler.include_imports(true);

        for source in sources {
            compiler
                .open_file(&source.file_name)
                .map_err(|e| RegistryError::Parse {
                    file: source.file_name.clone(),
                    message: e.to_string(),
                })?;
        }

        let pool = compiler.descriptor_pool();
        sources
            .iter()
            .map(|source| {
                let file = pool.get_file_by_name(&source.file_name).ok_or_else(|| {
                    RegistryError::Parse {
                        file: source.file_name.clone(),
                        message: "file missing from compiled output".to_string(),
                    }
                })?;
                Ok(compiled_file(&source.file_name, &file))
            })
            .collect()
    }
}

/// Serves the files of the current batch by name
struct BatchResolver {
    files: HashMap<String, String>,
}

impl BatchResolver {
    fn new(sources: &[SourceFile]) -> Self {
        Self {
            files: sources
                .iter()
                .map(|s| (s.file_name.clone(), s.contents.clone()))
                .collect(),
        }
    }
}

impl FileResolver for BatchResolver {
    fn resolve_path(&self, path: &Path) -> Option<String> {
        let name = path.to_str()?;
        self.files.contains_key(name).then(|| name.to_string())
    }

    fn open_file(&self, name: &str) -> std::result::Result<File, protox::Error> {
        match self.files.get(name) {
            Some(contents) => File::from_source(name, contents),
            None => Err(protox::Error::file_not_found(name)),
        }
    }
}

fn compiled_file(file_name: &str, file: &FileDescriptor) -> CompiledFile {
    let proto3 = file.file_descriptor_proto().syntax() == "proto3";
    CompiledFile {
        file_name: file_name.to_string(),
        package: file.package_name().to_string(),
        messages: file.messages().map(|m| schema_message(&m, proto3)).collect(),
    }
}

fn schema_message(message: &MessageDescriptor, proto3: bool) -> SchemaMessage {
    SchemaMessage {
        name: message.name().to_string(),
        full_name: message.full_name().to_string(),
        fields: message.fields().map(|f| schema_field(&f, proto3)).collect(),
    }
}

fn schema_field(field: &FieldDescriptor, proto3: bool) -> SchemaField {
    SchemaField {
        name: field.name().to_string(),
        full_name: field.full_name().to_string(),
        number: field.number(),
        kind: field_kind(&field.kind()),
        cardinality: cardinality(field, proto3),
    }
}

fn cardinality(field: &FieldDescriptor, proto3: bool) -> Cardinality {
    match field.cardinality() {
        ReflectCardinality::Repeated => Cardinality::Repeated,
        ReflectCardinality::Required => Cardinality::Required,
        ReflectCardinality::Optional => {
            if proto3 && !field.field_descriptor_proto().proto3_optional() {
                Cardinality::Singular
            } else {
                Cardinality::Optional
            }
        }
    }
}

fn field_kind(kind: &Kind) -> FieldKind {
    let tag = match kind {
        Kind::Message(message) => return FieldKind::message(message.full_name()),
        Kind::Enum(_) => "enum",
        Kind::Double => "double",
        Kind::Float => "float",
        Kind::Int32 => "int32",
        Kind::Int64 => "int64",
        Kind::Uint32 => "uint32",
        Kind::Uint64 => "uint64",
        Kind::Sint32 => "sint32",
        Kind::Sint64 => "sint64",
        Kind::Fixed32 => "fixed32",
        Kind::Fixed64 => "fixed64",
        Kind::Sfixed32 => "sfixed32",
        Kind::Sfixed64 => "sfixed64",
        Kind::Bool => "bool",
        Kind::String => "string",
        Kind::Bytes => "bytes",
    };
    FieldKind::scalar(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(sources: &[SourceFile]) -> Result<Vec<CompiledFile>> {
        canonicalize(&ProtoCompiler::new(), sources)
    }

    #[test]
    fn test_compile_single_file() {
        let source = SourceFile::new(
            "greet.proto",
            "syntax = \"proto3\";\npackage greet;\nmessage Greeting { string text = 1; }\n",
        );

        let files = compile(&[source]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "greet.proto");
        assert_eq!(files[0].package, "greet");

        let greeting = &files[0].messages[0];
        assert_eq!(greeting.name, "Greeting");
        assert_eq!(greeting.full_name, "greet.Greeting");
        assert_eq!(greeting.fields.len(), 1);
        assert_eq!(greeting.fields[0].full_name, "greet.Greeting.text");
        assert_eq!(greeting.fields[0].number, 1);
        assert_eq!(greeting.fields[0].kind, FieldKind::scalar("string"));
        assert_eq!(greeting.fields[0].cardinality, Cardinality::Singular);
    }

    #[test]
    fn test_field_kinds_and_cardinalities() {
        let source = SourceFile::new(
            "shop.proto",
            r#"
syntax = "proto3";
package shop;

enum Status {
  STATUS_UNKNOWN = 0;
  STATUS_OPEN = 1;
}

message Address {
  string street = 1;
}

message Order {
  int64 id = 1;
  optional string note = 2;
  repeated Address addresses = 3;
  Status status = 4;
  Address billing = 5;
}
"#,
        );

        let files = compile(&[source]).unwrap();
        let order = files[0]
            .messages
            .iter()
            .find(|m| m.name == "Order")
            .unwrap();

        let names: Vec<_> = order.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "note", "addresses", "status", "billing"]);

        assert_eq!(order.fields[0].cardinality, Cardinality::Singular);
        assert_eq!(order.fields[1].cardinality, Cardinality::Optional);
        assert_eq!(order.fields[2].cardinality, Cardinality::Repeated);
        assert_eq!(order.fields[2].kind, FieldKind::message("shop.Address"));
        assert_eq!(order.fields[3].kind, FieldKind::scalar("enum"));
        assert_eq!(order.fields[4].kind, FieldKind::message("shop.Address"));
    }

    #[test]
    fn test_imports_resolve_within_batch() {
        let common = SourceFile::new(
            "common.proto",
            "syntax = \"proto3\";\npackage common;\nmessage Money { int64 cents = 1; }\n",
        );
        let billing = SourceFile::new(
            "billing.proto",
            "syntax = \"proto3\";\npackage billing;\nimport \"common.proto\";\nmessage Invoice { common.Money total = 1; }\n",
        );

        let files = compile(&[billing, common]).unwrap();
        assert_eq!(files[0].file_name, "billing.proto");
        assert_eq!(files[0].package, "billing");
        assert_eq!(
            files[0].messages[0].fields[0].kind,
            FieldKind::message("common.Money")
        );
        assert_eq!(files[1].package, "common");
    }

    #[test]
    fn test_well_known_imports() {
        let source = SourceFile::new(
            "event.proto",
            "syntax = \"proto3\";\npackage events;\nimport \"google/protobuf/timestamp.proto\";\nmessage Event { google.protobuf.Timestamp at = 1; }\n",
        );

        let files = compile(&[source]).unwrap();
        assert_eq!(
            files[0].messages[0].fields[0].kind,
            FieldKind::message("google.protobuf.Timestamp")
        );
    }

    #[test]
    fn test_syntax_error_reports_file() {
        let source = SourceFile::new("broken.proto", "syntax = \"proto3\";\nmessage {\n");
        let err = compile(&[source]).unwrap_err();
        match err {
            RegistryError::Parse { file, .. } => assert_eq!(file, "broken.proto"),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_import_is_parse_error() {
        let source = SourceFile::new(
            "orphan.proto",
            "syntax = \"proto3\";\npackage orphan;\nimport \"missing.proto\";\n",
        );
        assert!(matches!(compile(&[source]), Err(RegistryError::Parse { .. })));
    }

    #[test]
    fn test_duplicate_field_numbers_is_parse_error() {
        let source = SourceFile::new(
            "dup.proto",
            "syntax = \"proto3\";\npackage dup;\nmessage M { string a = 1; string b = 1; }\n",
        );
        assert!(matches!(compile(&[source]), Err(RegistryError::Parse { .. })));
    }

    #[test]
    fn test_duplicate_file_names_rejected() {
        let a = SourceFile::new("a.proto", "syntax = \"proto3\";\npackage a;\n");
        let err = compile(&[a.clone(), a]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateFileName(name) if name == "a.proto"));
    }
}
