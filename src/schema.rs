//! Structural schema descriptors
//!
//! The compiler turns raw `.proto` source into these plain records once;
//! everything downstream (compatibility checks, persistence) works on them
//! and never touches the compiler's descriptor graph.

use std::fmt;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// A named schema source file, captured verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub file_name: String,
    pub contents: String,
}

impl SourceFile {
    pub fn new(file_name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            contents: contents.into(),
        }
    }
}

/// How many values a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Implicit presence (proto3 field without a label)
    Singular,
    /// Explicit presence (`optional`)
    Optional,
    /// proto2 `required`
    Required,
    Repeated,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Cardinality::Singular => "singular",
            Cardinality::Optional => "optional",
            Cardinality::Required => "required",
            Cardinality::Repeated => "repeated",
        };
        f.write_str(label)
    }
}

/// The type of a field.
///
/// Message-typed fields are compared by the referenced message's fully
/// qualified name, never by its shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Scalar type tag such as `string`, `int32` or `enum`
    Scalar(String),
    /// Fully qualified name of the referenced message type
    Message(String),
}

impl FieldKind {
    pub fn scalar(tag: impl Into<String>) -> Self {
        FieldKind::Scalar(tag.into())
    }

    pub fn message(full_name: impl Into<String>) -> Self {
        FieldKind::Message(full_name.into())
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar(tag) => f.write_str(tag),
            FieldKind::Message(name) => f.write_str(name),
        }
    }
}

/// One field of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub name: String,
    pub full_name: String,
    pub number: u32,
    pub kind: FieldKind,
    pub cardinality: Cardinality,
}

/// Structural description of one message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaMessage {
    pub name: String,
    pub full_name: String,
    /// Fields in declaration order
    pub fields: Vec<SchemaField>,
}

impl SchemaMessage {
    /// Find the field carrying a field number
    pub fn field_by_number(&self, number: u32) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.number == number)
    }

    /// Encode into the persisted comparison baseline
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a persisted baseline, failing on malformed input
    pub fn deserialize(encoded: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(encoded)
    }

    /// Decode a persisted baseline, yielding an empty description on
    /// malformed input.
    ///
    /// An empty baseline makes every later version look compatible, so the
    /// publish path uses [`SchemaMessage::deserialize`] instead.
    pub fn deserialize_lenient(encoded: &str) -> Self {
        match Self::deserialize(encoded) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable message schema");
                Self::default()
            }
        }
    }
}

/// Find a message by fully qualified name
pub fn message_by_full_name<'a>(
    messages: &'a [SchemaMessage],
    full_name: &str,
) -> Option<&'a SchemaMessage> {
    messages.iter().find(|m| m.full_name == full_name)
}

/// A compiled source file: its declared package and top-level messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFile {
    pub file_name: String,
    pub package: String,
    pub messages: Vec<SchemaMessage>,
}

/// Extract the literal source text of `message <name> { ... }`.
///
/// Braces are balanced, so nested messages and enums stay inside the
/// returned span. Comments and string literals are skipped both when
/// locating the definition and when counting braces.
pub fn extract_message_body(source: &str, message_name: &str) -> Result<String> {
    let pattern = format!(r"\bmessage\s+{}\s*\{{", regex::escape(message_name));
    let re = Regex::new(&pattern).map_err(|e| RegistryError::Parse {
        file: message_name.to_string(),
        message: e.to_string(),
    })?;

    let code = mask_comments_and_strings(source.as_bytes());
    let not_found = || RegistryError::not_found("message definition", message_name);
    let start = re.find(&code).ok_or_else(not_found)?;

    let mut depth = 0usize;
    for (offset, byte) in code[start.end() - 1..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start.end() + offset;
                    return Ok(source[start.start()..end].to_string());
                }
            }
            _ => {}
        }
    }

    Err(not_found())
}

/// Copy of `source` with comments and quoted strings blanked to spaces.
///
/// Byte offsets and newlines are preserved, so positions found in the copy
/// index the original text.
fn mask_comments_and_strings(source: &[u8]) -> Vec<u8> {
    #[derive(Clone, Copy)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Quoted(u8),
    }

    let mut out = source.to_vec();
    let mut state = State::Code;
    let mut i = 0;
    while i < source.len() {
        let byte = source[i];
        let next = source.get(i + 1).copied();
        match state {
            State::Code => match (byte, next) {
                (b'/', Some(b'/')) => {
                    state = State::LineComment;
                    out[i] = b' ';
                }
                (b'/', Some(b'*')) => {
                    state = State::BlockComment;
                    out[i] = b' ';
                    out[i + 1] = b' ';
                    i += 1;
                }
                (b'"' | b'\'', _) => {
                    state = State::Quoted(byte);
                    out[i] = b' ';
                }
                _ => {}
            },
            State::LineComment => {
                if byte == b'\n' {
                    state = State::Code;
                } else {
                    out[i] = b' ';
                }
            }
            State::BlockComment => {
                if byte != b'\n' {
                    out[i] = b' ';
                }
                if byte == b'*' && next == Some(b'/') {
                    out[i + 1] = b' ';
                    i += 1;
                    state = State::Code;
                }
            }
            State::Quoted(quote) => {
                if byte != b'\n' {
                    out[i] = b' ';
                }
                if byte == b'\\' && next.is_some_and(|n| n != b'\n') {
                    out[i + 1] = b' ';
                    i += 1;
                } else if byte == quote || byte == b'\n' {
                    state = State::Code;
                }
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting() -> SchemaMessage {
        SchemaMessage {
            name: "Greeting".to_string(),
            full_name: "greet.Greeting".to_string(),
            fields: vec![SchemaField {
                name: "text".to_string(),
                full_name: "greet.Greeting.text".to_string(),
                number: 1,
                kind: FieldKind::scalar("string"),
                cardinality: Cardinality::Singular,
            }],
        }
    }

    #[test]
    fn test_extract_message_body() {
        let content = "
	syntax = \"proto3\";

	package helloworld;

	message GreetingRequest {
		string message = 1;
	}

	message GreetingResponse {
		string message = 1;
	}
	";

        let body = extract_message_body(content, "GreetingRequest").unwrap();
        assert_eq!(body, "message GreetingRequest {\n\t\tstring message = 1;\n\t}");
    }

    #[test]
    fn test_extract_message_body_keeps_nested_blocks() {
        let content = r#"
syntax = "proto3";
package shop;

message Order {
  message Line {
    string sku = 1;
  }
  repeated Line lines = 1;
}

message OrderAck {}
"#;

        let body = extract_message_body(content, "Order").unwrap();
        assert!(body.starts_with("message Order {"));
        assert!(body.contains("message Line {"));
        assert!(body.ends_with("repeated Line lines = 1;\n}"));
        assert!(!body.contains("OrderAck"));
    }

    #[test]
    fn test_extract_message_body_does_not_match_prefix() {
        let content = "message OrderAck {}\nmessage Order { string id = 1; }";
        let body = extract_message_body(content, "Order").unwrap();
        assert_eq!(body, "message Order { string id = 1; }");
    }

    #[test]
    fn test_extract_message_body_not_found() {
        let content = "syntax = \"proto3\";\n\npackage helloworld;\n";
        let err = extract_message_body(content, "GreetingRequest").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_extract_message_body_skips_commented_definition() {
        let content = "package greet;\n// TODO: message Greeting { was split\nmessage Greeting { string text = 1; }\n";
        let body = extract_message_body(content, "Greeting").unwrap();
        assert_eq!(body, "message Greeting { string text = 1; }");

        let content = "/* message Greeting {\n   old draft */\nmessage Greeting { string text = 1; }\n";
        let body = extract_message_body(content, "Greeting").unwrap();
        assert_eq!(body, "message Greeting { string text = 1; }");
    }

    #[test]
    fn test_extract_message_body_ignores_braces_in_comments_and_strings() {
        let content = "message Greeting {\n  // closing } brace\n  string text = 1; /* { */\n  string lang = 2 [default = \"}\"];\n}\n";
        let body = extract_message_body(content, "Greeting").unwrap();
        assert_eq!(body, content.trim_end());
    }

    #[test]
    fn test_extract_message_body_only_in_comment_is_not_found() {
        let content = "// message Greeting { string text = 1; }\nmessage Other { string x = 1; }\n";
        let err = extract_message_body(content, "Greeting").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_mask_preserves_offsets_and_newlines() {
        let source = "a // b\n\"c\" /* d\n*/ e";
        let masked = mask_comments_and_strings(source.as_bytes());
        assert_eq!(masked.len(), source.len());
        assert_eq!(masked, b"a     \n        \n   e".to_vec());
    }

    #[test]
    fn test_serialized_form_is_reparseable() {
        let message = greeting();
        let encoded = message.serialize().unwrap();
        assert_eq!(SchemaMessage::deserialize(&encoded).unwrap(), message);
    }

    #[test]
    fn test_lenient_deserialize_yields_empty_message() {
        assert!(SchemaMessage::deserialize("{not json").is_err());
        assert_eq!(
            SchemaMessage::deserialize_lenient("{not json"),
            SchemaMessage::default()
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FieldKind::scalar("int32").to_string(), "int32");
        assert_eq!(FieldKind::message("greet.Address").to_string(), "greet.Address");
        assert_eq!(Cardinality::Repeated.to_string(), "repeated");
    }
}
