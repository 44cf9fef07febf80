//! Backward-compatibility checking
//!
//! Fields are joined across versions by field number. A previous field must
//! survive with the same fully qualified name, kind and cardinality; new
//! fields and new messages are always allowed. Checking stops at the first
//! violation, in the previous version's declaration order.
//!
//! When the field now holding a number carries the name of a *different*
//! previous field, that field was moved onto the number and the original
//! occupant is reported as removed rather than renamed.

use serde::Serialize;
use thiserror::Error;

use crate::schema::{message_by_full_name, Cardinality, FieldKind, SchemaMessage};

/// A single breaking change
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Incompatibility {
    #[error("field '{field}' was removed")]
    FieldRemoved { field: String },

    #[error("field '{from}' was renamed to '{to}'")]
    FieldRenamed { from: String, to: String },

    #[error("field '{field}' changed type from {from} to {to}")]
    TypeChanged {
        field: String,
        from: FieldKind,
        to: FieldKind,
    },

    #[error("field '{field}' changed cardinality from {from} to {to}")]
    CardinalityChanged {
        field: String,
        from: Cardinality,
        to: Cardinality,
    },

    #[error("message '{message}' was removed")]
    MessageRemoved { message: String },
}

impl Incompatibility {
    /// Name of the offending field, if the violation is field-level
    pub fn field(&self) -> Option<&str> {
        match self {
            Incompatibility::FieldRemoved { field }
            | Incompatibility::TypeChanged { field, .. }
            | Incompatibility::CardinalityChanged { field, .. } => Some(field),
            Incompatibility::FieldRenamed { from, .. } => Some(from),
            Incompatibility::MessageRemoved { .. } => None,
        }
    }
}

/// A breaking change located in a named message
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("message {message}: {violation}")]
pub struct MessageViolation {
    pub message: String,
    pub violation: Incompatibility,
}

/// Check that `latest` can read everything `previous` could describe
pub fn check_message(previous: &SchemaMessage, latest: &SchemaMessage) -> Result<(), Incompatibility> {
    for prev_field in &previous.fields {
        let Some(latest_field) = latest.field_by_number(prev_field.number) else {
            return Err(Incompatibility::FieldRemoved {
                field: prev_field.name.clone(),
            });
        };

        if prev_field.full_name != latest_field.full_name {
            let moved_from_elsewhere = previous
                .fields
                .iter()
                .any(|f| f.number != prev_field.number && f.full_name == latest_field.full_name);
            if moved_from_elsewhere {
                return Err(Incompatibility::FieldRemoved {
                    field: prev_field.name.clone(),
                });
            }
            return Err(Incompatibility::FieldRenamed {
                from: prev_field.name.clone(),
                to: latest_field.name.clone(),
            });
        }

        if prev_field.kind != latest_field.kind {
            return Err(Incompatibility::TypeChanged {
                field: prev_field.name.clone(),
                from: prev_field.kind.clone(),
                to: latest_field.kind.clone(),
            });
        }

        if prev_field.cardinality != latest_field.cardinality {
            return Err(Incompatibility::CardinalityChanged {
                field: prev_field.name.clone(),
                from: prev_field.cardinality,
                to: latest_field.cardinality,
            });
        }
    }

    Ok(())
}

/// Check every previous message against its counterpart by full name
pub fn check_message_set(
    previous: &[SchemaMessage],
    latest: &[SchemaMessage],
) -> Result<(), MessageViolation> {
    for prev_message in previous {
        let Some(latest_message) = message_by_full_name(latest, &prev_message.full_name) else {
            return Err(MessageViolation {
                message: prev_message.full_name.clone(),
                violation: Incompatibility::MessageRemoved {
                    message: prev_message.full_name.clone(),
                },
            });
        };

        check_message(prev_message, latest_message).map_err(|violation| MessageViolation {
            message: prev_message.full_name.clone(),
            violation,
        })?;
    }

    Ok(())
}
