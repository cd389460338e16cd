//! Message schemas for the extension's inter-process boundary.
//!
//! Messages arrive as JSON objects of the shape `{"type": ..., "data": {...}}`.
//! A schema lists the known message types and the fields each one's `data`
//! must carry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// JSON kind a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Object,
    Array,
}

/// One field of a message's `data` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldRule {
    #[must_use]
    pub fn required(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }
}

/// Known message types and their payload rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub types: BTreeMap<String, Vec<FieldRule>>,
}

impl MessageSchema {
    /// Adds a message type with its payload rules.
    #[must_use]
    pub fn with_type(mut self, name: &str, rules: Vec<FieldRule>) -> Self {
        self.types.insert(name.to_string(), rules);
        self
    }

    /// The messages exchanged between the extension's content script,
    /// background worker, and popup.
    #[must_use]
    pub fn extension() -> Self {
        use FieldKind as K;

        Self::default()
            .with_type(
                "START_MONITORING",
                vec![
                    FieldRule::required("pupilId", K::String),
                    FieldRule::optional("testCentre", K::String),
                ],
            )
            .with_type("STOP_MONITORING", vec![])
            .with_type(
                "SLOT_FOUND",
                vec![
                    FieldRule::required("date", K::String),
                    FieldRule::required("time", K::String),
                    FieldRule::required("testCentre", K::String),
                ],
            )
            .with_type(
                "CONFIRM_BOOKING",
                vec![
                    FieldRule::required("confirmationId", K::String),
                    FieldRule::required("confirmed", K::Bool),
                ],
            )
            .with_type("GET_STATUS", vec![])
            .with_type(
                "UPDATE_SETTINGS",
                vec![FieldRule::required("settings", K::Object)],
            )
    }
}
