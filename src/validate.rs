//! Input validation at the extension's trust boundaries.
//!
//! Pupil records are checked field by field and normalized; the first
//! violation is returned as a [`ValidationError`]. Inter-process messages
//! are checked structurally and never produce an error, only `false`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::error;

use crate::model::{FieldKind, MessageSchema, PupilRecord};

/// Longest string accepted inside a message payload.
const MAX_MESSAGE_STRING: usize = 10_000;

/// Longest accepted pupil name.
const MAX_NAME_LEN: usize = 100;

type Pattern = LazyLock<Option<Regex>>;

static NAME: Pattern = LazyLock::new(|| compile(r"^[\p{L}\s'.\-]+$"));
static LICENCE: Pattern =
    LazyLock::new(|| compile(r"^[A-Z9]{5}[0-9]{6}[A-Z9]{2}[0-9][A-Z]{2}$"));
static EMAIL: Pattern = LazyLock::new(|| compile(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"));
static UK_PHONE: Pattern =
    LazyLock::new(|| compile(r"^(?:\+44\s?|0)\d{4}\s?\d{3}\s?\d{3}$"));
static POSTCODE: Pattern =
    LazyLock::new(|| compile(r"^[A-Z]{1,2}[0-9][A-Z0-9]?\s?[0-9][A-Z]{2}$"));

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| error!(pattern, error = %e, "field pattern failed to compile"))
        .ok()
}

/// A pattern that failed to compile matches nothing, so its field is
/// always rejected.
fn matches(pattern: &Pattern, value: &str) -> bool {
    Option::as_ref(pattern).is_some_and(|re| re.is_match(value))
}

/// A field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The offending field, as named in the record.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub type Result<T> = core::result::Result<T, ValidationError>;

/// Validate and normalize a pupil record.
///
/// Every field is trimmed. Licence numbers and postcodes are upper-cased
/// before matching. Nothing else is rewritten: a field that does not match
/// is rejected, not coerced.
pub fn sanitize_pupil_data(record: &PupilRecord) -> Result<PupilRecord> {
    let name = record.name.trim();
    if name.is_empty() {
        return Err(ValidationError::new("name", "Name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN || !matches(&NAME, name) {
        return Err(ValidationError::new("name", "Invalid name format"));
    }

    let licence_number = record.licence_number.trim().to_uppercase();
    if !matches(&LICENCE, &licence_number) {
        return Err(ValidationError::new(
            "licenceNumber",
            "Invalid licence number format",
        ));
    }

    let email = record.email.trim();
    if !matches(&EMAIL, email) {
        return Err(ValidationError::new("email", "Invalid email format"));
    }

    let phone = record.phone.trim();
    if !matches(&UK_PHONE, phone) {
        return Err(ValidationError::new(
            "phone",
            "Invalid UK phone number format",
        ));
    }

    let test_centre = record.test_centre.trim();
    if test_centre.is_empty() {
        return Err(ValidationError::new("testCentre", "Test centre is required"));
    }

    let postcode = record.postcode.trim().to_uppercase();
    if !matches(&POSTCODE, &postcode) {
        return Err(ValidationError::new("postcode", "Invalid postcode format"));
    }

    Ok(PupilRecord {
        name: name.to_string(),
        licence_number,
        email: email.to_string(),
        phone: phone.to_string(),
        test_centre: test_centre.to_string(),
        postcode,
    })
}

/// Structural check of an inter-process message against `schema`.
///
/// The sender may be untrusted, so this never fails loudly: unknown types,
/// non-object payloads, missing required fields, wrongly typed fields,
/// unexpected fields, and oversized strings all yield `false`.
#[must_use]
pub fn validate_message(message: &Value, schema: &MessageSchema) -> bool {
    let Some(obj) = message.as_object() else {
        return false;
    };
    let Some(kind) = obj.get("type").and_then(Value::as_str) else {
        return false;
    };
    let Some(rules) = schema.types.get(kind) else {
        return false;
    };

    let empty = serde_json::Map::new();
    let data = match obj.get("data") {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(data)) => data,
        Some(_) => return false,
    };

    for rule in rules {
        match data.get(&rule.name) {
            None | Some(Value::Null) if rule.required => return false,
            None | Some(Value::Null) => {}
            Some(value) if !matches_kind(value, rule.kind) => return false,
            Some(_) => {}
        }
    }

    data.keys().all(|key| rules.iter().any(|r| &r.name == key)) && !has_oversized_string(data)
}

fn matches_kind(value: &Value, kind: FieldKind) -> bool {
    match kind {
        FieldKind::String => value.is_string(),
        FieldKind::Number => value.is_number(),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::Object => value.is_object(),
        FieldKind::Array => value.is_array(),
    }
}

fn has_oversized_string(data: &serde_json::Map<String, Value>) -> bool {
    fn walk(value: &Value) -> bool {
        match value {
            Value::String(s) => s.len() > MAX_MESSAGE_STRING,
            Value::Array(items) => items.iter().any(walk),
            Value::Object(map) => map.values().any(walk),
            _ => false,
        }
    }
    data.values().any(walk)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn valid_pupil() -> PupilRecord {
        PupilRecord {
            name: "John Doe-Smith".into(),
            licence_number: "DOESM901015JD9AB".into(),
            email: "john.doe@example.com".into(),
            phone: "+447123456789".into(),
            test_centre: "Leeds (Harehills)".into(),
            postcode: "LS1 1AA".into(),
        }
    }

    #[test]
    fn field_patterns_compile() {
        for pattern in [&NAME, &LICENCE, &EMAIL, &UK_PHONE, &POSTCODE] {
            assert!(pattern.is_some());
        }
    }

    #[test]
    fn valid_record_passes_unchanged() {
        let record = valid_pupil();
        assert_eq!(sanitize_pupil_data(&record).unwrap(), record);
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let mut record = valid_pupil();
        record.name = "  John Doe-Smith ".into();
        record.email = " john.doe@example.com\n".into();

        let clean = sanitize_pupil_data(&record).unwrap();
        assert_eq!(clean, valid_pupil());
    }

    #[test]
    fn invalid_email_is_rejected() {
        let mut record = valid_pupil();
        record.email = "invalid-email".into();

        let err = sanitize_pupil_data(&record).unwrap_err();
        assert!(err.to_string().contains("Invalid email format"));
        assert_eq!(err.field, "email");
    }

    #[test]
    fn names_allow_apostrophes_and_periods_only() {
        let mut record = valid_pupil();
        record.name = "Siobhán O'Neill Jr.".into();
        assert!(sanitize_pupil_data(&record).is_ok());

        record.name = "Robert'); DROP TABLE pupils;--".into();
        let err = sanitize_pupil_data(&record).unwrap_err();
        assert_eq!(err.message, "Invalid name format");
    }

    #[test]
    fn empty_name_is_required_error() {
        let mut record = valid_pupil();
        record.name = "   ".into();
        assert_eq!(
            sanitize_pupil_data(&record).unwrap_err().message,
            "Name is required"
        );
    }

    #[test]
    fn licence_is_uppercased_before_matching() {
        let mut record = valid_pupil();
        record.licence_number = "doesm901015jd9ab".into();
        let clean = sanitize_pupil_data(&record).unwrap();
        assert_eq!(clean.licence_number, "DOESM901015JD9AB");

        record.licence_number = "DOESM90101".into();
        assert_eq!(
            sanitize_pupil_data(&record).unwrap_err().field,
            "licenceNumber"
        );
    }

    #[test]
    fn uk_phone_formats() {
        for phone in ["+447123456789", "07123 456789", "07123 456 789", "+44 7123 456789"] {
            let mut record = valid_pupil();
            record.phone = phone.into();
            assert!(sanitize_pupil_data(&record).is_ok(), "{phone} should pass");
        }
        for phone in ["12345", "+15551234567", "071234567890123"] {
            let mut record = valid_pupil();
            record.phone = phone.into();
            assert_eq!(sanitize_pupil_data(&record).unwrap_err().field, "phone");
        }
    }

    #[test]
    fn first_violation_wins() {
        let mut record = valid_pupil();
        record.email = "nope".into();
        record.postcode = "nope".into();
        assert_eq!(sanitize_pupil_data(&record).unwrap_err().field, "email");
    }

    #[test]
    fn blank_test_centre_and_bad_postcode() {
        let mut record = valid_pupil();
        record.test_centre = " ".into();
        assert_eq!(
            sanitize_pupil_data(&record).unwrap_err().message,
            "Test centre is required"
        );

        let mut record = valid_pupil();
        record.postcode = "ls1 1aa".into();
        assert_eq!(sanitize_pupil_data(&record).unwrap().postcode, "LS1 1AA");

        record.postcode = "123 456".into();
        assert_eq!(
            sanitize_pupil_data(&record).unwrap_err().message,
            "Invalid postcode format"
        );
    }

    #[test]
    fn accepts_known_messages() {
        let schema = MessageSchema::extension();
        let msg = json!({
            "type": "SLOT_FOUND",
            "data": { "date": "2026-11-02", "time": "09:30", "testCentre": "Leeds" }
        });
        assert!(validate_message(&msg, &schema));
        assert!(validate_message(&json!({ "type": "GET_STATUS" }), &schema));
    }

    #[test]
    fn rejects_unknown_type_and_non_objects() {
        let schema = MessageSchema::extension();
        assert!(!validate_message(&json!({ "type": "EVAL", "data": {} }), &schema));
        assert!(!validate_message(&json!("SLOT_FOUND"), &schema));
        assert!(!validate_message(&json!({ "data": {} }), &schema));
        assert!(!validate_message(&json!({ "type": 7 }), &schema));
    }

    #[test]
    fn rejects_malformed_payloads() {
        let schema = MessageSchema::extension();
        // Missing required field.
        assert!(!validate_message(
            &json!({ "type": "CONFIRM_BOOKING", "data": { "confirmationId": "c" } }),
            &schema
        ));
        // Wrong kind.
        assert!(!validate_message(
            &json!({ "type": "CONFIRM_BOOKING", "data": { "confirmationId": "c", "confirmed": "yes" } }),
            &schema
        ));
        // Data not an object.
        assert!(!validate_message(
            &json!({ "type": "STOP_MONITORING", "data": [1, 2] }),
            &schema
        ));
        // Unexpected field.
        assert!(!validate_message(
            &json!({ "type": "STOP_MONITORING", "data": { "script": "x" } }),
            &schema
        ));
        // Oversized string.
        let huge = "x".repeat(MAX_MESSAGE_STRING + 1);
        assert!(!validate_message(
            &json!({ "type": "UPDATE_SETTINGS", "data": { "settings": { "note": huge } } }),
            &schema
        ));
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let schema = MessageSchema::extension();
        assert!(validate_message(
            &json!({ "type": "START_MONITORING", "data": { "pupilId": "p-1" } }),
            &schema
        ));
    }
}
