//! Declarative entity schemas
//!
//! Entity payloads travel as JSON, so they are validated as
//! [`serde_json::Value`] before being deserialized into typed structs.
//! A [`Schema`] describes the accepted shape; [`SchemaRegistry`] maps
//! entity type ids to schemas and fails closed on unknown types.
//!
//! Violations are reported with a JSON-pointer style path to the
//! offending value, e.g. `/files/~1docs~1a.txt/hash`.

mod builtin;

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{FeedwireError, FeedwireResult};
use crate::identity::{is_address, is_public_key_hex};

pub use builtin::{
    actor_schema, contact_schema, file_ref_schema, file_system_schema, first_contact_schema,
    message_schema, profile_schema,
};

/// String formats used by the builtin schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `^[0-9a-f]{130}$`
    PublicKey,
    /// `^0x[0-9a-f]{40}$`
    Address,
    /// `^[0-9a-f]{64}$`
    Hash,
    /// `^[0-9a-zA-Z-_. ]{1,50}$`
    MailboxLabel,
    /// `^(/[^/]+)+$`
    AbsolutePath,
}

impl Format {
    pub fn matches(self, value: &str) -> bool {
        match self {
            Format::PublicKey => is_public_key_hex(value),
            Format::Address => is_address(value),
            Format::Hash => {
                value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            }
            Format::MailboxLabel => {
                (1..=50).contains(&value.len())
                    && value
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b' '))
            }
            Format::AbsolutePath => is_valid_path(value),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Format::PublicKey => "a 130-char lowercase hex public key",
            Format::Address => "a 0x-prefixed 40-char lowercase hex address",
            Format::Hash => "a 64-char lowercase hex hash",
            Format::MailboxLabel => "a 1-50 char label of [0-9a-zA-Z-_. ]",
            Format::AbsolutePath => "an absolute path",
        }
    }
}

/// `^(/[^/]+)+$`: one or more `/segment` parts, no empty segments.
pub fn is_valid_path(path: &str) -> bool {
    match path.strip_prefix('/') {
        Some(rest) => rest.split('/').all(|segment| !segment.is_empty()),
        None => false,
    }
}

/// A named property of an object schema.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: &'static str,
    pub schema: Schema,
    pub required: bool,
}

/// Accepted shape of a JSON value.
#[derive(Debug, Clone)]
pub enum Schema {
    Any,
    String {
        max_length: Option<usize>,
        format: Option<Format>,
    },
    Integer {
        minimum: Option<i64>,
    },
    Object {
        properties: Vec<Property>,
        additional: bool,
    },
    /// Object used as a map with constrained keys
    Map {
        keys: Format,
        values: Box<Schema>,
    },
    Array(Box<Schema>),
}

impl Schema {
    pub fn string() -> Self {
        Schema::String {
            max_length: None,
            format: None,
        }
    }

    pub fn max_length(max: usize) -> Self {
        Schema::String {
            max_length: Some(max),
            format: None,
        }
    }

    pub fn format(format: Format) -> Self {
        Schema::String {
            max_length: None,
            format: Some(format),
        }
    }

    pub fn non_negative_integer() -> Self {
        Schema::Integer { minimum: Some(0) }
    }

    /// Open object with no declared properties.
    pub fn object() -> Self {
        Schema::Object {
            properties: Vec::new(),
            additional: true,
        }
    }

    pub fn map(keys: Format, values: Schema) -> Self {
        Schema::Map {
            keys,
            values: Box::new(values),
        }
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array(Box::new(items))
    }

    pub fn required(self, name: &'static str, schema: Schema) -> Self {
        self.with_property(name, schema, true)
    }

    pub fn optional(self, name: &'static str, schema: Schema) -> Self {
        self.with_property(name, schema, false)
    }

    /// Reject properties that are not declared.
    pub fn closed(self) -> Self {
        match self {
            Schema::Object { properties, .. } => Schema::Object {
                properties,
                additional: false,
            },
            other => other,
        }
    }

    fn with_property(self, name: &'static str, schema: Schema, required: bool) -> Self {
        match self {
            Schema::Object {
                mut properties,
                additional,
            } => {
                properties.push(Property {
                    name,
                    schema,
                    required,
                });
                Schema::Object {
                    properties,
                    additional,
                }
            }
            other => other,
        }
    }

    /// Validate `value`, reporting the first violation.
    pub fn validate(&self, value: &Value) -> FeedwireResult<()> {
        self.check(value, "")
    }

    fn check(&self, value: &Value, path: &str) -> FeedwireResult<()> {
        match self {
            Schema::Any => Ok(()),

            Schema::String { max_length, format } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| FeedwireError::schema(display(path), "must be a string"))?;
                if let Some(max) = max_length {
                    if s.chars().count() > *max {
                        return Err(FeedwireError::schema(
                            display(path),
                            format!("must be at most {} characters", max),
                        ));
                    }
                }
                if let Some(format) = format {
                    if !format.matches(s) {
                        return Err(FeedwireError::schema(
                            display(path),
                            format!("must be {}", format.describe()),
                        ));
                    }
                }
                Ok(())
            }

            Schema::Integer { minimum } => {
                let n = value
                    .as_i64()
                    .or_else(|| value.as_u64().map(|n| n.min(i64::MAX as u64) as i64))
                    .ok_or_else(|| FeedwireError::schema(display(path), "must be an integer"))?;
                match minimum {
                    Some(min) if n < *min => Err(FeedwireError::schema(
                        display(path),
                        format!("must be >= {}", min),
                    )),
                    _ => Ok(()),
                }
            }

            Schema::Object {
                properties,
                additional,
            } => {
                let map = value
                    .as_object()
                    .ok_or_else(|| FeedwireError::schema(display(path), "must be an object"))?;
                for property in properties {
                    let child = join(path, property.name);
                    match map.get(property.name) {
                        Some(v) => property.schema.check(v, &child)?,
                        None if property.required => {
                            return Err(FeedwireError::schema(display(&child), "is required"))
                        }
                        None => {}
                    }
                }
                if !additional {
                    if let Some(extra) = map
                        .keys()
                        .find(|k| !properties.iter().any(|p| p.name == k.as_str()))
                    {
                        return Err(FeedwireError::schema(
                            display(&join(path, extra)),
                            "is not an allowed property",
                        ));
                    }
                }
                Ok(())
            }

            Schema::Map { keys, values } => {
                let map = value
                    .as_object()
                    .ok_or_else(|| FeedwireError::schema(display(path), "must be an object"))?;
                for (key, v) in map {
                    let child = join(path, key);
                    if !keys.matches(key) {
                        return Err(FeedwireError::schema(
                            display(&child),
                            format!("key must be {}", keys.describe()),
                        ));
                    }
                    values.check(v, &child)?;
                }
                Ok(())
            }

            Schema::Array(items) => {
                let list = value
                    .as_array()
                    .ok_or_else(|| FeedwireError::schema(display(path), "must be an array"))?;
                for (i, item) in list.iter().enumerate() {
                    items.check(item, &join(path, &i.to_string()))?;
                }
                Ok(())
            }
        }
    }
}

/// RFC 6901 escaping of one path segment
fn join(path: &str, segment: &str) -> String {
    format!("{}/{}", path, segment.replace('~', "~0").replace('/', "~1"))
}

fn display(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Entity type id to schema lookup
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Schema>,
}

impl SchemaRegistry {
    /// Empty registry; every type is unknown.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the builtin actor, contact, file system and message schemas.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, type_id: impl Into<String>, schema: Schema) {
        self.schemas.insert(type_id.into(), schema);
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.schemas.contains_key(type_id)
    }

    /// Validate `data` against the schema registered for `type_id`.
    pub fn validate<'a>(&self, type_id: &str, data: &'a Value) -> FeedwireResult<&'a Value> {
        let schema = self
            .schemas
            .get(type_id)
            .ok_or_else(|| FeedwireError::UnknownEntityType(type_id.to_string()))?;
        schema.validate(data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_validation() {
        assert!(is_valid_path("/a"));
        assert!(is_valid_path("/a/b.txt"));
        assert!(is_valid_path("/with space/x"));
        assert!(!is_valid_path("not-absolute"));
        assert!(!is_valid_path("/"));
        assert!(!is_valid_path("/a/"));
        assert!(!is_valid_path("//a"));
        assert!(!is_valid_path(""));
    }

    #[test]
    fn test_mailbox_label_format() {
        assert!(Format::MailboxLabel.matches("inbox-1_a. b"));
        assert!(!Format::MailboxLabel.matches(""));
        assert!(!Format::MailboxLabel.matches(&"x".repeat(51)));
        assert!(!Format::MailboxLabel.matches("bad/label"));
    }

    #[test]
    fn test_required_and_closed() {
        let schema = Schema::object()
            .required("name", Schema::string())
            .optional("age", Schema::non_negative_integer())
            .closed();

        assert!(schema.validate(&json!({"name": "a"})).is_ok());
        assert!(schema.validate(&json!({"name": "a", "age": 3})).is_ok());

        let err = schema.validate(&json!({})).unwrap_err();
        assert!(matches!(err, FeedwireError::SchemaValidation { ref path, .. } if path == "/name"));

        let err = schema.validate(&json!({"name": "a", "extra": 1})).unwrap_err();
        assert!(matches!(err, FeedwireError::SchemaValidation { ref path, .. } if path == "/extra"));

        let err = schema.validate(&json!({"name": "a", "age": -1})).unwrap_err();
        assert!(matches!(err, FeedwireError::SchemaValidation { ref path, .. } if path == "/age"));
    }

    #[test]
    fn test_nested_path_escaping() {
        let schema = Schema::map(Format::AbsolutePath, Schema::format(Format::Hash));
        let err = schema.validate(&json!({"/docs/a": "nothex"})).unwrap_err();
        match err {
            FeedwireError::SchemaValidation { path, .. } => assert_eq!(path, "/~1docs~1a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_array_items() {
        let schema = Schema::array(Schema::max_length(3));
        assert!(schema.validate(&json!(["a", "abc"])).is_ok());
        let err = schema.validate(&json!(["a", "abcd"])).unwrap_err();
        assert!(matches!(err, FeedwireError::SchemaValidation { ref path, .. } if path == "/1"));
    }

    #[test]
    fn test_max_length_counts_chars() {
        let schema = Schema::max_length(2);
        assert!(schema.validate(&json!("éé")).is_ok());
        assert!(schema.validate(&json!("ééé")).is_err());
    }

    #[test]
    fn test_unknown_type_fails_closed() {
        let registry = SchemaRegistry::empty();
        assert!(matches!(
            registry.validate("feedwire://nope.v0", &json!({})),
            Err(FeedwireError::UnknownEntityType(_))
        ));
    }
}
