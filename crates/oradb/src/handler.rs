//! Column handlers: how an in-memory [`Value`] is written to, and read back from, a column
//! of a given declared type.
//!
//! A [`HandlerRegistry`] maps declared type tags (`TEXT`, `JSON`, ...) to handlers. Tags
//! are compared case-insensitively. A tag with no registered handler resolves to the
//! identity handler, so tables with arbitrary SQLite types stay readable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Number, Value};
use thiserror::Error;

pub const TEXT: &str = "TEXT";
pub const JSON: &str = "JSON";
pub const BINARY: &str = "BINARY";
/// Accepted alias for [`BINARY`].
pub const BSON: &str = "BSON";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("binary encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("binary decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("{0} values need a document column")]
    Unrepresentable(&'static str),
    #[error("binary documents must be objects or arrays, got {0}")]
    NotADocument(&'static str),
    #[error("expected {expected} in storage, found {found}")]
    UnexpectedStorage {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0}")]
    Custom(String),
}

impl HandlerError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// Parse/stringify pair for one column type.
///
/// Implementations must satisfy `parse(stringify(v)) == v` for every value they accept,
/// unless they document a lossy fallback.
pub trait ColumnHandler: Send + Sync {
    fn parse(&self, stored: SqlValue) -> Result<Value, HandlerError>;

    fn stringify(&self, value: &Value) -> Result<SqlValue, HandlerError>;

    /// Whether parsed values are nested, path-addressable documents.
    fn is_document(&self) -> bool {
        false
    }
}

/// Stores scalars as their native SQLite representation.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHandler;

impl ColumnHandler for IdentityHandler {
    fn parse(&self, stored: SqlValue) -> Result<Value, HandlerError> {
        Ok(sql_to_value(stored))
    }

    fn stringify(&self, value: &Value) -> Result<SqlValue, HandlerError> {
        scalar_to_sql(value)
    }
}

/// Stores values as JSON text.
///
/// Parsing is lossy on purpose: stored text that is not valid JSON comes back as an empty
/// object instead of an error, so a single corrupt cell never makes a row unreadable.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonHandler;

impl ColumnHandler for JsonHandler {
    fn parse(&self, stored: SqlValue) -> Result<Value, HandlerError> {
        let parsed = match stored {
            SqlValue::Text(text) => serde_json::from_str(&text),
            SqlValue::Blob(bytes) => serde_json::from_slice(&bytes),
            // Numeric affinity on a `JSON` column turns `5` into an integer cell.
            other => return Ok(sql_to_value(other)),
        };
        Ok(parsed.unwrap_or_else(|err| {
            log::debug!("malformed JSON cell replaced with an empty object: {err}");
            Value::Object(Map::new())
        }))
    }

    fn stringify(&self, value: &Value) -> Result<SqlValue, HandlerError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        Ok(SqlValue::Text(serde_json::to_string(value)?))
    }

    fn is_document(&self) -> bool {
        true
    }
}

/// Stores documents (objects and arrays) as base64-encoded MessagePack.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryHandler;

impl ColumnHandler for BinaryHandler {
    fn parse(&self, stored: SqlValue) -> Result<Value, HandlerError> {
        match stored {
            SqlValue::Null => Ok(Value::Null),
            SqlValue::Text(text) => {
                let bytes = STANDARD.decode(text.as_bytes())?;
                Ok(rmp_serde::from_slice(&bytes)?)
            }
            SqlValue::Blob(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
            other => Err(HandlerError::UnexpectedStorage {
                expected: "base64 text",
                found: storage_kind(&other),
            }),
        }
    }

    fn stringify(&self, value: &Value) -> Result<SqlValue, HandlerError> {
        match value {
            Value::Null => return Ok(SqlValue::Null),
            Value::Object(_) | Value::Array(_) => {}
            Value::Bool(_) => return Err(HandlerError::NotADocument("bool")),
            Value::Number(_) => return Err(HandlerError::NotADocument("number")),
            Value::String(_) => return Err(HandlerError::NotADocument("string")),
        }
        let bytes = rmp_serde::to_vec(value)?;
        Ok(SqlValue::Text(STANDARD.encode(bytes)))
    }

    fn is_document(&self) -> bool {
        true
    }
}

/// Type tag → handler map owned by a [`crate::Store`].
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn ColumnHandler>>,
    identity: Arc<dyn ColumnHandler>,
}

impl HandlerRegistry {
    /// A registry with no handlers; every tag resolves to the identity handler.
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
            identity: Arc::new(IdentityHandler),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(TEXT, IdentityHandler);
        registry.register(JSON, JsonHandler);
        registry.register(BINARY, BinaryHandler);
        registry.register(BSON, BinaryHandler);
        registry
    }

    /// Register `handler` for `tag`, replacing (and returning) any previous handler.
    pub fn register(
        &mut self,
        tag: &str,
        handler: impl ColumnHandler + 'static,
    ) -> Option<Arc<dyn ColumnHandler>> {
        self.register_shared(tag, Arc::new(handler))
    }

    pub fn register_shared(
        &mut self,
        tag: &str,
        handler: Arc<dyn ColumnHandler>,
    ) -> Option<Arc<dyn ColumnHandler>> {
        self.handlers.insert(normalize_tag(tag), handler)
    }

    pub fn resolve(&self, tag: &str) -> &dyn ColumnHandler {
        &**self
            .handlers
            .get(&normalize_tag(tag))
            .unwrap_or(&self.identity)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(&normalize_tag(tag))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tags", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub(crate) fn normalize_tag(tag: &str) -> String {
    tag.trim().to_ascii_uppercase()
}

/// Convert a scalar JSON value into its native SQLite representation.
pub(crate) fn scalar_to_sql(value: &Value) -> Result<SqlValue, HandlerError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) => return Err(HandlerError::Unrepresentable("array")),
        Value::Object(_) => return Err(HandlerError::Unrepresentable("object")),
    })
}

pub(crate) fn sql_to_value(stored: SqlValue) -> Value {
    match stored {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
    }
}

fn storage_kind(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Null => "null",
        SqlValue::Integer(_) => "integer",
        SqlValue::Real(_) => "real",
        SqlValue::Text(_) => "text",
        SqlValue::Blob(_) => "blob",
    }
}
