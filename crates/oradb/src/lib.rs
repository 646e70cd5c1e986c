//! Document tables on top of SQLite.
//!
//! A [`Store`] owns one SQLite connection and hands out [`Table`]s that treat relational
//! tables as loosely typed record stores:
//! - per-column handlers decide how values are stored (`TEXT`, `JSON`, `BINARY`, or any
//!   caller-registered tag)
//! - columns can be added, removed, renamed and retyped at runtime
//! - reads and upserts are keyed by equality filters
//! - [`DocumentCursor`] edits a nested path inside a JSON column
//!
//! ```no_run
//! use oradb::{Filter, Store};
//! use serde_json::json;
//!
//! # fn main() -> oradb::Result<()> {
//! let store = Store::open_path("db.sqlite")?;
//! let people = store.open_table("people")?;
//! let cat = Filter::new().eq("id", "cat");
//!
//! people.set_values(&cat, [("id".to_string(), json!("cat")), ("data".to_string(), json!({"age": 1}))])?;
//! people.document("data", "age", cat.clone())?.add(5)?;
//! assert_eq!(people.get("data", &cat)?, Some(json!({"age": 6})));
//! # Ok(())
//! # }
//! ```

mod document;
mod error;
pub mod handler;
pub mod path;
pub mod query;
mod schema;
mod store;
mod table;

pub use document::DocumentCursor;
pub use error::{Result, StoreError, ValidationError};
pub use handler::{
    BinaryHandler, ColumnHandler, HandlerError, HandlerRegistry, IdentityHandler, JsonHandler,
};
pub use path::DocPath;
pub use query::{Direction, Filter, Limit, Order, Query, DEFAULT_LIMIT};
pub use schema::{Column, SchemaChange, SkipReason, PLACEHOLDER_COLUMN};
pub use store::{Store, StoreConfig};
pub use table::{RawRow, Record, Table, UpsertAction, UpsertOutcome};
