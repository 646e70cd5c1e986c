//! Read-modify-write cursor over one document column.
//!
//! A cursor reads the document once when opened and keeps it in memory. Every mutation
//! edits a copy, writes the whole document back through [`Table::set_values`] and only
//! then replaces the in-memory copy, so a failed write leaves the cursor unchanged. The
//! filter's fields are written with the document, so a cursor on a missing row inserts one
//! row that its filter matches from then on.
//!
//! Writes are guarded by a compare-and-swap on the stored column: inside the write
//! transaction the stored value is re-read and compared with the value this cursor last
//! saw. If another writer got there first the mutation fails with
//! [`StoreError::Conflict`] and nothing is written.

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use crate::error::{Result, StoreError, ValidationError};
use crate::path::DocPath;
use crate::query::Filter;
use crate::schema::{require_column, table_columns};
use crate::store::atomically;
use crate::table::Table;

#[derive(Debug, Clone)]
pub struct DocumentCursor<'s> {
    table: Table<'s>,
    column: String,
    path: DocPath,
    filter: Filter,
    doc: Value,
    /// Stored column value as of the last read or write; `None` when no row matched.
    observed: Option<SqlValue>,
}

impl<'s> DocumentCursor<'s> {
    pub(crate) fn open(table: Table<'s>, column: &str, path: &str, filter: Filter) -> Result<Self> {
        require_column(column)?;
        let path = DocPath::parse(path)?;

        let conn = table.store().conn();
        let columns = table_columns(conn, table.name())?;
        let Some(found) = columns.iter().find(|c| c.name == column) else {
            return Err(ValidationError::UnknownColumn {
                table: table.name().to_string(),
                column: column.to_string(),
            }
            .into());
        };
        if !table.store().handlers().resolve(&found.type_tag).is_document() {
            return Err(ValidationError::NotDocumentColumn {
                column: column.to_string(),
                tag: found.type_tag.clone(),
            }
            .into());
        }

        let observed = table.read_stored(conn, &columns, column, &filter)?;
        let doc = match observed.clone() {
            None | Some(SqlValue::Null) => empty_doc(),
            Some(stored) => match table.parse_value(found, stored) {
                Ok(value) if value.is_object() || value.is_array() => value,
                Ok(_) => empty_doc(),
                Err(err) => {
                    log::debug!("{}.{column}: unreadable document replaced: {err}", table.name());
                    empty_doc()
                }
            },
        };

        Ok(Self {
            table,
            column: column.to_string(),
            path,
            filter,
            doc,
            observed,
        })
    }

    pub fn path(&self) -> &DocPath {
        &self.path
    }

    /// The whole in-memory document.
    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// Value at the cursor's path, including changes made through this cursor.
    pub fn get(&self) -> Option<&Value> {
        self.path.get(&self.doc)
    }

    pub fn update(&mut self, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        self.apply(|path, doc| Ok(path.set(doc, value)?))
    }

    /// Add `amount` to the number at the path. Missing or non-numeric values count as 0.
    pub fn add(&mut self, amount: impl Into<Value>) -> Result<&mut Self> {
        let amount = amount.into();
        self.apply(|path, doc| {
            let current = path.get(doc).cloned().unwrap_or(Value::Null);
            Ok(path.set(doc, sum(&current, &amount))?)
        })
    }

    pub fn subtract(&mut self, amount: impl Into<Value>) -> Result<&mut Self> {
        let amount = negate(&amount.into());
        self.add(amount)
    }

    /// Append `items` to the array at the path; a non-array value is replaced by a new array.
    pub fn push<I, V>(&mut self, items: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        self.apply(|path, doc| {
            let mut list = current_array(path, doc);
            list.extend(items);
            Ok(path.set(doc, Value::Array(list))?)
        })
    }

    /// Remove every element equal to one of `items` from the array at the path.
    pub fn pull<I, V>(&mut self, items: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        self.apply(|path, doc| {
            let mut list = current_array(path, doc);
            list.retain(|value| !items.contains(value));
            Ok(path.set(doc, Value::Array(list))?)
        })
    }

    /// Remove the value at the path. At the document root this deletes every matching row.
    pub fn delete(&mut self) -> Result<&mut Self> {
        if self.path.is_root() {
            self.table.delete_rows(&self.filter)?;
            self.doc = empty_doc();
            self.observed = None;
            return Ok(self);
        }
        self.apply(|path, doc| {
            path.unset(doc);
            Ok(())
        })
    }

    fn apply(&mut self, mutate: impl FnOnce(&DocPath, &mut Value) -> Result<()>) -> Result<&mut Self> {
        let mut next = self.doc.clone();
        mutate(&self.path, &mut next)?;
        self.persist(&next)?;
        self.doc = next;
        Ok(self)
    }

    fn persist(&mut self, doc: &Value) -> Result<()> {
        let table = &self.table;
        let column = &self.column;
        let filter = &self.filter;
        let observed = &self.observed;

        let stored = atomically(table.store().conn(), |conn| {
            let columns = table_columns(conn, table.name())?;
            let current = table.read_stored(conn, &columns, column, filter)?;
            if current != *observed {
                return Err(StoreError::Conflict {
                    table: table.name().to_string(),
                    column: column.clone(),
                });
            }
            // Filter fields go along so a freshly inserted row matches this cursor's filter.
            let values = filter
                .iter()
                .map(|(field, value)| (field.to_string(), value.clone()))
                .chain([(column.clone(), doc.clone())]);
            table.set_values_in(conn, filter, values)?;
            table.read_stored(conn, &columns, column, filter)
        })?;

        self.observed = stored;
        Ok(())
    }
}

fn empty_doc() -> Value {
    Value::Object(Map::new())
}

fn current_array(path: &DocPath, doc: &Value) -> Vec<Value> {
    match path.get(doc) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn numeric_or_zero(value: &Value) -> Value {
    if value.is_number() {
        value.clone()
    } else {
        Value::from(0)
    }
}

/// Integer sum when both sides are integers and it fits, floating point otherwise.
fn sum(a: &Value, b: &Value) -> Value {
    let (a, b) = (numeric_or_zero(a), numeric_or_zero(b));
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(total) = x.checked_add(y) {
            return Value::from(total);
        }
    }
    Value::from(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default())
}

fn negate(value: &Value) -> Value {
    if let Some(n) = value.as_i64().and_then(i64::checked_neg) {
        return Value::from(n);
    }
    match value.as_f64() {
        Some(f) => Value::from(-f),
        None => Value::from(0),
    }
}
