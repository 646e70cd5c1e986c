use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::document::DocumentCursor;
use crate::error::{Result, StoreError, ValidationError};
use crate::path::DocPath;
use crate::query::{
    compile_count, compile_delete, compile_exists, compile_insert, compile_select,
    compile_update, CompiledStatement, Filter, Query,
};
use crate::schema::{self, require_column, Column, SchemaChange};
use crate::store::{atomically, Store};

/// A row with every column parsed through its handler.
pub type Record = Map<String, Value>;

/// A row exactly as stored, columns in projection order.
pub type RawRow = Vec<(String, SqlValue)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Updated { rows: usize },
    /// No known column was given, nothing was written.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    /// Keys ignored because the table has no such column.
    pub dropped: Vec<String>,
}

/// Named table inside a [`Store`].
#[derive(Debug, Clone)]
pub struct Table<'s> {
    store: &'s Store,
    name: String,
}

impl<'s> Table<'s> {
    pub(crate) fn new(store: &'s Store, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    fn conn(&self) -> &'s Connection {
        self.store.conn()
    }

    pub fn columns(&self) -> Result<Vec<Column>> {
        schema::table_columns(self.conn(), &self.name)
    }

    pub fn column_names(&self) -> Result<Vec<String>> {
        Ok(self.columns()?.into_iter().map(|column| column.name).collect())
    }

    pub fn column(&self, name: &str) -> Result<Option<Column>> {
        schema::find_column(self.conn(), &self.name, name)
    }

    pub fn has_column(&self, name: &str) -> Result<bool> {
        Ok(self.column(name)?.is_some())
    }

    pub fn add_column(&self, name: &str, type_tag: &str) -> Result<SchemaChange> {
        schema::add_column(self.conn(), &self.name, name, type_tag)
    }

    /// Add columns one at a time. A failure leaves the columns added before it in place.
    pub fn add_columns(&self, columns: &[Column]) -> Result<Vec<SchemaChange>> {
        if columns.is_empty() {
            return Err(ValidationError::EmptyColumnList.into());
        }
        columns
            .iter()
            .map(|column| self.add_column(&column.name, &column.type_tag))
            .collect()
    }

    pub fn remove_column(&self, name: &str) -> Result<SchemaChange> {
        schema::remove_column(self.conn(), &self.name, name)
    }

    /// Remove columns one at a time. A failure leaves the columns removed before it gone.
    pub fn remove_columns(&self, names: &[&str]) -> Result<Vec<SchemaChange>> {
        if names.is_empty() {
            return Err(ValidationError::EmptyColumnList.into());
        }
        names.iter().map(|name| self.remove_column(name)).collect()
    }

    pub fn rename_column(&self, name: &str, to: &str) -> Result<SchemaChange> {
        schema::rename_column(self.conn(), &self.name, name, to)
    }

    /// Give `name` a new declared type. This drops and re-adds the column, so every value
    /// stored in it is lost.
    pub fn retype_column(&self, name: &str, type_tag: &str) -> Result<SchemaChange> {
        schema::retype_column(self.conn(), &self.name, name, type_tag)
    }

    pub fn count(&self) -> Result<u64> {
        self.count_where(&Filter::new())
    }

    pub fn count_where(&self, filter: &Filter) -> Result<u64> {
        let conn = self.conn();
        let columns = self.columns()?;
        let filter = self.bind_filter(&columns, filter)?;
        let stmt = compile_count(&self.name, &filter);
        let count: i64 = conn.query_row(&stmt.sql, stmt.named_params().as_slice(), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn has_row(&self, filter: &Filter) -> Result<bool> {
        let columns = self.columns()?;
        self.exists_in(self.conn(), &columns, filter)
    }

    /// Rows as stored, without running handlers.
    pub fn get_rows(&self, query: &Query) -> Result<Vec<RawRow>> {
        let columns = self.columns()?;
        self.select_in(self.conn(), &columns, query)
    }

    pub fn get_rows_parsed(&self, query: &Query) -> Result<Vec<Record>> {
        let columns = self.columns()?;
        let rows = self.select_in(self.conn(), &columns, query)?;
        rows.into_iter()
            .map(|row| self.parse_row(&columns, row))
            .collect()
    }

    /// First parsed row matching `query`.
    pub fn get_row(&self, query: &Query) -> Result<Option<Record>> {
        Ok(self.get_rows_parsed(query)?.into_iter().next())
    }

    /// Parsed value of `column` in the first row matching `filter`. `None` when no row
    /// matches, the value is NULL, or the table has no such column.
    pub fn get(&self, column: &str, filter: &Filter) -> Result<Option<Value>> {
        require_column(column)?;
        let columns = self.columns()?;
        let Some(found) = columns.iter().find(|c| c.name == column) else {
            log::debug!("{}.{column}: no such column", self.name);
            return Ok(None);
        };
        match self.read_stored(self.conn(), &columns, column, filter)? {
            None | Some(SqlValue::Null) => Ok(None),
            Some(stored) => self.parse_value(found, stored).map(Some),
        }
    }

    /// Value at `path` inside the document stored in `column`.
    pub fn get_path(&self, column: &str, path: &str, filter: &Filter) -> Result<Option<Value>> {
        let path = DocPath::parse(path)?;
        Ok(self
            .get(column, filter)?
            .and_then(|doc| path.get(&doc).cloned()))
    }

    /// Delete every row matching `filter` (all rows for an empty filter).
    pub fn delete_rows(&self, filter: &Filter) -> Result<usize> {
        let columns = self.columns()?;
        let filter = self.bind_filter(&columns, filter)?;
        let stmt = compile_delete(&self.name, &filter);
        Ok(self.conn().execute(&stmt.sql, stmt.named_params().as_slice())?)
    }

    /// Write `values` into every row matching `filter`, or insert one row when none match.
    ///
    /// Keys naming no column are ignored and listed in [`UpsertOutcome::dropped`]. Columns
    /// missing from `values` keep their value on update and take their default on insert.
    pub fn set_values<I>(&self, filter: &Filter, values: I) -> Result<UpsertOutcome>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        atomically(self.conn(), |conn| self.set_values_in(conn, filter, values))
    }

    /// Open a cursor on the document stored in `column` of the first row matching `filter`.
    /// An empty `path` addresses the whole document.
    pub fn document(&self, column: &str, path: &str, filter: Filter) -> Result<DocumentCursor<'s>> {
        DocumentCursor::open(self.clone(), column, path, filter)
    }

    pub(crate) fn set_values_in<I>(&self, conn: &Connection, filter: &Filter, values: I) -> Result<UpsertOutcome>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let columns = schema::table_columns(conn, &self.name)?;

        let mut assignments: Vec<(String, SqlValue)> = Vec::new();
        let mut dropped = Vec::new();
        for (name, value) in values {
            let Some(column) = columns.iter().find(|c| c.name == name) else {
                dropped.push(name);
                continue;
            };
            let stored = self.stringify(column, &value)?;
            match assignments.iter_mut().find(|(existing, _)| *existing == name) {
                Some(slot) => slot.1 = stored,
                None => assignments.push((name, stored)),
            }
        }
        if !dropped.is_empty() {
            log::warn!("{}: ignoring values for unknown columns {dropped:?}", self.name);
        }
        if assignments.is_empty() {
            return Ok(UpsertOutcome {
                action: UpsertAction::Unchanged,
                dropped,
            });
        }

        let action = if self.exists_in(conn, &columns, filter)? {
            let bound = self.bind_filter(&columns, filter)?;
            let stmt = compile_update(&self.name, &assignments, &bound);
            let rows = execute(conn, &stmt)?;
            UpsertAction::Updated { rows }
        } else {
            let stmt = compile_insert(&self.name, &assignments);
            execute(conn, &stmt)?;
            UpsertAction::Inserted
        };
        Ok(UpsertOutcome { action, dropped })
    }

    pub(crate) fn exists_in(&self, conn: &Connection, columns: &[Column], filter: &Filter) -> Result<bool> {
        let bound = self.bind_filter(columns, filter)?;
        let stmt = compile_exists(&self.name, &bound);
        Ok(conn.query_row(&stmt.sql, stmt.named_params().as_slice(), |row| row.get(0))?)
    }

    /// Stored value of `column` in the first row matching `filter`; `None` when no row
    /// matches.
    pub(crate) fn read_stored(
        &self,
        conn: &Connection,
        columns: &[Column],
        column: &str,
        filter: &Filter,
    ) -> Result<Option<SqlValue>> {
        let query = Query::new().columns([column]).filter(filter.clone());
        let row = self.select_in(conn, columns, &query)?.into_iter().next();
        Ok(row.and_then(|row| {
            row.into_iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value)
        }))
    }

    fn select_in(&self, conn: &Connection, columns: &[Column], query: &Query) -> Result<Vec<RawRow>> {
        let live: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let bound = self.bind_filter(columns, &query.filter)?;
        let stmt = compile_select(&self.name, &live, query, &bound);

        let mut prepared = conn.prepare(&stmt.sql)?;
        let names: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();
        let params = stmt.named_params();
        let mut rows = prepared.query(params.as_slice())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut raw = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                raw.push((name.clone(), row.get::<_, SqlValue>(i)?));
            }
            out.push(raw);
        }
        Ok(out)
    }

    /// Filter values in stored form, so `JSON`/`BINARY` columns compare encoded text.
    /// Every field must name a live column.
    fn bind_filter(&self, columns: &[Column], filter: &Filter) -> Result<Vec<(String, SqlValue)>> {
        filter
            .iter()
            .map(|(field, value)| -> Result<(String, SqlValue)> {
                let Some(column) = columns.iter().find(|c| c.name == field) else {
                    return Err(ValidationError::UnknownColumn {
                        table: self.name.clone(),
                        column: field.to_string(),
                    }
                    .into());
                };
                Ok((field.to_string(), self.stringify(column, value)?))
            })
            .collect()
    }

    pub(crate) fn stringify(&self, column: &Column, value: &Value) -> Result<SqlValue> {
        self.store
            .handlers()
            .resolve(&column.type_tag)
            .stringify(value)
            .map_err(|source| StoreError::Handler {
                column: column.name.clone(),
                source,
            })
    }

    pub(crate) fn parse_value(&self, column: &Column, stored: SqlValue) -> Result<Value> {
        self.store
            .handlers()
            .resolve(&column.type_tag)
            .parse(stored)
            .map_err(|source| StoreError::Handler {
                column: column.name.clone(),
                source,
            })
    }

    fn parse_row(&self, columns: &[Column], row: RawRow) -> Result<Record> {
        let mut record = Record::new();
        for (name, stored) in row {
            let value = match columns.iter().find(|c| c.name == name) {
                Some(column) => self.parse_value(column, stored)?,
                None => crate::handler::sql_to_value(stored),
            };
            record.insert(name, value);
        }
        Ok(record)
    }
}

fn execute(conn: &Connection, stmt: &CompiledStatement) -> Result<usize> {
    Ok(conn.execute(&stmt.sql, stmt.named_params().as_slice())?)
}
