use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::config::DbConfig;
use rusqlite::{Connection, DatabaseName, OpenFlags, Transaction, TransactionBehavior};

use crate::error::Result;
use crate::handler::{ColumnHandler, HandlerRegistry, JSON, TEXT};
use crate::query::compile_delete;
use crate::schema::{self, Column, SchemaChange};
use crate::table::Table;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file (default: `db.sqlite`).
    pub path: PathBuf,
    /// How long a statement waits on a database locked by another connection (default: 5s).
    pub busy_timeout: Duration,
    /// Columns of tables created by [`Store::open_table`] (default: `id TEXT, data JSON`).
    pub default_columns: Vec<Column>,
    /// Column handlers; built-ins unless replaced.
    pub handlers: HandlerRegistry,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db.sqlite"),
            busy_timeout: Duration::from_secs(5),
            default_columns: vec![Column::new("id", TEXT), Column::new("data", JSON)],
            handlers: HandlerRegistry::with_builtins(),
        }
    }
}

/// Owner of the SQLite connection. Tables opened from a store borrow it.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    handlers: HandlerRegistry,
    default_columns: Vec<Column>,
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        Self::from_connection(conn, config)
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(StoreConfig {
            path: path.as_ref().to_path_buf(),
            ..StoreConfig::default()
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, StoreConfig::default())
    }

    /// Open a `file:` URI, e.g. `file:name?mode=memory&cache=shared`.
    pub fn open_uri(uri: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(uri, flags)?;
        Self::from_connection(conn, StoreConfig::default())
    }

    fn from_connection(conn: Connection, config: StoreConfig) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        // A quoted name that matches no column must be an error, never a string literal.
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
        Ok(Self {
            conn,
            handlers: config.handlers,
            default_columns: config.default_columns,
        })
    }

    /// Register a handler for `tag`; it replaces a built-in with the same tag.
    pub fn with_handler(mut self, tag: &str, handler: impl ColumnHandler + 'static) -> Self {
        self.handlers.register(tag, handler);
        self
    }

    pub fn register_handler(
        &mut self,
        tag: &str,
        handler: impl ColumnHandler + 'static,
    ) -> Option<Arc<dyn ColumnHandler>> {
        self.handlers.register(tag, handler)
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Create `table` with `columns` if it does not exist yet.
    pub fn prepare_table(&self, table: &str, columns: &[Column]) -> Result<SchemaChange> {
        schema::ensure_table(&self.conn, table, columns)
    }

    /// Open `table`, creating it with the default columns when absent.
    pub fn open_table(&self, table: &str) -> Result<Table<'_>> {
        self.open_table_with(table, &self.default_columns)
    }

    pub fn open_table_with(&self, table: &str, columns: &[Column]) -> Result<Table<'_>> {
        self.prepare_table(table, columns)?;
        Ok(Table::new(self, table))
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        schema::drop_table(&self.conn, table)
    }

    /// Delete every row of `table`, returning how many were removed.
    pub fn delete_all_rows(&self, table: &str) -> Result<usize> {
        schema::require_table(table)?;
        let stmt = compile_delete(table, &[]);
        Ok(self.conn.execute(&stmt.sql, [])?)
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        schema::table_names(&self.conn)
    }

    pub fn has_table(&self, table: &str) -> Result<bool> {
        schema::table_exists(&self.conn, table)
    }

    /// Copy the whole database to `dest` with SQLite's online backup.
    pub fn backup_to(&self, dest: impl AsRef<Path>) -> Result<()> {
        self.conn.backup(DatabaseName::Main, dest, None)?;
        Ok(())
    }

    /// Reclaim free pages after large deletes.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Close the connection, reporting any error SQLite raises while doing so.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| err.into())
    }
}

/// Run `f` in an immediate transaction, or inline when one is already open.
pub(crate) fn atomically<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    if !conn.is_autocommit() {
        return f(conn);
    }
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}
