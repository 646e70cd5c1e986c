//! Statement compiler for filtered reads and writes.
//!
//! Every statement is built from trusted identifiers (table and column names, quoted) and
//! bound parameters (all values). Each clause binds its parameters under its own prefix
//! (`:where_`, `:set_`, `:insert_`) so a filter on `name` and an assignment to `name` can
//! share one statement.

use std::collections::HashSet;
use std::fmt::Write as _;

use rusqlite::types::Value as SqlValue;
use rusqlite::ToSql;
use serde_json::{Map, Value};

const WHERE_PREFIX: &str = "where_";
const SET_PREFIX: &str = "set_";
const INSERT_PREFIX: &str = "insert_";

/// Rows returned by a read when the caller does not choose a limit.
pub const DEFAULT_LIMIT: u64 = 1;

/// Equality filter: every field must match its value exactly. An empty filter matches
/// every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Add a condition; a later condition on the same field replaces the earlier one.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = Filter::new();
        for (field, value) in iter {
            filter.insert(field, value);
        }
        filter
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    /// Case-insensitive; anything other than `desc` sorts ascending.
    pub fn parse(token: &str) -> Self {
        if token.trim().eq_ignore_ascii_case("desc") {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl From<&str> for Direction {
    fn from(token: &str) -> Self {
        Direction::parse(token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    By(Vec<(String, Direction)>),
    /// Engine-chosen random order.
    Random,
}

impl Order {
    pub fn by(field: impl Into<String>, direction: impl Into<Direction>) -> Self {
        Order::By(vec![(field.into(), direction.into())])
    }

    /// Append a tie-breaker. Has no effect on [`Order::Random`].
    pub fn then(self, field: impl Into<String>, direction: impl Into<Direction>) -> Self {
        match self {
            Order::By(mut terms) => {
                terms.push((field.into(), direction.into()));
                Order::By(terms)
            }
            Order::Random => Order::Random,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Rows(u64),
    Unbounded,
}

impl Default for Limit {
    fn default() -> Self {
        Limit::Rows(DEFAULT_LIMIT)
    }
}

/// A read request: projection, filter, order and page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub columns: Vec<String>,
    pub filter: Filter,
    pub order: Option<Order>,
    pub limit: Limit,
    pub offset: u64,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, rows: u64) -> Self {
        self.limit = Limit::Rows(rows);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.limit = Limit::Unbounded;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// Statement text plus its named parameters (names include the leading `:`).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
}

impl CompiledStatement {
    pub(crate) fn named_params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}

/// Quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sanitize(key: &str) -> String {
    key.chars().filter(char::is_ascii_alphanumeric).collect()
}

struct ParamNames {
    prefix: &'static str,
    used: HashSet<String>,
}

impl ParamNames {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            used: HashSet::new(),
        }
    }

    /// `:prefix<sanitized key>`, with a numeric suffix when two keys sanitize alike.
    fn next(&mut self, key: &str) -> String {
        let base = format!(":{}{}", self.prefix, sanitize(key));
        let mut name = base.clone();
        let mut n = 2;
        while !self.used.insert(name.clone()) {
            name = format!("{base}_{n}");
            n += 1;
        }
        name
    }
}

fn push_where(sql: &mut String, params: &mut Vec<(String, SqlValue)>, filter: &[(String, SqlValue)]) {
    if filter.is_empty() {
        return;
    }
    let mut names = ParamNames::new(WHERE_PREFIX);
    let terms: Vec<String> = filter
        .iter()
        .map(|(field, value)| {
            if matches!(value, SqlValue::Null) {
                format!("{} IS NULL", quote_ident(field))
            } else {
                let name = names.next(field);
                let term = format!("{} = {name}", quote_ident(field));
                params.push((name, value.clone()));
                term
            }
        })
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&terms.join(" AND "));
}

fn push_order(sql: &mut String, order: Option<&Order>) {
    match order {
        None => {}
        Some(Order::Random) => sql.push_str(" ORDER BY RANDOM()"),
        Some(Order::By(terms)) if terms.is_empty() => {}
        Some(Order::By(terms)) => {
            let terms: Vec<String> = terms
                .iter()
                .map(|(field, dir)| format!("{} {} NULLS LAST", quote_ident(field), dir.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
    }
}

/// SQLite page values are signed 64-bit; anything larger is clamped.
fn clamp_page(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn push_page(sql: &mut String, limit: Limit, offset: u64) {
    let offset = clamp_page(offset);
    match limit {
        Limit::Rows(rows) => {
            let rows = clamp_page(rows);
            let _ = write!(sql, " LIMIT {rows} OFFSET {offset}");
        }
        Limit::Unbounded if offset > 0 => {
            let _ = write!(sql, " LIMIT -1 OFFSET {offset}");
        }
        Limit::Unbounded => {}
    }
}

/// Names to project: requested ∩ live, or every live column when that is empty.
pub fn projection(live_columns: &[String], requested: &[String]) -> Vec<String> {
    let picked: Vec<String> = requested
        .iter()
        .filter(|name| live_columns.contains(name))
        .cloned()
        .collect();
    if picked.is_empty() {
        live_columns.to_vec()
    } else {
        picked
    }
}

/// `SELECT` for `query`. `filter` is the query's filter with values already converted to
/// their stored form.
pub fn compile_select(
    table: &str,
    live_columns: &[String],
    query: &Query,
    filter: &[(String, SqlValue)],
) -> CompiledStatement {
    let columns = projection(live_columns, &query.columns);
    let projected = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|name| quote_ident(name))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {projected} FROM {}", quote_ident(table));
    let mut params = Vec::new();
    push_where(&mut sql, &mut params, filter);
    push_order(&mut sql, query.order.as_ref());
    push_page(&mut sql, query.limit, query.offset);
    CompiledStatement { sql, params }
}

pub fn compile_exists(table: &str, filter: &[(String, SqlValue)]) -> CompiledStatement {
    let mut sql = format!("SELECT EXISTS(SELECT 1 FROM {}", quote_ident(table));
    let mut params = Vec::new();
    push_where(&mut sql, &mut params, filter);
    sql.push(')');
    CompiledStatement { sql, params }
}

pub fn compile_count(table: &str, filter: &[(String, SqlValue)]) -> CompiledStatement {
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let mut params = Vec::new();
    push_where(&mut sql, &mut params, filter);
    CompiledStatement { sql, params }
}

/// `UPDATE` applying `assignments` to every row matching `filter`.
pub fn compile_update(
    table: &str,
    assignments: &[(String, SqlValue)],
    filter: &[(String, SqlValue)],
) -> CompiledStatement {
    let mut names = ParamNames::new(SET_PREFIX);
    let mut params = Vec::new();
    let set: Vec<String> = assignments
        .iter()
        .map(|(column, value)| {
            let name = names.next(column);
            let term = format!("{} = {name}", quote_ident(column));
            params.push((name, value.clone()));
            term
        })
        .collect();

    let mut sql = format!("UPDATE {} SET {}", quote_ident(table), set.join(", "));
    push_where(&mut sql, &mut params, filter);
    CompiledStatement { sql, params }
}

pub fn compile_insert(table: &str, values: &[(String, SqlValue)]) -> CompiledStatement {
    let mut names = ParamNames::new(INSERT_PREFIX);
    let mut params = Vec::new();
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (column, value) in values {
        let name = names.next(column);
        columns.push(quote_ident(column));
        placeholders.push(name.clone());
        params.push((name, value.clone()));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    );
    CompiledStatement { sql, params }
}

pub fn compile_delete(table: &str, filter: &[(String, SqlValue)]) -> CompiledStatement {
    let mut sql = format!("DELETE FROM {}", quote_ident(table));
    let mut params = Vec::new();
    push_where(&mut sql, &mut params, filter);
    CompiledStatement { sql, params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    fn live(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn select_defaults_to_single_row_and_all_columns() {
        let stmt = compile_select("people", &live(&["id", "data"]), &Query::new(), &[]);
        assert_eq!(stmt.sql, r#"SELECT "id", "data" FROM "people" LIMIT 1 OFFSET 0"#);
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn unknown_projection_columns_are_dropped() {
        let query = Query::new().columns(["data", "nope"]).unbounded();
        let stmt = compile_select("people", &live(&["id", "data"]), &query, &[]);
        assert_eq!(stmt.sql, r#"SELECT "data" FROM "people""#);
    }

    #[test]
    fn filter_keys_are_sanitized_into_parameter_names() {
        let filter = vec![("user-id".to_string(), text("a")), ("userid".to_string(), text("b"))];
        let stmt = compile_select("t", &live(&["user-id", "userid"]), &Query::new(), &filter);
        assert_eq!(
            stmt.sql,
            r#"SELECT "user-id", "userid" FROM "t" WHERE "user-id" = :where_userid AND "userid" = :where_userid_2 LIMIT 1 OFFSET 0"#
        );
        assert_eq!(
            stmt.params,
            vec![
                (":where_userid".to_string(), text("a")),
                (":where_userid_2".to_string(), text("b")),
            ]
        );
    }

    #[test]
    fn null_filter_values_compile_to_is_null() {
        let stmt = compile_count("t", &[("id".to_string(), SqlValue::Null)]);
        assert_eq!(stmt.sql, r#"SELECT COUNT(*) FROM "t" WHERE "id" IS NULL"#);
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn order_terms_and_random() {
        let query = Query::new()
            .order(Order::by("score", "DeSc").then("name", "sideways"))
            .limit(10)
            .offset(20);
        let stmt = compile_select("t", &live(&["name", "score"]), &query, &[]);
        assert_eq!(
            stmt.sql,
            r#"SELECT "name", "score" FROM "t" ORDER BY "score" DESC NULLS LAST, "name" ASC NULLS LAST LIMIT 10 OFFSET 20"#
        );

        let query = Query::new().order(Order::Random).unbounded().offset(3);
        let stmt = compile_select("t", &live(&["name"]), &query, &[]);
        assert_eq!(stmt.sql, r#"SELECT "name" FROM "t" ORDER BY RANDOM() LIMIT -1 OFFSET 3"#);
    }

    #[test]
    fn page_values_are_clamped_to_sqlite_integers() {
        let query = Query::new().limit(u64::MAX).offset(u64::MAX);
        let stmt = compile_select("t", &live(&["id"]), &query, &[]);
        assert_eq!(
            stmt.sql,
            format!(r#"SELECT "id" FROM "t" LIMIT {max} OFFSET {max}"#, max = i64::MAX)
        );
    }

    #[test]
    fn invalid_direction_normalizes_to_ascending() {
        assert_eq!(Direction::parse("up"), Direction::Asc);
        assert_eq!(Direction::parse(""), Direction::Asc);
        assert_eq!(Direction::parse(" desc "), Direction::Desc);
        assert_eq!(Direction::parse("ASC"), Direction::Asc);
    }

    #[test]
    fn update_and_filter_parameters_do_not_collide() {
        let stmt = compile_update(
            "people",
            &[("id".to_string(), text("dog"))],
            &[("id".to_string(), text("cat"))],
        );
        assert_eq!(stmt.sql, r#"UPDATE "people" SET "id" = :set_id WHERE "id" = :where_id"#);
        assert_eq!(
            stmt.params,
            vec![(":set_id".to_string(), text("dog")), (":where_id".to_string(), text("cat"))]
        );
    }

    #[test]
    fn insert_binds_every_value() {
        let stmt = compile_insert(
            "people",
            &[("id".to_string(), text("cat")), ("data".to_string(), text("{}"))],
        );
        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "people" ("id", "data") VALUES (:insert_id, :insert_data)"#
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn empty_filter_has_no_where_clause() {
        assert_eq!(compile_delete("t", &[]).sql, r#"DELETE FROM "t""#);
        assert_eq!(compile_exists("t", &[]).sql, r#"SELECT EXISTS(SELECT 1 FROM "t")"#);
    }

    #[test]
    fn filter_insert_replaces_existing_field() {
        let filter = Filter::new().eq("id", "a").eq("id", "b");
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get("id"), Some(&Value::from("b")));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
