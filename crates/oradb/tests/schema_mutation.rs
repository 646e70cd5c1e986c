use oradb::{
    Column, SchemaChange, SkipReason, Store, StoreError, ValidationError, PLACEHOLDER_COLUMN,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn names(table: &oradb::Table<'_>) -> Vec<String> {
    table.column_names().expect("list columns")
}

#[test]
fn removing_the_only_column_leaves_the_placeholder() {
    let store = Store::open_in_memory().expect("open store");
    let table = store
        .open_table_with("singlecol", &[Column::new("x", "TEXT")])
        .expect("open table");

    let change = table.remove_column("x").expect("remove x");
    assert_eq!(change, SchemaChange::Applied);
    assert_eq!(names(&table), vec![PLACEHOLDER_COLUMN.to_string()]);
    assert!(!table.has_column("x").expect("has x"));
}

#[test]
fn repeated_removal_never_empties_a_table() {
    let store = Store::open_in_memory().expect("open store");
    let table = store
        .open_table_with("t", &[Column::new("a", "TEXT"), Column::new("b", "JSON")])
        .expect("open table");

    for name in ["a", "b", PLACEHOLDER_COLUMN, "b", PLACEHOLDER_COLUMN] {
        table.remove_column(name).expect("remove column");
        assert!(!table.columns().expect("columns").is_empty());
    }
    assert_eq!(names(&table), vec![PLACEHOLDER_COLUMN.to_string()]);
    assert_eq!(
        table.remove_column(PLACEHOLDER_COLUMN).expect("remove placeholder"),
        SchemaChange::Skipped(SkipReason::LastColumn)
    );
}

#[test]
fn adding_a_real_column_drops_the_placeholder() {
    let store = Store::open_in_memory().expect("open store");
    let table = store
        .open_table_with("t", &[Column::new("x", "TEXT")])
        .expect("open table");
    table.remove_column("x").expect("remove x");

    table.add_column("y", "json").expect("add y");
    let columns = table.columns().expect("columns");
    assert_eq!(columns, vec![Column::new("y", "JSON")]);
}

#[test]
fn add_and_remove_are_idempotent() {
    let store = Store::open_in_memory().expect("open store");
    let table = store.open_table("people").expect("open table");

    assert_eq!(table.add_column("age", "TEXT").unwrap(), SchemaChange::Applied);
    assert_eq!(
        table.add_column("age", "TEXT").unwrap(),
        SchemaChange::Skipped(SkipReason::ColumnExists)
    );
    assert_eq!(names(&table), vec!["id", "data", "age"]);

    assert_eq!(
        table.remove_column("missing").unwrap(),
        SchemaChange::Skipped(SkipReason::ColumnMissing)
    );
    assert_eq!(table.remove_column("age").unwrap(), SchemaChange::Applied);
    assert_eq!(names(&table), vec!["id", "data"]);
}

#[test]
fn columns_reflect_changes_immediately() {
    let store = Store::open_in_memory().expect("open store");
    let table = store.open_table("people").expect("open table");

    assert!(!table.has_column("score").unwrap());
    table.add_column("score", "TEXT").unwrap();
    assert!(table.has_column("score").unwrap());
    assert_eq!(
        table.column("score").unwrap(),
        Some(Column::new("score", "TEXT"))
    );
}

#[test]
fn rename_preserves_data_and_skips_missing_columns() {
    let store = Store::open_in_memory().expect("open store");
    let table = store.open_table("people").expect("open table");
    let cat = oradb::Filter::new().eq("id", "cat");
    table
        .set_values(&cat, [("id".to_string(), json!("cat")), ("data".to_string(), json!({"age": 1}))])
        .expect("insert");

    assert_eq!(table.rename_column("data", "doc").unwrap(), SchemaChange::Applied);
    assert_eq!(names(&table), vec!["id", "doc"]);
    assert_eq!(table.get("doc", &cat).unwrap(), Some(json!({"age": 1})));

    assert_eq!(
        table.rename_column("data", "other").unwrap(),
        SchemaChange::Skipped(SkipReason::ColumnMissing)
    );
}

#[test]
fn retype_discards_existing_values() {
    let store = Store::open_in_memory().expect("open store");
    let table = store.open_table("people").expect("open table");
    let cat = oradb::Filter::new().eq("id", "cat");
    table
        .set_values(&cat, [("id".to_string(), json!("cat")), ("data".to_string(), json!({"age": 1}))])
        .expect("insert");

    assert_eq!(
        table.retype_column("data", "json").unwrap(),
        SchemaChange::Skipped(SkipReason::TypeUnchanged)
    );
    assert_eq!(table.retype_column("data", "BINARY").unwrap(), SchemaChange::Applied);
    assert_eq!(table.column("data").unwrap(), Some(Column::new("data", "BINARY")));
    assert_eq!(table.get("data", &cat).unwrap(), None);
    assert_eq!(table.count().unwrap(), 1);
}

#[test]
fn retype_of_the_only_column_keeps_the_table_valid() {
    let store = Store::open_in_memory().expect("open store");
    let table = store
        .open_table_with("t", &[Column::new("x", "TEXT")])
        .expect("open table");

    table.retype_column("x", "JSON").expect("retype");
    assert_eq!(table.columns().unwrap(), vec![Column::new("x", "JSON")]);
}

#[test]
fn missing_names_are_validation_errors() {
    let store = Store::open_in_memory().expect("open store");

    let err = store.open_table("").expect_err("empty table name");
    assert!(matches!(err, StoreError::Validation(ValidationError::MissingTableName)));

    let err = store.prepare_table("t", &[]).expect_err("no columns");
    assert!(matches!(err, StoreError::Validation(ValidationError::EmptyColumnList)));

    let table = store.open_table("t").expect("open table");
    let err = table.add_column(" ", "TEXT").expect_err("empty column name");
    assert!(matches!(err, StoreError::Validation(ValidationError::MissingColumnName)));

    let err = table.add_columns(&[]).expect_err("empty batch");
    assert!(matches!(err, StoreError::Validation(ValidationError::EmptyColumnList)));
}

#[test]
fn batches_apply_column_by_column() {
    let store = Store::open_in_memory().expect("open store");
    let table = store.open_table("t").expect("open table");

    let changes = table
        .add_columns(&[Column::new("a", "TEXT"), Column::new("id", "TEXT")])
        .expect("add batch");
    assert_eq!(
        changes,
        vec![SchemaChange::Applied, SchemaChange::Skipped(SkipReason::ColumnExists)]
    );

    // The second removal fails (empty name); the first one stays applied.
    let err = table.remove_columns(&["a", ""]).expect_err("bad batch");
    assert!(matches!(err, StoreError::Validation(ValidationError::MissingColumnName)));
    assert!(!table.has_column("a").unwrap());
}

#[test]
fn ensure_table_does_not_reconcile_existing_schema() {
    let store = Store::open_in_memory().expect("open store");
    store.open_table("people").expect("open table");

    let change = store
        .prepare_table("people", &[Column::new("other", "TEXT")])
        .expect("prepare again");
    assert_eq!(change, SchemaChange::Skipped(SkipReason::TableExists));
    let table = store.open_table("people").unwrap();
    assert_eq!(names(&table), vec!["id", "data"]);
}
