use std::sync::Arc;

use super::*;
use crate::backend::testing::ScriptedBackend;
use crate::backend::{BackendAdapter, ColumnMeta, RowSet, TypedValue};

fn three_tables() -> ScriptedBackend {
    ScriptedBackend::new("scripted").respond(|sql, _| {
        if !sql.contains("INFORMATION_SCHEMA.TABLES") {
            return None;
        }
        let mut rs = RowSet::with_columns(vec![
            ColumnMeta::new("TABLE_SCHEMA", types::VARCHAR),
            ColumnMeta::new("TABLE_NAME", types::VARCHAR),
            ColumnMeta::new("TABLE_TYPE", types::VARCHAR),
        ]);
        for (schema, name) in [("SQLUser", "Orders"), ("SQLUser", "Customers"), ("SQLUser", "Items"), ("%Dictionary", "Hidden")] {
            rs.rows.push(vec![TypedValue::text(schema), TypedValue::text(name), TypedValue::text("BASE TABLE")]);
        }
        Some(Ok(rs))
    })
}

/// customers(id PK, email UNIQUE) and orders(id PK, cust FK -> customers.id).
fn shop_schema() -> ScriptedBackend {
    fn rows(names: &[&str], data: &[&[&str]]) -> RowSet {
        let mut rs = RowSet::with_columns(names.iter().map(|n| ColumnMeta::new(*n, types::VARCHAR)).collect());
        rs.rows = data.iter().map(|r| r.iter().map(|c| TypedValue::text(*c)).collect()).collect();
        rs
    }
    ScriptedBackend::new("scripted").respond(|sql, _| {
        let rs = if sql.ends_with("INFORMATION_SCHEMA.TABLES") {
            rows(
                &["TABLE_SCHEMA", "TABLE_NAME", "TABLE_TYPE"],
                &[&["SQLUser", "Customers", "BASE TABLE"], &["SQLUser", "Orders", "BASE TABLE"]],
            )
        } else if sql.ends_with("INFORMATION_SCHEMA.COLUMNS") {
            rows(
                &["TABLE_SCHEMA", "TABLE_NAME", "COLUMN_NAME", "ORDINAL_POSITION", "DATA_TYPE", "IS_NULLABLE"],
                &[
                    &["SQLUser", "Customers", "ID", "1", "INTEGER", "NO"],
                    &["SQLUser", "Customers", "Email", "2", "VARCHAR", "YES"],
                    &["SQLUser", "Orders", "ID", "1", "INTEGER", "NO"],
                    &["SQLUser", "Orders", "Cust", "2", "INTEGER", "YES"],
                ],
            )
        } else if sql.ends_with("INFORMATION_SCHEMA.TABLE_CONSTRAINTS") {
            rows(
                &["TABLE_SCHEMA", "TABLE_NAME", "CONSTRAINT_SCHEMA", "CONSTRAINT_NAME", "CONSTRAINT_TYPE"],
                &[
                    &["SQLUser", "Customers", "SQLUser", "CustomersPK", "PRIMARY KEY"],
                    &["SQLUser", "Customers", "SQLUser", "CustEmail", "UNIQUE"],
                    &["SQLUser", "Orders", "SQLUser", "OrdersPK", "PRIMARY KEY"],
                    &["SQLUser", "Orders", "SQLUser", "OFK", "FOREIGN KEY"],
                ],
            )
        } else if sql.ends_with("INFORMATION_SCHEMA.KEY_COLUMN_USAGE") {
            rows(
                &["TABLE_SCHEMA", "TABLE_NAME", "CONSTRAINT_NAME", "COLUMN_NAME", "ORDINAL_POSITION"],
                &[
                    &["SQLUser", "Customers", "CustomersPK", "ID", "1"],
                    &["SQLUser", "Customers", "CustEmail", "Email", "1"],
                    &["SQLUser", "Orders", "OrdersPK", "ID", "1"],
                    &["SQLUser", "Orders", "OFK", "Cust", "1"],
                ],
            )
        } else if sql.ends_with("INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS") {
            rows(
                &["CONSTRAINT_SCHEMA", "CONSTRAINT_NAME", "UNIQUE_CONSTRAINT_SCHEMA", "UNIQUE_CONSTRAINT_NAME"],
                &[&["SQLUser", "OFK", "SQLUser", "CustomersPK"]],
            )
        } else {
            return None;
        };
        Some(Ok(rs))
    })
}

fn synthesizer(backend: ScriptedBackend) -> (CatalogSynthesizer, Arc<ScriptedBackend>) {
    let backend = Arc::new(backend);
    let adapter = Arc::new(BackendAdapter::new(backend.clone()));
    (CatalogSynthesizer::new(adapter, "SQLUser"), backend)
}

fn text_column(rs: &RowSet, idx: usize) -> Vec<String> {
    rs.rows.iter().map(|r| r[idx].to_text().map(|c| c.into_owned()).unwrap_or_default()).collect()
}

#[tokio::test]
async fn information_schema_tables_lists_user_tables_in_public() {
    let (cat, _) = synthesizer(three_tables());
    let session = SessionInfo::default();
    let out = cat
        .answer("SELECT table_name FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name", &[], &session)
        .await;
    assert!(out.notice.is_none(), "{:?}", out.notice);
    assert_eq!(text_column(&out.rows, 0), vec!["customers", "items", "orders"]);
    assert_eq!(out.rows.columns[0].type_oid, types::NAME);
}

#[tokio::test]
async fn pg_class_oids_are_stable_across_queries() {
    let (cat, _) = synthesizer(three_tables());
    let session = SessionInfo::default();
    let sql = "SELECT oid, relname FROM pg_catalog.pg_class WHERE relnamespace = 2200 AND relkind = 'r' ORDER BY relname";
    let first = cat.answer(sql, &[], &session).await;
    let second = cat.answer(sql, &[], &session).await;
    assert_eq!(first.rows.rows.len(), 3);
    assert_eq!(first.rows.rows, second.rows.rows);
    assert_eq!(first.rows.columns[0].type_oid, types::OID);
    let orders = first.rows.rows.iter().find(|r| r[1] == TypedValue::text("orders")).map(|r| r[0].clone());
    assert_eq!(orders, Some(TypedValue::Int(cat.oids().table_oid("public", "orders") as i64)));
}

#[tokio::test]
async fn regclass_literal_resolves_against_snapshot() {
    let (cat, _) = synthesizer(three_tables());
    let session = SessionInfo::default();
    let out = cat.answer("SELECT relname FROM pg_class WHERE oid = 'public.items'::regclass", &[], &session).await;
    assert!(out.notice.is_none(), "{:?}", out.notice);
    assert_eq!(text_column(&out.rows, 0), vec!["items"]);

    let missing = cat.answer("SELECT relname FROM pg_class WHERE oid = 'nope'::regclass", &[], &session).await;
    assert!(missing.rows.rows.is_empty());
    assert!(missing.notice.unwrap_or_default().contains("does not exist"));
}

#[tokio::test]
async fn constraints_distinguish_kinds_and_resolve_foreign_keys() {
    let (cat, _) = synthesizer(shop_schema());
    let session = SessionInfo::default();
    let out = cat
        .answer("SELECT conname, contype, conrelid, confrelid, conkey, confkey FROM pg_catalog.pg_constraint ORDER BY conname", &[], &session)
        .await;
    assert!(out.notice.is_none(), "{:?}", out.notice);
    assert_eq!(text_column(&out.rows, 0), vec!["custemail", "customerspk", "ofk", "orderspk"]);
    assert_eq!(text_column(&out.rows, 1), vec!["u", "p", "f", "p"]);

    let customers = TypedValue::Int(cat.oids().table_oid("public", "customers") as i64);
    let orders = TypedValue::Int(cat.oids().table_oid("public", "orders") as i64);
    let fk = &out.rows.rows[2];
    assert_eq!(fk[2], orders);
    assert_eq!(fk[3], customers);
    assert_eq!(fk[4].to_text().unwrap(), "{2}");
    assert_eq!(fk[5].to_text().unwrap(), "{1}");
    // only foreign keys point elsewhere
    let pk = &out.rows.rows[1];
    assert_eq!(pk[2], customers);
    assert_eq!(pk[3], TypedValue::Int(0));
    assert!(pk[5].is_null());

    let def = cat
        .answer("SELECT pg_get_constraintdef(oid) FROM pg_constraint WHERE contype = 'f'", &[], &session)
        .await;
    assert_eq!(text_column(&def.rows, 0), vec!["FOREIGN KEY (cust) REFERENCES customers(id)"]);
}

#[tokio::test]
async fn any_array_filters_builtin_types() {
    let (cat, backend) = synthesizer(ScriptedBackend::new("scripted"));
    let session = SessionInfo::default();
    let out = cat
        .answer("SELECT typname FROM pg_type WHERE oid = ANY($1) ORDER BY oid", &[TypedValue::text("{23,25}")], &session)
        .await;
    assert_eq!(text_column(&out.rows, 0), vec!["int4", "text"]);
    // builtin types need no metadata
    assert!(backend.calls.lock().is_empty());
}

#[tokio::test]
async fn unsupported_shapes_answer_empty_with_notice() {
    let (cat, _) = synthesizer(three_tables());
    let session = SessionInfo::default();
    let out = cat
        .answer("SELECT c.relname FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace", &[], &session)
        .await;
    assert!(out.rows.rows.is_empty());
    assert!(out.notice.is_some());
}

#[tokio::test]
async fn fromless_session_functions_and_count() {
    let (cat, backend) = synthesizer(three_tables());
    let session = SessionInfo { database: "shop".into(), ..Default::default() };
    let out = cat.answer("SELECT current_database()", &[], &session).await;
    assert_eq!(out.rows.rows, vec![vec![TypedValue::text("shop")]]);
    assert!(backend.calls.lock().is_empty());

    let out = cat.answer("SELECT count(*) FROM pg_namespace WHERE nspname = 'pg_catalog'", &[], &session).await;
    assert_eq!(out.rows.columns[0].type_oid, types::INT8);
    assert_eq!(out.rows.rows, vec![vec![TypedValue::Int(1)]]);
}

#[test]
fn describe_reports_shape_without_backend() {
    let (cat, backend) = synthesizer(three_tables());
    let cols = cat.describe("SELECT oid, relname AS name FROM pg_class WHERE oid = 'x'::regclass", &SessionInfo::default()).unwrap();
    assert_eq!(cols, vec![ColumnMeta::new("oid", types::OID), ColumnMeta::new("name", types::NAME)]);
    assert!(backend.calls.lock().is_empty());
}
