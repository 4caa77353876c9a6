use super::*;

fn tr() -> Translator { Translator::default() }

fn sql(input: &str) -> String { tr().translate(input, &[]).unwrap().sql }

#[test]
fn simple_select_passes_through() {
    let r = tr().translate("SELECT 1", &[]).unwrap();
    assert_eq!(r.sql, "SELECT 1");
    assert!(!r.catalog);
    assert_eq!(r.kind, StatementKind::Select);
    assert!(r.rules_applied.is_empty());
}

#[test]
fn prepared_distance_query_scenario() {
    let r = tr().translate("SELECT id FROM docs ORDER BY distance(embedding, $1) LIMIT 5", &[]).unwrap();
    assert_eq!(r.sql, "SELECT id FROM docs ORDER BY VECTOR_COSINE(embedding, TO_VECTOR(?, FLOAT)) DESC LIMIT 5");
    assert_eq!(r.param_order, vec![0]);
    assert_eq!(r.client_param_count, 1);
}

#[test]
fn pgvector_cast_and_operator() {
    let r = tr()
        .translate("SELECT id FROM public.docs ORDER BY embedding <=> $1::vector(3) LIMIT 2", &[])
        .unwrap();
    assert_eq!(r.sql, "SELECT id FROM SQLUser.docs ORDER BY VECTOR_COSINE(embedding, TO_VECTOR(?, FLOAT)) DESC LIMIT 2");
    assert_eq!(r.param_hints[0].vector_dim, Some(3));
    assert_eq!(r.vector_dim_for_client_param(0), Some(3));
}

#[test]
fn transaction_commands() {
    assert_eq!(sql("begin"), "START TRANSACTION");
    assert_eq!(sql("END"), "COMMIT");
    assert_eq!(sql("ABORT;"), "ROLLBACK");
    assert_eq!(tr().translate("rollback to savepoint s1", &[]).unwrap().kind, StatementKind::RollbackToSavepoint);
}

#[test]
fn string_contents_are_never_rewritten() {
    assert_eq!(sql("SELECT 'begin', 'x::int', 'a <=> b', '$1' FROM t"), "SELECT 'begin', 'x::int', 'a <=> b', '$1' FROM t");
}

#[test]
fn parameter_hints_merge_parse_types_and_casts() {
    let r = tr().translate("SELECT * FROM t WHERE a = $1 AND b = $2::int8", &[25]).unwrap();
    assert_eq!(r.sql, "SELECT * FROM t WHERE a = ? AND b = CAST(? AS BIGINT)");
    assert_eq!(r.param_hints[0].type_oid, 25);
    assert_eq!(r.param_hints[1].type_oid, 20);
}

#[test]
fn bind_reorders_and_duplicates_values() {
    let r = tr().translate("SELECT * FROM t WHERE a = $2 OR b = $1 OR c = $2", &[]).unwrap();
    let bound = r.bind(&[TypedValue::Int(1), TypedValue::Int(2)]).unwrap();
    assert_eq!(bound.params, vec![TypedValue::Int(2), TypedValue::Int(1), TypedValue::Int(2)]);
    assert!(r.params.is_empty());
    assert!(r.bind(&[TypedValue::Int(1)]).is_err());
}

#[test]
fn catalog_statements_keep_client_text() {
    let input = "SELECT c.oid, c.relname FROM pg_catalog.pg_class c WHERE c.relnamespace = $1";
    let r = tr().translate(input, &[]).unwrap();
    assert!(r.catalog);
    assert_eq!(r.sql, input);
    assert_eq!(r.client_param_count, 1);
}

#[test]
fn ddl_vector_columns() {
    assert_eq!(
        sql("CREATE TABLE public.docs (id INT PRIMARY KEY, embedding VECTOR(128), ok BOOLEAN DEFAULT TRUE)"),
        "CREATE TABLE SQLUser.docs (id INT PRIMARY KEY, embedding VECTOR(FLOAT, 128), ok BOOLEAN DEFAULT 1)"
    );
}

#[test]
fn unterminated_literal_is_translation_error() {
    let err = tr().translate("SELECT 'abc", &[]).unwrap_err();
    assert_eq!(err.pgwire_fields().0, "42601");
}

#[test]
fn translation_is_idempotent() {
    let inputs = [
        "SELECT 1",
        "SELECT id FROM docs ORDER BY distance(embedding, $1) LIMIT 5",
        "SELECT id, embedding <=> $1 AS d FROM public.docs WHERE active = true ORDER BY d LIMIT 10",
        "SELECT * FROM t WHERE x = $2::text AND y <-> '[1,2,3]' < 0.5 AND z = $1",
        "INSERT INTO docs (id, embedding) VALUES ($1, $2::vector)",
        "BEGIN ISOLATION LEVEL SERIALIZABLE",
        "UPDATE t SET updated = NOW() WHERE id = $1",
        "CREATE TABLE v (e VECTOR(4))",
        "SELECT a <#> b FROM t ORDER BY a <#> b DESC",
    ];
    for input in inputs {
        let once = sql(input);
        assert_eq!(sql(&once), once, "not a fixed point: {}", input);
    }
}

#[test]
fn order_by_alias_of_distance() {
    assert_eq!(
        sql("SELECT id, embedding <=> $1 AS d FROM docs ORDER BY d LIMIT 10"),
        "SELECT id, (1 - VECTOR_COSINE(embedding, TO_VECTOR(?, FLOAT))) AS d FROM docs ORDER BY VECTOR_COSINE(embedding, TO_VECTOR(?, FLOAT)) DESC LIMIT 10"
    );
}

#[test]
fn statements_split_outside_literals() {
    let parts = split_statements("SELECT 'a;b'; SELECT 2;; ").unwrap();
    assert_eq!(parts, vec!["SELECT 'a;b'".to_string(), " SELECT 2".to_string()]);
}
