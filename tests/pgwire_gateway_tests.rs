use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{pin_mut, SinkExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

use wiregate::backend::{Backend, BackendAdapter, BackendCapabilities, ColumnMeta, RowSet, TypedValue};
use wiregate::config::GatewayConfig;
use wiregate::error::BackendError;
use wiregate::pgwire_server::security::{hash_password, Authenticator, PasswordFileAuthenticator, TrustAuthenticator};
use wiregate::pgwire_server::{serve, Gateway};
use wiregate::system_catalog::types;

/// Stand-in for the SQL backend: a few fixed answers plus a call log.
#[derive(Default)]
struct DocsBackend {
    calls: Mutex<Vec<(String, Vec<TypedValue>)>>,
}

impl DocsBackend {
    fn last_matching(&self, prefix: &str) -> Option<(String, Vec<TypedValue>)> {
        self.calls.lock().iter().rev().find(|(s, _)| s.starts_with(prefix)).cloned()
    }
}

impl Backend for DocsBackend {
    fn name(&self) -> &str { "docs" }

    fn capabilities(&self) -> BackendCapabilities { BackendCapabilities { max_param_bytes: None, transactional: true } }

    fn execute(&self, sql: &str, params: &[TypedValue]) -> Result<RowSet, BackendError> {
        self.calls.lock().push((sql.to_string(), params.to_vec()));
        if sql == "SELECT 1" {
            return Ok(RowSet::single("?column?", types::INT4, TypedValue::Int(1)));
        }
        if sql.contains("missing") {
            return Err(BackendError::new("-30", "Table 'SQLUSER.MISSING' not found"));
        }
        if sql.starts_with("SELECT id FROM docs") {
            let mut rs = RowSet::with_columns(vec![ColumnMeta::new("id", types::INT4)]);
            rs.rows = (1..=5).map(|i| vec![TypedValue::Int(i)]).collect();
            return Ok(rs);
        }
        if sql.contains("INFORMATION_SCHEMA.TABLES") {
            let mut rs = RowSet::with_columns(vec![
                ColumnMeta::new("TABLE_SCHEMA", types::VARCHAR),
                ColumnMeta::new("TABLE_NAME", types::VARCHAR),
                ColumnMeta::new("TABLE_TYPE", types::VARCHAR),
            ]);
            for name in ["Orders", "Customers", "Items"] {
                rs.rows.push(vec![TypedValue::text("SQLUser"), TypedValue::text(name), TypedValue::text("BASE TABLE")]);
            }
            return Ok(rs);
        }
        if sql.starts_with("INSERT") {
            return Ok(RowSet::affected(1));
        }
        Ok(RowSet::affected(0))
    }

    fn describe(&self, sql: &str, _param_count: usize) -> Result<Option<Vec<ColumnMeta>>, BackendError> {
        if sql == "SELECT 1" {
            return Ok(Some(vec![ColumnMeta::new("?column?", types::INT4)]));
        }
        if sql.starts_with("SELECT id FROM docs") {
            return Ok(Some(vec![ColumnMeta::new("id", types::INT4)]));
        }
        Ok(None)
    }
}

struct Guard(JoinHandle<()>);
impl Drop for Guard {
    fn drop(&mut self) { self.0.abort(); }
}

async fn start_gateway(backend: Arc<DocsBackend>, authenticator: Arc<dyn Authenticator>) -> (Guard, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind 127.0.0.1:0");
    let port = listener.local_addr().unwrap().port();
    let config = GatewayConfig { bind: format!("127.0.0.1:{}", port), ..GatewayConfig::default() };
    let gw = Arc::new(Gateway::new(config, Arc::new(BackendAdapter::new(backend)), authenticator));
    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, gw).await {
            eprintln!("gateway task error: {e:?}");
        }
    });
    (Guard(handle), port)
}

async fn connect(port: u16, password: Option<&str>) -> Result<Client, tokio_postgres::Error> {
    let mut cfg = tokio_postgres::Config::new();
    cfg.host("127.0.0.1").port(port).user("tester").dbname("vectors").connect_timeout(Duration::from_secs(3));
    if let Some(pw) = password {
        cfg.password(pw);
    }
    let (client, connection) = cfg.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn trusted() -> (Guard, Client, Arc<DocsBackend>) {
    let backend = Arc::new(DocsBackend::default());
    let (guard, port) = start_gateway(backend.clone(), Arc::new(TrustAuthenticator)).await;
    let client = connect(port, None).await.expect("connect");
    (guard, client, backend)
}

fn simple_rows(messages: &[SimpleQueryMessage]) -> Vec<Vec<Option<String>>> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some((0..r.len()).map(|i| r.get(i).map(str::to_string)).collect()),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn select_one_over_both_protocols() {
    let (_g, client, _) = trusted().await;

    let msgs = client.simple_query("SELECT 1").await.expect("simple query");
    assert_eq!(simple_rows(&msgs), vec![vec![Some("1".to_string())]]);
    assert!(msgs.iter().any(|m| matches!(m, SimpleQueryMessage::CommandComplete(1))));

    let row = client.query_one("SELECT 1", &[]).await.expect("extended query");
    assert_eq!(row.get::<_, i32>(0), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prepared_vector_search_reaches_backend_as_literal() {
    let (_g, client, backend) = trusted().await;
    let v: Vec<String> = (0..128).map(|i| format!("{}", (i as f32) / 128.0)).collect();
    let vector = format!("[{}]", v.join(","));

    let stmt = client.prepare("SELECT id FROM docs ORDER BY embedding <=> $1 LIMIT 5").await.expect("prepare");
    assert_eq!(stmt.params(), &[tokio_postgres::types::Type::TEXT]);
    assert_eq!(stmt.columns().len(), 1);
    let rows = client.query(&stmt, &[&vector]).await.expect("query");
    assert_eq!(rows.iter().map(|r| r.get::<_, i32>(0)).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

    let (sql, params) = backend.last_matching("SELECT id FROM docs").expect("backend saw the query");
    assert!(params.is_empty(), "vector should be inlined, got params {:?}", params);
    assert!(sql.starts_with("SELECT id FROM docs ORDER BY VECTOR_COSINE(embedding, TO_VECTOR('["), "{}", sql);
    assert!(sql.ends_with("]', FLOAT)) DESC LIMIT 5"), "{}", sql);
    let literal = &sql[sql.find("'[").unwrap() + 2..sql.find("]'").unwrap()];
    assert_eq!(literal.split(',').count(), 128);

    let msgs = client.simple_query("SHOW wiregate.vector_stats").await.expect("stats");
    let json = simple_rows(&msgs)[0][0].clone().expect("stats value");
    let stats: serde_json::Value = serde_json::from_str(&json).expect("stats json");
    assert!(stats["total_calls"].as_u64().unwrap_or(0) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn catalog_lists_backend_tables_as_public() {
    let (_g, client, _) = trusted().await;
    let rows = client
        .query("SELECT table_name FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name", &[])
        .await
        .expect("catalog query");
    let names: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    assert_eq!(names, vec!["customers", "items", "orders"]);

    let msgs = client
        .simple_query("SELECT relname FROM pg_catalog.pg_class WHERE relkind = 'r' AND relnamespace = 2200 ORDER BY relname")
        .await
        .expect("pg_class");
    assert_eq!(simple_rows(&msgs).len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_transaction_until_rollback() {
    let (_g, client, _) = trusted().await;
    client.batch_execute("BEGIN").await.expect("begin");

    let err = client.simple_query("SELECT * FROM missing").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::UNDEFINED_TABLE));

    let err = client.query("SELECT 1", &[]).await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::IN_FAILED_SQL_TRANSACTION));

    client.batch_execute("ROLLBACK").await.expect("rollback");
    let row = client.query_one("SELECT 1", &[]).await.expect("usable after rollback");
    assert_eq!(row.get::<_, i32>(0), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn copy_in_loads_through_inserts() {
    let (_g, client, backend) = trusted().await;
    let sink = client.copy_in::<_, &'static [u8]>("COPY items (id, name) FROM STDIN WITH (FORMAT csv)").await.expect("copy in");
    pin_mut!(sink);
    sink.send(&b"1,alpha\n2,"[..]).await.expect("chunk 1");
    sink.send(&b"beta\n3,\n"[..]).await.expect("chunk 2");
    let n = sink.finish().await.expect("finish");
    assert_eq!(n, 3);

    let (sql, params) = backend.last_matching("INSERT").expect("insert issued");
    assert_eq!(sql, "INSERT INTO items (id, name) VALUES (?, ?)");
    assert_eq!(params, vec![TypedValue::text("3"), TypedValue::Null]);
    let commits = backend.calls.lock().iter().filter(|(s, _)| s == "COMMIT").count();
    assert_eq!(commits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn password_file_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.json");
    let mut users = HashMap::new();
    users.insert("tester".to_string(), hash_password("s3cret").unwrap());
    std::fs::write(&path, serde_json::to_string(&users).unwrap()).unwrap();
    let auth = PasswordFileAuthenticator::load(path.to_str().unwrap()).unwrap();

    let (_g, port) = start_gateway(Arc::new(DocsBackend::default()), Arc::new(auth)).await;
    let client = connect(port, Some("s3cret")).await.expect("correct password");
    assert_eq!(client.query_one("SELECT 1", &[]).await.unwrap().get::<_, i32>(0), 1);

    let err = connect(port, Some("wrong")).await.err().expect("wrong password rejected");
    assert_eq!(err.code(), Some(&SqlState::INVALID_PASSWORD));
}
