use std::sync::Arc;

use tokio::io::{AsyncWriteExt, DuplexStream};

use super::codec::{self, BackendMessage, FrontendMessage, StartupMessage, PROTOCOL_V3, SSL_REQUEST_CODE};
use super::encodedecode::{decode_numeric, decode_param, encode_cell, encode_numeric};
use super::security::TrustAuthenticator;
use super::session::run_session;
use super::Gateway;
use crate::backend::testing::ScriptedBackend;
use crate::backend::{BackendAdapter, ColumnMeta, RowSet, TypedValue};
use crate::config::GatewayConfig;
use crate::error::BackendError;
use crate::system_catalog::types;

type Frame = (u8, Vec<u8>);

fn docs_backend() -> Arc<ScriptedBackend> { Arc::new(docs_script()) }

/// Same answers, but every statement commits on its own like the REST backend.
fn autocommit_backend() -> Arc<ScriptedBackend> {
    let mut backend = docs_script();
    backend.transactional = false;
    Arc::new(backend)
}

fn docs_script() -> ScriptedBackend {
    ScriptedBackend::new("scripted")
        .respond(|sql, _| (sql == "SELECT 1").then(|| Ok(RowSet::single("?column?", types::INT4, TypedValue::Int(1)))))
        .respond(|sql, _| sql.contains("missing").then(|| Err(BackendError::new("-30", "Table 'SQLUSER.MISSING' not found"))))
        .respond(|sql, _| {
            if !sql.starts_with("SELECT id FROM docs") {
                return None;
            }
            let mut rs = RowSet::with_columns(vec![ColumnMeta::new("id", types::INT4)]);
            for i in 1..=3 {
                rs.rows.push(vec![TypedValue::Int(i)]);
            }
            Some(Ok(rs))
        })
}

fn gateway(backend: Arc<ScriptedBackend>) -> Arc<Gateway> {
    let config = GatewayConfig { trust: true, ..GatewayConfig::default() };
    Arc::new(Gateway::new(config, Arc::new(BackendAdapter::new(backend)), Arc::new(TrustAuthenticator)))
}

fn startup_packet(user: &str) -> Vec<u8> {
    let mut body = PROTOCOL_V3.to_be_bytes().to_vec();
    for (k, v) in [("user", user), ("database", "vectors")] {
        codec::put_cstr(&mut body, k);
        codec::put_cstr(&mut body, v);
    }
    body.push(0);
    let mut out = ((body.len() + 4) as i32).to_be_bytes().to_vec();
    out.extend_from_slice(&body);
    out
}

async fn send(client: &mut DuplexStream, msgs: &[FrontendMessage]) {
    let mut buf = Vec::new();
    for m in msgs {
        m.encode(&mut buf);
    }
    client.write_all(&buf).await.unwrap();
}

/// Frames up to and including the next ReadyForQuery.
async fn until_ready(client: &mut DuplexStream) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        let frame = codec::read_frame(client).await.unwrap().expect("connection closed before ReadyForQuery");
        let done = frame.0 == b'Z';
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

async fn connect(gw: Arc<Gateway>) -> (DuplexStream, Vec<Frame>) {
    let (mut client, server) = tokio::io::duplex(256 * 1024);
    tokio::spawn(async move {
        let _ = run_session(server, gw, 7, "test").await;
    });
    client.write_all(&startup_packet("alice")).await.unwrap();
    let hello = until_ready(&mut client).await;
    (client, hello)
}

fn tags(frames: &[Frame]) -> String { frames.iter().map(|(t, _)| *t as char).collect() }

fn cstr(body: &[u8]) -> String {
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// One field of an ErrorResponse / NoticeResponse body.
fn field(body: &[u8], code: u8) -> String {
    let mut i = 0;
    while i < body.len() && body[i] != 0 {
        let tag = body[i];
        let value = cstr(&body[i + 1..]);
        if tag == code {
            return value;
        }
        i += 1 + value.len() + 1;
    }
    String::new()
}

fn error_code(body: &[u8]) -> String { field(body, b'C') }

fn tx_verbs(backend: &ScriptedBackend) -> Vec<String> {
    backend
        .calls
        .lock()
        .iter()
        .map(|(s, _)| s.clone())
        .filter(|s| matches!(s.as_str(), "START TRANSACTION" | "COMMIT" | "ROLLBACK"))
        .collect()
}

fn first_cell(data_row: &[u8]) -> Option<Vec<u8>> {
    let len = i32::from_be_bytes([data_row[2], data_row[3], data_row[4], data_row[5]]);
    (len >= 0).then(|| data_row[6..6 + len as usize].to_vec())
}

fn query(sql: &str) -> FrontendMessage { FrontendMessage::Query(sql.to_string()) }

#[test]
fn frontend_frames_decode() {
    let mut buf = Vec::new();
    FrontendMessage::Bind {
        portal: "p".into(),
        statement: "s".into(),
        param_formats: vec![1],
        params: vec![Some(5i32.to_be_bytes().to_vec()), None],
        result_formats: vec![],
    }
    .encode(&mut buf);
    assert_eq!(buf[0], b'B');
    let msg = FrontendMessage::decode(buf[0], &buf[5..]).unwrap();
    match msg {
        FrontendMessage::Bind { portal, params, .. } => {
            assert_eq!(portal, "p");
            assert_eq!(params[1], None);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn invalid_utf8_text_is_refused_not_replaced() {
    let err = FrontendMessage::decode(b'Q', b"SELECT '\xff'\0").unwrap_err();
    let (code, severity, message) = err.pgwire_fields();
    assert_eq!((code, severity), ("22021", "ERROR"));
    assert_eq!(message, "invalid byte sequence for encoding \"UTF8\": 0xff");
    assert!(!err.is_fatal());
}

#[test]
fn malformed_frames_are_protocol_errors() {
    // Parse with a missing terminator
    let err = FrontendMessage::decode(b'P', b"name\0SELECT").unwrap_err();
    assert_eq!(err.pgwire_fields().0, "08P01");
    let err = FrontendMessage::decode(b'~', b"").unwrap_err();
    assert!(err.to_string().contains("unknown message type"));
    let err = FrontendMessage::decode(b'D', b"Xname\0").unwrap_err();
    assert!(err.is_fatal());
    // trailing garbage after Execute
    assert!(FrontendMessage::decode(b'E', b"\0\0\0\0\0\xff").is_err());
}

#[test]
fn startup_variants() {
    assert_eq!(codec::decode_startup(&SSL_REQUEST_CODE.to_be_bytes()).unwrap(), StartupMessage::SslRequest);
    let mut cancel = codec::CANCEL_REQUEST_CODE.to_be_bytes().to_vec();
    cancel.extend_from_slice(&42i32.to_be_bytes());
    cancel.extend_from_slice(&(-9i32).to_be_bytes());
    assert_eq!(codec::decode_startup(&cancel).unwrap(), StartupMessage::Cancel { pid: 42, secret: -9 });
    assert!(codec::decode_startup(&196608i32.wrapping_sub(1).to_be_bytes()).is_err());
}

#[test]
fn backend_error_frame_carries_sqlstate() {
    let mut buf = Vec::new();
    let e = crate::error::GatewayError::FailedTransaction;
    BackendMessage::ErrorResponse(codec::ErrorFields::from(&e)).encode(&mut buf);
    assert_eq!(buf[0], b'E');
    assert_eq!(error_code(&buf[5..]), "25P02");
}

#[test]
fn numeric_binary_form() {
    for text in ["0", "12345.678", "-0.0042", "100000000"] {
        let bytes = encode_numeric(text).unwrap();
        assert_eq!(decode_numeric(&bytes).unwrap(), text);
    }
    assert!(encode_numeric("12a").is_none());
}

#[test]
fn binary_float_array_param_becomes_vector_text() {
    let mut raw = Vec::new();
    raw.extend_from_slice(&1i32.to_be_bytes()); // ndim
    raw.extend_from_slice(&0i32.to_be_bytes()); // has nulls
    raw.extend_from_slice(&types::FLOAT4.to_be_bytes());
    raw.extend_from_slice(&3i32.to_be_bytes());
    raw.extend_from_slice(&1i32.to_be_bytes());
    for f in [0.5f32, -1.0, 2.25] {
        raw.extend_from_slice(&4i32.to_be_bytes());
        raw.extend_from_slice(&f.to_be_bytes());
    }
    let v = decode_param(0, Some(&raw), 1, types::FLOAT4_ARRAY).unwrap();
    assert_eq!(v, TypedValue::text("[0.5,-1,2.25]"));
    assert_eq!(decode_param(0, Some(b"{1,2}"), 0, types::FLOAT8_ARRAY).unwrap(), TypedValue::text("[1,2]"));
    assert_eq!(decode_param(0, None, 1, types::INT4).unwrap(), TypedValue::Null);
}

#[test]
fn text_bool_cells_render_as_t_f() {
    assert_eq!(encode_cell(&TypedValue::Int(1), types::BOOL, 0).unwrap(), Some(b"t".to_vec()));
    assert_eq!(encode_cell(&TypedValue::Null, types::TEXT, 0).unwrap(), None);
}

#[tokio::test]
async fn startup_announces_session() {
    let (_client, hello) = connect(gateway(docs_backend())).await;
    assert_eq!(hello[0], (b'R', 0i32.to_be_bytes().to_vec()));
    let params: Vec<(String, String)> = hello
        .iter()
        .filter(|(t, _)| *t == b'S')
        .map(|(_, b)| {
            let k = cstr(b);
            let v = cstr(&b[k.len() + 1..]);
            (k, v)
        })
        .collect();
    assert!(params.contains(&("server_version".into(), "16.0".into())));
    assert!(params.contains(&("client_encoding".into(), "UTF8".into())));
    assert!(params.contains(&("session_authorization".into(), "alice".into())));
    assert!(hello.iter().any(|(t, b)| *t == b'K' && b.len() == 8));
    assert_eq!(hello.last().unwrap(), &(b'Z', vec![b'I']));
}

#[tokio::test]
async fn ssl_request_is_declined_then_startup_proceeds() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = run_session(server, gateway(docs_backend()), 8, "test").await;
    });
    let mut ssl = 8i32.to_be_bytes().to_vec();
    ssl.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    client.write_all(&ssl).await.unwrap();
    let mut answer = [0u8; 1];
    tokio::io::AsyncReadExt::read_exact(&mut client, &mut answer).await.unwrap();
    assert_eq!(&answer, b"N");
    client.write_all(&startup_packet("bob")).await.unwrap();
    assert_eq!(until_ready(&mut client).await.last().unwrap().1, vec![b'I']);
}

#[tokio::test]
async fn simple_select_streams_rows() {
    let backend = docs_backend();
    let (mut client, _) = connect(gateway(backend.clone())).await;
    send(&mut client, &[query("SELECT 1")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "TDCZ");
    assert_eq!(first_cell(&frames[1].1), Some(b"1".to_vec()));
    assert_eq!(cstr(&frames[2].1), "SELECT 1");
    assert_eq!(backend.last_call().unwrap().0, "SELECT 1");
}

#[tokio::test]
async fn empty_query_and_local_settings() {
    let backend = docs_backend();
    let (mut client, _) = connect(gateway(backend.clone())).await;
    send(&mut client, &[query("  ;  ")]).await;
    assert_eq!(tags(&until_ready(&mut client).await), "IZ");

    send(&mut client, &[query("SET application_name = 'loader'; SHOW application_name")]).await;
    let frames = until_ready(&mut client).await;
    // ParameterStatus for the reported setting, then the SHOW result
    assert_eq!(tags(&frames), "SCTDCZ");
    assert_eq!(first_cell(&frames[3].1), Some(b"loader".to_vec()));
    assert!(backend.calls.lock().is_empty());
}

#[tokio::test]
async fn failed_transaction_rejects_until_rollback() {
    let (mut client, _) = connect(gateway(docs_backend())).await;
    send(&mut client, &[query("BEGIN")]).await;
    assert_eq!(until_ready(&mut client).await.last().unwrap().1, vec![b'T']);

    send(&mut client, &[query("SELECT * FROM missing")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "EZ");
    assert_eq!(error_code(&frames[0].1), "42P01");
    assert_eq!(frames[1].1, vec![b'E']);

    send(&mut client, &[query("SELECT 1")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(error_code(&frames[0].1), "25P02");
    assert_eq!(frames[1].1, vec![b'E']);

    send(&mut client, &[query("ROLLBACK")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(cstr(&frames[0].1), "ROLLBACK");
    assert_eq!(frames[1].1, vec![b'I']);
}

#[tokio::test]
async fn errors_outside_a_transaction_stay_idle() {
    let (mut client, _) = connect(gateway(docs_backend())).await;
    send(&mut client, &[query("SELECT * FROM missing")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(error_code(&frames[0].1), "42P01");
    assert_eq!(frames[1].1, vec![b'I']);
}

#[tokio::test]
async fn multi_statement_writes_share_one_backend_transaction() {
    let backend = docs_backend();
    let (mut client, _) = connect(gateway(backend.clone())).await;
    send(&mut client, &[query("INSERT INTO items VALUES (1); SELECT * FROM missing")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "CEZ");
    assert_eq!(frames[2].1, vec![b'I']);
    assert_eq!(tx_verbs(&backend), vec!["START TRANSACTION", "ROLLBACK"]);
}

#[tokio::test]
async fn autocommit_backend_batch_failure_reports_committed_writes() {
    let backend = autocommit_backend();
    let (mut client, _) = connect(gateway(backend.clone())).await;
    send(&mut client, &[query("INSERT INTO items VALUES (1); SELECT * FROM missing")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "CENZ");
    assert_eq!(field(&frames[2].1, b'S'), "WARNING");
    assert!(field(&frames[2].1, b'M').starts_with("1 earlier statement(s)"), "{}", field(&frames[2].1, b'M'));
    assert!(tx_verbs(&backend).is_empty());
}

#[tokio::test]
async fn autocommit_backend_rollback_warns_instead_of_undoing() {
    let backend = autocommit_backend();
    let (mut client, _) = connect(gateway(backend.clone())).await;

    send(&mut client, &[query("BEGIN")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "NCZ");
    assert!(field(&frames[0].1, b'M').contains("not atomic"));
    assert_eq!(cstr(&frames[1].1), "BEGIN");
    assert_eq!(frames[2].1, vec![b'T']);

    send(&mut client, &[query("INSERT INTO items VALUES (1)")]).await;
    assert_eq!(tags(&until_ready(&mut client).await), "CZ");

    send(&mut client, &[query("ROLLBACK")]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "NCZ");
    assert_eq!(field(&frames[0].1, b'M'), "ROLLBACK cannot undo 1 statement(s) the backend already committed");
    assert_eq!(cstr(&frames[1].1), "ROLLBACK");
    assert_eq!(frames[2].1, vec![b'I']);

    // the block ended, so the next one starts clean
    send(&mut client, &[query("BEGIN"), query("ROLLBACK")]).await;
    assert_eq!(tags(&until_ready(&mut client).await), "NCZ");
    assert_eq!(tags(&until_ready(&mut client).await), "CZ");

    assert!(tx_verbs(&backend).is_empty());
    assert_eq!(backend.calls.lock().iter().filter(|(s, _)| s.starts_with("INSERT")).count(), 1);
}

fn raw_frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

#[tokio::test]
async fn invalid_utf8_query_errors_and_session_continues() {
    let (mut client, _) = connect(gateway(docs_backend())).await;
    client.write_all(&raw_frame(b'Q', b"SELECT '\xc3\x28'\0")).await.unwrap();
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "EZ");
    assert_eq!(error_code(&frames[0].1), "22021");

    // extended: the refused Parse poisons the batch up to Sync
    let mut buf = raw_frame(b'P', b"s\0SELECT \xff\0\0\0");
    FrontendMessage::Bind { portal: "".into(), statement: "s".into(), param_formats: vec![], params: vec![], result_formats: vec![] }
        .encode(&mut buf);
    FrontendMessage::Sync.encode(&mut buf);
    client.write_all(&buf).await.unwrap();
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "EZ");
    assert_eq!(error_code(&frames[0].1), "22021");

    send(&mut client, &[query("SELECT 1")]).await;
    assert_eq!(tags(&until_ready(&mut client).await), "TDCZ");
}

#[tokio::test]
async fn extended_flow_binds_typed_parameters() {
    let backend = docs_backend();
    let (mut client, _) = connect(gateway(backend.clone())).await;
    send(
        &mut client,
        &[
            FrontendMessage::Parse { name: "s1".into(), sql: "SELECT id FROM docs WHERE id > $1".into(), param_types: vec![types::INT4] },
            FrontendMessage::Describe { kind: b'S', name: "s1".into() },
            FrontendMessage::Bind {
                portal: "".into(),
                statement: "s1".into(),
                param_formats: vec![0],
                params: vec![Some(b"0".to_vec())],
                result_formats: vec![1],
            },
            FrontendMessage::Execute { portal: "".into(), max_rows: 0 },
            FrontendMessage::Sync,
        ],
    )
    .await;
    let frames = until_ready(&mut client).await;
    // ParseComplete, ParameterDescription, NoData, BindComplete, 3 rows, CommandComplete
    assert_eq!(tags(&frames), "1tn2DDDCZ");
    assert_eq!(frames[1].1, [1i16.to_be_bytes().as_slice(), types::INT4.to_be_bytes().as_slice()].concat());
    assert_eq!(first_cell(&frames[4].1), Some(1i32.to_be_bytes().to_vec()));
    assert_eq!(cstr(&frames[7].1), "SELECT 3");

    let (sql, params) = backend.last_call().unwrap();
    assert_eq!(sql, "SELECT id FROM docs WHERE id > ?");
    assert_eq!(params, vec![TypedValue::Int(0)]);
}

#[tokio::test]
async fn execute_with_row_limit_suspends_portal() {
    let (mut client, _) = connect(gateway(docs_backend())).await;
    send(
        &mut client,
        &[
            FrontendMessage::Parse { name: "".into(), sql: "SELECT id FROM docs".into(), param_types: vec![] },
            FrontendMessage::Bind { portal: "c".into(), statement: "".into(), param_formats: vec![], params: vec![], result_formats: vec![] },
            FrontendMessage::Execute { portal: "c".into(), max_rows: 2 },
            FrontendMessage::Execute { portal: "c".into(), max_rows: 2 },
            FrontendMessage::Sync,
        ],
    )
    .await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "12DDsDCZ");
    assert_eq!(cstr(&frames[6].1), "SELECT 1");
}

#[tokio::test]
async fn bind_errors_skip_to_sync() {
    let backend = docs_backend();
    let (mut client, _) = connect(gateway(backend.clone())).await;
    send(
        &mut client,
        &[
            FrontendMessage::Parse { name: "s".into(), sql: "SELECT id FROM docs WHERE id = $1".into(), param_types: vec![] },
            FrontendMessage::Bind { portal: "".into(), statement: "s".into(), param_formats: vec![], params: vec![], result_formats: vec![] },
            FrontendMessage::Execute { portal: "".into(), max_rows: 0 },
            FrontendMessage::Sync,
        ],
    )
    .await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "1EZ");
    assert_eq!(error_code(&frames[1].1), "42601");
    assert!(backend.calls.lock().is_empty());

    // the connection is still usable
    send(&mut client, &[query("SELECT 1")]).await;
    assert_eq!(tags(&until_ready(&mut client).await), "TDCZ");
}

#[tokio::test]
async fn execute_of_unknown_portal_closes_connection() {
    let (mut client, _) = connect(gateway(docs_backend())).await;
    send(&mut client, &[FrontendMessage::Execute { portal: "nope".into(), max_rows: 0 }, FrontendMessage::Sync]).await;
    let (tag, body) = codec::read_frame(&mut client).await.unwrap().unwrap();
    assert_eq!(tag, b'E');
    assert_eq!(error_code(&body), "08P01");
    assert!(codec::read_frame(&mut client).await.unwrap().is_none());
}

#[tokio::test]
async fn copy_from_stdin_inserts_rows() {
    let backend = docs_backend();
    let (mut client, _) = connect(gateway(backend.clone())).await;
    send(&mut client, &[query("COPY items (id, name) FROM STDIN")]).await;
    let (tag, _) = codec::read_frame(&mut client).await.unwrap().unwrap();
    assert_eq!(tag, b'G');
    send(
        &mut client,
        &[
            FrontendMessage::CopyData(b"1\talpha\n2\t".to_vec()),
            FrontendMessage::CopyData(b"\\N\n".to_vec()),
            FrontendMessage::CopyDone,
        ],
    )
    .await;
    let frames = until_ready(&mut client).await;
    assert_eq!(cstr(&frames[0].1), "COPY 2");
    assert_eq!(frames.last().unwrap().1, vec![b'I']);
    let calls = backend.calls.lock();
    let inserts: Vec<_> = calls.iter().filter(|(s, _)| s.starts_with("INSERT")).collect();
    assert_eq!(inserts.len(), 2);
    assert_eq!(inserts[1].1, vec![TypedValue::text("2"), TypedValue::Null]);
}

#[tokio::test]
async fn copy_fail_reports_query_canceled() {
    let (mut client, _) = connect(gateway(docs_backend())).await;
    send(&mut client, &[query("COPY items FROM STDIN")]).await;
    assert_eq!(codec::read_frame(&mut client).await.unwrap().unwrap().0, b'G');
    send(&mut client, &[FrontendMessage::CopyFail("client gave up".into())]).await;
    let frames = until_ready(&mut client).await;
    assert_eq!(tags(&frames), "EZ");
    assert_eq!(error_code(&frames[0].1), "57014");
}
