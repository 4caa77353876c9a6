//! Backend execution boundary: typed values, row sets, the `Backend` trait and the
//! adapter that picks an execution sub-path per query and runs it off the async runtime.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::BackendError;

pub mod http;

/// A bound parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl TypedValue {
    pub fn text<S: Into<String>>(s: S) -> Self { TypedValue::Text(s.into()) }

    pub fn is_null(&self) -> bool { matches!(self, TypedValue::Null) }

    /// Postgres text-format rendering; None for NULL.
    pub fn to_text(&self) -> Option<Cow<'_, str>> {
        match self {
            TypedValue::Null => None,
            TypedValue::Bool(b) => Some(Cow::Borrowed(if *b { "t" } else { "f" })),
            TypedValue::Int(i) => Some(Cow::Owned(i.to_string())),
            TypedValue::Float(f) => Some(Cow::Owned(format_float(*f))),
            TypedValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
            TypedValue::Bytes(b) => {
                let mut out = String::with_capacity(2 + b.len() * 2);
                out.push_str("\\x");
                for byte in b { out.push_str(&format!("{:02x}", byte)); }
                Some(Cow::Owned(out))
            }
        }
    }

    /// Serialized size, used to pick an execution path for oversized parameters.
    pub fn byte_len(&self) -> usize {
        match self {
            TypedValue::Null => 0,
            TypedValue::Bool(_) => 1,
            TypedValue::Int(_) | TypedValue::Float(_) => 8,
            TypedValue::Text(s) => s.len(),
            TypedValue::Bytes(b) => b.len(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TypedValue::Null => serde_json::Value::Null,
            TypedValue::Bool(b) => serde_json::Value::Bool(*b),
            TypedValue::Int(i) => serde_json::Value::from(*i),
            TypedValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            TypedValue::Text(s) => serde_json::Value::String(s.clone()),
            TypedValue::Bytes(_) => self.to_text().map(|s| serde_json::Value::String(s.into_owned())).unwrap_or_default(),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() { return "NaN".into(); }
    if f.is_infinite() { return if f > 0.0 { "Infinity".into() } else { "-Infinity".into() }; }
    format!("{}", f)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_oid: i32,
}

impl ColumnMeta {
    pub fn new<S: Into<String>>(name: S, type_oid: i32) -> Self { ColumnMeta { name: name.into(), type_oid } }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<TypedValue>>,
    /// Set by DML/DDL paths that report an affected-row count.
    pub rows_affected: Option<u64>,
}

impl RowSet {
    pub fn with_columns(columns: Vec<ColumnMeta>) -> Self { RowSet { columns, rows: Vec::new(), rows_affected: None } }

    pub fn affected(n: u64) -> Self { RowSet { columns: Vec::new(), rows: Vec::new(), rows_affected: Some(n) } }

    pub fn returns_rows(&self) -> bool { !self.columns.is_empty() }

    pub fn single(name: &str, type_oid: i32, value: TypedValue) -> Self {
        RowSet { columns: vec![ColumnMeta::new(name, type_oid)], rows: vec![vec![value]], rows_affected: None }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackendCapabilities {
    /// Largest single bound parameter this path accepts; None means no limit.
    pub max_param_bytes: Option<usize>,
    /// Transaction verbs bind the calling session's later statements. False for
    /// request-per-statement transports, where every statement commits on its own.
    pub transactional: bool,
}

/// A backend execution path. Calls are blocking and made from `spawn_blocking`,
/// so implementations must tolerate concurrent invocation from many sessions.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities { BackendCapabilities::default() }

    fn execute(&self, sql: &str, params: &[TypedValue]) -> Result<RowSet, BackendError>;

    /// Same as `execute`, with an id that a later `cancel` can refer to.
    fn execute_tagged(&self, _query_id: u64, sql: &str, params: &[TypedValue]) -> Result<RowSet, BackendError> {
        self.execute(sql, params)
    }

    /// Result columns of a statement without running it. `Ok(None)` when unknown.
    fn describe(&self, _sql: &str, _param_count: usize) -> Result<Option<Vec<ColumnMeta>>, BackendError> { Ok(None) }

    /// Best-effort cancellation of an in-flight `execute_tagged`.
    fn cancel(&self, _query_id: u64) {}
}

/// One-shot-per-query cancellation flag shared between a session, its reader task and
/// the cancel-request registry.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool { self.inner.flag.load(Ordering::SeqCst) }

    pub fn reset(&self) { self.inner.flag.store(false, Ordering::SeqCst); }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() { return; }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPath {
    External,
    Embedded,
}

/// Shared entry point for every session. Holds the default (external) path and an
/// optional embedded path that accepts parameters the external one rejects.
pub struct BackendAdapter {
    external: Arc<dyn Backend>,
    embedded: Option<Arc<dyn Backend>>,
    next_query_id: AtomicU64,
}

impl BackendAdapter {
    pub fn new(external: Arc<dyn Backend>) -> Self {
        BackendAdapter { external, embedded: None, next_query_id: AtomicU64::new(1) }
    }

    pub fn with_embedded(mut self, embedded: Arc<dyn Backend>) -> Self {
        self.embedded = Some(embedded);
        self
    }

    pub fn choose_path(&self, params: &[TypedValue]) -> ExecPath {
        let Some(limit) = self.external.capabilities().max_param_bytes else { return ExecPath::External };
        let oversized = params.iter().any(|p| p.byte_len() > limit);
        if oversized {
            if self.embedded.is_some() { return ExecPath::Embedded; }
            warn!(target: "backend", "parameter exceeds {} bytes and no embedded path is configured; using {}", limit, self.external.name());
        }
        ExecPath::External
    }

    /// True only when every configured path honours START TRANSACTION/COMMIT/ROLLBACK.
    pub fn transactional(&self) -> bool {
        self.external.capabilities().transactional
            && self.embedded.as_ref().map(|e| e.capabilities().transactional).unwrap_or(true)
    }

    pub fn backend_for(&self, path: ExecPath) -> Arc<dyn Backend> {
        match (path, &self.embedded) {
            (ExecPath::Embedded, Some(b)) => b.clone(),
            _ => self.external.clone(),
        }
    }

    /// Synchronous execution for callers already off the runtime (catalog loads, bulk loads).
    pub fn execute_blocking(&self, sql: &str, params: &[TypedValue]) -> Result<RowSet, BackendError> {
        let backend = self.backend_for(self.choose_path(params));
        backend.execute(sql, params)
    }

    pub async fn execute(&self, sql: String, params: Vec<TypedValue>, cancel: &CancelSignal) -> Result<RowSet, BackendError> {
        let path = self.choose_path(&params);
        let backend = self.backend_for(path);
        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        debug!(target: "backend", "query_id={} path={:?} backend={} params={} sql={}", query_id, path, backend.name(), params.len(), sql);
        let worker = backend.clone();
        let handle = tokio::task::spawn_blocking(move || worker.execute_tagged(query_id, &sql, &params));
        tokio::select! {
            joined = handle => match joined {
                Ok(res) => res,
                Err(e) => Err(BackendError::new("PANIC", format!("backend task failed: {}", e))),
            },
            _ = cancel.cancelled() => {
                debug!(target: "backend", "query_id={} cancelled; abandoning backend call", query_id);
                backend.cancel(query_id);
                Err(BackendError::cancelled())
            }
        }
    }

    pub async fn describe(&self, sql: String, param_count: usize) -> Result<Option<Vec<ColumnMeta>>, BackendError> {
        let backend = self.external.clone();
        match tokio::task::spawn_blocking(move || backend.describe(&sql, param_count)).await {
            Ok(res) => res,
            Err(e) => Err(BackendError::new("PANIC", format!("backend task failed: {}", e))),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    #[test]
    fn text_rendering_matches_postgres_text_format() {
        assert_eq!(TypedValue::Bool(true).to_text().unwrap(), "t");
        assert_eq!(TypedValue::Int(-7).to_text().unwrap(), "-7");
        assert_eq!(TypedValue::Float(1.5).to_text().unwrap(), "1.5");
        assert_eq!(TypedValue::Float(f64::NAN).to_text().unwrap(), "NaN");
        assert_eq!(TypedValue::Bytes(vec![0xde, 0xad]).to_text().unwrap(), "\\xdead");
        assert!(TypedValue::Null.to_text().is_none());
    }

    #[test]
    fn oversized_params_route_to_embedded_path() {
        let mut ext = ScriptedBackend::new("external");
        ext.max_param_bytes = Some(16);
        let adapter = BackendAdapter::new(Arc::new(ext)).with_embedded(Arc::new(ScriptedBackend::new("embedded")));
        assert_eq!(adapter.choose_path(&[TypedValue::text("short")]), ExecPath::External);
        assert_eq!(adapter.choose_path(&[TypedValue::text("x".repeat(64))]), ExecPath::Embedded);
        assert_eq!(adapter.backend_for(ExecPath::Embedded).name(), "embedded");
    }

    #[test]
    fn oversized_params_without_embedded_stay_external() {
        let mut ext = ScriptedBackend::new("external");
        ext.max_param_bytes = Some(4);
        let adapter = BackendAdapter::new(Arc::new(ext));
        assert_eq!(adapter.choose_path(&[TypedValue::text("too long")]), ExecPath::External);
    }

    #[test]
    fn transactional_only_when_every_path_is() {
        let adapter = BackendAdapter::new(Arc::new(ScriptedBackend::new("external")));
        assert!(adapter.transactional());
        let mut embedded = ScriptedBackend::new("embedded");
        embedded.transactional = false;
        assert!(!adapter.with_embedded(Arc::new(embedded)).transactional());
        struct Plain;
        impl Backend for Plain {
            fn name(&self) -> &str { "plain" }
            fn execute(&self, _sql: &str, _params: &[TypedValue]) -> Result<RowSet, BackendError> { Ok(RowSet::affected(0)) }
        }
        assert!(!BackendAdapter::new(Arc::new(Plain)).transactional());
    }

    struct SlowBackend {
        cancelled: AtomicBool,
    }

    impl Backend for SlowBackend {
        fn name(&self) -> &str { "slow" }
        fn execute(&self, _sql: &str, _params: &[TypedValue]) -> Result<RowSet, BackendError> {
            for _ in 0..200 {
                if self.cancelled.load(Ordering::SeqCst) { return Err(BackendError::cancelled()); }
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Ok(RowSet::affected(1))
        }
        fn cancel(&self, _query_id: u64) { self.cancelled.store(true, Ordering::SeqCst); }
    }

    #[tokio::test]
    async fn cancel_signal_abandons_inflight_call() {
        let backend = Arc::new(SlowBackend { cancelled: AtomicBool::new(false) });
        let adapter = BackendAdapter::new(backend.clone());
        let signal = CancelSignal::default();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let err = adapter.execute("SELECT 1".into(), vec![], &signal).await.unwrap_err();
        assert_eq!(err.sqlstate(), "57014");
        assert!(backend.cancelled.load(Ordering::SeqCst));
    }
}
