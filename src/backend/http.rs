//! REST SQL execution path: `POST {url}/api/atelier/v1/{namespace}/action/query`
//! with `{"query": .., "parameters": [..]}`. Rows come back as JSON objects.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{Backend, BackendCapabilities, ColumnMeta, RowSet, TypedValue};
use crate::error::BackendError;

static SQLCODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"SQLCODE:?\s*<?\s*(-?\d+)\s*>?").unwrap());

pub struct HttpBackend {
    label: String,
    client: reqwest::Client,
    endpoint: String,
    user: Option<String>,
    password: Option<String>,
    runtime: Handle,
    max_param_bytes: Option<usize>,
    inflight: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

impl HttpBackend {
    /// Must be called from inside a tokio runtime; requests are driven on that runtime.
    pub fn new(label: &str, base_url: &str, namespace: &str, user: Option<String>, password: Option<String>) -> anyhow::Result<Self> {
        let runtime = Handle::try_current()?;
        let client = reqwest::Client::builder().build()?;
        let endpoint = format!("{}/api/atelier/v1/{}/action/query", base_url.trim_end_matches('/'), namespace);
        Ok(HttpBackend {
            label: label.to_string(),
            client,
            endpoint,
            user,
            password,
            runtime,
            max_param_bytes: None,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_max_param_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_param_bytes = limit;
        self
    }

    async fn post(&self, sql: &str, params: &[TypedValue]) -> Result<Value, BackendError> {
        let body = request_body(sql, params);
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.password.as_ref());
        }
        let resp = req.send().await.map_err(|e| BackendError::unavailable(e.to_string()))?;
        let status = resp.status();
        let value: Value = resp.json().await.map_err(|e| BackendError::unavailable(format!("HTTP {}: {}", status, e)))?;
        Ok(value)
    }
}

impl Backend for HttpBackend {
    fn name(&self) -> &str { &self.label }

    /// Each statement is its own REST request and commits there.
    fn capabilities(&self) -> BackendCapabilities { BackendCapabilities { max_param_bytes: self.max_param_bytes, transactional: false } }

    fn execute(&self, sql: &str, params: &[TypedValue]) -> Result<RowSet, BackendError> {
        let value = self.runtime.block_on(self.post(sql, params))?;
        parse_response(value)
    }

    fn execute_tagged(&self, query_id: u64, sql: &str, params: &[TypedValue]) -> Result<RowSet, BackendError> {
        let (tx, rx) = oneshot::channel::<()>();
        self.inflight.lock().insert(query_id, tx);
        let outcome = self.runtime.block_on(async {
            tokio::select! {
                res = self.post(sql, params) => res,
                _ = rx => Err(BackendError::cancelled()),
            }
        });
        self.inflight.lock().remove(&query_id);
        parse_response(outcome?)
    }

    fn cancel(&self, query_id: u64) {
        if let Some(tx) = self.inflight.lock().remove(&query_id) {
            debug!(target: "backend", "{}: dropping HTTP request for query_id={}", self.label, query_id);
            let _ = tx.send(());
        }
    }
}

pub(crate) fn request_body(sql: &str, params: &[TypedValue]) -> Value {
    let parameters: Vec<Value> = params.iter().map(TypedValue::to_json).collect();
    json!({ "query": sql, "parameters": parameters })
}

/// Pull the native SQLCODE out of an error text; falls back to the numeric status code.
pub(crate) fn extract_sqlcode(message: &str, fallback: Option<i64>) -> String {
    if let Some(c) = SQLCODE_RE.captures(message) {
        return c[1].to_string();
    }
    fallback.map(|c| c.to_string()).unwrap_or_default()
}

pub(crate) fn parse_response(value: Value) -> Result<RowSet, BackendError> {
    if let Some(errors) = value.pointer("/status/errors").and_then(|e| e.as_array()) {
        if let Some(first) = errors.first() {
            let message = first.get("error").and_then(|m| m.as_str()).unwrap_or("backend error").to_string();
            let code = extract_sqlcode(&message, first.get("code").and_then(|c| c.as_i64()));
            warn!(target: "backend", "backend reported error code={} message={}", code, message);
            return Err(BackendError::new(code, message));
        }
    }
    let affected = affected_count(&value);
    let content = match value.pointer("/result/content") {
        Some(Value::Array(rows)) if !rows.is_empty() || affected.is_none() => rows.clone(),
        _ => return Ok(RowSet::affected(affected.unwrap_or(0))),
    };
    let mut rs = rows_from_json(content);
    if !rs.returns_rows() {
        rs.rows_affected = affected;
    }
    Ok(rs)
}

/// Row count the backend reports for DML, under whichever key the server version uses.
fn affected_count(value: &Value) -> Option<u64> {
    ["/result/rowCount", "/result/%ROWCOUNT", "/result/ROWCOUNT", "/result/rowsAffected"]
        .iter()
        .filter_map(|ptr| value.pointer(ptr))
        .find_map(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
}

/// Column order follows the first object row; later rows may add columns (backfilled NULL).
pub(crate) fn rows_from_json(rows: Vec<Value>) -> RowSet {
    let mut names: Vec<String> = Vec::new();
    let mut cells: Vec<serde_json::Map<String, Value>> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for k in map.keys() {
                if !names.iter().any(|c| c == k) { names.push(k.clone()); }
            }
            cells.push(map);
        }
    }
    let mut columns: Vec<ColumnMeta> = names.iter().map(|n| ColumnMeta::new(n.as_str(), 25)).collect();
    for (idx, name) in names.iter().enumerate() {
        if let Some(v) = cells.iter().filter_map(|m| m.get(name)).find(|v| !v.is_null()) {
            columns[idx].type_oid = json_type_oid(v);
        }
    }
    let rows = cells
        .iter()
        .map(|m| names.iter().map(|n| json_to_value(m.get(n).unwrap_or(&Value::Null))).collect())
        .collect();
    RowSet { columns, rows, rows_affected: None }
}

fn json_type_oid(v: &Value) -> i32 {
    match v {
        Value::Bool(_) => 16,
        Value::Number(n) if n.is_i64() || n.is_u64() => 20,
        Value::Number(_) => 701,
        _ => 25,
    }
}

fn json_to_value(v: &Value) -> TypedValue {
    match v {
        Value::Null => TypedValue::Null,
        Value::Bool(b) => TypedValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => TypedValue::Int(i),
            None => n.as_f64().map(TypedValue::Float).unwrap_or(TypedValue::Null),
        },
        Value::String(s) => TypedValue::Text(s.clone()),
        other => TypedValue::Text(other.to_string()),
    }
}
