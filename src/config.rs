//! Gateway configuration: optional JSON file named by `WIREGATE_CONFIG`, then
//! `WIREGATE_*` environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::vector_optimizer::{DEFAULT_BUDGET_MS, MAX_LITERAL_SIZE_BYTES};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub backend_url: Option<String>,
    pub backend_namespace: String,
    pub backend_user: Option<String>,
    pub backend_password: Option<String>,
    /// Second execution path that accepts large bound vector parameters.
    pub embedded_url: Option<String>,
    /// Backend schema exposed to clients as `public`.
    pub default_schema: String,
    pub trust: bool,
    pub auth_file: Option<String>,
    pub max_literal_bytes: usize,
    pub vector_budget_ms: f64,
    pub server_version: String,
    pub trace_frames: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind: "127.0.0.1:5432".into(),
            backend_url: None,
            backend_namespace: "USER".into(),
            backend_user: None,
            backend_password: None,
            embedded_url: None,
            default_schema: "SQLUser".into(),
            trust: false,
            auth_file: None,
            max_literal_bytes: MAX_LITERAL_SIZE_BYTES,
            vector_budget_ms: DEFAULT_BUDGET_MS,
            server_version: "16.0".into(),
            trace_frames: false,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var("WIREGATE_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => GatewayConfig::default(),
        };
        base.with_overrides(|k| std::env::var(k).ok())
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path))
    }

    /// Apply `WIREGATE_*` overrides from a lookup (env in production, a map in tests).
    pub fn with_overrides<F: Fn(&str) -> Option<String>>(mut self, get: F) -> Result<Self> {
        if let Some(v) = get("WIREGATE_BIND") { self.bind = v; }
        if let Some(v) = get("WIREGATE_BACKEND_URL") { self.backend_url = Some(v); }
        if let Some(v) = get("WIREGATE_BACKEND_NAMESPACE") { self.backend_namespace = v; }
        if let Some(v) = get("WIREGATE_BACKEND_USER") { self.backend_user = Some(v); }
        if let Some(v) = get("WIREGATE_BACKEND_PASSWORD") { self.backend_password = Some(v); }
        if let Some(v) = get("WIREGATE_EMBEDDED_URL") { self.embedded_url = Some(v); }
        if let Some(v) = get("WIREGATE_DEFAULT_SCHEMA") { self.default_schema = v; }
        if let Some(v) = get("WIREGATE_TRUST") { self.trust = env_flag(&v); }
        if let Some(v) = get("WIREGATE_AUTH_FILE") { self.auth_file = Some(v); }
        if let Some(v) = get("WIREGATE_MAX_LITERAL_BYTES") {
            self.max_literal_bytes = v.trim().parse().with_context(|| format!("WIREGATE_MAX_LITERAL_BYTES='{}'", v))?;
        }
        if let Some(v) = get("WIREGATE_VECTOR_BUDGET_MS") {
            self.vector_budget_ms = v.trim().parse().with_context(|| format!("WIREGATE_VECTOR_BUDGET_MS='{}'", v))?;
        }
        if let Some(v) = get("WIREGATE_SERVER_VERSION") { self.server_version = v; }
        if let Some(v) = get("WIREGATE_PGWIRE_TRACE") { self.trace_frames = env_flag(&v); }
        Ok(self)
    }

    /// One-line summary for the startup banner; secrets are not printed.
    pub fn redacted_summary(&self) -> String {
        format!(
            "bind={}, backend_url={}, namespace={}, embedded={}, default_schema={}, trust={}, auth_file={}, max_literal_bytes={}, vector_budget_ms={}",
            self.bind,
            self.backend_url.as_deref().unwrap_or("<unset>"),
            self.backend_namespace,
            self.embedded_url.is_some(),
            self.default_schema,
            self.trust,
            self.auth_file.as_deref().unwrap_or("<unset>"),
            self.max_literal_bytes,
            self.vector_budget_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let mut env = HashMap::new();
        env.insert("WIREGATE_BIND", "0.0.0.0:6543");
        env.insert("WIREGATE_TRUST", "yes");
        env.insert("WIREGATE_MAX_LITERAL_BYTES", "1024");
        env.insert("WIREGATE_BACKEND_PASSWORD", "hunter2");
        let cfg = GatewayConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:6543");
        assert!(cfg.trust);
        assert_eq!(cfg.max_literal_bytes, 1024);
        assert_eq!(cfg.default_schema, "SQLUser");
        assert!(!cfg.redacted_summary().contains("hunter2"));
    }

    #[test]
    fn bad_numeric_override_is_an_error() {
        let r = GatewayConfig::default().with_overrides(|k| {
            if k == "WIREGATE_VECTOR_BUDGET_MS" { Some("fast".into()) } else { None }
        });
        assert!(r.is_err());
    }

    #[test]
    fn partial_json_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.json");
        std::fs::write(&path, r#"{"bind":"127.0.0.1:7000","default_schema":"App"}"#).unwrap();
        let cfg = GatewayConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:7000");
        assert_eq!(cfg.default_schema, "App");
        assert_eq!(cfg.backend_namespace, "USER");
        assert_eq!(cfg.max_literal_bytes, MAX_LITERAL_SIZE_BYTES);
    }
}
