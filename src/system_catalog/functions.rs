//! Session-scoped functions clients call during introspection, answered without the backend.

use std::collections::HashMap;

use crate::backend::TypedValue;
use crate::system_catalog::types;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub database: String,
    pub user: String,
    pub backend_pid: i32,
    pub server_version: String,
    /// Session parameters visible through current_setting().
    pub settings: HashMap<String, String>,
}

impl Default for SessionInfo {
    fn default() -> Self {
        SessionInfo {
            database: "postgres".into(),
            user: "postgres".into(),
            backend_pid: 0,
            server_version: "16.0".into(),
            settings: HashMap::new(),
        }
    }
}

impl SessionInfo {
    pub fn version_string(&self) -> String {
        format!("PostgreSQL {} (wiregate {}) on x86_64-pc-linux-gnu, 64-bit", self.server_version, env!("CARGO_PKG_VERSION"))
    }
}

/// Evaluate a local function; None when the name is not one we answer.
pub fn evaluate(name: &str, args: &[TypedValue], session: &SessionInfo) -> Option<(TypedValue, i32)> {
    let text = |s: String| Some((TypedValue::Text(s), types::TEXT));
    let name_val = |s: String| Some((TypedValue::Text(s), types::NAME));
    match name {
        "version" => text(session.version_string()),
        "current_schema" => name_val("public".into()),
        "current_schemas" => Some((TypedValue::Text("{pg_catalog,public}".into()), types::TEXT_ARRAY)),
        "current_database" | "current_catalog" => name_val(session.database.clone()),
        "current_user" | "session_user" | "user" | "current_role" => name_val(session.user.clone()),
        "pg_backend_pid" => Some((TypedValue::Int(session.backend_pid as i64), types::INT4)),
        "pg_is_in_recovery" => Some((TypedValue::Bool(false), types::BOOL)),
        "current_setting" => {
            let key = args.first().and_then(|a| a.to_text()).map(|k| k.to_ascii_lowercase())?;
            match session.settings.get(&key) {
                Some(v) => text(v.clone()),
                None if key == "server_version" => text(session.server_version.clone()),
                None if key == "server_version_num" => text(version_num(&session.server_version)),
                None => Some((TypedValue::Null, types::TEXT)),
            }
        }
        "obj_description" | "col_description" | "shobj_description" => Some((TypedValue::Null, types::TEXT)),
        "pg_get_userbyid" => name_val(session.user.clone()),
        "has_table_privilege" | "has_schema_privilege" | "has_database_privilege" | "pg_table_is_visible" => {
            Some((TypedValue::Bool(true), types::BOOL))
        }
        _ => None,
    }
}

/// `16.2` -> `160002`
fn version_num(v: &str) -> String {
    let mut parts = v.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major * 10000 + minor).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_session_functions() {
        let mut s = SessionInfo { user: "ann".into(), backend_pid: 42, ..Default::default() };
        s.settings.insert("search_path".into(), "\"$user\", public".into());
        assert_eq!(evaluate("current_user", &[], &s), Some((TypedValue::text("ann"), types::NAME)));
        assert_eq!(evaluate("pg_backend_pid", &[], &s), Some((TypedValue::Int(42), types::INT4)));
        assert_eq!(
            evaluate("current_setting", &[TypedValue::text("SEARCH_PATH")], &s).map(|v| v.0),
            Some(TypedValue::text("\"$user\", public"))
        );
        assert_eq!(evaluate("current_setting", &[TypedValue::text("server_version_num")], &s).map(|v| v.0), Some(TypedValue::text("160000")));
        assert!(evaluate("version", &[], &s).map(|v| v.0.to_text().unwrap().starts_with("PostgreSQL 16.0")).unwrap_or(false));
        assert!(evaluate("no_such_fn", &[], &s).is_none());
    }
}
