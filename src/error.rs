//! Gateway error model and its mapping onto postgres ErrorResponse fields.
//! Every failure that reaches a client goes through `pgwire_fields()`; backend-native
//! codes are folded into the nearest SQLSTATE by a fixed table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured failure raised by a backend execution path: native code plus message.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("backend error {code}: {message}")]
pub struct BackendError {
    pub code: String,
    pub message: String,
}

impl BackendError {
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        BackendError { code: code.into(), message: message.into() }
    }

    pub fn cancelled() -> Self { BackendError::new(CANCELLED_CODE, "canceling statement due to user request") }

    pub fn unavailable<M: Into<String>>(message: M) -> Self { BackendError::new(UNAVAILABLE_CODE, message) }

    pub fn sqlstate(&self) -> &'static str { sqlstate_for_backend_code(&self.code) }
}

pub const CANCELLED_CODE: &str = "CANCELLED";
pub const UNAVAILABLE_CODE: &str = "UNAVAILABLE";

/// Backend SQLCODE -> client SQLSTATE. Unmapped codes land on internal_error.
pub fn sqlstate_for_backend_code(code: &str) -> &'static str {
    match code.trim() {
        "-119" | "-120" => "23505",                 // unique_violation
        "-108" | "-104" => "23502",                 // not_null_violation
        "-121" | "-122" | "-123" | "-124" => "23503", // foreign_key_violation
        "-1" | "-12" | "-25" => "42601",            // syntax_error
        "-30" => "42P01",                           // undefined_table
        "-29" => "42703",                           // undefined_column
        "-201" => "42P07",                          // duplicate_table
        "-114" | "-110" => "40001",                 // serialization_failure
        "-99" => "42501",                           // insufficient_privilege
        "-22" | "-23" | "-103" | "-105" => "22000", // data_exception
        CANCELLED_CODE => "57014",                  // query_canceled
        UNAVAILABLE_CODE => "08006",                // connection_failure
        _ => "XX000",
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("{0}")]
    Translation(String),
    #[error("vector optimization failed: {0}")]
    Optimization(String),
    #[error("catalog: {0}")]
    Catalog(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{0}")]
    Auth(String),
    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    FailedTransaction,
    #[error("{kind} \"{name}\" does not exist")]
    ObjectNotFound { kind: &'static str, name: String },
    #[error("{0}")]
    FeatureNotSupported(String),
    /// Client text that is not valid UTF-8.
    #[error("invalid byte sequence for encoding \"UTF8\": {0}")]
    InvalidEncoding(String),
    #[error("connection failure: {0}")]
    Io(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self { GatewayError::Protocol(msg.into()) }
    pub fn translation<S: Into<String>>(msg: S) -> Self { GatewayError::Translation(msg.into()) }
    pub fn catalog<S: Into<String>>(msg: S) -> Self { GatewayError::Catalog(msg.into()) }
    pub fn auth<S: Into<String>>(msg: S) -> Self { GatewayError::Auth(msg.into()) }
    pub fn unsupported<S: Into<String>>(msg: S) -> Self { GatewayError::FeatureNotSupported(msg.into()) }
    pub fn statement_not_found<S: Into<String>>(name: S) -> Self {
        GatewayError::ObjectNotFound { kind: "prepared statement", name: name.into() }
    }
    pub fn portal_not_found<S: Into<String>>(name: S) -> Self {
        GatewayError::ObjectNotFound { kind: "portal", name: name.into() }
    }

    /// Fatal errors close the connection after the ErrorResponse is written.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Protocol(_) | GatewayError::Auth(_) | GatewayError::Io(_))
    }

    /// Pgwire mapping: return (sqlstate, severity, message)
    pub fn pgwire_fields(&self) -> (&'static str, &'static str, String) {
        let msg = match self {
            GatewayError::Backend(e) => e.message.clone(),
            other => other.to_string(),
        };
        match self {
            GatewayError::Protocol(_) => ("08P01", "FATAL", msg),      // protocol_violation
            GatewayError::Translation(_) => ("42601", "ERROR", msg),   // syntax_error
            GatewayError::Optimization(_) => ("XX000", "ERROR", msg),
            GatewayError::Catalog(_) => ("01000", "WARNING", msg),     // warning
            GatewayError::Backend(e) => (e.sqlstate(), "ERROR", msg),
            GatewayError::Auth(_) => ("28P01", "FATAL", msg),          // invalid_password
            GatewayError::FailedTransaction => ("25P02", "ERROR", msg), // in_failed_sql_transaction
            GatewayError::ObjectNotFound { kind, .. } => {
                if *kind == "portal" { ("34000", "ERROR", msg) } else { ("26000", "ERROR", msg) }
            }
            GatewayError::FeatureNotSupported(_) => ("0A000", "ERROR", msg),
            GatewayError::InvalidEncoding(_) => ("22021", "ERROR", msg), // character_not_in_repertoire
            GatewayError::Io(_) => ("08006", "FATAL", msg),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self { GatewayError::Io(err.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_codes_map_to_sqlstate() {
        assert_eq!(sqlstate_for_backend_code("-119"), "23505");
        assert_eq!(sqlstate_for_backend_code(" -30 "), "42P01");
        assert_eq!(sqlstate_for_backend_code("-1"), "42601");
        assert_eq!(sqlstate_for_backend_code("-114"), "40001");
        assert_eq!(sqlstate_for_backend_code("-9999"), "XX000");
        assert_eq!(sqlstate_for_backend_code(""), "XX000");
        assert_eq!(BackendError::cancelled().sqlstate(), "57014");
    }

    #[test]
    fn pgwire_fields_mapping() {
        let (code, sev, msg) = GatewayError::from(BackendError::new("-121", "fk broken")).pgwire_fields();
        assert_eq!(code, "23503");
        assert_eq!(sev, "ERROR");
        assert_eq!(msg, "fk broken");

        let (code, sev, msg) = GatewayError::FailedTransaction.pgwire_fields();
        assert_eq!(code, "25P02");
        assert_eq!(sev, "ERROR");
        assert!(msg.starts_with("current transaction is aborted"));

        let (code, sev, _) = GatewayError::protocol("bad frame").pgwire_fields();
        assert_eq!(code, "08P01");
        assert_eq!(sev, "FATAL");

        let (code, _, msg) = GatewayError::statement_not_found("s1").pgwire_fields();
        assert_eq!(code, "26000");
        assert_eq!(msg, "prepared statement \"s1\" does not exist");
        let (code, _, _) = GatewayError::portal_not_found("p1").pgwire_fields();
        assert_eq!(code, "34000");
    }

    #[test]
    fn fatal_classification() {
        assert!(GatewayError::protocol("x").is_fatal());
        assert!(GatewayError::auth("x").is_fatal());
        assert!(!GatewayError::translation("x").is_fatal());
        assert!(!GatewayError::FailedTransaction.is_fatal());
        assert!(!GatewayError::from(BackendError::new("-1", "x")).is_fatal());
    }
}
