//! SQL dialect translator: postgres client SQL -> backend SQL.
//!
//! Pattern rules over masked text, not a parser. Anything no rule recognizes passes
//! through unchanged, and running the translator over its own output changes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::backend::TypedValue;
use crate::error::{GatewayError, GatewayResult};

mod casts;
mod classify;
mod dialect;
pub(crate) mod lexer;
mod order_by;
pub mod rules;
mod vector_ops;

#[cfg(test)]
mod tests;

pub use classify::StatementKind;
pub use rules::{CastTarget, TranslationRules, VectorMetric};

/// What is known about one emitted `?` before values arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamHint {
    /// Postgres type OID; 0 when unspecified.
    pub type_oid: i32,
    /// Declared dimensionality from a `::vector(n)` cast.
    pub vector_dim: Option<usize>,
}

/// Immutable translator output. `bind` and the vector optimizer hand back new values.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationResult {
    pub sql: String,
    /// Client parameter index behind each emitted `?`, in SQL order.
    pub param_order: Vec<usize>,
    /// One entry per emitted `?`.
    pub param_hints: Vec<ParamHint>,
    /// Bound values in `?` order; empty until `bind`.
    pub params: Vec<TypedValue>,
    /// Number of parameters the client must supply.
    pub client_param_count: usize,
    /// Targets the synthetic catalog. `sql` is then the untouched client text.
    pub catalog: bool,
    pub kind: StatementKind,
    pub rules_applied: Vec<&'static str>,
}

impl TranslationResult {
    /// Values arranged for the emitted placeholders.
    pub fn bind(&self, values: &[TypedValue]) -> GatewayResult<TranslationResult> {
        if values.len() < self.client_param_count {
            return Err(GatewayError::protocol(format!(
                "bind message supplies {} parameters, but prepared statement requires {}",
                values.len(),
                self.client_param_count
            )));
        }
        let mut out = self.clone();
        out.params = self.param_order.iter().map(|&i| values.get(i).cloned().unwrap_or(TypedValue::Null)).collect();
        Ok(out)
    }

    /// Declared vector dimensionality for client parameter `client_idx`, if any.
    pub fn vector_dim_for_client_param(&self, client_idx: usize) -> Option<usize> {
        self.param_order
            .iter()
            .zip(&self.param_hints)
            .find(|(i, h)| **i == client_idx && h.vector_dim.is_some())
            .and_then(|(_, h)| h.vector_dim)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Translator {
    rules: Arc<TranslationRules>,
}

impl Translator {
    pub fn new(rules: Arc<TranslationRules>) -> Self { Translator { rules } }

    pub fn rules(&self) -> &TranslationRules { &self.rules }

    /// `type_hints` are the parameter OIDs from a Parse message (may be empty or shorter
    /// than the number of parameters).
    pub fn translate(&self, sql: &str, type_hints: &[i32]) -> GatewayResult<TranslationResult> {
        let masked = lexer::mask(sql)?;
        let kind = classify::classify(&masked.text);
        let catalog = dialect::is_catalog_directed(&masked.text, &masked, &self.rules, kind == StatementKind::Select);

        if catalog {
            let (_, order) = dialect::number_placeholders(&masked.text);
            let count = order.iter().map(|i| i + 1).max().unwrap_or(0).max(type_hints.len());
            let param_order: Vec<usize> = (0..count).collect();
            let param_hints = param_order
                .iter()
                .map(|&i| ParamHint { type_oid: type_hints.get(i).copied().unwrap_or(0), vector_dim: None })
                .collect();
            debug!(target: "translate", "catalog-directed statement kind={:?}", kind);
            return Ok(TranslationResult {
                sql: sql.to_string(),
                param_order,
                param_hints,
                params: Vec::new(),
                client_param_count: count,
                catalog: true,
                kind,
                rules_applied: vec!["catalog"],
            });
        }

        let mut applied: Vec<&'static str> = Vec::new();
        let mut text = masked.text.clone();
        if matches!(kind, StatementKind::Begin | StatementKind::Commit | StatementKind::Rollback) {
            if let Some(t) = classify::rewrite_transaction(&text) {
                text = t;
                applied.push("transaction");
            }
        }

        let mut hints: HashMap<usize, ParamHint> = HashMap::new();
        let mut chars: Vec<char> = text.chars().collect();
        if casts::rewrite_casts(&mut chars, &self.rules, &mut hints) { applied.push("casts"); }
        if vector_ops::rewrite_functions(&mut chars, &masked, &self.rules) { applied.push("vector_functions"); }
        if vector_ops::rewrite_operators(&mut chars, &masked, &self.rules) { applied.push("vector_operators"); }
        if kind == StatementKind::Select && order_by::resolve_order_by_aliases(&mut chars) {
            applied.push("order_by_alias");
        }
        let mut text: String = chars.into_iter().collect();

        let mapped = dialect::map_public_schema(&text, &masked, &self.rules.default_schema);
        if mapped != text { applied.push("schema"); text = mapped; }
        let mapped = dialect::map_now(&dialect::map_booleans(&text));
        if mapped != text { applied.push("literals"); text = mapped; }
        if matches!(&kind, StatementKind::Other(tag) if tag.starts_with("CREATE") || tag.starts_with("ALTER")) {
            let mapped = dialect::map_vector_columns(&text);
            if mapped != text { applied.push("vector_columns"); text = mapped; }
        }
        let (numbered, param_order) = dialect::number_placeholders(&text);
        if numbered != text { applied.push("placeholders"); }
        let text = numbered;

        let client_param_count = param_order.iter().map(|i| i + 1).max().unwrap_or(0).max(type_hints.len());
        let param_hints = param_order
            .iter()
            .map(|&i| {
                let cast = hints.get(&i).copied().unwrap_or_default();
                let declared = type_hints.get(i).copied().unwrap_or(0);
                ParamHint {
                    type_oid: if declared != 0 { declared } else { cast.type_oid },
                    vector_dim: cast.vector_dim,
                }
            })
            .collect();

        let sql_out = masked.unmask(&text);
        debug!(target: "translate", "kind={:?} rules={:?} params={} sql={}", kind, applied, param_order.len(), sql_out);
        Ok(TranslationResult {
            sql: sql_out,
            param_order,
            param_hints,
            params: Vec::new(),
            client_param_count,
            catalog: false,
            kind,
            rules_applied: applied,
        })
    }
}

/// Split a simple-query string on top-level `;`. Empty pieces are dropped.
pub fn split_statements(sql: &str) -> GatewayResult<Vec<String>> {
    let masked = lexer::mask(sql)?;
    Ok(masked
        .text
        .split(';')
        .map(|piece| masked.unmask(piece))
        .filter(|s| !s.trim().is_empty())
        .collect())
}

/// Statement kind without a full translation (used for failed-transaction gating).
pub fn classify_statement(sql: &str) -> StatementKind {
    match lexer::mask(sql) {
        Ok(m) => classify::classify(&m.text),
        Err(_) => classify::classify(sql),
    }
}
