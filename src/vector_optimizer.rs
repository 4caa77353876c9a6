//! Vector query optimizer.
//!
//! The backend only uses its ANN index when the query vector of a distance call is an
//! inline literal. Clients bind vectors as parameters, so bound values are moved into
//! the SQL text as `TO_VECTOR('[..]', FLOAT)` and dropped from the parameter list.
//! Purely a performance pass: any failure yields the input unchanged.

use std::time::Instant;

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, error, warn};

use crate::backend::TypedValue;
use crate::error::{GatewayError, GatewayResult};
use crate::translate::lexer;
use crate::translate::TranslationResult;

pub mod literal;
pub mod metrics;

#[cfg(test)]
mod tests;

pub use literal::{encode_compact, VectorEncoding, VectorLiteral, VectorLiteralError};
pub use metrics::{CallMetrics, OptimizerStats};

/// Larger inline literals are rejected by the backend SQL compiler.
pub const MAX_LITERAL_SIZE_BYTES: usize = 3000;
pub const DEFAULT_BUDGET_MS: f64 = 5.0;

static DISTANCE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(VECTOR_(?:COSINE|DOT_PRODUCT|L2))\s*\(\s*((?:[\w.]|\x{E000}\d+\x{E001})+)\s*,\s*(TO_VECTOR\s*\(\s*\?\s*(?:,\s*(\w+))?\s*\))",
    )
    .unwrap()
});
/// Same call with the query vector first: `VECTOR_COSINE(TO_VECTOR(?), col)`.
static DISTANCE_CALL_VECTOR_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(VECTOR_(?:COSINE|DOT_PRODUCT|L2))\s*\(\s*(TO_VECTOR\s*\(\s*\?\s*(?:,\s*(\w+))?\s*\))\s*,\s*((?:[\w.]|\x{E000}\d+\x{E001})+)\s*\)",
    )
    .unwrap()
});
static BRACKETLESS_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(TO_VECTOR\s*\(\s*)\x{E000}(\d+)\x{E001}").unwrap());

/// One rewrite site found in the masked SQL.
struct Site {
    start: usize,
    end: usize,
    param: usize,
    dtype: String,
}

pub struct VectorQueryOptimizer {
    max_literal_bytes: usize,
    budget_ms: f64,
    history: Mutex<metrics::MetricsHistory>,
}

impl Default for VectorQueryOptimizer {
    fn default() -> Self { VectorQueryOptimizer::new(MAX_LITERAL_SIZE_BYTES, DEFAULT_BUDGET_MS) }
}

impl VectorQueryOptimizer {
    pub fn new(max_literal_bytes: usize, budget_ms: f64) -> Self {
        VectorQueryOptimizer { max_literal_bytes, budget_ms, history: Mutex::new(metrics::MetricsHistory::default()) }
    }

    pub fn budget_ms(&self) -> f64 { self.budget_ms }

    /// Never fails; returns the input unchanged when nothing applies or on error.
    pub fn optimize(&self, input: &TranslationResult) -> TranslationResult {
        if input.catalog {
            return input.clone();
        }
        let started = Instant::now();
        let outcome = self.try_optimize(input);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let (out, found, transformed) = match outcome {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "vector_opt", "optimization skipped: {}", e);
                (input.clone(), 0, 0)
            }
        };
        let within_budget = elapsed_ms <= self.budget_ms;
        if !within_budget {
            error!(target: "vector_opt", "optimization took {:.3}ms (budget {:.1}ms) vectors={} sql_len={}", elapsed_ms, self.budget_ms, found, input.sql.len());
        }
        if found > 0 {
            debug!(target: "vector_opt", "{}/{} vectors inlined in {:.3}ms; params {} -> {}", transformed, found, elapsed_ms, input.params.len(), out.params.len());
        }
        self.history.lock().record(CallMetrics {
            at: Utc::now(),
            elapsed_ms,
            vectors_found: found,
            vectors_transformed: transformed,
            sql_len_before: input.sql.len(),
            sql_len_after: out.sql.len(),
            params_before: input.params.len(),
            params_after: out.params.len(),
            within_budget,
        });
        out
    }

    fn try_optimize(&self, input: &TranslationResult) -> GatewayResult<(TranslationResult, usize, usize)> {
        let masked = lexer::mask(&input.sql).map_err(|e| GatewayError::Optimization(e.to_string()))?;
        if input.params.is_empty() {
            return Ok(self.normalize_literals(input, &masked));
        }

        let site = |c: regex::Captures, arg_group: usize, type_group: usize| -> Option<Site> {
            let arg = c.get(arg_group)?;
            let q = arg.as_str().find('?')? + arg.start();
            Some(Site {
                start: arg.start(),
                end: arg.end(),
                param: masked.text[..q].matches('?').count(),
                dtype: c.get(type_group).map(|d| d.as_str().to_ascii_uppercase()).unwrap_or_else(|| "FLOAT".into()),
            })
        };
        let mut sites: Vec<Site> = DISTANCE_CALL.captures_iter(&masked.text).filter_map(|c| site(c, 3, 4)).collect();
        sites.extend(DISTANCE_CALL_VECTOR_FIRST.captures_iter(&masked.text).filter_map(|c| site(c, 2, 3)));
        sites.sort_by_key(|s| s.start);
        if sites.is_empty() {
            return Ok((input.clone(), 0, 0));
        }

        let mut text = masked.text.clone();
        let mut params = input.params.clone();
        let mut removed: Vec<usize> = Vec::new();
        let mut transformed = 0usize;
        // back to front so earlier byte offsets stay valid
        for site in sites.iter().rev() {
            let Some(value) = params.get(site.param) else { continue };
            let dim = input.param_hints.get(site.param).and_then(|h| h.vector_dim);
            let vector = match VectorLiteral::parse(value).and_then(|v| v.with_dimension(dim)) {
                Ok(v) => v,
                Err(e) => {
                    debug!(target: "vector_opt", "param {} left bound: {}", site.param + 1, e);
                    continue;
                }
            };
            let rendered = vector.to_bracketed();
            if rendered.len() > self.max_literal_bytes {
                // stays a parameter; the out-of-band path wants bracketed text
                debug!(target: "vector_opt", "param {} literal is {} bytes (> {}); keeping it bound", site.param + 1, rendered.len(), self.max_literal_bytes);
                params[site.param] = TypedValue::Text(rendered);
                continue;
            }
            text.replace_range(site.start..site.end, &format!("TO_VECTOR('{}', {})", rendered, site.dtype));
            removed.push(site.param);
            transformed += 1;
        }

        let mut out = input.clone();
        removed.sort_unstable_by(|a, b| b.cmp(a));
        for idx in &removed {
            params.remove(*idx);
            if *idx < out.param_hints.len() { out.param_hints.remove(*idx); }
            if *idx < out.param_order.len() { out.param_order.remove(*idx); }
        }
        let remaining = text.matches('?').count();
        if remaining != params.len() {
            return Err(GatewayError::Optimization(format!(
                "placeholder count {} does not match {} remaining parameters",
                remaining,
                params.len()
            )));
        }
        out.sql = masked.unmask(&text);
        out.params = params;
        Ok((out, sites.len(), transformed))
    }

    /// No bound parameters: give bracketless `TO_VECTOR('1,2,3')` literals brackets.
    fn normalize_literals(&self, input: &TranslationResult, masked: &lexer::Masked) -> (TranslationResult, usize, usize) {
        let mut found = 0usize;
        let mut transformed = 0usize;
        let text = BRACKETLESS_LITERAL.replace_all(&masked.text, |c: &regex::Captures| {
            let token = format!("{}{}{}", lexer::MASK_OPEN, &c[2], lexer::MASK_CLOSE);
            let original = format!("{}{}", &c[1], masked.unmask(&token));
            let Some((lexer::SlotKind::Str, raw)) = masked.slot(&token) else { return original };
            let body = raw.trim_matches('\'');
            found += 1;
            if body.trim_start().starts_with('[') {
                return original;
            }
            match VectorLiteral::parse_text(body) {
                Ok(v) if v.encoding() == VectorEncoding::DelimitedText => {
                    transformed += 1;
                    format!("{}'{}'", &c[1], v.to_bracketed())
                }
                _ => original,
            }
        });
        if transformed == 0 {
            return (input.clone(), found, 0);
        }
        let mut out = input.clone();
        out.sql = masked.unmask(&text);
        (out, found, transformed)
    }

    pub fn stats(&self) -> OptimizerStats { self.history.lock().stats(self.budget_ms) }

    pub fn recent(&self) -> Vec<CallMetrics> { self.history.lock().recent() }
}
