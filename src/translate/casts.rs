//! `expr::type` -> `CAST(expr AS TYPE)` / `TO_VECTOR(expr, FLOAT)`.

use std::collections::HashMap;

use super::lexer::{is_word_char, operand_before, splice};
use super::rules::{CastTarget, TranslationRules};
use super::ParamHint;

/// Reads the type name after `::` starting at `at`. Returns (base, args, is_array, end).
fn read_type(chars: &[char], at: usize) -> Option<(String, Option<String>, bool, usize)> {
    let mut i = at;
    while i < chars.len() && chars[i].is_whitespace() { i += 1; }
    let word = |i: &mut usize| -> String {
        let s = *i;
        while *i < chars.len() && is_word_char(chars[*i]) { *i += 1; }
        chars[s..*i].iter().collect::<String>().to_ascii_lowercase()
    };
    // schema-qualified type names (pg_catalog.int4)
    let mut base = word(&mut i);
    if base.is_empty() { return None; }
    if base == "pg_catalog" && chars.get(i) == Some(&'.') {
        i += 1;
        base = word(&mut i);
    }
    let peek_word = |from: usize| -> (String, usize) {
        let mut j = from;
        while j < chars.len() && chars[j] == ' ' { j += 1; }
        let mut k = j;
        let w = word(&mut k);
        (w, k)
    };
    match base.as_str() {
        "double" => {
            let (w, k) = peek_word(i);
            if w == "precision" { base = "double precision".into(); i = k; }
        }
        "character" => {
            let (w, k) = peek_word(i);
            if w == "varying" { base = "character varying".into(); i = k; }
        }
        "timestamp" | "time" => {
            let (w, k) = peek_word(i);
            if w == "with" || w == "without" {
                let (w2, k2) = peek_word(k);
                let (w3, k3) = peek_word(k2);
                if w2 == "time" && w3 == "zone" {
                    if w == "with" && base == "timestamp" { base = "timestamptz".into(); }
                    i = k3;
                }
            }
        }
        _ => {}
    }
    let mut args = None;
    let mut j = i;
    while j < chars.len() && chars[j] == ' ' { j += 1; }
    if chars.get(j) == Some(&'(') {
        let close = (j..chars.len()).find(|&k| chars[k] == ')')?;
        args = Some(chars[j + 1..close].iter().collect());
        i = close + 1;
    }
    let mut array = false;
    if chars.get(i) == Some(&'[') && chars.get(i + 1) == Some(&']') {
        array = true;
        i += 2;
    }
    Some((base, args, array, i))
}

fn placeholder_index(operand: &str) -> Option<usize> {
    operand.trim().strip_prefix('$').and_then(|n| n.parse::<usize>().ok()).filter(|n| *n > 0).map(|n| n - 1)
}

/// Rewrites casts in place; records per-`$n` hints gathered from the cast types.
pub(crate) fn rewrite_casts(
    chars: &mut Vec<char>,
    rules: &TranslationRules,
    hints: &mut HashMap<usize, ParamHint>,
) -> bool {
    let mut changed = false;
    let mut from = 0usize;
    loop {
        let Some(pos) = (from..chars.len().saturating_sub(1)).find(|&k| chars[k] == ':' && chars[k + 1] == ':') else {
            break;
        };
        let Some(start) = operand_before(chars, pos) else {
            from = pos + 2;
            continue;
        };
        let Some((base, args, array, end)) = read_type(chars, pos + 2) else {
            from = pos + 2;
            continue;
        };
        let Some(target) = rules.cast_target(&base, args.as_deref(), array) else {
            from = pos + 2;
            continue;
        };
        let operand: String = chars[start..pos].iter().collect::<String>().trim().to_string();
        let param = placeholder_index(&operand);
        let replacement = match target {
            CastTarget::Type { backend, pg_oid } => {
                if let Some(p) = param {
                    hints.entry(p).or_default().type_oid = pg_oid;
                }
                format!("CAST({} AS {})", operand, backend)
            }
            CastTarget::Vector { dim } => {
                if let Some(p) = param {
                    let h = hints.entry(p).or_default();
                    h.vector_dim = dim.or(h.vector_dim);
                }
                format!("TO_VECTOR({}, FLOAT)", operand)
            }
        };
        let start = (start..pos).find(|&k| !chars[k].is_whitespace()).unwrap_or(start);
        splice(chars, start, end, &replacement);
        from = start + replacement.chars().count();
        changed = true;
    }
    changed
}
