//! Similarity operator and function desugaring.
//!
//! `a <=> b` / `cosine_distance(a, b)` become backend calls wrapping both operands in
//! their original order. Backend cosine and dot product are similarities, so as a bare
//! ORDER BY key the sort direction is flipped (keeps nearest-first and the index-friendly
//! shape); anywhere else the value is converted back to the client's distance.

use super::lexer::{is_word_char, matching_paren, operand_after, operand_before, split_top_level, splice, word_at, Masked, SlotKind, MASK_OPEN};
use super::rules::{TranslationRules, VectorMetric};

const KEY_TERMINATORS: &[&str] = &["LIMIT", "OFFSET", "FETCH", "NULLS", "FOR", "UNION", "EXCEPT", "INTERSECT"];
const CLAUSE_WORDS: &[&str] = &["SELECT", "FROM", "WHERE", "GROUP", "HAVING", "LIMIT", "SET", "VALUES", "ON"];

fn is_placeholder(s: &str) -> bool {
    s == "?" || s.strip_prefix('$').map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())).unwrap_or(false)
}

fn is_vector_literal(s: &str, masked: &Masked) -> bool {
    matches!(masked.slot(s), Some((SlotKind::Str, raw)) if raw.trim_start_matches('\'').trim_start().starts_with('['))
}

fn is_vectorish(s: &str, masked: &Masked) -> bool {
    is_placeholder(s) || is_vector_literal(s, masked) || s.to_ascii_uppercase().starts_with("TO_VECTOR")
}

/// A distance call operand in backend form; vector placeholders and literals get wrapped.
fn vector_arg(s: &str, masked: &Masked) -> String {
    let s = s.trim();
    if is_placeholder(s) || is_vector_literal(s, masked) {
        format!("TO_VECTOR({}, FLOAT)", s)
    } else {
        s.to_string()
    }
}

/// If `[start, end)` is a complete ORDER BY key, returns the end of its optional
/// direction keyword and whether that keyword was DESC.
fn order_key_context(chars: &[char], start: usize, end: usize) -> Option<(usize, bool)> {
    let mut k = start;
    while k > 0 && chars[k - 1].is_whitespace() { k -= 1; }
    let follows_by = k >= 2 && word_at(chars, k - 2, "BY");
    if !follows_by && !(k > 0 && chars[k - 1] == ',') {
        return None;
    }
    let mut depth = 0i32;
    let mut found = false;
    let mut j = k;
    while j > 0 {
        j -= 1;
        match chars[j] {
            ')' => depth += 1,
            '(' => {
                if depth == 0 { return None; }
                depth -= 1;
            }
            _ if depth == 0 && word_at(chars, j, "BY") => {
                let mut p = j;
                while p > 0 && chars[p - 1].is_whitespace() { p -= 1; }
                if p >= 5 && word_at(chars, p - 5, "ORDER") {
                    found = true;
                    break;
                }
            }
            _ if depth == 0 && CLAUSE_WORDS.iter().any(|w| word_at(chars, j, w)) => return None,
            _ => {}
        }
    }
    if !found { return None; }

    let mut i = end;
    while i < chars.len() && chars[i].is_whitespace() { i += 1; }
    let mut dir_end = end;
    let mut desc = false;
    if word_at(chars, i, "ASC") {
        dir_end = i + 3;
    } else if word_at(chars, i, "DESC") {
        dir_end = i + 4;
        desc = true;
    }
    let mut t = dir_end;
    while t < chars.len() && chars[t].is_whitespace() { t += 1; }
    let terminated = t >= chars.len()
        || matches!(chars[t], ',' | ')' | ';' | MASK_OPEN)
        || KEY_TERMINATORS.iter().any(|w| word_at(chars, t, w));
    terminated.then_some((dir_end, desc))
}

/// Splice `call` over `[start, end)` in the form its position requires. Returns the
/// index just past the inserted text.
fn place(chars: &mut Vec<char>, start: usize, end: usize, call: &str, metric: VectorMetric) -> usize {
    match order_key_context(chars, start, end) {
        Some((dir_end, desc)) if metric.inverted() => {
            let text = format!("{} {}", call, if desc { "ASC" } else { "DESC" });
            splice(chars, start, dir_end, &text);
            start + text.chars().count()
        }
        Some(_) => {
            splice(chars, start, end, call);
            start + call.chars().count()
        }
        None => {
            let text = metric.value_expr(call);
            splice(chars, start, end, &text);
            start + text.chars().count()
        }
    }
}

pub(crate) fn rewrite_operators(chars: &mut Vec<char>, masked: &Masked, rules: &TranslationRules) -> bool {
    let mut changed = false;
    let mut from = 0usize;
    while from + 3 <= chars.len() {
        let hit = (from..=chars.len() - 3).find_map(|k| {
            rules
                .operators()
                .iter()
                .find(|(op, _)| op.chars().zip(&chars[k..k + 3]).all(|(a, b)| a == *b))
                .map(|(_, m)| (k, *m))
        });
        let Some((pos, metric)) = hit else { break };
        let Some(left_start) = operand_before(chars, pos) else {
            from = pos + 3;
            continue;
        };
        let Some((rb, re)) = operand_after(chars, pos + 3) else {
            from = pos + 3;
            continue;
        };
        let left: String = chars[left_start..pos].iter().collect::<String>().trim().to_string();
        let right: String = chars[rb..re].iter().collect();
        let call = format!("{}({}, {})", metric.backend_fn(), vector_arg(&left, masked), vector_arg(&right, masked));
        place(chars, left_start, re, &call, metric);
        // rescan from the call start so chained operators see the rewritten operand
        from = left_start;
        changed = true;
    }
    changed
}

pub(crate) fn rewrite_functions(chars: &mut Vec<char>, masked: &Masked, rules: &TranslationRules) -> bool {
    let mut changed = false;
    let mut i = 0usize;
    while i < chars.len() {
        if !is_word_char(chars[i]) || (i > 0 && (is_word_char(chars[i - 1]) || chars[i - 1] == '.')) {
            i += 1;
            continue;
        }
        let mut end = i;
        while end < chars.len() && is_word_char(chars[end]) { end += 1; }
        let name: String = chars[i..end].iter().collect();
        let Some(metric) = rules.function_metric(&name) else {
            i = end;
            continue;
        };
        let mut open = end;
        while open < chars.len() && chars[open].is_whitespace() { open += 1; }
        if chars.get(open) != Some(&'(') {
            i = end;
            continue;
        }
        let Some(close) = matching_paren(chars, open) else { break };
        let args = split_top_level(&chars[open + 1..close]);
        if args.len() != 2
            || (name.eq_ignore_ascii_case("distance") && !args.iter().any(|a| is_vectorish(a.trim(), masked)))
        {
            i = end;
            continue;
        }
        let call = format!("{}({}, {})", metric.backend_fn(), vector_arg(&args[0], masked), vector_arg(&args[1], masked));
        place(chars, i, close + 1, &call, metric);
        // arguments may hold further calls; continue inside the new text
        i += metric.backend_fn().len() + 1;
        changed = true;
    }
    changed
}
