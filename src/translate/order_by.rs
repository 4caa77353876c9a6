//! `ORDER BY alias` -> `ORDER BY <expression>` for aliases of computed select items.
//! The backend cannot sort by an alias of an expression.

use once_cell::sync::Lazy;
use regex::Regex;

use super::lexer::{split_top_level, splice, word_at};

static ALIASED_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^(.*\S)\s+AS\s+(\w+)$").unwrap());
static SIMPLE_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.]+$").unwrap());
static ORDER_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(\w+)(?:\s+(ASC|DESC))?(\s+NULLS\s+(?:FIRST|LAST))?$").unwrap());
static INVERTED_SIMILARITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\((?:1 - |-)(VECTOR_(?:COSINE|DOT_PRODUCT)\(.*\))\)$").unwrap());

const ORDER_END_WORDS: &[&str] = &["LIMIT", "OFFSET", "FETCH", "FOR", "UNION", "EXCEPT", "INTERSECT"];

/// First occurrence of `word` at parenthesis depth 0 relative to `from`; stops at an
/// unmatched `)`.
fn find_top_level(chars: &[char], from: usize, word: &str) -> Option<usize> {
    let mut depth = 0i32;
    for k in from..chars.len() {
        match chars[k] {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 { return None; }
            }
            _ if depth == 0 && word_at(chars, k, word) => return Some(k),
            _ => {}
        }
    }
    None
}

fn order_list_end(chars: &[char], from: usize) -> usize {
    let mut depth = 0i32;
    for k in from..chars.len() {
        match chars[k] {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 { return k; }
            }
            ';' if depth == 0 => return k,
            _ if depth == 0 && ORDER_END_WORDS.iter().any(|w| word_at(chars, k, w)) => return k,
            _ => {}
        }
    }
    chars.len()
}

pub(crate) fn resolve_order_by_aliases(chars: &mut Vec<char>) -> bool {
    let Some(select) = find_top_level(chars, 0, "SELECT") else { return false };
    let Some(from) = find_top_level(chars, select + 6, "FROM") else { return false };
    let aliases: Vec<(String, String)> = split_top_level(&chars[select + 6..from])
        .into_iter()
        .filter_map(|item| {
            let c = ALIASED_ITEM.captures(&item)?;
            let expr = c[1].trim().to_string();
            if SIMPLE_IDENT.is_match(&expr) { return None; }
            Some((c[2].to_ascii_lowercase(), expr))
        })
        .collect();
    if aliases.is_empty() { return false; }

    let Some(order) = find_top_level(chars, from, "ORDER") else { return false };
    let mut by = order + 5;
    while by < chars.len() && chars[by].is_whitespace() { by += 1; }
    if !word_at(chars, by, "BY") { return false; }
    let list_start = by + 2;
    let list_end = order_list_end(chars, list_start);

    let keys = split_top_level(&chars[list_start..list_end]);
    let mut changed = false;
    let rewritten: Vec<String> = keys
        .iter()
        .map(|key| {
            let Some(c) = ORDER_KEY.captures(key) else { return key.clone() };
            let Some((_, expr)) = aliases.iter().find(|(a, _)| *a == c[1].to_ascii_lowercase()) else {
                return key.clone();
            };
            changed = true;
            let desc = c.get(2).map(|d| d.as_str().eq_ignore_ascii_case("DESC")).unwrap_or(false);
            let nulls = c.get(3).map(|n| n.as_str()).unwrap_or("");
            if let Some(inner) = INVERTED_SIMILARITY.captures(expr) {
                return format!("{} {}{}", &inner[1], if desc { "ASC" } else { "DESC" }, nulls);
            }
            match c.get(2) {
                Some(dir) => format!("{} {}{}", expr, dir.as_str(), nulls),
                None => format!("{}{}", expr, nulls),
            }
        })
        .collect();
    if !changed { return false; }
    let trailing = if list_end < chars.len() { " " } else { "" };
    let replacement = format!(" {}{}", rewritten.join(", "), trailing);
    splice(chars, list_start, list_end, &replacement);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(sql: &str) -> String {
        let mut chars: Vec<char> = sql.chars().collect();
        resolve_order_by_aliases(&mut chars);
        chars.into_iter().collect()
    }

    #[test]
    fn computed_alias_is_inlined() {
        assert_eq!(
            run("SELECT id, price * qty AS total FROM t ORDER BY total DESC LIMIT 3"),
            "SELECT id, price * qty AS total FROM t ORDER BY price * qty DESC LIMIT 3"
        );
    }

    #[test]
    fn plain_column_alias_is_left_alone() {
        let sql = "SELECT name AS n FROM t ORDER BY n";
        assert_eq!(run(sql), sql);
    }

    #[test]
    fn similarity_alias_sorts_on_the_raw_call() {
        assert_eq!(
            run("SELECT id, (1 - VECTOR_COSINE(e, TO_VECTOR(?, FLOAT))) AS d FROM t ORDER BY d LIMIT 5"),
            "SELECT id, (1 - VECTOR_COSINE(e, TO_VECTOR(?, FLOAT))) AS d FROM t ORDER BY VECTOR_COSINE(e, TO_VECTOR(?, FLOAT)) DESC LIMIT 5"
        );
    }
}
