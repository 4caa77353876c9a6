//! Small token-level rewrites: schema qualifiers, boolean literals, NOW(), column
//! vector types, positional placeholders, and catalog tagging.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::lexer::{Masked, SlotKind, MASK_CLOSE, MASK_OPEN};
use super::rules::TranslationRules;

static PUBLIC_QUALIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(^|[^\w.])public\s*\.").unwrap());
static QUOTED_QUALIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x{E000}(\d+)\x{E001}\s*\.").unwrap());
static BOOLEAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\bIS\s+(?:NOT\s+)?)?\b(TRUE|FALSE)\b").unwrap());
static NOW_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bNOW\s*\(\s*\)").unwrap());
static VECTOR_COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bVECTOR\s*\(\s*(\d+)\s*\)").unwrap());
static CATALOG_SCHEMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(pg_catalog|information_schema)\s*\.").unwrap());
static PG_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bpg_\w+\b").unwrap());
static REG_CAST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)::\s*reg(class|type|proc|namespace)\b").unwrap());
static CALL_OR_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\w+)\s*(\()?").unwrap());
static FROM_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\b").unwrap());

pub(crate) fn map_public_schema(text: &str, masked: &Masked, schema: &str) -> String {
    let out = PUBLIC_QUALIFIER.replace_all(text, |c: &Captures| format!("{}{}.", &c[1], schema));
    QUOTED_QUALIFIER
        .replace_all(&out, |c: &Captures| {
            let token = format!("{}{}{}", MASK_OPEN, &c[1], MASK_CLOSE);
            match masked.slot(&token) {
                Some((SlotKind::Ident, "\"public\"")) => format!("{}.", schema),
                _ => c[0].to_string(),
            }
        })
        .into_owned()
}

pub(crate) fn map_booleans(text: &str) -> String {
    BOOLEAN
        .replace_all(text, |c: &Captures| {
            if c.get(1).is_some() {
                return c[0].to_string();
            }
            if c[2].eq_ignore_ascii_case("TRUE") { "1".to_string() } else { "0".to_string() }
        })
        .into_owned()
}

pub(crate) fn map_now(text: &str) -> String { NOW_CALL.replace_all(text, "CURRENT_TIMESTAMP").into_owned() }

pub(crate) fn map_vector_columns(text: &str) -> String {
    VECTOR_COLUMN.replace_all(text, "VECTOR(FLOAT, $1)").into_owned()
}

/// `$n` -> `?`. Returns the client parameter index each emitted `?` refers to.
/// Pre-existing `?` placeholders bind positionally.
pub(crate) fn number_placeholders(text: &str) -> (String, Vec<usize>) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut order = Vec::new();
    let mut implicit = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '$' && chars.get(i + 1).map(|d| d.is_ascii_digit()).unwrap_or(false)
            && !(i > 0 && (chars[i - 1].is_alphanumeric() || chars[i - 1] == '_'))
        {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() { j += 1; }
            let n: usize = chars[i + 1..j].iter().collect::<String>().parse().unwrap_or(0);
            if n > 0 {
                out.push('?');
                order.push(n - 1);
                i = j;
                continue;
            }
        }
        if c == '?' {
            order.push(implicit);
            implicit += 1;
        }
        out.push(c);
        i += 1;
    }
    (out, order)
}

pub(crate) fn is_catalog_directed(text: &str, masked: &Masked, rules: &TranslationRules, is_select: bool) -> bool {
    if CATALOG_SCHEMA.is_match(text) || REG_CAST.is_match(text) {
        return true;
    }
    if PG_WORD.find_iter(text).any(|m| rules.is_catalog_table(m.as_str())) {
        return true;
    }
    let quoted_catalog = masked.slots().any(|(kind, raw)| {
        kind == SlotKind::Ident && {
            let name = raw.trim_matches('"').to_ascii_lowercase();
            name == "pg_catalog" || name == "information_schema" || rules.is_catalog_table(&name)
        }
    });
    if quoted_catalog {
        return true;
    }
    // SELECT version(), current_schema() ... answered without the backend
    if is_select && !FROM_WORD.is_match(text) {
        return CALL_OR_WORD.captures_iter(text).any(|c| {
            let name = &c[1];
            let bare_ok = ["current_user", "session_user", "current_schema", "current_catalog"]
                .iter()
                .any(|w| name.eq_ignore_ascii_case(w));
            (c.get(2).is_some() || bare_ok) && rules.is_local_function(name)
        });
    }
    false
}
