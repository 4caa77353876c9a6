//! Statement classification (drives command tags and transaction state) and the
//! transaction-verb rewrite.

use once_cell::sync::Lazy;
use regex::Regex;

use super::lexer::{MASK_CLOSE, MASK_OPEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
    Rollback,
    RollbackToSavepoint,
    Savepoint,
    Release,
    Set,
    Show,
    Reset,
    Discard,
    Deallocate,
    Copy,
    Empty,
    /// Anything else; holds the command tag (`CREATE TABLE`, `TRUNCATE`, ...).
    Other(String),
}

impl StatementKind {
    pub fn returns_rows(&self) -> bool { matches!(self, StatementKind::Select | StatementKind::Show) }

    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            StatementKind::Begin
                | StatementKind::Commit
                | StatementKind::Rollback
                | StatementKind::RollbackToSavepoint
                | StatementKind::Savepoint
                | StatementKind::Release
        )
    }

    /// Statements that may change backend data.
    pub fn writes(&self) -> bool {
        matches!(self, StatementKind::Insert | StatementKind::Update | StatementKind::Delete | StatementKind::Other(_))
    }

    /// CommandComplete tag for `rows` processed rows.
    pub fn command_tag(&self, rows: u64) -> String {
        match self {
            StatementKind::Select => format!("SELECT {}", rows),
            StatementKind::Insert => format!("INSERT 0 {}", rows),
            StatementKind::Update => format!("UPDATE {}", rows),
            StatementKind::Delete => format!("DELETE {}", rows),
            StatementKind::Copy => format!("COPY {}", rows),
            StatementKind::Begin => "BEGIN".into(),
            StatementKind::Commit => "COMMIT".into(),
            StatementKind::Rollback | StatementKind::RollbackToSavepoint => "ROLLBACK".into(),
            StatementKind::Savepoint => "SAVEPOINT".into(),
            StatementKind::Release => "RELEASE".into(),
            StatementKind::Set => "SET".into(),
            StatementKind::Show => "SHOW".into(),
            StatementKind::Reset => "RESET".into(),
            StatementKind::Discard => "DISCARD ALL".into(),
            StatementKind::Deallocate => "DEALLOCATE".into(),
            StatementKind::Empty => String::new(),
            StatementKind::Other(tag) => tag.clone(),
        }
    }
}

/// Leading keywords of the statement, skipping comments and opening parentheses.
fn leading_words(masked: &str, n: usize) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = masked.chars().peekable();
    while words.len() < n {
        match chars.peek().copied() {
            None => break,
            Some(c) if c.is_whitespace() || c == '(' || c == ';' => { chars.next(); }
            Some(MASK_OPEN) => {
                // only comments can precede the first keyword; any other token ends the scan
                if !words.is_empty() { break; }
                for d in chars.by_ref() {
                    if d == MASK_CLOSE { break; }
                }
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let mut w = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' { w.push(d); chars.next(); } else { break; }
                }
                words.push(w.to_ascii_uppercase());
            }
            Some(_) => break,
        }
    }
    words
}

pub(crate) fn classify(masked: &str) -> StatementKind {
    let words = leading_words(masked, 4);
    let Some(first) = words.first() else { return StatementKind::Empty };
    let second = words.get(1).map(String::as_str).unwrap_or("");
    match first.as_str() {
        "SELECT" | "WITH" | "VALUES" | "TABLE" | "EXPLAIN" => StatementKind::Select,
        "SHOW" => StatementKind::Show,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "BEGIN" | "START" => StatementKind::Begin,
        "COMMIT" | "END" => StatementKind::Commit,
        "ROLLBACK" | "ABORT" => {
            if second == "TO" || (matches!(second, "WORK" | "TRANSACTION") && words.get(2).map(String::as_str) == Some("TO")) {
                StatementKind::RollbackToSavepoint
            } else {
                StatementKind::Rollback
            }
        }
        "SAVEPOINT" => StatementKind::Savepoint,
        "RELEASE" => StatementKind::Release,
        "SET" => StatementKind::Set,
        "RESET" => StatementKind::Reset,
        "DISCARD" => StatementKind::Discard,
        "DEALLOCATE" => StatementKind::Deallocate,
        "COPY" => StatementKind::Copy,
        "CREATE" | "DROP" | "ALTER" => {
            let object = words
                .iter()
                .skip(1)
                .find(|w| !matches!(w.as_str(), "UNIQUE" | "OR" | "REPLACE" | "TEMP" | "TEMPORARY" | "GLOBAL" | "LOCAL" | "IF"));
            match object {
                Some(o) => StatementKind::Other(format!("{} {}", first, o)),
                None => StatementKind::Other(first.clone()),
            }
        }
        "TRUNCATE" => StatementKind::Other("TRUNCATE TABLE".into()),
        other => StatementKind::Other(other.to_string()),
    }
}

static BEGIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*BEGIN(?:\s+(?:WORK|TRANSACTION))?\b(.*?)\s*;?\s*$").unwrap());
static COMMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*(?:COMMIT|END)(?:\s+(?:WORK|TRANSACTION))?\s*;?\s*$").unwrap());
static ROLLBACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*(?:ROLLBACK|ABORT)(?:\s+(?:WORK|TRANSACTION))?\s*;?\s*$").unwrap());

/// Map postgres transaction verbs onto backend forms; None when nothing applies.
pub(crate) fn rewrite_transaction(masked: &str) -> Option<String> {
    if let Some(c) = BEGIN_RE.captures(masked) {
        let rest = c.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        return Some(if rest.is_empty() { "START TRANSACTION".to_string() } else { format!("START TRANSACTION {}", rest) });
    }
    if COMMIT_RE.is_match(masked) {
        return (masked.trim().trim_end_matches(';').trim() != "COMMIT").then(|| "COMMIT".to_string());
    }
    if ROLLBACK_RE.is_match(masked) {
        return (masked.trim().trim_end_matches(';').trim() != "ROLLBACK").then(|| "ROLLBACK".to_string());
    }
    None
}
