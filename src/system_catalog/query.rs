//! The catalog query shapes clients send: a single-table SELECT with an optional
//! filter, ordering and limit. Anything larger (joins, subqueries, grouping) is
//! rejected as a catalog error rather than guessed at.

use crate::backend::TypedValue;
use crate::error::{GatewayError, GatewayResult};
use crate::translate::lexer::{self, split_top_level, word_at, Masked, SlotKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    /// `'name'::regclass`, resolved against the snapshot at evaluation time.
    RegClass(String),
    RegNamespace(String),
    /// `current_schema()` and friends, evaluated per session.
    Local(String),
}

impl Value {
    pub fn from_param(v: &TypedValue) -> Value {
        match v {
            TypedValue::Null => Value::Null,
            TypedValue::Bool(b) => Value::Bool(*b),
            TypedValue::Int(i) => Value::Int(*i),
            TypedValue::Float(f) => Value::Float(*f),
            TypedValue::Text(s) => Value::Text(s.clone()),
            TypedValue::Bytes(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }

    /// Text used for equality against a column cast to string.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::Null | Value::List(_) | Value::RegClass(_) | Value::RegNamespace(_) | Value::Local(_) => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn has_regclass(&self) -> bool {
        match self {
            Value::RegClass(_) => true,
            Value::List(items) => items.iter().any(|v| v.has_regclass()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Value(Value),
    /// Lowercased function name without a `pg_catalog.` prefix.
    Call(String, Vec<Operand>),
}

impl Operand {
    fn has_regclass(&self) -> bool {
        match self {
            Operand::Column(_) => false,
            Operand::Value(v) => v.has_regclass(),
            Operand::Call(name, args) => name == "regclass_name" || args.iter().any(|a| a.has_regclass()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn flipped(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { column: String, op: CompareOp, value: Value },
    InList { column: String, values: Vec<Value>, negated: bool },
    Like { column: String, pattern: Value, negated: bool, case_insensitive: bool },
    IsNull { column: String, negated: bool },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Constant(bool),
}

impl Predicate {
    fn has_regclass(&self) -> bool {
        match self {
            Predicate::Compare { value, .. } => value.has_regclass(),
            Predicate::InList { values, .. } => values.iter().any(|v| v.has_regclass()),
            Predicate::And(ps) | Predicate::Or(ps) => ps.iter().any(|p| p.has_regclass()),
            Predicate::Not(p) => p.has_regclass(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*` or `alias.*`
    Star,
    CountStar { alias: Option<String> },
    Expr { operand: Operand, alias: Option<String> },
}

impl SelectItem {
    /// Output column name, the way postgres labels it.
    pub fn label(&self) -> String {
        match self {
            SelectItem::Star => "*".into(),
            SelectItem::CountStar { alias } => alias.clone().unwrap_or_else(|| "count".into()),
            SelectItem::Expr { operand, alias } => alias.clone().unwrap_or_else(|| match operand {
                Operand::Column(c) => c.clone(),
                Operand::Call(name, _) if name == "regclass_name" => "oid".into(),
                Operand::Call(name, _) => name.clone(),
                Operand::Value(_) => "?column?".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderTarget {
    Column(String),
    /// 1-based select-list position
    Position(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub target: OrderTarget,
    pub descending: bool,
    pub nulls_last: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    /// Table reference as written (`pg_catalog.pg_class`, `tables`, ...); None for FROM-less selects.
    pub table: Option<String>,
    pub items: Vec<SelectItem>,
    pub filter: Option<Predicate>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: usize,
}

const UNSUPPORTED_WORDS: &[&str] = &["JOIN", "UNION", "INTERSECT", "EXCEPT", "GROUP", "HAVING", "WITH", "DISTINCT", "WINDOW"];

impl CatalogQuery {
    /// `params` fill `$n` placeholders; missing ones read as NULL (Describe before Bind).
    pub fn parse(sql: &str, params: &[TypedValue]) -> GatewayResult<CatalogQuery> {
        let masked = lexer::mask(sql)?;
        let mut text = masked.text.clone();
        for (idx, (kind, _)) in masked.slots().enumerate() {
            if kind == SlotKind::Comment {
                text = text.replace(&format!("{}{}{}", lexer::MASK_OPEN, idx, lexer::MASK_CLOSE), " ");
            }
        }
        let text = text.trim().trim_end_matches(';').trim().to_string();
        let chars: Vec<char> = text.chars().collect();
        if !word_at(&chars, 0, "SELECT") {
            return Err(GatewayError::catalog("only SELECT statements can be answered from the catalog"));
        }
        let p = Parser { masked: &masked, params };
        let selects = (0..chars.len()).filter(|i| word_at(&chars, *i, "SELECT")).count();
        if selects > 1 {
            return Err(GatewayError::catalog("subqueries against the catalog are not supported"));
        }
        for w in UNSUPPORTED_WORDS {
            if (0..chars.len()).any(|i| word_at(&chars, i, w)) {
                return Err(GatewayError::catalog(format!("{} is not supported in catalog queries", w)));
            }
        }

        let clause_words = ["WHERE", "ORDER", "LIMIT", "OFFSET", "FOR"];
        let from = top_level_word(&chars, "FROM", 6);
        let select_end = from.unwrap_or_else(|| next_clause(&chars, 6, &clause_words));
        let items = split_top_level(&chars[6..select_end])
            .iter()
            .map(|s| p.select_item(s))
            .collect::<GatewayResult<Vec<_>>>()?;
        if items.is_empty() {
            return Err(GatewayError::catalog("empty select list"));
        }

        let mut pos = select_end;
        let mut table = None;
        if let Some(f) = from {
            let end = next_clause(&chars, f + 4, &clause_words);
            let tref: String = chars[f + 4..end].iter().collect();
            if tref.contains(',') {
                return Err(GatewayError::catalog("multi-table catalog queries are not supported"));
            }
            let name = tref.split_whitespace().next().ok_or_else(|| GatewayError::catalog("missing table after FROM"))?;
            if name.starts_with('(') {
                return Err(GatewayError::catalog("derived tables are not supported in catalog queries"));
            }
            table = Some(masked.unmask(name));
            pos = end;
        }

        let mut filter = None;
        let mut order_by = Vec::new();
        let mut limit = None;
        let mut offset = 0usize;
        while pos < chars.len() {
            if word_at(&chars, pos, "WHERE") {
                let end = next_clause(&chars, pos + 5, &["ORDER", "LIMIT", "OFFSET", "FOR"]);
                filter = Some(p.predicate(&chars[pos + 5..end].iter().collect::<String>())?);
                pos = end;
            } else if word_at(&chars, pos, "ORDER") {
                let end = next_clause(&chars, pos + 5, &["LIMIT", "OFFSET", "FOR"]);
                let body: String = chars[pos + 5..end].iter().collect();
                let body = body.trim_start();
                let body = body
                    .get(..2)
                    .filter(|b| b.eq_ignore_ascii_case("BY"))
                    .map(|_| &body[2..])
                    .ok_or_else(|| GatewayError::catalog("expected BY after ORDER"))?;
                order_by = p.order_keys(body)?;
                pos = end;
            } else if word_at(&chars, pos, "LIMIT") {
                let end = next_clause(&chars, pos + 5, &["OFFSET", "FOR"]);
                let raw: String = chars[pos + 5..end].iter().collect();
                if !raw.trim().eq_ignore_ascii_case("ALL") {
                    limit = Some(p.count(&raw)?);
                }
                pos = end;
            } else if word_at(&chars, pos, "OFFSET") {
                let end = next_clause(&chars, pos + 6, &["LIMIT", "FOR"]);
                let raw: String = chars[pos + 6..end].iter().collect();
                let raw = raw.trim().trim_end_matches("ROWS").trim_end_matches("rows").to_string();
                offset = p.count(&raw)?;
                pos = end;
            } else if word_at(&chars, pos, "FOR") {
                // FOR UPDATE / FOR SHARE: nothing to lock
                break;
            } else {
                pos += 1;
            }
        }

        Ok(CatalogQuery { table, items, filter, order_by, limit, offset })
    }

    /// Whether evaluation needs relation names resolved from backend metadata.
    pub fn uses_regclass(&self) -> bool {
        self.filter.as_ref().map(|f| f.has_regclass()).unwrap_or(false)
            || self.items.iter().any(|i| matches!(i, SelectItem::Expr { operand, .. } if operand.has_regclass()))
    }
}

fn top_level_word(chars: &[char], word: &str, from: usize) -> Option<usize> {
    let mut depth = 0i32;
    for i in from..chars.len() {
        match chars[i] {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            _ if depth == 0 && word_at(chars, i, word) => return Some(i),
            _ => {}
        }
    }
    None
}

fn next_clause(chars: &[char], from: usize, words: &[&str]) -> usize {
    words.iter().filter_map(|w| top_level_word(chars, w, from)).min().unwrap_or(chars.len())
}

/// Split at top-level occurrences of a keyword (AND / OR).
fn split_word(s: &str, word: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut from = 0usize;
    while let Some(at) = top_level_word(&chars, word, from) {
        parts.push(chars[start..at].iter().collect::<String>().trim().to_string());
        start = at + word.len();
        from = start;
    }
    parts.push(chars[start..].iter().collect::<String>().trim().to_string());
    parts
}

fn strip_outer_parens(s: &str) -> Option<&str> {
    let t = s.trim();
    if !t.starts_with('(') {
        return None;
    }
    let chars: Vec<char> = t.chars().collect();
    let close = lexer::matching_paren(&chars, 0)?;
    if close == chars.len() - 1 {
        let inner_start = t.char_indices().nth(1).map(|(i, _)| i)?;
        let inner_end = t.char_indices().nth(close).map(|(i, _)| i)?;
        Some(&t[inner_start..inner_end])
    } else {
        None
    }
}

/// Find the first top-level comparison operator: (byte offset, op, byte length).
fn find_comparison(s: &str) -> Option<(usize, CompareOp, usize)> {
    let mut depth = 0i32;
    let bytes: Vec<(usize, char)> = s.char_indices().collect();
    for (k, &(i, c)) in bytes.iter().enumerate() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            '<' | '>' | '=' | '!' if depth == 0 => {
                let next = bytes.get(k + 1).map(|(_, n)| *n);
                let two = match (c, next) {
                    ('<', Some('=')) => Some(CompareOp::LtEq),
                    ('>', Some('=')) => Some(CompareOp::GtEq),
                    ('<', Some('>')) | ('!', Some('=')) => Some(CompareOp::NotEq),
                    _ => None,
                };
                if let Some(op) = two {
                    return Some((i, op, 2));
                }
                let one = match c {
                    '=' => CompareOp::Eq,
                    '<' => CompareOp::Lt,
                    '>' => CompareOp::Gt,
                    _ => continue,
                };
                return Some((i, one, 1));
            }
            _ => {}
        }
    }
    None
}

/// `{a,b,"c d"}` array text.
fn parse_array_text(s: &str) -> Vec<Value> {
    let inner = s.trim().trim_start_matches('{').trim_end_matches('}');
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|p| {
            let p = p.trim().trim_matches('"');
            if p.eq_ignore_ascii_case("NULL") { Value::Null } else { Value::Text(p.to_string()) }
        })
        .collect()
}

fn is_number(s: &str) -> bool {
    let t = s.strip_prefix('-').unwrap_or(s);
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit() || c == '.') && t.chars().filter(|c| *c == '.').count() <= 1
}

struct Parser<'a> {
    masked: &'a Masked,
    params: &'a [TypedValue],
}

impl<'a> Parser<'a> {
    /// Identifier text: quotes removed, unquoted names lowercased.
    fn ident(&self, raw: &str) -> String {
        let raw = raw.trim();
        if let Some((SlotKind::Ident, q)) = self.masked.slot(raw) {
            return q.trim_matches('"').replace("\"\"", "\"");
        }
        self.masked.unmask(raw).to_lowercase()
    }

    /// Last dotted segment of a column reference.
    fn column_name(&self, raw: &str) -> String {
        let last = raw.rsplit('.').next().unwrap_or(raw);
        self.ident(last)
    }

    fn is_identifier(&self, s: &str) -> bool {
        !s.is_empty()
            && s.split('.').all(|part| {
                let part = part.trim();
                matches!(self.masked.slot(part), Some((SlotKind::Ident, _)))
                    || (!part.is_empty()
                        && part.chars().all(lexer::is_word_char)
                        && !part.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true))
            })
    }

    fn param(&self, token: &str) -> Option<Value> {
        let n: usize = token.strip_prefix('$')?.parse().ok()?;
        Some(n.checked_sub(1).and_then(|i| self.params.get(i)).map(Value::from_param).unwrap_or(Value::Null))
    }

    fn string_literal(&self, s: &str) -> Option<String> {
        match self.masked.slot(s)? {
            (SlotKind::Str, raw) if raw.starts_with('$') => {
                // $tag$body$tag$
                let tag_end = raw[1..].find('$')? + 2;
                let tag = &raw[..tag_end];
                raw[tag_end..].strip_suffix(tag).map(|b| b.to_string())
            }
            (SlotKind::Str, raw) => {
                let raw = raw.strip_prefix(['E', 'e']).unwrap_or(raw);
                let body = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')).unwrap_or(raw);
                Some(body.replace("''", "'"))
            }
            _ => None,
        }
    }

    fn select_item(&self, raw: &str) -> GatewayResult<SelectItem> {
        let s = raw.trim();
        if s == "*" || s.ends_with(".*") {
            return Ok(SelectItem::Star);
        }
        let (expr, alias) = self.split_alias(s);
        let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.eq_ignore_ascii_case("count(*)") || compact.eq_ignore_ascii_case("count(1)") {
            return Ok(SelectItem::CountStar { alias });
        }
        Ok(SelectItem::Expr { operand: self.operand(&expr)?, alias })
    }

    /// `expr [AS] alias`
    fn split_alias(&self, s: &str) -> (String, Option<String>) {
        let chars: Vec<char> = s.chars().collect();
        if let Some(at) = (0..chars.len()).rev().find(|i| word_at(&chars, *i, "AS")) {
            let depth: i32 = chars[..at].iter().map(|c| match c { '(' => 1, ')' => -1, _ => 0 }).sum();
            if depth == 0 {
                let expr: String = chars[..at].iter().collect();
                let alias: String = chars[at + 2..].iter().collect();
                return (expr.trim().to_string(), Some(self.ident(alias.trim())));
            }
        }
        // bare trailing alias: `relname name`
        if let Some(idx) = s.rfind(char::is_whitespace) {
            let (head, tail) = (s[..idx].trim(), s[idx..].trim());
            let depth: i32 = head.chars().map(|c| match c { '(' => 1, ')' => -1, _ => 0 }).sum();
            if depth == 0 && self.is_identifier(tail) && !tail.contains('.') && !head.ends_with("::") {
                return (head.to_string(), Some(self.ident(tail)));
            }
        }
        (s.to_string(), None)
    }

    fn operand(&self, raw: &str) -> GatewayResult<Operand> {
        let s = raw.trim();
        let mut parts = s.split("::");
        let base = parts.next().unwrap_or("").trim();
        let casts: Vec<String> = parts
            .map(|c| {
                let c = self.masked.unmask(c.trim()).replace('"', "").to_lowercase();
                let c = c.strip_prefix("pg_catalog.").unwrap_or(&c).to_string();
                c.split('(').next().unwrap_or("").trim().to_string()
            })
            .collect();
        let mut operand = self.base_operand(base)?;
        for cast in &casts {
            operand = match (cast.as_str(), operand) {
                ("regclass", Operand::Value(Value::Text(name))) => Operand::Value(Value::RegClass(name)),
                ("regclass", Operand::Column(c)) => Operand::Call("regclass_name".into(), vec![Operand::Column(c)]),
                ("regnamespace", Operand::Value(Value::Text(name))) => Operand::Value(Value::RegNamespace(name)),
                ("oid" | "int2" | "int4" | "int8" | "integer" | "bigint" | "smallint", Operand::Value(Value::Text(t))) => {
                    match t.trim().parse::<i64>() {
                        Ok(n) => Operand::Value(Value::Int(n)),
                        Err(_) => Operand::Value(Value::Text(t)),
                    }
                }
                (_, other) => other,
            };
        }
        Ok(operand)
    }

    fn base_operand(&self, s: &str) -> GatewayResult<Operand> {
        if let Some(inner) = strip_outer_parens(s) {
            return self.operand(inner);
        }
        if let Some(text) = self.string_literal(s) {
            return Ok(Operand::Value(Value::Text(text)));
        }
        if let Some(v) = self.param(s) {
            return Ok(Operand::Value(v));
        }
        if is_number(s) {
            return Ok(Operand::Value(match s.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Float(s.parse().map_err(|_| GatewayError::catalog(format!("bad number {}", s)))?),
            }));
        }
        match s.to_ascii_lowercase().as_str() {
            "true" => return Ok(Operand::Value(Value::Bool(true))),
            "false" => return Ok(Operand::Value(Value::Bool(false))),
            "null" => return Ok(Operand::Value(Value::Null)),
            "current_user" | "session_user" | "user" | "current_schema" | "current_catalog" | "current_role" => {
                return Ok(Operand::Call(s.to_ascii_lowercase(), Vec::new()));
            }
            _ => {}
        }
        let upper = s.to_ascii_uppercase();
        if upper.starts_with("ARRAY") && s[5..].trim_start().starts_with('[') && s.ends_with(']') {
            let open = s.find('[').unwrap_or(5);
            let inner: Vec<char> = s[open + 1..s.len() - 1].chars().collect();
            let values = split_top_level(&inner)
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| match self.operand(p)? {
                    Operand::Value(v) => Ok(v),
                    _ => Err(GatewayError::catalog("ARRAY elements must be constants")),
                })
                .collect::<GatewayResult<Vec<_>>>()?;
            return Ok(Operand::Value(Value::List(values)));
        }
        if let Some(open) = s.find('(') {
            let name = s[..open].trim();
            if s.ends_with(')') && self.is_identifier(name) {
                let chars: Vec<char> = s.chars().collect();
                let open_c = s[..open].chars().count();
                let inner = &chars[open_c + 1..chars.len() - 1];
                let args = split_top_level(inner)
                    .iter()
                    .filter(|a| !a.is_empty())
                    .map(|a| self.operand(a))
                    .collect::<GatewayResult<Vec<_>>>()?;
                let name = name.to_ascii_lowercase();
                let name = name.strip_prefix("pg_catalog.").unwrap_or(&name).to_string();
                return Ok(Operand::Call(name, args));
            }
        }
        if self.is_identifier(s) {
            return Ok(Operand::Column(self.column_name(s)));
        }
        Err(GatewayError::catalog(format!("unsupported catalog expression: {}", self.masked.unmask(s))))
    }

    fn predicate(&self, raw: &str) -> GatewayResult<Predicate> {
        let ors = split_word(raw, "OR");
        if ors.len() > 1 {
            return Ok(Predicate::Or(ors.iter().map(|p| self.predicate(p)).collect::<GatewayResult<_>>()?));
        }
        let ands = split_word(raw, "AND");
        if ands.len() > 1 {
            return Ok(Predicate::And(ands.iter().map(|p| self.atom(p)).collect::<GatewayResult<_>>()?));
        }
        self.atom(raw)
    }

    fn atom(&self, raw: &str) -> GatewayResult<Predicate> {
        let s = raw.trim();
        if let Some(inner) = strip_outer_parens(s) {
            return self.predicate(inner);
        }
        let chars: Vec<char> = s.chars().collect();
        if word_at(&chars, 0, "NOT") {
            return Ok(Predicate::Not(Box::new(self.atom(&s[3..])?)));
        }
        let upper = s.to_ascii_uppercase();
        if upper.ends_with(" IS NOT NULL") {
            return Ok(Predicate::IsNull { column: self.column_operand(&s[..s.len() - 12])?, negated: true });
        }
        if upper.ends_with(" IS NULL") {
            return Ok(Predicate::IsNull { column: self.column_operand(&s[..s.len() - 8])?, negated: false });
        }
        for (word, ci) in [("LIKE", false), ("ILIKE", true)] {
            if let Some(at) = top_level_word(&chars, word, 0) {
                let head: String = chars[..at].iter().collect();
                let head = head.trim_end();
                let (left, negated) = match head.to_ascii_uppercase().ends_with(" NOT") {
                    true => (&head[..head.len() - 4], true),
                    false => (head, false),
                };
                let right: String = chars[at + word.len()..].iter().collect();
                let pattern = match self.operand(&right)? {
                    Operand::Value(v) => v,
                    _ => return Err(GatewayError::catalog("LIKE pattern must be a constant")),
                };
                return Ok(Predicate::Like { column: self.column_operand(left)?, pattern, negated, case_insensitive: ci });
            }
        }
        if let Some(at) = top_level_word(&chars, "IN", 0) {
            let head: String = chars[..at].iter().collect();
            let head = head.trim_end();
            let (left, negated) = match head.to_ascii_uppercase().ends_with(" NOT") {
                true => (&head[..head.len() - 4], true),
                false => (head, false),
            };
            let right: String = chars[at + 2..].iter().collect();
            let inner = strip_outer_parens(&right).ok_or_else(|| GatewayError::catalog("IN expects a parenthesized list"))?;
            let inner_chars: Vec<char> = inner.chars().collect();
            let values = split_top_level(&inner_chars)
                .iter()
                .map(|p| match self.operand(p)? {
                    Operand::Value(v) => Ok(v),
                    _ => Err(GatewayError::catalog("IN list elements must be constants")),
                })
                .collect::<GatewayResult<Vec<_>>>()?;
            return Ok(Predicate::InList { column: self.column_operand(left)?, values, negated });
        }
        if let Some((at, op, len)) = find_comparison(s) {
            let left = s[..at].trim();
            let right = s[at + len..].trim();
            let rchars: Vec<char> = right.chars().collect();
            // = ANY(array) / <> ALL(array)
            for (word, negated) in [("ANY", false), ("SOME", false), ("ALL", true)] {
                if word_at(&rchars, 0, word) {
                    let arg = strip_outer_parens(&right[word.len()..])
                        .ok_or_else(|| GatewayError::catalog(format!("{} expects a parenthesized array", word)))?;
                    let values = match self.operand(arg)? {
                        Operand::Value(Value::List(vs)) => vs,
                        Operand::Value(Value::Text(t)) => parse_array_text(&t),
                        Operand::Value(Value::Null) => Vec::new(),
                        _ => return Err(GatewayError::catalog("ANY/ALL expects an array constant")),
                    };
                    let ok = (op == CompareOp::Eq && !negated) || (op == CompareOp::NotEq && negated);
                    if !ok {
                        return Err(GatewayError::catalog("only = ANY(..) and <> ALL(..) are supported"));
                    }
                    return Ok(Predicate::InList { column: self.column_operand(left)?, values, negated });
                }
            }
            return match (self.operand(left)?, self.operand(right)?) {
                (Operand::Column(column), Operand::Value(value)) => Ok(Predicate::Compare { column, op, value }),
                (Operand::Value(value), Operand::Column(column)) => Ok(Predicate::Compare { column, op: op.flipped(), value }),
                (Operand::Column(a), Operand::Column(b)) if a == b => Ok(Predicate::Constant(op == CompareOp::Eq || op == CompareOp::LtEq || op == CompareOp::GtEq)),
                (Operand::Column(_), Operand::Column(_)) => Err(GatewayError::catalog("column-to-column comparisons need a join")),
                (Operand::Value(a), Operand::Value(b)) => Ok(Predicate::Constant(constant_compare(&a, op, &b))),
                (Operand::Column(column), Operand::Call(name, _)) => Ok(Predicate::Compare { column, op, value: Value::Local(name) }),
                (Operand::Call(name, _), Operand::Column(column)) => {
                    Ok(Predicate::Compare { column, op: op.flipped(), value: Value::Local(name) })
                }
                _ => Err(GatewayError::catalog("unsupported comparison in catalog query")),
            };
        }
        match self.operand(s)? {
            Operand::Column(column) => Ok(Predicate::Compare { column, op: CompareOp::Eq, value: Value::Bool(true) }),
            Operand::Value(Value::Bool(b)) => Ok(Predicate::Constant(b)),
            _ => Err(GatewayError::catalog(format!("unsupported predicate: {}", self.masked.unmask(s)))),
        }
    }

    fn column_operand(&self, s: &str) -> GatewayResult<String> {
        match self.operand(s)? {
            Operand::Column(c) => Ok(c),
            _ => Err(GatewayError::catalog(format!("expected a column, found {}", self.masked.unmask(s.trim())))),
        }
    }

    fn order_keys(&self, body: &str) -> GatewayResult<Vec<OrderKey>> {
        let chars: Vec<char> = body.chars().collect();
        split_top_level(&chars)
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| {
                let words: Vec<&str> = k.split_whitespace().collect();
                let mut descending = false;
                let mut nulls_last: Option<bool> = None;
                let mut expr_len = words.len();
                let mut i = 1;
                while i < words.len() {
                    match words[i].to_ascii_uppercase().as_str() {
                        "ASC" => { expr_len = expr_len.min(i); }
                        "DESC" => { expr_len = expr_len.min(i); descending = true; }
                        "NULLS" => {
                            expr_len = expr_len.min(i);
                            nulls_last = words.get(i + 1).map(|w| w.eq_ignore_ascii_case("LAST"));
                            i += 1;
                        }
                        _ => {}
                    }
                    i += 1;
                }
                let expr = words[..expr_len].join(" ");
                let target = match expr.parse::<usize>() {
                    Ok(n) => OrderTarget::Position(n),
                    Err(_) => match self.operand(&expr)? {
                        Operand::Column(c) => OrderTarget::Column(c),
                        _ => return Err(GatewayError::catalog("ORDER BY supports columns and positions only")),
                    },
                };
                // postgres default: NULLS LAST for ASC, NULLS FIRST for DESC
                Ok(OrderKey { target, descending, nulls_last: nulls_last.unwrap_or(!descending) })
            })
            .collect()
    }

    fn count(&self, raw: &str) -> GatewayResult<usize> {
        let raw = raw.trim();
        let v = self.param(raw).unwrap_or_else(|| Value::Text(raw.to_string()));
        v.as_f64()
            .filter(|n| *n >= 0.0)
            .map(|n| n as usize)
            .ok_or_else(|| GatewayError::catalog(format!("invalid row count {}", raw)))
    }
}

fn constant_compare(a: &Value, op: CompareOp, b: &Value) -> bool {
    let ord = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a.as_key(), b.as_key()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
    };
    let Some(ord) = ord else { return false };
    match op {
        CompareOp::Eq => ord.is_eq(),
        CompareOp::NotEq => !ord.is_eq(),
        CompareOp::Lt => ord.is_lt(),
        CompareOp::LtEq => ord.is_le(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::GtEq => ord.is_ge(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> CatalogQuery { CatalogQuery::parse(sql, &[]).unwrap() }

    #[test]
    fn simple_table_listing() {
        let q = parse("SELECT c.oid, c.relname AS name FROM pg_catalog.pg_class c WHERE c.relnamespace = 2200 AND c.relkind = 'r' ORDER BY 2 LIMIT 10");
        assert_eq!(q.table.as_deref(), Some("pg_catalog.pg_class"));
        assert_eq!(q.items.len(), 2);
        assert_eq!(q.items[1].label(), "name");
        assert_eq!(
            q.filter,
            Some(Predicate::And(vec![
                Predicate::Compare { column: "relnamespace".into(), op: CompareOp::Eq, value: Value::Int(2200) },
                Predicate::Compare { column: "relkind".into(), op: CompareOp::Eq, value: Value::Text("r".into()) },
            ]))
        );
        assert_eq!(q.order_by, vec![OrderKey { target: OrderTarget::Position(2), descending: false, nulls_last: true }]);
        assert_eq!(q.limit, Some(10));
    }

    #[test]
    fn any_array_becomes_membership() {
        let q = parse("SELECT typname FROM pg_type WHERE oid = ANY(ARRAY[23, 25])");
        assert_eq!(
            q.filter,
            Some(Predicate::InList { column: "oid".into(), values: vec![Value::Int(23), Value::Int(25)], negated: false })
        );
        let q = CatalogQuery::parse("SELECT typname FROM pg_type WHERE typname = ANY($1)", &[TypedValue::text("{int4,text}")]).unwrap();
        assert_eq!(
            q.filter,
            Some(Predicate::InList {
                column: "typname".into(),
                values: vec![Value::Text("int4".into()), Value::Text("text".into())],
                negated: false
            })
        );
    }

    #[test]
    fn regclass_literal_is_deferred() {
        let q = parse("SELECT attname FROM pg_attribute WHERE attrelid = 'public.docs'::regclass AND attnum > 0");
        assert!(q.uses_regclass());
        match q.filter {
            Some(Predicate::And(ps)) => {
                assert_eq!(ps[0], Predicate::Compare { column: "attrelid".into(), op: CompareOp::Eq, value: Value::RegClass("public.docs".into()) });
                assert_eq!(ps[1], Predicate::Compare { column: "attnum".into(), op: CompareOp::Gt, value: Value::Int(0) });
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn params_like_and_null_tests() {
        let q = CatalogQuery::parse(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = $1 AND table_name NOT LIKE 'tmp%' AND table_type IS NOT NULL",
            &[TypedValue::text("public")],
        )
        .unwrap();
        let Some(Predicate::And(ps)) = q.filter else { panic!("expected conjunction") };
        assert_eq!(ps[0], Predicate::Compare { column: "table_schema".into(), op: CompareOp::Eq, value: Value::Text("public".into()) });
        assert_eq!(ps[1], Predicate::Like { column: "table_name".into(), pattern: Value::Text("tmp%".into()), negated: true, case_insensitive: false });
        assert_eq!(ps[2], Predicate::IsNull { column: "table_type".into(), negated: true });
    }

    #[test]
    fn fromless_and_functions() {
        let q = parse("SELECT version(), current_user, 'x' AS tag");
        assert!(q.table.is_none());
        assert_eq!(q.items[0].label(), "version");
        assert_eq!(q.items[1].label(), "current_user");
        assert_eq!(q.items[2].label(), "tag");
        let q = parse("SELECT format_type(atttypid, atttypmod) FROM pg_attribute");
        assert_eq!(
            q.items[0],
            SelectItem::Expr {
                operand: Operand::Call("format_type".into(), vec![Operand::Column("atttypid".into()), Operand::Column("atttypmod".into())]),
                alias: None
            }
        );
    }

    #[test]
    fn joins_and_subqueries_are_rejected() {
        assert!(CatalogQuery::parse("SELECT * FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace", &[]).is_err());
        assert!(CatalogQuery::parse("SELECT * FROM pg_class WHERE relnamespace IN (SELECT oid FROM pg_namespace)", &[]).is_err());
        assert!(CatalogQuery::parse("SELECT * FROM pg_class, pg_namespace", &[]).is_err());
        // keywords inside literals don't count
        assert!(CatalogQuery::parse("SELECT relname FROM pg_class WHERE relname = 'join'", &[]).is_ok());
    }

    #[test]
    fn or_and_parentheses() {
        let q = parse("SELECT relname FROM pg_class WHERE (relkind = 'r' OR relkind = 'v') AND NOT relispartition");
        let Some(Predicate::And(ps)) = q.filter else { panic!("expected conjunction") };
        assert!(matches!(&ps[0], Predicate::Or(o) if o.len() == 2));
        assert!(matches!(&ps[1], Predicate::Not(_)));
    }
}
