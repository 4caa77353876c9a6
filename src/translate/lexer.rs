//! Literal masking and operand scanning shared by the rewrite passes.
//!
//! String literals, quoted identifiers, dollar-quoted bodies and comments are swapped
//! for opaque tokens (`\u{E000}<n>\u{E001}`) before any rule runs, so no rule can
//! match inside them. Rules then operate on `Vec<char>` views of the masked text.

use crate::error::{GatewayError, GatewayResult};

pub(crate) const MASK_OPEN: char = '\u{E000}';
pub(crate) const MASK_CLOSE: char = '\u{E001}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Str,
    Ident,
    Comment,
}

#[derive(Debug, Clone)]
pub(crate) struct Masked {
    pub text: String,
    slots: Vec<(SlotKind, String)>,
}

impl Masked {
    pub fn unmask(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 16);
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != MASK_OPEN {
                out.push(c);
                continue;
            }
            let mut num = String::new();
            for d in chars.by_ref() {
                if d == MASK_CLOSE { break; }
                num.push(d);
            }
            match num.parse::<usize>().ok().and_then(|i| self.slots.get(i)) {
                Some((_, raw)) => out.push_str(raw),
                None => out.push_str(&num),
            }
        }
        out
    }

    /// Slot behind a single token like `\u{E000}3\u{E001}`.
    pub fn slot(&self, token: &str) -> Option<(SlotKind, &str)> {
        let inner = token.strip_prefix(MASK_OPEN)?.strip_suffix(MASK_CLOSE)?;
        let idx: usize = inner.parse().ok()?;
        self.slots.get(idx).map(|(k, s)| (*k, s.as_str()))
    }

    pub fn slots(&self) -> impl Iterator<Item = (SlotKind, &str)> {
        self.slots.iter().map(|(k, s)| (*k, s.as_str()))
    }
}

fn push_slot(out: &mut String, slots: &mut Vec<(SlotKind, String)>, kind: SlotKind, raw: String) {
    out.push(MASK_OPEN);
    out.push_str(&slots.len().to_string());
    out.push(MASK_CLOSE);
    slots.push((kind, raw));
}

pub(crate) fn mask(sql: &str) -> GatewayResult<Masked> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut slots: Vec<(SlotKind, String)> = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        // -- line comment
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            let start = i;
            while i < chars.len() && chars[i] != '\n' { i += 1; }
            push_slot(&mut out, &mut slots, SlotKind::Comment, chars[start..i].iter().collect());
            continue;
        }
        // /* block comment */ (nesting allowed, as in postgres)
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start = i;
            let mut depth = 0usize;
            while i < chars.len() {
                if chars[i] == '/' && chars.get(i + 1) == Some(&'*') { depth += 1; i += 2; continue; }
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    depth -= 1;
                    i += 2;
                    if depth == 0 { break; }
                    continue;
                }
                i += 1;
            }
            if depth != 0 { return Err(GatewayError::translation("unterminated /* comment")); }
            push_slot(&mut out, &mut slots, SlotKind::Comment, chars[start..i].iter().collect());
            continue;
        }
        if c == '\'' {
            // E'..' escape strings keep their prefix inside the slot
            let escape = out.ends_with(['E', 'e']) && {
                let prev: Vec<char> = out.chars().rev().take(2).collect();
                prev.len() < 2 || !(prev[1].is_alphanumeric() || prev[1] == '_')
            };
            let mut raw = String::new();
            if escape {
                out.pop();
                raw.push(chars[i - 1]);
            }
            raw.push('\'');
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let d = chars[i];
                if escape && d == '\\' && i + 1 < chars.len() {
                    raw.push(d);
                    raw.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                raw.push(d);
                i += 1;
                if d == '\'' {
                    if chars.get(i) == Some(&'\'') {
                        raw.push('\'');
                        i += 1;
                        continue;
                    }
                    closed = true;
                    break;
                }
            }
            if !closed { return Err(GatewayError::translation("unterminated quoted string")); }
            push_slot(&mut out, &mut slots, SlotKind::Str, raw);
            continue;
        }
        if c == '"' {
            let mut raw = String::from('"');
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let d = chars[i];
                raw.push(d);
                i += 1;
                if d == '"' {
                    if chars.get(i) == Some(&'"') {
                        raw.push('"');
                        i += 1;
                        continue;
                    }
                    closed = true;
                    break;
                }
            }
            if !closed { return Err(GatewayError::translation("unterminated quoted identifier")); }
            push_slot(&mut out, &mut slots, SlotKind::Ident, raw);
            continue;
        }
        // $tag$ ... $tag$ (but never $1 placeholders)
        if c == '$' && !chars.get(i + 1).map(|d| d.is_ascii_digit()).unwrap_or(true) {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') { j += 1; }
            if chars.get(j) == Some(&'$') {
                let tag: String = chars[i..=j].iter().collect();
                let body_start = j + 1;
                let rest: String = chars[body_start..].iter().collect();
                match rest.find(&tag) {
                    Some(pos) => {
                        let body_len = rest[..pos].chars().count();
                        let end = body_start + body_len + tag.chars().count();
                        push_slot(&mut out, &mut slots, SlotKind::Str, chars[i..end].iter().collect());
                        i = end;
                        continue;
                    }
                    None => return Err(GatewayError::translation("unterminated dollar-quoted string")),
                }
            }
        }
        out.push(c);
        i += 1;
    }
    Ok(Masked { text: out, slots })
}

pub(crate) fn is_word_char(c: char) -> bool { c.is_alphanumeric() || c == '_' }

fn is_operand_char(c: char) -> bool { is_word_char(c) || c == '.' || c == '$' }

/// Start index of the operand that ends right before `end` (exclusive), skipping whitespace.
pub(crate) fn operand_before(chars: &[char], end: usize) -> Option<usize> {
    let mut i = end;
    while i > 0 && chars[i - 1].is_whitespace() { i -= 1; }
    if i == 0 { return None; }
    let last = chars[i - 1];
    if last == ')' {
        let mut depth = 0i32;
        let mut j = i;
        while j > 0 {
            j -= 1;
            match chars[j] {
                ')' => depth += 1,
                '(' => {
                    depth -= 1;
                    if depth == 0 { break; }
                }
                _ => {}
            }
        }
        if depth != 0 { return None; }
        // function name directly before the parenthesis
        while j > 0 && is_operand_char(chars[j - 1]) { j -= 1; }
        return Some(j);
    }
    if last == MASK_CLOSE {
        let mut j = i - 1;
        while j > 0 && chars[j] != MASK_OPEN { j -= 1; }
        if chars[j] != MASK_OPEN { return None; }
        // qualified quoted identifiers: schema."col" / "t"."col"
        while j > 1 && chars[j - 1] == '.' {
            let mut k = j - 1;
            if k > 0 && chars[k - 1] == MASK_CLOSE {
                k -= 1;
                while k > 0 && chars[k] != MASK_OPEN { k -= 1; }
                j = k;
            } else {
                while k > 0 && is_word_char(chars[k - 1]) { k -= 1; }
                if k == j - 1 { break; }
                j = k;
            }
        }
        return Some(j);
    }
    let mut j = i;
    while j > 0 && is_operand_char(chars[j - 1]) { j -= 1; }
    if j == i { None } else { Some(j) }
}

/// End index (exclusive) of the operand starting at or after `start`, skipping whitespace.
/// Returns (operand_start, operand_end).
pub(crate) fn operand_after(chars: &[char], start: usize) -> Option<(usize, usize)> {
    let mut i = start;
    while i < chars.len() && chars[i].is_whitespace() { i += 1; }
    if i >= chars.len() { return None; }
    let begin = i;
    match chars[i] {
        '(' => {
            let end = matching_paren(chars, i)?;
            Some((begin, end + 1))
        }
        MASK_OPEN => {
            while i < chars.len() && chars[i] != MASK_CLOSE { i += 1; }
            if i >= chars.len() { return None; }
            i += 1;
            // "t"."col"
            while i + 1 < chars.len() && chars[i] == '.' {
                if chars[i + 1] == MASK_OPEN {
                    i += 1;
                    while i < chars.len() && chars[i] != MASK_CLOSE { i += 1; }
                    i += 1;
                } else if is_word_char(chars[i + 1]) {
                    i += 1;
                    while i < chars.len() && is_word_char(chars[i]) { i += 1; }
                } else {
                    break;
                }
            }
            Some((begin, i))
        }
        c if is_operand_char(c) || c == '?' => {
            if c == '?' { return Some((begin, i + 1)); }
            while i < chars.len() && is_operand_char(chars[i]) { i += 1; }
            let mut k = i;
            while k < chars.len() && chars[k].is_whitespace() { k += 1; }
            if k < chars.len() && chars[k] == '(' {
                let end = matching_paren(chars, k)?;
                return Some((begin, end + 1));
            }
            Some((begin, i))
        }
        _ => None,
    }
}

/// Index of the `)` matching the `(` at `open`.
pub(crate) fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (k, c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 { return Some(k); }
            }
            _ => {}
        }
    }
    None
}

/// Split a parenthesized argument list body on top-level commas.
pub(crate) fn split_top_level(chars: &[char]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut cur = String::new();
    for &c in chars {
        match c {
            '(' => { depth += 1; cur.push(c); }
            ')' => { depth -= 1; cur.push(c); }
            ',' if depth == 0 => { parts.push(cur.trim().to_string()); cur.clear(); }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() || !parts.is_empty() { parts.push(cur.trim().to_string()); }
    parts
}

/// Case-insensitive check that `word` starts at `at` and is delimited on both sides.
pub(crate) fn word_at(chars: &[char], at: usize, word: &str) -> bool {
    let w: Vec<char> = word.chars().collect();
    if at + w.len() > chars.len() { return false; }
    if at > 0 && is_word_char(chars[at - 1]) { return false; }
    for (k, wc) in w.iter().enumerate() {
        if !chars[at + k].eq_ignore_ascii_case(wc) { return false; }
    }
    !(at + w.len() < chars.len() && is_word_char(chars[at + w.len()]))
}

pub(crate) fn splice(chars: &mut Vec<char>, start: usize, end: usize, replacement: &str) {
    chars.splice(start..end, replacement.chars());
}
