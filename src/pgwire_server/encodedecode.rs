//! Parameter decoding (Bind) and result-cell encoding (DataRow) in text and binary formats.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::backend::TypedValue;
use crate::error::{GatewayError, GatewayResult};
use crate::pgwire_server::oids::{array_element_oid, is_text_like};
use crate::system_catalog::types;

const PG_EPOCH_DAYS_FROM_UNIX: i64 = 10_957;
const PG_EPOCH_MICROS_FROM_UNIX: i64 = 946_684_800_000_000;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// Format code for column/parameter `i` from a Bind format list (empty = text,
/// one entry = applies to all).
pub fn format_for(formats: &[i16], i: usize) -> i16 {
    match formats.len() {
        0 => 0,
        1 => formats[0],
        _ => formats.get(i).copied().unwrap_or(0),
    }
}

fn bad_param(idx: usize, oid: i32, why: &str) -> GatewayError {
    GatewayError::translation(format!("incorrect binary data format in bind parameter {} (type {}): {}", idx + 1, oid, why))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Decode one Bind parameter. `idx` is only used in error messages.
pub fn decode_param(idx: usize, raw: Option<&[u8]>, format: i16, oid: i32) -> GatewayResult<TypedValue> {
    let Some(raw) = raw else { return Ok(TypedValue::Null) };
    if format == 0 {
        return decode_text_param(idx, raw, oid);
    }
    if format != 1 {
        return Err(GatewayError::protocol(format!("invalid format code {} for bind parameter {}", format, idx + 1)));
    }
    let fixed = |n: usize| -> GatewayResult<&[u8]> {
        if raw.len() == n { Ok(raw) } else { Err(bad_param(idx, oid, &format!("expected {} bytes, got {}", n, raw.len()))) }
    };
    Ok(match oid {
        types::BOOL => TypedValue::Bool(fixed(1)?[0] != 0),
        types::INT2 => {
            let b = fixed(2)?;
            TypedValue::Int(i16::from_be_bytes([b[0], b[1]]) as i64)
        }
        types::INT4 => {
            let b = fixed(4)?;
            TypedValue::Int(i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as i64)
        }
        types::OID => {
            let b = fixed(4)?;
            TypedValue::Int(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as i64)
        }
        types::INT8 => {
            let b = fixed(8)?;
            TypedValue::Int(i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        }
        types::FLOAT4 => {
            let b = fixed(4)?;
            TypedValue::Float(f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64)
        }
        types::FLOAT8 => {
            let b = fixed(8)?;
            TypedValue::Float(f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        }
        types::BYTEA => TypedValue::Bytes(raw.to_vec()),
        types::NUMERIC => TypedValue::Text(decode_numeric(raw).ok_or_else(|| bad_param(idx, oid, "malformed numeric"))?),
        types::FLOAT4_ARRAY | types::FLOAT8_ARRAY => {
            let comps = decode_float_array(raw).ok_or_else(|| bad_param(idx, oid, "malformed float array"))?;
            TypedValue::Text(bracketed(&comps))
        }
        o if array_element_oid(o).is_some() => {
            TypedValue::Text(decode_array_literal(raw).ok_or_else(|| bad_param(idx, oid, "malformed array"))?)
        }
        o if is_text_like(o) => TypedValue::Text(String::from_utf8_lossy(raw).into_owned()),
        other => return Err(GatewayError::unsupported(format!("binary format for parameter type {} is not supported", other))),
    })
}

fn decode_text_param(idx: usize, raw: &[u8], oid: i32) -> GatewayResult<TypedValue> {
    let s = String::from_utf8_lossy(raw).into_owned();
    let invalid = |what: &str| GatewayError::translation(format!("invalid input syntax for type {}: \"{}\" (parameter {})", what, s, idx + 1));
    Ok(match oid {
        types::BOOL => TypedValue::Bool(parse_bool(&s).ok_or_else(|| invalid("boolean"))?),
        types::INT2 | types::INT4 | types::INT8 | types::OID => TypedValue::Int(s.trim().parse().map_err(|_| invalid("integer"))?),
        types::FLOAT4 | types::FLOAT8 => TypedValue::Float(s.trim().parse().map_err(|_| invalid("double precision"))?),
        types::BYTEA => match s.strip_prefix("\\x") {
            Some(hex) => TypedValue::Bytes(decode_hex(hex).ok_or_else(|| invalid("bytea"))?),
            None => TypedValue::Bytes(raw.to_vec()),
        },
        // `{1,2,3}` float arrays become vector text
        types::FLOAT4_ARRAY | types::FLOAT8_ARRAY => {
            let t = s.trim();
            match t.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
                Some(inner) => TypedValue::Text(format!("[{}]", inner)),
                None => TypedValue::Text(s),
            }
        }
        _ => TypedValue::Text(s),
    })
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len()).step_by(2).map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()).collect()
}

fn bracketed(components: &[f64]) -> String {
    let parts: Vec<String> = components.iter().map(|c| c.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Header and raw elements of a one-dimensional binary array.
fn array_elements(bytes: &[u8]) -> Option<(i32, Vec<Option<&[u8]>>)> {
    let word = |at: usize| -> Option<i32> { Some(i32::from_be_bytes(bytes.get(at..at + 4)?.try_into().ok()?)) };
    let ndims = word(0)?;
    let elem_oid = word(8)?;
    if ndims == 0 {
        return Some((elem_oid, Vec::new()));
    }
    if ndims != 1 {
        return None;
    }
    let len = usize::try_from(word(12)?).ok()?;
    let mut pos = 20usize;
    let mut out = Vec::with_capacity(len.min(65_536));
    for _ in 0..len {
        let l = word(pos)?;
        pos += 4;
        if l < 0 {
            out.push(None);
            continue;
        }
        let end = pos.checked_add(l as usize)?;
        out.push(Some(bytes.get(pos..end)?));
        pos = end;
    }
    (pos == bytes.len()).then_some((elem_oid, out))
}

/// float4[] / float8[] -> components. NULL elements are rejected.
pub fn decode_float_array(bytes: &[u8]) -> Option<Vec<f64>> {
    let (elem, items) = array_elements(bytes)?;
    items
        .into_iter()
        .map(|cell| {
            let cell = cell?;
            match (elem, cell.len()) {
                (types::FLOAT4, 4) => Some(f32::from_be_bytes(cell.try_into().ok()?) as f64),
                (types::FLOAT8, 8) => Some(f64::from_be_bytes(cell.try_into().ok()?)),
                _ => None,
            }
        })
        .collect()
}

/// Any supported one-dimensional array -> postgres `{..}` text.
pub fn decode_array_literal(bytes: &[u8]) -> Option<String> {
    let (elem, items) = array_elements(bytes)?;
    let mut parts = Vec::with_capacity(items.len());
    for cell in items {
        let Some(cell) = cell else {
            parts.push("NULL".to_string());
            continue;
        };
        let text = match decode_param(0, Some(cell), 1, elem).ok()? {
            TypedValue::Text(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            other => other.to_text()?.into_owned(),
        };
        parts.push(text);
    }
    Some(format!("{{{}}}", parts.join(",")))
}

/// Decimal text -> binary NUMERIC (ndigits, weight, sign, dscale, base-10000 digits).
pub fn encode_numeric(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    let mut out = Vec::new();
    let header = |out: &mut Vec<u8>, ndigits: i16, weight: i16, sign: u16, dscale: i16| {
        out.extend_from_slice(&ndigits.to_be_bytes());
        out.extend_from_slice(&weight.to_be_bytes());
        out.extend_from_slice(&sign.to_be_bytes());
        out.extend_from_slice(&dscale.to_be_bytes());
    };
    if s.eq_ignore_ascii_case("nan") {
        header(&mut out, 0, 0, NUMERIC_NAN, 0);
        return Some(out);
    }
    let (negative, unsigned) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let dscale = i16::try_from(frac_part.len()).ok()?;

    let int_part = int_part.trim_start_matches('0');
    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let digits: Vec<u8> = std::iter::repeat(b'0')
        .take(int_pad)
        .chain(int_part.bytes())
        .chain(frac_part.bytes())
        .chain(std::iter::repeat(b'0').take(frac_pad))
        .map(|b| b - b'0')
        .collect();
    let mut groups: Vec<i16> = digits
        .chunks(4)
        .map(|c| c.iter().fold(0i16, |acc, d| acc * 10 + *d as i16))
        .collect();
    let mut weight = ((int_part.len() + int_pad) / 4) as i16 - 1;
    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        header(&mut out, 0, 0, NUMERIC_POS, dscale);
        return Some(out);
    }
    header(&mut out, groups.len() as i16, weight, if negative { NUMERIC_NEG } else { NUMERIC_POS }, dscale);
    for g in groups {
        out.extend_from_slice(&g.to_be_bytes());
    }
    Some(out)
}

/// Binary NUMERIC -> decimal text with exactly `dscale` fractional digits.
pub fn decode_numeric(bytes: &[u8]) -> Option<String> {
    let half = |at: usize| -> Option<i16> { Some(i16::from_be_bytes(bytes.get(at..at + 2)?.try_into().ok()?)) };
    let ndigits = half(0)?;
    let weight = half(2)? as i32;
    let sign = half(4)? as u16;
    let dscale = half(6)?;
    if sign == NUMERIC_NAN {
        return Some("NaN".into());
    }
    if ndigits < 0 || dscale < 0 || bytes.len() != 8 + ndigits as usize * 2 {
        return None;
    }
    let groups: Vec<i16> = (0..ndigits as usize).map(|i| half(8 + i * 2)).collect::<Option<_>>()?;
    let group = |i: i32| -> i16 { if i < 0 { 0 } else { groups.get(i as usize).copied().unwrap_or(0) } };

    let mut int_text = String::new();
    if weight < 0 {
        int_text.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 { int_text.push_str(&group(i).to_string()) } else { int_text.push_str(&format!("{:04}", group(i))) }
        }
    }
    let mut frac_text = String::new();
    let mut i = weight + 1;
    while (frac_text.len() as i32) < dscale as i32 {
        frac_text.push_str(&format!("{:04}", group(i)));
        i += 1;
    }
    frac_text.truncate(dscale as usize);

    let mut out = String::new();
    if sign == NUMERIC_NEG && groups.iter().any(|g| *g != 0) {
        out.push('-');
    }
    out.push_str(&int_text);
    if dscale > 0 {
        out.push('.');
        out.push_str(&frac_text);
    }
    Some(out)
}

/// Encode one result cell. `None` is SQL NULL.
pub fn encode_cell(value: &TypedValue, oid: i32, format: i16) -> GatewayResult<Option<Vec<u8>>> {
    if value.is_null() {
        return Ok(None);
    }
    if format == 0 {
        return Ok(Some(encode_text(value, oid).into_bytes()));
    }
    let text = || value.to_text().map(|c| c.into_owned()).unwrap_or_default();
    let cannot = |what: &str| GatewayError::unsupported(format!("cannot send value '{}' as binary {}", text(), what));
    let as_int = || -> GatewayResult<i64> {
        match value {
            TypedValue::Int(i) => Ok(*i),
            TypedValue::Bool(b) => Ok(*b as i64),
            TypedValue::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            _ => text().trim().parse().map_err(|_| cannot("integer")),
        }
    };
    let as_float = || -> GatewayResult<f64> {
        match value {
            TypedValue::Float(f) => Ok(*f),
            TypedValue::Int(i) => Ok(*i as f64),
            _ => text().trim().parse().map_err(|_| cannot("float")),
        }
    };
    Ok(Some(match oid {
        types::BOOL => {
            let b = match value {
                TypedValue::Bool(b) => *b,
                TypedValue::Int(i) => *i != 0,
                _ => parse_bool(&text()).ok_or_else(|| cannot("boolean"))?,
            };
            vec![b as u8]
        }
        types::INT2 => (as_int()? as i16).to_be_bytes().to_vec(),
        types::INT4 => (as_int()? as i32).to_be_bytes().to_vec(),
        types::OID => (as_int()? as u32).to_be_bytes().to_vec(),
        types::INT8 => as_int()?.to_be_bytes().to_vec(),
        types::FLOAT4 => (as_float()? as f32).to_be_bytes().to_vec(),
        types::FLOAT8 => as_float()?.to_be_bytes().to_vec(),
        types::BYTEA => match value {
            TypedValue::Bytes(b) => b.clone(),
            _ => text().into_bytes(),
        },
        types::NUMERIC => encode_numeric(&text()).ok_or_else(|| cannot("numeric"))?,
        types::DATE => {
            let d = NaiveDate::parse_from_str(text().trim(), "%Y-%m-%d").map_err(|_| cannot("date"))?;
            let days = d.signed_duration_since(NaiveDate::default()).num_days() - PG_EPOCH_DAYS_FROM_UNIX;
            (days as i32).to_be_bytes().to_vec()
        }
        types::TIME => {
            let t = NaiveTime::parse_from_str(text().trim(), "%H:%M:%S%.f").map_err(|_| cannot("time"))?;
            let micros = t.num_seconds_from_midnight() as i64 * 1_000_000 + (t.nanosecond() / 1000) as i64;
            micros.to_be_bytes().to_vec()
        }
        types::TIMESTAMP | types::TIMESTAMPTZ => {
            let unix_micros = parse_timestamp_micros(text().trim()).ok_or_else(|| cannot("timestamp"))?;
            (unix_micros - PG_EPOCH_MICROS_FROM_UNIX).to_be_bytes().to_vec()
        }
        _ => encode_text(value, oid).into_bytes(),
    }))
}

fn parse_timestamp_micros(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_micros());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.timestamp_micros());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_micros());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc().timestamp_micros())
}

/// Text format. The backend reports BIT columns as 0/1 integers.
fn encode_text(value: &TypedValue, oid: i32) -> String {
    match (oid, value) {
        (types::BOOL, TypedValue::Int(i)) => if *i != 0 { "t".into() } else { "f".into() },
        _ => value.to_text().map(|c| c.into_owned()).unwrap_or_default(),
    }
}
