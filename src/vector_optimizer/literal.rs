//! Decoding of bound vector values into a canonical bracketed literal.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::backend::TypedValue;

pub const MAX_COMPONENTS: usize = 65536;
const BASE64_PREFIX: &str = "base64:";
const FLOAT4_OID: i32 = 700;
const FLOAT8_OID: i32 = 701;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorEncoding {
    /// `base64:` + little-endian float32 bytes
    CompactBinary,
    /// `[1,2,3]`
    StructuredArray,
    /// `1,2,3`
    DelimitedText,
    /// postgres binary float4[]/float8[] array
    PgBinaryArray,
}

#[derive(Debug, Error, PartialEq)]
pub enum VectorLiteralError {
    #[error("invalid base64 vector payload: {0}")]
    Base64(String),
    #[error("binary vector payload of {0} bytes is not a whole number of float32 values")]
    Misaligned(usize),
    #[error("vector has {0} components (expected 1..=65536)")]
    ComponentCount(usize),
    #[error("invalid vector component '{0}'")]
    Component(String),
    #[error("vector has {found} components but {declared} were declared")]
    Dimension { declared: usize, found: usize },
    #[error("malformed binary array: {0}")]
    BinaryArray(&'static str),
    #[error("value of this type cannot hold a vector")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorLiteral {
    components: Vec<f64>,
    encoding: VectorEncoding,
    byte_len: usize,
    /// Components were float32 on the wire; render with float32 precision.
    single_precision: bool,
}

impl VectorLiteral {
    pub fn parse(value: &TypedValue) -> Result<Self, VectorLiteralError> {
        match value {
            TypedValue::Text(s) => Self::parse_text(s),
            TypedValue::Bytes(b) => Self::from_pg_array(b),
            _ => Err(VectorLiteralError::Unsupported),
        }
    }

    pub fn parse_text(raw: &str) -> Result<Self, VectorLiteralError> {
        let s = raw.trim();
        if let Some(payload) = s.strip_prefix(BASE64_PREFIX) {
            let bytes = STANDARD.decode(payload.trim()).map_err(|e| VectorLiteralError::Base64(e.to_string()))?;
            if bytes.len() % 4 != 0 {
                return Err(VectorLiteralError::Misaligned(bytes.len()));
            }
            let components: Vec<f64> = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect();
            return Self::build(components, VectorEncoding::CompactBinary, raw.len(), true);
        }
        let (body, encoding) = match s.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
            Some(inner) => (inner, VectorEncoding::StructuredArray),
            None => (s, VectorEncoding::DelimitedText),
        };
        let components = body
            .split(',')
            .map(|p| {
                let p = p.trim();
                p.parse::<f64>().map_err(|_| VectorLiteralError::Component(p.to_string()))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        Self::build(components, encoding, raw.len(), false)
    }

    /// Binary array layout: ndim, has_null, elem_oid, then (len, lbound) per dim, then
    /// length-prefixed elements. All big-endian.
    pub fn from_pg_array(bytes: &[u8]) -> Result<Self, VectorLiteralError> {
        let mut pos = 0usize;
        let ndim = read_i32(bytes, &mut pos, "ndim")?;
        let _has_null = read_i32(bytes, &mut pos, "flags")?;
        let elem = read_i32(bytes, &mut pos, "element type")?;
        if ndim != 1 {
            return Err(VectorLiteralError::BinaryArray("expected a one-dimensional array"));
        }
        if elem != FLOAT4_OID && elem != FLOAT8_OID {
            return Err(VectorLiteralError::BinaryArray("element type is not float4/float8"));
        }
        let n = read_i32(bytes, &mut pos, "dimension")?.max(0) as usize;
        let _lbound = read_i32(bytes, &mut pos, "lower bound")?;
        if n > MAX_COMPONENTS {
            return Err(VectorLiteralError::ComponentCount(n));
        }
        let width: usize = if elem == FLOAT4_OID { 4 } else { 8 };
        let mut components = Vec::with_capacity(n);
        for _ in 0..n {
            let len = read_i32(bytes, &mut pos, "element length")?;
            if len as usize != width {
                return Err(VectorLiteralError::BinaryArray("unexpected element width"));
            }
            let data = bytes.get(pos..pos + width).ok_or(VectorLiteralError::BinaryArray("element"))?;
            pos += width;
            let v = match data.try_into() {
                Ok(four) if width == 4 => f32::from_be_bytes(four) as f64,
                _ => {
                    let mut eight = [0u8; 8];
                    eight.copy_from_slice(data);
                    f64::from_be_bytes(eight)
                }
            };
            components.push(v);
        }
        Self::build(components, VectorEncoding::PgBinaryArray, bytes.len(), elem == FLOAT4_OID)
    }

    fn build(components: Vec<f64>, encoding: VectorEncoding, byte_len: usize, single_precision: bool) -> Result<Self, VectorLiteralError> {
        if components.is_empty() || components.len() > MAX_COMPONENTS {
            return Err(VectorLiteralError::ComponentCount(components.len()));
        }
        if let Some(bad) = components.iter().find(|c| !c.is_finite()) {
            return Err(VectorLiteralError::Component(bad.to_string()));
        }
        Ok(VectorLiteral { components, encoding, byte_len, single_precision })
    }

    /// Enforce a declared dimensionality, if one is known.
    pub fn with_dimension(self, declared: Option<usize>) -> Result<Self, VectorLiteralError> {
        match declared {
            Some(d) if d != self.components.len() => Err(VectorLiteralError::Dimension { declared: d, found: self.components.len() }),
            _ => Ok(self),
        }
    }

    pub fn len(&self) -> usize { self.components.len() }

    pub fn is_empty(&self) -> bool { self.components.is_empty() }

    pub fn components(&self) -> &[f64] { &self.components }

    pub fn encoding(&self) -> VectorEncoding { self.encoding }

    pub fn byte_len(&self) -> usize { self.byte_len }

    /// `[c1,c2,...]` with shortest round-trip formatting per component.
    pub fn to_bracketed(&self) -> String {
        let mut out = String::with_capacity(self.components.len() * 10 + 2);
        out.push('[');
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 { out.push(','); }
            if self.single_precision {
                out.push_str(&(*c as f32).to_string());
            } else {
                out.push_str(&c.to_string());
            }
        }
        out.push(']');
        out
    }
}

fn read_i32(bytes: &[u8], pos: &mut usize, what: &'static str) -> Result<i32, VectorLiteralError> {
    let chunk = bytes.get(*pos..*pos + 4).ok_or(VectorLiteralError::BinaryArray(what))?;
    *pos += 4;
    Ok(i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Little-endian float32 payload with the `base64:` prefix.
pub fn encode_compact(components: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(components.len() * 4);
    for c in components { bytes.extend_from_slice(&c.to_le_bytes()); }
    format!("{}{}", BASE64_PREFIX, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_text_forms_agree() {
        let a = VectorLiteral::parse_text("[0.5, -1.25, 3]").unwrap();
        let b = VectorLiteral::parse_text("0.5,-1.25,3").unwrap();
        let c = VectorLiteral::parse_text(&encode_compact(&[0.5, -1.25, 3.0])).unwrap();
        assert_eq!(a.encoding(), VectorEncoding::StructuredArray);
        assert_eq!(b.encoding(), VectorEncoding::DelimitedText);
        assert_eq!(c.encoding(), VectorEncoding::CompactBinary);
        assert_eq!(a.to_bracketed(), "[0.5,-1.25,3]");
        assert_eq!(b.to_bracketed(), a.to_bracketed());
        assert_eq!(c.to_bracketed(), a.to_bracketed());
    }

    #[test]
    fn float32_payload_renders_at_float32_precision() {
        let v = VectorLiteral::parse_text(&encode_compact(&[0.1, 0.2])).unwrap();
        assert_eq!(v.to_bracketed(), "[0.1,0.2]");
    }

    #[test]
    fn rejects_bad_payloads() {
        assert_eq!(VectorLiteral::parse_text("base64:AAA=").unwrap_err(), VectorLiteralError::Misaligned(2));
        assert!(matches!(VectorLiteral::parse_text("base64:!!").unwrap_err(), VectorLiteralError::Base64(_)));
        assert!(matches!(VectorLiteral::parse_text("[1,x]").unwrap_err(), VectorLiteralError::Component(_)));
        assert!(matches!(VectorLiteral::parse_text("[]").unwrap_err(), VectorLiteralError::Component(_)));
        assert!(matches!(VectorLiteral::parse_text("base64:").unwrap_err(), VectorLiteralError::ComponentCount(0)));
        assert_eq!(VectorLiteral::parse(&TypedValue::Int(3)).unwrap_err(), VectorLiteralError::Unsupported);
    }

    #[test]
    fn dimension_is_enforced() {
        let v = VectorLiteral::parse_text("[1,2,3]").unwrap();
        assert!(v.clone().with_dimension(Some(3)).is_ok());
        assert!(v.clone().with_dimension(None).is_ok());
        assert_eq!(v.with_dimension(Some(4)).unwrap_err(), VectorLiteralError::Dimension { declared: 4, found: 3 });
    }

    #[test]
    fn binary_float4_array() {
        let mut b = Vec::new();
        for v in [1i32, 0, 700, 2, 1] { b.extend_from_slice(&v.to_be_bytes()); }
        for f in [1.5f32, -2.0] {
            b.extend_from_slice(&4i32.to_be_bytes());
            b.extend_from_slice(&f.to_be_bytes());
        }
        let v = VectorLiteral::parse(&TypedValue::Bytes(b)).unwrap();
        assert_eq!(v.encoding(), VectorEncoding::PgBinaryArray);
        assert_eq!(v.to_bracketed(), "[1.5,-2]");
    }
}
