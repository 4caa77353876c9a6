use crate::system_catalog::types::{self, builtin};

/// `typlen` for RowDescription; -1 for variable width and unknown types.
pub fn type_size(oid: i32) -> i16 { builtin(oid).map(|t| t.len).unwrap_or(-1) }

/// Element OID of a builtin array type.
pub fn array_element_oid(array_oid: i32) -> Option<i32> {
    builtin(array_oid).map(|t| t.elem).filter(|e| *e != 0)
}

pub fn is_text_like(oid: i32) -> bool {
    matches!(oid, 0 | types::TEXT | types::VARCHAR | types::BPCHAR | types::NAME | types::CHAR)
}

/// What ParameterDescription reports: unspecified parameters become text.
pub fn described_param_oid(oid: i32) -> i32 { if oid == 0 { types::TEXT } else { oid } }

/// OID for a result column whose backend value type is all we know.
pub fn infer_oid_from_value(v: &crate::backend::TypedValue) -> i32 {
    use crate::backend::TypedValue;
    match v {
        TypedValue::Bool(_) => types::BOOL,
        TypedValue::Int(i) if i32::try_from(*i).is_ok() => types::INT4,
        TypedValue::Int(_) => types::INT8,
        TypedValue::Float(_) => types::FLOAT8,
        TypedValue::Bytes(_) => types::BYTEA,
        TypedValue::Text(_) | TypedValue::Null => types::TEXT,
    }
}
