//! Backend type names -> postgres type OIDs, and the built-in pg_type rows.

pub const BOOL: i32 = 16;
pub const BYTEA: i32 = 17;
pub const CHAR: i32 = 18;
pub const NAME: i32 = 19;
pub const INT8: i32 = 20;
pub const INT2: i32 = 21;
pub const INT4: i32 = 23;
pub const TEXT: i32 = 25;
pub const OID: i32 = 26;
pub const FLOAT4: i32 = 700;
pub const FLOAT8: i32 = 701;
pub const INT2_ARRAY: i32 = 1005;
pub const INT4_ARRAY: i32 = 1007;
pub const TEXT_ARRAY: i32 = 1009;
pub const FLOAT4_ARRAY: i32 = 1021;
pub const FLOAT8_ARRAY: i32 = 1022;
pub const BPCHAR: i32 = 1042;
pub const VARCHAR: i32 = 1043;
pub const DATE: i32 = 1082;
pub const TIME: i32 = 1083;
pub const TIMESTAMP: i32 = 1114;
pub const TIMESTAMPTZ: i32 = 1184;
pub const NUMERIC: i32 = 1700;

/// Unmapped backend types surface as text.
pub fn backend_type_oid(data_type: &str) -> i32 {
    let upper = data_type.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    match base {
        "BIGINT" => INT8,
        "BIT" => BOOL,
        "DATE" => DATE,
        "DOUBLE" | "FLOAT" => FLOAT8,
        "INTEGER" => INT4,
        "NUMERIC" | "DECIMAL" => NUMERIC,
        "SMALLINT" | "TINYINT" => INT2,
        "TIME" => TIME,
        "TIMESTAMP" => TIMESTAMP,
        "VARBINARY" | "LONGVARBINARY" => BYTEA,
        "VARCHAR" => VARCHAR,
        "CHAR" => BPCHAR,
        "LONGVARCHAR" | "VECTOR" => TEXT,
        _ => TEXT,
    }
}

pub struct BuiltinType {
    pub oid: i32,
    pub name: &'static str,
    pub len: i16,
    pub category: &'static str,
    /// Element type for arrays, else 0.
    pub elem: i32,
    /// Array type whose elements are this type, else 0.
    pub array: i32,
}

const fn t(oid: i32, name: &'static str, len: i16, category: &'static str, elem: i32, array: i32) -> BuiltinType {
    BuiltinType { oid, name, len, category, elem, array }
}

pub const BUILTIN_TYPES: &[BuiltinType] = &[
    t(BOOL, "bool", 1, "B", 0, 1000),
    t(BYTEA, "bytea", -1, "U", 0, 1001),
    t(CHAR, "char", 1, "Z", 0, 1002),
    t(NAME, "name", 64, "S", 0, 1003),
    t(INT8, "int8", 8, "N", 0, 1016),
    t(INT2, "int2", 2, "N", 0, INT2_ARRAY),
    t(INT4, "int4", 4, "N", 0, INT4_ARRAY),
    t(TEXT, "text", -1, "S", 0, TEXT_ARRAY),
    t(OID, "oid", 4, "N", 0, 1028),
    t(FLOAT4, "float4", 4, "N", 0, FLOAT4_ARRAY),
    t(FLOAT8, "float8", 8, "N", 0, FLOAT8_ARRAY),
    t(INT2_ARRAY, "_int2", -1, "A", INT2, 0),
    t(INT4_ARRAY, "_int4", -1, "A", INT4, 0),
    t(TEXT_ARRAY, "_text", -1, "A", TEXT, 0),
    t(FLOAT4_ARRAY, "_float4", -1, "A", FLOAT4, 0),
    t(FLOAT8_ARRAY, "_float8", -1, "A", FLOAT8, 0),
    t(BPCHAR, "bpchar", -1, "S", 0, 1014),
    t(VARCHAR, "varchar", -1, "S", 0, 1015),
    t(DATE, "date", 4, "D", 0, 1182),
    t(TIME, "time", 8, "D", 0, 1183),
    t(TIMESTAMP, "timestamp", 8, "D", 0, 1115),
    t(TIMESTAMPTZ, "timestamptz", 8, "D", 0, 1185),
    t(NUMERIC, "numeric", -1, "N", 0, 1231),
];

pub fn builtin(oid: i32) -> Option<&'static BuiltinType> { BUILTIN_TYPES.iter().find(|b| b.oid == oid) }

/// `atttypmod` for a column: declared length / precision, -1 when none.
pub fn typmod(type_oid: i32, char_len: Option<i32>, precision: Option<i32>, scale: Option<i32>) -> i32 {
    match type_oid {
        VARCHAR | BPCHAR => char_len.filter(|n| *n > 0).map(|n| n + 4).unwrap_or(-1),
        NUMERIC => match precision {
            Some(p) if p > 0 => ((p << 16) | scale.unwrap_or(0).max(0)) + 4,
            _ => -1,
        },
        _ => -1,
    }
}

/// SQL-standard rendering, as postgres' format_type(oid, typmod) does.
pub fn format_type(type_oid: i32, typmod: i32) -> String {
    let base = match type_oid {
        BOOL => "boolean",
        BYTEA => "bytea",
        CHAR => "\"char\"",
        NAME => "name",
        INT8 => "bigint",
        INT2 => "smallint",
        INT4 => "integer",
        TEXT => "text",
        OID => "oid",
        FLOAT4 => "real",
        FLOAT8 => "double precision",
        BPCHAR => "character",
        VARCHAR => "character varying",
        DATE => "date",
        TIME => "time without time zone",
        TIMESTAMP => "timestamp without time zone",
        TIMESTAMPTZ => "timestamp with time zone",
        NUMERIC => "numeric",
        INT2_ARRAY => "smallint[]",
        INT4_ARRAY => "integer[]",
        TEXT_ARRAY => "text[]",
        FLOAT4_ARRAY => "real[]",
        FLOAT8_ARRAY => "double precision[]",
        _ => return "???".to_string(),
    };
    if typmod < 4 {
        return base.to_string();
    }
    match type_oid {
        VARCHAR | BPCHAR => format!("{}({})", base, typmod - 4),
        NUMERIC => {
            let m = typmod - 4;
            format!("{}({},{})", base, (m >> 16) & 0xffff, m & 0xffff)
        }
        _ => base.to_string(),
    }
}
