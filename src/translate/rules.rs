//! Immutable rule tables for the translator. Built once at startup and shared via `Arc`.

use std::collections::{HashMap, HashSet};

/// Target of a `::type` cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastTarget {
    /// `CAST(expr AS <type>)`
    Type { backend: String, pg_oid: i32 },
    /// `TO_VECTOR(expr, FLOAT)` with an optional declared dimensionality.
    Vector { dim: Option<usize> },
}

/// Similarity measures a client can spell as an operator or a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMetric {
    /// `<=>`, `cosine_distance()`, `distance()`
    CosineDistance,
    /// `<->`, `l2_distance()`
    L2Distance,
    /// `<#>`: pgvector returns the negated inner product
    NegativeInnerProduct,
    /// `inner_product()`
    InnerProduct,
}

impl VectorMetric {
    pub fn backend_fn(self) -> &'static str {
        match self {
            VectorMetric::CosineDistance => "VECTOR_COSINE",
            VectorMetric::L2Distance => "VECTOR_L2",
            VectorMetric::NegativeInnerProduct | VectorMetric::InnerProduct => "VECTOR_DOT_PRODUCT",
        }
    }

    /// Backend function returns a similarity (higher = closer) where the client expects a distance.
    pub fn inverted(self) -> bool {
        matches!(self, VectorMetric::CosineDistance | VectorMetric::NegativeInnerProduct)
    }

    /// Value-position rendering that keeps the client's numeric semantics.
    pub fn value_expr(self, call: &str) -> String {
        match self {
            VectorMetric::CosineDistance => format!("(1 - {})", call),
            VectorMetric::NegativeInnerProduct => format!("(-{})", call),
            _ => call.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslationRules {
    pub default_schema: String,
    type_map: HashMap<&'static str, (&'static str, i32)>,
    operators: Vec<(&'static str, VectorMetric)>,
    functions: HashMap<&'static str, VectorMetric>,
    catalog_tables: HashSet<&'static str>,
    local_functions: Vec<&'static str>,
}

impl Default for TranslationRules {
    fn default() -> Self { TranslationRules::new("SQLUser") }
}

impl TranslationRules {
    pub fn new(default_schema: &str) -> Self {
        let mut type_map = HashMap::new();
        for (k, v) in [
            ("int", ("INTEGER", 23)),
            ("int4", ("INTEGER", 23)),
            ("integer", ("INTEGER", 23)),
            ("int2", ("SMALLINT", 21)),
            ("smallint", ("SMALLINT", 21)),
            ("int8", ("BIGINT", 20)),
            ("bigint", ("BIGINT", 20)),
            ("text", ("VARCHAR(65535)", 25)),
            ("varchar", ("VARCHAR", 1043)),
            ("character varying", ("VARCHAR", 1043)),
            ("float", ("DOUBLE", 701)),
            ("float8", ("DOUBLE", 701)),
            ("double precision", ("DOUBLE", 701)),
            ("float4", ("REAL", 700)),
            ("real", ("REAL", 700)),
            ("bool", ("BIT", 16)),
            ("boolean", ("BIT", 16)),
            ("numeric", ("NUMERIC", 1700)),
            ("decimal", ("NUMERIC", 1700)),
            ("date", ("TIMESTAMP", 1082)),
            ("timestamp", ("TIMESTAMP", 1114)),
            ("timestamptz", ("TIMESTAMP", 1184)),
            ("bytea", ("VARBINARY", 17)),
        ] {
            type_map.insert(k, v);
        }
        let operators = vec![
            ("<=>", VectorMetric::CosineDistance),
            ("<->", VectorMetric::L2Distance),
            ("<#>", VectorMetric::NegativeInnerProduct),
        ];
        let mut functions = HashMap::new();
        functions.insert("cosine_distance", VectorMetric::CosineDistance);
        functions.insert("distance", VectorMetric::CosineDistance);
        functions.insert("l2_distance", VectorMetric::L2Distance);
        functions.insert("inner_product", VectorMetric::InnerProduct);
        let catalog_tables: HashSet<&'static str> = [
            "pg_class", "pg_namespace", "pg_attribute", "pg_type", "pg_constraint", "pg_index",
            "pg_attrdef", "pg_database", "pg_proc", "pg_settings", "pg_roles", "pg_description",
            "pg_am", "pg_extension", "pg_enum", "pg_tables", "pg_views",
        ]
        .into_iter()
        .collect();
        let local_functions = vec![
            "version", "current_schema", "current_database", "current_user", "session_user",
            "pg_backend_pid", "current_setting", "pg_is_in_recovery",
        ];
        TranslationRules {
            default_schema: default_schema.to_string(),
            type_map,
            operators,
            functions,
            catalog_tables,
            local_functions,
        }
    }

    /// `base` is the lowercased type name (multi-word names joined by one space),
    /// `args` the text inside its parentheses if any.
    pub fn cast_target(&self, base: &str, args: Option<&str>, array: bool) -> Option<CastTarget> {
        if array { return None; }
        if base == "vector" {
            let dim = args.and_then(|a| a.trim().parse::<usize>().ok());
            return Some(CastTarget::Vector { dim });
        }
        let (backend, oid) = self.type_map.get(base)?;
        let backend = match (base, args) {
            ("varchar" | "character varying" | "numeric" | "decimal", Some(a)) => format!("{}({})", backend, a.trim()),
            _ => backend.to_string(),
        };
        Some(CastTarget::Type { backend, pg_oid: *oid })
    }

    pub fn operators(&self) -> &[(&'static str, VectorMetric)] { &self.operators }

    pub fn function_metric(&self, name: &str) -> Option<VectorMetric> {
        self.functions.get(name.to_ascii_lowercase().as_str()).copied()
    }

    pub fn is_catalog_table(&self, name: &str) -> bool {
        self.catalog_tables.contains(name.to_ascii_lowercase().as_str())
    }

    pub fn is_local_function(&self, name: &str) -> bool {
        let n = name.to_ascii_lowercase();
        self.local_functions.iter().any(|f| *f == n)
    }
}
