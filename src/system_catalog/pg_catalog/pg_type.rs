use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::CatalogSnapshot;
use crate::system_catalog::oid::PG_CATALOG_NAMESPACE_OID;
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};
use crate::system_catalog::types::BUILTIN_TYPES;

pub struct PgType;

const COLS: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("typname", ColType::Name),
    col("typnamespace", ColType::Oid),
    col("typowner", ColType::Oid),
    col("typlen", ColType::SmallInt),
    col("typbyval", ColType::Boolean),
    col("typtype", ColType::Char),
    col("typcategory", ColType::Char),
    col("typisdefined", ColType::Boolean),
    col("typdelim", ColType::Char),
    col("typrelid", ColType::Oid),
    col("typelem", ColType::Oid),
    col("typarray", ColType::Oid),
    col("typbasetype", ColType::Oid),
    col("typtypmod", ColType::Integer),
    col("typnotnull", ColType::Boolean),
    col("typndims", ColType::Integer),
];

/// Only built-in types exist; backend types all map onto one of them.
impl SystemTable for PgType {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_type" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn build(&self, _snap: &CatalogSnapshot) -> Option<DataFrame> {
        let rows = BUILTIN_TYPES.len();
        let oid: Vec<i64> = BUILTIN_TYPES.iter().map(|t| t.oid as i64).collect();
        let typname: Vec<&str> = BUILTIN_TYPES.iter().map(|t| t.name).collect();
        let typlen: Vec<i32> = BUILTIN_TYPES.iter().map(|t| t.len as i32).collect();
        let typbyval: Vec<bool> = BUILTIN_TYPES.iter().map(|t| t.len > 0 && t.len <= 8).collect();
        let typcategory: Vec<&str> = BUILTIN_TYPES.iter().map(|t| t.category).collect();
        let typelem: Vec<i64> = BUILTIN_TYPES.iter().map(|t| t.elem as i64).collect();
        let typarray: Vec<i64> = BUILTIN_TYPES.iter().map(|t| t.array as i64).collect();
        let zeros = vec![0i64; rows];
        DataFrame::new(vec![
            Series::new("oid".into(), oid).into(),
            Series::new("typname".into(), typname).into(),
            Series::new("typnamespace".into(), vec![PG_CATALOG_NAMESPACE_OID as i64; rows]).into(),
            Series::new("typowner".into(), vec![10i64; rows]).into(),
            Series::new("typlen".into(), typlen).into(),
            Series::new("typbyval".into(), typbyval).into(),
            Series::new("typtype".into(), vec!["b"; rows]).into(),
            Series::new("typcategory".into(), typcategory).into(),
            Series::new("typisdefined".into(), vec![true; rows]).into(),
            Series::new("typdelim".into(), vec![","; rows]).into(),
            Series::new("typrelid".into(), zeros.clone()).into(),
            Series::new("typelem".into(), typelem).into(),
            Series::new("typarray".into(), typarray).into(),
            Series::new("typbasetype".into(), zeros).into(),
            Series::new("typtypmod".into(), vec![-1i32; rows]).into(),
            Series::new("typnotnull".into(), vec![false; rows]).into(),
            Series::new("typndims".into(), vec![0i32; rows]).into(),
        ])
        .ok()
    }
}
