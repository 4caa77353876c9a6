use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};
use crate::system_catalog::types;

pub struct PgAttribute;

const COLS: &[ColumnDef] = &[
    col("attrelid", ColType::Oid),
    col("attname", ColType::Name),
    col("atttypid", ColType::Oid),
    col("attlen", ColType::SmallInt),
    col("attnum", ColType::SmallInt),
    col("atttypmod", ColType::Integer),
    col("attndims", ColType::SmallInt),
    col("attnotnull", ColType::Boolean),
    col("atthasdef", ColType::Boolean),
    col("attidentity", ColType::Char),
    col("attgenerated", ColType::Char),
    col("attisdropped", ColType::Boolean),
    col("attislocal", ColType::Boolean),
    col("attcollation", ColType::Oid),
];

impl SystemTable for PgAttribute {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_attribute" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, columns: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let mut attrelid: Vec<i64> = Vec::new();
        let mut attname: Vec<String> = Vec::new();
        let mut atttypid: Vec<i64> = Vec::new();
        let mut attlen: Vec<i32> = Vec::new();
        let mut attnum: Vec<i32> = Vec::new();
        let mut atttypmod: Vec<i32> = Vec::new();
        let mut attnotnull: Vec<bool> = Vec::new();
        let mut atthasdef: Vec<bool> = Vec::new();

        for t in &snap.tables {
            let rel = snap.table_oid(&t.schema, &t.name) as i64;
            for c in snap.table_columns(&t.schema, &t.name) {
                attrelid.push(rel);
                attname.push(c.name.clone());
                atttypid.push(c.type_oid as i64);
                attlen.push(types::builtin(c.type_oid).map(|b| b.len as i32).unwrap_or(-1));
                attnum.push(c.ordinal);
                atttypmod.push(c.typmod());
                attnotnull.push(!c.nullable);
                atthasdef.push(c.default.is_some());
            }
        }
        let rows = attrelid.len();
        DataFrame::new(vec![
            Series::new("attrelid".into(), attrelid).into(),
            Series::new("attname".into(), attname).into(),
            Series::new("atttypid".into(), atttypid).into(),
            Series::new("attlen".into(), attlen).into(),
            Series::new("attnum".into(), attnum).into(),
            Series::new("atttypmod".into(), atttypmod).into(),
            Series::new("attndims".into(), vec![0i32; rows]).into(),
            Series::new("attnotnull".into(), attnotnull).into(),
            Series::new("atthasdef".into(), atthasdef).into(),
            Series::new("attidentity".into(), vec![String::new(); rows]).into(),
            Series::new("attgenerated".into(), vec![String::new(); rows]).into(),
            Series::new("attisdropped".into(), vec![false; rows]).into(),
            Series::new("attislocal".into(), vec![true; rows]).into(),
            Series::new("attcollation".into(), vec![0i64; rows]).into(),
        ])
        .ok()
    }
}
