use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct PgNamespace;

const COLS: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("nspname", ColType::Name),
    col("nspowner", ColType::Oid),
    col("nspacl", ColType::TextArray),
];

impl SystemTable for PgNamespace {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_namespace" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let mut names: Vec<String> = vec!["pg_catalog".into(), "information_schema".into(), "public".into()];
        for s in snap.schemas() {
            if !names.contains(&s) { names.push(s); }
        }
        let oid: Vec<i64> = names.iter().map(|n| snap.namespace_oid(n) as i64).collect();
        let rows = names.len();
        DataFrame::new(vec![
            Series::new("oid".into(), oid).into(),
            Series::new("nspname".into(), names).into(),
            Series::new("nspowner".into(), vec![10i64; rows]).into(),
            Series::new("nspacl".into(), vec![None::<String>; rows]).into(),
        ])
        .ok()
    }
}
