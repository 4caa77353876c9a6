use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct PgAttrdef;

const COLS: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("adrelid", ColType::Oid),
    col("adnum", ColType::SmallInt),
    // expression text; pg_get_expr(adbin, adrelid) returns it as-is
    col("adbin", ColType::Text),
];

impl SystemTable for PgAttrdef {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_attrdef" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, columns: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let with_default: Vec<_> = snap.columns.iter().filter(|c| c.default.is_some()).collect();
        let oid: Vec<i64> = with_default.iter().map(|c| snap.default_oid(c) as i64).collect();
        let adrelid: Vec<i64> = with_default.iter().map(|c| snap.table_oid(&c.schema, &c.table) as i64).collect();
        let adnum: Vec<i32> = with_default.iter().map(|c| c.ordinal).collect();
        let adbin: Vec<Option<String>> = with_default.iter().map(|c| c.default.clone()).collect();
        DataFrame::new(vec![
            Series::new("oid".into(), oid).into(),
            Series::new("adrelid".into(), adrelid).into(),
            Series::new("adnum".into(), adnum).into(),
            Series::new("adbin".into(), adbin).into(),
        ])
        .ok()
    }
}
