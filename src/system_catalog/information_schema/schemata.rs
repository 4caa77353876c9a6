use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct ISchemata;

const COLS: &[ColumnDef] = &[
    col("catalog_name", ColType::Name),
    col("schema_name", ColType::Name),
    col("schema_owner", ColType::Name),
];

impl SystemTable for ISchemata {
    fn schema(&self) -> &'static str { "information_schema" }
    fn name(&self) -> &'static str { "schemata" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let mut names: Vec<String> = vec!["information_schema".into(), "pg_catalog".into(), "public".into()];
        for s in snap.schemas() {
            if !names.contains(&s) { names.push(s); }
        }
        let rows = names.len();
        DataFrame::new(vec![
            Series::new("catalog_name".into(), vec![snap.database.clone(); rows]).into(),
            Series::new("schema_name".into(), names).into(),
            Series::new("schema_owner".into(), vec![snap.user.clone(); rows]).into(),
        ])
        .ok()
    }
}
