use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct ITables;

const COLS: &[ColumnDef] = &[
    col("table_catalog", ColType::Name),
    col("table_schema", ColType::Name),
    col("table_name", ColType::Name),
    col("table_type", ColType::Text),
    col("is_insertable_into", ColType::Text),
    col("is_typed", ColType::Text),
];

impl SystemTable for ITables {
    fn schema(&self) -> &'static str { "information_schema" }
    fn name(&self) -> &'static str { "tables" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let rows = snap.tables.len();
        let schema: Vec<String> = snap.tables.iter().map(|t| t.schema.clone()).collect();
        let name: Vec<String> = snap.tables.iter().map(|t| t.name.clone()).collect();
        let kind: Vec<&str> = snap.tables.iter().map(|t| if t.relkind == 'v' { "VIEW" } else { "BASE TABLE" }).collect();
        let insertable: Vec<&str> = snap.tables.iter().map(|t| if t.relkind == 'v' { "NO" } else { "YES" }).collect();
        DataFrame::new(vec![
            Series::new("table_catalog".into(), vec![snap.database.clone(); rows]).into(),
            Series::new("table_schema".into(), schema).into(),
            Series::new("table_name".into(), name).into(),
            Series::new("table_type".into(), kind).into(),
            Series::new("is_insertable_into".into(), insertable).into(),
            Series::new("is_typed".into(), vec!["NO"; rows]).into(),
        ])
        .ok()
    }
}
