use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct IViews;

const COLS: &[ColumnDef] = &[
    col("table_catalog", ColType::Name),
    col("table_schema", ColType::Name),
    col("table_name", ColType::Name),
    col("view_definition", ColType::Text),
];

impl SystemTable for IViews {
    fn schema(&self) -> &'static str { "information_schema" }
    fn name(&self) -> &'static str { "views" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let views: Vec<_> = snap.tables.iter().filter(|t| t.relkind == 'v').collect();
        let rows = views.len();
        DataFrame::new(vec![
            Series::new("table_catalog".into(), vec![snap.database.clone(); rows]).into(),
            Series::new("table_schema".into(), views.iter().map(|t| t.schema.clone()).collect::<Vec<_>>()).into(),
            Series::new("table_name".into(), views.iter().map(|t| t.name.clone()).collect::<Vec<_>>()).into(),
            Series::new("view_definition".into(), vec![None::<String>; rows]).into(),
        ])
        .ok()
    }
}
