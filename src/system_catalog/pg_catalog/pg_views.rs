use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct PgViews;

const COLS: &[ColumnDef] = &[
    col("schemaname", ColType::Name),
    col("viewname", ColType::Name),
    col("viewowner", ColType::Name),
    col("definition", ColType::Text),
];

impl SystemTable for PgViews {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_views" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let views: Vec<_> = snap.tables.iter().filter(|t| t.relkind == 'v').collect();
        let rows = views.len();
        DataFrame::new(vec![
            Series::new("schemaname".into(), views.iter().map(|t| t.schema.clone()).collect::<Vec<_>>()).into(),
            Series::new("viewname".into(), views.iter().map(|t| t.name.clone()).collect::<Vec<_>>()).into(),
            Series::new("viewowner".into(), vec![snap.user.clone(); rows]).into(),
            // view text is not exposed by the backend metadata views
            Series::new("definition".into(), vec![None::<String>; rows]).into(),
        ])
        .ok()
    }
}
