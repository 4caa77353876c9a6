use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct PgTables;

const COLS: &[ColumnDef] = &[
    col("schemaname", ColType::Name),
    col("tablename", ColType::Name),
    col("tableowner", ColType::Name),
    col("tablespace", ColType::Name),
    col("hasindexes", ColType::Boolean),
    col("hasrules", ColType::Boolean),
    col("hastriggers", ColType::Boolean),
    col("rowsecurity", ColType::Boolean),
];

impl SystemTable for PgTables {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_tables" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, indexes: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let tables: Vec<_> = snap.tables.iter().filter(|t| t.relkind == 'r').collect();
        let rows = tables.len();
        let hasindexes: Vec<bool> = tables
            .iter()
            .map(|t| snap.indexes.iter().any(|i| i.schema == t.schema && i.table == t.name))
            .collect();
        DataFrame::new(vec![
            Series::new("schemaname".into(), tables.iter().map(|t| t.schema.clone()).collect::<Vec<_>>()).into(),
            Series::new("tablename".into(), tables.iter().map(|t| t.name.clone()).collect::<Vec<_>>()).into(),
            Series::new("tableowner".into(), vec![snap.user.clone(); rows]).into(),
            Series::new("tablespace".into(), vec![None::<String>; rows]).into(),
            Series::new("hasindexes".into(), hasindexes).into(),
            Series::new("hasrules".into(), vec![false; rows]).into(),
            Series::new("hastriggers".into(), vec![false; rows]).into(),
            Series::new("rowsecurity".into(), vec![false; rows]).into(),
        ])
        .ok()
    }
}
