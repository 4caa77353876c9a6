use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, ConstraintKind, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct ITableConstraints;

const COLS: &[ColumnDef] = &[
    col("constraint_catalog", ColType::Name),
    col("constraint_schema", ColType::Name),
    col("constraint_name", ColType::Name),
    col("table_schema", ColType::Name),
    col("table_name", ColType::Name),
    col("constraint_type", ColType::Text),
];

impl SystemTable for ITableConstraints {
    fn schema(&self) -> &'static str { "information_schema" }
    fn name(&self) -> &'static str { "table_constraints" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, constraints: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let cons = &snap.constraints;
        let rows = cons.len();
        let kind: Vec<&str> = cons
            .iter()
            .map(|c| match c.kind {
                ConstraintKind::PrimaryKey => "PRIMARY KEY",
                ConstraintKind::ForeignKey => "FOREIGN KEY",
                ConstraintKind::Unique => "UNIQUE",
            })
            .collect();
        DataFrame::new(vec![
            Series::new("constraint_catalog".into(), vec![snap.database.clone(); rows]).into(),
            Series::new("constraint_schema".into(), cons.iter().map(|c| c.schema.clone()).collect::<Vec<_>>()).into(),
            Series::new("constraint_name".into(), cons.iter().map(|c| c.name.clone()).collect::<Vec<_>>()).into(),
            Series::new("table_schema".into(), cons.iter().map(|c| c.schema.clone()).collect::<Vec<_>>()).into(),
            Series::new("table_name".into(), cons.iter().map(|c| c.table.clone()).collect::<Vec<_>>()).into(),
            Series::new("constraint_type".into(), kind).into(),
        ])
        .ok()
    }
}
