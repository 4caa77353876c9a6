use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};
use crate::system_catalog::types;

pub struct IColumns;

const COLS: &[ColumnDef] = &[
    col("table_catalog", ColType::Name),
    col("table_schema", ColType::Name),
    col("table_name", ColType::Name),
    col("column_name", ColType::Name),
    col("ordinal_position", ColType::Integer),
    col("column_default", ColType::Text),
    col("is_nullable", ColType::Text),
    col("data_type", ColType::Text),
    col("character_maximum_length", ColType::Integer),
    col("numeric_precision", ColType::Integer),
    col("numeric_scale", ColType::Integer),
    col("udt_name", ColType::Name),
];

impl SystemTable for IColumns {
    fn schema(&self) -> &'static str { "information_schema" }
    fn name(&self) -> &'static str { "columns" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, columns: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let cols = &snap.columns;
        let rows = cols.len();
        // data_type is the SQL-standard name without modifiers
        let data_type: Vec<String> = cols.iter().map(|c| types::format_type(c.type_oid, -1)).collect();
        let udt_name: Vec<&str> =
            cols.iter().map(|c| types::builtin(c.type_oid).map(|b| b.name).unwrap_or("text")).collect();
        DataFrame::new(vec![
            Series::new("table_catalog".into(), vec![snap.database.clone(); rows]).into(),
            Series::new("table_schema".into(), cols.iter().map(|c| c.schema.clone()).collect::<Vec<_>>()).into(),
            Series::new("table_name".into(), cols.iter().map(|c| c.table.clone()).collect::<Vec<_>>()).into(),
            Series::new("column_name".into(), cols.iter().map(|c| c.name.clone()).collect::<Vec<_>>()).into(),
            Series::new("ordinal_position".into(), cols.iter().map(|c| c.ordinal).collect::<Vec<_>>()).into(),
            Series::new("column_default".into(), cols.iter().map(|c| c.default.clone()).collect::<Vec<_>>()).into(),
            Series::new("is_nullable".into(), cols.iter().map(|c| if c.nullable { "YES" } else { "NO" }).collect::<Vec<_>>()).into(),
            Series::new("data_type".into(), data_type).into(),
            Series::new("character_maximum_length".into(), cols.iter().map(|c| c.char_len).collect::<Vec<_>>()).into(),
            Series::new("numeric_precision".into(), cols.iter().map(|c| c.precision).collect::<Vec<_>>()).into(),
            Series::new("numeric_scale".into(), cols.iter().map(|c| c.scale).collect::<Vec<_>>()).into(),
            Series::new("udt_name".into(), udt_name).into(),
        ])
        .ok()
    }
}
