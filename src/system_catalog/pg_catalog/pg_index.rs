use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, int2_array, ColType, ColumnDef, SystemTable};

pub struct PgIndex;

const COLS: &[ColumnDef] = &[
    col("indexrelid", ColType::Oid),
    col("indrelid", ColType::Oid),
    col("indnatts", ColType::SmallInt),
    col("indnkeyatts", ColType::SmallInt),
    col("indisunique", ColType::Boolean),
    col("indisprimary", ColType::Boolean),
    col("indisexclusion", ColType::Boolean),
    col("indimmediate", ColType::Boolean),
    col("indisclustered", ColType::Boolean),
    col("indisvalid", ColType::Boolean),
    col("indisready", ColType::Boolean),
    col("indislive", ColType::Boolean),
    col("indkey", ColType::Int2Array),
    col("indexprs", ColType::Text),
    col("indpred", ColType::Text),
];

impl SystemTable for PgIndex {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_index" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, columns: true, indexes: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let indexrelid: Vec<i64> = snap.indexes.iter().map(|i| snap.index_oid(i) as i64).collect();
        let indrelid: Vec<i64> = snap.indexes.iter().map(|i| snap.table_oid(&i.schema, &i.table) as i64).collect();
        let natts: Vec<i32> = snap.indexes.iter().map(|i| i.columns.len() as i32).collect();
        let unique: Vec<bool> = snap.indexes.iter().map(|i| i.unique).collect();
        let primary: Vec<bool> = snap.indexes.iter().map(|i| i.primary).collect();
        let indkey: Vec<String> =
            snap.indexes.iter().map(|i| int2_array(&snap.attnums(&i.schema, &i.table, &i.columns))).collect();
        let rows = indexrelid.len();
        let trues = vec![true; rows];
        let falses = vec![false; rows];
        DataFrame::new(vec![
            Series::new("indexrelid".into(), indexrelid).into(),
            Series::new("indrelid".into(), indrelid).into(),
            Series::new("indnatts".into(), natts.clone()).into(),
            Series::new("indnkeyatts".into(), natts).into(),
            Series::new("indisunique".into(), unique).into(),
            Series::new("indisprimary".into(), primary).into(),
            Series::new("indisexclusion".into(), falses.clone()).into(),
            Series::new("indimmediate".into(), trues.clone()).into(),
            Series::new("indisclustered".into(), falses).into(),
            Series::new("indisvalid".into(), trues.clone()).into(),
            Series::new("indisready".into(), trues.clone()).into(),
            Series::new("indislive".into(), trues).into(),
            Series::new("indkey".into(), indkey).into(),
            Series::new("indexprs".into(), vec![None::<String>; rows]).into(),
            Series::new("indpred".into(), vec![None::<String>; rows]).into(),
        ])
        .ok()
    }
}
