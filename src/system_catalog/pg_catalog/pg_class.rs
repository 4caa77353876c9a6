use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, MetadataNeeds};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct PgClass;

const COLS: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("relname", ColType::Name),
    col("relnamespace", ColType::Oid),
    col("reltype", ColType::Oid),
    col("relowner", ColType::Oid),
    col("relam", ColType::Oid),
    col("relkind", ColType::Char),
    col("relnatts", ColType::SmallInt),
    col("relchecks", ColType::SmallInt),
    col("relhasindex", ColType::Boolean),
    col("relhasrules", ColType::Boolean),
    col("relhastriggers", ColType::Boolean),
    col("relhassubclass", ColType::Boolean),
    col("relrowsecurity", ColType::Boolean),
    col("relispartition", ColType::Boolean),
    col("relpersistence", ColType::Char),
    col("reltablespace", ColType::Oid),
    col("relacl", ColType::TextArray),
    col("reloptions", ColType::TextArray),
];

impl SystemTable for PgClass {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_class" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, columns: true, indexes: true, ..Default::default() } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let mut oid: Vec<i64> = Vec::new();
        let mut relname: Vec<String> = Vec::new();
        let mut relnamespace: Vec<i64> = Vec::new();
        let mut relkind: Vec<String> = Vec::new();
        let mut relnatts: Vec<i32> = Vec::new();
        let mut relhasindex: Vec<bool> = Vec::new();

        for t in &snap.tables {
            oid.push(snap.table_oid(&t.schema, &t.name) as i64);
            relname.push(t.name.clone());
            relnamespace.push(snap.namespace_oid(&t.schema) as i64);
            relkind.push(t.relkind.to_string());
            relnatts.push(snap.table_columns(&t.schema, &t.name).len() as i32);
            relhasindex.push(snap.indexes.iter().any(|i| i.schema == t.schema && i.table == t.name));
        }
        for i in &snap.indexes {
            oid.push(snap.index_oid(i) as i64);
            relname.push(i.name.clone());
            relnamespace.push(snap.namespace_oid(&i.schema) as i64);
            relkind.push("i".into());
            relnatts.push(i.columns.len() as i32);
            relhasindex.push(false);
        }
        let rows = oid.len();
        let falses = vec![false; rows];
        let zeros = vec![0i64; rows];
        DataFrame::new(vec![
            Series::new("oid".into(), oid).into(),
            Series::new("relname".into(), relname).into(),
            Series::new("relnamespace".into(), relnamespace).into(),
            Series::new("reltype".into(), zeros.clone()).into(),
            Series::new("relowner".into(), vec![10i64; rows]).into(),
            Series::new("relam".into(), zeros.clone()).into(),
            Series::new("relkind".into(), relkind).into(),
            Series::new("relnatts".into(), relnatts).into(),
            Series::new("relchecks".into(), vec![0i32; rows]).into(),
            Series::new("relhasindex".into(), relhasindex).into(),
            Series::new("relhasrules".into(), falses.clone()).into(),
            Series::new("relhastriggers".into(), falses.clone()).into(),
            Series::new("relhassubclass".into(), falses.clone()).into(),
            Series::new("relrowsecurity".into(), falses.clone()).into(),
            Series::new("relispartition".into(), falses).into(),
            Series::new("relpersistence".into(), vec!["p".to_string(); rows]).into(),
            Series::new("reltablespace".into(), zeros).into(),
            Series::new("relacl".into(), vec![None::<String>; rows]).into(),
            Series::new("reloptions".into(), vec![None::<String>; rows]).into(),
        ])
        .ok()
    }
}
