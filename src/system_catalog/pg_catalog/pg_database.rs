use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::CatalogSnapshot;
use crate::system_catalog::oid::{CatalogObjectIdentity, ObjectKind};
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

pub struct PgDatabase;

const COLS: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("datname", ColType::Name),
    col("datdba", ColType::Oid),
    col("encoding", ColType::Integer),
    col("datlocprovider", ColType::Char),
    col("datistemplate", ColType::Boolean),
    col("datallowconn", ColType::Boolean),
    col("datconnlimit", ColType::Integer),
    col("datcollate", ColType::Text),
    col("datctype", ColType::Text),
    col("dattablespace", ColType::Oid),
    col("datacl", ColType::TextArray),
];

impl SystemTable for PgDatabase {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_database" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let oid = snap.oids.identifier_for(&CatalogObjectIdentity::new("pg_catalog", ObjectKind::Namespace, format!("database:{}", snap.database)));
        DataFrame::new(vec![
            Series::new("oid".into(), vec![oid as i64]).into(),
            Series::new("datname".into(), vec![snap.database.clone()]).into(),
            Series::new("datdba".into(), vec![10i64]).into(),
            // UTF8
            Series::new("encoding".into(), vec![6i32]).into(),
            Series::new("datlocprovider".into(), vec!["c"]).into(),
            Series::new("datistemplate".into(), vec![false]).into(),
            Series::new("datallowconn".into(), vec![true]).into(),
            Series::new("datconnlimit".into(), vec![-1i32]).into(),
            Series::new("datcollate".into(), vec!["C"]).into(),
            Series::new("datctype".into(), vec!["C"]).into(),
            Series::new("dattablespace".into(), vec![1663i64]).into(),
            Series::new("datacl".into(), vec![None::<String>]).into(),
        ])
        .ok()
    }
}
