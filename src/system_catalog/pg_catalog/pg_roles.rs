use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::CatalogSnapshot;
use crate::system_catalog::registry::{col, ColType, ColumnDef, SystemTable};

/// The session user is the only role, and a superuser.
pub struct PgRoles;

const COLS: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("rolname", ColType::Name),
    col("rolsuper", ColType::Boolean),
    col("rolinherit", ColType::Boolean),
    col("rolcreaterole", ColType::Boolean),
    col("rolcreatedb", ColType::Boolean),
    col("rolcanlogin", ColType::Boolean),
    col("rolreplication", ColType::Boolean),
    col("rolbypassrls", ColType::Boolean),
    col("rolconnlimit", ColType::Integer),
    col("rolpassword", ColType::Text),
    col("rolvaliduntil", ColType::Text),
];

impl SystemTable for PgRoles {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_roles" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        DataFrame::new(vec![
            Series::new("oid".into(), vec![10i64]).into(),
            Series::new("rolname".into(), vec![snap.user.clone()]).into(),
            Series::new("rolsuper".into(), vec![true]).into(),
            Series::new("rolinherit".into(), vec![true]).into(),
            Series::new("rolcreaterole".into(), vec![true]).into(),
            Series::new("rolcreatedb".into(), vec![true]).into(),
            Series::new("rolcanlogin".into(), vec![true]).into(),
            Series::new("rolreplication".into(), vec![false]).into(),
            Series::new("rolbypassrls".into(), vec![false]).into(),
            Series::new("rolconnlimit".into(), vec![-1i32]).into(),
            Series::new("rolpassword".into(), vec!["********"]).into(),
            Series::new("rolvaliduntil".into(), vec![None::<String>]).into(),
        ])
        .ok()
    }
}
