use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::system_catalog::metadata::{CatalogSnapshot, ConstraintKind, MetadataNeeds};
use crate::system_catalog::registry::{col, int2_array, ColType, ColumnDef, SystemTable};

pub struct PgConstraint;

const COLS: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("conname", ColType::Name),
    col("connamespace", ColType::Oid),
    col("contype", ColType::Char),
    col("condeferrable", ColType::Boolean),
    col("condeferred", ColType::Boolean),
    col("convalidated", ColType::Boolean),
    col("conrelid", ColType::Oid),
    col("contypid", ColType::Oid),
    col("conindid", ColType::Oid),
    col("conparentid", ColType::Oid),
    col("confrelid", ColType::Oid),
    col("confupdtype", ColType::Char),
    col("confdeltype", ColType::Char),
    col("confmatchtype", ColType::Char),
    col("conislocal", ColType::Boolean),
    col("coninhcount", ColType::SmallInt),
    col("connoinherit", ColType::Boolean),
    col("conkey", ColType::Int2Array),
    col("confkey", ColType::Int2Array),
];

impl SystemTable for PgConstraint {
    fn schema(&self) -> &'static str { "pg_catalog" }
    fn name(&self) -> &'static str { "pg_constraint" }
    fn columns(&self) -> &'static [ColumnDef] { COLS }
    fn needs(&self) -> MetadataNeeds { MetadataNeeds { tables: true, columns: true, constraints: true, indexes: true } }
    fn build(&self, snap: &CatalogSnapshot) -> Option<DataFrame> {
        let mut oid: Vec<i64> = Vec::new();
        let mut conname: Vec<String> = Vec::new();
        let mut connamespace: Vec<i64> = Vec::new();
        let mut contype: Vec<&str> = Vec::new();
        let mut conrelid: Vec<i64> = Vec::new();
        let mut conindid: Vec<i64> = Vec::new();
        let mut confrelid: Vec<i64> = Vec::new();
        let mut conkey: Vec<String> = Vec::new();
        let mut confkey: Vec<Option<String>> = Vec::new();
        let mut fk_action: Vec<&str> = Vec::new();
        let mut fk_match: Vec<&str> = Vec::new();

        for c in &snap.constraints {
            oid.push(snap.constraint_oid(c) as i64);
            conname.push(c.name.clone());
            connamespace.push(snap.namespace_oid(&c.schema) as i64);
            contype.push(c.kind.contype());
            conrelid.push(snap.table_oid(&c.schema, &c.table) as i64);
            conkey.push(int2_array(&snap.attnums(&c.schema, &c.table, &c.columns)));
            match (&c.kind, &c.references) {
                (ConstraintKind::ForeignKey, Some(r)) => {
                    confrelid.push(snap.table_oid(&r.schema, &r.table) as i64);
                    confkey.push(Some(int2_array(&snap.attnums(&r.schema, &r.table, &r.columns))));
                    // the referenced table's key index
                    let idx = snap
                        .indexes
                        .iter()
                        .find(|i| i.schema == r.schema && i.table == r.table && i.unique && i.columns == r.columns);
                    conindid.push(idx.map(|i| snap.index_oid(i) as i64).unwrap_or(0));
                    fk_action.push("a");
                    fk_match.push("s");
                }
                _ => {
                    confrelid.push(0);
                    confkey.push(None);
                    let idx = snap.indexes.iter().find(|i| {
                        i.schema == c.schema && i.table == c.table && i.columns == c.columns && i.unique
                    });
                    conindid.push(idx.map(|i| snap.index_oid(i) as i64).unwrap_or(0));
                    fk_action.push(" ");
                    fk_match.push(" ");
                }
            }
        }
        let rows = oid.len();
        DataFrame::new(vec![
            Series::new("oid".into(), oid).into(),
            Series::new("conname".into(), conname).into(),
            Series::new("connamespace".into(), connamespace).into(),
            Series::new("contype".into(), contype).into(),
            Series::new("condeferrable".into(), vec![false; rows]).into(),
            Series::new("condeferred".into(), vec![false; rows]).into(),
            Series::new("convalidated".into(), vec![true; rows]).into(),
            Series::new("conrelid".into(), conrelid).into(),
            Series::new("contypid".into(), vec![0i64; rows]).into(),
            Series::new("conindid".into(), conindid).into(),
            Series::new("conparentid".into(), vec![0i64; rows]).into(),
            Series::new("confrelid".into(), confrelid).into(),
            Series::new("confupdtype".into(), fk_action.clone()).into(),
            Series::new("confdeltype".into(), fk_action).into(),
            Series::new("confmatchtype".into(), fk_match).into(),
            Series::new("conislocal".into(), vec![true; rows]).into(),
            Series::new("coninhcount".into(), vec![0i32; rows]).into(),
            Series::new("connoinherit".into(), vec![true; rows]).into(),
            Series::new("conkey".into(), conkey).into(),
            Series::new("confkey".into(), confkey).into(),
        ])
        .ok()
    }
}
