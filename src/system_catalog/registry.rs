use std::sync::Arc;

use polars::prelude::{DataFrame, DataType, NamedFrom, Series};

use super::metadata::{CatalogSnapshot, MetadataNeeds};
use super::types;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColType {
    SmallInt,
    Integer,
    BigInt,
    /// Stored as i64 so the full u32 range fits.
    Oid,
    Boolean,
    Text,
    Name,
    /// postgres' single-byte `"char"`
    Char,
    /// `{1,2}` text form
    Int2Array,
    TextArray,
}

impl ColType {
    pub fn type_oid(&self) -> i32 {
        match self {
            ColType::SmallInt => types::INT2,
            ColType::Integer => types::INT4,
            ColType::BigInt => types::INT8,
            ColType::Oid => types::OID,
            ColType::Boolean => types::BOOL,
            ColType::Text => types::TEXT,
            ColType::Name => types::NAME,
            ColType::Char => types::CHAR,
            ColType::Int2Array => types::INT2_ARRAY,
            ColType::TextArray => types::TEXT_ARRAY,
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ColType::SmallInt | ColType::Integer => DataType::Int32,
            ColType::BigInt | ColType::Oid => DataType::Int64,
            ColType::Boolean => DataType::Boolean,
            _ => DataType::String,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ColumnDef {
    pub name: &'static str,
    pub coltype: ColType,
}

pub const fn col(name: &'static str, coltype: ColType) -> ColumnDef { ColumnDef { name, coltype } }

pub trait SystemTable: Send + Sync {
    fn schema(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn columns(&self) -> &'static [ColumnDef];
    /// Metadata kinds `build` reads from the snapshot.
    fn needs(&self) -> MetadataNeeds { MetadataNeeds::default() }
    fn build(&self, _snap: &CatalogSnapshot) -> Option<DataFrame> { Some(build_empty(self.columns())) }

    fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns().iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A table clients probe for but which is always empty here.
pub struct NoOpSystemTable {
    schema: &'static str,
    name: &'static str,
    columns: &'static [ColumnDef],
}

impl NoOpSystemTable {
    pub const fn new(schema: &'static str, name: &'static str, columns: &'static [ColumnDef]) -> Self {
        Self { schema, name, columns }
    }
}

impl SystemTable for NoOpSystemTable {
    fn schema(&self) -> &'static str { self.schema }
    fn name(&self) -> &'static str { self.name }
    fn columns(&self) -> &'static [ColumnDef] { self.columns }
}

pub fn build_empty(cols: &[ColumnDef]) -> DataFrame {
    let series: Vec<Series> = cols
        .iter()
        .map(|c| match c.coltype.dtype() {
            DataType::Int32 => Series::new(c.name.into(), Vec::<i32>::new()),
            DataType::Int64 => Series::new(c.name.into(), Vec::<i64>::new()),
            DataType::Boolean => Series::new(c.name.into(), Vec::<bool>::new()),
            _ => Series::new(c.name.into(), Vec::<Option<String>>::new()),
        })
        .collect();
    DataFrame::new(series.into_iter().map(|s| s.into()).collect()).unwrap_or_default()
}

/// Renders an int2vector / int2[] cell.
pub fn int2_array(values: &[i16]) -> String {
    format!("{{{}}}", values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
}

/// Every catalog table the synthesizer can answer. Built once, never mutated afterwards.
pub struct CatalogRegistry {
    tables: Vec<Arc<dyn SystemTable>>,
}

impl Default for CatalogRegistry {
    fn default() -> Self { CatalogRegistry::with_defaults() }
}

impl CatalogRegistry {
    pub fn empty() -> Self { CatalogRegistry { tables: Vec::new() } }

    pub fn with_defaults() -> Self {
        let mut reg = CatalogRegistry::empty();
        super::pg_catalog::register_defaults(&mut reg);
        super::information_schema::register_defaults(&mut reg);
        reg
    }

    pub fn register(&mut self, table: Box<dyn SystemTable>) { self.tables.push(Arc::from(table)); }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn SystemTable>> { self.tables.iter() }

    pub fn find(&self, schema: &str, name: &str) -> Option<Arc<dyn SystemTable>> {
        self.tables
            .iter()
            .find(|t| t.schema().eq_ignore_ascii_case(schema) && t.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Resolve `schema.name`, `"schema"."name"` or a bare name (pg_catalog first,
    /// then information_schema).
    pub fn lookup(&self, input: &str) -> Option<Arc<dyn SystemTable>> {
        let cleaned: String = input.trim().trim_end_matches(';').chars().filter(|c| *c != '"').collect();
        let lower = cleaned.to_lowercase();
        let parts: Vec<&str> = lower.split('.').collect();
        match parts.as_slice() {
            [schema, name] => self.find(schema, name),
            [name] => self.find("pg_catalog", name).or_else(|| self.find("information_schema", name)),
            // db.schema.name
            [_, schema, name] => self.find(schema, name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_handles_qualified_quoted_and_bare() {
        let reg = CatalogRegistry::with_defaults();
        assert_eq!(reg.lookup("pg_class").map(|t| t.name()), Some("pg_class"));
        assert_eq!(reg.lookup("PG_CATALOG.PG_NAMESPACE").map(|t| t.name()), Some("pg_namespace"));
        assert_eq!(reg.lookup("\"information_schema\".\"tables\"").map(|t| t.schema()), Some("information_schema"));
        assert_eq!(reg.lookup("columns").map(|t| t.schema()), Some("information_schema"));
        assert!(reg.lookup("pg_nothing").is_none());
    }

    #[test]
    fn empty_frames_follow_declared_columns() {
        let cols = [col("oid", ColType::Oid), col("relname", ColType::Name), col("relhasindex", ColType::Boolean)];
        let df = build_empty(&cols);
        assert_eq!(df.height(), 0);
        let names: Vec<&str> = df.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["oid", "relname", "relhasindex"]);
        assert_eq!(df.column("oid").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn int2_array_text_form() {
        assert_eq!(int2_array(&[1, 3]), "{1,3}");
        assert_eq!(int2_array(&[]), "{}");
    }
}
