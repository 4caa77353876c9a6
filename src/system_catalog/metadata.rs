//! Backend metadata, fetched per catalog query from the backend's INFORMATION_SCHEMA.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::oid::{CatalogObjectIdentity, ObjectKind, OidGenerator};
use super::types;
use crate::backend::{BackendAdapter, RowSet, TypedValue};
use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    /// Client-facing schema (`public` for the default backend schema), lowercased.
    pub schema: String,
    pub name: String,
    /// `r` table, `v` view
    pub relkind: char,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub ordinal: i32,
    pub data_type: String,
    pub type_oid: i32,
    pub nullable: bool,
    pub default: Option<String>,
    pub char_len: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}

impl ColumnInfo {
    pub fn typmod(&self) -> i32 { types::typmod(self.type_oid, self.char_len, self.precision, self.scale) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
}

impl ConstraintKind {
    pub fn contype(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "p",
            ConstraintKind::ForeignKey => "f",
            ConstraintKind::Unique => "u",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignRef {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintInfo {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub references: Option<ForeignRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

/// Which metadata kinds a catalog query needs; the rest is never fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataNeeds {
    pub tables: bool,
    pub columns: bool,
    pub constraints: bool,
    pub indexes: bool,
}

impl MetadataNeeds {
    pub fn any(&self) -> bool { self.tables || self.columns || self.constraints || self.indexes }

    pub fn union(self, other: MetadataNeeds) -> MetadataNeeds {
        MetadataNeeds {
            tables: self.tables || other.tables,
            columns: self.columns || other.columns,
            constraints: self.constraints || other.constraints,
            indexes: self.indexes || other.indexes,
        }
    }
}

/// Everything a catalog query sees. Rebuilt for every query.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub tables: Vec<TableMeta>,
    pub columns: Vec<ColumnInfo>,
    pub constraints: Vec<ConstraintInfo>,
    pub indexes: Vec<IndexInfo>,
    pub database: String,
    pub user: String,
    pub oids: Arc<OidGenerator>,
}

impl CatalogSnapshot {
    pub fn empty(oids: Arc<OidGenerator>) -> Self {
        CatalogSnapshot {
            tables: Vec::new(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
            database: "postgres".into(),
            user: "postgres".into(),
            oids,
        }
    }

    pub fn schemas(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for t in &self.tables {
            if !out.contains(&t.schema) { out.push(t.schema.clone()); }
        }
        out.sort();
        out
    }

    pub fn namespace_oid(&self, schema: &str) -> u32 { self.oids.namespace_oid(schema) }

    pub fn table_oid(&self, schema: &str, table: &str) -> u32 { self.oids.table_oid(schema, table) }

    pub fn constraint_oid(&self, c: &ConstraintInfo) -> u32 {
        self.oids.identifier_for(&CatalogObjectIdentity::new(&c.schema, ObjectKind::Constraint, format!("{}.{}", c.table, c.name)))
    }

    pub fn index_oid(&self, i: &IndexInfo) -> u32 {
        self.oids.identifier_for(&CatalogObjectIdentity::new(&i.schema, ObjectKind::Index, format!("{}.{}", i.table, i.name)))
    }

    pub fn default_oid(&self, c: &ColumnInfo) -> u32 {
        self.oids.identifier_for(&CatalogObjectIdentity::new(&c.schema, ObjectKind::Default, format!("{}.{}", c.table, c.name)))
    }

    pub fn table_columns(&self, schema: &str, table: &str) -> Vec<&ColumnInfo> {
        let mut cols: Vec<&ColumnInfo> = self.columns.iter().filter(|c| c.schema == schema && c.table == table).collect();
        cols.sort_by_key(|c| c.ordinal);
        cols
    }

    /// 1-based attribute numbers of `names` in `schema.table`; unknown names are 0.
    pub fn attnums(&self, schema: &str, table: &str, names: &[String]) -> Vec<i16> {
        let cols = self.table_columns(schema, table);
        names
            .iter()
            .map(|n| cols.iter().find(|c| c.name == *n).map(|c| c.ordinal as i16).unwrap_or(0))
            .collect()
    }

    /// Resolve `name` or `schema.name` to a relation OID (tables first, then indexes).
    pub fn resolve_relation(&self, qualified: &str) -> Option<u32> {
        let lower = qualified.trim().trim_matches('"').to_lowercase();
        let (schema, name) = match lower.split_once('.') {
            Some((s, n)) => (Some(s.trim_matches('"').to_string()), n.trim_matches('"').to_string()),
            None => (None, lower.clone()),
        };
        let schema_ok = |s: &str| schema.as_deref().map(|want| want == s).unwrap_or(true);
        if let Some(t) = self.tables.iter().find(|t| t.name == name && schema_ok(&t.schema)) {
            return Some(self.table_oid(&t.schema, &t.name));
        }
        self.indexes.iter().find(|i| i.name == name && schema_ok(&i.schema)).map(|i| self.index_oid(i))
    }

    /// Inverse of `resolve_relation`, qualified outside `public`.
    pub fn relation_name(&self, oid: u32) -> Option<String> {
        let qualify = |schema: &str, name: &str| {
            if schema == "public" { name.to_string() } else { format!("{}.{}", schema, name) }
        };
        if let Some(t) = self.tables.iter().find(|t| self.table_oid(&t.schema, &t.name) == oid) {
            return Some(qualify(&t.schema, &t.name));
        }
        self.indexes.iter().find(|i| self.index_oid(i) == oid).map(|i| qualify(&i.schema, &i.name))
    }

    /// pg_get_constraintdef
    pub fn constraint_def(&self, oid: u32) -> Option<String> {
        let c = self.constraints.iter().find(|c| self.constraint_oid(c) == oid)?;
        let cols = c.columns.join(", ");
        Some(match (&c.kind, &c.references) {
            (ConstraintKind::PrimaryKey, _) => format!("PRIMARY KEY ({})", cols),
            (ConstraintKind::Unique, _) => format!("UNIQUE ({})", cols),
            (ConstraintKind::ForeignKey, Some(r)) => {
                let target = if r.schema == "public" { r.table.clone() } else { format!("{}.{}", r.schema, r.table) };
                format!("FOREIGN KEY ({}) REFERENCES {}({})", cols, target, r.columns.join(", "))
            }
            (ConstraintKind::ForeignKey, None) => format!("FOREIGN KEY ({})", cols),
        })
    }

    /// pg_get_indexdef
    pub fn index_def(&self, oid: u32) -> Option<String> {
        let i = self.indexes.iter().find(|i| self.index_oid(i) == oid)?;
        Some(format!(
            "CREATE {}INDEX {} ON {}.{} USING btree ({})",
            if i.unique { "UNIQUE " } else { "" },
            i.name,
            i.schema,
            i.table,
            i.columns.join(", ")
        ))
    }
}

/// Backend-side schema naming: system schemas are hidden, the default schema is `public`.
#[derive(Debug, Clone)]
pub struct SchemaMapping {
    pub default_backend_schema: String,
}

impl SchemaMapping {
    pub fn is_system(&self, backend_schema: &str) -> bool {
        let upper = backend_schema.to_ascii_uppercase();
        backend_schema.starts_with('%') || upper == "INFORMATION_SCHEMA" || upper.starts_with("ENS")
    }

    pub fn client_schema(&self, backend_schema: &str) -> String {
        if backend_schema.eq_ignore_ascii_case(&self.default_backend_schema) {
            "public".to_string()
        } else {
            backend_schema.to_lowercase()
        }
    }
}

const TABLES_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE FROM INFORMATION_SCHEMA.TABLES";
const COLUMNS_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, ORDINAL_POSITION, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE FROM INFORMATION_SCHEMA.COLUMNS";
const TABLE_CONSTRAINTS_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, CONSTRAINT_SCHEMA, CONSTRAINT_NAME, CONSTRAINT_TYPE FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS";
const KEY_COLUMN_USAGE_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, CONSTRAINT_NAME, COLUMN_NAME, ORDINAL_POSITION FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE";
const REFERENTIAL_CONSTRAINTS_SQL: &str = "SELECT CONSTRAINT_SCHEMA, CONSTRAINT_NAME, UNIQUE_CONSTRAINT_SCHEMA, UNIQUE_CONSTRAINT_NAME FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS";
const INDEXES_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, COLUMN_NAME, ORDINAL_POSITION, NON_UNIQUE, PRIMARY_KEY FROM INFORMATION_SCHEMA.INDEXES";

/// Case-insensitive column access into a backend RowSet.
struct Cells<'a> {
    rs: &'a RowSet,
    index: HashMap<String, usize>,
}

impl<'a> Cells<'a> {
    fn new(rs: &'a RowSet) -> Self {
        let index = rs.columns.iter().enumerate().map(|(i, c)| (c.name.to_ascii_uppercase(), i)).collect();
        Cells { rs, index }
    }

    fn text(&self, row: usize, name: &str) -> Option<String> {
        let i = *self.index.get(name)?;
        self.rs.rows.get(row)?.get(i)?.to_text().map(|c| c.into_owned())
    }

    fn int(&self, row: usize, name: &str) -> Option<i32> {
        let i = *self.index.get(name)?;
        match self.rs.rows.get(row)?.get(i)? {
            TypedValue::Int(v) => Some(*v as i32),
            TypedValue::Float(f) => Some(*f as i32),
            TypedValue::Text(s) => s.trim().parse().ok(),
            TypedValue::Bool(b) => Some(*b as i32),
            _ => None,
        }
    }

    fn flag(&self, row: usize, name: &str) -> bool {
        match self.text(row, name) {
            Some(s) => matches!(s.trim().to_ascii_uppercase().as_str(), "1" | "YES" | "Y" | "TRUE" | "T"),
            None => false,
        }
    }

    fn len(&self) -> usize { self.rs.rows.len() }
}

fn fetch(adapter: &BackendAdapter, sql: &str) -> GatewayResult<RowSet> {
    adapter.execute_blocking(sql, &[]).map_err(|e| GatewayError::catalog(format!("{} ({})", e.message, e.code)))
}

/// Blocking; call from `spawn_blocking`.
pub fn load_snapshot(
    adapter: &BackendAdapter,
    needs: MetadataNeeds,
    mapping: &SchemaMapping,
    oids: Arc<OidGenerator>,
) -> GatewayResult<CatalogSnapshot> {
    let mut snap = CatalogSnapshot::empty(oids);
    if !needs.any() {
        return Ok(snap);
    }
    // every other kind is keyed by table, so tables always come along
    let rs = fetch(adapter, TABLES_SQL)?;
    let cells = Cells::new(&rs);
    for r in 0..cells.len() {
        let (Some(schema), Some(name)) = (cells.text(r, "TABLE_SCHEMA"), cells.text(r, "TABLE_NAME")) else { continue };
        if mapping.is_system(&schema) { continue; }
        let kind = cells.text(r, "TABLE_TYPE").unwrap_or_default().to_ascii_uppercase();
        snap.tables.push(TableMeta {
            schema: mapping.client_schema(&schema),
            name: name.to_lowercase(),
            relkind: if kind.contains("VIEW") { 'v' } else { 'r' },
        });
    }

    if needs.columns {
        let rs = fetch(adapter, COLUMNS_SQL)?;
        let cells = Cells::new(&rs);
        for r in 0..cells.len() {
            let (Some(schema), Some(table), Some(name)) =
                (cells.text(r, "TABLE_SCHEMA"), cells.text(r, "TABLE_NAME"), cells.text(r, "COLUMN_NAME"))
            else {
                continue;
            };
            if mapping.is_system(&schema) { continue; }
            let data_type = cells.text(r, "DATA_TYPE").unwrap_or_else(|| "VARCHAR".into());
            snap.columns.push(ColumnInfo {
                schema: mapping.client_schema(&schema),
                table: table.to_lowercase(),
                name: name.to_lowercase(),
                ordinal: cells.int(r, "ORDINAL_POSITION").unwrap_or(0),
                type_oid: types::backend_type_oid(&data_type),
                data_type,
                nullable: cells.flag(r, "IS_NULLABLE"),
                default: cells.text(r, "COLUMN_DEFAULT").filter(|d| !d.is_empty()),
                char_len: cells.int(r, "CHARACTER_MAXIMUM_LENGTH"),
                precision: cells.int(r, "NUMERIC_PRECISION"),
                scale: cells.int(r, "NUMERIC_SCALE"),
            });
        }
    }

    if needs.constraints || needs.indexes {
        load_constraints(adapter, mapping, &mut snap)?;
    }
    if needs.indexes {
        load_indexes(adapter, mapping, &mut snap);
    }
    debug!(target: "catalog", "snapshot: tables={} columns={} constraints={} indexes={}", snap.tables.len(), snap.columns.len(), snap.constraints.len(), snap.indexes.len());
    Ok(snap)
}

fn load_constraints(adapter: &BackendAdapter, mapping: &SchemaMapping, snap: &mut CatalogSnapshot) -> GatewayResult<()> {
    let tc = fetch(adapter, TABLE_CONSTRAINTS_SQL)?;
    let kcu = fetch(adapter, KEY_COLUMN_USAGE_SQL)?;
    let tc_cells = Cells::new(&tc);
    let kcu_cells = Cells::new(&kcu);

    // (backend schema upper, constraint name upper) -> ordered columns
    let mut key_columns: HashMap<(String, String), Vec<(i32, String)>> = HashMap::new();
    for r in 0..kcu_cells.len() {
        let (Some(schema), Some(name), Some(col)) =
            (kcu_cells.text(r, "TABLE_SCHEMA"), kcu_cells.text(r, "CONSTRAINT_NAME"), kcu_cells.text(r, "COLUMN_NAME"))
        else {
            continue;
        };
        let ord = kcu_cells.int(r, "ORDINAL_POSITION").unwrap_or(0);
        key_columns.entry((schema.to_ascii_uppercase(), name.to_ascii_uppercase())).or_default().push((ord, col.to_lowercase()));
    }
    let columns_of = |schema: &str, name: &str| -> Vec<String> {
        let mut cols = key_columns.get(&(schema.to_ascii_uppercase(), name.to_ascii_uppercase())).cloned().unwrap_or_default();
        cols.sort_by_key(|(o, _)| *o);
        cols.into_iter().map(|(_, c)| c).collect()
    };

    // (backend schema upper, constraint name upper) -> (backend schema, table) for unique/primary keys
    let mut owners: HashMap<(String, String), (String, String)> = HashMap::new();
    let mut pending: Vec<(String, String, String, ConstraintKind)> = Vec::new();
    for r in 0..tc_cells.len() {
        let (Some(schema), Some(table), Some(name), Some(kind)) = (
            tc_cells.text(r, "TABLE_SCHEMA"),
            tc_cells.text(r, "TABLE_NAME"),
            tc_cells.text(r, "CONSTRAINT_NAME"),
            tc_cells.text(r, "CONSTRAINT_TYPE"),
        ) else {
            continue;
        };
        if mapping.is_system(&schema) { continue; }
        let kind = match kind.to_ascii_uppercase().as_str() {
            "PRIMARY KEY" => ConstraintKind::PrimaryKey,
            "FOREIGN KEY" => ConstraintKind::ForeignKey,
            "UNIQUE" => ConstraintKind::Unique,
            _ => continue,
        };
        owners.insert((schema.to_ascii_uppercase(), name.to_ascii_uppercase()), (schema.clone(), table.clone()));
        pending.push((schema, table, name, kind));
    }

    let mut referenced: HashMap<(String, String), (String, String)> = HashMap::new();
    if pending.iter().any(|p| p.3 == ConstraintKind::ForeignKey) {
        match fetch(adapter, REFERENTIAL_CONSTRAINTS_SQL) {
            Ok(rc) => {
                let rc_cells = Cells::new(&rc);
                for r in 0..rc_cells.len() {
                    let (Some(s), Some(n), Some(us), Some(un)) = (
                        rc_cells.text(r, "CONSTRAINT_SCHEMA"),
                        rc_cells.text(r, "CONSTRAINT_NAME"),
                        rc_cells.text(r, "UNIQUE_CONSTRAINT_SCHEMA"),
                        rc_cells.text(r, "UNIQUE_CONSTRAINT_NAME"),
                    ) else {
                        continue;
                    };
                    referenced.insert((s.to_ascii_uppercase(), n.to_ascii_uppercase()), (us, un));
                }
            }
            Err(e) => warn!(target: "catalog", "foreign key targets unavailable: {}", e),
        }
    }

    for (schema, table, name, kind) in pending {
        let references = if kind == ConstraintKind::ForeignKey {
            referenced.get(&(schema.to_ascii_uppercase(), name.to_ascii_uppercase())).and_then(|(us, un)| {
                let (ref_schema, ref_table) = owners.get(&(us.to_ascii_uppercase(), un.to_ascii_uppercase()))?;
                Some(ForeignRef {
                    schema: mapping.client_schema(ref_schema),
                    table: ref_table.to_lowercase(),
                    columns: columns_of(us, un),
                })
            })
        } else {
            None
        };
        snap.constraints.push(ConstraintInfo {
            schema: mapping.client_schema(&schema),
            table: table.to_lowercase(),
            name: name.to_lowercase(),
            kind,
            columns: columns_of(&schema, &name),
            references,
        });
    }
    Ok(())
}

/// Indexes backing primary/unique constraints, plus whatever the backend lists itself.
fn load_indexes(adapter: &BackendAdapter, mapping: &SchemaMapping, snap: &mut CatalogSnapshot) {
    let mut indexes: Vec<IndexInfo> = snap
        .constraints
        .iter()
        .filter(|c| c.kind != ConstraintKind::ForeignKey)
        .map(|c| IndexInfo {
            schema: c.schema.clone(),
            table: c.table.clone(),
            name: if c.kind == ConstraintKind::PrimaryKey { format!("{}_pkey", c.table) } else { c.name.clone() },
            columns: c.columns.clone(),
            unique: true,
            primary: c.kind == ConstraintKind::PrimaryKey,
        })
        .collect();

    match fetch(adapter, INDEXES_SQL) {
        Ok(rs) => {
            let cells = Cells::new(&rs);
            let mut listed: Vec<(IndexInfo, Vec<(i32, String)>)> = Vec::new();
            for r in 0..cells.len() {
                let (Some(schema), Some(table), Some(name), Some(col)) = (
                    cells.text(r, "TABLE_SCHEMA"),
                    cells.text(r, "TABLE_NAME"),
                    cells.text(r, "INDEX_NAME"),
                    cells.text(r, "COLUMN_NAME"),
                ) else {
                    continue;
                };
                if mapping.is_system(&schema) || cells.flag(r, "PRIMARY_KEY") { continue; }
                let schema = mapping.client_schema(&schema);
                let (table, name) = (table.to_lowercase(), name.to_lowercase());
                let ord = cells.int(r, "ORDINAL_POSITION").unwrap_or(0);
                match listed.iter_mut().find(|(i, _)| i.schema == schema && i.table == table && i.name == name) {
                    Some((_, cols)) => cols.push((ord, col.to_lowercase())),
                    None => listed.push((
                        IndexInfo { schema, table, name, columns: Vec::new(), unique: !cells.flag(r, "NON_UNIQUE"), primary: false },
                        vec![(ord, col.to_lowercase())],
                    )),
                }
            }
            for (mut idx, mut cols) in listed {
                if indexes.iter().any(|i| i.schema == idx.schema && i.table == idx.table && i.name == idx.name) { continue; }
                cols.sort_by_key(|(o, _)| *o);
                idx.columns = cols.into_iter().map(|(_, c)| c).collect();
                indexes.push(idx);
            }
        }
        Err(e) => debug!(target: "catalog", "backend index listing unavailable: {}", e),
    }
    snap.indexes = indexes;
}
