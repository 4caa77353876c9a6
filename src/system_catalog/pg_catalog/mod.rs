//! `pg_catalog` tables rebuilt from a metadata snapshot on every query.

use crate::system_catalog::registry::{col, CatalogRegistry, ColType, ColumnDef, NoOpSystemTable};

pub mod pg_attrdef;
pub mod pg_attribute;
pub mod pg_class;
pub mod pg_constraint;
pub mod pg_database;
pub mod pg_index;
pub mod pg_namespace;
pub mod pg_roles;
pub mod pg_tables;
pub mod pg_type;
pub mod pg_views;

const COLS_PG_SETTINGS: &[ColumnDef] = &[
    col("name", ColType::Text),
    col("setting", ColType::Text),
    col("unit", ColType::Text),
    col("category", ColType::Text),
    col("short_desc", ColType::Text),
    col("context", ColType::Text),
    col("vartype", ColType::Text),
    col("source", ColType::Text),
    col("boot_val", ColType::Text),
    col("reset_val", ColType::Text),
];
const COLS_PG_PROC: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("proname", ColType::Name),
    col("pronamespace", ColType::Oid),
    col("proowner", ColType::Oid),
    col("prokind", ColType::Char),
    col("prorettype", ColType::Oid),
    col("proargtypes", ColType::Text),
    col("prosrc", ColType::Text),
];
const COLS_PG_DESCRIPTION: &[ColumnDef] = &[
    col("objoid", ColType::Oid),
    col("classoid", ColType::Oid),
    col("objsubid", ColType::Integer),
    col("description", ColType::Text),
];
const COLS_PG_AM: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("amname", ColType::Name),
    col("amhandler", ColType::Oid),
    col("amtype", ColType::Char),
];
const COLS_PG_EXTENSION: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("extname", ColType::Name),
    col("extowner", ColType::Oid),
    col("extnamespace", ColType::Oid),
    col("extversion", ColType::Text),
];
const COLS_PG_ENUM: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("enumtypid", ColType::Oid),
    col("enumlabel", ColType::Name),
];
const COLS_PG_INHERITS: &[ColumnDef] = &[
    col("inhrelid", ColType::Oid),
    col("inhparent", ColType::Oid),
    col("inhseqno", ColType::Integer),
];
const COLS_PG_TRIGGER: &[ColumnDef] = &[
    col("oid", ColType::Oid),
    col("tgrelid", ColType::Oid),
    col("tgname", ColType::Name),
    col("tgenabled", ColType::Char),
];

pub fn register_defaults(reg: &mut CatalogRegistry) {
    reg.register(Box::new(pg_namespace::PgNamespace));
    reg.register(Box::new(pg_class::PgClass));
    reg.register(Box::new(pg_attribute::PgAttribute));
    reg.register(Box::new(pg_type::PgType));
    reg.register(Box::new(pg_constraint::PgConstraint));
    reg.register(Box::new(pg_index::PgIndex));
    reg.register(Box::new(pg_attrdef::PgAttrdef));
    reg.register(Box::new(pg_database::PgDatabase));
    reg.register(Box::new(pg_roles::PgRoles));
    reg.register(Box::new(pg_tables::PgTables));
    reg.register(Box::new(pg_views::PgViews));

    let empty: &[(&'static str, &'static [ColumnDef])] = &[
        ("pg_settings", COLS_PG_SETTINGS),
        ("pg_proc", COLS_PG_PROC),
        ("pg_description", COLS_PG_DESCRIPTION),
        ("pg_am", COLS_PG_AM),
        ("pg_extension", COLS_PG_EXTENSION),
        ("pg_enum", COLS_PG_ENUM),
        ("pg_inherits", COLS_PG_INHERITS),
        ("pg_trigger", COLS_PG_TRIGGER),
    ];
    for (name, cols) in empty {
        reg.register(Box::new(NoOpSystemTable::new("pg_catalog", name, cols)));
    }
}
