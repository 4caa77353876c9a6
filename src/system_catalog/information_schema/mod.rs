pub mod columns;
pub mod schemata;
pub mod table_constraints;
pub mod tables;
pub mod views;

use crate::system_catalog::registry::CatalogRegistry;

pub fn register_defaults(reg: &mut CatalogRegistry) {
    reg.register(Box::new(tables::ITables));
    reg.register(Box::new(columns::IColumns));
    reg.register(Box::new(schemata::ISchemata));
    reg.register(Box::new(views::IViews));
    reg.register(Box::new(table_constraints::ITableConstraints));
}
