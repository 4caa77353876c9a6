//! PostgreSQL system catalog emulation.
//!
//! Catalog tables are synthesized per query from a metadata snapshot read off
//! the backend's INFORMATION_SCHEMA, then filtered/sorted with polars.

pub mod eval;
pub mod functions;
pub mod information_schema;
pub mod metadata;
pub mod oid;
pub mod pg_catalog;
pub mod query;
pub mod registry;
pub mod types;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{BackendAdapter, ColumnMeta, RowSet, TypedValue};
use crate::error::{GatewayError, GatewayResult};

pub use functions::SessionInfo;
use metadata::{CatalogSnapshot, MetadataNeeds, SchemaMapping};
use oid::OidGenerator;
use query::CatalogQuery;
use registry::{CatalogRegistry, SystemTable};

/// Result of a catalog query. A failed catalog query still answers (with no
/// rows) and carries the reason as a notice for the client.
#[derive(Debug, Clone)]
pub struct CatalogAnswer {
    pub rows: RowSet,
    pub notice: Option<String>,
}

pub struct CatalogSynthesizer {
    registry: CatalogRegistry,
    oids: Arc<OidGenerator>,
    adapter: Arc<BackendAdapter>,
    mapping: SchemaMapping,
}

impl CatalogSynthesizer {
    pub fn new(adapter: Arc<BackendAdapter>, default_schema: &str) -> Self {
        CatalogSynthesizer {
            registry: CatalogRegistry::with_defaults(),
            oids: Arc::new(OidGenerator::default()),
            adapter,
            mapping: SchemaMapping { default_backend_schema: default_schema.to_string() },
        }
    }

    pub fn oids(&self) -> &Arc<OidGenerator> { &self.oids }

    pub fn registry(&self) -> &CatalogRegistry { &self.registry }

    fn table_for(&self, q: &CatalogQuery) -> GatewayResult<Option<Arc<dyn SystemTable>>> {
        match &q.table {
            None => Ok(None),
            Some(name) => self
                .registry
                .lookup(name)
                .map(Some)
                .ok_or_else(|| GatewayError::catalog(format!("catalog relation \"{}\" is not emulated", name))),
        }
    }

    /// Answer a catalog query. Never fails: problems become a notice plus an empty result.
    pub async fn answer(&self, sql: &str, params: &[TypedValue], session: &SessionInfo) -> CatalogAnswer {
        match self.try_answer(sql, params, session).await {
            Ok(rows) => CatalogAnswer { rows, notice: None },
            Err(e) => {
                warn!(target: "catalog", error = %e, sql = %sql, "catalog query answered empty");
                let columns = self.describe(sql, session).unwrap_or_default();
                CatalogAnswer { rows: RowSet::with_columns(columns), notice: Some(e.to_string()) }
            }
        }
    }

    async fn try_answer(&self, sql: &str, params: &[TypedValue], session: &SessionInfo) -> GatewayResult<RowSet> {
        let q = CatalogQuery::parse(sql, params)?;
        let table = self.table_for(&q)?;
        let mut needs = table.as_ref().map(|t| t.needs()).unwrap_or_default();
        if q.uses_regclass() {
            needs = needs.union(MetadataNeeds { tables: true, indexes: true, ..Default::default() });
        }
        debug!(target: "catalog", table = ?q.table, ?needs, "synthesizing");

        let mut snap = if needs.any() {
            let adapter = self.adapter.clone();
            let mapping = self.mapping.clone();
            let oids = self.oids.clone();
            tokio::task::spawn_blocking(move || metadata::load_snapshot(&adapter, needs, &mapping, oids))
                .await
                .map_err(|e| GatewayError::catalog(format!("metadata task failed: {}", e)))??
        } else {
            CatalogSnapshot::empty(self.oids.clone())
        };
        snap.database = session.database.clone();
        snap.user = session.user.clone();
        eval::evaluate(&q, table.as_deref(), &snap, session)
    }

    /// Result columns of a catalog query without touching the backend.
    pub fn describe(&self, sql: &str, session: &SessionInfo) -> Option<Vec<ColumnMeta>> {
        let q = CatalogQuery::parse(sql, &[]).ok()?;
        let table = self.table_for(&q).ok()?;
        let mut snap = CatalogSnapshot::empty(self.oids.clone());
        snap.database = session.database.clone();
        // regclass literals would fail against the empty snapshot; only the shape matters here
        let q = CatalogQuery { filter: None, limit: Some(0), ..q };
        eval::evaluate(&q, table.as_deref(), &snap, session).ok().map(|rs| rs.columns)
    }
}

#[cfg(test)]
mod tests;
