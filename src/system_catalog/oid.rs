//! Deterministic synthetic OIDs.
//!
//! An OID is a pure function of the object's identity: SHA-256 over the canonical
//! `namespace:kind:name` string, folded into the range postgres reserves for user
//! objects. The cache only avoids rehashing; clearing it never changes an answer.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

pub const FIRST_NORMAL_OID: u32 = 16384;
pub const PG_CATALOG_NAMESPACE_OID: u32 = 11;
pub const PUBLIC_NAMESPACE_OID: u32 = 2200;
pub const INFORMATION_SCHEMA_NAMESPACE_OID: u32 = 11323;
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Namespace,
    Table,
    Column,
    Constraint,
    Index,
    Type,
    Default,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Namespace => "namespace",
            ObjectKind::Table => "table",
            ObjectKind::Column => "column",
            ObjectKind::Constraint => "constraint",
            ObjectKind::Index => "index",
            ObjectKind::Type => "type",
            ObjectKind::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogObjectIdentity {
    pub namespace: String,
    pub kind: ObjectKind,
    /// Qualified within the namespace, e.g. `orders.customer_id` for a column.
    pub name: String,
}

impl CatalogObjectIdentity {
    pub fn new<N: Into<String>, S: Into<String>>(namespace: N, kind: ObjectKind, name: S) -> Self {
        CatalogObjectIdentity { namespace: namespace.into().to_lowercase(), kind, name: name.into().to_lowercase() }
    }

    pub fn namespace(name: &str) -> Self { CatalogObjectIdentity::new(name, ObjectKind::Namespace, name) }

    pub fn canonical(&self) -> String { format!("{}:{}:{}", self.namespace, self.kind.as_str(), self.name) }
}

impl fmt::Display for CatalogObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.canonical()) }
}

/// Fixed OIDs for the namespaces every client expects to find.
pub fn reserved_oid(identity: &CatalogObjectIdentity) -> Option<u32> {
    if identity.kind != ObjectKind::Namespace {
        return None;
    }
    match identity.name.as_str() {
        "pg_catalog" => Some(PG_CATALOG_NAMESPACE_OID),
        "public" => Some(PUBLIC_NAMESPACE_OID),
        "information_schema" => Some(INFORMATION_SCHEMA_NAMESPACE_OID),
        _ => None,
    }
}

pub fn hash_oid(identity: &CatalogObjectIdentity) -> u32 {
    let digest = Sha256::digest(identity.canonical().as_bytes());
    let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64;
    let span = (u32::MAX as u64 + 1) - FIRST_NORMAL_OID as u64;
    (FIRST_NORMAL_OID as u64 + raw % span) as u32
}

#[derive(Debug)]
pub struct OidGenerator {
    cache: Mutex<HashMap<CatalogObjectIdentity, u32>>,
    capacity: usize,
}

impl Default for OidGenerator {
    fn default() -> Self { OidGenerator::with_capacity(DEFAULT_CACHE_CAPACITY) }
}

impl OidGenerator {
    pub fn with_capacity(capacity: usize) -> Self {
        OidGenerator { cache: Mutex::new(HashMap::with_capacity(capacity.min(1024))), capacity: capacity.max(1) }
    }

    pub fn identifier_for(&self, identity: &CatalogObjectIdentity) -> u32 {
        if let Some(oid) = reserved_oid(identity) {
            return oid;
        }
        let mut cache = self.cache.lock();
        if let Some(oid) = cache.get(identity) {
            return *oid;
        }
        let oid = hash_oid(identity);
        if cache.len() >= self.capacity {
            cache.clear();
        }
        cache.insert(identity.clone(), oid);
        oid
    }

    pub fn namespace_oid(&self, namespace: &str) -> u32 { self.identifier_for(&CatalogObjectIdentity::namespace(namespace)) }

    pub fn table_oid(&self, namespace: &str, table: &str) -> u32 {
        self.identifier_for(&CatalogObjectIdentity::new(namespace, ObjectKind::Table, table))
    }

    pub fn cached(&self) -> usize { self.cache.lock().len() }
}
