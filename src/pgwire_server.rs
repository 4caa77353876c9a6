//! Postgres wire-protocol front end.
//!
//! Each accepted connection runs `session::run_session` on its own task. Everything the
//! sessions share (translator, vector optimizer, catalog, backend adapter, auth and the
//! cancel-key registry) lives on one `Gateway`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::backend::BackendAdapter;
use crate::config::GatewayConfig;
use crate::system_catalog::CatalogSynthesizer;
use crate::translate::{TranslationRules, Translator};
use crate::vector_optimizer::VectorQueryOptimizer;

pub mod cancel;
pub mod codec;
pub mod copy;
pub mod encodedecode;
mod exec;
mod extended;
pub mod oids;
pub mod security;
mod send;
pub mod session;
mod simple;
mod structs;

use cancel::CancelRegistry;
use copy::{BulkLoader, InsertBulkLoader};
use security::Authenticator;

static CONN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub struct Gateway {
    pub config: GatewayConfig,
    pub translator: Translator,
    pub optimizer: VectorQueryOptimizer,
    pub catalog: CatalogSynthesizer,
    pub adapter: Arc<BackendAdapter>,
    pub authenticator: Arc<dyn Authenticator>,
    pub loader: Arc<dyn BulkLoader>,
    pub cancels: CancelRegistry,
}

impl Gateway {
    pub fn new(config: GatewayConfig, adapter: Arc<BackendAdapter>, authenticator: Arc<dyn Authenticator>) -> Self {
        let translator = Translator::new(Arc::new(TranslationRules::new(&config.default_schema)));
        let optimizer = VectorQueryOptimizer::new(config.max_literal_bytes, config.vector_budget_ms);
        let catalog = CatalogSynthesizer::new(adapter.clone(), &config.default_schema);
        let loader: Arc<dyn BulkLoader> = Arc::new(InsertBulkLoader::new(adapter.clone(), translator.clone()));
        Gateway {
            config,
            translator,
            optimizer,
            catalog,
            adapter,
            authenticator,
            loader,
            cancels: CancelRegistry::default(),
        }
    }

    /// Replace the COPY handler.
    pub fn with_loader(mut self, loader: Arc<dyn BulkLoader>) -> Self {
        self.loader = loader;
        self
    }
}

/// Bind `config.bind` and serve until the listener fails.
pub async fn start_pgwire(gw: Arc<Gateway>) -> Result<()> {
    let addr: SocketAddr = gw.config.bind.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(target: "pgwire", "pgwire listening on {}", addr);
    serve(listener, gw).await
}

/// Accept loop over an already-bound listener.
pub async fn serve(listener: TcpListener, gw: Arc<Gateway>) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        if let Err(e) = socket.set_nodelay(true) {
            debug!(target: "pgwire", "set_nodelay failed for {}: {}", peer, e);
        }
        let gw = gw.clone();
        let conn_id = CONN_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(e) = session::run_session(socket, gw, conn_id, &peer.to_string()).await {
                error!(target: "pgwire", "conn_id={} peer={} error: {}", conn_id, peer, e);
            }
        });
    }
}

#[cfg(test)]
mod tests;
