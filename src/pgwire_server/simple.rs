//! Simple Query: one message, possibly several `;`-separated statements, one
//! ReadyForQuery at the end.

use anyhow::Result;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::error::GatewayResult;
use crate::pgwire_server::codec::BackendMessage;
use crate::pgwire_server::session::Session;
use crate::pgwire_server::structs::TxState;
use crate::translate::{classify_statement, split_statements, StatementKind};

impl<W: AsyncWrite + Unpin + Send> Session<W> {
    pub(crate) async fn simple_query(&mut self, sql: &str) -> Result<bool> {
        debug!(target: "pgwire", "conn_id={} simple query: {}", self.conn_id, sql);
        // a simple query destroys the unnamed statement and portal
        self.state.statements.remove("");
        self.state.portals.remove("");

        let statements = match split_statements(sql) {
            Ok(s) => s,
            Err(e) => {
                self.note_failure();
                self.out.error(&e);
                return self.finish_simple().await;
            }
        };
        if statements.is_empty() {
            self.out.send(&BackendMessage::EmptyQueryResponse);
            return self.finish_simple().await;
        }

        let kinds: Vec<StatementKind> = statements.iter().map(|s| classify_statement(s)).collect();
        let wants_implicit = statements.len() > 1
            && self.state.tx == TxState::Idle
            && kinds.iter().any(StatementKind::writes)
            && !kinds.iter().any(|k| k.is_transaction_control() || *k == StatementKind::Copy);
        let implicit = wants_implicit && self.gw.adapter.transactional();
        if implicit {
            self.implicit_tx("START TRANSACTION").await;
        }

        let mut failed = false;
        let mut applied = 0usize;
        for (stmt, kind) in statements.iter().zip(kinds) {
            let writes = kind.writes();
            let outcome = if kind == StatementKind::Copy { self.copy(stmt).await } else { self.simple_statement(stmt).await };
            if let Err(e) = outcome {
                if e.is_fatal() {
                    warn!(target: "pgwire", "conn_id={} fatal: {}", self.conn_id, e);
                    self.out.error(&e);
                    self.out.flush().await?;
                    return Ok(false);
                }
                self.note_failure();
                self.out.error(&e);
                failed = true;
                break;
            }
            if writes { applied += 1; }
        }
        if failed && wants_implicit && !implicit && applied > 0 {
            warn!(target: "pgwire", "conn_id={} batch failed after {} committed write(s); backend is not transactional", self.conn_id, applied);
            self.out.notice(format!("{} earlier statement(s) in this query were already committed by the backend", applied));
        }
        if implicit {
            self.implicit_tx(if failed { "ROLLBACK" } else { "COMMIT" }).await;
        }
        self.finish_simple().await
    }

    async fn finish_simple(&mut self) -> Result<bool> {
        self.out.ready(self.state.tx.status_byte());
        self.out.flush().await?;
        Ok(true)
    }

    async fn implicit_tx(&mut self, verb: &str) {
        self.arm_cancel();
        if let Err(e) = self.gw.adapter.execute(verb.to_string(), Vec::new(), &self.cancel).await {
            warn!(target: "pgwire", "conn_id={} implicit {} failed: {}", self.conn_id, verb, e);
        }
    }

    async fn simple_statement(&mut self, stmt: &str) -> GatewayResult<()> {
        let tr = self.gw.translator.translate(stmt, &[])?;
        let done = self.run(stmt, &tr).await?;
        if let Some(notice) = &done.notice {
            self.out.notice(notice.clone());
        }
        if tr.kind == StatementKind::Empty {
            self.out.send(&BackendMessage::EmptyQueryResponse);
            return Ok(());
        }
        let sent = done.rows.rows.len();
        if done.rows.returns_rows() {
            self.out.row_description(&done.rows.columns, &[]);
            self.out.data_rows(&done.rows.rows, &done.rows.columns, &[]).await?;
        }
        self.out.send(&BackendMessage::CommandComplete(done.command_tag(&tr.kind, sent)));
        Ok(())
    }
}
