//! Extended query protocol: Parse / Bind / Describe / Execute / Close.
//!
//! Errors are returned to the dispatcher, which reports them and discards input up
//! to the next Sync. Execute on a portal that was never bound is fatal.

use tokio::io::AsyncWrite;
use tracing::debug;

use crate::backend::ColumnMeta;
use crate::error::{GatewayError, GatewayResult};
use crate::pgwire_server::codec::BackendMessage;
use crate::pgwire_server::encodedecode::{decode_param, format_for};
use crate::pgwire_server::oids::described_param_oid;
use crate::pgwire_server::session::Session;
use crate::pgwire_server::structs::{Portal, PreparedStatement, TxState};
use crate::system_catalog::types;
use crate::translate::{StatementKind, TranslationResult};

/// Per-client-parameter OIDs: the Parse declaration wins, then `$n::type` casts.
fn client_param_types(tr: &TranslationResult, declared: &[i32]) -> Vec<i32> {
    (0..tr.client_param_count)
        .map(|i| {
            let d = declared.get(i).copied().unwrap_or(0);
            if d != 0 {
                return d;
            }
            tr.param_order
                .iter()
                .zip(&tr.param_hints)
                .find(|(idx, h)| **idx == i && h.type_oid != 0)
                .map(|(_, h)| h.type_oid)
                .unwrap_or(0)
        })
        .collect()
}

fn exits_transaction(kind: &StatementKind) -> bool {
    matches!(kind, StatementKind::Rollback | StatementKind::Commit | StatementKind::RollbackToSavepoint)
}

impl<W: AsyncWrite + Unpin + Send> Session<W> {
    pub(crate) async fn parse(&mut self, name: String, sql: String, declared: Vec<i32>) -> GatewayResult<()> {
        let tr = self.gw.translator.translate(&sql, &declared)?;
        if self.state.tx == TxState::Failed && !exits_transaction(&tr.kind) {
            return Err(GatewayError::FailedTransaction);
        }
        let param_types = client_param_types(&tr, &declared);
        debug!(target: "pgwire", "conn_id={} parse name='{}' kind={:?} params={:?} catalog={}", self.conn_id, name, tr.kind, param_types, tr.catalog);
        self.state.statements.insert(name, PreparedStatement { sql, translation: tr, param_types, columns: None });
        self.out.send(&BackendMessage::ParseComplete);
        Ok(())
    }

    pub(crate) fn bind(
        &mut self,
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    ) -> GatewayResult<()> {
        let stmt = self.state.statements.get(&statement).ok_or_else(|| GatewayError::statement_not_found(&statement))?;
        if self.state.tx == TxState::Failed && !exits_transaction(&stmt.translation.kind) {
            return Err(GatewayError::FailedTransaction);
        }
        let expected = stmt.translation.client_param_count;
        if params.len() != expected {
            return Err(GatewayError::translation(format!(
                "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                params.len(),
                statement,
                expected
            )));
        }
        if param_formats.len() > 1 && param_formats.len() != params.len() {
            return Err(GatewayError::translation(format!(
                "bind message has {} parameter formats but {} parameters",
                param_formats.len(),
                params.len()
            )));
        }
        let mut values = Vec::with_capacity(params.len());
        for (i, raw) in params.iter().enumerate() {
            let oid = stmt.param_types.get(i).copied().unwrap_or(0);
            values.push(decode_param(i, raw.as_deref(), format_for(&param_formats, i), oid)?);
        }
        let bound = stmt.translation.bind(&values)?;
        debug!(target: "pgwire", "conn_id={} bind portal='{}' statement='{}' params={}", self.conn_id, portal, statement, values.len());
        let p = Portal {
            statement,
            bound,
            result_formats,
            columns: stmt.columns.clone(),
            result: None,
            sent: 0,
            complete: false,
        };
        self.state.portals.insert(portal, p);
        self.out.send(&BackendMessage::BindComplete);
        Ok(())
    }

    pub(crate) async fn describe(&mut self, kind: u8, name: &str) -> GatewayResult<()> {
        if kind == b'S' {
            let stmt = self.state.statements.get(name).ok_or_else(|| GatewayError::statement_not_found(name))?;
            let oids = stmt.param_types.iter().map(|o| described_param_oid(*o)).collect();
            self.out.send(&BackendMessage::ParameterDescription(oids));
            let columns = self.statement_columns(name).await;
            match columns {
                Some(cols) if !cols.is_empty() => self.out.row_description(&cols, &[]),
                _ => self.out.send(&BackendMessage::NoData),
            }
            return Ok(());
        }

        let portal = self.state.portals.get(name).ok_or_else(|| GatewayError::portal_not_found(name))?;
        let produces_rows = portal.bound.catalog || portal.bound.kind.returns_rows();
        if !produces_rows {
            self.out.send(&BackendMessage::NoData);
            return Ok(());
        }
        // executed now so the description matches what Execute will send
        self.ensure_executed(name).await?;
        let portal = self.state.portals.get(name).ok_or_else(|| GatewayError::portal_not_found(name))?;
        let columns = portal_columns(portal);
        if columns.is_empty() {
            self.out.send(&BackendMessage::NoData);
        } else {
            self.out.row_description(&columns, &portal.result_formats);
        }
        Ok(())
    }

    /// Result shape of a prepared statement, cached on it once known.
    async fn statement_columns(&mut self, name: &str) -> Option<Vec<ColumnMeta>> {
        let stmt = self.state.statements.get(name)?;
        if let Some(cols) = &stmt.columns {
            return Some(cols.clone());
        }
        let tr = stmt.translation.clone();
        let sql = stmt.sql.clone();
        let columns = if tr.catalog {
            self.gw.catalog.describe(&sql, &self.info)
        } else {
            match tr.kind {
                StatementKind::Show => show_columns(&sql),
                StatementKind::Select => self.backend_columns(&tr).await,
                _ => None,
            }
        };
        if let (Some(cols), Some(stmt)) = (&columns, self.state.statements.get_mut(name)) {
            stmt.columns = Some(cols.clone());
        }
        columns
    }

    /// Ask the backend; with no parameters to fill in, running the query is the fallback.
    async fn backend_columns(&mut self, tr: &TranslationResult) -> Option<Vec<ColumnMeta>> {
        match self.gw.adapter.describe(tr.sql.clone(), tr.param_order.len()).await {
            Ok(Some(cols)) => return Some(cols),
            Ok(None) => {}
            Err(e) => debug!(target: "pgwire", "conn_id={} backend describe failed: {}", self.conn_id, e),
        }
        if tr.client_param_count > 0 || self.state.tx == TxState::Failed {
            return None;
        }
        let optimized = self.gw.optimizer.optimize(tr);
        self.arm_cancel();
        match self.gw.adapter.execute(optimized.sql, optimized.params, &self.cancel).await {
            Ok(rs) if rs.returns_rows() => Some(rs.columns),
            Ok(_) => None,
            Err(e) => {
                debug!(target: "pgwire", "conn_id={} describe probe failed: {}", self.conn_id, e);
                None
            }
        }
    }

    async fn ensure_executed(&mut self, name: &str) -> GatewayResult<()> {
        let portal = self.state.portals.get(name).ok_or_else(|| GatewayError::portal_not_found(name))?;
        if portal.result.is_some() {
            return Ok(());
        }
        let bound = portal.bound.clone();
        let client_sql = self.state.statements.get(&portal.statement).map(|s| s.sql.clone()).unwrap_or_else(|| bound.sql.clone());
        let executed = self.run(&client_sql, &bound).await?;
        if let Some(p) = self.state.portals.get_mut(name) {
            p.result = Some(executed);
        }
        Ok(())
    }

    pub(crate) async fn execute(&mut self, name: &str, max_rows: i32) -> GatewayResult<()> {
        if !self.state.portals.contains_key(name) {
            return Err(GatewayError::protocol(format!("Execute for portal \"{}\" which was never bound", name)));
        }
        if let Some(sql) = self.copy_statement(name) {
            return self.copy(&sql).await;
        }
        self.ensure_executed(name).await?;
        let Some(portal) = self.state.portals.get_mut(name) else { return Err(GatewayError::portal_not_found(name)) };
        let Some(done) = portal.result.as_mut() else { return Err(GatewayError::portal_not_found(name)) };
        if let Some(notice) = done.notice.take() {
            self.out.notice(notice);
        }
        if portal.bound.kind == StatementKind::Empty {
            self.out.send(&BackendMessage::EmptyQueryResponse);
            return Ok(());
        }
        if portal.complete {
            // drained by an earlier Execute
            self.out.send(&BackendMessage::CommandComplete(portal.bound.kind.command_tag(0)));
            return Ok(());
        }

        let total = done.rows.rows.len();
        let start = portal.sent;
        let end = if max_rows > 0 { (start + max_rows as usize).min(total) } else { total };
        if done.rows.returns_rows() {
            let columns = portal_columns_of(portal.columns.as_deref(), &done.rows.columns);
            self.out.data_rows(&done.rows.rows[start..end], &columns, &portal.result_formats).await?;
        }
        portal.sent = end;
        if done.rows.returns_rows() && end < total {
            debug!(target: "pgwire", "conn_id={} portal '{}' suspended at {}/{}", self.conn_id, name, end, total);
            self.out.send(&BackendMessage::PortalSuspended);
            return Ok(());
        }
        portal.complete = true;
        let tag = done.command_tag(&portal.bound.kind, end - start);
        self.out.send(&BackendMessage::CommandComplete(tag));
        Ok(())
    }

    /// Client text of a COPY portal; COPY runs its own sub-protocol instead of producing a result.
    fn copy_statement(&self, portal: &str) -> Option<String> {
        let p = self.state.portals.get(portal)?;
        if p.bound.kind != StatementKind::Copy {
            return None;
        }
        Some(self.state.statements.get(&p.statement).map(|s| s.sql.clone()).unwrap_or_else(|| p.bound.sql.clone()))
    }

    pub(crate) fn close(&mut self, kind: u8, name: &str) {
        let existed = if kind == b'S' {
            self.state.statements.remove(name).is_some()
        } else {
            self.state.portals.remove(name).is_some()
        };
        debug!(target: "pgwire", "conn_id={} close {} '{}' existed={}", self.conn_id, kind as char, name, existed);
        self.out.send(&BackendMessage::CloseComplete);
    }
}

fn show_columns(sql: &str) -> Option<Vec<ColumnMeta>> {
    let label = sql.split_whitespace().nth(1)?.trim_end_matches(';').to_string();
    Some(vec![ColumnMeta::new(label, types::TEXT)])
}

/// Described column types when they fit the result, else the result's own.
fn portal_columns_of(described: Option<&[ColumnMeta]>, actual: &[ColumnMeta]) -> Vec<ColumnMeta> {
    match described {
        Some(d) if d.len() == actual.len() => d.to_vec(),
        _ => actual.to_vec(),
    }
}

fn portal_columns(portal: &Portal) -> Vec<ColumnMeta> {
    match &portal.result {
        Some(done) => portal_columns_of(portal.columns.as_deref(), &done.rows.columns),
        None => portal.columns.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::Translator;

    #[test]
    fn parse_declarations_override_cast_hints() {
        let tr = Translator::default().translate("SELECT * FROM t WHERE a = $1::int4 AND b = $2", &[]).unwrap();
        assert_eq!(client_param_types(&tr, &[]), vec![types::INT4, 0]);
        assert_eq!(client_param_types(&tr, &[types::INT8, types::TEXT]), vec![types::INT8, types::TEXT]);
    }

    #[test]
    fn described_types_win_when_shapes_agree() {
        let described = vec![ColumnMeta::new("n", types::INT8)];
        let actual = vec![ColumnMeta::new("n", types::INT4)];
        assert_eq!(portal_columns_of(Some(&described), &actual), described);
        assert_eq!(portal_columns_of(Some(&[]), &actual), actual);
        assert_eq!(portal_columns_of(None, &actual), actual);
    }
}
