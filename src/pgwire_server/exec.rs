//! Running one translated statement: failed-transaction gating, session-local commands,
//! catalog routing and the backend call. Shared by the simple and extended paths.

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::backend::{ColumnMeta, RowSet, TypedValue};
use crate::error::{GatewayError, GatewayResult};
use crate::pgwire_server::codec::BackendMessage;
use crate::pgwire_server::session::{Session, REPORTED_PARAMETERS};
use crate::pgwire_server::structs::{Executed, TxState};
use crate::system_catalog::types;
use crate::translate::{StatementKind, TranslationResult};

static SET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SET\s+(?:SESSION\s+|LOCAL\s+)?(?:TIME\s+ZONE\s+(?P<tz>.+?)|(?P<name>[\w.]+)\s*(?:=|\s+TO\s+)\s*(?P<value>.+?))\s*;?\s*$")
        .unwrap()
});
static SHOW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^\s*SHOW\s+(?P<name>[\w.]+(?:\s+[\w.]+)*)\s*;?\s*$").unwrap());
static RESET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^\s*RESET\s+(?P<name>[\w.]+)\s*;?\s*$").unwrap());
static DEALLOCATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)^\s*DEALLOCATE\s+(?:PREPARE\s+)?(?P<name>"[^"]*"|[\w.]+)\s*;?\s*$"#).unwrap());

/// Setting exposing the optimizer's timing statistics as JSON.
pub const VECTOR_STATS_SETTING: &str = "wiregate.vector_stats";

fn unquote(v: &str) -> String {
    let v = v.trim();
    if v.len() >= 2 && ((v.starts_with('\'') && v.ends_with('\'')) || (v.starts_with('"') && v.ends_with('"'))) {
        v[1..v.len() - 1].replace("''", "'")
    } else {
        v.to_string()
    }
}

/// `'ISO, MDY'` stays one value; `a, 'b'` is a list.
fn setting_value(raw: &str) -> String {
    let t = raw.trim();
    let single = t.len() >= 2 && t.starts_with('\'') && t.ends_with('\'') && !t[1..t.len() - 1].contains("',");
    if single {
        return unquote(t);
    }
    t.split(',').map(unquote).collect::<Vec<_>>().join(", ")
}

/// The ParameterStatus spelling of a setting, when it is one clients track.
fn reported_name(lower: &str) -> Option<&'static str> {
    REPORTED_PARAMETERS.iter().copied().find(|n| n.eq_ignore_ascii_case(lower))
}

impl Executed {
    /// CommandComplete tag after `sent` rows went out.
    pub fn command_tag(&self, kind: &StatementKind, sent: usize) -> String {
        if let Some(tag) = &self.tag {
            return tag.clone();
        }
        let n = if self.rows.returns_rows() { sent as u64 } else { self.rows.rows_affected.unwrap_or(0) };
        kind.command_tag(n)
    }
}

impl<W: AsyncWrite + Unpin + Send> Session<W> {
    /// Execute a bound statement. `client_sql` is the text the client sent.
    pub(crate) async fn run(&mut self, client_sql: &str, tr: &TranslationResult) -> GatewayResult<Executed> {
        if self.state.tx == TxState::Failed {
            return self.run_in_failed(tr).await;
        }
        match &tr.kind {
            StatementKind::Set => return self.set_command(client_sql),
            StatementKind::Show => return self.show_command(client_sql),
            StatementKind::Reset => return self.reset_command(client_sql),
            StatementKind::Discard => {
                self.state.statements.clear();
                self.info.settings = self.defaults.clone();
                return Ok(Executed::command("DISCARD ALL"));
            }
            StatementKind::Deallocate => return self.deallocate(client_sql),
            StatementKind::Empty => return Ok(Executed::command("")),
            StatementKind::Copy => {
                return Err(GatewayError::unsupported("COPY cannot be described or run as a row-producing statement"));
            }
            _ => {}
        }

        if tr.catalog {
            let answer = self.gw.catalog.answer(&tr.sql, &tr.params, &self.info).await;
            return Ok(Executed { rows: answer.rows, tag: None, notice: answer.notice });
        }

        let transactional = self.gw.adapter.transactional();
        if tr.kind.is_transaction_control() && !transactional {
            return Ok(self.untracked_block_verb(&tr.kind));
        }

        let optimized = self.gw.optimizer.optimize(tr);
        self.arm_cancel();
        let rows = self.gw.adapter.execute(optimized.sql, optimized.params, &self.cancel).await?;
        if !transactional && self.state.tx == TxState::Active && tr.kind.writes() {
            self.state.committed_in_block += 1;
        }
        self.after_success(&tr.kind);
        Ok(Executed::rows(rows))
    }

    /// Transaction verbs for a backend that commits each statement on its own. The block
    /// is tracked for the client's sake only; rolling back cannot undo anything.
    fn untracked_block_verb(&mut self, kind: &StatementKind) -> Executed {
        let mut done = Executed::command(kind.command_tag(0));
        match kind {
            StatementKind::Begin if self.state.tx == TxState::Idle => {
                warn!(target: "pgwire", "conn_id={} BEGIN on a non-transactional backend; statements commit individually", self.conn_id);
                done.notice = Some("the backend commits each statement individually; this transaction block is not atomic".into());
            }
            StatementKind::Rollback | StatementKind::RollbackToSavepoint => done.notice = self.unrolled_notice(),
            _ => {}
        }
        self.after_success(kind);
        done
    }

    fn unrolled_notice(&self) -> Option<String> {
        let n = self.state.committed_in_block;
        if n == 0 {
            return None;
        }
        warn!(target: "pgwire", "conn_id={} ROLLBACK leaves {} committed write(s) in place", self.conn_id, n);
        Some(format!("ROLLBACK cannot undo {} statement(s) the backend already committed", n))
    }

    /// Only transaction exits get through an aborted transaction.
    async fn run_in_failed(&mut self, tr: &TranslationResult) -> GatewayResult<Executed> {
        match tr.kind {
            StatementKind::Rollback | StatementKind::Commit => {
                let mut done = Executed::command("ROLLBACK");
                if self.gw.adapter.transactional() {
                    self.arm_cancel();
                    if let Err(e) = self.gw.adapter.execute("ROLLBACK".into(), Vec::new(), &self.cancel).await {
                        warn!(target: "pgwire", "conn_id={} backend rollback after failure: {}", self.conn_id, e);
                    }
                } else {
                    done.notice = self.unrolled_notice();
                }
                self.state.tx = TxState::Idle;
                self.state.committed_in_block = 0;
                Ok(done)
            }
            StatementKind::RollbackToSavepoint => {
                let mut done = Executed::command("ROLLBACK");
                if self.gw.adapter.transactional() {
                    self.arm_cancel();
                    self.gw.adapter.execute(tr.sql.clone(), tr.params.clone(), &self.cancel).await?;
                } else {
                    done.notice = self.unrolled_notice();
                }
                self.state.tx = TxState::Active;
                Ok(done)
            }
            _ => Err(GatewayError::FailedTransaction),
        }
    }

    fn after_success(&mut self, kind: &StatementKind) {
        let before = self.state.tx;
        match kind {
            StatementKind::Begin => self.state.tx = TxState::Active,
            StatementKind::Commit | StatementKind::Rollback => self.state.tx = TxState::Idle,
            _ => {}
        }
        if self.state.tx == TxState::Idle {
            self.state.committed_in_block = 0;
        }
        if before != self.state.tx {
            debug!(target: "pgwire", "conn_id={} transaction {:?} -> {:?}", self.conn_id, before, self.state.tx);
        }
    }

    /// An error inside an open transaction block aborts it.
    pub(crate) fn note_failure(&mut self) {
        if self.state.tx == TxState::Active {
            debug!(target: "pgwire", "conn_id={} transaction aborted", self.conn_id);
            self.state.tx = TxState::Failed;
        }
    }

    fn set_command(&mut self, sql: &str) -> GatewayResult<Executed> {
        let Some(c) = SET_RE.captures(sql) else {
            // SET TRANSACTION / SET CONSTRAINTS and friends have no session state here
            debug!(target: "pgwire", "conn_id={} acknowledging unparsed SET: {}", self.conn_id, sql);
            return Ok(Executed::command("SET"));
        };
        let (name, raw) = match (c.name("tz"), c.name("name"), c.name("value")) {
            (Some(tz), _, _) => ("timezone".to_string(), tz.as_str()),
            (None, Some(n), Some(v)) => (n.as_str().to_ascii_lowercase(), v.as_str()),
            _ => return Ok(Executed::command("SET")),
        };
        let value = if raw.trim().eq_ignore_ascii_case("default") {
            self.defaults.get(&name).cloned().unwrap_or_default()
        } else {
            setting_value(raw)
        };
        self.apply_setting(&name, value);
        Ok(Executed::command("SET"))
    }

    fn apply_setting(&mut self, name: &str, value: String) {
        debug!(target: "pgwire", "conn_id={} set {}={}", self.conn_id, name, value);
        if let Some(reported) = reported_name(name) {
            self.out.send(&BackendMessage::ParameterStatus(reported.to_string(), value.clone()));
        }
        self.info.settings.insert(name.to_string(), value);
    }

    fn reset_command(&mut self, sql: &str) -> GatewayResult<Executed> {
        let Some(c) = RESET_RE.captures(sql) else { return Ok(Executed::command("RESET")) };
        let name = c["name"].to_ascii_lowercase();
        if name == "all" {
            let changed: Vec<(String, String)> = self
                .defaults
                .iter()
                .filter(|(k, v)| self.info.settings.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            self.info.settings = self.defaults.clone();
            for (k, v) in changed {
                if let Some(reported) = reported_name(&k) {
                    self.out.send(&BackendMessage::ParameterStatus(reported.to_string(), v));
                }
            }
        } else {
            match self.defaults.get(&name).cloned() {
                Some(v) => self.apply_setting(&name, v),
                None => {
                    self.info.settings.remove(&name);
                }
            }
        }
        Ok(Executed::command("RESET"))
    }

    fn show_command(&mut self, sql: &str) -> GatewayResult<Executed> {
        let Some(c) = SHOW_RE.captures(sql) else {
            return Err(GatewayError::translation(format!("syntax error in SHOW: {}", sql.trim())));
        };
        let name = c["name"].split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
        let text = |label: &str, v: String| Executed::rows(RowSet::single(label, types::TEXT, TypedValue::Text(v)));
        match name.as_str() {
            "all" => {
                let mut names: Vec<&String> = self.info.settings.keys().collect();
                names.sort();
                let mut rs = RowSet::with_columns(vec![ColumnMeta::new("name", types::TEXT), ColumnMeta::new("setting", types::TEXT)]);
                for n in names {
                    let v = self.info.settings.get(n).cloned().unwrap_or_default();
                    rs.rows.push(vec![TypedValue::Text(n.clone()), TypedValue::Text(v)]);
                }
                Ok(Executed::rows(rs))
            }
            VECTOR_STATS_SETTING => {
                let stats = serde_json::to_string(&self.gw.optimizer.stats())
                    .map_err(|e| GatewayError::Optimization(e.to_string()))?;
                Ok(text(VECTOR_STATS_SETTING, stats))
            }
            "transaction isolation level" => {
                let v = self.info.settings.get("transaction_isolation").cloned().unwrap_or_else(|| "read committed".into());
                Ok(text("transaction_isolation", v))
            }
            "time zone" => Ok(text("TimeZone", self.info.settings.get("timezone").cloned().unwrap_or_default())),
            other => {
                let label = reported_name(other).unwrap_or(other).to_string();
                Ok(text(&label, self.info.settings.get(other).cloned().unwrap_or_default()))
            }
        }
    }

    fn deallocate(&mut self, sql: &str) -> GatewayResult<Executed> {
        let Some(c) = DEALLOCATE_RE.captures(sql) else {
            return Err(GatewayError::translation(format!("syntax error in DEALLOCATE: {}", sql.trim())));
        };
        let raw = &c["name"];
        if raw.eq_ignore_ascii_case("all") {
            self.state.statements.clear();
            return Ok(Executed::command("DEALLOCATE ALL"));
        }
        let name = if raw.starts_with('"') { raw.trim_matches('"').to_string() } else { raw.to_ascii_lowercase() };
        match self.state.statements.remove(&name) {
            Some(_) => Ok(Executed::command("DEALLOCATE")),
            None => Err(GatewayError::statement_not_found(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_forms() {
        let c = SET_RE.captures("SET application_name = 'psql'").unwrap();
        assert_eq!(&c["name"], "application_name");
        assert_eq!(unquote(&c["value"]), "psql");
        let c = SET_RE.captures("set session DateStyle to ISO;").unwrap();
        assert_eq!(&c["name"], "DateStyle");
        assert_eq!(&c["value"], "ISO");
        let c = SET_RE.captures("SET TIME ZONE 'Europe/Oslo'").unwrap();
        assert_eq!(unquote(&c["tz"]), "Europe/Oslo");
        assert!(SET_RE.captures("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE").is_none());
    }

    #[test]
    fn setting_values() {
        assert_eq!(setting_value("'ISO, MDY'"), "ISO, MDY");
        assert_eq!(setting_value("app, 'public'"), "app, public");
        assert_eq!(setting_value("'it''s'"), "it's");
    }

    #[test]
    fn show_and_deallocate_forms() {
        assert_eq!(&SHOW_RE.captures("SHOW transaction isolation level").unwrap()["name"], "transaction isolation level");
        assert_eq!(&SHOW_RE.captures("show wiregate.vector_stats;").unwrap()["name"], "wiregate.vector_stats");
        assert_eq!(&DEALLOCATE_RE.captures("DEALLOCATE PREPARE s1").unwrap()["name"], "s1");
        assert_eq!(&DEALLOCATE_RE.captures("deallocate all").unwrap()["name"], "all");
    }

    #[test]
    fn reported_names_keep_their_spelling() {
        assert_eq!(reported_name("datestyle"), Some("DateStyle"));
        assert_eq!(reported_name("timezone"), Some("TimeZone"));
        assert_eq!(reported_name("work_mem"), None);
    }

    #[test]
    fn tags_follow_rows_or_affected_count() {
        let sel = Executed::rows(RowSet::single("x", types::INT4, TypedValue::Int(1)));
        assert_eq!(sel.command_tag(&StatementKind::Select, 1), "SELECT 1");
        let ins = Executed::rows(RowSet::affected(3));
        assert_eq!(ins.command_tag(&StatementKind::Insert, 0), "INSERT 0 3");
        assert_eq!(Executed::command("SET").command_tag(&StatementKind::Set, 0), "SET");
    }
}
