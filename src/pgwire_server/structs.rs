use std::collections::HashMap;

use crate::backend::{ColumnMeta, RowSet};
use crate::translate::TranslationResult;

#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub sql: String,
    pub translation: TranslationResult,
    /// One OID per client parameter; 0 when neither Parse nor a cast says.
    pub param_types: Vec<i32>,
    /// Result columns once a Describe has worked them out.
    pub columns: Option<Vec<ColumnMeta>>,
}

/// Outcome of running one statement, kept on a portal between Execute calls.
#[derive(Debug, Clone)]
pub struct Executed {
    pub rows: RowSet,
    /// Locally answered commands carry their own tag.
    pub tag: Option<String>,
    pub notice: Option<String>,
}

impl Executed {
    pub fn rows(rows: RowSet) -> Self { Executed { rows, tag: None, notice: None } }

    pub fn command<S: Into<String>>(tag: S) -> Self { Executed { rows: RowSet::default(), tag: Some(tag.into()), notice: None } }
}

#[derive(Debug, Clone)]
pub struct Portal {
    pub statement: String,
    pub bound: TranslationResult,
    pub result_formats: Vec<i16>,
    /// Column types advertised by the statement's Describe; encoding follows them.
    pub columns: Option<Vec<ColumnMeta>>,
    pub result: Option<Executed>,
    /// Rows already sent by earlier Execute calls.
    pub sent: usize,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    #[default]
    Idle,
    Active,
    Failed,
}

impl TxState {
    /// ReadyForQuery status byte.
    pub fn status_byte(self) -> u8 {
        match self {
            TxState::Idle => b'I',
            TxState::Active => b'T',
            TxState::Failed => b'E',
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnState {
    pub statements: HashMap<String, PreparedStatement>,
    pub portals: HashMap<String, Portal>,
    pub tx: TxState,
    /// After an error in the extended flow everything up to Sync is discarded.
    pub in_error: bool,
    /// Writes inside the open block that a non-transactional backend already committed.
    pub committed_in_block: usize,
}

impl ConnState {
    /// Portals do not outlive their transaction.
    pub fn end_of_sync(&mut self) {
        self.in_error = false;
        if self.tx == TxState::Idle {
            self.portals.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bytes() {
        assert_eq!(TxState::Idle.status_byte(), b'I');
        assert_eq!(TxState::Active.status_byte(), b'T');
        assert_eq!(TxState::Failed.status_byte(), b'E');
    }
}
