//! COPY sub-protocol. The session owns the framing (CopyInResponse / CopyData /
//! CopyDone); what happens to the payload is up to a `BulkLoader`.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::backend::{BackendAdapter, TypedValue};
use crate::error::{BackendError, GatewayError, GatewayResult, CANCELLED_CODE};
use crate::pgwire_server::codec::{BackendMessage, FrontendMessage};
use crate::pgwire_server::session::{Inbound, Session};
use crate::pgwire_server::structs::TxState;
use crate::translate::Translator;

/// Rows per backend transaction in `InsertBulkLoader`.
pub const INSERT_BATCH_ROWS: usize = 100;

static COPY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^\s*COPY\s+(?P<source>\((?P<query>.+)\)|(?P<table>"[^"]+"|[\w.]+(?:\."[^"]+")?))\s*(?:\((?P<cols>[^)]*)\))?\s*(?P<dir>FROM\s+STDIN|TO\s+STDOUT)\b\s*(?:WITH\s*)?(?P<opts>.*?)\s*;?\s*$"#,
    )
    .unwrap()
});
static DELIMITER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)DELIMITER\s+(?:AS\s+)?'(.)'").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFormat {
    Text,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopySpec {
    pub direction: CopyDirection,
    /// Table name, or None for `COPY (query) TO STDOUT`.
    pub table: Option<String>,
    pub query: Option<String>,
    pub columns: Vec<String>,
    pub format: CopyFormat,
    pub header: bool,
    pub delimiter: u8,
}

impl CopySpec {
    pub fn parse(sql: &str) -> GatewayResult<CopySpec> {
        let c = COPY_RE
            .captures(sql)
            .ok_or_else(|| GatewayError::unsupported(format!("unsupported COPY form: {}", sql.trim())))?;
        let direction = if c["dir"].to_ascii_uppercase().starts_with("FROM") { CopyDirection::In } else { CopyDirection::Out };
        let query = c.name("query").map(|m| m.as_str().trim().to_string());
        if query.is_some() && direction == CopyDirection::In {
            return Err(GatewayError::translation("COPY (query) only supports TO STDOUT"));
        }
        let columns = c
            .name("cols")
            .map(|m| m.as_str().split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let opts = c.name("opts").map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
        let format = if opts.contains("csv") { CopyFormat::Csv } else { CopyFormat::Text };
        let delimiter = DELIMITER_RE
            .captures(c.name("opts").map(|m| m.as_str()).unwrap_or(""))
            .and_then(|d| d[1].bytes().next())
            .unwrap_or(if format == CopyFormat::Csv { b',' } else { b'\t' });
        Ok(CopySpec {
            direction,
            table: c.name("table").map(|m| m.as_str().to_string()),
            query,
            columns,
            format,
            header: opts.contains("header"),
            delimiter,
        })
    }
}

/// What an export produced: column count plus one encoded line per row.
#[derive(Debug, Clone, Default)]
pub struct CopyExport {
    pub columns: usize,
    pub lines: Vec<Vec<u8>>,
}

/// Receives COPY payloads. Called from `spawn_blocking`.
pub trait BulkLoader: Send + Sync {
    /// Load `data` (the concatenated CopyData bodies); returns rows written.
    fn load(&self, spec: &CopySpec, data: &[u8]) -> GatewayResult<u64>;

    fn export(&self, spec: &CopySpec) -> GatewayResult<CopyExport>;
}

/// Loads by issuing parameterized INSERTs through the backend adapter.
pub struct InsertBulkLoader {
    adapter: Arc<BackendAdapter>,
    translator: Translator,
}

impl InsertBulkLoader {
    pub fn new(adapter: Arc<BackendAdapter>, translator: Translator) -> Self { InsertBulkLoader { adapter, translator } }

    fn records(spec: &CopySpec, data: &[u8]) -> GatewayResult<Vec<Vec<TypedValue>>> {
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(spec.header && spec.format == CopyFormat::Csv).delimiter(spec.delimiter).flexible(false);
        if spec.format == CopyFormat::Text {
            builder.quoting(false).has_headers(spec.header);
        }
        let mut reader = builder.from_reader(data);
        let mut out = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| GatewayError::translation(format!("COPY data line {}: {}", line + 1, e)))?;
            if spec.format == CopyFormat::Text && record.len() == 1 && &record[0] == "\\." {
                break;
            }
            let row = record
                .iter()
                .map(|field| match spec.format {
                    CopyFormat::Text if field == "\\N" => TypedValue::Null,
                    CopyFormat::Text => TypedValue::Text(unescape_text(field)),
                    CopyFormat::Csv if field.is_empty() => TypedValue::Null,
                    CopyFormat::Csv => TypedValue::text(field),
                })
                .collect();
            out.push(row);
        }
        Ok(out)
    }

    fn insert_sql(&self, table: &str, columns: &[String], width: usize) -> GatewayResult<String> {
        let placeholders: Vec<String> = (1..=width).map(|i| format!("${}", i)).collect();
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} VALUES ({})", table, placeholders.join(", "))
        } else {
            format!("INSERT INTO {} ({}) VALUES ({})", table, columns.join(", "), placeholders.join(", "))
        };
        Ok(self.translator.translate(&sql, &[])?.sql)
    }

    fn run(&self, sql: &str, params: &[TypedValue]) -> GatewayResult<u64> {
        Ok(self.adapter.execute_blocking(sql, params)?.rows_affected.unwrap_or(0))
    }
}

fn unescape_text(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn escape_text(value: &str, delimiter: u8) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c as u32 == delimiter as u32 => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

impl BulkLoader for InsertBulkLoader {
    fn load(&self, spec: &CopySpec, data: &[u8]) -> GatewayResult<u64> {
        let table = spec.table.as_deref().ok_or_else(|| GatewayError::translation("COPY FROM needs a table"))?;
        let rows = Self::records(spec, data)?;
        let Some(width) = rows.first().map(|r| r.len()) else { return Ok(0) };
        if !spec.columns.is_empty() && spec.columns.len() != width {
            return Err(GatewayError::translation(format!(
                "COPY data has {} fields but {} columns were listed",
                width,
                spec.columns.len()
            )));
        }
        let sql = self.insert_sql(table, &spec.columns, width)?;
        // without transactions every INSERT commits where it lands
        let atomic = self.adapter.transactional();
        let mut written = 0u64;
        for batch in rows.chunks(INSERT_BATCH_ROWS) {
            if atomic {
                self.run("START TRANSACTION", &[])?;
            }
            let mut n = 0u64;
            let mut failure = None;
            for row in batch {
                match self.run(&sql, row) {
                    Ok(k) => n += k.max(1),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            match failure {
                None => {
                    if atomic {
                        self.run("COMMIT", &[])?;
                    }
                    written += n;
                }
                Some(e) if atomic => {
                    if let Err(rb) = self.run("ROLLBACK", &[]) {
                        warn!(target: "pgwire", "COPY rollback failed: {}", rb);
                    }
                    return Err(e);
                }
                Some(e) => {
                    warn!(target: "pgwire", "COPY into {} failed; {} row(s) already committed stay loaded", table, written + n);
                    return Err(e);
                }
            }
        }
        debug!(target: "pgwire", "COPY loaded {} rows into {}", written, table);
        Ok(written)
    }

    fn export(&self, spec: &CopySpec) -> GatewayResult<CopyExport> {
        let select = match (&spec.query, &spec.table) {
            (Some(q), _) => q.clone(),
            (None, Some(t)) if spec.columns.is_empty() => format!("SELECT * FROM {}", t),
            (None, Some(t)) => format!("SELECT {} FROM {}", spec.columns.join(", "), t),
            (None, None) => return Err(GatewayError::translation("COPY TO needs a table or query")),
        };
        let tr = self.translator.translate(&select, &[])?;
        let rows = self.adapter.execute_blocking(&tr.sql, &[])?;
        let mut lines = Vec::with_capacity(rows.rows.len() + 1);
        let csv_line = |fields: Vec<Option<String>>| -> GatewayResult<Vec<u8>> {
            let mut w = csv::WriterBuilder::new().delimiter(spec.delimiter).has_headers(false).from_writer(Vec::new());
            w.write_record(fields.iter().map(|f| f.as_deref().unwrap_or("")))
                .map_err(|e| GatewayError::translation(e.to_string()))?;
            w.into_inner().map_err(|e| GatewayError::translation(e.to_string()))
        };
        if spec.header {
            let names = rows.columns.iter().map(|c| Some(c.name.clone())).collect();
            lines.push(match spec.format {
                CopyFormat::Csv => csv_line(names)?,
                CopyFormat::Text => text_line(names, spec.delimiter),
            });
        }
        for row in &rows.rows {
            let fields = row.iter().map(|v| v.to_text().map(|t| t.into_owned())).collect();
            lines.push(match spec.format {
                CopyFormat::Csv => csv_line(fields)?,
                CopyFormat::Text => text_line(fields, spec.delimiter),
            });
        }
        Ok(CopyExport { columns: rows.columns.len(), lines })
    }
}

fn text_line(fields: Vec<Option<String>>, delimiter: u8) -> Vec<u8> {
    let parts: Vec<String> = fields.into_iter().map(|f| f.map(|s| escape_text(&s, delimiter)).unwrap_or_else(|| "\\N".into())).collect();
    let mut line = parts.join(&(delimiter as char).to_string()).into_bytes();
    line.push(b'\n');
    line
}

impl<W: AsyncWrite + Unpin + Send> Session<W> {
    /// Run one COPY statement, from a simple query or an Execute.
    pub(crate) async fn copy(&mut self, sql: &str) -> GatewayResult<()> {
        if self.state.tx == TxState::Failed {
            return Err(GatewayError::FailedTransaction);
        }
        let spec = CopySpec::parse(sql)?;
        match spec.direction {
            CopyDirection::In => self.copy_in(spec).await,
            CopyDirection::Out => self.copy_out(spec).await,
        }
    }

    async fn copy_in(&mut self, spec: CopySpec) -> GatewayResult<()> {
        let width = spec.columns.len();
        self.out.send(&BackendMessage::CopyInResponse { columns: width });
        self.out.flush().await?;
        let mut data = Vec::new();
        loop {
            match self.inbox.recv().await {
                Some(Inbound::Message(FrontendMessage::CopyData(chunk))) => data.extend_from_slice(&chunk),
                Some(Inbound::Message(FrontendMessage::CopyDone)) => break,
                Some(Inbound::Message(FrontendMessage::CopyFail(reason))) => {
                    info!(target: "pgwire", "conn_id={} COPY aborted by client: {}", self.conn_id, reason);
                    return Err(BackendError::new(CANCELLED_CODE, format!("COPY from stdin failed: {}", reason)).into());
                }
                // ignored while copying
                Some(Inbound::Message(FrontendMessage::Flush | FrontendMessage::Sync)) => {}
                Some(Inbound::Message(other)) => {
                    return Err(GatewayError::protocol(format!("unexpected {} during COPY", other.name())));
                }
                Some(Inbound::Failed(e)) | Some(Inbound::Rejected { error: e, .. }) => return Err(e),
                Some(Inbound::Closed) | None => return Err(GatewayError::Io("client closed during COPY".into())),
            }
        }
        debug!(target: "pgwire", "conn_id={} COPY received {} bytes", self.conn_id, data.len());
        let loader = self.gw.loader.clone();
        let rows = tokio::task::spawn_blocking(move || loader.load(&spec, &data))
            .await
            .map_err(|e| GatewayError::from(BackendError::new("PANIC", format!("bulk load task failed: {}", e))))??;
        self.out.send(&BackendMessage::CommandComplete(format!("COPY {}", rows)));
        Ok(())
    }

    async fn copy_out(&mut self, spec: CopySpec) -> GatewayResult<()> {
        let loader = self.gw.loader.clone();
        let export = tokio::task::spawn_blocking(move || loader.export(&spec))
            .await
            .map_err(|e| GatewayError::from(BackendError::new("PANIC", format!("export task failed: {}", e))))??;
        self.out.send(&BackendMessage::CopyOutResponse { columns: export.columns });
        let count = export.lines.len();
        for line in export.lines {
            self.out.send(&BackendMessage::CopyData(line));
        }
        self.out.send(&BackendMessage::CopyDone);
        self.out.send(&BackendMessage::CommandComplete(format!("COPY {}", count)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::backend::{ColumnMeta, RowSet};
    use crate::system_catalog::types;

    #[test]
    fn copy_forms() {
        let s = CopySpec::parse("COPY public.items (id, name) FROM STDIN WITH (FORMAT csv, HEADER)").unwrap();
        assert_eq!(s.direction, CopyDirection::In);
        assert_eq!(s.table.as_deref(), Some("public.items"));
        assert_eq!(s.columns, vec!["id", "name"]);
        assert_eq!(s.format, CopyFormat::Csv);
        assert!(s.header);
        assert_eq!(s.delimiter, b',');

        let s = CopySpec::parse("copy (SELECT id FROM items) to stdout").unwrap();
        assert_eq!(s.direction, CopyDirection::Out);
        assert_eq!(s.query.as_deref(), Some("SELECT id FROM items"));
        assert_eq!(s.format, CopyFormat::Text);
        assert_eq!(s.delimiter, b'\t');

        let s = CopySpec::parse("COPY items FROM STDIN WITH (FORMAT csv, DELIMITER '|')").unwrap();
        assert_eq!(s.delimiter, b'|');
        assert!(CopySpec::parse("COPY items FROM '/tmp/x.csv'").is_err());
    }

    #[test]
    fn csv_load_batches_inserts_in_transactions() {
        let backend = Arc::new(ScriptedBackend::new("scripted").respond(|sql, _| sql.starts_with("INSERT").then(|| Ok(RowSet::affected(1)))));
        let adapter = Arc::new(BackendAdapter::new(backend.clone()));
        let loader = InsertBulkLoader::new(adapter, Translator::default());
        let spec = CopySpec::parse("COPY public.items (id, name) FROM STDIN WITH (FORMAT csv)").unwrap();
        let mut data = String::new();
        for i in 0..150 {
            data.push_str(&format!("{},item {}\n", i, i));
        }
        data.push_str("150,\n");
        assert_eq!(loader.load(&spec, data.as_bytes()).unwrap(), 151);

        let calls = backend.calls.lock();
        assert_eq!(calls.iter().filter(|(s, _)| s == "START TRANSACTION").count(), 2);
        assert_eq!(calls.iter().filter(|(s, _)| s == "COMMIT").count(), 2);
        let (sql, params) = calls.iter().rev().find(|(s, _)| s.starts_with("INSERT")).cloned().unwrap();
        assert_eq!(sql, "INSERT INTO SQLUser.items (id, name) VALUES (?, ?)");
        assert_eq!(params, vec![TypedValue::text("150"), TypedValue::Null]);
    }

    #[test]
    fn failed_batch_rolls_back() {
        let backend = Arc::new(ScriptedBackend::new("scripted").respond(|sql, params| {
            (sql.starts_with("INSERT") && params.first() == Some(&TypedValue::text("bad"))).then(|| Err(BackendError::new("-104", "null")))
        }));
        let loader = InsertBulkLoader::new(Arc::new(BackendAdapter::new(backend.clone())), Translator::default());
        let spec = CopySpec::parse("COPY items FROM STDIN").unwrap();
        let err = loader.load(&spec, b"ok\t1\nbad\t2\n").unwrap_err();
        assert_eq!(err.pgwire_fields().0, "23502");
        assert_eq!(backend.last_call().unwrap().0, "ROLLBACK");
    }

    #[test]
    fn autocommit_backend_loads_without_transaction_verbs() {
        let mut scripted = ScriptedBackend::new("scripted").respond(|sql, params| {
            (sql.starts_with("INSERT") && params.first() == Some(&TypedValue::text("bad"))).then(|| Err(BackendError::new("-104", "null")))
        });
        scripted.transactional = false;
        let backend = Arc::new(scripted);
        let loader = InsertBulkLoader::new(Arc::new(BackendAdapter::new(backend.clone())), Translator::default());
        let spec = CopySpec::parse("COPY items FROM STDIN").unwrap();

        assert_eq!(loader.load(&spec, b"a\t1\nb\t2\n").unwrap(), 2);
        let err = loader.load(&spec, b"ok\t1\nbad\t2\nlater\t3\n").unwrap_err();
        assert_eq!(err.pgwire_fields().0, "23502");

        let calls = backend.calls.lock();
        assert!(calls.iter().all(|(s, _)| s.starts_with("INSERT")), "{:?}", calls);
        // the row before the failure was issued; nothing after it
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3].1[0], TypedValue::text("bad"));
    }

    #[test]
    fn text_export_escapes_and_marks_nulls() {
        let backend = Arc::new(ScriptedBackend::new("scripted").respond(|sql, _| {
            if !sql.starts_with("SELECT") {
                return None;
            }
            let mut rs = RowSet::with_columns(vec![ColumnMeta::new("id", types::INT4), ColumnMeta::new("note", types::TEXT)]);
            rs.rows.push(vec![TypedValue::Int(1), TypedValue::text("a\tb")]);
            rs.rows.push(vec![TypedValue::Int(2), TypedValue::Null]);
            Some(Ok(rs))
        }));
        let loader = InsertBulkLoader::new(Arc::new(BackendAdapter::new(backend)), Translator::default());
        let export = loader.export(&CopySpec::parse("COPY items TO STDOUT").unwrap()).unwrap();
        assert_eq!(export.columns, 2);
        assert_eq!(export.lines, vec![b"1\ta\\tb\n".to_vec(), b"2\t\\N\n".to_vec()]);
    }
}
