//! Buffered response writer. Messages accumulate in memory and go out on `flush`,
//! which the session calls at ReadyForQuery, Flush and copy hand-offs.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::backend::{ColumnMeta, TypedValue};
use crate::error::{GatewayError, GatewayResult};
use crate::pgwire_server::codec::{BackendMessage, ErrorFields, FieldDescription};
use crate::pgwire_server::encodedecode::{encode_cell, format_for};
use crate::pgwire_server::oids::type_size;

/// Flush mid-result once this much is buffered.
const STREAM_CHUNK: usize = 64 * 1024;

pub struct Outbox<W> {
    writer: W,
    buf: Vec<u8>,
    conn_id: u64,
}

impl<W: AsyncWrite + Unpin> Outbox<W> {
    pub fn new(writer: W, conn_id: u64) -> Self { Outbox { writer, buf: Vec::with_capacity(8 * 1024), conn_id } }

    pub fn send(&mut self, msg: &BackendMessage) { msg.encode(&mut self.buf); }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.buf.is_empty() {
            self.writer.write_all(&self.buf).await?;
            self.buf.clear();
        }
        self.writer.flush().await
    }

    /// Bytes outside the message framing (the one-byte SSL/GSS answer).
    pub async fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.flush().await?;
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    pub fn error(&mut self, e: &GatewayError) {
        let fields = ErrorFields::from(e);
        debug!(target: "pgwire", "conn_id={} ErrorResponse {} {}: {}", self.conn_id, fields.severity, fields.code, fields.message);
        self.send(&BackendMessage::ErrorResponse(fields));
    }

    pub fn notice<S: Into<String>>(&mut self, message: S) {
        self.send(&BackendMessage::NoticeResponse(ErrorFields::new("WARNING", "01000", message)));
    }

    pub fn ready(&mut self, status: u8) { self.send(&BackendMessage::ReadyForQuery(status)); }

    pub fn row_description(&mut self, columns: &[ColumnMeta], formats: &[i16]) {
        let fields = columns
            .iter()
            .enumerate()
            .map(|(i, c)| FieldDescription {
                name: c.name.clone(),
                table_oid: 0,
                column_attr: 0,
                type_oid: c.type_oid,
                type_size: type_size(c.type_oid),
                type_modifier: -1,
                format: format_for(formats, i),
            })
            .collect();
        self.send(&BackendMessage::RowDescription(fields));
    }

    /// Encode and queue rows, flushing whenever a chunk fills up.
    pub async fn data_rows(&mut self, rows: &[Vec<TypedValue>], columns: &[ColumnMeta], formats: &[i16]) -> GatewayResult<()> {
        for row in rows {
            let mut cells = Vec::with_capacity(row.len());
            for (i, value) in row.iter().enumerate() {
                let oid = columns.get(i).map(|c| c.type_oid).unwrap_or(0);
                cells.push(encode_cell(value, oid, format_for(formats, i))?);
            }
            self.send(&BackendMessage::DataRow(cells));
            if self.buf.len() >= STREAM_CHUNK {
                self.flush().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_catalog::types;

    #[tokio::test]
    async fn row_description_and_binary_rows() {
        let mut out = Outbox::new(Vec::new(), 1);
        let cols = vec![ColumnMeta::new("id", types::INT4), ColumnMeta::new("name", types::TEXT)];
        out.row_description(&cols, &[1, 0]);
        out.data_rows(&[vec![TypedValue::Int(5), TypedValue::Null]], &cols, &[1, 0]).await.unwrap();
        out.flush().await.unwrap();
        let bytes = out.writer;

        assert_eq!(bytes[0], b'T');
        let t_len = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let d = &bytes[1 + t_len..];
        assert_eq!(d[0], b'D');
        // 2 cells: int4 5 in 4 bytes, then NULL
        assert_eq!(&d[5..7], &2i16.to_be_bytes());
        assert_eq!(&d[7..11], &4i32.to_be_bytes());
        assert_eq!(&d[11..15], &5i32.to_be_bytes());
        assert_eq!(&d[15..19], &(-1i32).to_be_bytes());
    }
}
