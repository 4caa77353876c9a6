//! Framing for postgres protocol v3: typed frontend/backend messages and their byte forms.
//! Knows nothing about SQL.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GatewayError, GatewayResult};

pub const PROTOCOL_V3: i32 = 196608;
pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const GSSENC_REQUEST_CODE: i32 = 80877104;
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Largest frame accepted from a client.
pub const MAX_FRAME_LEN: u32 = 1 << 30;
/// Startup packets are tiny; anything bigger is garbage.
const MAX_STARTUP_LEN: u32 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum StartupMessage {
    Startup { version: i32, params: HashMap<String, String> },
    SslRequest,
    GssEncRequest,
    Cancel { pid: i32, secret: i32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    Query(String),
    Parse { name: String, sql: String, param_types: Vec<i32> },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    /// `kind` is `S` (statement) or `P` (portal).
    Describe { kind: u8, name: String },
    Execute { portal: String, max_rows: i32 },
    Close { kind: u8, name: String },
    Sync,
    Flush,
    Terminate,
    /// PasswordMessage / SASL responses: raw credential bytes.
    Password(Vec<u8>),
    CopyData(Vec<u8>),
    CopyDone,
    CopyFail(String),
}

impl FrontendMessage {
    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Bind { .. } => "Bind",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::Close { .. } => "Close",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Terminate => "Terminate",
            FrontendMessage::Password(_) => "PasswordMessage",
            FrontendMessage::CopyData(_) => "CopyData",
            FrontendMessage::CopyDone => "CopyDone",
            FrontendMessage::CopyFail(_) => "CopyFail",
        }
    }

    /// Decode one frame body. Unknown tags and truncated bodies are protocol errors.
    pub fn decode(tag: u8, body: &[u8]) -> GatewayResult<FrontendMessage> {
        let mut r = Cursor::new(body);
        let msg = match tag {
            b'Q' => FrontendMessage::Query(r.cstr()?),
            b'P' => {
                let name = r.cstr()?;
                let sql = r.cstr()?;
                let n = r.count()?;
                let mut param_types = Vec::with_capacity(n);
                for _ in 0..n { param_types.push(r.i32()?); }
                FrontendMessage::Parse { name, sql, param_types }
            }
            b'B' => {
                let portal = r.cstr()?;
                let statement = r.cstr()?;
                let n = r.count()?;
                let mut param_formats = Vec::with_capacity(n);
                for _ in 0..n { param_formats.push(r.i16()?); }
                let n = r.count()?;
                let mut params = Vec::with_capacity(n);
                for _ in 0..n {
                    let len = r.i32()?;
                    if len < 0 {
                        params.push(None);
                    } else {
                        params.push(Some(r.bytes(len as usize)?.to_vec()));
                    }
                }
                let n = r.count()?;
                let mut result_formats = Vec::with_capacity(n);
                for _ in 0..n { result_formats.push(r.i16()?); }
                FrontendMessage::Bind { portal, statement, param_formats, params, result_formats }
            }
            b'D' => {
                let kind = r.u8()?;
                if kind != b'S' && kind != b'P' {
                    return Err(GatewayError::protocol(format!("invalid Describe target '{}'", kind as char)));
                }
                FrontendMessage::Describe { kind, name: r.cstr()? }
            }
            b'E' => FrontendMessage::Execute { portal: r.cstr()?, max_rows: r.i32()? },
            b'C' => {
                let kind = r.u8()?;
                if kind != b'S' && kind != b'P' {
                    return Err(GatewayError::protocol(format!("invalid Close target '{}'", kind as char)));
                }
                FrontendMessage::Close { kind, name: r.cstr()? }
            }
            b'S' => FrontendMessage::Sync,
            b'H' => FrontendMessage::Flush,
            b'X' => FrontendMessage::Terminate,
            b'p' => {
                let mut bytes = body.to_vec();
                if bytes.last() == Some(&0) { bytes.pop(); }
                return Ok(FrontendMessage::Password(bytes));
            }
            b'd' => return Ok(FrontendMessage::CopyData(body.to_vec())),
            b'c' => FrontendMessage::CopyDone,
            b'f' => FrontendMessage::CopyFail(r.cstr()?),
            other => {
                return Err(GatewayError::protocol(format!("unknown message type '{}' (0x{:02X})", other as char, other)));
            }
        };
        r.finish()?;
        Ok(msg)
    }

    /// Client-side encoding; used by tests and tooling.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut body = Vec::new();
        let tag = match self {
            FrontendMessage::Query(q) => { put_cstr(&mut body, q); b'Q' }
            FrontendMessage::Parse { name, sql, param_types } => {
                put_cstr(&mut body, name);
                put_cstr(&mut body, sql);
                body.extend_from_slice(&(param_types.len() as i16).to_be_bytes());
                for t in param_types { body.extend_from_slice(&t.to_be_bytes()); }
                b'P'
            }
            FrontendMessage::Bind { portal, statement, param_formats, params, result_formats } => {
                put_cstr(&mut body, portal);
                put_cstr(&mut body, statement);
                body.extend_from_slice(&(param_formats.len() as i16).to_be_bytes());
                for f in param_formats { body.extend_from_slice(&f.to_be_bytes()); }
                body.extend_from_slice(&(params.len() as i16).to_be_bytes());
                for p in params {
                    match p {
                        None => body.extend_from_slice(&(-1i32).to_be_bytes()),
                        Some(v) => {
                            body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                            body.extend_from_slice(v);
                        }
                    }
                }
                body.extend_from_slice(&(result_formats.len() as i16).to_be_bytes());
                for f in result_formats { body.extend_from_slice(&f.to_be_bytes()); }
                b'B'
            }
            FrontendMessage::Describe { kind, name } => { body.push(*kind); put_cstr(&mut body, name); b'D' }
            FrontendMessage::Execute { portal, max_rows } => {
                put_cstr(&mut body, portal);
                body.extend_from_slice(&max_rows.to_be_bytes());
                b'E'
            }
            FrontendMessage::Close { kind, name } => { body.push(*kind); put_cstr(&mut body, name); b'C' }
            FrontendMessage::Sync => b'S',
            FrontendMessage::Flush => b'H',
            FrontendMessage::Terminate => b'X',
            FrontendMessage::Password(p) => { body.extend_from_slice(p); body.push(0); b'p' }
            FrontendMessage::CopyData(d) => { body.extend_from_slice(d); b'd' }
            FrontendMessage::CopyDone => b'c',
            FrontendMessage::CopyFail(m) => { put_cstr(&mut body, m); b'f' }
        };
        put_frame(out, tag, &body);
    }
}

/// Read the untagged startup packet (or SSL/GSS/cancel request).
pub async fn read_startup<R: AsyncRead + Unpin>(reader: &mut R) -> GatewayResult<StartupMessage> {
    let len = reader.read_u32().await?;
    if !(8..=MAX_STARTUP_LEN).contains(&len) {
        return Err(GatewayError::protocol(format!("invalid startup packet length {}", len)));
    }
    let mut body = vec![0u8; (len - 4) as usize];
    reader.read_exact(&mut body).await?;
    decode_startup(&body)
}

pub fn decode_startup(body: &[u8]) -> GatewayResult<StartupMessage> {
    let mut r = Cursor::new(body);
    let code = r.i32()?;
    match code {
        SSL_REQUEST_CODE => Ok(StartupMessage::SslRequest),
        GSSENC_REQUEST_CODE => Ok(StartupMessage::GssEncRequest),
        CANCEL_REQUEST_CODE => Ok(StartupMessage::Cancel { pid: r.i32()?, secret: r.i32()? }),
        PROTOCOL_V3 => {
            let mut params = HashMap::new();
            loop {
                let key = r.cstr()?;
                if key.is_empty() { break; }
                let value = r.cstr()?;
                params.insert(key, value);
            }
            Ok(StartupMessage::Startup { version: code, params })
        }
        other => Err(GatewayError::protocol(format!(
            "unsupported frontend protocol {}.{}",
            (other >> 16) & 0xFFFF,
            other & 0xFFFF
        ))),
    }
}

/// Read one tagged frame. `Ok(None)` on a clean EOF before the tag byte.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> GatewayResult<Option<(u8, Vec<u8>)>> {
    let mut tag = [0u8; 1];
    if reader.read(&mut tag).await? == 0 {
        return Ok(None);
    }
    let len = reader.read_u32().await?;
    if !(4..=MAX_FRAME_LEN).contains(&len) {
        return Err(GatewayError::protocol(format!("invalid length {} for message '{}'", len, tag[0] as char)));
    }
    let mut body = vec![0u8; (len - 4) as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some((tag[0], body)))
}

pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> GatewayResult<Option<FrontendMessage>> {
    match read_frame(reader).await? {
        None => Ok(None),
        Some((tag, body)) => FrontendMessage::decode(tag, &body).map(Some),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: i32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

/// Fields of an ErrorResponse / NoticeResponse.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFields {
    pub severity: &'static str,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
}

impl ErrorFields {
    pub fn new<C: Into<String>, M: Into<String>>(severity: &'static str, code: C, message: M) -> Self {
        ErrorFields { severity, code: code.into(), message: message.into(), detail: None }
    }
}

impl From<&GatewayError> for ErrorFields {
    fn from(e: &GatewayError) -> Self {
        let (code, severity, message) = e.pgwire_fields();
        let detail = match e {
            GatewayError::Backend(b) if !b.code.is_empty() => Some(format!("backend SQLCODE {}", b.code)),
            _ => None,
        };
        ErrorFields { severity, code: code.to_string(), message, detail }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    /// Extra challenge round from the authenticator.
    AuthenticationContinue(Vec<u8>),
    ParameterStatus(String, String),
    BackendKeyData { pid: i32, secret: i32 },
    /// Transaction status byte: `I`, `T` or `E`.
    ReadyForQuery(u8),
    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription(Vec<i32>),
    CopyInResponse { columns: usize },
    CopyOutResponse { columns: usize },
    CopyData(Vec<u8>),
    CopyDone,
}

impl BackendMessage {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut body = Vec::new();
        let tag = match self {
            BackendMessage::AuthenticationOk => { body.extend_from_slice(&0i32.to_be_bytes()); b'R' }
            BackendMessage::AuthenticationCleartextPassword => { body.extend_from_slice(&3i32.to_be_bytes()); b'R' }
            BackendMessage::AuthenticationContinue(data) => {
                body.extend_from_slice(&11i32.to_be_bytes());
                body.extend_from_slice(data);
                b'R'
            }
            BackendMessage::ParameterStatus(k, v) => { put_cstr(&mut body, k); put_cstr(&mut body, v); b'S' }
            BackendMessage::BackendKeyData { pid, secret } => {
                body.extend_from_slice(&pid.to_be_bytes());
                body.extend_from_slice(&secret.to_be_bytes());
                b'K'
            }
            BackendMessage::ReadyForQuery(status) => { body.push(*status); b'Z' }
            BackendMessage::RowDescription(fields) => {
                body.extend_from_slice(&(fields.len() as i16).to_be_bytes());
                for f in fields {
                    put_cstr(&mut body, &f.name);
                    body.extend_from_slice(&f.table_oid.to_be_bytes());
                    body.extend_from_slice(&f.column_attr.to_be_bytes());
                    body.extend_from_slice(&f.type_oid.to_be_bytes());
                    body.extend_from_slice(&f.type_size.to_be_bytes());
                    body.extend_from_slice(&f.type_modifier.to_be_bytes());
                    body.extend_from_slice(&f.format.to_be_bytes());
                }
                b'T'
            }
            BackendMessage::DataRow(cells) => {
                body.extend_from_slice(&(cells.len() as i16).to_be_bytes());
                for cell in cells {
                    match cell {
                        None => body.extend_from_slice(&(-1i32).to_be_bytes()),
                        Some(bytes) => {
                            body.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                            body.extend_from_slice(bytes);
                        }
                    }
                }
                b'D'
            }
            BackendMessage::CommandComplete(tag) => { put_cstr(&mut body, tag); b'C' }
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::ErrorResponse(f) => { put_error_fields(&mut body, f); b'E' }
            BackendMessage::NoticeResponse(f) => { put_error_fields(&mut body, f); b'N' }
            BackendMessage::ParseComplete => b'1',
            BackendMessage::BindComplete => b'2',
            BackendMessage::CloseComplete => b'3',
            BackendMessage::NoData => b'n',
            BackendMessage::PortalSuspended => b's',
            BackendMessage::ParameterDescription(oids) => {
                body.extend_from_slice(&(oids.len() as i16).to_be_bytes());
                for oid in oids { body.extend_from_slice(&oid.to_be_bytes()); }
                b't'
            }
            BackendMessage::CopyInResponse { columns } | BackendMessage::CopyOutResponse { columns } => {
                // overall text format, text per column
                body.push(0);
                body.extend_from_slice(&(*columns as i16).to_be_bytes());
                for _ in 0..*columns { body.extend_from_slice(&0i16.to_be_bytes()); }
                if matches!(self, BackendMessage::CopyInResponse { .. }) { b'G' } else { b'H' }
            }
            BackendMessage::CopyData(d) => { body.extend_from_slice(d); b'd' }
            BackendMessage::CopyDone => b'c',
        };
        put_frame(out, tag, &body);
    }
}

fn put_error_fields(body: &mut Vec<u8>, f: &ErrorFields) {
    body.push(b'S');
    put_cstr(body, f.severity);
    body.push(b'V');
    put_cstr(body, f.severity);
    body.push(b'C');
    put_cstr(body, &f.code);
    body.push(b'M');
    put_cstr(body, &f.message);
    if let Some(d) = &f.detail {
        body.push(b'D');
        put_cstr(body, d);
    }
    body.push(0);
}

pub fn put_cstr(out: &mut Vec<u8>, s: &str) {
    // an interior NUL would end the string early on the client
    out.extend(s.bytes().filter(|b| *b != 0));
    out.push(0);
}

fn put_frame(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
}

/// Bounds-checked reader over a frame body.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self { Cursor { buf, pos: 0 } }

    fn short(&self, what: &str) -> GatewayError {
        GatewayError::protocol(format!("message truncated reading {} at offset {}", what, self.pos))
    }

    pub(crate) fn u8(&mut self) -> GatewayResult<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| self.short("byte"))?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn i16(&mut self) -> GatewayResult<i16> {
        let b = self.bytes(2).map_err(|_| self.short("int16"))?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn i32(&mut self) -> GatewayResult<i32> {
        let b = self.bytes(4).map_err(|_| self.short("int32"))?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Non-negative int16 element count.
    fn count(&mut self) -> GatewayResult<usize> {
        let n = self.i16()?;
        if n < 0 {
            return Err(GatewayError::protocol(format!("negative element count {}", n)));
        }
        Ok(n as usize)
    }

    pub(crate) fn bytes(&mut self, n: usize) -> GatewayResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.buf.len()).ok_or_else(|| self.short("bytes"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn cstr(&mut self) -> GatewayResult<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest.iter().position(|b| *b == 0).ok_or_else(|| self.short("string"))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|e| GatewayError::InvalidEncoding(format!("0x{:02x}", rest[e.valid_up_to()])))?
            .to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    fn remaining(&self) -> usize { self.buf.len() - self.pos }

    fn finish(&self) -> GatewayResult<()> {
        if self.remaining() != 0 {
            return Err(GatewayError::protocol(format!("message length mismatch: {} trailing bytes", self.remaining())));
        }
        Ok(())
    }
}

pub fn hex_dump_prefix(data: &[u8], max: usize) -> String {
    data.iter().take(max).map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}
