//! One client connection: startup, authentication hand-off, the dispatch loop and teardown.
//!
//! Frames are read by a separate task so a client that goes away mid-query is noticed
//! while the backend call is still running; the dispatcher itself stays sequential.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::CancelSignal;
use crate::error::{GatewayError, GatewayResult};
use crate::pgwire_server::cancel::new_secret;
use crate::pgwire_server::codec::{self, BackendMessage, FrontendMessage, StartupMessage};
use crate::pgwire_server::security::{AuthOutcome, MAX_AUTH_ROUNDS};
use crate::pgwire_server::send::Outbox;
use crate::pgwire_server::structs::ConnState;
use crate::pgwire_server::Gateway;
use crate::system_catalog::SessionInfo;

/// Messages queued between the reader task and the dispatcher.
const INBOX_DEPTH: usize = 64;

/// Parameters announced with ParameterStatus, by their reported spelling.
pub(crate) const REPORTED_PARAMETERS: &[&str] = &[
    "server_version",
    "server_encoding",
    "client_encoding",
    "DateStyle",
    "integer_datetimes",
    "standard_conforming_strings",
    "TimeZone",
    "IntervalStyle",
    "is_superuser",
    "search_path",
    "session_authorization",
    "application_name",
];

pub(crate) enum Inbound {
    Message(FrontendMessage),
    /// Undecodable input; the connection ends after reporting it.
    Failed(GatewayError),
    /// A well-framed message whose content was refused; the session carries on.
    Rejected { tag: u8, error: GatewayError },
    Closed,
}

pub struct Session<W> {
    pub(crate) conn_id: u64,
    pub(crate) gw: Arc<Gateway>,
    pub(crate) out: Outbox<W>,
    pub(crate) state: ConnState,
    pub(crate) info: SessionInfo,
    /// Settings as they were right after startup; RESET goes back to these.
    pub(crate) defaults: HashMap<String, String>,
    pub(crate) cancel: CancelSignal,
    pub(crate) disconnected: Arc<AtomicBool>,
    pub(crate) inbox: mpsc::Receiver<Inbound>,
}

/// Drive one connection to completion.
pub async fn run_session<S>(stream: S, gw: Arc<Gateway>, conn_id: u64, peer: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    debug!(target: "pgwire", "conn_id={} new connection from {}", conn_id, peer);
    let (mut reader, writer) = tokio::io::split(stream);
    let mut out = Outbox::new(writer, conn_id);

    let Some(params) = startup(&mut reader, &mut out, &gw, conn_id).await? else { return Ok(()) };
    let user = params.get("user").cloned().unwrap_or_default();
    if user.is_empty() {
        out.error(&GatewayError::auth("no user name specified in startup packet"));
        out.flush().await?;
        return Ok(());
    }
    if !authenticate(&mut reader, &mut out, &gw, &user, conn_id).await? {
        return Ok(());
    }

    let info = session_info(&gw, &params, &user, conn_id);
    out.send(&BackendMessage::AuthenticationOk);
    for name in REPORTED_PARAMETERS {
        if let Some(v) = info.settings.get(&name.to_ascii_lowercase()) {
            out.send(&BackendMessage::ParameterStatus(name.to_string(), v.clone()));
        }
    }
    let pid = info.backend_pid;
    let secret = new_secret();
    out.send(&BackendMessage::BackendKeyData { pid, secret });
    out.ready(b'I');
    out.flush().await?;
    info!(target: "pgwire", "conn_id={} user={} database={} ready", conn_id, info.user, info.database);

    let cancel = CancelSignal::default();
    let registry = gw.clone();
    let _registration = registry.cancels.register(pid, secret, cancel.clone());

    let disconnected = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel(INBOX_DEPTH);
    let reader_task = tokio::spawn(read_loop(reader, tx, cancel.clone(), disconnected.clone(), conn_id, gw.config.trace_frames));

    let mut session = Session {
        conn_id,
        gw,
        out,
        state: ConnState::default(),
        defaults: info.settings.clone(),
        info,
        cancel,
        disconnected,
        inbox: rx,
    };
    let result = session.serve().await;
    reader_task.abort();
    debug!(target: "pgwire", "conn_id={} session closed", conn_id);
    result
}

/// Negotiate until a real startup packet arrives. None when the connection was only a
/// cancel request.
async fn startup<R, W>(
    reader: &mut R,
    out: &mut Outbox<W>,
    gw: &Gateway,
    conn_id: u64,
) -> Result<Option<HashMap<String, String>>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = match codec::read_startup(reader).await {
            Ok(m) => m,
            Err(e) => {
                warn!(target: "pgwire", "conn_id={} bad startup: {}", conn_id, e);
                if matches!(e, GatewayError::Protocol(_) | GatewayError::InvalidEncoding(_)) {
                    out.error(&e);
                    out.flush().await?;
                }
                return Ok(None);
            }
        };
        match msg {
            StartupMessage::SslRequest | StartupMessage::GssEncRequest => {
                debug!(target: "pgwire", "conn_id={} declining encryption request", conn_id);
                out.write_raw(b"N").await?;
            }
            StartupMessage::Cancel { pid, secret } => {
                gw.cancels.cancel(pid, secret);
                return Ok(None);
            }
            StartupMessage::Startup { version, params } => {
                debug!(target: "pgwire", "conn_id={} startup protocol={} params={:?}", conn_id, version, params);
                return Ok(Some(params));
            }
        }
    }
}

/// Password exchange. False when the client was turned away.
async fn authenticate<R, W>(reader: &mut R, out: &mut Outbox<W>, gw: &Gateway, user: &str, conn_id: u64) -> Result<bool>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let auth = gw.authenticator.clone();
    if !auth.requires_password(user) {
        return Ok(true);
    }
    out.send(&BackendMessage::AuthenticationCleartextPassword);
    out.flush().await?;
    for round in 0..MAX_AUTH_ROUNDS {
        let credential = match codec::read_message(reader).await {
            Ok(Some(FrontendMessage::Password(bytes))) => bytes,
            Ok(Some(other)) => {
                out.error(&GatewayError::protocol(format!("expected password response, got {}", other.name())));
                out.flush().await?;
                return Ok(false);
            }
            Ok(None) => return Ok(false),
            Err(e) => {
                out.error(&e);
                out.flush().await?;
                return Ok(false);
            }
        };
        let judged_user = user.to_string();
        let auth = auth.clone();
        let outcome = tokio::task::spawn_blocking(move || auth.authenticate(&judged_user, &credential))
            .await
            .unwrap_or_else(|e| AuthOutcome::Rejected(format!("authentication task failed: {}", e)));
        match outcome {
            AuthOutcome::Accepted => {
                debug!(target: "pgwire", "conn_id={} user={} authenticated after {} round(s)", conn_id, user, round + 1);
                return Ok(true);
            }
            AuthOutcome::Rejected(reason) => {
                warn!(target: "pgwire", "conn_id={} user={} rejected: {}", conn_id, user, reason);
                out.error(&GatewayError::auth(reason));
                out.flush().await?;
                return Ok(false);
            }
            AuthOutcome::Challenge(data) => {
                out.send(&BackendMessage::AuthenticationContinue(data));
                out.flush().await?;
            }
        }
    }
    out.error(&GatewayError::auth(format!("authentication for user \"{}\" did not finish in {} rounds", user, MAX_AUTH_ROUNDS)));
    out.flush().await?;
    Ok(false)
}

fn session_info(gw: &Gateway, params: &HashMap<String, String>, user: &str, conn_id: u64) -> SessionInfo {
    let version = gw.config.server_version.clone();
    let mut settings: HashMap<String, String> = [
        ("server_version", version.as_str()),
        ("server_encoding", "UTF8"),
        ("client_encoding", "UTF8"),
        ("datestyle", "ISO, MDY"),
        ("integer_datetimes", "on"),
        ("standard_conforming_strings", "on"),
        ("timezone", "UTC"),
        ("intervalstyle", "postgres"),
        ("is_superuser", "off"),
        ("search_path", "\"$user\", public"),
        ("transaction_isolation", "read committed"),
        ("default_transaction_read_only", "off"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    settings.insert("session_authorization".into(), user.to_string());
    settings.insert("application_name".into(), params.get("application_name").cloned().unwrap_or_default());
    // startup `options` and other GUCs sent as startup parameters
    for (k, v) in params {
        if !matches!(k.as_str(), "user" | "database" | "options" | "replication") {
            settings.insert(k.to_ascii_lowercase(), v.clone());
        }
    }
    SessionInfo {
        database: params.get("database").cloned().unwrap_or_else(|| user.to_string()),
        user: user.to_string(),
        backend_pid: (conn_id & 0x7FFF_FFFF) as i32,
        server_version: version,
        settings,
    }
}

async fn read_loop<S: AsyncRead>(
    mut reader: ReadHalf<S>,
    tx: mpsc::Sender<Inbound>,
    cancel: CancelSignal,
    disconnected: Arc<AtomicBool>,
    conn_id: u64,
    trace: bool,
) {
    let closed = |why: &str| {
        debug!(target: "pgwire", "conn_id={} client gone ({}); cancelling in-flight work", conn_id, why);
        disconnected.store(true, Ordering::SeqCst);
        cancel.cancel();
    };
    loop {
        let (tag, body) = match codec::read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                closed("eof");
                let _ = tx.send(Inbound::Closed).await;
                return;
            }
            Err(GatewayError::Io(e)) => {
                closed(e.as_str());
                let _ = tx.send(Inbound::Closed).await;
                return;
            }
            Err(e) => {
                let _ = tx.send(Inbound::Failed(e)).await;
                return;
            }
        };
        if trace {
            debug!(target: "pgwire", "conn_id={} frame '{}' len={} [{}]", conn_id, tag as char, body.len(), codec::hex_dump_prefix(&body, 64));
        }
        match FrontendMessage::decode(tag, &body) {
            Ok(msg) => {
                let last = matches!(msg, FrontendMessage::Terminate);
                if tx.send(Inbound::Message(msg)).await.is_err() || last {
                    return;
                }
            }
            Err(e) if !e.is_fatal() => {
                debug!(target: "pgwire", "conn_id={} refusing '{}': {}", conn_id, tag as char, e);
                if tx.send(Inbound::Rejected { tag, error: e }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(target: "pgwire", "conn_id={} undecodable frame '{}' [{}]", conn_id, tag as char, codec::hex_dump_prefix(&body, 64));
                let _ = tx.send(Inbound::Failed(e)).await;
                return;
            }
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> Session<W> {
    async fn serve(&mut self) -> Result<()> {
        while let Some(event) = self.inbox.recv().await {
            let msg = match event {
                Inbound::Message(m) => m,
                Inbound::Failed(e) => {
                    warn!(target: "pgwire", "conn_id={} closing: {}", self.conn_id, e);
                    self.out.error(&e);
                    let _ = self.out.flush().await;
                    break;
                }
                Inbound::Rejected { tag, error } => {
                    self.reject(tag, &error).await?;
                    continue;
                }
                Inbound::Closed => break,
            };
            if !self.dispatch(msg).await? {
                break;
            }
        }
        Ok(())
    }

    /// Handle one message. `Ok(false)` ends the connection.
    async fn dispatch(&mut self, msg: FrontendMessage) -> Result<bool> {
        if self.state.in_error && !matches!(msg, FrontendMessage::Sync | FrontendMessage::Terminate) {
            debug!(target: "pgwire", "conn_id={} discarding {} until Sync", self.conn_id, msg.name());
            return Ok(true);
        }
        let outcome: GatewayResult<()> = match msg {
            FrontendMessage::Query(sql) => return self.simple_query(&sql).await,
            FrontendMessage::Parse { name, sql, param_types } => self.parse(name, sql, param_types).await,
            FrontendMessage::Bind { portal, statement, param_formats, params, result_formats } => {
                self.bind(portal, statement, param_formats, params, result_formats)
            }
            FrontendMessage::Describe { kind, name } => self.describe(kind, &name).await,
            FrontendMessage::Execute { portal, max_rows } => self.execute(&portal, max_rows).await,
            FrontendMessage::Close { kind, name } => {
                self.close(kind, &name);
                Ok(())
            }
            FrontendMessage::Sync => {
                self.sync().await?;
                Ok(())
            }
            FrontendMessage::Flush => {
                self.out.flush().await?;
                Ok(())
            }
            FrontendMessage::Terminate => {
                debug!(target: "pgwire", "conn_id={} terminate", self.conn_id);
                return Ok(false);
            }
            FrontendMessage::Password(_) => Err(GatewayError::protocol("unexpected password message")),
            // stray copy traffic after a failed COPY is dropped
            FrontendMessage::CopyData(_) | FrontendMessage::CopyDone | FrontendMessage::CopyFail(_) => Ok(()),
        };
        if let Err(e) = outcome {
            if e.is_fatal() {
                warn!(target: "pgwire", "conn_id={} fatal: {}", self.conn_id, e);
                self.out.error(&e);
                self.out.flush().await?;
                return Ok(false);
            }
            self.note_failure();
            self.out.error(&e);
            self.state.in_error = true;
        }
        Ok(true)
    }

    /// A refused Query still ends in ReadyForQuery; refused extended messages skip to Sync.
    async fn reject(&mut self, tag: u8, error: &GatewayError) -> std::io::Result<()> {
        if self.state.in_error {
            return Ok(());
        }
        self.note_failure();
        self.out.error(error);
        if tag == b'Q' {
            self.out.ready(self.state.tx.status_byte());
            self.out.flush().await
        } else {
            self.state.in_error = true;
            Ok(())
        }
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.state.end_of_sync();
        self.out.ready(self.state.tx.status_byte());
        self.out.flush().await
    }

    /// Clear a stale cancel so it cannot hit the next query, unless the client is gone.
    pub(crate) fn arm_cancel(&self) {
        if !self.disconnected.load(Ordering::SeqCst) {
            self.cancel.reset();
        }
    }
}
