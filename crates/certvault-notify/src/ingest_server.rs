// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal CERT ingest endpoint.
//
// Listens on a TCP port for `POST /api/v1/cert/ingest`, reads the HTTP
// framing just far enough to get the `X-CERT-Signature` header and exactly
// `Content-Length` body bytes, runs the `IngestVerifier`, and answers with a
// small JSON document. Every response closes the connection.
//
// Status codes:
//   200  verified and parsed; body is the `IngestAck`
//   400  verified but not JSON
//   401  missing or invalid signature
//   404  unknown path, 405 wrong method
//   408  client too slow, 411 missing Content-Length, 413 body too large

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use certvault_core::error::{CertVaultError, Result};
use certvault_core::types::IngestAck;

use crate::ingest::IngestVerifier;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Route the CERT exposes for escalation pushes.
pub const INGEST_PATH: &str = "/api/v1/cert/ingest";

/// Upper bound on the request line plus headers.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Upper bound on a request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// A client must deliver its whole request within this window.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Verified escalations kept for inspection; older ones are dropped.
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// HTTP framing
// ---------------------------------------------------------------------------

/// The parts of an HTTP/1.1 request the ingest endpoint cares about.
#[derive(Debug, Clone)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Why a request could not be read. Each maps to an HTTP status.
#[derive(Debug)]
pub(crate) enum ReadError {
    Closed,
    Malformed,
    TooLarge,
    LengthRequired,
    TimedOut,
    Io(std::io::Error),
}

impl ReadError {
    fn status(&self) -> Option<u16> {
        match self {
            Self::Malformed => Some(400),
            Self::TimedOut => Some(408),
            Self::LengthRequired => Some(411),
            Self::TooLarge => Some(413),
            Self::Closed | Self::Io(_) => None,
        }
    }
}

/// Parsed request head plus where the body starts in the buffer.
struct RequestHead {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body_offset: usize,
}

/// Parse the request line and headers once `\r\n\r\n` has arrived.
fn parse_head(data: &[u8]) -> Option<std::result::Result<RequestHead, ReadError>> {
    let header_end = find_subsequence(data, b"\r\n\r\n")?;
    let Ok(head) = std::str::from_utf8(&data[..header_end]) else {
        return Some(Err(ReadError::Malformed));
    };

    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(path), Some(_version)) =
        (request_line.next(), request_line.next(), request_line.next())
    else {
        return Some(Err(ReadError::Malformed));
    };

    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Some(Err(ReadError::Malformed));
        };
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }

    Some(Ok(RequestHead {
        method: method.to_owned(),
        path: path.to_owned(),
        headers,
        body_offset: header_end + 4,
    }))
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read one request: headers up to `MAX_HEADER_BYTES`, then exactly
/// `Content-Length` body bytes up to `max_body`.
pub(crate) async fn read_request(
    stream: &mut TcpStream,
    max_body: usize,
) -> std::result::Result<HttpRequest, ReadError> {
    match tokio::time::timeout(READ_TIMEOUT, read_request_inner(stream, max_body)).await {
        Ok(result) => result,
        Err(_) => Err(ReadError::TimedOut),
    }
}

async fn read_request_inner(
    stream: &mut TcpStream,
    max_body: usize,
) -> std::result::Result<HttpRequest, ReadError> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    let head = loop {
        if let Some(parsed) = parse_head(&buf) {
            break parsed?;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(ReadError::TooLarge);
        }
        let n = stream.read(&mut chunk).await.map_err(ReadError::Io)?;
        if n == 0 {
            return Err(if buf.is_empty() {
                ReadError::Closed
            } else {
                ReadError::Malformed
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let content_length = head
        .headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| v.parse::<usize>().map_err(|_| ReadError::Malformed))
        .transpose()?;

    let content_length = match (content_length, head.method.as_str()) {
        (Some(len), _) => len,
        (None, "POST") => return Err(ReadError::LengthRequired),
        (None, _) => 0,
    };
    if content_length > max_body {
        return Err(ReadError::TooLarge);
    }

    let mut body = buf.split_off(head.body_offset.min(buf.len()));
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.map_err(ReadError::Io)?;
        if n == 0 {
            return Err(ReadError::Malformed);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method: head.method,
        path: head.path,
        headers: head.headers,
        body,
    })
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Write a complete `Connection: close` JSON response.
pub(crate) async fn send_response(stream: &mut TcpStream, status: u16, body: &[u8]) -> Result<()> {
    send_response_with(stream, status, &[], body).await
}

/// Like [`send_response`] with extra header lines.
pub(crate) async fn send_response_with(
    stream: &mut TcpStream,
    status: u16,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let mut head = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n",
        reason_phrase(status),
        body.len()
    );
    for (name, value) in extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|e| CertVaultError::IngestServer(format!("write HTTP headers: {e}")))?;
    stream
        .write_all(body)
        .await
        .map_err(|e| CertVaultError::IngestServer(format!("write body: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| CertVaultError::IngestServer(format!("flush: {e}")))?;
    Ok(())
}

fn detail(message: &str) -> Vec<u8> {
    serde_json::json!({ "detail": message }).to_string().into_bytes()
}

// ---------------------------------------------------------------------------
// Shared state passed to connection handlers
// ---------------------------------------------------------------------------

/// A verified escalation as received by the endpoint.
#[derive(Debug, Clone)]
pub struct ReceivedEscalation {
    pub ack: IngestAck,
    pub payload: serde_json::Value,
    pub peer: SocketAddr,
}

/// Bounded record of recent escalations plus a running total.
struct Inbox {
    recent: Mutex<VecDeque<ReceivedEscalation>>,
    capacity: usize,
    accepted: AtomicU64,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            accepted: AtomicU64::new(0),
        }
    }

    fn push(&self, received: ReceivedEscalation) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut recent) = self.recent.lock() {
            while recent.len() >= self.capacity {
                recent.pop_front();
            }
            recent.push_back(received);
        }
    }
}

struct SharedState {
    verifier: IngestVerifier,
    inbox: Arc<Inbox>,
    active_connections: Arc<AtomicU32>,
}

/// Lifecycle state of the ingest endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
}

// ---------------------------------------------------------------------------
// IngestServer
// ---------------------------------------------------------------------------

/// Embedded CERT ingest endpoint.
pub struct IngestServer {
    bind_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    status: ServerStatus,
    verifier: IngestVerifier,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
    inbox: Arc<Inbox>,
}

impl IngestServer {
    /// Create a stopped server. Port 0 picks a free port on [`start`].
    ///
    /// [`start`]: Self::start
    pub fn new(bind_addr: SocketAddr, verifier: IngestVerifier) -> Self {
        Self {
            bind_addr,
            local_addr: None,
            status: ServerStatus::Stopped,
            verifier,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
            inbox: Arc::new(Inbox::new(DEFAULT_INBOX_CAPACITY)),
        }
    }

    /// Keep at most `capacity` recent escalations. Call before [`start`].
    ///
    /// [`start`]: Self::start
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox = Arc::new(Inbox::new(capacity));
        self
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// The bound address once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Full ingest URL once running.
    pub fn ingest_url(&self) -> Option<String> {
        self.local_addr.map(|addr| format!("http://{addr}{INGEST_PATH}"))
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// The most recent accepted escalations, oldest first.
    pub fn received(&self) -> Vec<ReceivedEscalation> {
        self.inbox
            .recent
            .lock()
            .map(|recent| recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of escalations accepted since construction.
    pub fn accepted_total(&self) -> u64 {
        self.inbox.accepted.load(Ordering::Relaxed)
    }

    /// Bind and start accepting connections in a background task.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let (ServerStatus::Running, Some(addr)) = (self.status, self.local_addr) {
            debug!(%addr, "ingest server already running");
            return Ok(addr);
        }

        self.status = ServerStatus::Starting;

        let (listener, local_addr) = match Self::bind_listener(self.bind_addr).await {
            Ok(bound) => bound,
            Err(e) => {
                self.status = ServerStatus::Stopped;
                return Err(e);
            }
        };

        info!(%local_addr, path = INGEST_PATH, "CERT ingest endpoint listening");

        let shared = Arc::new(SharedState {
            verifier: self.verifier.clone(),
            inbox: Arc::clone(&self.inbox),
            active_connections: Arc::clone(&self.active_connections),
        });
        let shutdown = Arc::clone(&self.shutdown_signal);

        self.task_handle = Some(tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, shared).await;
        }));
        self.local_addr = Some(local_addr);
        self.status = ServerStatus::Running;
        Ok(local_addr)
    }

    async fn bind_listener(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CertVaultError::IngestServer(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CertVaultError::IngestServer(format!("local address: {e}")))?;
        Ok((listener, local_addr))
    }

    /// Signal the accept loop to exit and wait for it.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        self.shutdown_signal.notify_one();
        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| CertVaultError::IngestServer(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        info!(addr = ?self.local_addr, "CERT ingest endpoint stopped");
        self.local_addr = None;
        Ok(())
    }

    async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, shared: Arc<SharedState>) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!(%peer, "incoming ingest connection");
                            let state = Arc::clone(&shared);
                            tokio::spawn(async move {
                                state.active_connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = Self::handle_connection(stream, peer, &state).await {
                                    warn!(%peer, error = %e, "connection handler error");
                                }
                                state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        peer: SocketAddr,
        state: &SharedState,
    ) -> Result<()> {
        let request = match read_request(&mut stream, MAX_BODY_BYTES).await {
            Ok(request) => request,
            Err(ReadError::Io(e)) => {
                warn!(%peer, error = %e, "connection read failed");
                return Ok(());
            }
            Err(e) => {
                debug!(%peer, error = ?e, "unreadable request");
                if let Some(status) = e.status() {
                    send_response(&mut stream, status, &detail(reason_phrase(status))).await?;
                }
                return Ok(());
            }
        };

        let (status, body) = route(&request, peer, state);
        send_response(&mut stream, status, &body).await?;
        let _ = stream.shutdown().await;

        debug!(%peer, status, "ingest response sent");
        Ok(())
    }
}

/// Map one request to a status and JSON body.
fn route(request: &HttpRequest, peer: SocketAddr, state: &SharedState) -> (u16, Vec<u8>) {
    let path = request.path.split('?').next().unwrap_or_default();
    if path != INGEST_PATH {
        return (404, detail("not found"));
    }
    if request.method != "POST" {
        return (405, detail("method not allowed"));
    }

    let header = request.header(certvault_security::signature::SIGNATURE_HEADER);
    match state.verifier.accept_parsed(&request.body, header) {
        Ok((ack, payload)) => {
            let body = serde_json::to_vec(&ack).unwrap_or_else(|_| detail("accepted"));
            state.inbox.push(ReceivedEscalation { ack, payload, peer });
            (200, body)
        }
        Err(CertVaultError::SignatureInvalid) => (401, detail("invalid signature")),
        Err(CertVaultError::Serialization(_)) => (400, detail("invalid JSON")),
        Err(e) => {
            error!(%peer, error = %e, "ingest failed");
            (500, detail("internal error"))
        }
    }
}

impl Drop for IngestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}
