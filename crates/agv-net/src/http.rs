//! Minimal HTTP/1.1 server for the setup portal and the dashboard.
//!
//! Connection tasks only parse and reply.  Each parsed [`Request`] is sent
//! to the service loop as an [`HttpExchange`] together with a one-shot reply
//! channel, so all routing and state access happens on the loop.  If the
//! loop never answers (the server was torn down by a mode switch, the queue
//! is full, or the reply timed out) the client gets `503`.
//!
//! Every response closes the connection.

use std::net::SocketAddr;
use std::time::Duration;

use agv_types::AgvError;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::listener::{self, ServerTask};

/// Largest accepted request head (request line + headers).
pub const MAX_HEAD_BYTES: usize = 8 * 1024;
/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 4 * 1024;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    pub query: Option<String>,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Build a request directly; used by route handlers under test.
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Token from an `Authorization: Bearer <token>` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }
}

/// Why a request could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParseError {
    Malformed(&'static str),
    TooLarge,
    /// The peer closed before sending a complete request.
    Closed,
}

/// Parse a complete request from `buf`.  `Ok(None)` means more bytes are
/// needed.
pub(crate) fn parse_request(buf: &[u8]) -> Result<Option<Request>, ParseError> {
    let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return if buf.len() > MAX_HEAD_BYTES {
            Err(ParseError::TooLarge)
        } else {
            Ok(None)
        };
    };
    if head_end > MAX_HEAD_BYTES {
        return Err(ParseError::TooLarge);
    }

    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| ParseError::Malformed("request head is not UTF-8"))?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::Malformed("bad request line"));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::Malformed("unsupported HTTP version"));
    }

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or(ParseError::Malformed("bad header line"))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    let content_length = match headers.iter().find(|(k, _)| k == "content-length") {
        Some((_, v)) => v
            .parse::<usize>()
            .map_err(|_| ParseError::Malformed("bad content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(ParseError::TooLarge);
    }

    let body_start = head_end + 4;
    if buf.len() < body_start + content_length {
        return Ok(None);
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };

    Ok(Some(Request {
        method: Method::parse(method),
        path,
        query,
        headers,
        body: buf[body_start..body_start + content_length].to_vec(),
    }))
}

async fn read_request(stream: &mut TcpStream) -> Result<Request, ParseError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|_| ParseError::Closed)?;
        if n == 0 {
            return Err(ParseError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(request) = parse_request(&buf)? {
            return Ok(request);
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    content_type: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            headers: Vec::new(),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            headers: Vec::new(),
            body: body.into().into_bytes(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    /// `302 Found` to `location`.
    pub fn redirect(location: &str) -> Self {
        let mut response = Self::text(302, "");
        response.headers.push(("Location", location.to_string()));
        response
    }

    /// Captive-portal probes and every failure to reach the service loop.
    pub fn unavailable() -> Self {
        Self::text(503, "Service Unavailable")
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("content-type") {
            return Some(self.content_type);
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body parsed as JSON; `Value::Null` when it is not JSON.
    pub fn json_body(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len()
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// One request waiting for the service loop.
#[derive(Debug)]
pub struct HttpExchange {
    pub request: Request,
    pub peer: SocketAddr,
    reply: oneshot::Sender<Response>,
}

impl HttpExchange {
    /// Send the reply.  A client that already went away is ignored.
    pub fn respond(self, response: Response) {
        let _ = self.reply.send(response);
    }
}

/// A running HTTP server owned by the controller's transport set.
#[derive(Debug)]
pub(crate) struct HttpServerHandle {
    pub(crate) addr: SocketAddr,
    pub(crate) exchanges: mpsc::Receiver<HttpExchange>,
    _task: ServerTask,
}

/// Bind `addr` and start accepting.  Must run inside a tokio runtime.
pub(crate) fn spawn_http_server(
    addr: SocketAddr,
    queue_depth: usize,
) -> Result<HttpServerHandle, AgvError> {
    let listener = listener::bind(addr)?;
    let bound = listener
        .local_addr()
        .map_err(|e| AgvError::Transport(format!("local_addr: {e}")))?;
    let (tx, exchanges) = mpsc::channel(queue_depth.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept = tokio::spawn(accept_loop(listener, tx, shutdown_rx));

    info!(addr = %bound, "HTTP server listening");
    Ok(HttpServerHandle {
        addr: bound,
        exchanges,
        _task: ServerTask::new(accept, shutdown_tx),
    })
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<HttpExchange>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(stream, peer, tx.clone(), shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "HTTP accept error"),
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("HTTP accept loop stopped");
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<HttpExchange>,
    mut shutdown: watch::Receiver<bool>,
) {
    let request = match timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(ParseError::Closed)) => return,
        Ok(Err(ParseError::TooLarge)) => {
            write_response(&mut stream, peer, &Response::text(413, "Payload Too Large")).await;
            return;
        }
        Ok(Err(ParseError::Malformed(why))) => {
            debug!(%peer, why, "malformed HTTP request");
            write_response(&mut stream, peer, &Response::text(400, why)).await;
            return;
        }
        Err(_) => {
            write_response(&mut stream, peer, &Response::text(408, "Request Timeout")).await;
            return;
        }
    };

    debug!(%peer, method = ?request.method, path = %request.path, "HTTP request");
    let (reply_tx, reply_rx) = oneshot::channel();
    let exchange = HttpExchange {
        request,
        peer,
        reply: reply_tx,
    };

    let response = if tx.try_send(exchange).is_err() {
        Response::unavailable()
    } else {
        tokio::select! {
            reply = timeout(REPLY_TIMEOUT, reply_rx) => match reply {
                Ok(Ok(response)) => response,
                _ => Response::unavailable(),
            },
            _ = shutdown.changed() => Response::unavailable(),
        }
    };

    write_response(&mut stream, peer, &response).await;
}

async fn write_response(stream: &mut TcpStream, peer: SocketAddr, response: &Response) {
    if let Err(e) = stream.write_all(&response.to_bytes()).await {
        debug!(%peer, error = %e, "HTTP write error");
        return;
    }
    let _ = stream.shutdown().await;
}
