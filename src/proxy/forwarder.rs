//! Request forwarding and response streaming
//!
//! A [`ProxySession`] is created for every matched request. It borrows the
//! client stream exclusively and owns one freshly opened upstream socket.
//! The response body is relayed chunk by chunk as it arrives, so unbounded
//! streams such as MJPEG feeds pass straight through.
//!
//! ```text
//!   Init ──connect──▶ Connected ──head relayed──▶ Streaming ──▶ Closing
//!     │                   │
//!     └──── error ────────┴──▶ Failed (502/504 sent to client)
//! ```
//!
//! While waiting for the upstream, the client socket is watched as well. A
//! client EOF or error cancels the session and drops the upstream socket.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::error::ProxyError;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseHead, StatusCode};
use crate::http::writer::{serialize_head, serialize_response};
use crate::proxy::matcher::RouteMatch;
use crate::proxy::rule::ProxyRule;
use crate::proxy::upstream::{self, BodyFraming};

/// Read size for upstream body chunks
const BUFFER_SIZE: usize = 8192;

/// Default bound for upstream connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connected,
    Streaming,
    Closing,
    Failed,
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The upstream body was relayed completely.
    Completed { status: u16, bytes: u64 },
    /// The client went away; the upstream socket was closed.
    ClientClosed { bytes: u64 },
    /// The upstream failed after the response head was relayed. The client
    /// connection was closed without a new status.
    Aborted { bytes: u64, error: ProxyError },
    /// No usable upstream response; a gateway error was sent to the client.
    Failed { status: StatusCode, error: ProxyError },
}

/// Forwards matched requests; one [`ProxySession`] per call.
#[derive(Debug, Clone)]
pub struct Forwarder {
    connect_timeout: Duration,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Forwarder {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Proxies `request` according to `route`, writing the response to
    /// `client`. Returns once either side has closed.
    pub async fn forward<C>(
        &self,
        client: &mut C,
        request: &Request,
        route: &RouteMatch<'_>,
        peer: Option<SocketAddr>,
    ) -> SessionOutcome
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        ProxySession::new(route.rule, client)
            .run(request, &route.upstream_path, peer, self.connect_timeout)
            .await
    }
}

pub struct ProxySession<'a, C> {
    rule: &'a ProxyRule,
    client: &'a mut C,
    upstream: Option<TcpStream>,
    state: SessionState,
    head_sent: bool,
    bytes: u64,
}

impl<'a, C> ProxySession<'a, C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(rule: &'a ProxyRule, client: &'a mut C) -> Self {
        Self {
            rule,
            client,
            upstream: None,
            state: SessionState::Init,
            head_sent: false,
            bytes: 0,
        }
    }

    pub async fn run(
        mut self,
        request: &Request,
        upstream_path: &str,
        peer: Option<SocketAddr>,
        connect_timeout: Duration,
    ) -> SessionOutcome {
        let target = upstream::request_target(self.rule, upstream_path);

        debug!(
            prefix = self.rule.prefix(),
            upstream = self.rule.address(),
            method = %request.method,
            path = %request.path,
            target = %target,
            "Forwarding request"
        );

        let outcome = match self.exchange(request, &target, peer, connect_timeout).await {
            Ok(status) => SessionOutcome::Completed {
                status,
                bytes: self.bytes,
            },
            Err(ProxyError::ClientDisconnected) => SessionOutcome::ClientClosed { bytes: self.bytes },
            Err(error) if self.head_sent => SessionOutcome::Aborted {
                bytes: self.bytes,
                error,
            },
            Err(error) => {
                let status = error.gateway_status();
                self.send_gateway_error(status, &error).await;
                SessionOutcome::Failed { status, error }
            }
        };

        self.close(&outcome).await;
        self.log_outcome(request, &outcome);
        outcome
    }

    async fn exchange(
        &mut self,
        request: &Request,
        target: &str,
        peer: Option<SocketAddr>,
        connect_timeout: Duration,
    ) -> Result<u16, ProxyError> {
        let stream = upstream::connect(self.rule.address(), connect_timeout).await?;
        let upstream = self.upstream.insert(stream);
        transition(&mut self.state, SessionState::Connected);

        let request_bytes = upstream::build_upstream_request(request, self.rule, target, peer);
        upstream
            .write_all(&request_bytes)
            .await
            .map_err(ProxyError::UpstreamStream)?;

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        let mut probe = [0u8; 512];

        // Interim heads (100 Continue, 103 Early Hints) are dropped; the
        // request body was already sent in full.
        let head = loop {
            let head = tokio::select! {
                head = upstream::read_response_head(&mut *upstream, &mut buffer) => head?,
                _ = client_gone(&mut *self.client, &mut probe) => {
                    return Err(ProxyError::ClientDisconnected);
                }
            };
            if !head.is_interim() {
                break head;
            }
            trace!(status = head.status, "Skipping interim upstream response");
        };

        let framing = BodyFraming::for_response(request.method, &head);
        write_client(&mut *self.client, &client_head(&head)).await?;
        self.head_sent = true;
        transition(&mut self.state, SessionState::Streaming);

        relay_body(
            &mut *self.client,
            upstream,
            &mut buffer,
            framing,
            &mut self.bytes,
        )
        .await?;

        Ok(head.status)
    }

    async fn send_gateway_error(&mut self, status: StatusCode, error: &ProxyError) {
        let response = Response::gateway_error(status, &error.to_string());
        if let Err(e) = write_client(&mut *self.client, &serialize_response(&response)).await {
            trace!(error = %e, "Client gone before gateway error was written");
        }
    }

    /// Drops the upstream socket and shuts down the client write half.
    async fn close(&mut self, outcome: &SessionOutcome) {
        let next = match outcome {
            SessionOutcome::Failed { .. } => SessionState::Failed,
            _ => SessionState::Closing,
        };
        transition(&mut self.state, next);

        drop(self.upstream.take());

        if !matches!(outcome, SessionOutcome::ClientClosed { .. }) {
            let _ = self.client.shutdown().await;
        }
    }

    fn log_outcome(&self, request: &Request, outcome: &SessionOutcome) {
        let prefix = self.rule.prefix();
        let upstream = self.rule.address();
        match outcome {
            SessionOutcome::Completed { status, bytes } => info!(
                prefix,
                upstream,
                path = %request.path,
                status,
                bytes,
                "Proxied response completed"
            ),
            SessionOutcome::ClientClosed { bytes } => info!(
                prefix,
                upstream,
                path = %request.path,
                bytes,
                "Client disconnected, upstream closed"
            ),
            SessionOutcome::Aborted { bytes, error } => warn!(
                prefix,
                upstream,
                path = %request.path,
                bytes,
                error = %error,
                "Upstream stream aborted"
            ),
            SessionOutcome::Failed { status, error } => warn!(
                prefix,
                upstream,
                path = %request.path,
                status = status.as_u16(),
                error = %error,
                "Upstream request failed"
            ),
        }
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    trace!(from = ?state, to = ?next, "Session state");
    *state = next;
}

/// Upstream head as sent to the client.
fn client_head(head: &ResponseHead) -> Vec<u8> {
    let mut headers = head.headers.clone();
    // The body keeps its upstream framing, so its encoding header stays.
    headers.strip_hop_by_hop(&["transfer-encoding"]);
    headers.insert("Connection", "close");
    serialize_head(head.status, &head.reason, &headers)
}

async fn relay_body<C>(
    client: &mut C,
    upstream: &mut TcpStream,
    buffer: &mut BytesMut,
    framing: BodyFraming,
    bytes: &mut u64,
) -> Result<(), ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut remaining = match framing {
        BodyFraming::Empty => return Ok(()),
        BodyFraming::Length(n) => Some(n),
        BodyFraming::UntilClose => None,
    };

    // Body bytes that arrived together with the head.
    if !buffer.is_empty() {
        let take = limit(buffer.len(), remaining);
        write_client(client, &buffer[..take]).await?;
        consume(&mut remaining, bytes, take);
        buffer.clear();
    }

    let mut chunk = vec![0u8; BUFFER_SIZE];
    let mut probe = [0u8; 512];

    while remaining != Some(0) {
        tokio::select! {
            read = upstream.read(&mut chunk) => {
                let n = read.map_err(ProxyError::UpstreamStream)?;
                if n == 0 {
                    if remaining.is_some() {
                        return Err(ProxyError::UpstreamStream(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "upstream closed before end of body",
                        )));
                    }
                    return Ok(());
                }

                let take = limit(n, remaining);
                write_client(client, &chunk[..take]).await?;
                consume(&mut remaining, bytes, take);
            }
            _ = client_gone(client, &mut probe) => {
                return Err(ProxyError::ClientDisconnected);
            }
        }
    }

    Ok(())
}

fn limit(available: usize, remaining: Option<u64>) -> usize {
    match remaining {
        Some(r) => available.min(usize::try_from(r).unwrap_or(usize::MAX)),
        None => available,
    }
}

fn consume(remaining: &mut Option<u64>, bytes: &mut u64, n: usize) {
    if let Some(r) = remaining {
        *r -= n as u64;
    }
    *bytes += n as u64;
}

async fn write_client<C>(client: &mut C, data: &[u8]) -> Result<(), ProxyError>
where
    C: AsyncWrite + Unpin,
{
    client
        .write_all(data)
        .await
        .map_err(|_| ProxyError::ClientDisconnected)?;
    client
        .flush()
        .await
        .map_err(|_| ProxyError::ClientDisconnected)
}

/// Resolves once the client has closed its side or errored. Anything the
/// client sends meanwhile is discarded.
async fn client_gone<C>(client: &mut C, probe: &mut [u8])
where
    C: AsyncRead + Unpin,
{
    loop {
        match client.read(probe).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}
