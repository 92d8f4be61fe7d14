//! Upstream connection and wire helpers
//!
//! Builds the forwarded request for a matched rule, connects to the rule's
//! target and reads the upstream response head. Body relaying lives in
//! [`forwarder`](crate::proxy::forwarder).

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::QueryMode;
use crate::error::ProxyError;
use crate::http::headers::Headers;
use crate::http::parser::find_headers_end;
use crate::http::request::{Method, Request};
use crate::http::response::ResponseHead;
use crate::proxy::rule::ProxyRule;

/// Largest upstream response head accepted.
pub const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// How the upstream response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    /// Relayed until the upstream closes; also covers chunked bodies, which
    /// are passed through undecoded.
    UntilClose,
}

impl BodyFraming {
    pub fn for_response(method: Method, head: &ResponseHead) -> Self {
        if method == Method::HEAD || head.is_bodiless_status() {
            return BodyFraming::Empty;
        }
        if head.headers.has_token("Transfer-Encoding", "chunked") {
            return BodyFraming::UntilClose;
        }
        match head.content_length() {
            Some(0) => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::UntilClose,
        }
    }
}

/// Opens the upstream socket, bounded by `connect_timeout`.
pub async fn connect(address: &str, connect_timeout: Duration) -> Result<TcpStream, ProxyError> {
    let stream = timeout(connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| ProxyError::ConnectTimeout {
            address: address.to_string(),
            timeout: connect_timeout,
        })?
        .map_err(|source| ProxyError::UpstreamConnect {
            address: address.to_string(),
            source,
        })?;

    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Request target sent upstream: the target's base path joined with the
/// rewritten path, followed by the query selected by the rule's
/// [`QueryMode`]. An empty rewritten path maps to the target's own path,
/// which is at least `/`.
pub fn request_target(rule: &ProxyRule, rewritten: &str) -> String {
    let (path, client_query) = match rewritten.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rewritten, None),
    };
    let client_query = client_query.filter(|q| !q.is_empty());
    let target_query = rule.target().query().filter(|q| !q.is_empty());

    let base = rule.target().path();
    let mut target = if path.is_empty() {
        base.to_string()
    } else {
        let base = base.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    };
    if target.is_empty() {
        target.push('/');
    }

    let query = match rule.query_mode() {
        QueryMode::Fixed => target_query.map(str::to_string),
        QueryMode::Forward => client_query.map(str::to_string),
        QueryMode::Merge => match (target_query, client_query) {
            (Some(t), Some(c)) => Some(format!("{}&{}", t, c)),
            (t, c) => t.or(c).map(str::to_string),
        },
    };

    if let Some(query) = query {
        target.push('?');
        target.push_str(&query);
    }
    target
}

/// Serializes the request forwarded upstream.
///
/// Hop-by-hop headers are dropped and `Connection: close` is sent because a
/// session never reuses its upstream socket. `Host` becomes the target
/// authority when the rule changes origin or the client sent none.
pub fn build_upstream_request(
    request: &Request,
    rule: &ProxyRule,
    target: &str,
    peer: Option<SocketAddr>,
) -> Vec<u8> {
    let mut headers = request.headers.clone();
    headers.strip_hop_by_hop(&[]);

    let client_host = request.header("Host").map(str::to_string);
    if rule.change_origin() || client_host.is_none() {
        headers.insert("Host", rule.authority());
    }

    if rule.xfwd() {
        if let Some(peer) = peer {
            let ip = peer.ip().to_string();
            let forwarded_for = match request.header("X-Forwarded-For") {
                Some(prior) => format!("{}, {}", prior, ip),
                None => ip,
            };
            headers.insert("X-Forwarded-For", forwarded_for);
        }
        headers.insert("X-Forwarded-Proto", "http");
        if let Some(host) = &client_host {
            headers.insert("X-Forwarded-Host", host.as_str());
        }
    }

    for (name, value) in rule.headers() {
        headers.insert(name.as_str(), value.as_str());
    }

    if !request.body.is_empty() {
        headers.insert("Content-Length", request.body.len().to_string());
    }

    headers.insert("Connection", "close");

    let mut buffer = Vec::with_capacity(256 + request.body.len());
    buffer.extend_from_slice(format!("{} {} HTTP/1.1\r\n", request.method, target).as_bytes());
    for (key, value) in headers.iter() {
        buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
    }
    buffer.extend_from_slice(b"\r\n");
    buffer.extend_from_slice(&request.body);

    buffer
}

/// Reads until the end of the response head.
///
/// Body bytes that arrived with the head are left in `buffer`.
pub async fn read_response_head<R>(
    upstream: &mut R,
    buffer: &mut BytesMut,
) -> Result<ResponseHead, ProxyError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_headers_end(buffer) {
            let head = buffer.split_to(end + 4);
            return parse_response_head(&head);
        }

        // Prevent unbounded header growth
        if buffer.len() > MAX_RESPONSE_HEAD {
            return Err(ProxyError::InvalidResponse("response head too large".into()));
        }

        buffer.reserve(8192);
        let n = upstream
            .read_buf(buffer)
            .await
            .map_err(ProxyError::UpstreamStream)?;

        if n == 0 {
            return Err(ProxyError::InvalidResponse(
                "connection closed before response head".into(),
            ));
        }
    }
}

/// Parses a status line and headers (trailing blank line optional).
pub fn parse_response_head(bytes: &[u8]) -> Result<ResponseHead, ProxyError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ProxyError::InvalidResponse("response head is not UTF-8".into()))?;

    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ProxyError::InvalidResponse("empty response".into()))?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ProxyError::InvalidResponse(format!(
            "invalid status line: {}",
            status_line
        )));
    }

    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|s| (100..1000).contains(s))
        .ok_or_else(|| ProxyError::InvalidResponse(format!("invalid status line: {}", status_line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ProxyError::InvalidResponse(format!("invalid header line: {}", line)))?;
        headers.append(key.trim(), value.trim());
    }

    Ok(ResponseHead {
        version: version.to_string(),
        status,
        reason,
        headers,
    })
}
