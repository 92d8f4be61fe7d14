use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::service::ProxyService;

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<ProxyService>,
    buffer: Vec<u8>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, service: Arc<ProxyService>) -> Self {
        Self {
            stream,
            peer,
            service,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        Ok(Some(req)) => ConnectionState::Processing(req),
                        Ok(None) => ConnectionState::Closed,
                        Err(e) => {
                            tracing::debug!(peer = %self.peer, error = ?e, "Malformed request");
                            let writer = ResponseWriter::new(&Response::bad_request());
                            ConnectionState::Writing(writer, false)
                        }
                    };
                }

                ConnectionState::Processing(req) => {
                    let service = Arc::clone(&self.service);

                    match service.route(&req.path) {
                        Some(route) => {
                            // The session takes over the socket; the
                            // connection ends with it.
                            service
                                .forwarder()
                                .forward(&mut self.stream, &req, &route, Some(self.peer))
                                .await;
                            self.state = ConnectionState::Closed;
                        }
                        None => {
                            let response = service.fallback().respond(&req);
                            tracing::debug!(
                                method = %req.method,
                                path = %req.path,
                                status = response.status.as_u16(),
                                "Served by fallback"
                            );
                            let writer = ResponseWriter::new(&response);
                            self.state = ConnectionState::Writing(writer, req.keep_alive());
                        }
                    }
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    self.state = if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    };
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Reads one request. `Ok(None)` means the client closed cleanly.
    pub async fn read_request(&mut self) -> anyhow::Result<Result<Option<Request>, ParseError>> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(Ok(Some(request)));
                }

                Err(ParseError::Incomplete) => {}

                Err(e) => return Ok(Err(e)),
            }

            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(Ok(None));
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}
