// src/conn.rs
use std::io::{Read, Write};

use tracing::{info, warn};

use crate::error::ConnError;
use crate::http::Exchange;
use crate::metrics::ServerMetrics;
use crate::parser::Parser;
use crate::receiver::recv_request;
use crate::response::send_response;
use crate::router::Router;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the first byte of a request.
    Idle,
    /// Receiving and dispatching a request.
    Active,
    /// Sending the response.
    Streaming,
    /// Cycle finished; the reactor decides whether the slot is kept.
    Done,
}

/// What the reactor does with the connection after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    KeepAlive,
    Close,
}

/// One accepted client.
pub struct ConnectionSlot<S> {
    pub socket: S,
    pub parser: Parser,
    pub keep_alive: bool,
    pub state: ConnState,
    /// Readiness from the last poll round.
    pub ready: bool,
}

impl<S> ConnectionSlot<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            parser: Parser::new(),
            keep_alive: false,
            state: ConnState::Idle,
            ready: false,
        }
    }

    pub fn into_socket(self) -> S {
        self.socket
    }
}

/// Serves one request on `slot` using the shared buffer pair.
///
/// Receive failures close the connection without a response. Otherwise the
/// response is sent and the connection is kept only if the client asked for
/// keep-alive and the body was framed correctly.
pub fn handle_conn<S: Read + Write>(
    slot: &mut ConnectionSlot<S>,
    exchange: &mut Exchange,
    router: &Router,
    metrics: &ServerMetrics,
) -> Outcome {
    exchange.reset();
    slot.parser.reset();
    slot.state = ConnState::Active;

    let Exchange { request: req, response: resp } = exchange;

    let route = match recv_request(&mut slot.socket, &mut slot.parser, req, resp, router) {
        Ok((_, route)) => route,
        Err(ConnError::PeerClosed) => {
            info!("peer closed connection");
            req.release();
            slot.state = ConnState::Done;
            return Outcome::Close;
        }
        Err(e) => {
            warn!("dropping connection: {}", e);
            req.release();
            slot.state = ConnState::Done;
            return Outcome::Close;
        }
    };
    metrics.inc_requests();

    slot.keep_alive = req.keep_alive();
    slot.state = ConnState::Streaming;

    let outcome = match send_response(&mut slot.socket, req, resp, route, slot.keep_alive) {
        Ok(sent) => {
            metrics.add_bytes_sent(sent.total());
            info!(
                method = req.method().as_str(),
                url = %req.url(),
                status = resp.status(),
                received = req.received(),
                sent = sent.total(),
                "request served"
            );
            if slot.keep_alive && sent.framed {
                Outcome::KeepAlive
            } else {
                Outcome::Close
            }
        }
        Err(e) => {
            warn!(url = %req.url(), "failed to send response: {}", e);
            Outcome::Close
        }
    };

    req.release();
    slot.state = ConnState::Done;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HandlerError, HandlerResult};
    use crate::http::{Method, Request, Response};
    use crate::router::Route;
    use crate::testing::MockStream;
    use std::io::Write as _;

    fn hello_router() -> Router {
        let mut router = Router::new();
        router.add(Route::web(Method::Get, "/hello", |_: &mut Request, resp: &mut Response| -> HandlerResult {
            resp.write_all(b"hello")?;
            Ok(())
        }));
        router.add(Route::rest(Method::Get, "/half", |_: &mut Request, resp: &mut Response| -> HandlerResult {
            resp.write_all(b"{\"partial\":")?;
            Err(HandlerError::Internal("serializer gave up".into()))
        }));
        router
    }

    fn run(raw: &[u8]) -> (Outcome, String) {
        let router = hello_router();
        let metrics = ServerMetrics::default();
        let mut exchange = Exchange::new();
        let mut slot = ConnectionSlot::new(MockStream::with_reads([raw]));

        let outcome = handle_conn(&mut slot, &mut exchange, &router, &metrics);
        assert_eq!(slot.state, ConnState::Done);
        (outcome, slot.into_socket().written_str())
    }

    #[test]
    fn test_keep_alive_cycle() {
        let (outcome, out) = run(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(outcome, Outcome::KeepAlive);
        assert!(out.starts_with("HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n"));
        assert!(out.contains("Content-Type: text/plain\r\n"));
        assert!(out.ends_with("Content-Length: 5\r\n\r\nhello"));
    }

    #[test]
    fn test_connection_close_requested() {
        let (outcome, out) = run(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert_eq!(outcome, Outcome::Close);
        assert!(out.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_not_found_keeps_connection() {
        let (outcome, out) = run(b"GET /nope HTTP/1.1\r\n\r\n");
        assert_eq!(outcome, Outcome::KeepAlive);
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn test_failed_handler_with_written_body_closes() {
        // The 500 head still declares the 11 bytes the handler wrote before
        // failing, so the connection cannot carry another response.
        let (outcome, out) = run(b"GET /half HTTP/1.1\r\n\r\n");
        assert_eq!(outcome, Outcome::Close);
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(out.ends_with("Content-Length: 11\r\n\r\n"));
    }

    #[test]
    fn test_malformed_request_closes_silently() {
        let (outcome, out) = run(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n");
        assert_eq!(outcome, Outcome::Close);
        assert!(out.is_empty());
    }

    #[test]
    fn test_exchange_reused_between_cycles() {
        let router = hello_router();
        let metrics = ServerMetrics::default();
        let mut exchange = Exchange::new();
        let mut slot = ConnectionSlot::new(MockStream::with_reads([
            &b"GET /hello HTTP/1.1\r\n\r\n"[..],
            &b"GET /nope HTTP/1.1\r\n\r\n"[..],
        ]));

        assert_eq!(handle_conn(&mut slot, &mut exchange, &router, &metrics), Outcome::KeepAlive);
        assert_eq!(handle_conn(&mut slot, &mut exchange, &router, &metrics), Outcome::KeepAlive);
        assert_eq!(handle_conn(&mut slot, &mut exchange, &router, &metrics), Outcome::Close);

        let out = slot.into_socket().written_str();
        assert_eq!(out.matches("HTTP/1.1 ").count(), 2);
        assert!(out.ends_with("Content-Length: 0\r\n\r\n"));
        assert_eq!(metrics.snapshot().requests, 2);
    }
}
