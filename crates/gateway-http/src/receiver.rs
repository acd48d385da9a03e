// src/receiver.rs
use std::io::{self, Read};

use tracing::{debug, trace, warn};

use crate::error::ConnError;
use crate::http::{Request, Response};
use crate::parser::{Event, Head, Parser};
use crate::router::{self, Route, Router};

/// Reads one request into the shared receive buffer.
///
/// The route is resolved as soon as the head is parsed. Buffered routes are
/// dispatched once with the whole body. Streamed routes are dispatched for
/// every body chunk, and the buffer is rewound after each so bodies larger
/// than the buffer can be received. Returns the bytes read and the route.
pub fn recv_request<'r, S: Read>(
    sock: &mut S,
    parser: &mut Parser,
    req: &mut Request,
    resp: &mut Response,
    router: &'r Router,
) -> Result<(usize, Option<&'r Route>), ConnError> {
    let mut route: Option<&'r Route> = None;
    let mut head_seen = false;

    loop {
        if req.len >= req.capacity() {
            warn!(held = req.len, url = %req.url, "receive buffer full, dropping request");
            return Err(ConnError::RequestTooLarge);
        }

        let n = match sock.read(req.spare_mut()) {
            Ok(0) => return Err(ConnError::PeerClosed),
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(ConnError::Io(e)),
        };

        let fresh = req.commit(n);
        trace!(bytes = n, held = req.len, "received");

        let events = parser.execute(req.held(), fresh)?;
        for event in events {
            match event {
                Event::Head(head) => {
                    route = on_head(head, req, resp, router);
                    head_seen = true;
                }
                Event::Body { chunk, remaining } => {
                    req.payload_len += chunk.len() as u64;
                    match route {
                        Some(r) if r.is_streamed() => {
                            req.payload = chunk;
                            req.complete = remaining == 0;
                            router::dispatch(route, req, resp);
                        }
                        _ => {
                            if req.payload.is_empty() {
                                req.payload = chunk;
                            } else {
                                req.payload.end = chunk.end;
                            }
                        }
                    }
                }
                Event::Complete => {
                    let streamed = route.is_some_and(Route::is_streamed);
                    let already = streamed && !req.begins();
                    req.complete = true;
                    if !already {
                        router::dispatch(route, req, resp);
                    }
                }
            }
        }

        if req.complete {
            break;
        }

        // Streamed chunks have been handed over; start the buffer afresh.
        if head_seen && parser.in_body() && route.is_some_and(Route::is_streamed) {
            req.rewind();
        }
    }

    debug!(
        method = req.method.as_str(),
        url = %req.url,
        received = req.received,
        body = req.payload_len,
        "request received"
    );
    Ok((req.received, route))
}

fn on_head<'r>(
    head: Head,
    req: &mut Request,
    resp: &mut Response,
    router: &'r Router,
) -> Option<&'r Route> {
    req.method = head.method;
    req.keep_alive = head.keep_alive;
    req.content_length = head.content_length;
    req.url.clear();
    req.url
        .push_str(&String::from_utf8_lossy(&req.buf[head.url.clone()]));

    // Literal patterns compare against the buffer past the URL as well.
    let raw = &req.buf[head.url.start..req.len];
    let route = router.resolve(req.method, &req.url, raw, &mut req.args);
    if let Some(r) = route {
        resp.set_default_content_type(r.class().default_content_type());
    }
    debug!(
        method = req.method.as_str(),
        url = %req.url,
        route = route.map(Route::pattern),
        "request head"
    );
    route
}
