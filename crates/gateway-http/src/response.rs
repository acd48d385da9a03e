// src/response.rs
use std::io::{self, Write};

use tracing::{error, warn};

use crate::http::{ContentType, Request, Response, status};
use crate::router::{self, Route};

/// What the encoder does with the body of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPlan {
    Send,
    /// Nothing to send.
    Empty,
    /// The status forbids a payload but the handler declared one.
    Suppressed,
}

pub fn body_plan(code: u16, content_length: u64) -> BodyPlan {
    if status::has_payload(code) {
        BodyPlan::Send
    } else if content_length > 0 {
        BodyPlan::Suppressed
    } else {
        BodyPlan::Empty
    }
}

/// Outcome of [`send_response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sent {
    pub head: usize,
    pub body: u64,
    pub plan: BodyPlan,
    /// False when the body bytes sent differ from the declared length,
    /// including a suppressed body. The peer cannot frame the next response.
    pub framed: bool,
}

impl Sent {
    pub fn total(&self) -> u64 {
        self.head as u64 + self.body
    }
}

struct HeadWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> HeadWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "response head does not fit its buffer",
            ));
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn put_int(&mut self, n: impl itoa::Integer) -> io::Result<()> {
        let mut fmt = itoa::Buffer::new();
        self.put(fmt.format(n).as_bytes())
    }
}

/// Status line, connection, content type, content length and the header
/// terminator, in that order. Returns the encoded length.
pub fn encode_head(
    buf: &mut [u8],
    code: u16,
    keep_alive: bool,
    content_type: ContentType,
    content_length: u64,
) -> io::Result<usize> {
    let mut w = HeadWriter::new(buf);

    w.put(b"HTTP/1.1 ")?;
    w.put_int(code)?;
    w.put(b" ")?;
    w.put(status::reason(code).as_bytes())?;
    w.put(b"\r\n")?;

    if keep_alive {
        w.put(b"Connection: keep-alive\r\n")?;
    } else {
        w.put(b"Connection: close\r\n")?;
    }

    w.put(b"Content-Type: ")?;
    w.put(content_type.as_str().as_bytes())?;
    w.put(b"\r\n")?;

    w.put(b"Content-Length: ")?;
    w.put_int(content_length)?;
    w.put(b"\r\n")?;

    w.put(b"\r\n")?;
    Ok(w.pos)
}

/// Writes the whole buffer, retrying partial and would-block writes.
pub fn send_all<W: Write>(sock: &mut W, buf: &[u8]) -> io::Result<usize> {
    let mut sent = 0;
    while sent < buf.len() {
        match sock.write(&buf[sent..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => sent += n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(sent)
}

/// Sends the head and then the body, one buffer at a time. A handler that
/// marked its response not complete is invoked again, without resolving the
/// route a second time, until it produces a short chunk.
pub fn send_response<S: Write>(
    sock: &mut S,
    req: &mut Request,
    resp: &mut Response,
    route: Option<&Route>,
    keep_alive: bool,
) -> io::Result<Sent> {
    let code = resp.status();
    let declared = resp.content_length();
    let content_type = resp.content_type();
    let head_len = encode_head(&mut resp.head, code, keep_alive, content_type, declared)?;

    let mut sent = Sent {
        head: send_all(sock, &resp.head[..head_len])?,
        body: 0,
        plan: body_plan(code, declared),
        framed: true,
    };

    match sent.plan {
        BodyPlan::Send => loop {
            sent.body += send_all(sock, resp.body())? as u64;
            if !resp.is_not_complete() {
                break;
            }

            resp.resume();
            router::dispatch(route, req, resp);
            if resp.status() != code {
                error!(
                    status = resp.status(),
                    sent = sent.body,
                    "streaming handler failed after the head was sent"
                );
                break;
            }
        },
        BodyPlan::Suppressed => {
            warn!(
                status = code,
                len = declared,
                "dropping content for a response code without payload"
            );
            sent.framed = false;
        }
        BodyPlan::Empty => {}
    }

    sock.flush()?;

    if sent.plan == BodyPlan::Send && sent.body != declared {
        warn!(sent = sent.body, declared, "body length differs from Content-Length");
        sent.framed = false;
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerResult;
    use crate::http::Method;
    use crate::testing::{MockStream, capture_logs};

    #[test]
    fn test_encode_head_order() {
        let mut buf = [0u8; 256];
        let n = encode_head(&mut buf, 200, true, ContentType::ApplicationJson, 17).unwrap();
        assert_eq!(
            &buf[..n],
            b"HTTP/1.1 200 OK\r\n\
              Connection: keep-alive\r\n\
              Content-Type: application/json\r\n\
              Content-Length: 17\r\n\r\n"
        );
    }

    #[test]
    fn test_encode_head_overflow() {
        let mut buf = [0u8; 16];
        let err = encode_head(&mut buf, 404, false, ContentType::TextPlain, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_send_all_one_byte_per_call() {
        let mut sock = MockStream::new().max_write(1);
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        assert_eq!(send_all(&mut sock, &data).unwrap(), 1000);
        assert_eq!(sock.written, data);
        assert_eq!(sock.write_calls, 1000);
    }

    #[test]
    fn test_send_all_retries_would_block() {
        let mut sock = MockStream::new().max_write(3).block_writes(2);
        assert_eq!(send_all(&mut sock, b"abcdefg").unwrap(), 7);
        assert_eq!(sock.written, b"abcdefg");
    }

    #[test]
    fn test_send_all_zero_write_is_error() {
        let mut sock = MockStream::new().max_write(0);
        let err = send_all(&mut sock, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_no_payload_status_sends_head_only() {
        let mut sock = MockStream::new();
        let mut req = Request::with_capacity(64);
        let mut resp = Response::with_capacity(64);
        resp.set_status(status::NOT_FOUND);
        resp.payload_mut()[..5].copy_from_slice(b"stale");
        resp.set_filling(5);
        resp.set_content_length(5);

        let (sent, logs) =
            capture_logs(|| send_response(&mut sock, &mut req, &mut resp, None, false).unwrap());

        assert_eq!(sent.plan, BodyPlan::Suppressed);
        assert_eq!(sent.body, 0);
        // The head still declares 5 bytes, so the connection cannot be reused.
        assert!(!sent.framed);
        let text = String::from_utf8(sock.written).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(logs.contains("WARN"));
        assert!(logs.contains("dropping content for a response code without payload"));
    }

    #[test]
    fn test_streaming_handler_is_reinvoked() {
        // Three full 4-byte chunks and then a 2-byte tail.
        let counter = std::rc::Rc::new(std::cell::Cell::new(0u8));
        let calls = counter.clone();
        let route = Route::web(Method::Get, "/stream", move |_: &mut Request, resp: &mut Response| -> HandlerResult {
            let n = calls.get();
            calls.set(n + 1);
            if resp.is_first_call() {
                resp.set_content_length(14);
            }
            let fill = if n < 3 { 4 } else { 2 };
            resp.payload_mut()[..fill].fill(b'a' + n);
            resp.set_filling(fill);
            if fill == resp.payload_capacity() {
                resp.mark_not_complete();
            }
            Ok(())
        });

        let mut sock = MockStream::new();
        let mut req = Request::with_capacity(64);
        let mut resp = Response::with_capacity(4);
        router::dispatch(Some(&route), &mut req, &mut resp);

        let sent = send_response(&mut sock, &mut req, &mut resp, Some(&route), true).unwrap();

        assert_eq!(counter.get(), 4);
        assert_eq!(sent.body, 14);
        assert!(sent.framed);
        assert!(sock.written.ends_with(b"\r\n\r\naaaabbbbccccdd"));
    }

    #[test]
    fn test_short_stream_is_not_framed() {
        let route = Route::web(Method::Get, "/short", |_: &mut Request, resp: &mut Response| -> HandlerResult {
            resp.set_content_length(100);
            resp.payload_mut()[..3].copy_from_slice(b"abc");
            resp.set_filling(3);
            Ok(())
        });
        let mut sock = MockStream::new();
        let mut req = Request::with_capacity(64);
        let mut resp = Response::with_capacity(16);
        router::dispatch(Some(&route), &mut req, &mut resp);

        let sent = send_response(&mut sock, &mut req, &mut resp, Some(&route), true).unwrap();
        assert_eq!(sent.body, 3);
        assert!(!sent.framed);
    }
}
