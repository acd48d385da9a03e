// src/parser.rs
use std::ops::Range;

use arrayvec::ArrayVec;

use crate::error::ParseError;
use crate::http::Method;

pub const MAX_HEADERS: usize = 16;

/// Request line and the headers the engine acts upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub method: Method,
    /// Location of the URL inside the receive buffer.
    pub url: Range<usize>,
    pub keep_alive: bool,
    pub content_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Head(Head),
    /// A run of body bytes inside the receive buffer and how many body
    /// bytes are still expected after it.
    Body { chunk: Range<usize>, remaining: u64 },
    Complete,
}

/// At most a head, one body run and the completion per executed chunk.
pub type Events = ArrayVec<Event, 3>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body { remaining: u64 },
    Done,
}

/// Incremental request parser.
///
/// `httparse` tokenizes the head; body framing is tracked here from the
/// `Content-Length` header. Each call to [`Parser::execute`] consumes one
/// freshly received chunk and reports what it completed.
#[derive(Debug)]
pub struct Parser {
    state: State,
}

impl Parser {
    pub fn new() -> Self {
        Self { state: State::Head }
    }

    pub fn reset(&mut self) {
        self.state = State::Head;
    }

    /// Head parsed and body bytes (if any) pending.
    pub fn in_body(&self) -> bool {
        matches!(self.state, State::Body { .. })
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    /// `buf` holds every byte currently buffered, `fresh` the part of it that
    /// was just read. While the head is incomplete the buffer always starts
    /// at the request line.
    pub fn execute(&mut self, buf: &[u8], fresh: Range<usize>) -> Result<Events, ParseError> {
        let mut events = Events::new();

        match self.state {
            State::Head => {
                let Some((head, head_end)) = parse_head(&buf[..fresh.end])? else {
                    return Ok(events);
                };
                let content_length = head.content_length;
                events.push(Event::Head(head));
                self.state = State::Body { remaining: content_length };
                self.consume_body(head_end..fresh.end, &mut events);
            }
            State::Body { .. } => self.consume_body(fresh, &mut events),
            // Bytes past the declared body are not part of this request.
            State::Done => {}
        }

        Ok(events)
    }

    fn consume_body(&mut self, available: Range<usize>, events: &mut Events) {
        let State::Body { remaining } = self.state else {
            return;
        };

        let take = (available.len() as u64).min(remaining);
        let remaining = remaining - take;
        if take > 0 {
            let start = available.start;
            events.push(Event::Body {
                chunk: start..start + take as usize,
                remaining,
            });
        }

        if remaining == 0 {
            events.push(Event::Complete);
            self.state = State::Done;
        } else {
            self.state = State::Body { remaining };
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<(Head, usize)>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_end = match req.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let method = req.method.ok_or(ParseError::MissingRequestLine)?;
    let path = req.path.ok_or(ParseError::MissingRequestLine)?;
    // `path` borrows from `buf`, so its offset locates the URL in place.
    let url_start = path.as_ptr() as usize - buf.as_ptr() as usize;

    // HTTP/1.1 keeps the connection open unless told otherwise.
    let mut keep_alive = req.version == Some(1);
    let mut content_length = 0;

    for header in req.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or(ParseError::InvalidContentLength)?;
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            if !header.value.eq_ignore_ascii_case(b"identity") {
                return Err(ParseError::UnsupportedTransferEncoding);
            }
        } else if header.name.eq_ignore_ascii_case("connection") {
            let value = String::from_utf8_lossy(header.value);
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    keep_alive = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    keep_alive = true;
                }
            }
        }
    }

    Ok(Some((
        Head {
            method: Method::from_bytes(method.as_bytes()),
            url: url_start..url_start + path.len(),
            keep_alive,
            content_length,
        },
        head_end,
    )))
}
