// src/http.rs
use std::fs::File;
use std::io;
use std::ops::Range;

use tracing::warn;

/// One buffer for every connection: each request is received and processed
/// before the next connection is serviced.
pub const REQUEST_BUFFER_SIZE: usize = 0xA00;
/// Status line and headers are encoded here, apart from the payload.
pub const RESPONSE_HEAD_SIZE: usize = 0x200;
pub const RESPONSE_PAYLOAD_SIZE: usize = 0x800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    Unknown,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"PATCH" => Method::Patch,
            b"HEAD" => Method::Head,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"CONNECT" => Method::Connect,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Unknown => "UNKNOWN",
        }
    }
}

pub mod status {
    pub const OK: u16 = 200;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;

    pub fn reason(code: u16) -> &'static str {
        match code {
            100 => "Continue",
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    /// Only success responses carry a body. Anything a handler put in the
    /// payload buffer for another status is dropped by the encoder.
    pub fn has_payload(code: u16) -> bool {
        (200..300).contains(&code) && code != NO_CONTENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    TextPlain,
    ApplicationJson,
    OctetStream,
    Prometheus,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::TextPlain => "text/plain",
            ContentType::ApplicationJson => "application/json",
            ContentType::OctetStream => "application/octet-stream",
            ContentType::Prometheus => "text/plain; version=0.0.4",
        }
    }
}

/// Per-request state a streaming handler keeps between invocations.
///
/// The handle owns the open file; taking it out and dropping it closes the
/// file, so a request can never finish with a dangling resource.
#[derive(Debug, Default)]
pub enum Continuation {
    #[default]
    None,
    Upload(File),
    Download(File),
}

impl Continuation {
    pub fn is_some(&self) -> bool {
        !matches!(self, Continuation::None)
    }

    pub fn take(&mut self) -> Continuation {
        std::mem::take(self)
    }
}

/// The request side of the shared buffer pair.
///
/// Owned by the reactor and lent to one handling cycle at a time; every
/// field is reset when a new cycle begins.
pub struct Request {
    pub(crate) buf: Box<[u8]>,
    /// Bytes currently held in `buf`.
    pub(crate) len: usize,
    /// Bytes received during this cycle, including rewound chunks.
    pub(crate) received: usize,
    pub(crate) method: Method,
    pub(crate) url: String,
    /// Route match results, as ranges into `url`.
    pub(crate) args: Vec<Range<usize>>,
    pub(crate) content_length: u64,
    pub(crate) payload: Range<usize>,
    pub(crate) payload_len: u64,
    pub(crate) keep_alive: bool,
    pub(crate) complete: bool,
    pub(crate) calls: u32,
    pub(crate) discarded: bool,
    pub user_data: Continuation,
}

impl Request {
    pub fn new() -> Self {
        Self::with_capacity(REQUEST_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            len: 0,
            received: 0,
            method: Method::Unknown,
            url: String::with_capacity(128),
            args: Vec::with_capacity(8),
            content_length: 0,
            payload: 0..0,
            payload_len: 0,
            keep_alive: false,
            complete: false,
            calls: 0,
            discarded: false,
            user_data: Continuation::None,
        }
    }

    /// Clears the previous request. Capacity of the owned buffers is kept.
    pub fn reset(&mut self) {
        self.release();
        self.len = 0;
        self.received = 0;
        self.method = Method::Unknown;
        self.url.clear();
        self.args.clear();
        self.content_length = 0;
        self.payload = 0..0;
        self.payload_len = 0;
        self.keep_alive = false;
        self.complete = false;
        self.calls = 0;
        self.discarded = false;
    }

    /// Drops a continuation a handler failed to clear, closing its file.
    pub(crate) fn release(&mut self) {
        if self.user_data.is_some() {
            warn!(url = %self.url, "closing resource left open by handler");
            self.user_data = Continuation::None;
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Path part of the URL, without the query string.
    pub fn path(&self) -> &str {
        match self.url.find('?') {
            Some(idx) => &self.url[..idx],
            None => &self.url,
        }
    }

    pub fn route_args(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.args.iter().map(|r| &self.url[r.clone()])
    }

    pub fn route_arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(|r| &self.url[r.clone()])
    }

    /// Body bytes delivered with the current invocation.
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.payload.clone()]
    }

    /// Current payload alongside the continuation slot, for handlers that
    /// write the payload into their open resource.
    pub fn payload_with_continuation(&mut self) -> (&[u8], &mut Continuation) {
        (&self.buf[self.payload.clone()], &mut self.user_data)
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Body bytes received so far.
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// Total bytes read from the socket for this request.
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// True once the whole declared body has been consumed by the parser.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True on the first handler invocation for this request.
    pub fn begins(&self) -> bool {
        self.calls == 0
    }

    /// Stops further handler invocations for this request. Remaining body
    /// bytes are still drained so the connection stays usable.
    pub fn discard(&mut self) {
        self.discarded = true;
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn held(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Accounts for `n` freshly read bytes and returns where they landed.
    pub(crate) fn commit(&mut self, n: usize) -> Range<usize> {
        let start = self.len;
        self.len += n;
        self.received += n;
        start..self.len
    }

    /// Reuses the buffer from the start once a streamed chunk was consumed.
    pub(crate) fn rewind(&mut self) {
        self.len = 0;
        self.payload = 0..0;
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

/// The response side of the shared buffer pair.
pub struct Response {
    pub(crate) head: Box<[u8]>,
    pub(crate) buf: Box<[u8]>,
    pub(crate) filling: usize,
    pub(crate) content_length: u64,
    pub(crate) status: u16,
    pub(crate) content_type: Option<ContentType>,
    pub(crate) default_content_type: ContentType,
    pub(crate) first_call: bool,
    pub(crate) not_complete: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::with_capacity(RESPONSE_PAYLOAD_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            head: vec![0; RESPONSE_HEAD_SIZE].into_boxed_slice(),
            buf: vec![0; capacity].into_boxed_slice(),
            filling: 0,
            content_length: 0,
            status: status::OK,
            content_type: None,
            default_content_type: ContentType::TextPlain,
            first_call: true,
            not_complete: false,
        }
    }

    pub fn reset(&mut self) {
        self.filling = 0;
        self.content_length = 0;
        self.status = status::OK;
        self.content_type = None;
        self.default_content_type = ContentType::TextPlain;
        self.first_call = true;
        self.not_complete = false;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, code: u16) {
        self.status = code;
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Declares the full body length, which may span several invocations.
    pub fn set_content_length(&mut self, len: u64) {
        self.content_length = len;
    }

    /// The handler's override, or the route's server class default.
    pub fn content_type(&self) -> ContentType {
        self.content_type.unwrap_or(self.default_content_type)
    }

    pub fn set_content_type(&mut self, content_type: ContentType) {
        self.content_type = Some(content_type);
    }

    pub(crate) fn set_default_content_type(&mut self, content_type: ContentType) {
        self.default_content_type = content_type;
    }

    pub fn payload_capacity(&self) -> usize {
        self.buf.len()
    }

    /// The whole payload buffer, for handlers producing one chunk in place.
    /// Call [`Response::set_filling`] with the number of bytes produced.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn set_filling(&mut self, n: usize) {
        self.filling = n.min(self.buf.len());
    }

    /// Bytes to send for the current invocation.
    pub fn body(&self) -> &[u8] {
        &self.buf[..self.filling]
    }

    pub fn is_first_call(&self) -> bool {
        self.first_call
    }

    /// Asks the encoder to flush this chunk and invoke the handler again.
    pub fn mark_not_complete(&mut self) {
        self.not_complete = true;
    }

    pub fn is_not_complete(&self) -> bool {
        self.not_complete
    }

    /// Prepares the next invocation of a streaming handler.
    pub(crate) fn resume(&mut self) {
        self.first_call = false;
        self.not_complete = false;
        self.filling = 0;
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends to the payload buffer and keeps the content length in step.
/// Writing past the buffer fails with `WriteZero`.
impl io::Write for Response {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let spare = self.buf.len() - self.filling;
        if spare == 0 && !data.is_empty() {
            return Err(io::ErrorKind::WriteZero.into());
        }
        let n = spare.min(data.len());
        self.buf[self.filling..self.filling + n].copy_from_slice(&data[..n]);
        self.filling += n;
        self.content_length = self.filling as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The buffer pair lent by the reactor to one handling cycle.
#[derive(Default)]
pub struct Exchange {
    pub request: Request,
    pub response: Response,
}

impl Exchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.request.reset();
        self.response.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_payload_statuses() {
        assert!(status::has_payload(200));
        assert!(status::has_payload(201));
        assert!(!status::has_payload(204));
        assert!(!status::has_payload(404));
        assert!(!status::has_payload(500));
    }

    #[test]
    fn test_response_writer_tracks_length() {
        let mut resp = Response::with_capacity(8);
        resp.write_all(b"hello").unwrap();
        assert_eq!(resp.body(), b"hello");
        assert_eq!(resp.content_length(), 5);

        let err = resp.write_all(b"overflow").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_request_reset_clears_state() {
        let mut req = Request::with_capacity(64);
        req.spare_mut()[..3].copy_from_slice(b"abc");
        req.commit(3);
        req.url.push_str("/files/a?x=1");
        req.args.push(7..8);
        req.calls = 2;
        req.discard();

        assert_eq!(req.held(), b"abc");
        assert_eq!(req.path(), "/files/a");
        assert_eq!(req.route_arg(0), Some("a"));

        req.reset();
        assert!(req.held().is_empty());
        assert!(req.url().is_empty());
        assert_eq!(req.route_args().len(), 0);
        assert!(req.begins());
        assert!(!req.is_discarded());
        assert_eq!(req.capacity(), 64);
    }

    #[test]
    fn test_resume_keeps_status_and_length() {
        let mut resp = Response::with_capacity(4);
        resp.set_content_length(10);
        resp.set_filling(4);
        resp.mark_not_complete();
        resp.resume();

        assert!(!resp.is_first_call());
        assert!(!resp.is_not_complete());
        assert!(resp.body().is_empty());
        assert_eq!(resp.content_length(), 10);
        assert_eq!(resp.status(), status::OK);
    }
}
