// src/router.rs
use std::ops::Range;

use tracing::{debug, error, warn};

use crate::error::HandlerResult;
use crate::http::{ContentType, Method, Request, Response, status};

/// A request handler. Streaming handlers may be invoked several times for
/// the same request; see [`Request::begins`] and [`Response::is_first_call`].
pub trait Handler {
    fn call(&self, req: &mut Request, resp: &mut Response) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut Request, &mut Response) -> HandlerResult,
{
    fn call(&self, req: &mut Request, resp: &mut Response) -> HandlerResult {
        self(req, resp)
    }
}

/// Which server a route belongs to. Each class has its own default
/// content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerClass {
    Rest,
    Web,
}

impl ServerClass {
    pub fn default_content_type(self) -> ContentType {
        match self {
            ServerClass::Rest => ContentType::ApplicationJson,
            ServerClass::Web => ContentType::TextPlain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// The whole body is buffered and the handler runs once it is complete.
    Buffered,
    /// The handler runs for every received body chunk.
    Streamed,
}

pub struct Route {
    method: Method,
    pattern: String,
    class: ServerClass,
    body: BodyMode,
    has_params: bool,
    handler: Box<dyn Handler>,
}

impl Route {
    pub fn new(
        method: Method,
        pattern: &str,
        class: ServerClass,
        handler: impl Handler + 'static,
    ) -> Self {
        let has_params = pattern
            .split('/')
            .any(|s| s.starts_with(':') || s.starts_with('*'));
        Self {
            method,
            pattern: pattern.to_string(),
            class,
            body: BodyMode::Buffered,
            has_params,
            handler: Box::new(handler),
        }
    }

    pub fn rest(method: Method, pattern: &str, handler: impl Handler + 'static) -> Self {
        Self::new(method, pattern, ServerClass::Rest, handler)
    }

    pub fn web(method: Method, pattern: &str, handler: impl Handler + 'static) -> Self {
        Self::new(method, pattern, ServerClass::Web, handler)
    }

    /// Feed the request body to the handler chunk by chunk.
    pub fn streamed(mut self) -> Self {
        self.body = BodyMode::Streamed;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn class(&self) -> ServerClass {
        self.class
    }

    pub fn is_streamed(&self) -> bool {
        self.body == BodyMode::Streamed
    }
}

/// Immutable route table, scanned in insertion order.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn add(&mut self, route: Route) -> &mut Self {
        self.routes.push(route);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route whose method and pattern accept the request.
    ///
    /// `raw` is the receive buffer from the start of the URL onwards, `url`
    /// the URL itself. Captured segments are stored in `args` as ranges
    /// into `url`.
    pub fn resolve(
        &self,
        method: Method,
        url: &str,
        raw: &[u8],
        args: &mut Vec<Range<usize>>,
    ) -> Option<&Route> {
        let path = match url.find('?') {
            Some(idx) => &url[..idx],
            None => url,
        };

        for route in &self.routes {
            if route.method != method {
                continue;
            }
            args.clear();
            let matched = if route.has_params {
                match_segments(&route.pattern, path, args)
            } else {
                url_match(route.pattern.as_bytes(), raw, url.len())
            };
            if matched {
                return Some(route);
            }
        }

        args.clear();
        None
    }
}

/// Literal route comparison: `strncmp(pattern, url, max(pattern, url))`.
///
/// The pattern reads as NUL past its end. The URL is read from `raw`, which
/// continues into whatever follows the URL in the receive buffer, and as NUL
/// past the end of `raw`. Comparison stops at the first difference or where
/// both sides are NUL.
// FIXME: a URL shorter than the pattern matches when the bytes following it
// in the buffer spell out the rest of the pattern. Kept as is until the
// expected routing behavior is settled.
pub fn url_match(pattern: &[u8], raw: &[u8], url_len: usize) -> bool {
    let check_len = pattern.len().max(url_len);
    for i in 0..check_len {
        let a = pattern.get(i).copied().unwrap_or(0);
        let b = raw.get(i).copied().unwrap_or(0);
        if a != b {
            return false;
        }
        if a == 0 {
            return true;
        }
    }
    true
}

/// `:name` captures one segment, `*name` one or more trailing segments.
fn match_segments(pattern: &str, path: &str, args: &mut Vec<Range<usize>>) -> bool {
    let mut segments = segment_ranges(path);

    for part in pattern.split('/').filter(|s| !s.is_empty()) {
        if part.starts_with('*') {
            let before = args.len();
            args.extend(segments.by_ref());
            return args.len() > before;
        }

        let Some(range) = segments.next() else {
            return false;
        };
        if part.starts_with(':') {
            args.push(range);
        } else if &path[range] != part {
            return false;
        }
    }

    segments.next().is_none()
}

fn segment_ranges(path: &str) -> impl Iterator<Item = Range<usize>> + '_ {
    let base = path.as_ptr() as usize;
    path.split('/').filter(|s| !s.is_empty()).map(move |s| {
        let start = s.as_ptr() as usize - base;
        start..start + s.len()
    })
}

/// Runs the route's handler against the current request.
///
/// No route yields 404, a failing handler 500. A discarded request is not
/// handed to its handler again.
pub fn dispatch(route: Option<&Route>, req: &mut Request, resp: &mut Response) {
    let Some(route) = route else {
        debug!(url = %req.url(), "no route");
        resp.set_status(status::NOT_FOUND);
        return;
    };

    if req.is_discarded() {
        return;
    }

    let result = route.handler.call(req, resp);
    req.calls += 1;

    if let Err(e) = result {
        error!(method = route.method.as_str(), route = %route.pattern, "handler failed: {}", e);
        resp.set_status(status::INTERNAL_SERVER_ERROR);
        resp.not_complete = false;
        req.discard();
        if req.user_data.is_some() {
            warn!(route = %route.pattern, "handler failed with an open resource, closing it");
            req.user_data.take();
        }
    }
}
