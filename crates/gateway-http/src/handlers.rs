// src/handlers.rs
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::Config;
use crate::error::HandlerResult;
use crate::files::FilesServer;
use crate::http::{ContentType, Method, Request, Response};
use crate::metrics::ServerMetrics;
use crate::router::{Route, Router};

#[derive(Debug, Serialize)]
struct Info<'a> {
    name: &'a str,
    version: &'a str,
    uptime_secs: u64,
    http_port: Option<u16>,
    https_port: u16,
    max_connections: usize,
    active_connections: usize,
}

/// Server description returned by the info routes.
pub struct InfoHandler {
    started: Instant,
    http_port: Option<u16>,
    https_port: u16,
    max_connections: usize,
    metrics: Arc<ServerMetrics>,
}

impl InfoHandler {
    pub fn new(config: &Config, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            started: Instant::now(),
            http_port: config.http_enabled.then_some(config.http_port),
            https_port: config.https_port,
            max_connections: config.max_connections,
            metrics,
        }
    }

    pub fn info(&self, _req: &mut Request, resp: &mut Response) -> HandlerResult {
        let info = Info {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started.elapsed().as_secs(),
            http_port: self.http_port,
            https_port: self.https_port,
            max_connections: self.max_connections,
            active_connections: self.metrics.snapshot().active,
        };
        serde_json::to_writer(&mut *resp, &info)?;
        Ok(())
    }
}

/// Prometheus text exposition of the server counters.
pub fn metrics(metrics: &ServerMetrics, resp: &mut Response) -> HandlerResult {
    let snap = metrics.snapshot();
    resp.set_content_type(ContentType::Prometheus);

    let counters = [
        ("gateway_connections_accepted_total", "Accepted connections.", snap.accepted as u64),
        ("gateway_connections_refused_total", "Connections refused with a full pool.", snap.refused as u64),
        ("gateway_connections_closed_total", "Closed connections.", snap.closed as u64),
        ("gateway_requests_total", "Requests served.", snap.requests as u64),
        ("gateway_sent_bytes_total", "Bytes sent to clients.", snap.bytes_sent),
    ];
    for (name, help, value) in counters {
        writeln!(resp, "# HELP {} {}", name, help)?;
        writeln!(resp, "# TYPE {} counter", name)?;
        writeln!(resp, "{} {}", name, value)?;
    }

    writeln!(resp, "# HELP gateway_connections_active Open connections.")?;
    writeln!(resp, "# TYPE gateway_connections_active gauge")?;
    writeln!(resp, "gateway_connections_active {}", snap.active)?;
    Ok(())
}

/// The gateway's route table, scanned in this order.
pub fn default_routes(config: &Config, metrics: Arc<ServerMetrics>) -> Router {
    let info = Rc::new(InfoHandler::new(config, metrics.clone()));
    let files = Rc::new(FilesServer::new(&config.files_root));

    let mut router = Router::new();
    for pattern in ["", "/", "/info"] {
        let info = info.clone();
        router.add(Route::rest(Method::Get, pattern, move |req: &mut Request, resp: &mut Response| {
            info.info(req, resp)
        }));
    }

    router.add(Route::web(Method::Get, "/metrics", move |_: &mut Request, resp: &mut Response| {
        self::metrics(&metrics, resp)
    }));

    let download = files.clone();
    router.add(Route::web(Method::Get, "/files/*path", move |req: &mut Request, resp: &mut Response| {
        download.download(req, resp)
    }));

    let upload = files.clone();
    router.add(
        Route::web(Method::Post, "/files/*path", move |req: &mut Request, resp: &mut Response| {
            upload.upload(req, resp)
        })
        .streamed(),
    );

    router.add(Route::rest(Method::Get, "/stats/files", move |req: &mut Request, resp: &mut Response| {
        files.stats(req, resp)
    }));

    router
}
