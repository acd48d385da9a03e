// src/reactor.rs
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::conn::{ConnState, Outcome, handle_conn};
use crate::http::Exchange;
use crate::listener::{ListenerSet, Socket};
use crate::metrics::ServerMetrics;
use crate::pool::ConnectionPool;
use crate::router::Router;
use crate::syscalls::{self, pollfd};

/// Pause after a failed or empty poll round.
pub const POLL_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Single-threaded event loop: accepts connections and serves ready ones,
/// one complete request at a time, through a single buffer pair.
pub struct Reactor {
    listeners: ListenerSet,
    pool: ConnectionPool<Socket>,
    pollfds: Vec<pollfd>,
    exchange: Exchange,
    router: Router,
    metrics: Arc<ServerMetrics>,
}

impl Reactor {
    pub fn new(
        listeners: ListenerSet,
        max_connections: usize,
        router: Router,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            pollfds: Vec::with_capacity(listeners.len() + max_connections),
            listeners,
            pool: ConnectionPool::new(max_connections),
            exchange: Exchange::new(),
            router,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub fn connections(&self) -> usize {
        self.pool.len()
    }

    /// Runs forever. Poll failures are logged and retried after a pause.
    pub fn run(&mut self) -> ! {
        info!(
            listeners = self.listeners.len(),
            max_connections = self.pool.capacity(),
            routes = self.router.len(),
            "reactor started"
        );
        loop {
            match self.poll_once(-1) {
                Ok(0) => {
                    error!("poll returned without ready descriptors");
                    std::thread::sleep(POLL_RETRY_PAUSE);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("poll failed: {}", e);
                    std::thread::sleep(POLL_RETRY_PAUSE);
                }
            }
        }
    }

    /// One round: wait for readiness, accept on ready listeners, then serve
    /// every ready connection. Returns the number of ready descriptors.
    pub fn poll_once(&mut self, timeout_ms: i32) -> std::io::Result<usize> {
        self.pollfds.clear();
        self.pollfds.extend(
            self.listeners
                .iter()
                .map(|l| syscalls::poll_entry(l.as_raw_fd())),
        );
        self.pollfds.extend(
            self.pool
                .iter()
                .map(|slot| syscalls::poll_entry(slot.socket.as_raw_fd())),
        );

        let ready = syscalls::poll(&mut self.pollfds, timeout_ms)?;
        if ready == 0 {
            return Ok(0);
        }

        // Readiness is recorded before accepting so that new slots, which
        // were not polled, are only served this round when their TLS session
        // already buffers a request.
        let base = self.listeners.len();
        for (i, slot) in self.pool.iter_mut().enumerate() {
            slot.ready = syscalls::is_ready(&self.pollfds[base + i]);
        }

        for i in 0..base {
            if syscalls::is_ready(&self.pollfds[i]) {
                self.accept(i);
            }
        }

        self.serve_ready();
        Ok(ready)
    }

    fn accept(&mut self, index: usize) {
        let Some(listener) = self.listeners.get(index) else {
            return;
        };

        let (socket, peer) = match listener.accept() {
            Ok(Some(pair)) => pair,
            Ok(None) => return,
            Err(e) => {
                error!("accept failed: {}", e);
                return;
            }
        };

        let fd = socket.as_raw_fd();
        match self.pool.allocate(socket) {
            Ok(index) => {
                self.metrics.inc_accepted();
                info!(%peer, fd, index, secure = listener.is_secure(), "connection accepted");
                // A TLS client may send its request along with the handshake.
                if let Some(slot) = self.pool.get_mut(index) {
                    slot.ready = slot.socket.has_buffered_input();
                }
            }
            Err(socket) => {
                self.metrics.inc_refused();
                warn!(%peer, fd, "connection pool full, refusing connection");
                socket.close();
            }
        }
    }

    fn serve_ready(&mut self) {
        let mut i = 0;
        while i < self.pool.len() {
            let Some(slot) = self.pool.get_mut(i) else {
                break;
            };
            if !slot.ready {
                i += 1;
                continue;
            }
            slot.ready = false;

            match handle_conn(slot, &mut self.exchange, &self.router, &self.metrics) {
                Outcome::KeepAlive => {
                    slot.state = ConnState::Idle;
                    // Requests already decrypted by TLS are served now; poll
                    // cannot see them.
                    if slot.socket.has_buffered_input() {
                        slot.ready = true;
                    } else {
                        i += 1;
                    }
                }
                Outcome::Close => {
                    if let Some(slot) = self.pool.free(i) {
                        let fd = slot.socket.as_raw_fd();
                        slot.into_socket().close();
                        self.metrics.inc_closed();
                        debug!(fd, index = i, "connection closed");
                    }
                    // Later slots moved down; index `i` now holds the next one.
                }
            }
        }
    }
}
