// src/listener.rs
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use arrayvec::ArrayVec;
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ServerError, ServerResult};
use crate::tls::{CredentialStore, HTTPS_SERVER_SEC_TAG};

pub const BACKLOG: i32 = 3;
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A client connection, plaintext or TLS-terminated.
pub enum Socket {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Socket {
    pub fn is_secure(&self) -> bool {
        matches!(self, Socket::Tls(_))
    }

    /// True when a TLS session already holds decrypted request bytes. Those
    /// bytes left the kernel socket, so `poll` will not report them.
    pub fn has_buffered_input(&mut self) -> bool {
        match self {
            Socket::Plain(_) => false,
            // A record that fails to decrypt is reported by the next read.
            Socket::Tls(s) => s
                .conn
                .process_new_packets()
                .map_or(true, |state| state.plaintext_bytes_to_read() > 0),
        }
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Socket::Plain(s) => s,
            Socket::Tls(s) => &s.sock,
        }
    }

    /// Shuts the connection down. TLS peers get a best-effort `close_notify`.
    pub fn close(self) {
        match self {
            Socket::Plain(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Socket::Tls(mut s) => {
                s.conn.send_close_notify();
                let _ = s.conn.complete_io(&mut s.sock);
                let _ = s.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(s) => s.read(buf),
            Socket::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(s) => s.write(buf),
            Socket::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Plain(s) => s.flush(),
            Socket::Tls(s) => s.flush(),
        }
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.tcp().as_raw_fd()
    }
}

/// A bound listening socket. With a TLS configuration every accepted
/// connection completes its handshake before it is handed out.
pub struct ListeningSocket {
    listener: TcpListener,
    tls: Option<Arc<ServerConfig>>,
}

impl ListeningSocket {
    pub fn bind(addr: SocketAddr, tls: Option<Arc<ServerConfig>>) -> ServerResult<Self> {
        let bind_err = |source| ServerError::Bind {
            port: addr.port(),
            source,
        };

        let socket = socket2::Socket::new(
            if addr.is_ipv4() {
                socket2::Domain::IPV4
            } else {
                socket2::Domain::IPV6
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )
        .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.listen(BACKLOG).map_err(bind_err)?;

        let listener: TcpListener = socket.into();
        info!(
            addr = %listener.local_addr().unwrap_or(addr),
            secure = tls.is_some(),
            "listening"
        );
        Ok(Self { listener, tls })
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts one pending connection. `Ok(None)` when nothing is pending.
    pub fn accept(&self) -> io::Result<Option<(Socket, SocketAddr)>> {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        };
        stream.set_nonblocking(false)?;
        let _ = stream.set_nodelay(true);

        let Some(config) = &self.tls else {
            return Ok(Some((Socket::Plain(stream), peer)));
        };

        match handshake(config.clone(), stream) {
            Ok(tls) => Ok(Some((Socket::Tls(Box::new(tls)), peer))),
            Err(e) => {
                warn!(%peer, "TLS handshake failed: {}", e);
                Ok(None)
            }
        }
    }
}

impl AsRawFd for ListeningSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

fn handshake(
    config: Arc<ServerConfig>,
    mut stream: TcpStream,
) -> io::Result<StreamOwned<ServerConnection, TcpStream>> {
    let mut conn = ServerConnection::new(config).map_err(io::Error::other)?;

    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    while conn.is_handshaking() {
        conn.complete_io(&mut stream)?;
    }
    stream.set_read_timeout(None)?;

    debug!(
        alpn = ?conn.alpn_protocol().map(String::from_utf8_lossy),
        "TLS handshake complete"
    );
    Ok(StreamOwned::new(conn, stream))
}

/// The plaintext and TLS listeners, in that order.
#[derive(Default)]
pub struct ListenerSet {
    listeners: ArrayVec<ListeningSocket, 2>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the listeners the configuration asks for. The TLS listener is
    /// always bound and needs the HTTPS credentials installed beforehand.
    pub fn bind(config: &Config, creds: &CredentialStore) -> ServerResult<Self> {
        let mut set = Self::new();

        if config.http_enabled {
            set.push(ListeningSocket::bind(config.socket_addr(config.http_port)?, None)?);
        }

        let tls = creds
            .server_config(HTTPS_SERVER_SEC_TAG)
            .ok_or_else(|| ServerError::Tls("HTTPS credentials are not installed".into()))?;
        set.push(ListeningSocket::bind(
            config.socket_addr(config.https_port)?,
            Some(tls),
        )?);

        Ok(set)
    }

    /// Adds a listener. At most two are held; extras are dropped.
    pub fn push(&mut self, listener: ListeningSocket) {
        if let Err(e) = self.listeners.try_push(listener) {
            warn!(
                addr = ?e.element().local_addr().ok(),
                "listener set is full, dropping listener"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ListeningSocket> {
        self.listeners.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListeningSocket> {
        self.listeners.iter()
    }
}
