// src/lib.rs
pub mod config;
pub mod conn;
pub mod error;
pub mod files;
pub mod handlers;
pub mod http;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod pool;
pub mod reactor;
pub mod receiver;
pub mod response;
pub mod router;
pub mod syscalls;
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for users
pub use config::Config;
pub use error::{ConnError, HandlerError, HandlerResult, ServerError, ServerResult};
pub use http::{ContentType, Continuation, Method, Request, Response, status};
pub use listener::{ListenerSet, ListeningSocket, Socket};
pub use metrics::ServerMetrics;
pub use reactor::Reactor;
pub use router::{Handler, Route, Router, ServerClass};
pub use tls::{CredentialStore, HTTPS_SERVER_SEC_TAG, SecTag};
