// src/config.rs
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Bind address for both listeners (default: 0.0.0.0)
    pub host: String,

    /// Plaintext HTTP port (default: 80)
    pub http_port: u16,

    /// HTTPS port (default: 443)
    pub https_port: u16,

    /// Bind the plaintext listener. The HTTPS listener is always bound.
    pub http_enabled: bool,

    /// Connection pool capacity (default: 3)
    pub max_connections: usize,

    /// Directory served by the file routes (default: ./files)
    pub files_root: PathBuf,

    /// PEM certificate chain for the HTTPS listener
    pub tls_cert: PathBuf,

    /// PEM private key for the HTTPS listener
    pub tls_key: PathBuf,

    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 80,
            https_port: 443,
            http_enabled: true,
            max_connections: 3,
            files_root: PathBuf::from("./files"),
            tls_cert: PathBuf::from("./creds/server.crt.pem"),
            tls_key: PathBuf::from("./creds/server.key.pem"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (with .env support).
    pub fn from_env() -> ServerResult<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Unset
    /// variables keep their defaults; malformed ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServerResult<Self> {
        let defaults = Self::default();

        let config = Config {
            host: lookup("GATEWAY_HOST").unwrap_or(defaults.host),
            http_port: parse_var(&lookup, "GATEWAY_HTTP_PORT", defaults.http_port)?,
            https_port: parse_var(&lookup, "GATEWAY_HTTPS_PORT", defaults.https_port)?,
            http_enabled: match lookup("GATEWAY_HTTP_ENABLED") {
                Some(v) => parse_bool("GATEWAY_HTTP_ENABLED", &v)?,
                None => defaults.http_enabled,
            },
            max_connections: parse_var(
                &lookup,
                "GATEWAY_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            files_root: lookup("GATEWAY_FILES_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.files_root),
            tls_cert: lookup("GATEWAY_TLS_CERT")
                .map(PathBuf::from)
                .unwrap_or(defaults.tls_cert),
            tls_key: lookup("GATEWAY_TLS_KEY")
                .map(PathBuf::from)
                .unwrap_or(defaults.tls_key),
            log_level: lookup("GATEWAY_LOG").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.max_connections == 0 {
            return Err(ServerError::Config(
                "GATEWAY_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }
        if self.http_enabled && self.http_port == self.https_port {
            return Err(ServerError::Config(format!(
                "HTTP and HTTPS listeners share port {}",
                self.http_port
            )));
        }
        self.host
            .parse::<IpAddr>()
            .map_err(|_| ServerError::Config(format!("invalid GATEWAY_HOST {:?}", self.host)))?;
        Ok(())
    }

    pub fn socket_addr(&self, port: u16) -> ServerResult<SocketAddr> {
        let ip = self
            .host
            .parse::<IpAddr>()
            .map_err(|_| ServerError::Config(format!("invalid GATEWAY_HOST {:?}", self.host)))?;
        Ok(SocketAddr::new(ip, port))
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> ServerResult<T> {
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ServerError::Config(format!("invalid {} {:?}", key, v))),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: &str) -> ServerResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ServerError::Config(format!("invalid {} {:?}", key, value))),
    }
}
