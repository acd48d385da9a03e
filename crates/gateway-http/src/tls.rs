// src/tls.rs
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use tracing::info;

use crate::error::{ServerError, ServerResult};

/// Identifies an installed credential pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecTag(pub u32);

/// Credential pair used by the HTTPS listener.
pub const HTTPS_SERVER_SEC_TAG: SecTag = SecTag(1);

/// Installed server credentials, ready to terminate TLS.
#[derive(Default)]
pub struct CredentialStore {
    configs: Vec<(SecTag, Arc<ServerConfig>)>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a PEM certificate chain and private key and installs them
    /// under `tag`, replacing any previous pair with the same tag.
    pub fn install_server_certificate(
        &mut self,
        tag: SecTag,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> ServerResult<()> {
        let chain: Vec<CertificateDer<'static>> = certs(&mut Cursor::new(cert_pem))
            .collect::<Result<_, _>>()
            .map_err(|e| ServerError::Tls(format!("failed to parse certificate: {}", e)))?;
        if chain.is_empty() {
            return Err(ServerError::Tls("no certificate found".into()));
        }

        let key: PrivateKeyDer<'static> = private_key(&mut Cursor::new(key_pem))
            .map_err(|e| ServerError::Tls(format!("failed to parse private key: {}", e)))?
            .ok_or_else(|| ServerError::Tls("no private key found".into()))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ServerError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| ServerError::Tls(format!("certificate rejected: {}", e)))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let config = Arc::new(config);
        match self.configs.iter_mut().find(|(t, _)| *t == tag) {
            Some(entry) => entry.1 = config,
            None => self.configs.push((tag, config)),
        }
        info!(tag = tag.0, "server certificate installed");
        Ok(())
    }

    /// Reads both PEM files and installs them under `tag`.
    pub fn load_server_certificate(
        &mut self,
        tag: SecTag,
        cert_path: &Path,
        key_path: &Path,
    ) -> ServerResult<()> {
        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            ServerError::Tls(format!("failed to read {}: {}", cert_path.display(), e))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            ServerError::Tls(format!("failed to read {}: {}", key_path.display(), e))
        })?;
        self.install_server_certificate(tag, &cert_pem, &key_pem)
    }

    pub fn server_config(&self, tag: SecTag) -> Option<Arc<ServerConfig>> {
        self.configs
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, config)| config.clone())
    }
}
