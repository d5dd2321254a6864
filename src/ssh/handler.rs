//! russh client event handler

use russh::client;
use russh::keys::{HashAlg, PublicKey};
use tracing::debug;

/// Client handler for gateway sessions.
///
/// Host keys are accepted without a known_hosts check; the SHA256
/// fingerprint is logged so an operator can compare it out of band.
pub struct GatewayHandler {
    target: String,
}

impl GatewayHandler {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl client::Handler for GatewayHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        debug!(
            "[ssh] Host key for {}: {} {}",
            self.target,
            server_public_key.algorithm(),
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}
