//! Secret Deriver
//!
//! Turns a pass-phrase and the target port into the token both sides of a
//! connection prove knowledge of during the handshake.
//!
//! The token is scoped to the port: two unrelated services that both keep
//! the default pass-phrase still cannot authenticate against each other as
//! long as they use different ports. Two coordinators on the *same* port
//! with *different* pass-phrases can never talk to each other either; only
//! one of them can bind the port and the other will fail authentication.
//! That is a configuration hazard rather than something this crate resolves.

use std::fmt;

use sha2::{Digest, Sha256};

/// Pass-phrase used when the caller does not supply one
pub const DEFAULT_SECRET: &str = "secret";

/// Size of the derived token in bytes
pub const TOKEN_SIZE: usize = 32;

/// Authentication token for one (port, pass-phrase) pair
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedToken {
    bytes: [u8; TOKEN_SIZE],
}

impl DerivedToken {
    /// Derive the token for `port`, falling back to [`DEFAULT_SECRET`]
    #[must_use]
    pub fn derive(port: u16, passphrase: Option<&str>) -> Self {
        let passphrase = passphrase.unwrap_or(DEFAULT_SECRET);
        let material = format!("{port}_{passphrase}");
        let bytes: [u8; TOKEN_SIZE] = Sha256::digest(material.as_bytes()).into();
        Self { bytes }
    }

    /// Raw token bytes, used as the HMAC key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.bytes
    }

    /// Hex encoding of the full token
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// First eight hex characters, safe to log
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.bytes[..4])
    }
}

impl fmt::Debug for DerivedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedToken({}..)", self.fingerprint())
    }
}
