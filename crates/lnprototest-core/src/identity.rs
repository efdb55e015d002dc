//! Local identity key material and node id parsing.
//!
//! The daemon generates one [`KeyPair`] at startup and uses it as the
//! static key for every BOLT 8 handshake. The same generator produces the
//! per-handshake ephemeral keys. Nothing here is ever persisted.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

/// Errors from key generation.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("system entropy source failed: {0}")]
    Entropy(#[from] rand::Error),
}

/// Errors from decoding a hex node id.
#[derive(Debug, thiserror::Error)]
pub enum NodeIdError {
    #[error("malformed node id hex: {0}")]
    MalformedHex(#[from] hex::FromHexError),

    #[error("invalid node public key: {0}")]
    KeyFormat(#[from] secp256k1::Error),
}

/// A secp256k1 key pair. The secret is erased on drop and never printed.
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS randomness source.
    ///
    /// Fails only if the entropy source itself fails.
    pub fn generate() -> Result<Self, IdentityError> {
        let secp = Secp256k1::signing_only();
        let mut bytes = [0u8; 32];
        loop {
            OsRng.try_fill_bytes(&mut bytes)?;
            // Out-of-range scalars occur with probability ~2^-128.
            if let Ok(secret) = SecretKey::from_slice(&bytes) {
                bytes.fill(0);
                let public = PublicKey::from_secret_key(&secp, &secret);
                return Ok(Self { secret, public });
            }
        }
    }

    /// Build a key pair from an existing secret key.
    pub fn from_secret_key(secret: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// Hex-encoded compressed public key (the Lightning node id).
    pub fn node_id(&self) -> String {
        hex::encode(self.public.serialize())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.node_id())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

/// Decode a hex node id into a public key.
///
/// Returns [`NodeIdError::MalformedHex`] for odd-length or non-hex input
/// and [`NodeIdError::KeyFormat`] when the bytes are not a valid point.
pub fn parse_node_id(node_id: &str) -> Result<PublicKey, NodeIdError> {
    let bytes = hex::decode(node_id)?;
    Ok(PublicKey::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_distinct_keys() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_node_id_is_compressed_hex() {
        let pair = KeyPair::generate().unwrap();
        let node_id = pair.node_id();
        assert_eq!(node_id.len(), 66);
        assert!(node_id.starts_with("02") || node_id.starts_with("03"));
        assert_eq!(parse_node_id(&node_id).unwrap(), pair.public_key());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let pair = KeyPair::from_secret_key(secret);
        let debug = format!("{pair:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&"11".repeat(32)));
    }

    #[test]
    fn test_parse_node_id_rejects_odd_length() {
        let err = parse_node_id("02abc").unwrap_err();
        assert!(matches!(err, NodeIdError::MalformedHex(_)));
    }

    #[test]
    fn test_parse_node_id_rejects_non_hex() {
        let err = parse_node_id(&"zz".repeat(33)).unwrap_err();
        assert!(matches!(err, NodeIdError::MalformedHex(_)));
    }

    #[test]
    fn test_parse_node_id_rejects_bad_point() {
        // Valid hex, wrong prefix byte for a compressed key.
        let err = parse_node_id(&format!("05{}", "11".repeat(32))).unwrap_err();
        assert!(matches!(err, NodeIdError::KeyFormat(_)));

        let err = parse_node_id("0011").unwrap_err();
        assert!(matches!(err, NodeIdError::KeyFormat(_)));
    }
}
