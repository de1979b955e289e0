//! Request signature verification.
//!
//! Discord signs `timestamp || body` with the application's ed25519 key and
//! sends the hex signature and the timestamp as headers.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    pub fn from_bytes(public_key: &[u8; 32]) -> Result<Self, ed25519_dalek::SignatureError> {
        Ok(Self {
            key: VerifyingKey::from_bytes(public_key)?,
        })
    }

    /// True when `signature_hex` is a valid signature of `timestamp || body`.
    pub fn verify(&self, timestamp: &str, body: &[u8], signature_hex: &str) -> bool {
        let Ok(raw) = hex::decode(signature_hex.trim()) else {
            return false;
        };
        let Ok(raw) = <[u8; 64]>::try_from(raw.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&raw);

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);

        self.key.verify(&message, &signature).is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    pub(crate) fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    pub(crate) fn sign(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(key.sign(&message).to_bytes())
    }

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::from_bytes(&signing_key().verifying_key().to_bytes()).unwrap()
    }

    #[test]
    fn test_valid_signature() {
        let sig = sign(&signing_key(), "1630000000", b"{\"type\":1}");
        assert!(verifier().verify("1630000000", b"{\"type\":1}", &sig));
    }

    #[test]
    fn test_signature_binds_timestamp_and_body() {
        let sig = sign(&signing_key(), "1630000000", b"{\"type\":1}");
        assert!(!verifier().verify("1630000001", b"{\"type\":1}", &sig));
        assert!(!verifier().verify("1630000000", b"{\"type\":2}", &sig));
    }

    #[test]
    fn test_garbage_signature_is_rejected() {
        assert!(!verifier().verify("1", b"x", "not-hex"));
        assert!(!verifier().verify("1", b"x", "abcd"));
        assert!(!verifier().verify("1", b"x", ""));
    }
}
