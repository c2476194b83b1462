//! RSA/SHA-1 crypto collaborator.
//!
//! Spec §1 treats "the underlying RSA/SHA-1/PRNG primitives" as an external
//! collaborator; per SPEC_FULL.md we still implement a real, working one so
//! that sign/verify round-trips actually run in tests, rather than leaving a
//! stub. Digests and signatures are raw (unprefixed) PKCS#1 v1.5 over a
//! 20-byte SHA-1 hash, matching `mixminion.Crypto.pk_sign`/`pk_check_signature`.

use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest as _, Sha1};

use crate::error::CryptoError;

pub const DIGEST_LEN: usize = 20;

/// An RSA public key used as a server's long-term identity, or as its
/// packet-decryption key. Both fields in spec §3 ("Identity", "Packet-Key")
/// use this same representation; which length bound applies is enforced by
/// the caller (descriptor validation), not by this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    pub fn from_inner(key: RsaPublicKey) -> Self {
        Self(key)
    }

    pub fn inner(&self) -> &RsaPublicKey {
        &self.0
    }

    /// Decode a DER-encoded PKCS#1 `RSAPublicKey` (the on-the-wire form
    /// used inside the base64 `Identity`/`Packet-Key`/`DirectoryIdentity`
    /// fields, per spec §6).
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        RsaPublicKey::from_pkcs1_der(der)
            .map(Self)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }

    /// Re-encode as DER, matching `pk_encode_public_key`.
    pub fn to_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.0
            .to_pkcs1_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }

    /// Modulus length in bytes, i.e. `get_modulus_bytes()`.
    pub fn modulus_bytes(&self) -> usize {
        self.0.size()
    }

    /// `SHA1(encode_public_key(self))`, used for `getKeyDigest`.
    pub fn key_digest(&self) -> Result<[u8; DIGEST_LEN], CryptoError> {
        let der = self.to_der()?;
        Ok(sha1(&der))
    }

    /// Recover the digest encoded in `signature` and compare it to
    /// `expected_digest`. Folds `CryptoError` into a boolean-shaped result:
    /// `Ok(())` iff the signature is valid for exactly this digest under
    /// this key (spec: "RSA_public_op(signature, identity_key) -> 20-byte
    /// digest, compared for equality").
    pub fn verify_digest(
        &self,
        expected_digest: &[u8; DIGEST_LEN],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        self.0
            .verify(Pkcs1v15Sign::new_unprefixed(), expected_digest, signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// A matching RSA keypair, used by `sign_server_info`/`sign_directory` (the
/// producing side of §4.2's Digest-and-Sign Engine). Only needed by
/// descriptor/directory authors, not by validators.
pub struct Keypair {
    pub private: RsaPrivateKey,
    pub public: PublicKey,
}

impl Keypair {
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let public = PublicKey(RsaPublicKey::from(&private));
        Ok(Self { private, public })
    }

    /// Sign a 20-byte digest, returning a raw (unprefixed) PKCS#1 v1.5
    /// signature — `mixminion.Crypto.pk_sign(digest, rsa)`.
    pub fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> Result<Vec<u8>, CryptoError> {
        let mut rng = rand::thread_rng();
        self.private
            .sign_with_rng(&mut rng, Pkcs1v15Sign::new_unprefixed(), digest)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }
}

/// `mixminion.Crypto.sha1`.
pub fn sha1(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; DIGEST_LEN];
    buf.copy_from_slice(&out);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = Keypair::generate(1024).unwrap();
        let digest = sha1(b"hello world");
        let sig = kp.sign_digest(&digest).unwrap();
        assert!(kp.public.verify_digest(&digest, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let kp = Keypair::generate(1024).unwrap();
        let digest = sha1(b"hello world");
        let mut sig = kp.sign_digest(&digest).unwrap();
        sig[0] ^= 0xFF;
        assert!(kp.public.verify_digest(&digest, &sig).is_err());
    }

    #[test]
    fn der_round_trip_preserves_modulus_length() {
        let kp = Keypair::generate(2048).unwrap();
        let der = kp.public.to_der().unwrap();
        let decoded = PublicKey::from_der(&der).unwrap();
        assert_eq!(decoded.modulus_bytes(), 256);
    }
}
