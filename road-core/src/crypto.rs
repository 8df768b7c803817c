//! CurveCP-style sealed-box primitives for the allow handshake (C5).
//!
//! `verhex`/`pubhex` are each peer's long-term keys: `verhex` is an
//! Ed25519 verifying key (identity/signing), `pubhex` is an X25519 public
//! key (key agreement). Every allow handshake mints a fresh X25519
//! short-term keypair. Sealing combines an X25519 Diffie-Hellman shared
//! secret with a ChaCha20-Poly1305 AEAD, standing in for NaCl's
//! Curve25519-XSalsa20-Poly1305 box construction (both are 32-byte-key,
//! 24-byte-nonce, 16-byte-MAC authenticated-encryption constructions).

use crate::error::RoadError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand_core::OsRng;
use road_wire::packer::NONCE_SIZE;
use x25519_dalek::{PublicKey, StaticSecret};

pub const PUB_KEY_SIZE: usize = 32;

/// A peer's long-term identity: an Ed25519 signing key (`verhex`) and an
/// X25519 crypt key (`pubhex`).
#[derive(Clone)]
pub struct LongKeyPair {
    pub signer: SigningKey,
    pub priver: StaticSecret,
}

impl LongKeyPair {
    pub fn generate() -> Self {
        LongKeyPair {
            signer: SigningKey::generate(&mut OsRng),
            priver: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn verhex(&self) -> [u8; 32] {
        self.signer.verifying_key().to_bytes()
    }

    pub fn pubhex(&self) -> [u8; 32] {
        PublicKey::from(&self.priver).to_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signer.sign(msg).to_bytes()
    }
}

/// An ephemeral X25519 keypair, regenerated on every `rekey`.
#[derive(Clone)]
pub struct ShortKeyPair {
    priv_key: StaticSecret,
    pub_key: PublicKey,
}

impl ShortKeyPair {
    pub fn generate() -> Self {
        let priv_key = StaticSecret::random_from_rng(OsRng);
        let pub_key = PublicKey::from(&priv_key);
        ShortKeyPair { priv_key, pub_key }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.pub_key.to_bytes()
    }

    pub fn private(&self) -> &StaticSecret {
        &self.priv_key
    }
}

pub fn verifier_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, RoadError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| RoadError::Crypto("verhex must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| RoadError::Crypto(e.to_string()))
}

pub fn publican_from_bytes(bytes: &[u8]) -> Result<PublicKey, RoadError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| RoadError::Crypto("pubhex must be 32 bytes".into()))?;
    Ok(PublicKey::from(arr))
}

pub fn fresh_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::Rng::fill(&mut rand::thread_rng(), &mut nonce);
    nonce
}

/// Derives a symmetric key from an X25519 shared secret and seals `plain`
/// under it with the given nonce, appended with a 16-byte Poly1305 tag.
pub fn seal(
    our_priv: &StaticSecret,
    their_pub: &PublicKey,
    nonce: &[u8; NONCE_SIZE],
    plain: &[u8],
) -> Result<Vec<u8>, RoadError> {
    let shared = our_priv.diffie_hellman(their_pub);
    let key = Key::from_slice(shared.as_bytes());
    let cipher = XChaCha20Poly1305::new(key);
    let xnonce = xnonce_from_24(nonce);
    cipher
        .encrypt(&xnonce, plain)
        .map_err(|e| RoadError::Crypto(format!("seal failed: {e}")))
}

/// Opens a box sealed by `seal` under the matching shared secret.
pub fn open(
    our_priv: &StaticSecret,
    their_pub: &PublicKey,
    nonce: &[u8; NONCE_SIZE],
    cipher_text: &[u8],
) -> Result<Vec<u8>, RoadError> {
    let shared = our_priv.diffie_hellman(their_pub);
    let key = Key::from_slice(shared.as_bytes());
    let cipher = XChaCha20Poly1305::new(key);
    let xnonce = xnonce_from_24(nonce);
    cipher
        .decrypt(&xnonce, cipher_text)
        .map_err(|e| RoadError::Crypto(format!("open failed: {e}")))
}

/// `XChaCha20Poly1305` takes a 24-byte nonce, matching the protocol's
/// NaCl-derived nonce width exactly.
fn xnonce_from_24(nonce: &[u8; NONCE_SIZE]) -> XNonce {
    *XNonce::from_slice(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let a = ShortKeyPair::generate();
        let b = ShortKeyPair::generate();
        let b_pub = PublicKey::from(b.public_bytes());
        let nonce = fresh_nonce();
        let plain = b"hello road";
        let cipher = seal(a.private(), &b_pub, &nonce, plain).unwrap();
        let a_pub = PublicKey::from(a.public_bytes());
        let opened = open(b.private(), &a_pub, &nonce, &cipher).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn open_rejects_tampered_ciphertext() {
        let a = ShortKeyPair::generate();
        let b = ShortKeyPair::generate();
        let b_pub = PublicKey::from(b.public_bytes());
        let nonce = fresh_nonce();
        let mut cipher = seal(a.private(), &b_pub, &nonce, b"canary").unwrap();
        cipher[0] ^= 0xFF;
        let a_pub = PublicKey::from(a.public_bytes());
        assert!(open(b.private(), &a_pub, &nonce, &cipher).is_err());
    }
}
