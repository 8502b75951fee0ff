//! Hybrid encryption of ballots to a poll key.
//!
//! Each ballot gets a fresh ephemeral X25519 key pair. The shared secret with the poll key is
//! run through HKDF-SHA256 (no salt, no info) and the ballot is sealed with AES-256-GCM.
//!   - The envelope is `ephemeral public key (32) || nonce (12) || ciphertext || tag (16)`.
//!   - The sender is not authenticated, ballots are anonymous. The tag only
//!     protects against tampering in transit.
//!   - Ephemeral keys are never reused, so two ballots can not be linked to the same voter
//!     even though every voter encrypts to the same poll key.

use crate::*;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;

type AesKey = [u8; 32];

/// A sealed ballot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope(Vec<u8>);

impl SealedEnvelope {
    /// Size of an envelope holding `plaintext_len` bytes
    pub fn sealed_len(plaintext_len: usize) -> usize {
        PUBLIC_KEY_LENGTH + NONCE_LENGTH + plaintext_len + TAG_LENGTH
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Wire encoding, a standard base64 string
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(CryptoError::EnvelopeEncoding)?;
        Ok(SealedEnvelope(bytes))
    }
}

impl AsRef<[u8]> for SealedEnvelope {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Generate a poll key pair. The secret stays with the poll authority.
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(rng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Seal a ballot to a poll key.
///
/// The poll key must carry a valid main-key signature. If it does not, this fails with
/// `InvalidPollKey` before any randomness is drawn. Failures are not retried; call again
/// for fresh randomness.
pub fn seal_vote<R: RngCore + CryptoRng>(
    plaintext: &[u8],
    main_key: Option<&MainKey>,
    poll_key: &[u8],
    key_sig: &[u8],
    rng: &mut R,
) -> Result<SealedEnvelope, CryptoError> {
    verify_poll_key(main_key, poll_key, key_sig)?;

    let poll_key: [u8; PUBLIC_KEY_LENGTH] = poll_key.try_into().map_err(|_| {
        CryptoError::MalformedKey(format!(
            "poll key must be {} bytes, got {}",
            PUBLIC_KEY_LENGTH,
            poll_key.len()
        ))
    })?;
    let poll_key = PublicKey::from(poll_key);

    let mut ephemeral = [0u8; 32];
    rng.try_fill_bytes(&mut ephemeral)
        .map_err(CryptoError::RandomSource)?;
    let ephemeral_sk = StaticSecret::from(ephemeral);
    let ephemeral_pk = PublicKey::from(&ephemeral_sk);

    let aes_key = encapsulate(&ephemeral_sk, &poll_key)?;

    let mut nonce = [0u8; NONCE_LENGTH];
    rng.try_fill_bytes(&mut nonce)
        .map_err(CryptoError::RandomSource)?;

    let encrypted = aes_encrypt(&aes_key, &nonce, plaintext)?;

    let mut envelope = Vec::with_capacity(PUBLIC_KEY_LENGTH + NONCE_LENGTH + encrypted.len());
    envelope.extend_from_slice(ephemeral_pk.as_bytes());
    envelope.extend_from_slice(&nonce);
    envelope.extend(encrypted);

    Ok(SealedEnvelope(envelope))
}

/// Open an envelope with the poll secret.
pub fn open_envelope(poll_secret: &StaticSecret, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < SealedEnvelope::sealed_len(0) {
        return Err(CryptoError::MalformedEnvelope(envelope.len()));
    }

    let (ephemeral_pk, rest) = envelope.split_at(PUBLIC_KEY_LENGTH);
    let (nonce, encrypted) = rest.split_at(NONCE_LENGTH);

    let ephemeral_pk: [u8; PUBLIC_KEY_LENGTH] = ephemeral_pk
        .try_into()
        .map_err(|_| CryptoError::MalformedEnvelope(envelope.len()))?;
    let aes_key = encapsulate(poll_secret, &PublicKey::from(ephemeral_pk))?;

    aes_decrypt(&aes_key, nonce, encrypted)
}

fn hkdf_sha256(master: &[u8]) -> Result<AesKey, CryptoError> {
    let h = Hkdf::<Sha256>::new(None, master);
    let mut out = [0u8; 32];
    h.expand(&[], &mut out).map_err(|_| CryptoError::Kdf)?;
    Ok(out)
}

// Both sides derive the same key: sender with (ephemeral secret, poll key),
// receiver with (poll secret, ephemeral key).
fn encapsulate(secret: &StaticSecret, peer: &PublicKey) -> Result<AesKey, CryptoError> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(CryptoError::KeyAgreement);
    }
    hkdf_sha256(shared.as_bytes())
}

fn aes_encrypt(key: &AesKey, nonce: &[u8], msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let aead = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    aead.encrypt(Nonce::from_slice(nonce), msg)
        .map_err(|_| CryptoError::Cipher)
}

fn aes_decrypt(key: &AesKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let aead = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    aead.decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Cipher)
}
