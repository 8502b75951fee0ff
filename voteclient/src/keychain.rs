//! Chain of trust: main key → poll key, main key → published tally.

use crate::*;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};

/// The organization-wide ed25519 public key. Root of trust for poll keys and tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainKey([u8; PUBLIC_KEY_LENGTH]);

impl MainKey {
    /// Construct a `MainKey` from a slice of bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            CryptoError::MalformedKey(format!(
                "main key must be {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::MalformedKey(format!("main key: {}", e)))?;
        Ok(MainKey(bytes))
    }

    /// Decode the operator supplied, base64 encoded key
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedKey(format!("decoding main key from base64: {}", e)))?;
        MainKey::from_bytes(&bytes)
    }

    /// View this key as a byte array.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

/// A published tally, as far as the voter can check it.
#[derive(Deserialize, Debug, Clone)]
pub struct Tally {
    /// `{domain}/{poll_id}`
    pub id: String,

    #[serde(default)]
    pub votes: Vec<TallyEntry>,
}

/// One anonymous row of a tally
#[derive(Deserialize, Debug, Clone)]
pub struct TallyEntry {
    #[serde(default)]
    pub token: String,
}

/// Plain ed25519 verification. Malformed keys or signatures never verify.
pub fn verify_signature(pub_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let pub_key: [u8; PUBLIC_KEY_LENGTH] = match pub_key.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let public = match VerifyingKey::from_bytes(&pub_key) {
        Ok(public) => public,
        Err(_) => return false,
    };
    let signature = match Signature::from_slice(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };

    public.verify(message, &signature).is_ok()
}

/// Check that a poll key was signed with the main key.
pub fn verify_poll_key(
    main_key: Option<&MainKey>,
    poll_key: &[u8],
    key_sig: &[u8],
) -> Result<(), CryptoError> {
    match main_key {
        Some(main_key) if verify_signature(main_key.as_bytes(), poll_key, key_sig) => Ok(()),
        _ => Err(CryptoError::InvalidPollKey),
    }
}

/// Verify a published tally against the main key.
///
/// The checks run in order: main key present, result data present, signature, scope
/// (`{domain}/{poll_id}`) and finally, if the voter holds a token, that the token is listed.
pub fn verify_poll_results(
    main_key: Option<&MainKey>,
    poll: &Poll,
    domain: &str,
    held_token: Option<&VoteToken>,
) -> Result<(), CryptoError> {
    let main_key = main_key.ok_or(CryptoError::KeyMissing)?;

    if poll.votes_raw.is_empty() || poll.votes_signature.is_empty() {
        return Err(CryptoError::NoResultData);
    }

    if !verify_signature(
        main_key.as_bytes(),
        poll.votes_raw.as_bytes(),
        &poll.votes_signature,
    ) {
        return Err(CryptoError::SignatureInvalid);
    }

    let tally: Tally =
        serde_json::from_str(&poll.votes_raw).map_err(CryptoError::TallyMalformed)?;

    let expected = format!("{}/{}", domain, poll.id);
    if tally.id != expected {
        return Err(CryptoError::ScopeMismatch {
            found: tally.id,
            expected,
        });
    }

    match held_token {
        Some(token) if !token.is_listed_in(&tally) => Err(CryptoError::TokenNotFound),
        _ => Ok(()),
    }
}
