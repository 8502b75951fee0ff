use crate::*;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::{CryptoRng, RngCore};
use std::fmt;

const TOKEN_LENGTH: usize = 8;

/// A random per-ballot secret carried inside the sealed ballot.
///
/// After publication the voter looks it up in the tally to confirm their ballot was counted.
/// The tally lists tokens but never which option a token voted for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct VoteToken(String);

impl VoteToken {
    /// Draw a fresh token. Never reuse a token for a second ballot.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; TOKEN_LENGTH];
        rng.try_fill_bytes(&mut bytes)
            .map_err(CryptoError::RandomSource)?;
        Ok(VoteToken(STANDARD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this token appears among the tally's rows
    pub fn is_listed_in(&self, tally: &Tally) -> bool {
        tally.votes.iter().any(|vote| vote.token == self.0)
    }
}

impl From<String> for VoteToken {
    fn from(text: String) -> Self {
        VoteToken(text)
    }
}

impl fmt::Display for VoteToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
