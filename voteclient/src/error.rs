use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("voteclient: transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("voteclient: authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("voteclient: protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("voteclient: crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("voteclient: validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl Error {
    /// The HTTP status behind this error, if the server answered with a non-success status.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport(TransportError::Status { status, .. }) => Some(*status),
            Error::Auth(AuthError::RetriesExhausted { last, .. }) => last.status(),
            _ => None,
        }
    }
}

/// Request or stream failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("got status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("sending request: {0}")]
    Request(String),

    #[error("reading stream: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },

    #[error("login response carries no authentication token")]
    MissingToken,

    #[error("malformed authentication token: {0}")]
    MalformedToken(String),
}

/// Malformed frames and undecodable entities
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("decoding frame: {0}")]
    Frame(#[source] serde_json::Error),

    #[error("decoding field {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("decoding vote status: {0}")]
    VoteStatus(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("poll key is invalid, it was not signed with the main key")]
    InvalidPollKey,

    #[error("no main key provided, validation impossible")]
    KeyMissing,

    #[error("no vote result data")]
    NoResultData,

    #[error("signature for poll results does not match")]
    SignatureInvalid,

    #[error("decoding poll results: {0}")]
    TallyMalformed(#[source] serde_json::Error),

    #[error("results are for poll {found}, expected {expected}")]
    ScopeMismatch { found: String, expected: String },

    #[error("can not find my token in the results")]
    TokenNotFound,

    #[error("reading from random source: {0}")]
    RandomSource(#[source] rand::Error),

    #[error("key agreement produced a non-contributory shared secret")]
    KeyAgreement,

    #[error("deriving key with hkdf")]
    Kdf,

    #[error("aes-gcm failure")]
    Cipher,

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("malformed envelope: {0} bytes is too short")]
    MalformedEnvelope(usize),

    #[error("decoding envelope: {0}")]
    EnvelopeEncoding(#[source] base64::DecodeError),
}

/// Poll and ballot validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("poll has no options")]
    PollMisconfigured,

    #[error("poll method {0} is not yet supported")]
    UnsupportedMethod(String),

    #[error("option {0} does not belong to the poll")]
    UnknownOption(u64),

    #[error("a single vote is outside of the allowed amount {min}..={max}")]
    VoteAmount { min: u32, max: u32 },
}
