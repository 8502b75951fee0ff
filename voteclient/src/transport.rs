//! The authenticated request/response facility the client talks through.
//!
//! The library never speaks HTTP itself. The binary provides an implementation of
//! [`Transport`]; tests provide their own.

use crate::*;
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio::io::AsyncBufRead;

/// Username and password for the login request
#[derive(Serialize, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .finish()
    }
}

/// The credential pair returned by a successful login.
///
/// Both the token and the cookie have to be sent with every authenticated request.
#[derive(Clone)]
pub struct Session {
    pub token: String,
    pub cookie: String,
    pub user_id: u64,
}

impl Session {
    pub fn new(token: String, cookie: String, user_id: u64) -> Self {
        Session {
            token,
            cookie,
            user_id,
        }
    }

    /// Build a session from a login response, reading the user id out of the token.
    pub fn from_token(token: String, cookie: String) -> Result<Self, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let user_id = decode_user_id(&token)?;
        Ok(Session::new(token, cookie, user_id))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenPayload {
    #[serde(rename = "userId")]
    user_id: u64,
}

/// Read the user id out of a JWT. The token is not validated, the server does that.
pub fn decode_user_id(token: &str) -> Result<u64, AuthError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::MalformedToken("token has no payload part".to_owned()))?;

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .map_err(|e| AuthError::MalformedToken(format!("decoding payload {:?}: {}", payload, e)))?;

    let payload: TokenPayload = serde_json::from_slice(&decoded)
        .map_err(|e| AuthError::MalformedToken(format!("decoding user id: {}", e)))?;

    Ok(payload.user_id)
}

/// Body of a ballot submission: `{"value": ...}`
///
/// The value is the plaintext ballot object for ordinary polls and the base64 encoded
/// envelope for cryptographic ones.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BallotBody {
    pub value: Value,
}

/// Which users have voted, per poll: `{"<poll id>": [<user id>, ...]}`
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct VoteStatus(HashMap<u64, Vec<u64>>);

impl VoteStatus {
    pub fn from_slice(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(ProtocolError::VoteStatus)
    }

    pub fn has_voted(&self, poll_id: u64, user_id: u64) -> bool {
        self.0
            .get(&poll_id)
            .map(|voters| voters.contains(&user_id))
            .unwrap_or(false)
    }
}

/// An opaque, authenticated request/response facility.
///
/// Every method except `login` requires the session produced by `login`. Implementations
/// report non-success statuses as `TransportError::Status`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Newline delimited frames
    type Stream: AsyncBufRead + Unpin + Send + 'static;

    /// A single login attempt. Retries are up to the caller.
    async fn login(&self, credentials: &Credentials) -> Result<Session, Error>;

    /// Open the live-state stream for the given subscriptions
    async fn open_stream(
        &self,
        session: &Session,
        subscriptions: &[Subscription],
    ) -> Result<Self::Stream, Error>;

    async fn vote_status(&self, session: &Session, poll_id: u64) -> Result<VoteStatus, Error>;

    async fn submit_ballot(
        &self,
        session: &Session,
        poll_id: u64,
        body: &BallotBody,
    ) -> Result<(), Error>;
}
