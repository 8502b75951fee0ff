use crate::*;
use log::{debug, info, warn};
use std::time::Duration;

/// When and how often a failed login is retried.
///
/// The server answers with access denied while it is still starting up, so by default the
/// login is retried on 403 only, once per second, for up to 100 attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub attempts: u32,
    pub interval: Duration,
    /// HTTP statuses that are retried. Anything else fails immediately.
    pub retry_on: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 100,
            interval: Duration::from_secs(1),
            retry_on: vec![403],
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, err: &Error) -> bool {
        match err {
            Error::Transport(TransportError::Status { status, .. }) => {
                self.retry_on.contains(status)
            }
            _ => false,
        }
    }
}

/// Log in, retrying according to `policy`.
///
/// Once the attempts are used up the last observed error is returned inside
/// `AuthError::RetriesExhausted`.
pub async fn login_with_retry<T: Transport + ?Sized>(
    transport: &T,
    credentials: &Credentials,
    policy: &RetryPolicy,
) -> Result<Session, Error> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match transport.login(credentials).await {
            Ok(session) => {
                info!("logged in as user {}", session.user_id);
                return Ok(session);
            }
            Err(err) => err,
        };

        if !policy.should_retry(&err) {
            warn!("login failed: {}", err);
            return Err(err);
        }

        if attempt >= attempts {
            warn!("login failed after {} attempts: {}", attempt, err);
            return Err(match err {
                Error::Transport(last) => AuthError::RetriesExhausted {
                    attempts: attempt,
                    last,
                }
                .into(),
                other => other,
            });
        }

        debug!("login attempt {} of {} denied, retrying", attempt, attempts);
        tokio::time::sleep(policy.interval).await;
    }
}
