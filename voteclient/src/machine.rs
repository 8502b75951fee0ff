//! The voting state machine.
//!
//! The machine is a plain value driven by tagged [`Message`]s. It never performs IO: every
//! side effect is returned as a [`Command`] for the runtime to execute. Exactly one message is
//! handled at a time, so the live state needs no locking.

use crate::*;
use log::{debug, info, warn};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Authenticating,
    /// Logged in, waiting for the poll to show up
    Syncing,
    /// The poll exists but is not open for voting
    Waiting,
    Started,
    /// A ballot is in flight, or the last submission failed
    BallotPending,
    Voted,
    Published,
    /// Terminal
    Error,
}

/// Results delivered to the dispatch loop
#[derive(Debug)]
pub enum Message {
    Tick,
    Login(Result<Session, Error>),
    /// `Ok(None)` is a cleanly closed stream
    Frame(Result<Option<Frame>, Error>),
    VoteStatus(Result<bool, Error>),
    Submitted(Result<(), Error>),
    Input(Input),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Next,
    Previous,
    Choose(Choice),
    SelectOption(u64),
    Submit,
    Quit,
}

/// Side effects requested by the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login,
    ScheduleTick,
    OpenStream(Vec<Subscription>),
    /// Read the next frame of the open stream
    NextFrame,
    QueryVoteStatus { poll_id: u64 },
    SubmitBallot { poll_id: u64, body: BallotBody },
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BallotStatus {
    #[default]
    Draft,
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Default)]
pub struct Ballot {
    pub option_id: Option<u64>,
    pub choice: Choice,
    /// Only set for cryptographic polls, once the server accepted the ballot
    pub token: Option<VoteToken>,
    /// Token sealed into the ballot in flight
    pub pending_token: Option<VoteToken>,
    pub status: BallotStatus,
    pub error: Option<Error>,
    /// The value as it went over the wire
    pub sent_value: Option<String>,
}

pub struct Machine {
    poll_id: u64,
    main_key: Option<MainKey>,

    phase: Phase,
    ticks: u64,
    user_id: Option<u64>,

    state: LiveState,
    user: User,
    poll: Poll,
    organization: Organization,
    poll_state: Option<PollState>,
    stream_closed: bool,

    has_voted: bool,
    ballot: Ballot,
    verification: Option<Result<(), CryptoError>>,

    fatal: Option<Error>,
    last_error: Option<Error>,
}

impl Machine {
    pub fn new(poll_id: u64, main_key: Option<MainKey>) -> Self {
        Machine {
            poll_id,
            main_key,
            phase: Phase::Unauthenticated,
            ticks: 0,
            user_id: None,
            state: LiveState::default(),
            user: User::default(),
            poll: Poll::default(),
            organization: Organization::default(),
            poll_state: None,
            stream_closed: false,
            has_voted: false,
            ballot: Ballot::default(),
            verification: None,
            fatal: None,
            last_error: None,
        }
    }

    /// Kick off the login
    pub fn start(&mut self) -> Vec<Command> {
        self.set_phase(Phase::Authenticating);
        vec![Command::Login, Command::ScheduleTick]
    }

    pub fn update(&mut self, message: Message) -> Vec<Command> {
        match message {
            Message::Tick => {
                self.ticks += 1;
                vec![Command::ScheduleTick]
            }
            Message::Input(Input::Quit) => vec![Command::Quit],
            message if self.phase == Phase::Error => {
                debug!("ignoring {:?} after a fatal error", message);
                vec![]
            }
            Message::Login(result) => self.on_login(result),
            Message::Frame(result) => self.on_frame(result),
            Message::VoteStatus(result) => self.on_vote_status(result),
            Message::Submitted(result) => self.on_submitted(result),
            Message::Input(input) => self.on_input(input),
        }
    }

    fn on_login(&mut self, result: Result<Session, Error>) -> Vec<Command> {
        let session = match result {
            Ok(session) => session,
            Err(err) => return self.fail(err),
        };

        self.user_id = Some(session.user_id);
        self.set_phase(Phase::Syncing);
        vec![
            Command::OpenStream(subscriptions(session.user_id, self.poll_id)),
            Command::QueryVoteStatus {
                poll_id: self.poll_id,
            },
        ]
    }

    fn on_frame(&mut self, result: Result<Option<Frame>, Error>) -> Vec<Command> {
        let frame = match result {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("live-state stream closed");
                self.stream_closed = true;
                return vec![];
            }
            Err(err) => return self.fail(err),
        };

        debug!("merging frame with {} keys", frame.len());
        self.state.merge_frame(frame);
        self.last_error = None;

        let state_changed = match self.reproject() {
            Ok(changed) => changed,
            Err(err) => return self.fail(err),
        };

        let mut commands = Vec::new();
        if state_changed {
            // The vote status may have changed from another client
            commands.push(Command::QueryVoteStatus {
                poll_id: self.poll_id,
            });
        }
        commands.push(Command::NextFrame);

        self.refresh();
        commands
    }

    fn on_vote_status(&mut self, result: Result<bool, Error>) -> Vec<Command> {
        match result {
            Ok(voted) => {
                self.has_voted = voted || self.ballot.status == BallotStatus::Sent;
                self.last_error = None;
                self.refresh();
            }
            Err(err) => {
                warn!("querying vote status: {}", err);
                self.last_error = Some(err);
            }
        }
        vec![]
    }

    fn on_submitted(&mut self, result: Result<(), Error>) -> Vec<Command> {
        match result {
            Ok(()) => {
                info!("ballot for poll {} sent", self.poll_id);
                self.ballot.status = BallotStatus::Sent;
                self.ballot.error = None;
                self.ballot.token = self.ballot.pending_token.take();
                self.has_voted = true;
            }
            Err(err) => {
                warn!("sending ballot: {}", err);
                // The rejected ballot's token was never cast
                self.ballot.pending_token = None;
                self.ballot.status = BallotStatus::Failed;
                self.ballot.error = Some(err);
            }
        }
        self.refresh();
        vec![]
    }

    fn on_input(&mut self, input: Input) -> Vec<Command> {
        if !matches!(self.phase, Phase::Started | Phase::BallotPending) {
            debug!("ignoring {:?} in phase {:?}", input, self.phase);
            return vec![];
        }

        match input {
            Input::Next => self.ballot.choice = self.ballot.choice.next(),
            Input::Previous => self.ballot.choice = self.ballot.choice.previous(),
            Input::Choose(choice) => self.ballot.choice = choice,
            Input::SelectOption(option_id) => {
                if self.poll.option_ids.contains(&option_id) {
                    self.ballot.option_id = Some(option_id);
                } else {
                    self.ballot.error = Some(ValidationError::UnknownOption(option_id).into());
                }
            }
            Input::Submit => return self.submit(),
            Input::Quit => return vec![Command::Quit],
        }
        vec![]
    }

    fn submit(&mut self) -> Vec<Command> {
        if self.ballot.status == BallotStatus::Pending {
            debug!("ballot already in flight");
            return vec![];
        }

        let commands = match self.build_ballot(&mut OsRng) {
            Ok(body) => {
                self.ballot.status = BallotStatus::Pending;
                self.ballot.error = None;
                vec![Command::SubmitBallot {
                    poll_id: self.poll_id,
                    body,
                }]
            }
            Err(err) => {
                warn!("creating ballot: {}", err);
                self.ballot.pending_token = None;
                self.ballot.status = BallotStatus::Failed;
                self.ballot.error = Some(err);
                vec![]
            }
        };
        self.refresh();
        commands
    }

    /// Encode the current selection. Cryptographic polls get a fresh token and are sealed to
    /// the poll key.
    fn build_ballot<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<BallotBody, Error> {
        if self.poll.method != TallyMethod::YesNoAbstain {
            return Err(ValidationError::UnsupportedMethod(self.poll.method.to_string()).into());
        }
        if self.poll.min_votes > 1 {
            return Err(ValidationError::VoteAmount {
                min: self.poll.min_votes,
                max: self.poll.max_votes,
            }
            .into());
        }

        let option_id = self
            .selected_option()
            .ok_or(ValidationError::PollMisconfigured)?;

        let mut plaintext = Map::new();
        plaintext.insert(
            option_id.to_string(),
            Value::from(self.ballot.choice.code()),
        );

        if !self.poll.is_cryptographic() {
            let value = Value::Object(plaintext);
            self.ballot.pending_token = None;
            self.ballot.sent_value = Some(value.to_string());
            return Ok(BallotBody { value });
        }

        // No randomness is drawn for a poll key we would refuse anyway
        verify_poll_key(
            self.main_key.as_ref(),
            &self.poll.crypt_key,
            &self.poll.crypt_signature,
        )?;

        let token = VoteToken::generate(rng)?;
        plaintext.insert("token".to_owned(), Value::from(token.as_str()));
        let plaintext = Value::Object(plaintext).to_string();

        let envelope = seal_vote(
            plaintext.as_bytes(),
            self.main_key.as_ref(),
            &self.poll.crypt_key,
            &self.poll.crypt_signature,
            rng,
        )?;

        let value = envelope.to_base64();
        self.ballot.pending_token = Some(token);
        self.ballot.sent_value = Some(value.clone());
        Ok(BallotBody {
            value: Value::String(value),
        })
    }

    /// Re-project all entities from the live state.
    ///
    /// Returns whether the poll state changed since the last projection.
    fn reproject(&mut self) -> Result<bool, Error> {
        let organization: Organization = self.state.project(ORGANIZATION_ID)?;
        let user: User = match self.user_id {
            Some(user_id) => self.state.project(user_id)?,
            None => User::default(),
        };
        let mut poll: Poll = self.state.project(self.poll_id)?;
        // Tallies are scoped to the poll we were started for
        poll.id = self.poll_id;
        let present = self.state.contains_entity(Poll::COLLECTION, self.poll_id);

        if present && poll.option_ids.is_empty() {
            return Err(ValidationError::PollMisconfigured.into());
        }

        let poll_state = if present { Some(poll.state) } else { None };
        let changed = poll_state.is_some() && poll_state != self.poll_state;
        if changed {
            info!("poll {} is {}", self.poll_id, poll.state);
        }

        self.organization = organization;
        self.user = user;
        self.poll = poll;
        self.poll_state = poll_state;

        if !self
            .ballot
            .option_id
            .map_or(false, |id| self.poll.option_ids.contains(&id))
        {
            self.ballot.option_id = self.poll.option_ids.first().copied();
        }

        Ok(changed)
    }

    /// Derive the phase and, once published, check the tally
    fn refresh(&mut self) {
        if matches!(
            self.phase,
            Phase::Unauthenticated | Phase::Authenticating | Phase::Error
        ) {
            return;
        }

        let phase = match self.poll_state {
            None => Phase::Syncing,
            Some(PollState::Published) => Phase::Published,
            Some(PollState::Started) if self.has_voted => Phase::Voted,
            Some(PollState::Started) => match self.ballot.status {
                BallotStatus::Pending | BallotStatus::Failed => Phase::BallotPending,
                _ => Phase::Started,
            },
            Some(_) => Phase::Waiting,
        };

        if phase == Phase::Published && self.poll.is_cryptographic() {
            let verification = self.verify_results();
            if let Err(err) = &verification {
                warn!("poll results are invalid: {}", err);
            }
            self.verification = Some(verification);
        } else {
            self.verification = None;
        }

        self.set_phase(phase);
    }

    fn verify_results(&self) -> Result<(), CryptoError> {
        let domain = match self.organization.domain() {
            Ok(domain) => domain,
            Err(err) => {
                warn!("getting organization domain: {}", err);
                String::new()
            }
        };

        verify_poll_results(
            self.main_key.as_ref(),
            &self.poll,
            &domain,
            self.ballot.token.as_ref(),
        )
    }

    fn fail(&mut self, err: Error) -> Vec<Command> {
        warn!("{}", err);
        self.fatal = Some(err);
        self.set_phase(Phase::Error);
        vec![]
    }

    fn set_phase(&mut self, phase: Phase) {
        if phase != self.phase {
            info!("{:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn selected_option(&self) -> Option<u64> {
        self.ballot
            .option_id
            .or_else(|| self.poll.option_ids.first().copied())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn poll_id(&self) -> u64 {
        self.poll_id
    }

    pub fn main_key(&self) -> Option<&MainKey> {
        self.main_key.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn user_id(&self) -> Option<u64> {
        self.user_id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn poll(&self) -> &Poll {
        &self.poll
    }

    pub fn organization(&self) -> &Organization {
        &self.organization
    }

    pub fn live_state(&self) -> &LiveState {
        &self.state
    }

    pub fn has_voted(&self) -> bool {
        self.has_voted
    }

    pub fn ballot(&self) -> &Ballot {
        &self.ballot
    }

    pub fn stream_closed(&self) -> bool {
        self.stream_closed
    }

    /// Outcome of the tally check, once a cryptographic poll is published
    pub fn verification(&self) -> Option<&Result<(), CryptoError>> {
        self.verification.as_ref()
    }

    /// Whether the poll key carries a valid main-key signature
    pub fn poll_key_status(&self) -> Result<(), CryptoError> {
        verify_poll_key(
            self.main_key.as_ref(),
            &self.poll.crypt_key,
            &self.poll.crypt_signature,
        )
    }

    /// The error that stopped the machine
    pub fn fatal_error(&self) -> Option<&Error> {
        self.fatal.as_ref()
    }

    /// A recoverable error, cleared by the next successful message
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> Message {
        match value {
            Value::Object(map) => Message::Frame(Ok(Some(map))),
            _ => panic!("frame must be an object"),
        }
    }

    fn logged_in(poll_id: u64) -> Machine {
        let mut machine = Machine::new(poll_id, None);
        assert_eq!(machine.start(), vec![Command::Login, Command::ScheduleTick]);
        assert_eq!(machine.phase(), Phase::Authenticating);

        let session = Session::new("token".into(), "cookie".into(), 1);
        let commands = machine.update(Message::Login(Ok(session)));
        assert_eq!(
            commands,
            vec![
                Command::OpenStream(subscriptions(1, poll_id)),
                Command::QueryVoteStatus { poll_id },
            ]
        );
        assert_eq!(machine.phase(), Phase::Syncing);
        machine
    }

    #[test]
    fn test_login_failure_is_fatal() {
        let mut machine = Machine::new(7, None);
        machine.start();

        let err = TransportError::Status {
            status: 500,
            body: String::new(),
        };
        assert!(machine.update(Message::Login(Err(err.into()))).is_empty());
        assert_eq!(machine.phase(), Phase::Error);
        assert!(machine.fatal_error().is_some());

        // Nothing but ticks and quitting is handled anymore
        assert!(machine.update(frame(json!({"poll/7/state": "started"}))).is_empty());
        assert_eq!(machine.update(Message::Tick), vec![Command::ScheduleTick]);
        assert_eq!(
            machine.update(Message::Input(Input::Quit)),
            vec![Command::Quit]
        );
    }

    #[test]
    fn test_frames_drive_phase() {
        let mut machine = logged_in(7);

        // Other collections only: still syncing, keep reading
        let commands = machine.update(frame(json!({"user/1/username": "voter"})));
        assert_eq!(commands, vec![Command::NextFrame]);
        assert_eq!(machine.phase(), Phase::Syncing);
        assert_eq!(machine.user().username, "voter");

        let commands = machine.update(frame(json!({
            "poll/7/state": "created",
            "poll/7/option_ids": [10],
        })));
        assert_eq!(
            commands,
            vec![Command::QueryVoteStatus { poll_id: 7 }, Command::NextFrame]
        );
        assert_eq!(machine.phase(), Phase::Waiting);

        // Same state again: no new vote status query
        let commands = machine.update(frame(json!({"poll/7/title": "Motion"})));
        assert_eq!(commands, vec![Command::NextFrame]);

        let commands = machine.update(frame(json!({"poll/7/state": "started"})));
        assert_eq!(
            commands,
            vec![Command::QueryVoteStatus { poll_id: 7 }, Command::NextFrame]
        );
        assert_eq!(machine.phase(), Phase::Started);

        machine.update(Message::VoteStatus(Ok(true)));
        assert_eq!(machine.phase(), Phase::Voted);
    }

    #[test]
    fn test_poll_without_options() {
        let mut machine = logged_in(7);

        let commands = machine.update(frame(json!({"poll/7/state": "started"})));
        assert!(commands.is_empty());
        assert_eq!(machine.phase(), Phase::Error);
        assert!(matches!(
            machine.fatal_error(),
            Some(Error::Validation(ValidationError::PollMisconfigured))
        ));
    }

    #[test]
    fn test_stream_end_and_error() {
        let mut machine = logged_in(7);
        machine.update(frame(json!({"poll/7/state": "started", "poll/7/option_ids": [1]})));

        assert!(machine.update(Message::Frame(Ok(None))).is_empty());
        assert!(machine.stream_closed());
        assert_eq!(machine.phase(), Phase::Started);

        let mut machine = logged_in(7);
        let err = ProtocolError::Decode {
            key: "poll/7".into(),
            source: serde_json::from_str::<u32>("x").unwrap_err(),
        };
        assert!(machine.update(Message::Frame(Err(err.into()))).is_empty());
        assert_eq!(machine.phase(), Phase::Error);
    }

    #[test]
    fn test_submission_roundtrip() {
        let mut machine = logged_in(7);
        machine.update(frame(json!({"poll/7/state": "started", "poll/7/option_ids": [3]})));

        machine.update(Message::Input(Input::Next));
        machine.update(Message::Input(Input::Next));
        let commands = machine.update(Message::Input(Input::Submit));
        assert_eq!(
            commands,
            vec![Command::SubmitBallot {
                poll_id: 7,
                body: BallotBody {
                    value: json!({"3": "A"})
                },
            }]
        );
        assert_eq!(machine.phase(), Phase::BallotPending);

        // No second submission while one is in flight
        assert!(machine.update(Message::Input(Input::Submit)).is_empty());

        let err = TransportError::Status {
            status: 400,
            body: "closed".into(),
        };
        machine.update(Message::Submitted(Err(err.into())));
        assert_eq!(machine.phase(), Phase::BallotPending);
        assert_eq!(machine.ballot().status, BallotStatus::Failed);
        assert!(machine.ballot().error.is_some());

        // The voter re-triggers the submission
        let commands = machine.update(Message::Input(Input::Submit));
        assert_eq!(commands.len(), 1);
        machine.update(Message::Submitted(Ok(())));
        assert_eq!(machine.phase(), Phase::Voted);
        assert!(machine.has_voted());
        assert!(machine.ballot().error.is_none());

        // A stale vote status does not undo our own submission
        machine.update(Message::VoteStatus(Ok(false)));
        assert_eq!(machine.phase(), Phase::Voted);
    }

    #[test]
    fn test_unsupported_method() {
        let mut machine = logged_in(7);
        machine.update(frame(json!({
            "poll/7/state": "started",
            "poll/7/option_ids": [3, 4],
            "poll/7/pollmethod": "Y",
        })));

        assert!(machine.update(Message::Input(Input::Submit)).is_empty());
        assert_eq!(machine.phase(), Phase::BallotPending);
        assert!(matches!(
            machine.ballot().error,
            Some(Error::Validation(ValidationError::UnsupportedMethod(_)))
        ));
    }

    #[test]
    fn test_unknown_option() {
        let mut machine = logged_in(7);
        machine.update(frame(json!({"poll/7/state": "started", "poll/7/option_ids": [3, 4]})));
        assert_eq!(machine.ballot().option_id, Some(3));

        machine.update(Message::Input(Input::SelectOption(99)));
        assert_eq!(machine.ballot().option_id, Some(3));
        assert!(matches!(
            machine.ballot().error,
            Some(Error::Validation(ValidationError::UnknownOption(99)))
        ));

        machine.update(Message::Input(Input::SelectOption(4)));
        assert_eq!(machine.ballot().option_id, Some(4));
    }

    #[test]
    fn test_crypto_poll_without_main_key_blocks_sealing() {
        let mut machine = logged_in(7);
        machine.update(frame(json!({
            "poll/7/state": "started",
            "poll/7/option_ids": [3],
            "poll/7/type": "cryptographic",
            "poll/7/crypt_key": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            "poll/7/crypt_signature": "AAAA",
        })));

        assert!(machine.poll_key_status().is_err());
        assert!(machine.update(Message::Input(Input::Submit)).is_empty());
        assert!(matches!(
            machine.ballot().error,
            Some(Error::Crypto(CryptoError::InvalidPollKey))
        ));
        assert!(machine.ballot().token.is_none());
        assert!(machine.ballot().pending_token.is_none());
    }

    /// Fails the test if the machine draws any randomness
    struct UntouchedRng;

    impl RngCore for UntouchedRng {
        fn next_u32(&mut self) -> u32 {
            panic!("randomness drawn")
        }

        fn next_u64(&mut self) -> u64 {
            panic!("randomness drawn")
        }

        fn fill_bytes(&mut self, _dest: &mut [u8]) {
            panic!("randomness drawn")
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            panic!("randomness drawn")
        }
    }

    impl CryptoRng for UntouchedRng {}

    #[test]
    fn test_invalid_poll_key_draws_no_randomness() {
        let mut machine = logged_in(7);
        machine.update(frame(json!({
            "poll/7/state": "started",
            "poll/7/option_ids": [3],
            "poll/7/type": "cryptographic",
            "poll/7/crypt_key": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            "poll/7/crypt_signature": "AAAA",
        })));

        assert!(matches!(
            machine.build_ballot(&mut UntouchedRng),
            Err(Error::Crypto(CryptoError::InvalidPollKey))
        ));
        assert!(machine.ballot().pending_token.is_none());
    }

    #[test]
    fn test_vote_status_error_is_not_fatal() {
        let mut machine = logged_in(7);
        let err = TransportError::Request("connection reset".into());
        machine.update(Message::VoteStatus(Err(err.into())));
        assert_eq!(machine.phase(), Phase::Syncing);
        assert!(machine.last_error().is_some());

        machine.update(frame(json!({"user/1/username": "voter"})));
        assert!(machine.last_error().is_none());
    }

    #[test]
    fn test_input_ignored_before_start() {
        let mut machine = logged_in(7);
        machine.update(frame(json!({"poll/7/state": "finished", "poll/7/option_ids": [3]})));
        assert_eq!(machine.phase(), Phase::Waiting);
        assert!(machine.update(Message::Input(Input::Submit)).is_empty());
        assert_eq!(machine.ballot().status, BallotStatus::Draft);
    }
}
