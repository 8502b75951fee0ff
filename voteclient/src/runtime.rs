//! Drives a [`Machine`] against a [`Transport`].
//!
//! Every command is executed on its own task. Results come back as messages on a single
//! queue, which is drained one message at a time. The live-state stream is read by a
//! dedicated task that only reads the next frame once the machine asks for it.

use crate::*;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub struct Runtime<T: Transport> {
    transport: Arc<T>,
    credentials: Credentials,
    policy: RetryPolicy,
    tick_interval: Duration,

    sender: UnboundedSender<Message>,
    receiver: UnboundedReceiver<Message>,

    session: Option<Arc<Session>>,
    next_frame: Option<UnboundedSender<()>>,
}

impl<T: Transport> Runtime<T> {
    pub fn new(transport: T, credentials: Credentials, policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Runtime {
            transport: Arc::new(transport),
            credentials,
            policy,
            tick_interval: Duration::from_secs(1),
            sender,
            receiver,
            session: None,
            next_frame: None,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// A handle for feeding messages, usually user input, into the queue
    pub fn sender(&self) -> UnboundedSender<Message> {
        self.sender.clone()
    }

    /// Run until the machine asks to quit or hits a fatal error.
    ///
    /// The runtime holds a sender of its own, so the queue stays open when the stream ends
    /// or every handle from [`Runtime::sender`] is dropped. `render` is called after every
    /// handled message.
    pub async fn run<F>(mut self, mut machine: Machine, mut render: F) -> Machine
    where
        F: FnMut(&Machine),
    {
        let commands = machine.start();
        render(&machine);
        if self.execute(commands) {
            return machine;
        }

        while let Some(message) = self.receiver.recv().await {
            if let Message::Login(Ok(session)) = &message {
                self.session = Some(Arc::new(session.clone()));
            }

            let commands = machine.update(message);
            render(&machine);

            if self.execute(commands) || machine.phase() == Phase::Error {
                break;
            }
        }

        machine
    }

    /// Execute commands, returning whether the machine asked to quit
    fn execute(&mut self, commands: Vec<Command>) -> bool {
        for command in commands {
            debug!("executing {:?}", command);
            match command {
                Command::Quit => return true,
                Command::Login => self.login(),
                Command::ScheduleTick => {
                    let sender = self.sender.clone();
                    let interval = self.tick_interval;
                    tokio::spawn(async move {
                        tokio::time::sleep(interval).await;
                        let _ = sender.send(Message::Tick);
                    });
                }
                Command::OpenStream(subscriptions) => self.open_stream(subscriptions),
                Command::NextFrame => match &self.next_frame {
                    Some(next_frame) => {
                        let _ = next_frame.send(());
                    }
                    None => warn!("no open stream to read from"),
                },
                Command::QueryVoteStatus { poll_id } => self.query_vote_status(poll_id),
                Command::SubmitBallot { poll_id, body } => self.submit_ballot(poll_id, body),
            }
        }
        false
    }

    fn login(&self) {
        let transport = self.transport.clone();
        let credentials = self.credentials.clone();
        let policy = self.policy.clone();
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let result = login_with_retry(transport.as_ref(), &credentials, &policy).await;
            let _ = sender.send(Message::Login(result));
        });
    }

    fn open_stream(&mut self, subscriptions: Vec<Subscription>) {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                warn!("dropping stream request without a session");
                return;
            }
        };
        let transport = self.transport.clone();
        let sender = self.sender.clone();
        let (next_frame, mut requests) = mpsc::unbounded_channel::<()>();
        self.next_frame = Some(next_frame);

        tokio::spawn(async move {
            let stream = match transport.open_stream(&session, &subscriptions).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = sender.send(Message::Frame(Err(err)));
                    return;
                }
            };

            let mut reader = FrameReader::new(stream);
            loop {
                let result = reader.next_frame().await;
                let done = !matches!(result, Ok(Some(_)));

                if sender.send(Message::Frame(result)).is_err() || done {
                    return;
                }
                if requests.recv().await.is_none() {
                    return;
                }
            }
        });
    }

    fn query_vote_status(&self, poll_id: u64) {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                warn!("dropping vote status query without a session");
                return;
            }
        };
        let transport = self.transport.clone();
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let result = transport
                .vote_status(&session, poll_id)
                .await
                .map(|status| status.has_voted(poll_id, session.user_id));
            let _ = sender.send(Message::VoteStatus(result));
        });
    }

    fn submit_ballot(&self, poll_id: u64, body: BallotBody) {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                warn!("dropping ballot without a session");
                return;
            }
        };
        let transport = self.transport.clone();
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let result = transport.submit_ballot(&session, poll_id, &body).await;
            let _ = sender.send(Message::Submitted(result));
        });
    }
}
