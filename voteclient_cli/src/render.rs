use serde::Deserialize;
use std::fmt::Write as _;
use voteclient::{
    AuthError, BallotStatus, Choice, Error, Machine, Phase, PollState, TallyMethod, TransportError,
};

/// Prints the view whenever it changes
#[derive(Default)]
pub struct Renderer {
    last: String,
}

impl Renderer {
    pub fn render(&mut self, machine: &Machine) {
        let view = view(machine);
        if view != self.last {
            println!("{}\n", view);
            self.last = view;
        }
    }
}

fn progress(ticks: u64) -> String {
    ".".repeat((ticks % 3) as usize + 1)
}

/// The denial message of a 403, if that is what stopped the login
fn login_denied(err: &Error) -> Option<String> {
    let body = match err {
        Error::Transport(TransportError::Status { status: 403, body }) => body,
        Error::Auth(AuthError::RetriesExhausted {
            last: TransportError::Status { status: 403, body },
            ..
        }) => body,
        _ => return None,
    };

    #[derive(Deserialize)]
    struct LoginMessage {
        message: String,
    }

    Some(
        serde_json::from_str::<LoginMessage>(body)
            .map(|msg| msg.message)
            .unwrap_or_else(|_| body.clone()),
    )
}

pub fn view(machine: &Machine) -> String {
    if let Some(err) = machine.fatal_error() {
        return match login_denied(err) {
            Some(message) => format!("Login impossible: {}", message),
            None => format!("Error: {}", err),
        };
    }

    let user_id = match machine.user_id() {
        Some(user_id) => user_id,
        None => return format!("Logging in {}", progress(machine.ticks())),
    };

    if machine.user().username.is_empty() {
        return format!(
            "Logged in as user {}. Loading data {}",
            user_id,
            progress(machine.ticks())
        );
    }

    let mut out = format!("Hello {}!\n\n", machine.user());

    if let Some(main_key) = machine.main_key() {
        let _ = write!(
            out,
            "Please make sure the public main key is correct: {}\n\n",
            main_key.to_base64()
        );
    }

    out += &view_poll(machine);

    if let Some(err) = machine.last_error() {
        let _ = write!(out, "\nWarning: {}", err);
    }
    if machine.stream_closed() {
        out += "\nLive updates ended.";
    }

    out
}

fn view_poll(machine: &Machine) -> String {
    if machine.phase() == Phase::Syncing {
        return format!(
            "The poll does currently not exist. Please wait {}",
            progress(machine.ticks())
        );
    }

    let poll = machine.poll();
    let ballot = machine.ballot();
    let mut out = String::new();

    let _ = writeln!(out, "Poll: {} ({}, {})", poll.title, poll.state, poll.poll_type);

    match poll.state {
        PollState::Started => {
            if poll.is_cryptographic() {
                if let Err(err) = machine.poll_key_status() {
                    let _ = write!(out, "Poll key is invalid: {}", err);
                    return out;
                }
                out += "Poll key is valid\n\n";
            }

            if let Some(err) = &ballot.error {
                let _ = writeln!(out, "Error: {}", err);
            }

            if machine.has_voted() {
                let _ = writeln!(out, "You already voted for poll {}", machine.poll_id());
                if let Some(value) = &ballot.sent_value {
                    let _ = write!(out, "Your vote: {}", value);
                }
                return out;
            }

            if ballot.status == BallotStatus::Pending {
                let _ = writeln!(out, "Sending ballot {}", progress(machine.ticks()));
            }

            if poll.method != TallyMethod::YesNoAbstain {
                let _ = writeln!(
                    out,
                    "Poll has method {}. This is not yet supported",
                    poll.method
                );
                return out;
            }

            if poll.option_ids.len() > 1 {
                for option_id in &poll.option_ids {
                    let marker = if ballot.option_id == Some(*option_id) { ">" } else { " " };
                    let _ = writeln!(out, "{} option {}", marker, option_id);
                }
                out += "\n";
            }

            for choice in [Choice::Yes, Choice::No, Choice::Abstain] {
                let checked = if ballot.choice == choice { "X" } else { " " };
                let _ = writeln!(out, "[{}] {}", checked, choice);
            }
            out += "\nup/down or y/n/a to choose, an option id to switch options, enter to submit, q to quit\n";
        }

        PollState::Published => {
            match machine.verification() {
                Some(Err(err)) => {
                    let _ = write!(out, "Poll results are invalid: {}\n\n", err);
                }
                Some(Ok(())) => out += "Poll results are valid\n\n",
                None => {}
            }
            let _ = writeln!(out, "{}", poll.votes_raw);
        }

        PollState::Created => {
            let _ = writeln!(out, "Waiting for the poll to start {}", progress(machine.ticks()));
        }

        PollState::Finished => {
            let _ = writeln!(
                out,
                "Poll is closed, waiting for results {}",
                progress(machine.ticks())
            );
        }
    }

    out
}
