use log::warn;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use voteclient::{Choice, Input, Message};

/// Map one line typed by the voter to an input. An empty line submits.
pub fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim().to_lowercase();
    let input = match line.as_str() {
        "" | "s" | "submit" => Input::Submit,
        "q" | "quit" => Input::Quit,
        "k" | "up" => Input::Previous,
        "j" | "down" => Input::Next,
        "y" | "yes" => Input::Choose(Choice::Yes),
        "n" | "no" => Input::Choose(Choice::No),
        "a" | "abstain" => Input::Choose(Choice::Abstain),
        other => Input::SelectOption(other.parse().ok()?),
    };
    Some(input)
}

/// Forward stdin to the runtime until stdin closes or the runtime is gone
pub async fn forward_stdin(sender: UnboundedSender<Message>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("reading stdin: {}", err);
                break;
            }
        };

        match parse_input(&line) {
            Some(input) => {
                if sender.send(Message::Input(input)).is_err() {
                    return;
                }
            }
            None => warn!("unknown input {:?}", line),
        }
    }

    let _ = sender.send(Message::Input(Input::Quit));
}
