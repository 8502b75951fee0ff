use super::*;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde_json::{json, Value};

fn frame(value: Value) -> Message {
    match value {
        Value::Object(map) => Message::Frame(Ok(Some(map))),
        _ => panic!("frame must be an object"),
    }
}

fn login(machine: &mut Machine) {
    machine.start();
    let session = Session::new("token".into(), "refreshId=abc".into(), 1);
    machine.update(Message::Login(Ok(session)));
}

#[test]
fn end_to_end_motion_poll() {
    let mut machine = Machine::new(7, None);
    login(&mut machine);

    machine.update(frame(json!({
        "user/1/username": "voter",
        "organization/1/url": "https://vote.example.org",
    })));
    machine.update(frame(json!({
        "poll/7/state": "started",
        "poll/7/option_ids": [10, 11, 12],
    })));
    assert_eq!(machine.phase(), Phase::Started);
    assert_eq!(machine.organization().domain().unwrap(), "vote.example.org");

    machine.update(Message::Input(Input::SelectOption(11)));
    machine.update(Message::Input(Input::Choose(Choice::No)));
    let commands = machine.update(Message::Input(Input::Submit));

    match commands.as_slice() {
        [Command::SubmitBallot { poll_id, body }] => {
            assert_eq!(*poll_id, 7);
            assert_eq!(
                serde_json::to_string(body).unwrap(),
                r#"{"value":{"11":"N"}}"#
            );
        }
        other => panic!("expected a ballot, got {:?}", other),
    }
    assert_eq!(machine.ballot().sent_value.as_deref(), Some(r#"{"11":"N"}"#));

    machine.update(Message::Submitted(Ok(())));
    assert_eq!(machine.phase(), Phase::Voted);

    // Results of non-cryptographic polls are not checked
    machine.update(frame(json!({"poll/7/state": "published"})));
    assert_eq!(machine.phase(), Phase::Published);
    assert!(machine.verification().is_none());
}

#[test]
fn end_to_end_cryptographic_poll() {
    // The authority's main key and a poll key signed with it
    let authority = SigningKey::from_bytes(&[9u8; 32]);
    let main_key = MainKey::from_bytes(authority.verifying_key().as_bytes()).unwrap();
    let (poll_secret, poll_public) = generate_keypair(&mut OsRng);
    let poll_key_sig = authority.sign(poll_public.as_bytes());

    let mut machine = Machine::new(7, Some(main_key));
    login(&mut machine);

    machine.update(frame(json!({
        "organization/1/url": "https://vote.example.org",
        "poll/7/type": "cryptographic",
        "poll/7/state": "started",
        "poll/7/option_ids": [10],
        "poll/7/crypt_key": STANDARD.encode(poll_public.as_bytes()),
        "poll/7/crypt_signature": STANDARD.encode(poll_key_sig.to_bytes()),
    })));
    assert_eq!(machine.phase(), Phase::Started);
    machine.poll_key_status().unwrap();

    machine.update(Message::Input(Input::Choose(Choice::Abstain)));
    let commands = machine.update(Message::Input(Input::Submit));
    let sealed = match commands.as_slice() {
        [Command::SubmitBallot { body, .. }] => body.value.as_str().unwrap().to_owned(),
        other => panic!("expected a ballot, got {:?}", other),
    };

    // Only the holder of the poll secret can read the ballot
    let envelope = SealedEnvelope::from_base64(&sealed).unwrap();
    let plaintext = open_envelope(&poll_secret, envelope.as_bytes()).unwrap();
    let ballot: Value = serde_json::from_slice(&plaintext).unwrap();

    let token = machine.ballot().pending_token.clone().unwrap();
    assert_eq!(ballot, json!({"10": "A", "token": token.as_str()}));
    assert!(machine.ballot().token.is_none());

    machine.update(Message::Submitted(Ok(())));
    assert_eq!(machine.phase(), Phase::Voted);
    assert_eq!(machine.ballot().token.as_ref(), Some(&token));

    // The authority publishes a signed tally listing the token
    let votes_raw = json!({
        "id": "vote.example.org/7",
        "votes": [{"token": "c29tZW9uZQ=="}, {"token": token.as_str()}],
    })
    .to_string();
    let votes_signature = authority.sign(votes_raw.as_bytes());

    machine.update(frame(json!({
        "poll/7/state": "published",
        "poll/7/votes_raw": votes_raw,
        "poll/7/votes_signature": STANDARD.encode(votes_signature.to_bytes()),
    })));
    assert_eq!(machine.phase(), Phase::Published);
    assert!(matches!(machine.verification(), Some(Ok(()))));

    // A tally that lost the token is caught
    let votes_raw = json!({"id": "vote.example.org/7", "votes": []}).to_string();
    let votes_signature = authority.sign(votes_raw.as_bytes());
    machine.update(frame(json!({
        "poll/7/votes_raw": votes_raw,
        "poll/7/votes_signature": STANDARD.encode(votes_signature.to_bytes()),
    })));
    assert!(matches!(
        machine.verification(),
        Some(Err(CryptoError::TokenNotFound))
    ));
}

#[test]
fn rejected_ballot_token_is_not_held() {
    let authority = SigningKey::from_bytes(&[9u8; 32]);
    let main_key = MainKey::from_bytes(authority.verifying_key().as_bytes()).unwrap();
    let (_, poll_public) = generate_keypair(&mut OsRng);
    let poll_key_sig = authority.sign(poll_public.as_bytes());

    let mut machine = Machine::new(7, Some(main_key));
    login(&mut machine);
    machine.update(frame(json!({
        "organization/1/url": "https://vote.example.org",
        "poll/7/type": "cryptographic",
        "poll/7/state": "started",
        "poll/7/option_ids": [10],
        "poll/7/crypt_key": STANDARD.encode(poll_public.as_bytes()),
        "poll/7/crypt_signature": STANDARD.encode(poll_key_sig.to_bytes()),
    })));

    assert_eq!(machine.update(Message::Input(Input::Submit)).len(), 1);
    let err = TransportError::Status {
        status: 400,
        body: "poll is closed".into(),
    };
    machine.update(Message::Submitted(Err(err.into())));
    assert_eq!(machine.phase(), Phase::BallotPending);
    assert!(machine.ballot().token.is_none());
    assert!(machine.ballot().pending_token.is_none());

    // The voter never resubmits; the tally rightly does not list the token
    let votes_raw = json!({
        "id": "vote.example.org/7",
        "votes": [{"token": "c29tZW9uZQ=="}],
    })
    .to_string();
    let votes_signature = authority.sign(votes_raw.as_bytes());
    machine.update(frame(json!({
        "poll/7/state": "published",
        "poll/7/votes_raw": votes_raw,
        "poll/7/votes_signature": STANDARD.encode(votes_signature.to_bytes()),
    })));

    assert_eq!(machine.phase(), Phase::Published);
    assert!(matches!(machine.verification(), Some(Ok(()))));
}

#[test]
fn forged_poll_key_is_refused() {
    let authority = SigningKey::from_bytes(&[9u8; 32]);
    let impostor = SigningKey::from_bytes(&[10u8; 32]);
    let main_key = MainKey::from_bytes(authority.verifying_key().as_bytes()).unwrap();
    let (_, poll_public) = generate_keypair(&mut OsRng);
    let forged_sig = impostor.sign(poll_public.as_bytes());

    let mut machine = Machine::new(7, Some(main_key));
    login(&mut machine);
    machine.update(frame(json!({
        "poll/7/type": "cryptographic",
        "poll/7/state": "started",
        "poll/7/option_ids": [10],
        "poll/7/crypt_key": STANDARD.encode(poll_public.as_bytes()),
        "poll/7/crypt_signature": STANDARD.encode(forged_sig.to_bytes()),
    })));

    assert!(machine.update(Message::Input(Input::Submit)).is_empty());
    assert_eq!(machine.phase(), Phase::BallotPending);
    assert!(matches!(
        machine.ballot().error,
        Some(Error::Crypto(CryptoError::InvalidPollKey))
    ));
    assert!(machine.ballot().sent_value.is_none());
}

#[test]
fn published_results_from_another_organization() {
    let authority = SigningKey::from_bytes(&[9u8; 32]);
    let main_key = MainKey::from_bytes(authority.verifying_key().as_bytes()).unwrap();

    let mut machine = Machine::new(7, Some(main_key));
    login(&mut machine);

    let votes_raw = json!({"id": "elsewhere.example.org/7", "votes": []}).to_string();
    let votes_signature = authority.sign(votes_raw.as_bytes());
    machine.update(frame(json!({
        "organization/1/url": "https://vote.example.org",
        "poll/7/type": "cryptographic",
        "poll/7/state": "published",
        "poll/7/option_ids": [10],
        "poll/7/votes_raw": votes_raw,
        "poll/7/votes_signature": STANDARD.encode(votes_signature.to_bytes()),
    })));

    assert_eq!(machine.phase(), Phase::Published);
    match machine.verification() {
        Some(Err(CryptoError::ScopeMismatch { found, expected })) => {
            assert_eq!(found, "elsewhere.example.org/7");
            assert_eq!(expected, "vote.example.org/7");
        }
        other => panic!("expected a scope mismatch, got {:?}", other),
    }
}
