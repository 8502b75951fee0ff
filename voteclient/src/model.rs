use crate::*;
use std::fmt;

/// A poll as projected from the live state.
///
/// Every field falls back to its default when the server has not sent it (or deleted it).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Poll {
    pub id: u64,
    pub title: String,

    #[serde(rename = "type")]
    pub poll_type: PollType,

    /// Tally method, eg `YNA`
    #[serde(rename = "pollmethod")]
    pub method: TallyMethod,

    pub state: PollState,

    #[serde(rename = "min_votes_amount")]
    pub min_votes: u32,

    #[serde(rename = "max_votes_amount")]
    pub max_votes: u32,

    #[serde(rename = "max_votes_per_option")]
    pub max_votes_per_option: u32,

    pub global_yes: bool,
    pub global_no: bool,
    pub global_abstain: bool,

    /// Selectable options
    pub option_ids: Vec<u64>,

    /// X25519 public key ballots are sealed to
    #[serde(with = "Base64Bytes")]
    pub crypt_key: Vec<u8>,

    /// Main-key signature over `crypt_key`
    #[serde(with = "Base64Bytes")]
    pub crypt_signature: Vec<u8>,

    /// The published tally, exactly as signed
    pub votes_raw: String,

    /// Main-key signature over `votes_raw`
    #[serde(with = "Base64Bytes")]
    pub votes_signature: Vec<u8>,
}

impl Entity for Poll {
    const COLLECTION: &'static str = "poll";
    const FIELDS: &'static [&'static str] = &[
        "id",
        "title",
        "type",
        "pollmethod",
        "state",
        "min_votes_amount",
        "max_votes_amount",
        "max_votes_per_option",
        "global_yes",
        "global_no",
        "global_abstain",
        "option_ids",
        "crypt_key",
        "crypt_signature",
        "votes_raw",
        "votes_signature",
    ];
}

impl Poll {
    pub fn is_cryptographic(&self) -> bool {
        self.poll_type == PollType::Cryptographic
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum PollType {
    Analog,
    Named,
    Pseudoanonymous,
    Cryptographic,
    Other(String),
}

impl Default for PollType {
    fn default() -> Self {
        PollType::Other(String::new())
    }
}

impl From<String> for PollType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "analog" => PollType::Analog,
            "named" => PollType::Named,
            "pseudoanonymous" => PollType::Pseudoanonymous,
            "cryptographic" => PollType::Cryptographic,
            _ => PollType::Other(value),
        }
    }
}

impl From<PollType> for String {
    fn from(value: PollType) -> Self {
        match value {
            PollType::Analog => "analog".to_owned(),
            PollType::Named => "named".to_owned(),
            PollType::Pseudoanonymous => "pseudoanonymous".to_owned(),
            PollType::Cryptographic => "cryptographic".to_owned(),
            PollType::Other(other) => other,
        }
    }
}

impl fmt::Display for PollType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name: String = self.clone().into();
        f.write_str(&name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum TallyMethod {
    /// Yes, no or abstain on a single option
    YesNoAbstain,
    YesNo,
    Yes,
    No,
    Other(String),
}

// Motion polls are yes/no/abstain unless the server says otherwise
impl Default for TallyMethod {
    fn default() -> Self {
        TallyMethod::YesNoAbstain
    }
}

impl From<String> for TallyMethod {
    fn from(value: String) -> Self {
        match value.as_str() {
            "YNA" => TallyMethod::YesNoAbstain,
            "YN" => TallyMethod::YesNo,
            "Y" => TallyMethod::Yes,
            "N" => TallyMethod::No,
            _ => TallyMethod::Other(value),
        }
    }
}

impl From<TallyMethod> for String {
    fn from(value: TallyMethod) -> Self {
        match value {
            TallyMethod::YesNoAbstain => "YNA".to_owned(),
            TallyMethod::YesNo => "YN".to_owned(),
            TallyMethod::Yes => "Y".to_owned(),
            TallyMethod::No => "N".to_owned(),
            TallyMethod::Other(other) => other,
        }
    }
}

impl fmt::Display for TallyMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name: String = self.clone().into();
        f.write_str(&name)
    }
}

/// Poll lifecycle
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    #[default]
    Created,
    Started,
    Finished,
    Published,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PollState::Created => "created",
            PollState::Started => "started",
            PollState::Finished => "finished",
            PollState::Published => "published",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct User {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub title: String,
}

impl Entity for User {
    const COLLECTION: &'static str = "user";
    const FIELDS: &'static [&'static str] = &["username", "first_name", "last_name", "title"];
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts: Vec<&str> = [self.first_name.as_str(), self.last_name.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            parts.push(&self.username);
        } else if !self.title.is_empty() {
            parts.insert(0, &self.title);
        }

        f.write_str(&parts.join(" "))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Organization {
    pub url: String,
}

impl Entity for Organization {
    const COLLECTION: &'static str = "organization";
    const FIELDS: &'static [&'static str] = &["url"];
}

impl Organization {
    /// Host name of the organization url. Tallies are scoped to it.
    pub fn domain(&self) -> Result<String, url::ParseError> {
        let parsed = url::Url::parse(&self.url)?;
        Ok(parsed.host_str().unwrap_or_default().to_owned())
    }
}

/// A voter's answer on a yes/no/abstain option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Choice {
    #[default]
    Yes,
    No,
    Abstain,
}

impl Choice {
    /// Wire code used in the ballot body
    pub fn code(&self) -> &'static str {
        match self {
            Choice::Yes => "Y",
            Choice::No => "N",
            Choice::Abstain => "A",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Choice::Yes => Choice::No,
            Choice::No => Choice::Abstain,
            Choice::Abstain => Choice::Yes,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            Choice::Yes => Choice::Abstain,
            Choice::No => Choice::Yes,
            Choice::Abstain => Choice::No,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Choice::Yes => "Yes",
            Choice::No => "No",
            Choice::Abstain => "Abstain",
        };
        f.write_str(name)
    }
}
