use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;
use voteclient::{Credentials, MainKey, RetryPolicy};

/// Everything the client needs to know before it starts
#[derive(Debug, Clone)]
pub struct Config {
    /// Host and optional port of the voting server
    pub domain: String,
    pub username: String,
    pub password: String,
    pub http: bool,
    pub ipv4: bool,
    pub insecure: bool,
    pub login_attempts: u32,
    pub login_interval: Duration,
    pub main_key: Option<MainKey>,
    pub poll_id: u64,
    pub verbosity: u8,
}

pub fn command() -> Command {
    Command::new("voteclient")
        .version("0.1.0")
        .author("Patrick Hayes <patrick.d.hayes@gmail.com>")
        .about("Casts a ballot on a poll of a live voting server")
        .arg(
            Arg::new("domain")
                .short('d')
                .long("domain")
                .env("VOTECLIENT_DOMAIN")
                .default_value("localhost:8000")
                .help("Domain of the voting server"),
        )
        .arg(
            Arg::new("username")
                .short('u')
                .long("username")
                .env("VOTECLIENT_USERNAME")
                .default_value("admin")
                .help("Username to log in with"),
        )
        .arg(
            Arg::new("password")
                .short('p')
                .long("password")
                .env("VOTECLIENT_PASSWORD")
                .hide_env_values(true)
                .default_value("admin")
                .help("Password to log in with"),
        )
        .arg(
            Arg::new("main-key")
                .short('k')
                .long("main-key")
                .env("VOTECLIENT_MAIN_KEY")
                .help("Public main key of the server, base64 encoded. Required for cryptographic polls"),
        )
        .arg(
            Arg::new("http")
                .long("http")
                .action(ArgAction::SetTrue)
                .help("Use http instead of https"),
        )
        .arg(
            Arg::new("ipv4")
                .short('4')
                .long("ipv4")
                .action(ArgAction::SetTrue)
                .help("Force IPv4 for requests"),
        )
        .arg(
            Arg::new("insecure")
                .long("insecure")
                .action(ArgAction::SetTrue)
                .help("Accept invalid TLS certificates"),
        )
        .arg(
            Arg::new("login-attempts")
                .long("login-attempts")
                .value_parser(value_parser!(u32).range(1..))
                .default_value("100")
                .help("How often to try logging in while the server denies access"),
        )
        .arg(
            Arg::new("login-interval")
                .long("login-interval")
                .value_parser(value_parser!(u64))
                .default_value("1")
                .help("Seconds between login attempts"),
        )
        .arg(
            Arg::new("v")
                .short('v')
                .action(ArgAction::Count)
                .help("Sets the level of verbosity"),
        )
        .arg(
            Arg::new("poll-id")
                .value_name("POLL_ID")
                .value_parser(value_parser!(u64))
                .required(true)
                .help("ID of the poll"),
        )
}

impl Config {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let string = |id: &str| matches.get_one::<String>(id).cloned().unwrap_or_default();

        let main_key = match matches.get_one::<String>("main-key") {
            Some(encoded) if !encoded.is_empty() => Some(
                MainKey::from_base64(encoded)
                    .map_err(|e| anyhow::anyhow!("decoding main key: {}", e))?,
            ),
            _ => None,
        };

        Ok(Config {
            domain: string("domain"),
            username: string("username"),
            password: string("password"),
            http: matches.get_flag("http"),
            ipv4: matches.get_flag("ipv4"),
            insecure: matches.get_flag("insecure"),
            login_attempts: matches.get_one::<u32>("login-attempts").copied().unwrap_or(100),
            login_interval: Duration::from_secs(
                matches.get_one::<u64>("login-interval").copied().unwrap_or(1),
            ),
            main_key,
            poll_id: matches
                .get_one::<u64>("poll-id")
                .copied()
                .ok_or_else(|| anyhow::anyhow!("POLL_ID is required"))?,
            verbosity: matches.get_count("v"),
        })
    }

    /// The domain with the http or https prefix
    pub fn addr(&self) -> String {
        let proto = if self.http { "http" } else { "https" };
        format!("{}://{}", proto, self.domain)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.login_attempts,
            interval: self.login_interval,
            ..RetryPolicy::default()
        }
    }
}
