use log::{info, LevelFilter};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use num_enum::TryFromPrimitive;
use voteclient::{Machine, Phase, Runtime};

mod config;
mod input;
mod render;
mod rest;

use config::Config;

#[derive(TryFromPrimitive, PartialEq, Copy, Clone, Debug)]
#[repr(u8)]
enum Verbosity {
    Silent = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Silent => LevelFilter::Off,
            Verbosity::Error => LevelFilter::Error,
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

/// Log to stderr so the view on stdout stays readable
fn init_logging(verbosity: Verbosity) -> anyhow::Result<()> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();

    let config = log4rs::config::Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(verbosity.into()))?;

    log4rs::init_config(config)?;
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<Phase> {
    let transport = rest::HttpTransport::new(&config)?;
    info!("connecting to {}", config.addr());

    let runtime = Runtime::new(transport, config.credentials(), config.retry_policy());
    tokio::spawn(input::forward_stdin(runtime.sender()));

    let mut renderer = render::Renderer::default();
    let machine = Machine::new(config.poll_id, config.main_key);
    let machine = runtime
        .run(machine, |machine| renderer.render(machine))
        .await;

    Ok(machine.phase())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = config::command().get_matches();
    let config = Config::from_matches(&matches)?;

    // No -v means warnings and errors
    let verbosity =
        Verbosity::try_from(config.verbosity.saturating_add(2)).unwrap_or(Verbosity::Debug);
    init_logging(verbosity)?;

    if run(config).await? == Phase::Error {
        std::process::exit(1);
    }
    Ok(())
}
