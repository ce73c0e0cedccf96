use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use services::{Clock, NetworkSwitch, StaticIdentity, SurveySessionService};
use storage::local::FileSessionStore;
use storage::repository::{ParticipantRepository, ResponseRepository, Storage};
use storage::rest::RestRemoteStore;
use survey_core::model::{CohortId, SurveyId, UserId};
use tracing_subscriber::EnvFilter;

mod terminal;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidSeed { raw: String },
    InvalidId { flag: &'static str, raw: String },
    MissingSurvey,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidSeed { raw } => write!(f, "invalid --seed value: {raw}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw:?}"),
            ArgsError::MissingSurvey => write!(f, "--survey is required"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_id<T: std::str::FromStr>(flag: &'static str, raw: String) -> Result<T, ArgsError> {
    raw.parse().map_err(|_| ArgsError::InvalidId { flag, raw })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Take,
    Status,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "take" => Some(Self::Take),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    state_dir: PathBuf,
    user_id: Option<UserId>,
    survey_id: SurveyId,
    cohort_id: Option<CohortId>,
    seed: Option<u64>,
    offline: bool,
    remote_url: Option<String>,
    remote_key: String,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = normalize_sqlite_url(
            &std::env::var("SURVEY_DB_URL").unwrap_or_else(|_| "survey.sqlite3".into()),
        );
        let mut state_dir = std::env::var("SURVEY_STATE_DIR")
            .map_or_else(|_| PathBuf::from(".survey-state"), PathBuf::from);
        let mut user_id = std::env::var("SURVEY_USER_ID")
            .ok()
            .and_then(|value| value.parse::<UserId>().ok());
        let mut survey_id: Option<SurveyId> = None;
        let mut cohort_id: Option<CohortId> = None;
        let mut seed: Option<u64> = None;
        let mut offline = false;
        let mut remote_url = std::env::var("SURVEY_REMOTE_URL").ok();
        let remote_key = std::env::var("SURVEY_REMOTE_KEY").unwrap_or_default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(&value);
                }
                "--state-dir" => {
                    state_dir = PathBuf::from(require_value(args, "--state-dir")?);
                }
                "--user" => {
                    user_id = Some(parse_id("--user", require_value(args, "--user")?)?);
                }
                "--survey" => {
                    survey_id = Some(parse_id("--survey", require_value(args, "--survey")?)?);
                }
                "--cohort" => {
                    cohort_id = Some(parse_id("--cohort", require_value(args, "--cohort")?)?);
                }
                "--seed" => {
                    let value = require_value(args, "--seed")?;
                    seed = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| ArgsError::InvalidSeed { raw: value.clone() })?,
                    );
                }
                "--offline" => offline = true,
                "--remote" => {
                    remote_url = Some(require_value(args, "--remote")?);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            state_dir,
            user_id,
            survey_id: survey_id.ok_or(ArgsError::MissingSurvey)?,
            cohort_id,
            seed,
            offline,
            remote_url,
            remote_key,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- take   --survey <id> [options]");
    eprintln!("  cargo run -p app -- status --survey <id> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://survey.sqlite3)");
    eprintln!("  --state-dir <dir>         Where in-progress sessions live (default: .survey-state)");
    eprintln!("  --user <id>               Signed-in user");
    eprintln!("  --survey <id>             Survey to take");
    eprintln!("  --cohort <id>             Cohort recorded on the participant");
    eprintln!("  --seed <n>                Deterministic question order for new sessions");
    eprintln!("  --offline                 Start offline; choosing retry goes back online");
    eprintln!("  --remote <url>            Send participants and responses to a REST endpoint");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  SURVEY_DB_URL, SURVEY_STATE_DIR, SURVEY_USER_ID");
    eprintln!("  SURVEY_REMOTE_URL, SURVEY_REMOTE_KEY");
    eprintln!("  RUST_LOG (default: info)");
}

const MEMORY_DB: &str = "sqlite::memory:";

/// Turn `--db` input into an absolute `sqlite://` URL. Bare paths and
/// `sqlite:` prefixed paths resolve against the working directory.
fn normalize_sqlite_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw == MEMORY_DB || raw.starts_with("sqlite://") {
        return raw.to_owned();
    }
    let path = Path::new(raw.strip_prefix("sqlite:").unwrap_or(raw));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Database file behind a normalized URL; `None` for in-memory databases.
fn sqlite_file(db_url: &str) -> Result<Option<PathBuf>, ArgsError> {
    if db_url == MEMORY_DB {
        return Ok(None);
    }
    let invalid = || ArgsError::InvalidDbUrl {
        raw: db_url.to_owned(),
    };
    let rest = db_url.strip_prefix("sqlite://").ok_or_else(invalid)?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() {
        return Err(invalid());
    }
    Ok(Some(PathBuf::from(path)))
}

/// Create the database file and its directory so the pool can open it.
fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = sqlite_file(db_url)? else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn build_storage(args: &Args) -> Result<Storage, Box<dyn std::error::Error>> {
    prepare_sqlite_file(&args.db_url)?;
    let mut storage = Storage::sqlite(&args.db_url).await?;

    if let Some(url) = &args.remote_url {
        tracing::info!(remote = %url, "sending submissions to remote endpoint");
        let remote = RestRemoteStore::new(url.clone(), args.remote_key.clone());
        let participants: Arc<dyn ParticipantRepository> = Arc::new(remote.clone());
        let responses: Arc<dyn ResponseRepository> = Arc::new(remote);
        storage.participants = participants;
        storage.responses = responses;
    }
    Ok(storage)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => {
            print_usage();
            return Ok(());
        }
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Take,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let args = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    init_tracing();

    let storage = build_storage(&args).await?;
    let local = Arc::new(FileSessionStore::open(&args.state_dir)?);
    let identity = Arc::new(
        args.user_id
            .clone()
            .map_or_else(StaticIdentity::anonymous, StaticIdentity::new),
    );
    let network = if args.offline {
        NetworkSwitch::offline()
    } else {
        NetworkSwitch::online()
    };

    let mut service = SurveySessionService::new(
        Clock::system(),
        &storage,
        local,
        identity,
        Arc::new(network.clone()),
    );
    if let Some(seed) = args.seed {
        service = service.with_rng_seed(seed);
    }

    match cmd {
        Command::Take => {
            let session = service
                .start_session(&args.survey_id, args.cohort_id.clone())
                .await?;
            terminal::take(&service, &network, session).await
        }
        Command::Status => {
            match service.load_session(&args.survey_id).await? {
                Some(session) => terminal::print_status(&session),
                None => println!("No session in progress for survey {}.", args.survey_id),
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
