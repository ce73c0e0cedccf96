use std::fmt;
use std::path::PathBuf;

use storage::repository::Storage;
use survey_core::model::Survey;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    files: Vec<PathBuf>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    NoFiles,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::NoFiles => write!(f, "at least one --file is required"),
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("SURVEY_DB_URL")
            .unwrap_or_else(|_| "sqlite://survey.sqlite3?mode=rwc".into());
        let mut files: Vec<PathBuf> = std::env::var("SURVEY_FILE")
            .ok()
            .map(PathBuf::from)
            .into_iter()
            .collect();

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--file" => {
                    files.push(PathBuf::from(require_value(&mut args, "--file")?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        if files.is_empty() {
            return Err(ArgsError::NoFiles);
        }
        Ok(Self { db_url, files })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- --file <survey.json> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://survey.sqlite3?mode=rwc)");
    eprintln!("  --file <path>             Survey JSON document to upsert (repeatable)");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  SURVEY_DB_URL, SURVEY_FILE");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;

    for path in &args.files {
        let raw = std::fs::read_to_string(path)?;
        let survey: Survey = serde_json::from_str(&raw)?;
        storage.surveys.upsert_survey(&survey).await?;
        println!(
            "Seeded survey {} ({} questions, {} required) into {}",
            survey.id(),
            survey.questions().len(),
            survey.required_count(),
            args.db_url
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
