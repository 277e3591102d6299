use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use lingo_srs::logging::init_tracing;
use lingo_srs::{
    format_interval, to_persisted, Clock, Grade, JsonFileStore, ReviewResult, SrsConfig, SrsResult,
    StudyDeck, SystemClock,
};

#[derive(Parser)]
#[command(name = "lingo-srs", about = "Spaced-repetition scheduler for a JSON deck", version)]
struct Cli {
    /// Deck file (created on first import)
    #[arg(long, global = true, env = "SRS_DECK_FILE", default_value = "deck.json")]
    deck: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print today's study queue
    Queue {
        /// Override the configured due-card limit
        #[arg(long)]
        max_due: Option<usize>,
        /// Override the configured new-card limit
        #[arg(long)]
        max_new: Option<usize>,
    },

    /// Grade a review (again, hard, good, easy or 1-4)
    Grade { key: String, grade: Grade },

    /// Show the interval each grade would produce
    Preview { key: String },

    /// Add new cards
    Import {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Collection statistics
    Stats,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match SrsConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = init_tracing(&config.log_level, config.log_dir.as_deref());
    config.log_ignored();

    match run(cli, &config) {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to render output");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: &SrsConfig) -> SrsResult<Value> {
    let store = JsonFileStore::new(cli.deck);
    let mut deck = StudyDeck::open(store, SystemClock, config)?;

    match cli.command {
        Command::Queue { max_due, max_new } => {
            let mut limits = config.limits;
            limits.max_due = max_due.unwrap_or(limits.max_due);
            limits.max_new = max_new.unwrap_or(limits.max_new);
            let queue = deck.get_study_queue(SystemClock.now(), limits);
            Ok(json!({ "queue": queue }))
        }
        Command::Grade { key, grade } => {
            let result = deck.grade_review(&key, grade)?;
            Ok(review_json(&result))
        }
        Command::Preview { key } => {
            let preview = deck.preview(&key)?;
            let mut out = serde_json::Map::new();
            out.insert("retrievability".to_string(), json!(deck.retrievability(&key)?));
            for grade in Grade::ALL {
                let result = preview.for_grade(grade);
                out.insert(
                    grade.as_str().to_string(),
                    json!({
                        "interval": format_interval(result.interval),
                        "state": result.state.phase(),
                    }),
                );
            }
            Ok(Value::Object(out))
        }
        Command::Import { keys } => {
            let mut imported = Vec::with_capacity(keys.len());
            for key in keys {
                imported.push(deck.import_card(&key)?.key().to_string());
            }
            Ok(json!({ "imported": imported }))
        }
        Command::Stats => Ok(json!({
            "stats": deck.stats(),
            "retentionRate": deck.retention_rate(),
        })),
    }
}

fn review_json(result: &ReviewResult) -> Value {
    json!({
        "card": to_persisted(&result.state),
        "elapsedDays": result.elapsed_days,
        "retrievability": result.retrievability,
        "interval": format_interval(result.interval),
    })
}
