use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use quiz_core::GateDecision;
use quiz_core::model::{ModuleKey, ParticipantId, QuizId};
use services::reports::{CertificateStatus, training_completion_percentage};
use services::{
    AttemptContext, Clock, CommandOutcome, EngineConfig, QuizEngine, SubmittedAttempt, TickOutcome,
};
use storage::repository::Storage;
use tracing_subscriber::EnvFilter;

mod seed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Seed,
    Progress,
    Check,
    Take,
    History,
}

impl FromStr for Command {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seed" => Ok(Command::Seed),
            "progress" => Ok(Command::Progress),
            "check" => Ok(Command::Check),
            "take" => Ok(Command::Take),
            "history" => Ok(Command::History),
            other => Err(ArgsError::UnknownCommand(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
struct Args {
    command: Command,
    db_url: String,
    participant: ParticipantId,
    quiz: Option<QuizId>,
    training: String,
    module: Option<String>,
    now: Option<DateTime<Utc>>,
    json: bool,
}

#[derive(Debug)]
enum ArgsError {
    MissingCommand,
    UnknownCommand(String),
    MissingValue { flag: &'static str },
    MissingOption { flag: &'static str, command: Command },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidQuizId { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingCommand => write!(f, "a command is required"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingOption { flag, command } => {
                write!(f, "{command:?} requires {flag}")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidQuizId { raw } => write!(f, "invalid --quiz value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
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
        let mut db_url = std::env::var("QUIZ_DB_URL")
            .unwrap_or_else(|_| "sqlite://quiz.sqlite3?mode=rwc".into());
        let mut participant = std::env::var("QUIZ_PARTICIPANT").unwrap_or_default();
        let mut quiz = None;
        let mut training = seed::SAMPLE_TRAINING.to_owned();
        let mut module = None;
        let mut now: Option<DateTime<Utc>> = None;
        let mut json = false;
        let mut command = None;

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
                "--participant" => {
                    participant = require_value(&mut args, "--participant")?;
                }
                "--quiz" => {
                    let value = require_value(&mut args, "--quiz")?;
                    let parsed = value
                        .parse::<QuizId>()
                        .map_err(|_| ArgsError::InvalidQuizId { raw: value.clone() })?;
                    quiz = Some(parsed);
                }
                "--training" => {
                    training = require_value(&mut args, "--training")?;
                }
                "--module" => {
                    module = Some(require_value(&mut args, "--module")?);
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--json" => json = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                flag if flag.starts_with('-') => return Err(ArgsError::UnknownArg(arg)),
                _ if command.is_none() => command = Some(arg.parse::<Command>()?),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let command = command.ok_or(ArgsError::MissingCommand)?;
        if matches!(command, Command::Check | Command::Take) && quiz.is_none() {
            return Err(ArgsError::MissingOption {
                flag: "--quiz",
                command,
            });
        }

        Ok(Self {
            command,
            db_url,
            participant: ParticipantId::new(participant),
            quiz,
            training,
            module,
            now,
            json,
        })
    }

    fn quiz_id(&self) -> Result<QuizId, ArgsError> {
        self.quiz.ok_or(ArgsError::MissingOption {
            flag: "--quiz",
            command: self.command,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  quiz <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  seed                      Write the sample training into the database");
    eprintln!("  progress                  Show module progress for a training");
    eprintln!("  check --quiz <id>         Show whether a quiz may be started");
    eprintln!("  take --quiz <id>          Take a quiz, answering on stdin");
    eprintln!("  history                   Show attempt statistics and training history");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://quiz.sqlite3?mode=rwc)");
    eprintln!("  --participant <name>      Participant name (default: Anonymous)");
    eprintln!("  --quiz <id>               Quiz id");
    eprintln!("  --training <title>        Training title (default: BAIM)");
    eprintln!("  --module <title>          Restrict progress to one module");
    eprintln!("  --now <rfc3339>           Fixed current time");
    eprintln!("  --json                    Print progress and history as JSON");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_PARTICIPANT, QUIZ_LOCKOUT_FAILURES, QUIZ_PARTICIPANT_MATCHING");
    eprintln!("  RUST_LOG (default: info)");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

//
// ─── COMMANDS ──────────────────────────────────────────────────────────────────
//

type AppResult = Result<(), Box<dyn std::error::Error>>;

async fn run_seed(storage: &Storage, args: &Args) -> AppResult {
    let quizzes = seed::seed(storage).await?;
    for quiz in &quizzes {
        println!("{:>3}  {:<9} {}", quiz.id(), quiz.kind().label(), quiz.module());
    }
    println!("Seeded {} quizzes into {}", quizzes.len(), args.db_url);
    Ok(())
}

async fn run_progress(engine: &QuizEngine, args: &Args) -> AppResult {
    let modules = match &args.module {
        Some(title) => {
            let module = ModuleKey::new(args.training.clone(), title.clone())?;
            let progress = engine.evaluate_progress(&args.participant, &module).await?;
            vec![(module, progress)]
        }
        None => {
            engine
                .training_progress(&args.participant, &args.training)
                .await?
        }
    };
    let completion = training_completion_percentage(&modules);

    if args.json {
        let modules: Vec<_> = modules
            .iter()
            .map(|(module, progress)| {
                serde_json::json!({ "module": module, "progress": progress })
            })
            .collect();
        let out = serde_json::json!({
            "participant": args.participant.as_str(),
            "training": args.training,
            "completion_percentage": completion,
            "modules": modules,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} / {}: {completion}% complete", args.participant, args.training);
    for (module, progress) in &modules {
        let pre = match progress.pre_test_score {
            Some(score) if progress.pre_test_passed => format!("passed ({score}%)"),
            Some(score) => format!("not passed ({score}%)"),
            None if progress.pre_test_passed => "not required".to_owned(),
            None => "not taken".to_owned(),
        };
        let post = match (progress.post_test_score, progress.post_test_expiry_at) {
            (Some(score), Some(expiry)) if progress.post_test_passed => {
                format!("passed ({score}%), valid until {}", expiry.date_naive())
            }
            (Some(score), _) if progress.post_test_passed => format!("passed ({score}%)"),
            (Some(_), Some(expiry)) if progress.post_test_expired => {
                format!("expired on {}", expiry.date_naive())
            }
            (Some(score), _) => format!("not passed ({score}%)"),
            (None, _) => "not taken".to_owned(),
        };
        println!("  {module}");
        println!("    Pre Test:  {pre}");
        println!("    Post Test: {post}");
    }
    Ok(())
}

async fn run_check(engine: &QuizEngine, args: &Args) -> AppResult {
    let quiz_id = args.quiz_id()?;
    let overview = engine.overview(quiz_id).await?;
    let access = engine.can_start_attempt(&args.participant, quiz_id).await?;

    println!("{} for {}", overview.kind.label(), overview.module);
    println!("  Questions:     {}", overview.question_count);
    println!("  Pass score:    {}%", overview.minimum_pass_score);
    match overview.time_limit_minutes {
        Some(minutes) => println!("  Time limit:    {minutes} minutes"),
        None => println!("  Time limit:    none"),
    }
    match &access.decision {
        GateDecision::Allowed => println!("  Status:        available"),
        GateDecision::Blocked(reason) => println!("  Status:        blocked, {reason}"),
    }
    if access.stale {
        println!("  (attempt history unavailable; status based on last known progress)");
    }
    Ok(())
}

fn read_line() -> io::Result<Option<String>> {
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_owned()))
}

fn confirm(title: &str, message: &str) -> io::Result<bool> {
    println!("{title}: {message}");
    print!("Continue? [y/N] ");
    Ok(read_line()?.is_some_and(|answer| answer.eq_ignore_ascii_case("y")))
}

fn print_submission(submitted: &SubmittedAttempt, now: DateTime<Utc>) {
    let record = &submitted.record;
    println!(
        "Score: {}/{} ({}%), {}",
        record.score(),
        record.total_questions(),
        record.percentage(),
        if record.passed() { "passed" } else { "not passed" }
    );
    if let CertificateStatus::Valid { expires_at } = CertificateStatus::of(record, now) {
        println!("Certificate valid until {}", expires_at.date_naive());
    }
}

/// Returns false when the participant left the attempt.
async fn answer_questions(
    engine: &QuizEngine,
    ctx: &mut AttemptContext,
) -> Result<bool, Box<dyn std::error::Error>> {
    for position in 0..ctx.questions().len() {
        match engine.tick(ctx).await? {
            TickOutcome::AutoSubmitted(submitted) => {
                println!("Time is up. Your answers were submitted.");
                print_submission(&submitted, engine.clock().now());
                return Ok(false);
            }
            TickOutcome::Running { remaining } => {
                println!("[{}:{:02} left]", remaining / 60, remaining % 60);
            }
            TickOutcome::Untimed | TickOutcome::Finished => {}
        }

        let question = &ctx.questions()[position];
        let option_count = question.options().len();
        println!();
        println!("{}. {}", position + 1, question.prompt());
        for (i, option) in question.options().iter().enumerate() {
            println!("   {}) {option}", i + 1);
        }
        print!("Answer (1-{option_count}, blank to skip, q to leave): ");

        let Some(line) = read_line()? else {
            break;
        };
        match line.as_str() {
            "" => {}
            "q" => match engine.request_exit(ctx) {
                Some(prompt) => {
                    if confirm(prompt.title(), prompt.message())? {
                        if let CommandOutcome::Exited {
                            remaining: Some(remaining),
                        } = engine.execute(ctx, prompt.confirm()).await?
                        {
                            println!("Left with {}:{:02} remaining.", remaining / 60, remaining % 60);
                        }
                        return Ok(false);
                    }
                    prompt.cancel();
                }
                None => return Ok(false),
            },
            raw => {
                let chosen = raw
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .is_some_and(|option| ctx.choose(position, option));
                if !chosen {
                    println!("Ignored invalid answer {raw:?}; question left unanswered.");
                }
            }
        }
    }
    Ok(true)
}

async fn run_take(engine: &QuizEngine, args: &Args) -> AppResult {
    let quiz_id = args.quiz_id()?;
    let mut ctx = engine
        .prepare_attempt_checked(&args.participant, quiz_id)
        .await?;
    println!(
        "{} for {}: {} questions",
        ctx.quiz().kind().label(),
        ctx.quiz().module(),
        ctx.questions().len()
    );

    if !answer_questions(engine, &mut ctx).await? {
        return Ok(());
    }

    if let TickOutcome::AutoSubmitted(submitted) = engine.tick(&mut ctx).await? {
        println!("Time is up. Your answers were submitted.");
        print_submission(&submitted, engine.clock().now());
        return Ok(());
    }

    let prompt = engine.request_submit(&ctx);
    println!();
    if !confirm(prompt.title(), prompt.message())? {
        prompt.cancel();
        println!("Not submitted.");
        return Ok(());
    }
    let command = prompt.confirm();
    if let CommandOutcome::Submitted(submitted) = engine.execute(&mut ctx, command).await? {
        print_submission(&submitted, engine.clock().now());
    }
    Ok(())
}

async fn run_history(engine: &QuizEngine, args: &Args) -> AppResult {
    let stats = engine.participant_stats(&args.participant).await?;
    let trainings = engine.training_history(&args.participant).await?;

    if args.json {
        let out = serde_json::json!({
            "participant": args.participant.as_str(),
            "stats": stats,
            "trainings": trainings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", args.participant);
    println!(
        "  {} attempts, {} passed, average {}%, best {}%",
        stats.attempts, stats.passed_count, stats.average_percentage, stats.best_percentage
    );
    for item in &trainings {
        println!(
            "  {}: {} attempts, {} passed, last on {}",
            item.training_title,
            item.attempts,
            item.passed_count,
            item.latest_completed_at.date_naive()
        );
    }
    Ok(())
}

async fn run() -> AppResult {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let clock = args.now.map_or(Clock::default(), Clock::fixed);
    let engine = QuizEngine::from_storage(clock, &storage).with_config(EngineConfig::from_env());

    match args.command {
        Command::Seed => run_seed(&storage, &args).await,
        Command::Progress => run_progress(&engine, &args).await,
        Command::Check => run_check(&engine, &args).await,
        Command::Take => run_take(&engine, &args).await,
        Command::History => run_history(&engine, &args).await,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
