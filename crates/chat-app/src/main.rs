use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use snafu::ResultExt;
use tidechat::app::{ReadInputSnafu, StorageSnafu, TurnSnafu, WriteOutputSnafu};
use tidechat::chat::TurnResult;
use tidechat::{
    AppResult, ChatController, SettingsStore, TurnOutcome, TurnUpdate, build_controller,
};
use tidechat_protocol::{TopicId, parse_answer};
use tidechat_storage::SqliteKeyValueStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Ask questions against a tidechat backend.
///
/// With `--question` one turn is run; otherwise questions are read from
/// stdin, one per line. Interactive input also accepts `/retry`, `/reset`
/// and `/topic <id>`.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Topic to converse in; defaults to the configured default topic.
    #[arg(long)]
    topic: Option<String>,

    /// Single question to ask.
    #[arg(long, short = 'q')]
    question: Option<String>,

    /// Settings file to load instead of the default location.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path or URL for conversation history.
    #[arg(long, value_name = "PATH")]
    db: Option<String>,

    /// Request whole answers instead of streamed deltas.
    #[arg(long)]
    no_stream: bool,

    /// Clear the topic's history before doing anything else.
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "tidechat failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let settings_store =
        SettingsStore::new(cli.config.unwrap_or_else(SettingsStore::default_config_path));
    let mut settings = (*settings_store.settings()).clone();
    if cli.no_stream {
        settings.turn.stream = false;
    }

    let database = cli
        .db
        .unwrap_or_else(|| settings.database_path().to_string_lossy().into_owned());
    let kv = SqliteKeyValueStore::open(&database)
        .await
        .context(StorageSnafu {
            stage: "cli-open-database",
        })?;

    let topic = cli.topic.map(TopicId::from);
    let controller = build_controller(&settings, Arc::new(kv), topic.as_ref()).await?;

    if cli.reset {
        controller.reset_topic().await.context(TurnSnafu {
            stage: "cli-reset-topic",
        })?;
        println!("cleared history for {}", controller.active_topic().await);
    }

    if let Some(question) = cli.question {
        let outcome = ask(&controller, &question).await.context(TurnSnafu {
            stage: "cli-ask-question",
        })?;
        return print_outcome(&outcome, settings.turn.stream);
    }
    if cli.reset {
        return Ok(());
    }

    interactive(&controller, settings.turn.stream).await
}

async fn interactive(controller: &ChatController, streamed: bool) -> AppResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
        stage: "cli-read-question",
    })? {
        let line = line.trim();
        let result = match line {
            "" => continue,
            "/retry" => controller.retry(print_update()).await,
            "/reset" => {
                if let Err(error) = controller.reset_topic().await {
                    eprintln!("{}", error.user_message());
                }
                continue;
            }
            _ => {
                if let Some(topic) = line.strip_prefix("/topic ") {
                    if let Err(error) = controller.switch_topic(&TopicId::from(topic)).await {
                        eprintln!("{}", error.user_message());
                    }
                    continue;
                }
                ask(controller, line).await
            }
        };

        match result {
            Ok(outcome) => print_outcome(&outcome, streamed)?,
            Err(error) => {
                println!();
                eprintln!("{}", error.user_message());
            }
        }
    }

    Ok(())
}

async fn ask(controller: &ChatController, question: &str) -> TurnResult<TurnOutcome> {
    controller.submit(question, print_update()).await
}

/// Writes each snapshot's new suffix as it arrives.
fn print_update() -> impl FnMut(TurnUpdate) {
    let mut printed = 0;
    move |update| {
        if let TurnUpdate::Partial(partial) = update
            && let Some(delta) = partial.content.get(printed..)
        {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(delta.as_bytes()).ok();
            stdout.flush().ok();
            printed = partial.content.len();
        }
    }
}

fn print_outcome(outcome: &TurnOutcome, streamed: bool) -> AppResult<()> {
    let mut stdout = std::io::stdout().lock();
    let TurnOutcome::Committed(answer) = outcome else {
        return writeln!(stdout, "(answer dropped)").context(WriteOutputSnafu {
            stage: "cli-print-abandoned",
        });
    };

    let parsed = parse_answer(answer.content(), false);
    let result = (|| {
        if !streamed {
            write!(stdout, "{}", answer.content())?;
        }
        writeln!(stdout)?;
        for (index, citation) in parsed.citations.iter().enumerate() {
            writeln!(stdout, "  [{}] {citation}", index + 1)?;
        }
        for followup in &parsed.followup_questions {
            writeln!(stdout, "  > {followup}")?;
        }
        stdout.flush()
    })();

    result.context(WriteOutputSnafu {
        stage: "cli-print-answer",
    })
}
