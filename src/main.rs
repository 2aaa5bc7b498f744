use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flightchat::output::{render_message, render_progress, render_upload};
use flightchat::{
    Config, ConversationSession, HttpBackend, LogFile, Role, SendOutcome, UploadController,
    UploadResult, SUGGESTED_QUESTIONS,
};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "flightchat")]
#[command(about = "Upload flight telemetry logs and chat with an AI analyst about them")]
struct Cli {
    /// Backend base URL (overrides the config file and FLIGHTCHAT_BACKEND_URL)
    #[arg(long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a .bin log file and show its summary
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Chat about a log that was already uploaded
    Chat {
        /// Log ID returned by a previous upload
        log_id: String,
    },
    /// Upload a .bin log file, then start chatting about it
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));

    let cli = Cli::parse();
    let config = Config::load()?;
    let backend = HttpBackend::new(&config.backend_url(cli.backend.as_deref()))?;

    match cli.command {
        Commands::Upload { files } => {
            upload_log(&backend, &files).await?;
        }
        Commands::Chat { log_id } => {
            let session = ConversationSession::bound_to(log_id);
            chat_loop(&backend, &session, None).await?;
        }
        Commands::Analyze { files } => {
            let (file_name, result) = upload_log(&backend, &files).await?;
            let session = ConversationSession::bound_to(result.log_id);
            chat_loop(&backend, &session, Some(&file_name)).await?;
        }
    }

    Ok(())
}

async fn upload_log(backend: &HttpBackend, paths: &[PathBuf]) -> Result<(String, UploadResult)> {
    let files = paths
        .iter()
        .map(|p| {
            LogFile::from_path(p).with_context(|| format!("Failed to open log file: {}", p.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let file_name = files
        .first()
        .map(|f| f.name.clone())
        .unwrap_or_default();

    let summary_name = file_name.clone();
    let controller = UploadController::new(backend.clone()).on_success(move |result| {
        for line in render_upload(&summary_name, result) {
            println!("{}", line);
        }
    });

    let mut progress = controller.subscribe();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let percent = *progress.borrow_and_update();
            if percent > 0 {
                eprint!("\rUploading {}", render_progress(percent));
            }
        }
    });

    eprintln!("Uploading and processing {}...", file_name);
    let outcome = controller.submit(&files).await;
    printer.abort();
    eprintln!();

    Ok((file_name, outcome?))
}

async fn chat_loop(
    backend: &HttpBackend,
    session: &ConversationSession,
    file_name: Option<&str>,
) -> Result<()> {
    let log_id = session.log_id().unwrap_or_default();
    println!("Ready to analyze {}", file_name.unwrap_or(&log_id));
    println!("Ask me anything about this flight log! (/suggest, /history, /clear, /quit)");
    print_suggestions();

    let interactive = atty::is(atty::Stream::Stdin);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if interactive {
            eprint!("> ");
            std::io::stderr().flush().ok();
        }

        let Some(line) = lines.next_line().await.context("Failed to read from stdin")? else {
            break;
        };

        let mut draft = match line.trim() {
            "/quit" | "/exit" => break,
            "/history" => {
                for message in session.messages() {
                    println!("{}", render_message(&message));
                }
                continue;
            }
            "/clear" => {
                match session.clear(backend).await {
                    SendOutcome::Cleared => println!("Chat history cleared"),
                    SendOutcome::Failed(e) => eprintln!("{}", e),
                    _ => {}
                }
                continue;
            }
            command if command.starts_with("/suggest") => {
                match suggestion(command.trim_start_matches("/suggest")) {
                    Some(question) => {
                        println!("{}", question);
                        question.to_string()
                    }
                    None => {
                        print_suggestions();
                        continue;
                    }
                }
            }
            _ => line.clone(),
        };

        let before = session.messages().len();
        if session.send(backend, &mut draft).await == SendOutcome::Dropped {
            continue;
        }

        for message in session.messages().iter().skip(before) {
            if message.role != Role::User {
                println!("{}", render_message(message));
            }
        }
    }

    Ok(())
}

fn suggestion(arg: &str) -> Option<&'static str> {
    let index: usize = arg.trim().parse().ok()?;
    SUGGESTED_QUESTIONS.get(index.checked_sub(1)?).copied()
}

fn print_suggestions() {
    println!("Suggested questions:");
    for (i, question) in SUGGESTED_QUESTIONS.iter().enumerate() {
        println!("  {}. {}", i + 1, question);
    }
}
