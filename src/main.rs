use anyhow::Result;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use bookshelf_client::auth::{FileSessionStore, SessionEvent, TokenInspector};
use bookshelf_client::config::{self, Command, Config};
use bookshelf_client::error::ClientError;
use bookshelf_client::http_client::BookshelfHttpClient;
use bookshelf_client::screens;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!(api_url = %config.api_url, "Configuration loaded");

    let store = Arc::new(FileSessionStore::open(&config.session_file)?);
    let inspector = TokenInspector::new(config.safety_margin()?);
    tracing::debug!(
        session_file = %store.path().display(),
        safety_margin_secs = inspector.safety_margin().num_seconds(),
        "Session store ready"
    );
    let client = BookshelfHttpClient::connect(
        config.api_url.clone(),
        store,
        inspector,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;

    let mut events = client.session().subscribe();
    let outcome = run(&client, command).await;

    let mut session_expired = false;
    while let Ok(event) = events.try_recv() {
        tracing::debug!(?event, "Session event");
        if event == SessionEvent::Expired {
            session_expired = true;
        }
    }

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            report(&e, session_expired);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Dispatch one subcommand
async fn run(client: &BookshelfHttpClient, command: Command) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::Login { email } => {
            let (email, password) = config::prompt_credentials(email, false)?;
            client.auth().login(&email, &password).await?;
            writeln!(out, "{}", screens::welcome(client))?;
        }
        Command::Register { email } => {
            let (email, password) = config::prompt_credentials(email, true)?;
            client.auth().register(&email, &password).await?;
            writeln!(out, "Account created. {}", screens::welcome(client))?;
        }
        Command::Logout => {
            client.auth().logout().await;
            writeln!(out, "Logged out.")?;
        }
        Command::Whoami => screens::whoami(client, &mut out)?,
        Command::Search { query, page, size } => {
            let query = query.join(" ");
            screens::search(client, &query, page.saturating_sub(1), size, &mut out).await?;
        }
        Command::Show { id } => screens::show(client, &id, &mut out).await?,
        Command::Add { id } => {
            screens::add(client, &id, &mut out).await?;
        }
        Command::ReadList { all: true, .. } => screens::read_list_all(client, &mut out).await?,
        Command::ReadList { page, size, .. } => {
            screens::read_list(client, page.saturating_sub(1), size, &mut out).await?;
        }
        Command::Remove { id } => screens::remove(client, id, &mut out).await?,
    }

    Ok(())
}

/// Print a failure for the user
fn report(error: &anyhow::Error, session_expired: bool) {
    match error.downcast_ref::<ClientError>() {
        Some(e) if session_expired || e.is_session_lost() => {
            eprintln!("Your session is no longer valid ({}).", e);
            eprintln!("Run `bookshelf login` to sign in again.");
        }
        Some(ClientError::Validation { message, .. }) => eprintln!("{}", message),
        Some(ClientError::Network(msg)) => {
            eprintln!("Could not reach the bookshelf service: {}", msg);
        }
        Some(e) => eprintln!("Request failed: {}", e),
        None => eprintln!("Error: {:#}", error),
    }
}
