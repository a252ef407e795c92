//! gmgate - run verified GM commands against a game server.
//!
//! The console credential comes from the config file, `GMGATE_CONSOLE_TOKEN`,
//! or the OS keychain, in that order of precedence (environment first).

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use gmgate_core::auth::CredentialStore;
use gmgate_core::command::{classify, normalize, normalize_verb, screen_dangerous, validate_syntax, TargetId};
use gmgate_core::store::JsonAccountStore;
use gmgate_core::{Config, ExecutionOutcome, GateError, GateResult, GateService};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory for daily-rotated log files. Unset means stderr only.
const ENV_LOG_DIR: &str = "GMGATE_LOG_DIR";

const LOG_FILE_PREFIX: &str = "gmgate.log";

const USAGE: &str = "\
Usage: gmgate <command> [args]

Commands:
  check <target> <command...>                 Screen, validate and normalize without sending
  ping                                        Check that the game server answers
  online                                      List online players
  run [--account <id> | --player] <target> <command...>
                                              Verify the target if needed and run the command;
                                              --player sends it with the target's own token
  register <account>                          Create an operator account
  allow <account> <target>                    Add a target to the account's permanent allowlist
  revoke <account> <target>                   Remove a target from the allowlist
  set-credential                              Store the console token in the OS keychain
  clear-credential                            Remove the console token from the OS keychain

Environment:
  GMGATE_SERVER_URL, GMGATE_API_PATH, GMGATE_CONSOLE_TOKEN, GMGATE_TIMEOUT_MS,
  GMGATE_LOG_DIR, RUST_LOG";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    match command.as_str() {
        "check" => check(rest),
        "ping" => ping().await,
        "online" => online().await,
        "run" => run(rest).await,
        "register" => register(rest).await,
        "allow" => allowlist(rest, true).await,
        "revoke" => allowlist(rest, false).await,
        "set-credential" => set_credential(),
        "clear-credential" => {
            CredentialStore::delete()?;
            println!("Console token removed from keychain.");
            Ok(())
        }
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Config file plus environment, with the keychain as the last source for
/// the console token.
fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    config.apply_env();
    if config.gateway.console_token().is_none() {
        match CredentialStore::get() {
            Ok(token) => {
                debug!("Using console token from keychain");
                config.gateway.console_token = Some(token);
            }
            Err(e) => debug!(error = %e, "No console token in keychain"),
        }
    }
    Ok(config)
}

fn build_service() -> Result<GateService> {
    let config = load_config()?;
    let accounts_path = config.accounts_path()?;
    let accounts = Arc::new(JsonAccountStore::new(accounts_path)?);
    let mut service = GateService::from_config(config, accounts)?;
    service.start_sweeper();
    Ok(service)
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn prompt_password(label: &str) -> Result<String> {
    rpassword::prompt_password(label).context("Failed to read password")
}

/// Split `<target> <command...>` and rejoin the command words.
fn target_and_command(args: &[String]) -> Result<(&str, String)> {
    match args.split_first() {
        Some((target, words)) if !words.is_empty() => Ok((target.as_str(), words.join(" "))),
        _ => bail!("expected <target> <command...>"),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn check(args: &[String]) -> Result<()> {
    let (target, command) = target_and_command(args)?;
    let target = TargetId::parse(target)?;
    screen_dangerous(&command)?;
    validate_syntax(&command)?;

    let verb = command
        .split_whitespace()
        .next()
        .map(normalize_verb)
        .unwrap_or_default();
    println!("verb:       {}", verb);
    println!("placement:  {:?}", classify(&verb));
    println!("normalized: {}", normalize(&command, &target));
    Ok(())
}

async fn ping() -> Result<()> {
    let service = build_service()?;
    let response = service.gateway().ping().await?;
    println!("{} ({})", response.message, response.retcode);
    Ok(())
}

async fn online() -> Result<()> {
    let service = build_service()?;
    let response = service.gateway().online_players().await?;
    println!("{}", serde_json::to_string_pretty(&response.data)?);
    Ok(())
}

async fn execute(
    service: &GateService,
    player: bool,
    target: &str,
    command: &str,
    session_token: Option<&str>,
) -> GateResult<ExecutionOutcome> {
    if player {
        service.execute_as_player(target, command).await
    } else {
        service.execute(target, command, session_token).await
    }
}

async fn run(args: &[String]) -> Result<()> {
    let (account, player, args) = match args {
        [flag, id, rest @ ..] if flag == "--account" => (Some(id.as_str()), false, rest),
        [flag, rest @ ..] if flag == "--player" => (None, true, rest),
        _ => (None, false, args),
    };
    let (target, command) = target_and_command(args)?;
    let service = build_service()?;

    let session = match account {
        Some(id) => {
            let password = prompt_password(&format!("Password for {}: ", id))?;
            Some(service.sessions().login(id, &password).await?)
        }
        None => None,
    };
    let session_token = session.as_ref().map(|s| s.token.as_str());

    let outcome = match execute(&service, player, target, &command, session_token).await {
        Err(e) if e.needs_verification() => {
            eprintln!("{}", e);
            let expires_at = service.send_code(target).await?;
            eprintln!(
                "A verification code was sent in game to {} (valid until {}).",
                target,
                expires_at.format("%H:%M:%S UTC")
            );
            let code = prompt("Code: ")?;
            service.verify_code(target, &code).await?;
            info!(target_id = target, "Target verified from CLI");
            execute(&service, player, target, &command, session_token).await?
        }
        other => other?,
    };

    if let Some(session) = session {
        service.sessions().logout(&session.token).await;
    }

    println!("> {}", outcome.command);
    if !outcome.output.is_empty() {
        println!("{}", outcome.output);
    }
    Ok(())
}

async fn register(args: &[String]) -> Result<()> {
    let [account] = args else {
        bail!("expected <account>");
    };
    let service = build_service()?;
    let password = prompt_password("New password: ")?;
    let confirm = prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("passwords do not match");
    }
    service.sessions().register(account, &password).await?;
    println!("Account {} created.", account.trim());
    Ok(())
}

/// Grant or revoke a permanent target. The account's password is required.
async fn allowlist(args: &[String], grant: bool) -> Result<()> {
    let [account, target] = args else {
        bail!("expected <account> <target>");
    };
    let target = TargetId::parse(target)?;
    let service = build_service()?;
    let password = prompt_password(&format!("Password for {}: ", account))?;
    let session = service.sessions().login(account, &password).await?;

    let result = if grant {
        service
            .sessions()
            .grant_permanent_verification(&session.account_id, target.as_str())
    } else {
        service
            .sessions()
            .revoke_permanent_verification(&session.account_id, target.as_str())
    };
    service.sessions().logout(&session.token).await;
    result?;

    if grant {
        println!("{} may now act on {} without verification.", session.account_id, target);
    } else {
        println!("{} removed from {}'s allowlist.", target, session.account_id);
    }
    Ok(())
}

fn set_credential() -> Result<()> {
    let token = prompt_password("Console token: ")?;
    if token.trim().is_empty() {
        return Err(GateError::Config("console token cannot be empty".to_string()).into());
    }
    CredentialStore::store(token.trim())?;
    println!("Console token stored in keychain.");
    Ok(())
}
