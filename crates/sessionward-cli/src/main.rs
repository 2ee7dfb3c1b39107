//! sessionward - drive the session core from a terminal.
//!
//! Each command restores the persisted session, resolves it against the
//! server and reports what a front-end would render.

use std::io;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionward_core::{
    Config, Credential, GuardDecision, PersistenceMode, RouteContext, SessionManager,
};

const USAGE: &str = "\
Usage: sessionward <command>

Commands:
  status             Resolve the session and print its state
  whoami             Print the current user's profile
  check <route>      Evaluate the route guard for a protected route
  get <path>         Send an authenticated GET and print the response body
  login <credential> Adopt a credential issued by the login flow
  logout             End the session
  login-url          Print the URL that starts the provider login flow

Environment:
  SESSIONWARD_BASE_URL      API base URL
  SESSIONWARD_PERSISTENCE   none | file | keyring (default: file)
  SESSIONWARD_CREDENTIAL    credential for `login` when not given as argument
  RUST_LOG                  log filter (default: warn)";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn load_config() -> Result<Config> {
    let mut config = Config::load()?.with_env_overrides()?;
    // Every command is its own process; without a durable record each one
    // would start logged out.
    if config.persistence == PersistenceMode::None
        && std::env::var(sessionward_core::config::ENV_PERSISTENCE).is_err()
    {
        config.persistence = PersistenceMode::File;
    }
    Ok(config)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = load_config()?;
    let manager = SessionManager::new(config).context("Failed to set up session")?;
    info!(command, "sessionward starting");

    match command {
        "status" => {
            let status = manager.bootstrap().await;
            let session = manager.session();
            print_json(&json!({
                "status": status,
                "isAuthenticated": session.is_authenticated(),
                "user": session.user(),
            }))?;
        }
        "whoami" => {
            manager.bootstrap().await;
            match manager.session().user() {
                Some(user) => print_json(&serde_json::to_value(user)?)?,
                None => {
                    eprintln!("Not logged in. Start here: {}", manager.login_url());
                    std::process::exit(1);
                }
            }
        }
        "check" => {
            let route = args.get(2).context("check needs a route, e.g. /profile")?;
            manager.bootstrap().await;
            let decision = manager.guard(&RouteContext::protected(route.as_str())).await;
            print_json(&serde_json::to_value(&decision)?)?;
            if let GuardDecision::Redirect(_) = decision {
                std::process::exit(1);
            }
        }
        "get" => {
            let path = args.get(2).context("get needs a path, e.g. /api/auth/protected")?;
            manager.bootstrap().await;
            let body: serde_json::Value = manager.client().get_json(path).await?;
            print_json(&body)?;
        }
        "login" => {
            let token = match args.get(2) {
                Some(token) => token.clone(),
                None => std::env::var("SESSIONWARD_CREDENTIAL")
                    .context("login needs a credential argument or SESSIONWARD_CREDENTIAL")?,
            };
            let profile = manager.login(Credential::new(token)?).await?;
            eprintln!("Logged in as {}", profile.display_name());
        }
        "logout" => {
            manager.logout().await;
            eprintln!("Logged out");
        }
        "login-url" => {
            println!("{}", manager.login_url());
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}
