//! dual-auth - issue in-session and out-of-session API calls from a terminal.
//!
//! Session tokens are kept in the OS keychain (`dual-auth login`); the
//! out-of-session token is read from `DUAL_AUTH_CLIENT_TOKEN`.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dual_auth_core::{
    AuthMode, AuthScheme, CallContext, CallStatus, ClientConfig, Credential, DualAuthClient,
    Keychain, StaticProvider,
};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PROFILE: &str = "default";

/// Directory for a daily-rolling log file, in addition to stderr
const LOG_DIR_ENV: &str = "DUAL_AUTH_LOG_DIR";

/// Lifetime given to out-of-session credentials built from the env token.
/// One hour keeps long-running scripts from re-minting on every call.
const CLIENT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Parser)]
#[command(
    name = "dual-auth",
    version,
    about = "Authenticated API calls with or without a session"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a session token in the OS keychain
    Login {
        #[arg(long, default_value = DEFAULT_PROFILE)]
        profile: String,
        /// Seconds until the stored session expires
        #[arg(long, default_value_t = 8 * 3600)]
        ttl_secs: i64,
    },
    /// Remove the stored session token
    Logout {
        #[arg(long, default_value = DEFAULT_PROFILE)]
        profile: String,
    },
    /// Show which credentials are available
    Status {
        #[arg(long, default_value = DEFAULT_PROFILE)]
        profile: String,
    },
    /// Make an API call
    Call(CallArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    InSession,
    OutOfSession,
}

impl From<Mode> for AuthMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::InSession => AuthMode::InSession,
            Mode::OutOfSession => AuthMode::OutOfSession,
        }
    }
}

#[derive(Args)]
struct CallArgs {
    #[arg(long, value_enum)]
    mode: Mode,
    #[arg(long, short = 'X', default_value = "GET")]
    method: String,
    #[arg(long)]
    url: Url,
    /// Request body
    #[arg(long, short = 'd')]
    data: Option<String>,
    /// Extra header as `Name: value`; may be repeated
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,
    /// Allow retries even if the method is not idempotent
    #[arg(long, conflicts_with = "no_idempotent")]
    idempotent: bool,
    /// Never retry, even for idempotent methods
    #[arg(long)]
    no_idempotent: bool,
    /// Deadline for the whole call, including credential acquisition
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,
    #[arg(long, env = "DUAL_AUTH_CLIENT_TOKEN", hide_env_values = true)]
    client_token: Option<String>,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dual-auth.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
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

    let cli = Cli::parse();
    let _log_guard = init_tracing();

    match cli.command {
        Command::Login { profile, ttl_secs } => login(&profile, ttl_secs),
        Command::Logout { profile } => {
            Keychain::delete_session(&profile)?;
            eprintln!("Session for profile '{}' removed", profile);
            Ok(())
        }
        Command::Status { profile } => status(&profile),
        Command::Call(args) => call(args).await,
    }
}

fn login(profile: &str, ttl_secs: i64) -> Result<()> {
    anyhow::ensure!(ttl_secs > 0, "--ttl-secs must be positive");

    let token = rpassword::prompt_password("Session token: ")
        .context("Failed to read session token")?;
    let token = token.trim();
    anyhow::ensure!(!token.is_empty(), "Session token must not be empty");

    let credential = Credential::with_ttl(
        AuthScheme::Session,
        token,
        chrono::Duration::seconds(ttl_secs),
    )?;
    Keychain::store_session(profile, &credential)?;

    info!(profile, "Stored session token");
    eprintln!("Session for profile '{}' stored", profile);
    Ok(())
}

fn status(profile: &str) -> Result<()> {
    match Keychain::load_session(profile)? {
        Some(session) => match session.time_until_expiry(Utc::now()) {
            Some(left) if left.num_seconds() > 0 => {
                println!("session: valid, {} minutes left", left.num_minutes())
            }
            Some(_) => println!("session: expired"),
            None => println!("session: valid, no expiry"),
        },
        None => println!("session: none"),
    }

    let client_token = std::env::var("DUAL_AUTH_CLIENT_TOKEN").is_ok();
    println!(
        "out-of-session: {}",
        if client_token {
            "client token configured"
        } else {
            "no client token"
        }
    );
    Ok(())
}

async fn call(args: CallArgs) -> Result<()> {
    let config = ClientConfig::load()?;

    let mut provider = StaticProvider::new()
        .with_ttl(chrono::Duration::seconds(CLIENT_TOKEN_TTL_SECS));
    if let Some(token) = args.client_token.as_deref() {
        provider = provider.with_out_of_session_token(token);
    }

    let client = DualAuthClient::new(&config, Arc::new(provider))
        .context("Failed to build HTTP client")?;
    if matches!(args.mode, Mode::InSession) {
        if let Some(session) = Keychain::load_session(&args.profile)? {
            client.seed_session(session)?;
        }
    }

    let context = build_context(&args)?;
    info!(mode = %context.auth_mode(), url = %context.endpoint(), "Issuing call");

    let result = client.call(&context).await?;
    io::stdout()
        .write_all(result.response())
        .context("Failed to write response")?;

    eprintln!(
        "\n{} ({} attempt(s))",
        result
            .status_code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "no status".to_string()),
        result.attempts()
    );

    if result.status() == CallStatus::TransportFailed {
        anyhow::bail!("Server kept failing after {} attempt(s)", result.attempts());
    }
    Ok(())
}

fn build_context(args: &CallArgs) -> Result<CallContext> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", args.method))?;

    let mut builder = CallContext::builder(method, args.url.clone(), args.mode.into());
    if let Some(ref data) = args.data {
        builder = builder.payload(data.clone());
    }
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        builder = builder.header(name, value);
    }
    if args.idempotent {
        builder = builder.idempotent(true);
    } else if args.no_idempotent {
        builder = builder.idempotent(false);
    }
    if let Some(secs) = args.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build())
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Header must look like 'Name: value', got {:?}", raw))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("Invalid header name in {:?}", raw))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("Invalid header value in {:?}", raw))?;
    Ok((name, value))
}
