//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use contactlink_core::Engine;
use contactlink_shared::{
    AppConfig, ContactId, EngineConfig, ErrorKind, ErrorResponse, IdentifyRequest,
    IdentifyResponse, MISSING_IDENTIFIER, config_file_path, init_config, load_config,
};
use contactlink_storage::Storage;
use tracing::info;

/// Exit status for a request rejected as invalid.
const EXIT_INVALID_REQUEST: i32 = 2;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ContactLink — consolidate contact records into canonical identities.
#[derive(Parser)]
#[command(
    name = "contactlink",
    version,
    about = "Resolve emails and phone numbers into consolidated customer identities.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database path (overrides `[database].path`).
    #[arg(long, global = true, env = "CONTACTLINK_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Resolve an email and/or phone number to its consolidated identity.
    Identify {
        /// Email address.
        #[arg(short, long)]
        email: Option<String>,

        /// Phone number.
        #[arg(short, long)]
        phone: Option<String>,

        /// Raw request body, e.g. '{"email":"a@x.com","phoneNumber":"111"}'.
        #[arg(long, conflicts_with_all = ["email", "phone"])]
        json: Option<String>,
    },

    /// Print the consolidated identity of an existing primary contact.
    Show {
        /// Primary contact ID.
        id: ContactId,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries JSON results.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = format!(
        "contactlink={level},contactlink_core={level},contactlink_storage={level},contactlink_shared={level}"
    );

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Identify { email, phone, json } => {
            let request = match json {
                Some(body) => parse_request(&body)?,
                None => IdentifyRequest::new(email, phone),
            };
            cmd_identify(cli.db.as_deref(), &request).await
        }
        Command::Show { id } => cmd_show(cli.db.as_deref(), id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

fn parse_request(body: &str) -> Result<IdentifyRequest> {
    serde_json::from_str(body).wrap_err("request body is not a valid identify request")
}

fn database_path(config: &AppConfig, db_override: Option<&Path>) -> Result<PathBuf> {
    match db_override {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(config.database_path()?),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_identify(db_override: Option<&Path>, request: &IdentifyRequest) -> Result<()> {
    let config = load_config()?;
    let db_path = database_path(&config, db_override)?;

    info!(db = %db_path.display(), "opening contact store");
    let storage = Storage::open(&db_path).await?;
    let engine = Engine::new(storage, EngineConfig::from(&config));

    match engine.resolve(request).await {
        Ok(view) => {
            let response = IdentifyResponse::from(view);
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::InvalidRequest => {
            let response = ErrorResponse {
                error: MISSING_IDENTIFIER.to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
            std::process::exit(EXIT_INVALID_REQUEST);
        }
        Err(e) => {
            let status = e.kind().status_code();
            Err(color_eyre::Report::new(e).wrap_err(format!("identify failed (status {status})")))
        }
    }
}

async fn cmd_show(db_override: Option<&Path>, id: ContactId) -> Result<()> {
    let config = load_config()?;
    let db_path = database_path(&config, db_override)?;

    let storage = Storage::open_readonly(&db_path).await?;
    let engine = Engine::new(storage, EngineConfig::from(&config));

    let view = engine.view(id).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&IdentifyResponse::from(view))?
    );
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config written to {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let path = config_file_path()?;
    println!("# {}", path.display());
    println!(
        "{}",
        toml::to_string_pretty(&config).map_err(|e| eyre!("cannot render config: {e}"))?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_identify_flags() {
        let cli = Cli::try_parse_from([
            "contactlink",
            "identify",
            "--email",
            "a@x.com",
            "--phone",
            "111",
        ])
        .expect("parse");
        match cli.command {
            Command::Identify { email, phone, json } => {
                assert_eq!(email.as_deref(), Some("a@x.com"));
                assert_eq!(phone.as_deref(), Some("111"));
                assert!(json.is_none());
            }
            _ => panic!("expected identify"),
        }
    }

    #[test]
    fn json_conflicts_with_flags() {
        let result = Cli::try_parse_from([
            "contactlink",
            "identify",
            "--email",
            "a@x.com",
            "--json",
            "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn json_body_uses_wire_names() {
        let req = parse_request(r#"{"email":"a@x.com","phoneNumber":123}"#).expect("parse");
        assert_eq!(req.email.as_deref(), Some("a@x.com"));
        assert_eq!(req.phone_number.as_deref(), Some("123"));
    }

    #[test]
    fn show_takes_numeric_id() {
        let cli = Cli::try_parse_from(["contactlink", "show", "42"]).expect("parse");
        assert!(matches!(cli.command, Command::Show { id } if id == ContactId(42)));
    }
}
