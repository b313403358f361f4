//! cmdb CLI Entry Point
//!
//! Subcommands:
//! - `login` - Authenticate, optionally saving the profile and session
//! - `logout` - End the current session
//! - `reset-credentials` - Delete a stored profile
//! - `search` - Full-text search
//! - `version` - Version and login information
//! - `constants` - Constants known to the instance
//! - `category` - Read category entries or show the endpoint signatures
//!
//! All output to stdout is JSON. Logs go to stderr.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cmdb_rpc::config::{self, CredentialOverrides, StoredProfile};
use cmdb_rpc::{
    CategoryEndpoint, Client, CmdbError, ConfigLocation, Credentials, ErrorEnvelope, ErrorInfo,
    IdoitEndpoint, Metadata, Params, PermissionLevel, RecordStatus, SearchMode, SuccessEnvelope,
};

/// cmdb - i-doit JSON-RPC client
#[derive(Parser)]
#[command(name = "cmdb")]
#[command(about = "Command line client for the i-doit JSON-RPC CMDB API")]
#[command(version)]
struct Cli {
    /// Stored credential profile (defaults to the registry's default profile)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Level of rights for API operations; higher levels allow more [default: 10]
    #[arg(short = 'P', long, global = true)]
    permission_level: Option<u8>,

    /// Log level (overridden by RUST_LOG)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: String,

    /// JSON-RPC endpoint URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// API key
    #[arg(short = 'k', long, global = true)]
    api_key: Option<String>,

    /// Username
    #[arg(short = 'u', long, global = true)]
    username: Option<String>,

    /// Password
    #[arg(short = 'p', long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print version information
    Login {
        /// Save the credentials and session under --profile (or "default")
        #[arg(long, value_enum)]
        save: Option<ConfigLocation>,
    },

    /// End the current session
    Logout,

    /// Delete a stored profile
    ResetCredentials {
        /// Only delete from this location (both when omitted)
        #[arg(long, value_enum)]
        location: Option<ConfigLocation>,
    },

    /// Full-text search
    Search {
        query: String,

        #[arg(short = 'm', long, value_enum, default_value_t = SearchMode::Normal)]
        mode: SearchMode,
    },

    /// Show version and login information
    Version,

    /// List the constants known to the instance
    Constants,

    /// Category entries (`cmdb.category.*`)
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },
}

#[derive(Subcommand)]
enum CategoryCommand {
    /// Read the entries of one category of an object
    Read {
        #[arg(long)]
        object_id: u64,

        #[command(flatten)]
        selector: CategorySelector,

        /// Record status filter
        #[arg(long, value_enum)]
        status: Option<RecordStatus>,
    },

    /// Show the parameter signatures of the category endpoint
    Describe,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct CategorySelector {
    /// Category constant (e.g. C__CATG__IP)
    #[arg(long)]
    category: Option<String>,

    /// Global category id
    #[arg(long)]
    catg_id: Option<u64>,

    /// Specific category id
    #[arg(long)]
    cats_id: Option<u64>,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Logout => "logout",
            Self::ResetCredentials { .. } => "reset-credentials",
            Self::Search { .. } => "search",
            Self::Version => "version",
            Self::Constants => "constants",
            Self::Category { command: CategoryCommand::Read { .. } } => "category read",
            Self::Category { command: CategoryCommand::Describe } => "category describe",
        }
    }
}

/// Credentials gathered from flags, environment and the stored profile
struct Resolved {
    overrides: CredentialOverrides,
    profile: Option<(String, StoredProfile)>,
}

impl Resolved {
    fn permission(&self, flag: Option<u8>) -> PermissionLevel {
        flag.map(PermissionLevel)
            .or_else(|| self.profile.as_ref().and_then(|(_, p)| p.permission_level))
            .unwrap_or_default()
    }

    fn session_id(&self) -> Option<String> {
        config::session_from_env()
            .or_else(|| self.profile.as_ref().and_then(|(_, p)| p.session_id.clone()))
    }
}

fn init_tracing(log_level: &str) {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| format!("warn,cmdb_rpc={log_level},cmdb={log_level}"));
    let filter = EnvFilter::try_new(&base_filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr).compact())
        .init();
}

/// Layer explicit flags over the environment over the stored profile
fn resolve(cli: &Cli) -> Result<Resolved> {
    let flags = CredentialOverrides {
        url: cli.url.clone(),
        api_key: cli.api_key.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
    };

    let registry = config::load_with_precedence()?;
    let profile = match registry.get(cli.profile.as_deref()) {
        Ok((name, profile)) => Some((name.to_string(), profile.clone())),
        // Only an explicitly requested profile must exist
        Err(e) if cli.profile.is_some() => return Err(e.into()),
        Err(_) => None,
    };

    let stored = match &profile {
        Some((_, p)) => p.resolve()?,
        None => CredentialOverrides::default(),
    };
    if let Some((name, _)) = &profile {
        debug!(profile = %name, "using stored profile");
    }

    Ok(Resolved { overrides: flags.or(CredentialOverrides::from_env()).or(stored), profile })
}

fn prompt_missing(mut overrides: CredentialOverrides) -> Result<CredentialOverrides> {
    use dialoguer::{Input, Password};

    if overrides.url.is_none() {
        overrides.url = Some(Input::<String>::new().with_prompt("URL").interact_text()?);
    }
    if overrides.api_key.is_none() {
        overrides.api_key = Some(Password::new().with_prompt("API key").interact()?);
    }
    if overrides.username.is_none() {
        overrides.username = Some(Input::<String>::new().with_prompt("Username").interact_text()?);
    }
    if overrides.password.is_none() {
        overrides.password = Some(Password::new().with_prompt("Password").interact()?);
    }
    Ok(overrides)
}

fn client_for(resolved: &Resolved) -> Result<Client> {
    let client = Client::new(resolved.overrides.clone().into_credentials()?)?;
    client.set_session_id(resolved.session_id());
    Ok(client)
}

async fn run(cli: &Cli) -> Result<Value> {
    match &cli.command {
        Commands::Login { save } => login(cli, *save).await,
        Commands::Logout => logout(cli).await,
        Commands::ResetCredentials { location } => reset_credentials(cli, *location),
        Commands::Search { query, mode } => {
            let resolved = resolve(cli)?;
            let client = client_for(&resolved)?;
            Ok(IdoitEndpoint::new(&client).search(query, *mode).await?)
        }
        Commands::Version => {
            let resolved = resolve(cli)?;
            let client = client_for(&resolved)?;
            let idoit = IdoitEndpoint::new(&client);
            Ok(serde_json::to_value(idoit.version().await?)?)
        }
        Commands::Constants => {
            let resolved = resolve(cli)?;
            let client = client_for(&resolved)?;
            let idoit = IdoitEndpoint::new(&client);
            Ok(idoit.constants().await?.clone())
        }
        Commands::Category { command: CategoryCommand::Read { object_id, selector, status } } => {
            let resolved = resolve(cli)?;
            let client = client_for(&resolved)?;
            let endpoint = CategoryEndpoint::new(&client, resolved.permission(cli.permission_level));

            let mut params = Params::new();
            params.insert("objID".to_string(), json!(object_id));
            if let Some(category) = &selector.category {
                params.insert("category".to_string(), json!(category));
            }
            if let Some(id) = selector.catg_id {
                params.insert("catgID".to_string(), json!(id));
            }
            if let Some(id) = selector.cats_id {
                params.insert("catsID".to_string(), json!(id));
            }
            if let Some(status) = status {
                params.insert("status".to_string(), json!(status.as_constant()));
            }

            let entries = endpoint.read_entries(params).await?;
            let rows: Vec<Value> =
                entries.iter().map(|doc| Value::Object(doc.attributes().clone())).collect();
            Ok(Value::Array(rows))
        }
        Commands::Category { command: CategoryCommand::Describe } => {
            // Signatures are static; no credentials needed.
            Ok(json!({ "signatures": cmdb_rpc::validation::describe(
                cmdb_rpc::CATEGORY.method_prefix,
                cmdb_rpc::CATEGORY.operations,
                &cmdb_rpc::CATEGORY.rules,
            ) }))
        }
    }
}

async fn login(cli: &Cli, save: Option<ConfigLocation>) -> Result<Value> {
    let resolved = resolve(cli)?;
    let overrides = prompt_missing(resolved.overrides.clone())?;
    let credentials: Credentials = overrides.into_credentials()?;
    let client = Client::new(credentials.clone())?;

    client.login(None, None).await?;
    let session_id = client.session_id();

    let idoit = IdoitEndpoint::new(&client);
    let version = serde_json::to_value(idoit.version().await?)?;
    info!(url = %client.url(), "successfully authenticated");

    let mut saved = None;
    if let Some(location) = save {
        let name = cli.profile.clone().unwrap_or_else(|| "default".to_string());
        let mut profile = StoredProfile::from_credentials(&credentials);
        profile.session_id.clone_from(&session_id);
        profile.permission_level = cli.permission_level.map(PermissionLevel);
        config::save_profile(&name, profile, location)
            .with_context(|| format!("saving profile '{name}'"))?;
        saved = Some(json!({ "profile": name, "location": location }));
    }

    Ok(json!({
        "url": client.url(),
        "username": client.username(),
        "session_id": session_id,
        "version": version,
        "saved": saved,
    }))
}

async fn logout(cli: &Cli) -> Result<Value> {
    let resolved = resolve(cli)?;
    let client = client_for(&resolved)?;
    let result = client.logout().await;

    // Forget the stored session even if the server call failed
    if let Some((name, _)) = &resolved.profile {
        forget_session(name)?;
    }

    result?;
    Ok(json!({ "logged_out": true }))
}

fn forget_session(name: &str) -> Result<()> {
    for location in [ConfigLocation::Local, ConfigLocation::Global] {
        let path = location.path()?;
        let mut registry = config::load_registry(&path)?;
        let cleared =
            registry.profiles.get_mut(name).is_some_and(|profile| profile.session_id.take().is_some());
        if cleared {
            config::save_registry(&path, &registry)?;
            debug!(profile = %name, ?location, "stored session removed");
        }
    }
    Ok(())
}

fn reset_credentials(cli: &Cli, location: Option<ConfigLocation>) -> Result<Value> {
    let name = match &cli.profile {
        Some(name) => name.clone(),
        None => config::load_with_precedence()?
            .default
            .ok_or_else(|| CmdbError::config_error("No default profile set. Specify one with --profile."))?,
    };

    let locations = match location {
        Some(location) => vec![location],
        None => vec![ConfigLocation::Local, ConfigLocation::Global],
    };

    let mut removed_from = Vec::new();
    for location in locations {
        if config::remove_profile(&name, location)? {
            removed_from.push(location);
        }
    }

    info!(profile = %name, locations = removed_from.len(), "credentials reset");
    Ok(json!({ "profile": name, "removed_from": removed_from }))
}

fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", render_json(value));
}

fn render_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        json!({ "ok": false, "error": { "code": "SERIALIZATION_ERROR", "message": e.to_string() } })
            .to_string()
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let command = cli.command.name();
    let start = Instant::now();

    match run(&cli).await {
        Ok(data) => {
            let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            let meta = Metadata::for_result(elapsed, &data);
            print_json(&SuccessEnvelope::new(command, data, meta));
            ExitCode::SUCCESS
        }
        Err(err) => {
            let envelope = match err.downcast_ref::<CmdbError>() {
                Some(cmdb_err) => ErrorEnvelope::from_error(command, cmdb_err),
                None => ErrorEnvelope::new(command, ErrorInfo::new("CLI_ERROR", format!("{err:#}"))),
            };
            print_json(&envelope);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unserializable;

    impl serde::Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("field \"status\" is not \\ valid"))
        }
    }

    #[test]
    fn test_render_json_success() {
        assert_eq!(render_json(&json!({"ok": true})), r#"{"ok":true}"#);
    }

    #[test]
    fn test_render_json_failure_is_valid_json() {
        let text = render_json(&Unserializable);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["ok"], false);
        assert_eq!(parsed["error"]["code"], "SERIALIZATION_ERROR");
        assert_eq!(parsed["error"]["message"], r#"field "status" is not \ valid"#);
    }
}
