//! Destiny Hub - a command line companion for Destiny 2.
//!
//! Signs in to Bungie.net through the browser, keeps the session alive across
//! runs, and shows the equipment of the player's most recently used character.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use destinyhub_core::models::{BungieName, EquipmentSlot};
use destinyhub_core::{
    ApiClient, ApiError, ClientConfig, Config, CredentialBackend, CredentialStore,
    FileCredentialStore, HttpTokenAuthority, KeyringCredentialStore, LoopbackListener,
    SavedAccount, SessionManager, SessionState,
};

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix inside the data directory (rotated daily).
const LOG_FILE_PREFIX: &str = "destinyhub.log";

#[derive(Parser)]
#[command(name = "destinyhub", version, about = "Destiny 2 companion for the command line")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Keep credentials in the OS keychain instead of the data directory
    #[arg(long, env = "DESTINYHUB_KEYRING", global = true)]
    keyring: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in to Bungie.net through the browser
    Login,
    /// Forget the stored session
    Logout,
    /// Show session and account status
    Status,
    /// Find a player by Bungie name (Name#1234) and remember the account
    Search { name: String },
    /// Show the equipment of the saved account's last played character
    Equipment,
    /// Look up an item definition by hash
    Item { hash: u32 },
}

/// Initialize the tracing subscriber for logging.
///
/// Console output goes to stderr; a copy goes to a daily log file in the
/// data directory. The returned guard must live until exit to flush the file.
fn init_tracing(verbose: u8, log_dir: &Path) -> WorkerGuard {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(filter)
        .init();

    guard
}

/// Turn a login-required failure into an actionable message.
fn explain(err: ApiError) -> anyhow::Error {
    match err {
        ApiError::RequiresLogin => {
            anyhow::anyhow!("Not signed in. Run `destinyhub login` first.")
        }
        other => anyhow::Error::from(other),
    }
}

struct App {
    config: Config,
    session: Arc<SessionManager>,
    api: ApiClient,
}

impl App {
    async fn start(cli: &Cli, config: Config, data_dir: &Path) -> Result<Self> {
        let client_config = Arc::new(ClientConfig::from_env()?);
        info!(?client_config, "Loaded client configuration");

        let store: Arc<dyn CredentialStore> =
            if cli.keyring || config.credential_backend == CredentialBackend::Keyring {
                Arc::new(KeyringCredentialStore::new())
            } else {
                Arc::new(FileCredentialStore::new(data_dir))
            };
        let authority = HttpTokenAuthority::new(client_config.clone())?;
        let session = Arc::new(SessionManager::new(
            &client_config,
            store,
            Arc::new(authority),
            LoopbackListener::from_config(&client_config),
        ));
        let api = ApiClient::new(client_config, session.clone())?;

        session
            .resume(&api.probe())
            .await
            .context("Failed to load stored credentials")?;

        Ok(Self {
            config,
            session,
            api,
        })
    }

    async fn login(&self) -> Result<()> {
        if self.session.state() != SessionState::Anonymous {
            println!("Already signed in. Run `destinyhub logout` to switch accounts.");
            return Ok(());
        }

        self.session
            .login(|url: &str| {
                println!("Open this address in your browser to sign in to Bungie.net:\n");
                println!("  {}\n", url);
                println!("Waiting for authorization...");
            })
            .await?;

        let user = self.api.current_user().await.map_err(explain)?;
        println!("Signed in as {}.", user.display_name);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.session.logout().await?;
        println!("Signed out.");
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let state = self.session.state();
        println!("Session: {}", state);
        if state != SessionState::Anonymous {
            if let Some(id) = self.session.membership_id().await {
                println!("Bungie.net membership: {}", id);
            }
        }
        match &self.config.account {
            Some(account) => println!(
                "Saved account: {} ({} on platform {})",
                account.display_name, account.membership_id, account.membership_type
            ),
            None => println!("Saved account: none (use `destinyhub search Name#1234`)"),
        }
        Ok(())
    }

    async fn search(&mut self, raw_name: &str) -> Result<()> {
        let name: BungieName = raw_name.parse()?;
        let results = self.api.search_player(&name).await.map_err(explain)?;

        let Some(first) = results.first() else {
            bail!("No player found for {}", name);
        };
        for card in &results {
            println!(
                "{}  membership {} (platform {})",
                card.bungie_name()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| card.display_name.clone()),
                card.membership_id,
                card.membership_type
            );
        }

        self.config.last_bungie_name = Some(name.to_string());
        self.config.account = Some(SavedAccount {
            membership_id: first.membership_id.clone(),
            membership_type: first.membership_type,
            display_name: name.to_string(),
        });
        self.config.save()?;
        println!("Saved {} as the active account.", name);
        Ok(())
    }

    async fn equipment(&self) -> Result<()> {
        let Some(account) = &self.config.account else {
            bail!("No saved account. Run `destinyhub search Name#1234` first.");
        };

        let profile = self
            .api
            .fetch_profile(account.membership_type, &account.membership_id)
            .await
            .map_err(explain)?;
        let Some(character) = profile.last_played_character() else {
            bail!("{} has no characters", account.display_name);
        };
        println!(
            "{} {} - light {} (last played {})",
            character.race_name(),
            character.class_name(),
            character.light,
            character.date_last_played.format("%Y-%m-%d %H:%M")
        );

        let equipment = self
            .api
            .fetch_character_equipment(
                account.membership_type,
                &account.membership_id,
                &character.character_id,
            )
            .await
            .map_err(explain)?;

        for item in equipment.equipped_items() {
            let Some(slot) = item.slot else { continue };
            let name = match self.api.item_definition(item.item_hash).await {
                Ok(definition) => definition.name().to_string(),
                Err(e) => {
                    warn!(hash = item.item_hash, error = %e, "Item definition unavailable");
                    format!("#{}", item.item_hash)
                }
            };
            let power = item.power.map(|p| p.to_string()).unwrap_or_default();
            println!("{:<11} {:<36} {:>5}", slot_label(slot), name, power);
        }
        Ok(())
    }

    async fn item(&self, hash: u32) -> Result<()> {
        let definition = self.api.item_definition(hash).await.map_err(explain)?;
        println!("{} ({})", definition.name(), definition.item_type_display_name);
        if !definition.display_properties.description.is_empty() {
            println!("{}", definition.display_properties.description);
        }
        Ok(())
    }
}

fn slot_label(slot: EquipmentSlot) -> String {
    if slot.is_weapon() {
        format!("{}*", slot.label())
    } else {
        slot.label().to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;
    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let _guard = init_tracing(cli.verbose, &data_dir);
    info!("Destiny Hub starting");

    let mut app = App::start(&cli, config, &data_dir).await?;
    match &cli.command {
        Command::Login => app.login().await,
        Command::Logout => app.logout().await,
        Command::Status => app.status().await,
        Command::Search { name } => app.search(name).await,
        Command::Equipment => app.equipment().await,
        Command::Item { hash } => app.item(*hash).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["destinyhub", "-vv", "search", "Guardian#0042"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Search { ref name } if name == "Guardian#0042"));

        let cli = Cli::try_parse_from(["destinyhub", "item", "1363886209", "--keyring"]).unwrap();
        assert!(cli.keyring);
        assert!(matches!(cli.command, Command::Item { hash: 1363886209 }));
    }

    #[test]
    fn test_rejects_bad_item_hash() {
        assert!(Cli::try_parse_from(["destinyhub", "item", "not-a-hash"]).is_err());
    }

    #[test]
    fn test_explain_requires_login() {
        let err = explain(ApiError::RequiresLogin);
        assert!(err.to_string().contains("destinyhub login"));

        let err = explain(ApiError::Transport("reset".into()));
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn test_slot_label_marks_weapons() {
        assert_eq!(slot_label(EquipmentSlot::Kinetic), "Kinetic*");
        assert_eq!(slot_label(EquipmentSlot::ClassItem), "Class Item");
    }
}
