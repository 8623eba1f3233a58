//! # roomlog CLI
//!
//! Command-line front end for shared room logs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use roomlog_config::logging::{init_logging, LogLevel};
use roomlog_config::path::normalize_room_key;
use roomlog_config::{log_cli_debug, Config};
use roomlog_store::{EntryFilter, MessageKind, RoomClient};

mod render;

/// roomlog - shared message logs for processes on one machine
#[derive(Parser)]
#[command(name = "roomlog")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage home (overrides ROOMLOG_HOME and config files)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage layout and claim an identity
    Init,

    /// Print this process's label
    Whoami,

    /// Append a message to a room
    Send {
        /// Room key (an existing path is canonicalized)
        room: String,
        text: String,
        #[arg(long, default_value = "text")]
        kind: MessageKind,
    },

    /// Mark yourself active in a room without sending
    Touch { room: String },

    /// Show messages from a room, oldest first
    Read {
        room: String,
        /// Show at most this many of the newest messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Only messages strictly after this RFC 3339 time
        #[arg(long, value_parser = parse_timestamp)]
        since: Option<DateTime<Utc>>,
        /// Only messages from the last N seconds
        #[arg(long)]
        last_seconds: Option<u64>,
        /// Emit JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// Case-insensitive substring search
    Search {
        room: String,
        query: String,
        #[arg(long)]
        json: bool,
    },

    /// List labels active in a room recently
    Who {
        room: String,
        #[arg(long, default_value = "300")]
        window_secs: u64,
    },

    /// Summary of a room
    Stats { room: String },

    /// List known rooms
    Rooms,

    /// Delete a room
    Forget { room: String },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print config file locations
    Path,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 time like 2024-05-01T12:00:00Z: {e}"))
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    init_logging(LogLevel::Warn);

    let cli = Cli::parse();
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(home) = &cli.home {
        config.storage.home = home.clone();
    }
    log_cli_debug!(
        "Resolved storage home",
        home = tracing::field::display(config.storage.home.display()),
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async_main(cli.command, config))
}

async fn async_main(command: Commands, config: Config) -> Result<()> {
    if let Commands::Config(cmd) = command {
        return cmd_config(cmd, &config);
    }

    let client = RoomClient::new(&config)
        .with_context(|| format!("Failed to open store at {}", config.storage.home.display()))?;

    match command {
        Commands::Init => {
            let identity = client.initialize().await?;
            println!("Home:     {}", config.storage.home.display());
            println!("Rooms:    {}", config.rooms_dir().display());
            println!("Identity: {}", identity.label);
        }
        Commands::Whoami => {
            println!("{}", client.own_label().await?);
        }
        Commands::Send { room, text, kind } => {
            let room = normalize_room_key(&room);
            let id = client.append(&room, &text, kind, None).await?;
            println!("{id}");
        }
        Commands::Touch { room } => {
            client.touch(&normalize_room_key(&room)).await?;
        }
        Commands::Read {
            room,
            count,
            since,
            last_seconds,
            json,
        } => {
            let filter = EntryFilter {
                count,
                since,
                last_seconds,
            };
            let entries = client.filtered(&normalize_room_key(&room), &filter).await?;
            render::entries(&entries, json)?;
        }
        Commands::Search { room, query, json } => {
            let entries = client.search(&normalize_room_key(&room), &query).await?;
            render::entries(&entries, json)?;
        }
        Commands::Who { room, window_secs } => {
            let labels = client
                .active_labels(&normalize_room_key(&room), Duration::from_secs(window_secs))
                .await?;
            for label in labels {
                println!("{label}");
            }
        }
        Commands::Stats { room } => {
            let room = normalize_room_key(&room);
            match client.room_stats(&room).await? {
                Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
                None => anyhow::bail!("No such room: {room}"),
            }
        }
        Commands::Rooms => {
            for room in client.list_rooms().await? {
                println!("{room}");
            }
        }
        Commands::Forget { room } => {
            let room = normalize_room_key(&room);
            if client.delete_room(&room).await? {
                println!("Deleted {room}");
            } else {
                println!("No such room: {room}");
            }
        }
        Commands::Config(_) => unreachable!("handled above"),
    }
    Ok(())
}

fn cmd_config(cmd: ConfigCommands, config: &Config) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            print!("{}", render::config_toml(config)?);
        }
        ConfigCommands::Path => {
            match Config::global_config_path() {
                Some(path) => println!("Global:  {}", path.display()),
                None => println!("Global:  (no home directory)"),
            }
            println!("Project: {}", Config::project_config_path().display());
        }
    }
    Ok(())
}
