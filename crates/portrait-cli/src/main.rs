mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use portrait_config::ConfigLoader;

use crate::commands::Host;

#[derive(Parser)]
#[command(name = "portrait", version, about = "Portrait user database and schema migrations")]
struct Cli {
    /// Config file (YAML or TOML). Defaults to the platform config directory.
    #[arg(long, global = true, env = "PORTRAIT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the database.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply all pending migrations
    Migrate,
    /// Roll back the most recently applied migration
    Rollback,
    /// Show applied and pending migrations
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Manage user accounts
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create an account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "PORTRAIT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Print a user's profile as JSON
    Show { id: i64 },
    /// Set the stored profile picture reference
    SetPicture { id: i64, picture: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_file(path),
        None => ConfigLoader::default_location().load(),
    }
    .context("failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    logging::init(&config.log);

    let host = Host::open(&config)?;
    match cli.command {
        Command::Migrate => commands::migrate(&host),
        Command::Rollback => commands::rollback(&host),
        Command::Status { json } => commands::status(&host, json),
        Command::User(cmd) => {
            // Refuse to touch user data on a schema we could not migrate.
            host.migrate()?;
            match cmd {
                UserCommand::Register {
                    name,
                    email,
                    password,
                } => commands::register_user(&host, &name, &email, &password),
                UserCommand::Show { id } => commands::show_user(&host, id),
                UserCommand::SetPicture { id, picture } => {
                    commands::set_picture(&host, id, &picture)
                }
            }
        }
    }
}
