//! CLI entry point for parley

mod simulate;
mod speaker;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use parley_core::config::{Config, ConfigLoader};
use parley_core::logging::init_logging;
use simulate::{print_report, run_simulation, write_export, SimulationOptions};
use speaker::ScriptedReasoner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Turn-taking and conversational memory for multi-speaker sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session and print its transcript
    Simulate {
        /// Comma-separated speaker ids
        #[arg(short, long, value_delimiter = ',', default_value = "alice,bob,carol")]
        speakers: Vec<String>,
        /// Number of speaking turns
        #[arg(short, long, default_value_t = 12)]
        turns: usize,
        /// What the speakers are trying to settle
        #[arg(long, default_value = "the next release")]
        seed_goal: String,
        /// Write the memory snapshot and message log to this file
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    match cli.command {
        Commands::Simulate {
            speakers,
            turns,
            seed_goal,
            snapshot,
        } => {
            let config = config_loader.load()?;
            let _guard = init_logging(&logging_config(&config_loader, &config));
            run_simulate(&config, speakers, turns, seed_goal, snapshot).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => run_config_show(&config_loader)?,
            ConfigCommands::Init { force } => run_config_init(&config_loader, force)?,
        },
    }

    Ok(())
}

/// Resolve a relative log directory against the config directory
fn logging_config(loader: &ConfigLoader, config: &Config) -> parley_core::config::LoggingConfig {
    let mut logging = config.logging.clone();
    let dir = PathBuf::from(&logging.dir);
    if dir.is_relative() {
        logging.dir = loader.config_dir().join(dir).to_string_lossy().into_owned();
    }
    logging
}

async fn run_simulate(
    config: &Config,
    speakers: Vec<String>,
    turns: usize,
    goal: String,
    snapshot: Option<PathBuf>,
) -> Result<()> {
    let speakers: Vec<String> = speakers
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    println!(
        "{} {} speakers, {} turns: {}",
        style("Simulating").bold().cyan(),
        speakers.len(),
        turns,
        goal
    );
    println!();

    let reasoner = Arc::new(ScriptedReasoner::new(goal.clone(), &speakers));
    let options = SimulationOptions {
        speakers,
        turns,
        goal,
        echo: true,
    };
    let report = run_simulation(config, options, reasoner).await?;
    print_report(&report);

    if let Some(path) = snapshot {
        write_export(&report, &path).await?;
        info!(path = %path.display(), "Session exported");
        println!();
        println!("Snapshot written to {}", style(path.display()).green());
    }
    Ok(())
}

fn run_config_show(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn run_config_init(loader: &ConfigLoader, force: bool) -> Result<()> {
    let config_path = loader.config_path();
    if config_path.exists() && !force {
        println!(
            "Configuration already exists at {} (use --force to overwrite)",
            config_path.display()
        );
        return Ok(());
    }

    loader.save(&Config::default())?;
    println!(
        "{} {}",
        style("Configuration written to").green().bold(),
        config_path.display()
    );
    Ok(())
}
