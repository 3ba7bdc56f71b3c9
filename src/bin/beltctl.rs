//! beltctl - conveyor belt control tool
//!
//! Switches or queries the belt relay directly, without the daemon.
//! Useful for recovering a belt left stopped after a failed pick.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sortcell::config::SortcellConfig;
use sortcell::drivers;

#[derive(Parser, Debug)]
#[command(name = "beltctl", about = "Control the sorting cell conveyor relay")]
struct Args {
    /// Belt URL, stub://... or plug://host[:port]. Defaults to the config value.
    #[arg(long, env = "SORTCELL_BELT_URL")]
    url: Option<String>,

    /// Path to the JSON config file.
    #[arg(long, env = "SORTCELL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Switch the belt on
    On,
    /// Switch the belt off
    Off,
    /// Query the relay and print its live state
    Status,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SortcellConfig::load_path(args.config.as_deref())?;
    let url = args.url.unwrap_or(config.belt.url);
    let mut belt = drivers::belt_from_url(&url, config.belt.timeout)?;

    match args.command {
        Command::On => {
            belt.start()?;
            println!("belt {} switched on", belt.name());
        }
        Command::Off => {
            belt.stop()?;
            println!("belt {} switched off", belt.name());
        }
        Command::Status => {
            let state = belt.probe()?;
            println!("belt {} is {}", belt.name(), state);
        }
    }
    Ok(())
}
