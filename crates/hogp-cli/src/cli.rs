//! Command-line interface definitions and parsing

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve HID reports for JSON-lines input events read from stdin
    Run {
        /// Bluetooth adapter to use (e.g. hci0)
        #[arg(short, long)]
        adapter: Option<String>,

        /// Advertised device name
        #[arg(short, long)]
        name: Option<String>,

        /// Log instead of driving a Bluetooth adapter
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the report map and GATT layout for the current configuration
    Describe,
    /// Print an example configuration file
    PrintConfig,
}

impl Commands {
    /// Adapter and name overrides given on the command line
    pub fn overrides(&self) -> crate::config::Overrides {
        match self {
            Commands::Run { adapter, name, .. } => crate::config::Overrides {
                adapter_id: adapter.clone(),
                local_name: name.clone(),
            },
            _ => crate::config::Overrides::default(),
        }
    }
}
