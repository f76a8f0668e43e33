//! EmberKV CLI Client
//!
//! Command-line interface for interacting with EmberKV.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use emberkv::network::Client;

/// EmberKV CLI
#[derive(Parser, Debug)]
#[command(name = "emberkv-cli")]
#[command(about = "CLI for EmberKV key-value store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Ping the server
    Ping,

    /// Run one compaction cycle
    Compact,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut client = match Client::connect(&args.server) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Commands::Get { key } => client.get(key.as_bytes()).map(|value| match value {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        }),
        Commands::Set { key, value } => client
            .set(key.as_bytes(), value.as_bytes())
            .map(|_| println!("OK")),
        Commands::Del { key } => client.delete(key.as_bytes()).map(|_| println!("OK")),
        Commands::Ping => client.ping().map(|_| println!("PONG")),
        Commands::Compact => client.compact().map(|summary| println!("{}", summary)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
