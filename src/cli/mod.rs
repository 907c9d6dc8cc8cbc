pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "kagra")]
#[command(about = "KAGRA CLI - inspect roles, sanitizer and rate limits offline")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "List roles with their permission sets")]
    Roles {
        #[arg(help = "Only show this role")]
        role: Option<String>,
    },

    #[command(about = "Check whether a role holds a permission (exit 1 when denied)")]
    Check {
        #[arg(help = "Role name, e.g. editor")]
        role: String,
        #[arg(help = "Permission token, e.g. node:delete")]
        permission: String,
    },

    #[command(about = "Sanitize text the way request bodies are cleaned")]
    Sanitize {
        #[arg(help = "Text to clean")]
        text: String,
        #[arg(long, default_value = "string", help = "Parameter kind: uuid, integer, email, identifier, string")]
        kind: String,
    },

    #[command(about = "Scan text for injection patterns")]
    Scan {
        #[arg(help = "Text to scan")]
        text: String,
    },

    #[command(about = "Simulate a burst of requests against a rate limit")]
    Limit {
        #[arg(help = "Limit spec, e.g. 10/minute")]
        spec: String,
        #[arg(long, default_value_t = 1, help = "Requests to send in the burst")]
        requests: u32,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Roles { role } => commands::roles::list(role.as_deref(), output_format),
        Commands::Check { role, permission } => commands::roles::check(&role, &permission, output_format),
        Commands::Sanitize { text, kind } => commands::inspect::sanitize(&text, &kind, output_format),
        Commands::Scan { text } => commands::inspect::scan(&text, output_format),
        Commands::Limit { spec, requests } => commands::limit::simulate(&spec, requests, output_format),
    }
}
