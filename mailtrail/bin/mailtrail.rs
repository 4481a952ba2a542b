//! Send RFC 822 messages through the configured relay, recording one
//! delivery row per attempt.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mailtrail::Mailtrail;

#[derive(Parser, Debug)]
#[command(name = "mailtrail")]
#[command(about = "Send mail with durable delivery records", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration document (overrides `MAILTRAIL_CONFIG` and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send each message file in its own tracked attempt
    Send {
        /// RFC 822 message files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show whether the relay settings are complete
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let mailtrail = Mailtrail::load(&config_path)?;

    match cli.command {
        Commands::Check => {
            for line in mailtrail.check() {
                println!("{line}");
            }
        }
        Commands::Send { files } => {
            mailtrail.init();

            let outcomes = mailtrail.send_files(&files).await?;
            for outcome in &outcomes {
                println!("{outcome}");
            }

            let failed = outcomes.iter().filter(|o| !o.is_success()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} message(s) failed", outcomes.len());
            }
        }
    }

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `MAILTRAIL_CONFIG` environment variable
/// 2. ./mailtrail.config.ron (current working directory)
/// 3. /etc/mailtrail/mailtrail.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILTRAIL_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "MAILTRAIL_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./mailtrail.config.ron"),
        PathBuf::from("/etc/mailtrail/mailtrail.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - MAILTRAIL_CONFIG environment variable\n{paths_tried}"
    )
}
