//! entangle: Real-time multi-client file-tree replication
//!
//! One server holds the authoritative directory; any number of clients
//! mirror it. Local changes propagate to the server, are applied to the
//! authoritative tree, and fan out to every other client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{builder::Styles, Parser, Subcommand};
use color_eyre::Result;
use tracing::info;

use entangle_client::{Client, ClientConfig};
use entangle_core::{EntangleConfig, Manifest, PathFilter};
use entangle_server::{Server, ServerConfig};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "entangle")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Real-time file-tree replication over websockets")]
#[command(long_about = r#"
entangle keeps any number of directories in lockstep.

One server holds the source of truth; clients mirror it live. Changes
made anywhere propagate everywhere, in a single total order decided by
the server.

Examples:
  entangle server -d ./shared -p 8080          Serve a directory
  entangle client -a ws://host:8080/ws -d ./m  Mirror it
  entangle manifest ./shared                   Inspect a tree's manifest
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the replication server
    Server {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Directory to serve (the source of truth)
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Comma-separated glob patterns to ignore (e.g. '.git,*.tmp')
        #[arg(long, default_value = "")]
        ignore: String,
    },

    /// Run a mirroring client
    Client {
        /// Server websocket address
        #[arg(short, long, default_value = "ws://localhost:8080/ws")]
        addr: String,

        /// Directory to mirror into
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Comma-separated glob patterns to ignore (e.g. 'node_modules,*.log')
        #[arg(long, default_value = "")]
        ignore: String,

        /// Watcher debounce window in milliseconds
        #[arg(long, default_value = "1000")]
        debounce: u64,
    },

    /// Build and print a directory's manifest
    Manifest {
        /// Directory to scan
        path: PathBuf,

        /// Comma-separated glob patterns to ignore
        #[arg(long, default_value = "")]
        ignore: String,

        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Server { port, dir, ignore } => {
            info!(port, dir = %dir.display(), %ignore, "starting entangle server");
            let filter = build_filter(&dir, &ignore)?;
            let server = Server::new(
                ServerConfig {
                    port,
                    sync_dir: dir,
                },
                filter,
            )?;
            server.run().await?;
        }
        Commands::Client {
            addr,
            dir,
            ignore,
            debounce,
        } => {
            info!(%addr, dir = %dir.display(), %ignore, "starting entangle client");
            let filter = build_filter(&dir, &ignore)?;
            let client = Client::new(
                ClientConfig {
                    server_addr: addr,
                    sync_dir: dir,
                    debounce: Duration::from_millis(debounce),
                },
                filter,
            )?;
            client.run().await?;
        }
        Commands::Manifest {
            path,
            ignore,
            format,
        } => {
            manifest_command(&path, &ignore, &format)?;
        }
    }

    Ok(())
}

/// Combine command-line ignore patterns with the ones from .entangle.toml.
fn build_filter(dir: &Path, ignore: &str) -> Result<PathFilter> {
    let mut patterns: Vec<String> = ignore
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();

    let config = EntangleConfig::load(dir)?;
    patterns.extend(config.ignore);

    PathFilter::from_patterns(patterns)
}

fn manifest_command(path: &Path, ignore: &str, format: &str) -> Result<()> {
    let filter = build_filter(path, ignore)?;
    let manifest = Manifest::build(path, &filter)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&manifest)?;
            println!("{json}");
        }
        _ => {
            println!("Files: {}", manifest.len());
            for (path, hash) in &manifest.files {
                println!("  {hash}  {path}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_merges_config_patterns() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".entangle.toml"),
            "ignore = [\"node_modules\"]\n",
        )
        .unwrap();

        let filter = build_filter(dir.path(), ".git").unwrap();
        assert!(filter.is_ignored(".git/HEAD"));
        assert!(filter.is_ignored("node_modules/pkg/index.js"));
        assert!(!filter.is_ignored("src/main.rs"));
    }

    #[test]
    fn test_build_filter_without_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let filter = build_filter(dir.path(), "*.tmp").unwrap();
        assert!(filter.is_ignored("x.tmp"));
        assert!(!filter.is_ignored("x.txt"));
    }
}
