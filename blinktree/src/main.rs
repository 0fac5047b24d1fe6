// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::path::PathBuf;

use blinktree::config::{ConfigError, TreeConfig};
use blinktree::types::InlineStr;
use blinktree::{BLinkTree, TreeError};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Value = InlineStr<32>;
type Tree = BLinkTree<u64, Value>;

#[derive(Parser, Debug)]
#[command(
    name = "blinktree",
    version,
    about = "Inspect and edit an on-disk B-link tree multimap",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory holding the tree files (overrides BLINKTREE_DIRECTORY)"
    )]
    directory: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Base name of the tree files (overrides BLINKTREE_NAME)"
    )]
    name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    #[command(about = "Add a value under a key")]
    Insert { key: u64, value: Value },

    #[command(about = "Print every value under a key")]
    Find { key: u64 },

    #[command(about = "Remove one occurrence of a value")]
    Erase { key: u64, value: Value },

    #[command(about = "Print every pair with lo <= key <= hi")]
    Range { lo: u64, hi: u64 },

    #[command(about = "Check the tree structure and print its shape")]
    Verify,
}

impl Cli {
    /// Environment configuration with any command-line overrides applied.
    fn config(&self) -> Result<TreeConfig, ConfigError> {
        let base = TreeConfig::from_env()?;
        TreeConfig::new(
            self.directory.clone().unwrap_or(base.directory),
            self.name.clone().unwrap_or(base.name),
        )
    }
}

fn run(tree: &Tree, command: Command) -> Result<(), TreeError> {
    match command {
        Command::Insert { key, value } => {
            tree.insert(key, value)?;
            tracing::info!(key, %value, "inserted");
        }
        Command::Find { key } => {
            for value in tree.find(&key)? {
                println!("{value}");
            }
        }
        Command::Erase { key, value } => {
            tree.erase(&key, &value)?;
            tracing::info!(key, %value, "erased");
        }
        Command::Range { lo, hi } => {
            for (key, value) in tree.find_range(&lo, &hi)? {
                println!("{key}\t{value}");
            }
        }
        Command::Verify => {
            let stats = tree.verify()?;
            println!(
                "height={} nodes={} keys={} values={}",
                stats.height, stats.nodes, stats.keys, stats.values
            );
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blinktree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(
        "Loaded configuration: directory={}, name={}",
        config.directory.display(),
        config.name
    );

    if let Err(e) = std::fs::create_dir_all(&config.directory) {
        tracing::error!("Failed to create data directory: {e}");
        std::process::exit(1);
    }

    let mut tree = Tree::new();
    if let Err(e) = tree.open_files(&config.files()) {
        tracing::error!("Failed to open tree: {e}");
        std::process::exit(1);
    }

    let result = run(&tree, cli.command);
    let closed = tree.close();
    if let Err(e) = result.and(closed) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("blinktree").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse(&["insert", "7", "seven"]).unwrap().command,
            Command::Insert {
                key: 7,
                value: Value::new("seven").unwrap()
            }
        );
        assert_eq!(
            parse(&["range", "1", "9"]).unwrap().command,
            Command::Range { lo: 1, hi: 9 }
        );
        assert_eq!(parse(&["verify"]).unwrap().command, Command::Verify);
    }

    #[test]
    fn test_parse_global_overrides() {
        let cli = parse(&["find", "3", "--directory", "/tmp/trees", "--name", "events"]).unwrap();
        assert_eq!(cli.command, Command::Find { key: 3 });
        assert_eq!(cli.directory, Some(PathBuf::from("/tmp/trees")));
        assert_eq!(cli.name.as_deref(), Some("events"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["find", "-1"]).is_err());
        assert!(parse(&["find", "1", "2"]).is_err());
        assert!(parse(&["insert", "1"]).is_err());
        assert!(parse(&["drop"]).is_err());
        assert!(parse(&["insert", "1", &"x".repeat(33)]).is_err());
    }

    #[test]
    fn test_invalid_name_override_is_rejected() {
        let cli = parse(&["verify", "--name", "../escape"]).unwrap();
        assert!(cli.config().is_err());
    }
}
