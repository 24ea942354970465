use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use heirloom::import::Strategy;
use heirloom::model::Collection;
use heirloom::Config;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "heirloom")]
#[command(about = "Heirloom - backup, preview and restore for family-tree data")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.heirloom/config.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Acting user, recorded in audit entries and used for rate limiting
    #[arg(long, short, global = true, env = "HEIRLOOM_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export the live dataset to a .tar.zst archive
    Export {
        /// Output file ("-" for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Leave photos out of the archive
        #[arg(long)]
        no_photos: bool,

        /// Include audit log entries
        #[arg(long)]
        audit_logs: bool,

        /// Only audit entries from the last N days (0 = all)
        #[arg(long)]
        audit_log_days: Option<u32>,
    },

    /// Preview an archive against live data without changing anything
    Validate {
        /// Archive file
        input: PathBuf,
    },

    /// Import an archive into the live dataset
    Import {
        /// Archive file
        input: PathBuf,

        /// skip, replace or merge
        #[arg(short, long, default_value = "skip")]
        strategy: Strategy,

        /// Save a rollback snapshot before changing anything
        #[arg(long)]
        backup: bool,

        /// Leave photos out of the import
        #[arg(long)]
        no_photos: bool,

        /// Import audit log entries from the archive
        #[arg(long)]
        audit_logs: bool,

        /// Collections to import (comma-separated)
        #[arg(long, value_delimiter = ',')]
        collections: Option<Vec<Collection>>,
    },

    /// Manage rollback snapshots
    Snapshots {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Restore a rollback snapshot (imports it with the replace strategy)
    Restore {
        /// Snapshot id, as shown by `snapshots list`
        snapshot_id: String,

        /// Leave photos out of the restore
        #[arg(long)]
        no_photos: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotAction {
    /// List snapshots, newest first
    List,

    /// Delete a snapshot
    Delete {
        snapshot_id: String,
    },
}

fn init_logging(config: &Config) -> Result<()> {
    let log_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let json = config.logging.format == "json";

    if let Some(log_file) = &config.logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(log_filter)
            .with_ansi(false)
            .with_writer(file);
        if json {
            builder.json().init();
        } else {
            builder.init();
        }
    } else {
        // Reports go to stdout, so logs stay on stderr
        let builder = tracing_subscriber::fmt()
            .with_env_filter(log_filter)
            .with_writer(std::io::stderr);
        if json {
            builder.json().init();
        } else {
            builder.init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load_or_create(config_path)?
    } else if let Some(data_dir) = &cli.data_dir {
        Config::load_from(data_dir)?
    } else {
        Config::load()?
    };
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    init_logging(&config)?;
    config.ensure_dirs()?;
    tracing::debug!("Data dir: {:?}", config.storage.data_dir);

    let ctx = commands::Context::open(config, cli.user)?;

    match cli.command {
        Commands::Export {
            output,
            no_photos,
            audit_logs,
            audit_log_days,
        } => {
            commands::run_export(
                &ctx,
                output,
                commands::ExportFlags {
                    no_photos,
                    audit_logs,
                    audit_log_days,
                },
            )
            .await?;
        }
        Commands::Validate { input } => {
            commands::run_validate(&ctx, &input).await?;
        }
        Commands::Import {
            input,
            strategy,
            backup,
            no_photos,
            audit_logs,
            collections,
        } => {
            commands::run_import(
                &ctx,
                &input,
                commands::ImportFlags {
                    strategy,
                    backup,
                    no_photos,
                    audit_logs,
                    collections,
                },
            )
            .await?;
        }
        Commands::Snapshots { action } => match action {
            SnapshotAction::List => commands::run_snapshots_list(&ctx).await?,
            SnapshotAction::Delete { snapshot_id } => {
                commands::run_snapshots_delete(&ctx, &snapshot_id).await?
            }
        },
        Commands::Restore {
            snapshot_id,
            no_photos,
        } => {
            commands::run_restore(&ctx, &snapshot_id, no_photos).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from([
            "heirloom",
            "--user",
            "u1",
            "import",
            "backup.tar.zst",
            "--strategy",
            "merge",
            "--collections",
            "people,relationships",
            "--backup",
        ])
        .unwrap();
        assert_eq!(cli.user.as_deref(), Some("u1"));
        match cli.command {
            Commands::Import {
                strategy,
                backup,
                collections,
                ..
            } => {
                assert_eq!(strategy, Strategy::Merge);
                assert!(backup);
                assert_eq!(
                    collections,
                    Some(vec![Collection::People, Collection::Relationships])
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["heirloom", "import", "a.tar.zst", "-s", "newest"]).is_err());
    }
}
