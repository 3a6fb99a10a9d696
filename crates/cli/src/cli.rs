//! Command-line arguments.

use std::path::PathBuf;

use assetsync_common::{
    DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_WAIT_MS, DEFAULT_RETRY_BACKOFF_MULTIPLIER,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_SOURCE_HOST,
};
use assetsync_storage::{MigrationSettings, RetrySettings, DEFAULT_STAGING_DIR};
use clap::{Args, Parser, Subcommand};

/// Migrate externally hosted game assets into an R2 bucket.
#[derive(Parser, Debug)]
#[command(name = "assetsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Root directory that source JSON paths are resolved against.
    #[arg(long, global = true, env = "ASSETSYNC_DATA_ROOT", default_value = "data")]
    pub data_root: PathBuf,

    /// Mapping database file.
    #[arg(
        long,
        global = true,
        env = "ASSETSYNC_MAPPING_FILE",
        default_value = ".assetsync/asset-mapping.json"
    )]
    pub mapping_file: PathBuf,

    /// Directory holding originals of rewritten JSON documents.
    #[arg(
        long,
        global = true,
        env = "ASSETSYNC_BACKUP_DIR",
        default_value = ".assetsync/backups"
    )]
    pub backup_dir: PathBuf,

    /// Directory holding downloaded assets awaiting upload.
    #[arg(long, global = true, env = "ASSETSYNC_STAGING_DIR", default_value = DEFAULT_STAGING_DIR)]
    pub staging_dir: PathBuf,

    /// Host whose URLs are migrated; repeat for several hosts.
    #[arg(
        long = "source-host",
        global = true,
        env = "ASSETSYNC_SOURCE_HOSTS",
        value_delimiter = ',',
        default_value = DEFAULT_SOURCE_HOST,
    )]
    pub source_hosts: Vec<String>,

    /// Concurrent requests per batch (defaults to the number of CPU cores).
    #[arg(long, global = true, env = "ASSETSYNC_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Retries per item after the first attempt before it is reported as failed.
    #[arg(
        long,
        global = true,
        env = "ASSETSYNC_MAX_RETRIES",
        default_value_t = DEFAULT_MAX_RETRIES,
    )]
    pub max_retries: u32,

    /// Base delay before the first retry, in milliseconds.
    #[arg(
        long,
        global = true,
        env = "ASSETSYNC_RETRY_DELAY_MS",
        default_value_t = DEFAULT_RETRY_DELAY_MS,
    )]
    pub retry_delay_ms: u64,

    /// Wait after a rate-limit response, in milliseconds.
    #[arg(
        long,
        global = true,
        env = "ASSETSYNC_RATE_LIMIT_WAIT_MS",
        default_value_t = DEFAULT_RATE_LIMIT_WAIT_MS,
    )]
    pub rate_limit_wait_ms: u64,
}

impl GlobalArgs {
    /// Build migration settings from the flags.
    pub fn migration_settings(&self) -> MigrationSettings {
        let mut settings: MigrationSettings = MigrationSettings::new()
            .with_staging_dir(self.staging_dir.clone())
            .with_retry(RetrySettings {
                max_retries: self.max_retries,
                retry_delay_ms: self.retry_delay_ms,
                retry_backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
                rate_limit_wait_ms: self.rate_limit_wait_ms,
            });
        if let Some(concurrency) = self.concurrency {
            settings = settings.with_concurrency(concurrency.max(1));
        }
        settings
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan JSON sources and index every asset URL found.
    Discover {
        /// File or directory under the data root (default: characters).
        path: Option<String>,
    },
    /// Download every discovered asset into the staging directory.
    Download,
    /// Upload every downloaded asset to the bucket.
    Upload,
    /// Run discover, download and upload in sequence.
    Migrate {
        /// File or directory under the data root (default: characters).
        path: Option<String>,

        /// Rewrite the JSON sources to the public URLs afterwards.
        #[arg(long)]
        rewrite_json: bool,
    },
    /// Verify uploaded entries against the bucket and repair drift.
    Sync,
    /// Report uploaded entries missing from the bucket without repairing.
    Verify,
    /// Repair drift, then upload everything not in the bucket.
    RetryUpload,
    /// Compare the bucket listing with the mapping database.
    Audit,
    /// Replace the local mapping database with the bucket backup.
    RestoreMapping,
    /// Rename staged files whose content does not match their extension.
    FixFileTypes,
    /// Delete the staging directory.
    Clean {
        /// Delete even if some staged assets are not uploaded yet.
        #[arg(long)]
        force: bool,
    },
    /// Replace source URLs in JSON documents with their public URLs.
    UpdateJson {
        /// File or directory under the data root (default: characters).
        path: Option<String>,

        /// Do not keep copies of the original documents.
        #[arg(long)]
        no_backup: bool,
    },
    /// Put back the JSON documents saved by an earlier update-json.
    RestoreJson {
        /// Backup to restore, or a prefix of its timestamp (default: latest).
        #[arg(long)]
        timestamp: Option<String>,

        /// List the available backups instead of restoring.
        #[arg(long)]
        list: bool,
    },
    /// Check that rewritten JSON documents point at reachable assets.
    VerifyJson {
        /// File or directory under the data root (default: characters).
        path: Option<String>,

        /// Number of public URLs to request.
        #[arg(long, default_value_t = 20)]
        sample: usize,
    },
    /// Show lifecycle counts from the mapping database.
    Status,
    /// Count objects and bytes in the bucket.
    BucketStats {
        /// Only count keys starting with this prefix.
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli: Cli = Cli::parse_from(["assetsync", "status"]);
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.global.source_hosts, vec![DEFAULT_SOURCE_HOST.to_string()]);
        assert_eq!(cli.global.max_retries, 3);

        let settings: MigrationSettings = cli.global.migration_settings();
        assert_eq!(settings.retry.retry_delay_ms, 1000);
        assert_eq!(settings.staging_dir, PathBuf::from(DEFAULT_STAGING_DIR));
    }

    #[test]
    fn test_flags_after_subcommand() {
        let cli: Cli = Cli::parse_from([
            "assetsync",
            "migrate",
            "characters/amber.json",
            "--concurrency",
            "4",
            "--source-host",
            "a.example.com,b.example.com",
        ]);
        match &cli.command {
            Command::Migrate { path, rewrite_json } => {
                assert_eq!(path.as_deref(), Some("characters/amber.json"));
                assert!(!rewrite_json);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.global.source_hosts.len(), 2);
        assert_eq!(cli.global.migration_settings().concurrent_downloads, 4);
    }

    #[test]
    fn test_bucket_stats_prefix() {
        let cli: Cli = Cli::parse_from(["assetsync", "bucket-stats", "--prefix", "icons/"]);
        assert!(matches!(cli.command, Command::BucketStats { ref prefix } if prefix == "icons/"));
    }

    #[test]
    fn test_maintenance_commands() {
        let cli: Cli = Cli::parse_from(["assetsync", "update-json", "characters", "--no-backup"]);
        assert!(matches!(
            cli.command,
            Command::UpdateJson { ref path, no_backup: true } if path.as_deref() == Some("characters")
        ));
        assert_eq!(cli.global.backup_dir, PathBuf::from(".assetsync/backups"));

        let cli: Cli = Cli::parse_from(["assetsync", "restore-json", "--timestamp", "2024-05-06"]);
        assert!(matches!(
            cli.command,
            Command::RestoreJson { ref timestamp, list: false } if timestamp.as_deref() == Some("2024-05-06")
        ));

        let cli: Cli = Cli::parse_from(["assetsync", "verify-json"]);
        assert!(matches!(cli.command, Command::VerifyJson { path: None, sample: 20 }));

        let cli: Cli = Cli::parse_from(["assetsync", "clean", "--force"]);
        assert!(matches!(cli.command, Command::Clean { force: true }));

        for (name, expected) in [
            ("verify", "Verify"),
            ("retry-upload", "RetryUpload"),
            ("audit", "Audit"),
            ("restore-mapping", "RestoreMapping"),
            ("fix-file-types", "FixFileTypes"),
        ] {
            let cli: Cli = Cli::parse_from(["assetsync", name]);
            assert_eq!(format!("{:?}", cli.command), expected);
        }
    }

    #[test]
    fn test_migrate_rewrite_flag() {
        let cli: Cli = Cli::parse_from(["assetsync", "migrate", "--rewrite-json"]);
        assert!(matches!(cli.command, Command::Migrate { path: None, rewrite_json: true }));
    }
}
