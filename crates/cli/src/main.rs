//! `assetsync` command-line entry point.
//!
//! Parses arguments, initialises logging, and calls into the library crates.
//! Every command prints a summary before returning, including on failure.
//! Commands that talk to the bucket validate the R2 configuration before
//! doing anything else.

mod cli;

use std::path::Path;

use anyhow::{bail, Context, Result};
use assetsync_common::{progress_fn, FnProgress, DEFAULT_SOURCE_SUBDIR};
use assetsync_filesystem::{
    extract_urls_from_files, list_backups, resolve_sources, restore_backup, rewrite_files,
    ExtractionReport, ResolvedSources, RestoreReport, RewriteCounts, RewriteReport, UrlFilter,
};
use assetsync_storage::{
    audit_store, check_urls, clear_staging, fix_file_types, AuditReport, BucketStats,
    DownloadOrchestrator, FileTypeReport, HttpFetcher, MappingDatabase, MappingStore,
    MigrationProgress, MigrationSettings, MigrationStage, ProgressSummary, RestoreOutcome,
    StageError, StorageClient, SyncEngine, SyncOptions, SyncResult, TransferStatistics,
    UploadOrchestrator, UrlCheckReport, VerifyReport,
};
use assetsync_storage_crt::{R2Config, R2StorageClient};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, GlobalArgs};

/// Number of items listed under a summary before eliding the rest.
const LIST_PREVIEW: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app: App = App::new(cli.global);
    match cli.command {
        Command::Discover { path } => app.discover(path.as_deref()).map(|_| ()),
        Command::Download => app.download().await.map(|_| ()),
        Command::Upload => app.upload().await.map(|_| ()),
        Command::Migrate { path, rewrite_json } => app.migrate(path.as_deref(), rewrite_json).await,
        Command::Sync => app.sync().await,
        Command::Verify => app.verify().await,
        Command::RetryUpload => app.retry_upload().await,
        Command::Audit => app.audit().await,
        Command::RestoreMapping => app.restore_mapping().await,
        Command::FixFileTypes => app.fix_file_types().await,
        Command::Clean { force } => app.clean(force).await,
        Command::UpdateJson { path, no_backup } => app.update_json(path.as_deref(), !no_backup),
        Command::RestoreJson { timestamp, list } => app.restore_json(timestamp.as_deref(), list),
        Command::VerifyJson { path, sample } => app.verify_json(path.as_deref(), sample).await,
        Command::Status => app.status(),
        Command::BucketStats { prefix } => app.bucket_stats(&prefix).await,
    }
}

/// Variable lookup used to read the R2 configuration.
type EnvLookup = fn(&str) -> Option<String>;

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Resolved settings plus the mapping store, shared by every command.
struct App {
    args: GlobalArgs,
    settings: MigrationSettings,
    store: MappingStore,
    env: EnvLookup,
}

impl App {
    fn new(args: GlobalArgs) -> Self {
        Self::with_env(args, process_env)
    }

    fn with_env(args: GlobalArgs, env: EnvLookup) -> Self {
        let settings: MigrationSettings = args.migration_settings();
        let store: MappingStore = MappingStore::new(args.mapping_file.clone());
        Self {
            args,
            settings,
            store,
            env,
        }
    }

    /// Validate the R2 settings; every remote command calls this first.
    fn config(&self) -> Result<R2Config> {
        R2Config::from_lookup(self.env).context("R2 configuration is incomplete")
    }

    async fn client(&self, config: &R2Config) -> R2StorageClient {
        R2StorageClient::new(config).await
    }

    fn sources(&self, path: Option<&str>) -> Result<ResolvedSources> {
        resolve_sources(&self.args.data_root, path).with_context(|| {
            format!(
                "cannot resolve {} under {}",
                path.unwrap_or(DEFAULT_SOURCE_SUBDIR),
                self.args.data_root.display()
            )
        })
    }

    fn discover(&self, path: Option<&str>) -> Result<usize> {
        let sources: ResolvedSources = self.sources(path)?;
        let filter: UrlFilter = UrlFilter::new(self.args.source_hosts.iter());
        let report: ExtractionReport = extract_urls_from_files(&sources.files, &filter);

        let mut db: MappingDatabase = self.store.load()?;
        let added: usize = db.register_urls(&report.urls, self.settings.hash_length);
        self.store.save(&mut db)?;

        println!(
            "Discovered {} URLs in {} files ({} unreadable); {} new, {} indexed in total",
            report.urls.len(),
            report.files_scanned,
            report.failed_files.len(),
            added,
            db.len()
        );
        Ok(added)
    }

    async fn download(&self) -> Result<TransferStatistics> {
        let fetcher: HttpFetcher = HttpFetcher::new()?;
        let progress = log_progress();
        let mut db: MappingDatabase = self.store.load()?;

        let outcome: Result<TransferStatistics, StageError> =
            DownloadOrchestrator::new(&fetcher, self.settings.clone())
                .with_progress(&progress)
                .download_pending(&self.store, &mut db)
                .await;
        finish_stage("Download", outcome)
    }

    async fn upload(&self) -> Result<TransferStatistics> {
        let config: R2Config = self.config()?;
        self.upload_with(&config).await
    }

    async fn upload_with(&self, config: &R2Config) -> Result<TransferStatistics> {
        let client: R2StorageClient = self.client(config).await;
        let progress = log_progress();
        let mut db: MappingDatabase = self.store.load()?;

        let outcome: Result<TransferStatistics, StageError> =
            UploadOrchestrator::new(&client, self.settings.clone())
                .with_progress(&progress)
                .upload_pending(&self.store, &mut db)
                .await;
        finish_stage("Upload", outcome)
    }

    async fn migrate(&self, path: Option<&str>, rewrite_json: bool) -> Result<()> {
        let config: R2Config = self.config()?;
        self.discover(path)?;
        // Upload whatever did download even if some items failed.
        let downloaded: Result<TransferStatistics> = self.download().await;
        let uploaded: Result<TransferStatistics> = self.upload_with(&config).await;
        downloaded?;
        uploaded?;
        if rewrite_json {
            self.update_json(path, true)?;
        }
        Ok(())
    }

    fn sync_options(&self) -> SyncOptions {
        SyncOptions::from_settings(&self.settings)
    }

    async fn run_sync(&self, client: &R2StorageClient) -> Result<SyncResult> {
        let result: SyncResult = SyncEngine::new(client, &self.store, self.sync_options())
            .sync_mapping_with_store()
            .await?;

        println!(
            "Sync: checked={} verified={} missing={} fixed={} errors={}",
            result.total_checked,
            result.verified,
            result.missing_in_store,
            result.fixed,
            result.errors
        );
        print_preview("fixed", result.preview(), result.fixed_keys.len());
        Ok(result)
    }

    async fn sync(&self) -> Result<()> {
        let config: R2Config = self.config()?;
        let client: R2StorageClient = self.client(&config).await;
        let result: SyncResult = self.run_sync(&client).await?;

        if result.errors > 0 {
            bail!("{} entries could not be verified", result.errors);
        }
        Ok(())
    }

    async fn verify(&self) -> Result<()> {
        let config: R2Config = self.config()?;
        let client: R2StorageClient = self.client(&config).await;
        let report: VerifyReport = SyncEngine::new(&client, &self.store, self.sync_options())
            .verify_uploads()
            .await?;

        println!(
            "Verify: verified={} missing={} errors={}",
            report.verified,
            report.missing.len(),
            report.errors.len()
        );
        print_preview("missing", &report.missing, report.missing.len());
        for (key, error) in report.errors.iter().take(LIST_PREVIEW) {
            println!("  error {}: {}", key, error);
        }

        if !report.missing.is_empty() || !report.errors.is_empty() {
            bail!(
                "{} uploads missing, {} could not be checked; run sync to repair",
                report.missing.len(),
                report.errors.len()
            );
        }
        Ok(())
    }

    async fn retry_upload(&self) -> Result<()> {
        let config: R2Config = self.config()?;
        let client: R2StorageClient = self.client(&config).await;
        let result: SyncResult = self.run_sync(&client).await?;
        if result.errors > 0 {
            tracing::warn!(errors = result.errors, "some entries could not be verified");
        }
        self.upload_with(&config).await.map(|_| ())
    }

    async fn audit(&self) -> Result<()> {
        let config: R2Config = self.config()?;
        let client: R2StorageClient = self.client(&config).await;
        let db: MappingDatabase = self.store.load()?;
        let report: AuditReport = audit_store(&client, &db).await?;

        println!(
            "Audit of {}: objects={} mapped={} untracked={} missing={}",
            client.bucket(),
            report.total_objects,
            report.total_mapped,
            report.untracked.len(),
            report.missing.len()
        );
        for (category, count) in &report.untracked_by_category {
            println!("  untracked {:<9} {}", category, count);
        }
        print_preview("untracked", &report.untracked, report.untracked.len());
        print_preview("missing", &report.missing, report.missing.len());
        if report.is_clean() {
            println!("Bucket and mapping agree");
        }
        Ok(())
    }

    async fn restore_mapping(&self) -> Result<()> {
        let config: R2Config = self.config()?;
        let client: R2StorageClient = self.client(&config).await;
        let outcome: RestoreOutcome = SyncEngine::new(&client, &self.store, self.sync_options())
            .restore_mapping()
            .await?;

        match outcome {
            RestoreOutcome::NoBackup => {
                bail!("no mapping backup in bucket {}", client.bucket())
            }
            RestoreOutcome::Restored { entries } => println!(
                "Restored {} entries into {}",
                entries,
                self.store.path().display()
            ),
        }
        Ok(())
    }

    async fn fix_file_types(&self) -> Result<()> {
        let mut db: MappingDatabase = self.store.load()?;
        let report: FileTypeReport =
            fix_file_types(&self.store, &mut db, &self.args.staging_dir).await?;

        println!(
            "File types: checked={} fixed={} undetected={} errors={}",
            report.checked,
            report.fixed.len(),
            report.undetected,
            report.errors.len()
        );
        for fix in report.fixed.iter().take(LIST_PREVIEW) {
            println!(
                "  {} .{} -> .{}",
                fix.hash_key, fix.old_extension, fix.new_extension
            );
        }
        for (hash_key, error) in report.errors.iter().take(LIST_PREVIEW) {
            println!("  error {}: {}", hash_key, error);
        }
        if !report.fixed.is_empty() {
            println!("Run upload to store the retyped assets under their new keys");
        }
        Ok(())
    }

    async fn clean(&self, force: bool) -> Result<()> {
        let db: MappingDatabase = self.store.load()?;
        let pending: usize = db.pending_upload().len();
        if pending > 0 && !force {
            bail!(
                "{} downloaded assets are not uploaded yet; run upload first or pass --force",
                pending
            );
        }

        let staging: &Path = &self.args.staging_dir;
        if clear_staging(staging).await? {
            println!("Removed {}", staging.display());
        } else {
            println!("Nothing to clean at {}", staging.display());
        }
        Ok(())
    }

    fn update_json(&self, path: Option<&str>, backup: bool) -> Result<()> {
        let sources: ResolvedSources = self.sources(path)?;
        let filter: UrlFilter = UrlFilter::new(self.args.source_hosts.iter());
        let db: MappingDatabase = self.store.load()?;
        let hash_length: usize = self.settings.hash_length;
        let lookup = |url: &str| db.public_url_for(url, hash_length).map(str::to_string);

        let backup_dir: Option<&Path> = backup.then_some(self.args.backup_dir.as_path());
        let report: RewriteReport =
            rewrite_files(&sources.files, &sources.root, &filter, &lookup, backup_dir);
        let totals: RewriteCounts = report.totals();

        println!(
            "Update JSON: files={} updated={} replaced={} not_uploaded={} failed={}",
            report.files.len(),
            report.files_updated(),
            totals.replaced,
            totals.not_found,
            report.failed_files.len()
        );
        if let (Some(run), true) = (&report.backup_run, report.files_updated() > 0) {
            println!("Originals saved under {}", run.display());
        }
        for error in report.failed_files.iter().take(LIST_PREVIEW) {
            println!("  failed {}", error);
        }

        if !report.failed_files.is_empty() {
            bail!("{} documents could not be rewritten", report.failed_files.len());
        }
        Ok(())
    }

    fn restore_json(&self, timestamp: Option<&str>, list: bool) -> Result<()> {
        let backup_dir: &Path = &self.args.backup_dir;
        if list {
            let runs: Vec<String> = list_backups(backup_dir)?;
            if runs.is_empty() {
                println!("No backups under {}", backup_dir.display());
            }
            for run in runs {
                println!("{}", run);
            }
            return Ok(());
        }

        let report: RestoreReport = restore_backup(backup_dir, &self.args.data_root, timestamp)
            .with_context(|| format!("no matching backup under {}", backup_dir.display()))?;
        println!(
            "Restored {} documents from backup {}",
            report.restored.len(),
            report.run
        );
        for error in &report.failed_files {
            println!("  failed {}", error);
        }
        if !report.failed_files.is_empty() {
            bail!("{} documents could not be restored", report.failed_files.len());
        }
        Ok(())
    }

    async fn verify_json(&self, path: Option<&str>, sample: usize) -> Result<()> {
        let config: R2Config = self.config()?;
        let Some(public_host) = config.public_host() else {
            bail!("public URL {} has no host", config.public_url);
        };
        let sources: ResolvedSources = self.sources(path)?;

        let remaining: ExtractionReport = extract_urls_from_files(
            &sources.files,
            &UrlFilter::new(self.args.source_hosts.iter()),
        );
        let migrated: ExtractionReport =
            extract_urls_from_files(&sources.files, &UrlFilter::new([public_host]));

        let migrated_urls: Vec<String> = migrated.urls.iter().cloned().collect();
        let picked: Vec<String> = sample_evenly(&migrated_urls, sample);
        let fetcher: HttpFetcher = HttpFetcher::new()?;
        let checks: UrlCheckReport = check_urls(
            &fetcher,
            &picked,
            &self.settings.retry,
            self.settings.concurrent_downloads,
        )
        .await;

        println!(
            "Verify JSON: files={} migrated_urls={} source_urls={} checked={} reachable={}",
            migrated.files_scanned,
            migrated.urls.len(),
            remaining.urls.len(),
            checks.checked(),
            checks.reachable
        );
        for (url, reason) in checks.unreachable.iter().take(LIST_PREVIEW) {
            println!("  unreachable {}: {}", url, reason);
        }

        if !checks.unreachable.is_empty() {
            bail!("{} sampled URLs are unreachable", checks.unreachable.len());
        }
        Ok(())
    }

    fn status(&self) -> Result<()> {
        let mut db: MappingDatabase = self.store.load()?;
        db.refresh_stats();
        let progress: ProgressSummary = db.progress();

        println!("Mapping file: {}", self.store.path().display());
        println!("Total assets: {}", progress.total);
        println!("  discovered: {}", progress.discovered);
        println!(
            "  downloaded: {} ({:.1}%)",
            progress.downloaded,
            progress.downloaded_percent()
        );
        println!(
            "  uploaded:   {} ({:.1}%)",
            progress.uploaded,
            progress.uploaded_percent()
        );
        println!("Total size: {} bytes", db.stats.total_size_bytes);
        for (category, count) in &db.stats.by_category {
            println!("  {:<9} {}", category.as_str(), count);
        }
        Ok(())
    }

    async fn bucket_stats(&self, prefix: &str) -> Result<()> {
        let config: R2Config = self.config()?;
        let client: R2StorageClient = self.client(&config).await;
        let stats: BucketStats = if prefix.is_empty() {
            client.bucket_stats().await?
        } else {
            client.prefix_stats(prefix).await?
        };

        println!(
            "Bucket {}{}: {} objects, {} bytes",
            client.bucket(),
            if prefix.is_empty() {
                String::new()
            } else {
                format!(" (prefix {})", prefix)
            },
            stats.total_objects,
            stats.total_size_bytes
        );
        Ok(())
    }
}

/// Progress callback that logs each batch and never cancels.
fn log_progress(
) -> FnProgress<impl Fn(&MigrationProgress) -> bool + Send + Sync, MigrationProgress> {
    progress_fn(|p: &MigrationProgress| {
        let stage: &str = match p.stage {
            MigrationStage::Downloading => "download",
            MigrationStage::Uploading => "upload",
        };
        tracing::info!(
            stage,
            completed = p.completed,
            total = p.total,
            succeeded = p.succeeded,
            failed = p.failed,
            "batch finished"
        );
        true
    })
}

/// Print the stage summary whether the stage finished or stopped on a save.
fn finish_stage(
    name: &str,
    outcome: Result<TransferStatistics, StageError>,
) -> Result<TransferStatistics> {
    match outcome {
        Ok(stats) => {
            println!("{}", stage_summary(name, &stats));
            if stats.failed > 0 {
                bail!("{} of {} items failed", stats.failed, stats.attempted);
            }
            Ok(stats)
        }
        Err(StageError { stats, source }) => {
            println!("{}", stage_summary(name, &stats));
            Err(anyhow::Error::new(source)
                .context(format!("{} stopped: mapping database could not be saved", name)))
        }
    }
}

fn stage_summary(name: &str, stats: &TransferStatistics) -> String {
    let mut summary: String = format!(
        "{}: attempted={} succeeded={} failed={} already_present={} bytes={}",
        name,
        stats.attempted,
        stats.succeeded,
        stats.failed,
        stats.already_present,
        stats.bytes_transferred
    );
    for error in &stats.errors {
        summary.push_str(&format!("\n  failed {}: {}", error.key, error.error));
    }
    summary
}

fn print_preview(label: &str, shown: &[String], total: usize) {
    for key in shown.iter().take(LIST_PREVIEW) {
        println!("  {} {}", label, key);
    }
    let printed: usize = shown.len().min(LIST_PREVIEW);
    if total > printed {
        println!("  ... and {} more", total - printed);
    }
}

/// Up to `count` items spread across the whole list.
fn sample_evenly(items: &[String], count: usize) -> Vec<String> {
    if count == 0 || items.is_empty() {
        return Vec::new();
    }
    let step: usize = (items.len() / count).max(1);
    items.iter().step_by(step).take(count).cloned().collect()
}
