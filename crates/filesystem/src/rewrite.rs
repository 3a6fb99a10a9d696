//! Rewriting source documents to point at migrated assets.
//!
//! Every string leaf accepted by the [`UrlFilter`] is looked up; when the
//! asset has a public URL the string is replaced by it. Documents are only
//! written when something changed. Before a write the original is copied to
//! `<backup_dir>/<stamp>/<path relative to the data root>`, so one run's
//! backups can be restored together.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::FileSystemError;
use crate::extractor::UrlFilter;

/// Format of backup run directories; sorts chronologically.
const BACKUP_STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Replacement counts for one document or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteCounts {
    /// Source URLs replaced by their public URL.
    pub replaced: u64,
    /// Source URLs left in place because they are not uploaded yet.
    pub not_found: u64,
}

/// Outcome of rewriting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRewrite {
    pub path: PathBuf,
    pub counts: RewriteCounts,
    /// Where the original was copied, if it was written.
    pub backup: Option<PathBuf>,
}

/// Outcome of rewriting a batch of documents.
#[derive(Debug, Clone, Default)]
pub struct RewriteReport {
    /// Documents processed, changed or not.
    pub files: Vec<FileRewrite>,
    /// Documents that could not be read, parsed or written.
    pub failed_files: Vec<FileSystemError>,
    /// Backup run directory, when backups were requested.
    pub backup_run: Option<PathBuf>,
}

impl RewriteReport {
    /// Counts summed over every document.
    pub fn totals(&self) -> RewriteCounts {
        self.files.iter().fold(RewriteCounts::default(), |acc, f| RewriteCounts {
            replaced: acc.replaced + f.counts.replaced,
            not_found: acc.not_found + f.counts.not_found,
        })
    }

    /// Documents that were written.
    pub fn files_updated(&self) -> usize {
        self.files.iter().filter(|f| f.counts.replaced > 0).count()
    }
}

/// Replace matching URLs in a JSON value in place.
///
/// # Arguments
/// * `value` - Document to rewrite
/// * `filter` - Which strings are source URLs
/// * `lookup` - Public URL for a source URL, if uploaded
/// * `counts` - Accumulator
pub fn rewrite_value<L>(value: &mut Value, filter: &UrlFilter, lookup: &L, counts: &mut RewriteCounts)
where
    L: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            if !filter.matches(s) {
                return;
            }
            match lookup(s) {
                Some(public_url) => {
                    *s = public_url;
                    counts.replaced += 1;
                }
                None => {
                    log::debug!("No public URL for {}", s);
                    counts.not_found += 1;
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_value(item, filter, lookup, counts);
            }
        }
        Value::Object(fields) => {
            for field in fields.values_mut() {
                rewrite_value(field, filter, lookup, counts);
            }
        }
        Value::Number(_) | Value::Bool(_) | Value::Null => {}
    }
}

/// Rewrite a batch of documents under `root`.
///
/// A document that fails is logged and recorded; it never aborts the batch.
///
/// # Arguments
/// * `files` - Documents to rewrite, all under `root`
/// * `root` - Data root the backup layout is relative to
/// * `filter` - Which strings are source URLs
/// * `lookup` - Public URL for a source URL, if uploaded
/// * `backup_dir` - Where to keep originals; `None` disables backups
pub fn rewrite_files<L>(
    files: &[PathBuf],
    root: &Path,
    filter: &UrlFilter,
    lookup: &L,
    backup_dir: Option<&Path>,
) -> RewriteReport
where
    L: Fn(&str) -> Option<String>,
{
    let backup_run: Option<PathBuf> =
        backup_dir.map(|dir: &Path| dir.join(backup_stamp(Utc::now())));
    let mut report: RewriteReport = RewriteReport {
        backup_run: backup_run.clone(),
        ..Default::default()
    };

    for path in files {
        match rewrite_file(path, root, filter, lookup, backup_run.as_deref()) {
            Ok(done) => {
                log::debug!(
                    "{}: {} replaced, {} not uploaded",
                    path.display(),
                    done.counts.replaced,
                    done.counts.not_found
                );
                report.files.push(done);
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                report.failed_files.push(e);
            }
        }
    }

    let totals: RewriteCounts = report.totals();
    log::info!(
        "Rewrote {} of {} file(s): {} URL(s) replaced, {} not uploaded",
        report.files_updated(),
        report.files.len(),
        totals.replaced,
        totals.not_found
    );
    report
}

fn rewrite_file<L>(
    path: &Path,
    root: &Path,
    filter: &UrlFilter,
    lookup: &L,
    backup_run: Option<&Path>,
) -> Result<FileRewrite, FileSystemError>
where
    L: Fn(&str) -> Option<String>,
{
    let contents: String = std::fs::read_to_string(path)
        .map_err(|e| FileSystemError::io(path.display().to_string(), &e))?;
    let mut value: Value = serde_json::from_str(&contents).map_err(|e| FileSystemError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut counts: RewriteCounts = RewriteCounts::default();
    rewrite_value(&mut value, filter, lookup, &mut counts);
    if counts.replaced == 0 {
        return Ok(FileRewrite {
            path: path.to_path_buf(),
            counts,
            backup: None,
        });
    }

    let backup: Option<PathBuf> = match backup_run {
        Some(run) => Some(backup_original(path, root, run)?),
        None => None,
    };
    write_pretty(path, &value)?;

    Ok(FileRewrite {
        path: path.to_path_buf(),
        counts,
        backup,
    })
}

fn backup_original(path: &Path, root: &Path, run: &Path) -> Result<PathBuf, FileSystemError> {
    let relative: &Path = path
        .strip_prefix(root)
        .map_err(|_| FileSystemError::PathTraversal {
            path: path.display().to_string(),
            root: root.display().to_string(),
        })?;
    let target: PathBuf = run.join(relative);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| FileSystemError::io(parent.display().to_string(), &e))?;
    }
    std::fs::copy(path, &target)
        .map_err(|e| FileSystemError::io(target.display().to_string(), &e))?;
    Ok(target)
}

/// Write `value` with four-space indentation through a temp file and rename.
fn write_pretty(path: &Path, value: &Value) -> Result<(), FileSystemError> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(
        &mut bytes,
        PrettyFormatter::with_indent(b"    "),
    );
    value
        .serialize(&mut serializer)
        .map_err(|e| FileSystemError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    bytes.push(b'\n');

    let dir: &Path = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp: NamedTempFile = NamedTempFile::new_in(dir)
        .map_err(|e| FileSystemError::io(dir.display().to_string(), &e))?;
    tmp.write_all(&bytes)
        .map_err(|e| FileSystemError::io(tmp.path().display().to_string(), &e))?;
    tmp.persist(path)
        .map_err(|e| FileSystemError::io(path.display().to_string(), &e.error))?;
    Ok(())
}

fn backup_stamp(at: DateTime<Utc>) -> String {
    at.format(BACKUP_STAMP_FORMAT).to_string()
}

/// Backup runs under `backup_dir`, oldest first.
///
/// # Errors
/// Returns `Io` if the directory exists but cannot be read.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<String>, FileSystemError> {
    let entries = match std::fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(FileSystemError::io(backup_dir.display().to_string(), &e)),
    };

    let mut runs: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    runs.sort();
    Ok(runs)
}

/// Outcome of restoring a backup run.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    /// The run that was restored.
    pub run: String,
    /// Documents copied back.
    pub restored: Vec<PathBuf>,
    /// Documents that could not be copied back.
    pub failed_files: Vec<FileSystemError>,
}

/// Copy a backup run back over the documents under `root`.
///
/// # Arguments
/// * `backup_dir` - Directory holding backup runs
/// * `root` - Data root the run was taken from
/// * `run` - Run to restore, or a prefix of one; `None` picks the latest
///
/// # Errors
/// Returns `NotFound` if no run matches.
pub fn restore_backup(
    backup_dir: &Path,
    root: &Path,
    run: Option<&str>,
) -> Result<RestoreReport, FileSystemError> {
    let runs: Vec<String> = list_backups(backup_dir)?;
    let chosen: Option<&String> = match run {
        Some(prefix) => runs.iter().rev().find(|r| r.starts_with(prefix)),
        None => runs.last(),
    };
    let Some(chosen) = chosen else {
        return Err(FileSystemError::NotFound {
            path: backup_dir.join(run.unwrap_or("")).display().to_string(),
        });
    };

    let run_dir: PathBuf = backup_dir.join(chosen);
    let mut report: RestoreReport = RestoreReport {
        run: chosen.clone(),
        ..Default::default()
    };

    for entry in WalkDir::new(&run_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable backup entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&run_dir) else {
            continue;
        };
        let target: PathBuf = root.join(relative);

        let copied = target
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::copy(entry.path(), &target));
        match copied {
            Ok(_) => report.restored.push(target),
            Err(e) => report
                .failed_files
                .push(FileSystemError::io(target.display().to_string(), &e)),
        }
    }

    log::info!(
        "Restored {} file(s) from backup {}",
        report.restored.len(),
        report.run
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const ICON: &str = "https://static.wikia.nocookie.net/gensin-impact/images/Amber_Icon.png";
    const CARD: &str = "https://static.wikia.nocookie.net/gensin-impact/images/Amber_Card.png";
    const PUBLIC: &str = "https://assets.example.com/icons/0123456789abcdef.png";

    fn lookup(url: &str) -> Option<String> {
        (url == ICON).then(|| PUBLIC.to_string())
    }

    fn write_doc(root: &Path, relative: &str, value: &Value) -> PathBuf {
        let path: PathBuf = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_rewrite_value_replaces_uploaded_urls_only() {
        let mut value: Value = json!({
            "name": "Amber",
            "images": { "icon": ICON, "card": CARD },
            "gallery": [ICON, "https://elsewhere.example.com/a.png", 3],
        });
        let mut counts: RewriteCounts = RewriteCounts::default();

        rewrite_value(&mut value, &UrlFilter::default(), &lookup, &mut counts);

        assert_eq!(counts, RewriteCounts { replaced: 2, not_found: 1 });
        assert_eq!(value["images"]["icon"], PUBLIC);
        assert_eq!(value["images"]["card"], CARD);
        assert_eq!(value["gallery"][0], PUBLIC);
        assert_eq!(value["gallery"][1], "https://elsewhere.example.com/a.png");
    }

    #[test]
    fn test_rewrite_files_backs_up_changed_documents() {
        let dir: TempDir = TempDir::new().unwrap();
        let root: PathBuf = dir.path().join("data");
        let backups: PathBuf = dir.path().join("backups");
        let amber: PathBuf = write_doc(&root, "characters/amber.json", &json!({ "icon": ICON }));
        let lisa: PathBuf = write_doc(&root, "characters/lisa.json", &json!({ "card": CARD }));

        let report: RewriteReport = rewrite_files(
            &[amber.clone(), lisa.clone()],
            &root,
            &UrlFilter::default(),
            &lookup,
            Some(&backups),
        );

        assert_eq!(report.files_updated(), 1);
        assert_eq!(report.totals(), RewriteCounts { replaced: 1, not_found: 1 });
        assert!(report.failed_files.is_empty());

        let rewritten: Value = serde_json::from_str(&fs::read_to_string(&amber).unwrap()).unwrap();
        assert_eq!(rewritten["icon"], PUBLIC);
        assert!(fs::read_to_string(&amber).unwrap().contains("\n    \"icon\""));

        let run: PathBuf = report.backup_run.unwrap();
        let original: Value =
            serde_json::from_slice(&fs::read(run.join("characters/amber.json")).unwrap()).unwrap();
        assert_eq!(original["icon"], ICON);
        assert!(!run.join("characters/lisa.json").exists());
    }

    #[test]
    fn test_key_order_is_preserved() {
        let dir: TempDir = TempDir::new().unwrap();
        let root: PathBuf = dir.path().to_path_buf();
        let path: PathBuf = root.join("doc.json");
        fs::write(&path, format!(r#"{{"zeta": "{ICON}", "alpha": 1}}"#)).unwrap();

        rewrite_files(&[path.clone()], &root, &UrlFilter::default(), &lookup, None);

        let text: String = fs::read_to_string(&path).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }

    #[test]
    fn test_invalid_document_is_skipped() {
        let dir: TempDir = TempDir::new().unwrap();
        let root: PathBuf = dir.path().to_path_buf();
        let bad: PathBuf = root.join("bad.json");
        fs::write(&bad, "{ not json").unwrap();

        let report: RewriteReport =
            rewrite_files(&[bad], &root, &UrlFilter::default(), &lookup, None);

        assert!(report.files.is_empty());
        assert!(matches!(report.failed_files[0], FileSystemError::Parse { .. }));
    }

    #[test]
    fn test_restore_latest_backup() {
        let dir: TempDir = TempDir::new().unwrap();
        let root: PathBuf = dir.path().join("data");
        let backups: PathBuf = dir.path().join("backups");
        let amber: PathBuf = write_doc(&root, "characters/amber.json", &json!({ "icon": ICON }));

        rewrite_files(&[amber.clone()], &root, &UrlFilter::default(), &lookup, Some(&backups));
        assert_eq!(list_backups(&backups).unwrap().len(), 1);

        let report: RestoreReport = restore_backup(&backups, &root, None).unwrap();

        assert_eq!(report.restored, vec![amber.clone()]);
        let restored: Value = serde_json::from_str(&fs::read_to_string(&amber).unwrap()).unwrap();
        assert_eq!(restored["icon"], ICON);
    }

    #[test]
    fn test_restore_unknown_run() {
        let dir: TempDir = TempDir::new().unwrap();
        let err: FileSystemError =
            restore_backup(&dir.path().join("backups"), dir.path(), Some("2001-01-01")).unwrap_err();
        assert!(matches!(err, FileSystemError::NotFound { .. }));
    }

    #[test]
    fn test_backup_stamp_format() {
        let at: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-05-06T07:08:09.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(backup_stamp(at), "2024-05-06T07-08-09-123Z");
    }
}
