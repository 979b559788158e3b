//! Offline maintenance for cache directories: stats, cleanup, optimization.
//!
//! These functions operate on any directory of `*.json` cache files (the
//! document cache's one-file-per-entry layout and the embedding cache's
//! single index file alike). They do not coordinate with a live
//! [`DocumentCache`](crate::document_cache::DocumentCache); use
//! `DocumentCache::optimize` or `DocumentCache::sweep` for that.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use ragcache_core::fingerprint::fingerprint_bytes;
use ragcache_core::{Fingerprint, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Outcome of [`optimize_directory`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    /// Files written to the optimized directory.
    pub files_processed: usize,
    pub duplicates_removed: usize,
    pub corrupted_files_skipped: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl OptimizeReport {
    pub fn space_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Size and age summary of a cache directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

struct CacheFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// `*.json` files directly under `dir`, sorted by file name. A missing
/// directory has no files.
async fn list_cache_files(dir: &Path) -> Result<Vec<CacheFile>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        files.push(CacheFile {
            path,
            size: meta.len(),
            modified: meta.modified()?,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

pub async fn directory_stats(dir: &Path) -> Result<CacheStats> {
    let files = list_cache_files(dir).await?;
    Ok(CacheStats {
        total_entries: files.len(),
        total_size_bytes: files.iter().map(|f| f.size).sum(),
        oldest_entry: files.iter().map(|f| f.modified).min().map(DateTime::<Utc>::from),
        newest_entry: files.iter().map(|f| f.modified).max().map(DateTime::<Utc>::from),
    })
}

/// Log a warning when `stats` exceeds `max_size_bytes`. Returns whether it did.
pub fn warn_if_oversized(label: &str, stats: &CacheStats, max_size_bytes: u64) -> bool {
    if stats.total_size_bytes <= max_size_bytes {
        return false;
    }
    warn!(
        cache = label,
        size_mb = stats.total_size_bytes / (1024 * 1024),
        limit_mb = max_size_bytes / (1024 * 1024),
        "cache exceeds size limit"
    );
    true
}

/// Remove files older than `older_than` (by mtime), then remove the oldest
/// remaining files until the directory is at most `target_size_bytes`.
/// Returns the number of files removed.
pub async fn cleanup_directory(
    dir: &Path,
    older_than: Option<chrono::Duration>,
    target_size_bytes: Option<u64>,
) -> Result<usize> {
    let mut files = list_cache_files(dir).await?;
    let mut removed = 0;

    // A cutoff before the representable range means nothing is that old.
    if let Some(cutoff) = older_than.and_then(|age| Utc::now().checked_sub_signed(age)) {
        let mut kept = Vec::with_capacity(files.len());
        for file in files {
            if DateTime::<Utc>::from(file.modified) < cutoff {
                tokio::fs::remove_file(&file.path).await?;
                debug!(path = %file.path.display(), "removed aged cache file");
                removed += 1;
            } else {
                kept.push(file);
            }
        }
        files = kept;
    }

    if let Some(target) = target_size_bytes {
        let mut current: u64 = files.iter().map(|f| f.size).sum();
        files.sort_by_key(|f| f.modified);
        for file in &files {
            if current <= target {
                break;
            }
            tokio::fs::remove_file(&file.path).await?;
            current -= file.size;
            removed += 1;
        }
    }

    if removed > 0 {
        info!(dir = %dir.display(), removed, "cache cleanup finished");
    }
    Ok(removed)
}

/// Key used to detect duplicate cache files. Document-cache entries are
/// compared on their content alone; anything else on its canonical JSON.
fn dedup_hash(value: &Value) -> Result<Fingerprint> {
    let target = match value {
        Value::Object(map) if map.contains_key("key") && map.contains_key("metadata") => {
            map.get("content").unwrap_or(&Value::Null)
        }
        other => other,
    };
    Ok(fingerprint_bytes(&serde_json::to_vec(target)?))
}

fn sibling_dir(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cache".to_string());
    dir.with_file_name(format!("{}_{}", name, suffix))
}

/// Deduplicate and compact every cache file in `dir`.
///
/// The optimized files are written to a sibling temp directory which
/// replaces `dir` only once every file has been handled. If anything fails
/// before the swap, the temp directory is removed and `dir` is untouched.
pub async fn optimize_directory(dir: &Path) -> Result<OptimizeReport> {
    let files = list_cache_files(dir).await?;
    if files.is_empty() {
        return Ok(OptimizeReport::default());
    }

    let staging = sibling_dir(dir, "optimize_tmp");
    let backup = sibling_dir(dir, "optimize_old");
    if tokio::fs::metadata(&staging).await.is_ok() {
        tokio::fs::remove_dir_all(&staging).await?;
    }
    tokio::fs::create_dir_all(&staging).await?;

    let report = match write_optimized(&files, &staging).await {
        Ok(report) => report,
        Err(e) => {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }
    };

    if tokio::fs::metadata(&backup).await.is_ok() {
        tokio::fs::remove_dir_all(&backup).await?;
    }
    tokio::fs::rename(dir, &backup).await?;
    if let Err(e) = tokio::fs::rename(&staging, dir).await {
        tokio::fs::rename(&backup, dir).await?;
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(e.into());
    }
    tokio::fs::remove_dir_all(&backup).await?;

    info!(
        dir = %dir.display(),
        files = report.files_processed,
        duplicates = report.duplicates_removed,
        corrupted = report.corrupted_files_skipped,
        saved_bytes = report.space_saved(),
        "cache optimized"
    );
    Ok(report)
}

async fn write_optimized(files: &[CacheFile], staging: &Path) -> Result<OptimizeReport> {
    let mut report = OptimizeReport::default();
    let mut seen: HashSet<Fingerprint> = HashSet::new();

    for file in files {
        let bytes = tokio::fs::read(&file.path).await?;
        report.bytes_before += bytes.len() as u64;

        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "skipping corrupted cache file");
                report.corrupted_files_skipped += 1;
                continue;
            }
        };
        if !seen.insert(dedup_hash(&value)?) {
            debug!(path = %file.path.display(), "dropping duplicate cache file");
            report.duplicates_removed += 1;
            continue;
        }

        let compact = serde_json::to_vec(&value)?;
        let Some(name) = file.path.file_name() else {
            continue;
        };
        tokio::fs::write(staging.join(name), &compact).await?;
        report.files_processed += 1;
        report.bytes_after += compact.len() as u64;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_json(dir: &Path, name: &str, value: &Value) {
        std::fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn entry(key: &str, content: &str) -> Value {
        json!({
            "key": key,
            "content": content,
            "metadata": {"source": "test", "version": "1.0"}
        })
    }

    #[tokio::test]
    async fn test_stats_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let stats = directory_stats(&tmp.path().join("nope")).await.unwrap();
        assert_eq!(stats, CacheStats::default());
    }

    #[tokio::test]
    async fn test_stats_counts_json_files_only() {
        let tmp = TempDir::new().unwrap();
        write_json(tmp.path(), "a.json", &json!({"x": 1}));
        write_json(tmp.path(), "b.json", &json!({"x": 2}));
        std::fs::write(tmp.path().join("b.json.tmp"), "partial").unwrap();

        let stats = directory_stats(tmp.path()).await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert!(stats.total_size_bytes > 0);
        assert!(stats.oldest_entry.is_some());
        assert!(stats.oldest_entry <= stats.newest_entry);
    }

    #[test]
    fn test_size_warning_threshold() {
        let stats = CacheStats {
            total_size_bytes: 2 * 1024 * 1024,
            ..Default::default()
        };
        assert!(warn_if_oversized("documents", &stats, 1024 * 1024));
        assert!(!warn_if_oversized("documents", &stats, 2 * 1024 * 1024));
    }

    #[tokio::test]
    async fn test_optimize_dedups_and_compacts() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("document_cache");
        std::fs::create_dir_all(&dir).unwrap();
        write_json(&dir, "1.json", &entry("k1", "same body"));
        write_json(&dir, "2.json", &entry("k2", "same body"));
        write_json(&dir, "3.json", &entry("k3", "other body"));
        std::fs::write(dir.join("4.json"), "{ broken").unwrap();

        let report = optimize_directory(&dir).await.unwrap();
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.corrupted_files_skipped, 1);
        assert!(report.bytes_after < report.bytes_before);

        // First seen wins.
        assert!(dir.join("1.json").exists());
        assert!(!dir.join("2.json").exists());
        assert!(dir.join("3.json").exists());
        assert!(!dir.join("4.json").exists());

        let text = std::fs::read_to_string(dir.join("3.json")).unwrap();
        assert!(!text.contains('\n'));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, entry("k3", "other body"));

        assert!(!tmp.path().join("document_cache_optimize_tmp").exists());
        assert!(!tmp.path().join("document_cache_optimize_old").exists());
    }

    #[tokio::test]
    async fn test_optimize_non_entry_files_hash_whole_json() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("embeddings");
        std::fs::create_dir_all(&dir).unwrap();
        write_json(&dir, "a.json", &json!({"metadata": {"model": "m"}, "vectors": {}}));
        write_json(&dir, "b.json", &json!({"metadata": {"model": "n"}, "vectors": {}}));

        let report = optimize_directory(&dir).await.unwrap();
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.duplicates_removed, 0);
    }

    #[tokio::test]
    async fn test_optimize_empty_dir_is_noop() {
        let tmp = TempDir::new().unwrap();
        let report = optimize_directory(tmp.path()).await.unwrap();
        assert_eq!(report, OptimizeReport::default());
        assert!(tmp.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_optimize_failure_leaves_original_untouched() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache");
        std::fs::create_dir_all(&dir).unwrap();
        write_json(&dir, "a.json", &entry("k", "body"));
        let unreadable = dir.join("b.json");
        write_json(&dir, "b.json", &entry("k2", "body2"));
        std::fs::set_permissions(&unreadable, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Running as root can read anything; nothing to assert then.
        if std::fs::read(&unreadable).is_ok() {
            return;
        }

        let result = optimize_directory(&dir).await;
        assert!(result.is_err());
        assert!(dir.join("a.json").exists());
        assert!(dir.join("b.json").exists());
        assert!(!tmp.path().join("cache_optimize_tmp").exists());
    }

    #[tokio::test]
    async fn test_cleanup_by_target_size_removes_oldest() {
        let tmp = TempDir::new().unwrap();
        for name in ["old.json", "mid.json", "new.json"] {
            std::fs::write(tmp.path().join(name), "x".repeat(100)).unwrap();
            // Distinct mtimes.
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let removed = cleanup_directory(tmp.path(), None, Some(150)).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!tmp.path().join("old.json").exists());
        assert!(!tmp.path().join("mid.json").exists());
        assert!(tmp.path().join("new.json").exists());
    }

    #[tokio::test]
    async fn test_cleanup_by_age() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.json"), "{}").unwrap();

        let removed = cleanup_directory(tmp.path(), Some(chrono::Duration::days(1)), None)
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = cleanup_directory(tmp.path(), Some(chrono::Duration::zero()), None)
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_cleanup_age_before_date_range_removes_nothing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.json"), "{}").unwrap();

        let removed =
            cleanup_directory(tmp.path(), Some(chrono::Duration::days(100_000_000)), None)
                .await
                .unwrap();
        assert_eq!(removed, 0);
        assert!(tmp.path().join("a.json").exists());
    }
}
