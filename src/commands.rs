//! `rgc` command implementations. Results go to stdout; diagnostics go
//! through `tracing` to stderr.

use std::path::Path;

use anyhow::Result;

use crate::config::{Config, MAX_DAYS};
use crate::document_cache::{DocumentCache, DocumentCacheOptions};
use crate::embedding::create_provider;
use crate::embedding_cache::EmbedOptions;
use crate::ingest::load_documents;
use crate::maintenance::{
    cleanup_directory, directory_stats, optimize_directory, warn_if_oversized, CacheStats,
    OptimizeReport,
};
use crate::retriever::{format_context, passage_title};
use crate::services::Services;

async fn build_services(config: &Config) -> Result<Services> {
    let provider = create_provider(&config.embedding)?;
    Ok(Services::build(config.clone(), provider).await?)
}

pub async fn run_ingest(config: &Config, root: &Path) -> Result<()> {
    let documents = load_documents(root, &config.ingest.include_globs)?;
    let services = build_services(config).await?;
    let report = services.ingestor.ingest_all(&documents).await?;

    println!("ingest {}", root.display());
    println!("  documents: {}", report.documents);
    println!("  unchanged: {}", report.skipped_unchanged);
    println!("  chunks written: {}", report.chunks);
    if report.stale_removed > 0 {
        println!("  stale chunks removed: {}", report.stale_removed);
    }
    println!("  store records: {}", services.store.len().await?);
    println!("ok");

    services.shutdown().await;
    Ok(())
}

pub async fn run_query(
    config: &Config,
    query: &str,
    k: Option<usize>,
    context: bool,
    no_cache: bool,
) -> Result<()> {
    let services = build_services(config).await?;
    let k = k.unwrap_or(services.retriever.top_k());
    let options = EmbedOptions {
        use_cache: !no_cache,
    };
    let passages = services
        .retriever
        .retrieve_or_degrade_with(query, k, options)
        .await?;

    if context {
        println!("{}", format_context(&passages));
    } else if passages.is_empty() {
        println!("No results.");
    } else {
        for (i, passage) in passages.iter().enumerate() {
            println!(
                "{}. [{:.2}] {} ({})",
                i + 1,
                passage.score,
                passage_title(passage),
                passage.record_id
            );
            println!("    excerpt: \"{}\"", excerpt(&passage.text, 240));
            println!();
        }
    }

    services.shutdown().await;
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn print_stats(label: &str, dir: &Path, stats: &CacheStats) {
    println!("{} ({})", label, dir.display());
    println!("  entries: {}", stats.total_entries);
    println!("  size: {} bytes", stats.total_size_bytes);
    let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!("  oldest: {}", fmt(stats.oldest_entry));
    println!("  newest: {}", fmt(stats.newest_entry));
}

pub async fn run_cache_stats(config: &Config) -> Result<()> {
    let max_bytes = config.cache.max_size_bytes();
    for (label, dir) in cache_dirs(config) {
        let stats = directory_stats(dir).await?;
        print_stats(label, dir, &stats);
        if warn_if_oversized(label, &stats, max_bytes) {
            println!("  warning: exceeds {} MB limit", config.cache.max_size_mb);
        }
    }
    Ok(())
}

pub async fn run_cache_sweep(config: &Config) -> Result<()> {
    let cache = DocumentCache::open(DocumentCacheOptions::from_config(config)).await?;
    let report = cache.sweep().await?;
    println!("cache sweep");
    println!("  expired: {}", report.expired);
    println!("  evicted: {}", report.evicted);
    println!("  remaining: {}", cache.len().await);
    Ok(())
}

pub async fn run_cache_cleanup(
    config: &Config,
    older_than_days: Option<i64>,
    target_size_mb: Option<u64>,
) -> Result<()> {
    let older_than = older_than_days.map(|days| chrono::Duration::days(days.min(MAX_DAYS)));
    let target = target_size_mb.map(|mb| mb.saturating_mul(1024 * 1024));
    println!("cache cleanup");
    for (label, dir) in cache_dirs(config) {
        let removed = cleanup_directory(dir, older_than, target).await?;
        println!("  {}: removed {} files", label, removed);
    }
    Ok(())
}

fn print_report(label: &str, report: &OptimizeReport) {
    println!("{}", label);
    println!("  files kept: {}", report.files_processed);
    println!("  duplicates removed: {}", report.duplicates_removed);
    println!("  corrupted skipped: {}", report.corrupted_files_skipped);
    println!(
        "  bytes: {} -> {} (saved {})",
        report.bytes_before,
        report.bytes_after,
        report.space_saved()
    );
}

pub async fn run_cache_optimize(config: &Config) -> Result<()> {
    let documents = DocumentCache::open(DocumentCacheOptions::from_config(config)).await?;
    let report = documents.optimize().await?;
    print_report("documents", &report);

    let report = optimize_directory(&config.cache.embedding_dir).await?;
    print_report("embeddings", &report);
    Ok(())
}

fn cache_dirs(config: &Config) -> [(&'static str, &Path); 2] {
    [
        ("documents", config.cache.document_dir.as_path()),
        ("embeddings", config.cache.embedding_dir.as_path()),
    ]
}
