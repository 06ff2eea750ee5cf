//! Reading statistics and document listings.
//!
//! Backs `pdfnotes stats` and `pdfnotes documents`.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::store::MetadataStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = MetadataStore::open(&config.db.path).await?;
    let stats = store.get_stats().await?;

    let db_size = database_size(&config.db.path);

    println!("pdf-notes — Reading Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_size(db_size));
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Pages:       {}", stats.pages);
    println!("  Page views:  {}", stats.total_views);
    println!("  Notes:       {}", stats.notes);
    println!("  Concepts:    {}", stats.concepts);
    println!();

    store.close().await;
    Ok(())
}

/// List tracked documents, most recently read first.
pub async fn run_documents(config: &Config) -> Result<()> {
    let store = MetadataStore::open(&config.db.path).await?;
    let docs = store.list_documents().await?;

    if docs.is_empty() {
        println!("No documents tracked yet.");
    } else {
        println!(
            "  {:<40} {:>6} {:>7}   {}",
            "DOCUMENT", "PAGES", "VIEWS", "LAST READ"
        );
        println!("  {}", "-".repeat(72));
        let now = chrono::Utc::now().timestamp();
        for doc in &docs {
            println!(
                "  {:<40} {:>6} {:>7}   {}",
                truncate(&doc.name, 40),
                doc.page_count,
                doc.total_views,
                read_age(doc.last_read_at, now)
            );
        }
    }

    store.close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// `1536` → `1.5 KiB`. Whole bytes below one KiB.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Size of the database including its WAL sidecar, which holds recent
/// writes until the next checkpoint.
fn database_size(path: &Path) -> u64 {
    let mut wal = path.as_os_str().to_owned();
    wal.push("-wal");
    [path.to_path_buf(), PathBuf::from(wal)]
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

/// How long ago a document was last read, in whole units.
fn read_age(ts: i64, now: i64) -> String {
    let age = chrono::Duration::seconds(now - ts);
    let (count, unit) = if age < chrono::Duration::zero() {
        return format_ts_iso(ts);
    } else if age.num_minutes() < 1 {
        return "just now".to_string();
    } else if age.num_hours() < 1 {
        (age.num_minutes(), "min")
    } else if age.num_days() < 1 {
        (age.num_hours(), "hour")
    } else if age.num_weeks() < 5 {
        (age.num_days(), "day")
    } else {
        return format_ts_iso(ts);
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{} {}{} ago", count, unit, plural)
}

/// UTC `YYYY-MM-DD HH:MM`; falls back to the raw number when out of range.
pub(crate) fn format_ts_iso(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ts.to_string(),
    }
}
