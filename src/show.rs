//! Page retrieval for `pdfnotes notes <path> <page>`.
//!
//! Fetches a page's view record, its notes (newest first), and its linked
//! concepts.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::models::{Document, Note, Page, PageConcept};
use crate::stats::format_ts_iso;
use crate::store::MetadataStore;

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub document_path: String,
    pub page: Page,
    pub notes: Vec<Note>,
    pub concepts: Vec<PageConcept>,
}

/// Find a document by the path as given, then by its canonical form.
///
/// Documents named from a window title are stored under a bare file name,
/// so the literal argument has to win over whatever file of that name
/// happens to sit in the working directory.
pub async fn find_document(store: &MetadataStore, path: &str) -> Result<Option<Document>> {
    if let Some(document) = store.find_document_by_path(path).await? {
        return Ok(Some(document));
    }
    match std::fs::canonicalize(path) {
        Ok(canonical) => {
            store
                .find_document_by_path(&canonical.to_string_lossy())
                .await
        }
        Err(_) => Ok(None),
    }
}

/// Core lookup returning structured data.
pub async fn get_page_report(
    store: &MetadataStore,
    path: &str,
    page_number: u32,
) -> Result<PageReport> {
    let Some(document) = find_document(store, path).await? else {
        bail!("document not tracked: {}", path);
    };
    let Some(page) = store.get_page(document.id, page_number).await? else {
        bail!("page {} of {} has not been viewed", page_number, path);
    };

    let notes = store.get_page_notes(page.id).await?;
    let concepts = store.get_page_concepts(page.id).await?;

    Ok(PageReport {
        document_path: document.path,
        page,
        notes,
        concepts,
    })
}

/// CLI entry point: print the report as text or JSON.
pub async fn run_notes(config: &Config, path: &str, page_number: u32, json: bool) -> Result<()> {
    let store = MetadataStore::open(&config.db.path).await?;
    let report = get_page_report(&store, path, page_number).await;
    store.close().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("--- Page ---");
    println!("document:     {}", report.document_path);
    println!("page:         {}", report.page.page_number);
    println!("views:        {}", report.page.view_count);
    println!("last viewed:  {}", format_ts_iso(report.page.last_viewed_at));
    println!();

    if !report.concepts.is_empty() {
        println!("--- Concepts ({}) ---", report.concepts.len());
        for linked in &report.concepts {
            match &linked.concept.description {
                Some(desc) => println!("{}: {}", linked.concept.name, desc),
                None => println!("{}", linked.concept.name),
            }
        }
        println!();
    }

    println!("--- Notes ({}) ---", report.notes.len());
    for note in &report.notes {
        println!(
            "[{} · {} · {}]",
            format_ts_iso(note.created_at),
            note.note_type,
            note.directive_name.as_deref().unwrap_or("-")
        );
        println!("{}", note.content);
        println!();
    }

    Ok(())
}
