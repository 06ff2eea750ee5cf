//! Core data models used throughout pdf-notes.
//!
//! These types mirror the rows of the metadata database: documents, their
//! pages, the notes generated for pages, concepts, and directives.

use serde::Serialize;

/// A tracked PDF file.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub size_bytes: i64,
    pub modified_at: Option<i64>,
    pub first_seen_at: i64,
    pub last_read_at: i64,
}

/// Document plus aggregate reading figures, used by listings.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub last_read_at: i64,
    pub page_count: i64,
    pub total_views: i64,
}

/// What `get_or_create_document` observed about the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentChange {
    /// First time this path was seen.
    New,
    /// Stored size and modification time match.
    Unchanged,
    /// Size or modification time differs from the stored values. Copying a
    /// file can reset its mtime and some editors never touch it, so this is
    /// a hint, not proof.
    Modified,
}

/// Result of resolving a document by path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: i64,
    pub change: DocumentChange,
}

/// One page of one document.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: i64,
    pub document_id: i64,
    pub page_number: i64,
    pub view_count: i64,
    pub last_viewed_at: i64,
}

/// Generated markdown annotation attached to a page.
#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub id: i64,
    pub page_id: i64,
    pub content: String,
    pub note_type: String,
    pub directive_name: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Concept {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// A concept linked to a page, with the snippet it was found in.
#[derive(Debug, Clone, Serialize)]
pub struct PageConcept {
    pub concept: Concept,
    pub context: Option<String>,
}

/// Named template governing how notes are generated.
#[derive(Debug, Clone, Serialize)]
pub struct Directive {
    pub id: i64,
    pub name: String,
    pub template: String,
    pub is_default: bool,
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub documents: i64,
    pub pages: i64,
    pub total_views: i64,
    pub notes: i64,
    pub concepts: i64,
}
