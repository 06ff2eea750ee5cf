//! SQLite-backed metadata store.
//!
//! [`MetadataStore`] wraps a single-connection [`SqlitePool`] and exposes
//! the reading-history operations used by the poller and the CLI. Every
//! method returns a `Result`; callers on the watch path log failures and
//! keep going.

use anyhow::{bail, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::migrate;
use crate::models::{
    Concept, Directive, Document, DocumentChange, DocumentRecord, DocumentSummary, Note, Page,
    PageConcept, Stats,
};

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        migrate::ensure_schema(&self.pool).await
    }

    // ============ Documents ============

    /// Look up a document by path, creating it on first sight.
    ///
    /// For an existing document the size, modification time and last-read
    /// time are overwritten unconditionally; a differing size or mtime is
    /// reported as [`DocumentChange::Modified`] and logged.
    pub async fn get_or_create_document(
        &self,
        path: &str,
        name: &str,
        size_bytes: i64,
        modified_at: Option<i64>,
    ) -> Result<DocumentRecord> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id, size_bytes, modified_at FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;

        let record = match existing {
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO documents (path, name, size_bytes, modified_at, first_seen_at, last_read_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(path)
                .bind(name)
                .bind(size_bytes)
                .bind(modified_at)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert document {}", path))?;

                tracing::info!(document_id = id, path, "tracking new document");
                DocumentRecord {
                    id,
                    change: DocumentChange::New,
                }
            }
            Some(row) => {
                let id: i64 = row.get("id");
                let old_size: i64 = row.get("size_bytes");
                let old_modified: Option<i64> = row.get("modified_at");

                sqlx::query(
                    "UPDATE documents SET size_bytes = ?, modified_at = ?, last_read_at = ? WHERE id = ?",
                )
                .bind(size_bytes)
                .bind(modified_at)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to update document {}", path))?;

                let change = if old_size != size_bytes || old_modified != modified_at {
                    tracing::warn!(
                        document_id = id,
                        path,
                        old_size,
                        new_size = size_bytes,
                        ?old_modified,
                        new_modified = ?modified_at,
                        "document size or modification time changed since last read"
                    );
                    DocumentChange::Modified
                } else {
                    DocumentChange::Unchanged
                };

                DocumentRecord { id, change }
            }
        };

        tx.commit().await?;
        Ok(record)
    }

    pub async fn find_document_by_path(&self, path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, path, name, size_bytes, modified_at, first_seen_at, last_read_at FROM documents WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Document {
            id: row.get("id"),
            path: row.get("path"),
            name: row.get("name"),
            size_bytes: row.get("size_bytes"),
            modified_at: row.get("modified_at"),
            first_seen_at: row.get("first_seen_at"),
            last_read_at: row.get("last_read_at"),
        }))
    }

    /// All documents, most recently read first.
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT
                d.id, d.path, d.name, d.last_read_at,
                COUNT(p.id) AS page_count,
                COALESCE(SUM(p.view_count), 0) AS total_views
            FROM documents d
            LEFT JOIN pages p ON p.document_id = d.id
            GROUP BY d.id
            ORDER BY d.last_read_at DESC, d.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentSummary {
                id: row.get("id"),
                path: row.get("path"),
                name: row.get("name"),
                last_read_at: row.get("last_read_at"),
                page_count: row.get("page_count"),
                total_views: row.get("total_views"),
            })
            .collect())
    }

    // ============ Pages ============

    /// Count one view of `(document_id, page_number)`.
    ///
    /// A single upsert statement, so concurrent callers can never create two
    /// rows for the same key.
    pub async fn record_page_view(&self, document_id: i64, page_number: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pages (document_id, page_number, view_count, last_viewed_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(document_id, page_number) DO UPDATE SET
                view_count = view_count + 1,
                last_viewed_at = excluded.last_viewed_at
            "#,
        )
        .bind(document_id)
        .bind(page_number as i64)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to record view of page {} of document {}",
                page_number, document_id
            )
        })?;

        Ok(())
    }

    pub async fn get_page_id(&self, document_id: i64, page_number: u32) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT id FROM pages WHERE document_id = ? AND page_number = ?")
            .bind(document_id)
            .bind(page_number as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn get_page(&self, document_id: i64, page_number: u32) -> Result<Option<Page>> {
        let row = sqlx::query(
            "SELECT id, document_id, page_number, view_count, last_viewed_at FROM pages WHERE document_id = ? AND page_number = ?",
        )
        .bind(document_id)
        .bind(page_number as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Page {
            id: row.get("id"),
            document_id: row.get("document_id"),
            page_number: row.get("page_number"),
            view_count: row.get("view_count"),
            last_viewed_at: row.get("last_viewed_at"),
        }))
    }

    // ============ Notes ============

    /// Append a note. Existing notes are never touched.
    pub async fn store_note(
        &self,
        page_id: i64,
        content: &str,
        note_type: &str,
        directive_name: Option<&str>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO notes (page_id, content, note_type, directive_name, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(page_id)
        .bind(content)
        .bind(note_type)
        .bind(directive_name)
        .bind(now_ts())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to store note for page {}", page_id))?;

        Ok(id)
    }

    /// Notes for a page, newest first. Unknown pages yield an empty list.
    pub async fn get_page_notes(&self, page_id: i64) -> Result<Vec<Note>> {
        let rows = sqlx::query(
            r#"
            SELECT id, page_id, content, note_type, directive_name, created_at
            FROM notes
            WHERE page_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(note_from_row).collect())
    }

    // ============ Concepts ============

    /// Insert a concept or return the id of the existing one with that name.
    ///
    /// A description given for an existing concept only fills in a missing one.
    pub async fn upsert_concept(&self, name: &str, description: Option<&str>) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO concepts (name, description) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = COALESCE(concepts.description, excluded.description)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert concept '{}'", name))?;

        Ok(id)
    }

    /// Link a concept to a page. Re-linking replaces the context snippet.
    pub async fn link_page_concept(
        &self,
        page_id: i64,
        concept_id: i64,
        context: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO page_concepts (page_id, concept_id, context) VALUES (?, ?, ?)
            ON CONFLICT(page_id, concept_id) DO UPDATE SET context = excluded.context
            "#,
        )
        .bind(page_id)
        .bind(concept_id)
        .bind(context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_page_concepts(&self, page_id: i64) -> Result<Vec<PageConcept>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.description, pc.context
            FROM page_concepts pc
            JOIN concepts c ON c.id = pc.concept_id
            WHERE pc.page_id = ?
            ORDER BY c.name ASC
            "#,
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PageConcept {
                concept: Concept {
                    id: row.get("id"),
                    name: row.get("name"),
                    description: row.get("description"),
                },
                context: row.get("context"),
            })
            .collect())
    }

    // ============ Directives ============

    pub async fn list_directives(&self) -> Result<Vec<Directive>> {
        let rows = sqlx::query("SELECT id, name, template, is_default FROM directives ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(directive_from_row).collect())
    }

    pub async fn add_directive(&self, name: &str, template: &str) -> Result<i64> {
        if name.trim().is_empty() {
            bail!("directive name must not be empty");
        }
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO directives (name, template, is_default) VALUES (?, ?, 0) RETURNING id",
        )
        .bind(name)
        .bind(template)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to add directive '{}'", name))?;
        Ok(id)
    }

    pub async fn default_directive(&self) -> Result<Option<Directive>> {
        let row = sqlx::query(
            "SELECT id, name, template, is_default FROM directives WHERE is_default = 1 ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(directive_from_row))
    }

    /// Make `name` the only default directive.
    ///
    /// A single `UPDATE` flips every row at once, so there is never a moment
    /// with two defaults.
    pub async fn set_default_directive(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM directives WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            bail!("directive not found: {}", name);
        }

        sqlx::query("UPDATE directives SET is_default = (name = ?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ============ Stats ============

    pub async fn get_stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents) AS documents,
                (SELECT COUNT(*) FROM pages) AS pages,
                (SELECT COALESCE(SUM(view_count), 0) FROM pages) AS total_views,
                (SELECT COUNT(*) FROM notes) AS notes,
                (SELECT COUNT(*) FROM concepts) AS concepts
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Stats {
            documents: row.get("documents"),
            pages: row.get("pages"),
            total_views: row.get("total_views"),
            notes: row.get("notes"),
            concepts: row.get("concepts"),
        })
    }
}

fn note_from_row(row: &SqliteRow) -> Note {
    Note {
        id: row.get("id"),
        page_id: row.get("page_id"),
        content: row.get("content"),
        note_type: row.get("note_type"),
        directive_name: row.get("directive_name"),
        created_at: row.get("created_at"),
    }
}

fn directive_from_row(row: &SqliteRow) -> Directive {
    Directive {
        id: row.get("id"),
        name: row.get("name"),
        template: row.get("template"),
        is_default: row.get::<i64, _>("is_default") != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, MetadataStore) {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::open(&tmp.path().join("data/notes.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn test_ensure_schema_idempotent() {
        let (_tmp, store) = open_store().await;
        let doc = store
            .get_or_create_document("/papers/a.pdf", "a.pdf", 10, Some(1))
            .await
            .unwrap();
        store.record_page_view(doc.id, 1).await.unwrap();

        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.pages, 1);
        assert_eq!(store.list_directives().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_default_directive_seeded() {
        let (_tmp, store) = open_store().await;
        let directive = store.default_directive().await.unwrap().unwrap();
        assert_eq!(directive.name, migrate::DEFAULT_DIRECTIVE_NAME);
        assert!(directive.is_default);
    }

    #[tokio::test]
    async fn test_get_or_create_document_same_id() {
        let (_tmp, store) = open_store().await;
        let first = store
            .get_or_create_document("/papers/paper.pdf", "paper.pdf", 2048, Some(1_700_000_000))
            .await
            .unwrap();
        let second = store
            .get_or_create_document("/papers/paper.pdf", "paper.pdf", 2048, Some(1_700_000_000))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.change, DocumentChange::New);
        assert_eq!(second.change, DocumentChange::Unchanged);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE path = ?")
            .bind("/papers/paper.pdf")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_get_or_create_document_detects_modification() {
        let (_tmp, store) = open_store().await;
        store
            .get_or_create_document("/papers/p.pdf", "p.pdf", 100, Some(10))
            .await
            .unwrap();

        let grown = store
            .get_or_create_document("/papers/p.pdf", "p.pdf", 120, Some(10))
            .await
            .unwrap();
        assert_eq!(grown.change, DocumentChange::Modified);

        let touched = store
            .get_or_create_document("/papers/p.pdf", "p.pdf", 120, Some(20))
            .await
            .unwrap();
        assert_eq!(touched.change, DocumentChange::Modified);

        let doc = store.find_document_by_path("/papers/p.pdf").await.unwrap().unwrap();
        assert_eq!(doc.size_bytes, 120);
        assert_eq!(doc.modified_at, Some(20));
    }

    #[tokio::test]
    async fn test_record_page_view_counts() {
        let (_tmp, store) = open_store().await;
        let doc = store
            .get_or_create_document("/papers/b.pdf", "b.pdf", 1, None)
            .await
            .unwrap();

        for _ in 0..4 {
            store.record_page_view(doc.id, 7).await.unwrap();
        }
        let before_last = chrono::Utc::now().timestamp();
        store.record_page_view(doc.id, 7).await.unwrap();
        let after_last = chrono::Utc::now().timestamp();

        let page = store.get_page(doc.id, 7).await.unwrap().unwrap();
        assert_eq!(page.view_count, 5);
        assert!(page.last_viewed_at >= before_last && page.last_viewed_at <= after_last);

        let pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(pages, 1);
    }

    #[tokio::test]
    async fn test_get_page_id_absent() {
        let (_tmp, store) = open_store().await;
        assert_eq!(store.get_page_id(42, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_notes_newest_first() {
        let (_tmp, store) = open_store().await;
        let doc = store
            .get_or_create_document("/papers/c.pdf", "c.pdf", 1, None)
            .await
            .unwrap();
        store.record_page_view(doc.id, 2).await.unwrap();
        let page_id = store.get_page_id(doc.id, 2).await.unwrap().unwrap();

        store
            .store_note(page_id, "first", "summary", Some("summarize"))
            .await
            .unwrap();
        let second = store
            .store_note(page_id, "second", "summary", None)
            .await
            .unwrap();

        let notes = store.get_page_notes(page_id).await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].id, second);
        assert_eq!(notes[0].content, "second");
        assert_eq!(notes[1].directive_name.as_deref(), Some("summarize"));
    }

    #[tokio::test]
    async fn test_notes_for_unknown_page_empty() {
        let (_tmp, store) = open_store().await;
        assert!(store.get_page_notes(999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_empty_store_all_zero() {
        let (_tmp, store) = open_store().await;
        assert_eq!(store.get_stats().await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn test_stats_sums_views() {
        let (_tmp, store) = open_store().await;
        let doc = store
            .get_or_create_document("/papers/d.pdf", "d.pdf", 1, None)
            .await
            .unwrap();
        store.record_page_view(doc.id, 1).await.unwrap();
        store.record_page_view(doc.id, 1).await.unwrap();
        store.record_page_view(doc.id, 2).await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.total_views, 3);
    }

    #[tokio::test]
    async fn test_concepts_deduplicated() {
        let (_tmp, store) = open_store().await;
        let doc = store
            .get_or_create_document("/papers/e.pdf", "e.pdf", 1, None)
            .await
            .unwrap();
        store.record_page_view(doc.id, 1).await.unwrap();
        let page_id = store.get_page_id(doc.id, 1).await.unwrap().unwrap();

        let a = store.upsert_concept("Entropy", None).await.unwrap();
        let b = store
            .upsert_concept("Entropy", Some("measure of disorder"))
            .await
            .unwrap();
        assert_eq!(a, b);

        store.link_page_concept(page_id, a, Some("old")).await.unwrap();
        store.link_page_concept(page_id, a, Some("new")).await.unwrap();

        let linked = store.get_page_concepts(page_id).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].context.as_deref(), Some("new"));
        assert_eq!(
            linked[0].concept.description.as_deref(),
            Some("measure of disorder")
        );
        assert_eq!(store.get_stats().await.unwrap().concepts, 1);
    }

    #[tokio::test]
    async fn test_set_default_directive_exclusive() {
        let (_tmp, store) = open_store().await;
        store.add_directive("flashcards", "Make flashcards").await.unwrap();
        store.set_default_directive("flashcards").await.unwrap();

        let defaults: Vec<_> = store
            .list_directives()
            .await
            .unwrap()
            .into_iter()
            .filter(|d| d.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, "flashcards");

        assert!(store.set_default_directive("missing").await.is_err());
        assert_eq!(
            store.default_directive().await.unwrap().unwrap().name,
            "flashcards"
        );
    }

    #[tokio::test]
    async fn test_list_documents_aggregates() {
        let (_tmp, store) = open_store().await;
        let doc = store
            .get_or_create_document("/papers/f.pdf", "f.pdf", 1, None)
            .await
            .unwrap();
        store.record_page_view(doc.id, 1).await.unwrap();
        store.record_page_view(doc.id, 3).await.unwrap();
        store.record_page_view(doc.id, 3).await.unwrap();

        let docs = store.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].page_count, 2);
        assert_eq!(docs[0].total_views, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_path_with_url_characters() {
        let tmp = TempDir::new().unwrap();
        for dir in ["a?b%20c", "reading?list", "100%20done"] {
            let path = tmp.path().join(dir).join("notes.sqlite");
            let store = MetadataStore::open(&path).await.unwrap();
            store
                .get_or_create_document("/papers/a.pdf", "a.pdf", 1, None)
                .await
                .unwrap();
            store.close().await;
            assert!(path.exists(), "database not created at {}", path.display());
        }
    }

    #[tokio::test]
    async fn test_concurrent_views_share_one_row() {
        let (_tmp, store) = open_store().await;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let doc = store
                    .get_or_create_document("/papers/shared.pdf", "shared.pdf", 10, Some(1))
                    .await
                    .unwrap();
                store.record_page_view(doc.id, 4).await.unwrap();
                doc.id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.total_views, 32);
    }
}
