//! Idempotent schema creation.
//!
//! Safe to run on every start: all statements are `IF NOT EXISTS` and the
//! default directive is only seeded into an empty table.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// Name of the directive seeded into a fresh database.
pub const DEFAULT_DIRECTIVE_NAME: &str = "summarize";

/// Template text of the seeded directive.
pub const DEFAULT_DIRECTIVE_TEMPLATE: &str =
    "Create clear, structured notes from this extracted PDF text. \
     Start with a \"## Key Concepts\" section, then organize the content by topic.";

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            modified_at INTEGER,
            first_seen_at INTEGER NOT NULL,
            last_read_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id INTEGER PRIMARY KEY,
            document_id INTEGER NOT NULL,
            page_number INTEGER NOT NULL,
            view_count INTEGER NOT NULL DEFAULT 0,
            last_viewed_at INTEGER NOT NULL,
            UNIQUE(document_id, page_number),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY,
            page_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            note_type TEXT NOT NULL,
            directive_name TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (page_id) REFERENCES pages(id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS concepts (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS page_concepts (
            page_id INTEGER NOT NULL,
            concept_id INTEGER NOT NULL,
            context TEXT,
            PRIMARY KEY (page_id, concept_id),
            FOREIGN KEY (page_id) REFERENCES pages(id),
            FOREIGN KEY (concept_id) REFERENCES concepts(id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS directives (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            template TEXT NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_pages_document_id ON pages(document_id)",
        "CREATE INDEX IF NOT EXISTS idx_notes_page_id ON notes(page_id, created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_page_concepts_concept_id ON page_concepts(concept_id)",
        "CREATE INDEX IF NOT EXISTS idx_documents_last_read_at ON documents(last_read_at DESC)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create schema")?;
    }

    // Seed the default directive only into an empty table
    let directive_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM directives")
        .fetch_one(pool)
        .await?;

    if directive_count == 0 {
        sqlx::query("INSERT INTO directives (name, template, is_default) VALUES (?, ?, 1)")
            .bind(DEFAULT_DIRECTIVE_NAME)
            .bind(DEFAULT_DIRECTIVE_TEMPLATE)
            .execute(pool)
            .await
            .context("Failed to seed default directive")?;
        tracing::info!(directive = DEFAULT_DIRECTIVE_NAME, "seeded default directive");
    }

    Ok(())
}
