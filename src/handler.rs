//! Default page-change handler.
//!
//! [`RecordAndSummarize`] counts the page view and, when a note service is
//! configured, requests notes for the page text in a background task so the
//! poller is never blocked by the remote call. A finished request is only
//! stored if the reader is still on the same page (see
//! [`PageTracker::has_moved_from`]).

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::notes::{extract_concepts, NoteRequest, NoteResponse, NoteService};
use crate::poller::{CurrentPage, PageChange, PageChangeHandler, PageTracker};
use crate::store::MetadataStore;

/// Outcome of delivering a generated note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteDelivery {
    Stored { note_id: i64, concepts: usize },
    /// The reader moved to another page before the note arrived.
    Stale,
}

pub struct RecordAndSummarize {
    store: MetadataStore,
    notes: Option<Arc<dyn NoteService>>,
    tracker: PageTracker,
    note_type: String,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl RecordAndSummarize {
    pub fn new(
        store: MetadataStore,
        notes: Option<Arc<dyn NoteService>>,
        tracker: PageTracker,
        note_type: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notes,
            tracker,
            note_type: note_type.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every note request started so far.
    pub async fn wait_pending(&self) {
        let handles: Vec<_> = self.pending.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "note task failed");
            }
        }
    }

    /// Wait up to `grace` for pending note requests, then abort whatever is
    /// still running. Returns the number of aborted requests.
    pub async fn finish_pending(&self, grace: Duration) -> usize {
        let handles: Vec<_> = self.pending.lock().await.drain(..).collect();
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;

        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "note task failed"),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}

#[async_trait]
impl PageChangeHandler for RecordAndSummarize {
    async fn on_page_change(&self, change: PageChange) {
        if let Err(e) = self
            .store
            .record_page_view(change.document_id, change.page_number)
            .await
        {
            tracing::warn!(error = %e, "page view dropped");
        }

        let Some(service) = self.notes.clone() else {
            return;
        };
        let Some(text) = change.text.filter(|t| !t.is_empty()) else {
            tracing::debug!(page_number = change.page_number, "no page text, skipping notes");
            return;
        };

        let document_name = change
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| change.file_path.display().to_string());

        let request = NoteRequest {
            text,
            document_name,
            page_number: change.page_number,
        };
        let page = CurrentPage {
            document_id: change.document_id,
            page_number: change.page_number,
        };

        let store = self.store.clone();
        let tracker = self.tracker.clone();
        let note_type = self.note_type.clone();

        let handle = tokio::spawn(async move {
            let note = match service
                .summarize(&request)
                .await
                .and_then(NoteResponse::into_note)
            {
                Ok(note) => note,
                Err(e) => {
                    tracing::warn!(
                        document = %request.document_name,
                        page_number = request.page_number,
                        error = %e,
                        "no note for page"
                    );
                    return;
                }
            };

            match deliver_note(&store, &tracker, page, &note, &note_type).await {
                Ok(NoteDelivery::Stored { note_id, concepts }) => {
                    tracing::info!(
                        note_id,
                        concepts,
                        page_number = page.page_number,
                        "note stored"
                    );
                }
                Ok(NoteDelivery::Stale) => {
                    tracing::info!(page_number = page.page_number, "discarding note for a page no longer shown");
                }
                Err(e) => tracing::warn!(error = %e, "note dropped"),
            }
        });

        let mut pending = self.pending.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

/// Store a generated note for `page` unless the reader has moved on.
///
/// The note is tagged with the current default directive, and concepts
/// listed in its `## Key Concepts` section are linked to the page.
pub async fn deliver_note(
    store: &MetadataStore,
    tracker: &PageTracker,
    page: CurrentPage,
    note: &str,
    note_type: &str,
) -> Result<NoteDelivery> {
    if tracker.has_moved_from(page) {
        return Ok(NoteDelivery::Stale);
    }

    let page_id = store
        .get_page_id(page.document_id, page.page_number)
        .await?
        .with_context(|| {
            format!(
                "page {} of document {} was never recorded",
                page.page_number, page.document_id
            )
        })?;

    let directive = match store.default_directive().await {
        Ok(directive) => directive.map(|d| d.name),
        Err(e) => {
            tracing::debug!(error = %e, "no default directive");
            None
        }
    };

    let note_id = store
        .store_note(page_id, note, note_type, directive.as_deref())
        .await?;

    let mut linked = 0;
    for mention in extract_concepts(note) {
        let result = async {
            let concept_id = store
                .upsert_concept(&mention.name, mention.description.as_deref())
                .await?;
            store
                .link_page_concept(page_id, concept_id, Some(&mention.context))
                .await
        }
        .await;

        match result {
            Ok(()) => linked += 1,
            Err(e) => tracing::warn!(concept = %mention.name, error = %e, "concept not linked"),
        }
    }

    Ok(NoteDelivery::Stored {
        note_id,
        concepts: linked,
    })
}
