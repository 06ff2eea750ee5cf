//! Page text extraction and sanitization.
//!
//! Raw text comes from the host bridge (see [`crate::bridge`]). It is passed
//! through [`sanitize`] before it is stored or sent to the note service.
//! Sanitizing deliberately leaves layout problems alone: LaTeX fragments,
//! Unicode math and line structure are preserved so the note service can
//! repair them with full information.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::bridge::HostBridge;

/// Ask the bridge for the text of `page_number` (1-indexed) of `path`.
///
/// Bridge failures and out-of-range pages yield `None`.
pub async fn extract_page_text(
    bridge: &dyn HostBridge,
    path: &Path,
    page_number: u32,
) -> Option<String> {
    if page_number == 0 {
        tracing::debug!(path = %path.display(), "page 0 requested; pages are 1-indexed");
        return None;
    }

    match bridge.extract_page_text(path, page_number).await {
        Ok(Some(text)) => Some(text),
        Ok(None) => {
            tracing::debug!(path = %path.display(), page_number, "no text for page");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), page_number, error = %e, "page text extraction failed");
            None
        }
    }
}

/// Read the text of one page straight from a PDF file.
///
/// Returns `Ok(None)` when the page does not exist.
pub fn read_pdf_page(path: &Path, page_number: u32) -> Result<Option<String>> {
    if page_number == 0 {
        bail!("page numbers start at 1");
    }
    page_text(&load_pdf(path)?, path, page_number)
}

fn load_pdf(path: &Path) -> Result<lopdf::Document> {
    lopdf::Document::load(path).with_context(|| format!("Failed to load PDF: {}", path.display()))
}

fn page_text(doc: &lopdf::Document, path: &Path, page_number: u32) -> Result<Option<String>> {
    if !doc.get_pages().contains_key(&page_number) {
        return Ok(None);
    }

    let text = doc
        .extract_text(&[page_number])
        .with_context(|| format!("Failed to extract page {} of {}", page_number, path.display()))?;
    Ok(Some(text))
}

struct CachedPdf {
    path: PathBuf,
    modified: SystemTime,
    doc: lopdf::Document,
}

/// Keeps the most recently read PDF parsed, so turning pages in one file
/// does not re-parse it. The file is reloaded when its path or
/// modification time changes.
#[derive(Default)]
pub struct PdfCache {
    current: Mutex<Option<CachedPdf>>,
    loads: AtomicUsize,
}

impl PdfCache {
    /// Blocking; call from `spawn_blocking`.
    pub fn page_text(&self, path: &Path, page_number: u32) -> Result<Option<String>> {
        if page_number == 0 {
            bail!("page numbers start at 1");
        }

        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat PDF: {}", path.display()))?;

        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("PDF cache lock poisoned"))?;

        let fresh = matches!(
            current.as_ref(),
            Some(cached) if cached.path == path && cached.modified == modified
        );
        if !fresh {
            let doc = load_pdf(path)?;
            self.loads.fetch_add(1, Ordering::Relaxed);
            *current = Some(CachedPdf {
                path: path.to_path_buf(),
                modified,
                doc,
            });
        }

        match current.as_ref() {
            Some(cached) => page_text(&cached.doc, path, page_number),
            None => Ok(None),
        }
    }

    /// Number of times a file was parsed.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

/// Normalize extracted text for storage.
///
/// In order:
/// 1. `\r\n`, `\r`, U+0085, U+2028 and U+2029 become `\n`;
/// 2. NUL and other control characters are dropped, except `\n` and `\t`;
/// 3. runs of two or more horizontal whitespace characters become one space;
/// 4. three or more consecutive newlines become exactly two;
/// 5. leading and trailing whitespace is trimmed.
///
/// Total and idempotent. Backslashes and non-control Unicode are untouched.
pub fn sanitize(raw: &str) -> String {
    // Steps 1 and 2
    let mut cleaned = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                cleaned.push('\n');
            }
            '\u{85}' | '\u{2028}' | '\u{2029}' => cleaned.push('\n'),
            '\n' | '\t' => cleaned.push(c),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }

    // Steps 3 and 4
    let mut out = String::with_capacity(cleaned.len());
    let mut pending_space: Option<char> = None;
    let mut space_run = 0usize;
    let mut newline_run = 0usize;

    for c in cleaned.chars() {
        if c == '\n' {
            flush_space(&mut out, &mut pending_space, &mut space_run);
            newline_run += 1;
            if newline_run <= 2 {
                out.push('\n');
            }
        } else if c.is_whitespace() {
            newline_run = 0;
            if space_run == 0 {
                pending_space = Some(c);
            }
            space_run += 1;
        } else {
            flush_space(&mut out, &mut pending_space, &mut space_run);
            newline_run = 0;
            out.push(c);
        }
    }
    flush_space(&mut out, &mut pending_space, &mut space_run);

    // Step 5
    out.trim().to_string()
}

/// Emit a buffered horizontal whitespace run: a lone character is kept as
/// is, a longer run becomes a single space.
fn flush_space(out: &mut String, pending: &mut Option<char>, run: &mut usize) {
    if let Some(c) = pending.take() {
        out.push(if *run >= 2 { ' ' } else { c });
    }
    *run = 0;
}
