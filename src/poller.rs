//! Page-change detection.
//!
//! The viewer has no "page changed" notification, so [`Poller`] samples the
//! front window on a fixed interval and [`ChangeDetector`] compares the page
//! number in its title with the last one seen. Only a *different* number is
//! a page change; the same page seen twice in a row is ignored.
//!
//! ```text
//!            start()                     tick: app not running
//!  Stopped ─────────────▶ Running ─────────────────────────────▶ Stopped
//!     ▲                     │ │
//!     └──────── stop() ─────┘ └─▶ tick ─▶ page changed? ─▶ handler
//! ```
//!
//! Ticks never overlap: the loop awaits each tick before waiting for the
//! next interval, and missed intervals are skipped rather than queued.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bridge::HostBridge;
use crate::extract::{extract_page_text, sanitize};
use crate::store::MetadataStore;

static PAGE_IN_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Page (\d+)").unwrap());

/// Page number shown in a window title (`"paper.pdf – Page 3 of 12"` → 3).
pub fn parse_page_number(title: &str) -> Option<u32> {
    PAGE_IN_TITLE
        .captures(title)
        .and_then(|caps| caps[1].parse().ok())
}

/// Document name shown in a window title: the text before `Page <n>`, with
/// trailing separators removed. Titles without a page marker are used whole.
pub fn parse_document_name(title: &str) -> Option<String> {
    let head = match PAGE_IN_TITLE.find(title) {
        Some(m) => &title[..m.start()],
        None => title,
    };
    let name = head
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | '—' | '(' | ',' | '|'))
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// A detected page transition, handed to the [`PageChangeHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChange {
    pub page_number: u32,
    pub window_title: String,
    pub file_path: PathBuf,
    /// Sanitized page text, when extraction succeeded.
    pub text: Option<String>,
    pub document_id: i64,
}

/// The page the detector currently considers on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentPage {
    pub document_id: i64,
    pub page_number: u32,
}

/// Shared view of the detector's current page.
///
/// Background note requests consult it before storing a result so a note is
/// not filed against a page the reader has already left.
#[derive(Clone)]
pub struct PageTracker {
    tx: Arc<watch::Sender<Option<CurrentPage>>>,
}

impl PageTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, page: Option<CurrentPage>) {
        self.tx.send_replace(page);
    }

    pub fn current(&self) -> Option<CurrentPage> {
        *self.tx.borrow()
    }

    /// True when the detector has moved on to a page other than `page`.
    ///
    /// No current page (window hidden, poller stopped) does not count as
    /// moving on.
    pub fn has_moved_from(&self, page: CurrentPage) -> bool {
        matches!(self.current(), Some(current) if current != page)
    }
}

impl Default for PageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait PageChangeHandler: Send + Sync {
    async fn on_page_change(&self, change: PageChange);
}

/// What a single tick observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Target app is not running; the poller stops itself.
    AppNotRunning,
    /// No visible window; debounce state was reset.
    NoWindow,
    /// Front window title has no `Page <n>` marker.
    NoPage,
    /// Same page as the previous tick.
    Unchanged(u32),
    /// New page; the handler was invoked.
    Changed(PageChange),
    /// Bridge or store failure; state left as it was.
    Skipped,
}

/// Debounce state and the logic of one tick.
pub struct ChangeDetector {
    bridge: Arc<dyn HostBridge>,
    store: MetadataStore,
    handler: Arc<dyn PageChangeHandler>,
    tracker: PageTracker,
    extract_text: bool,
    last_page: Option<u32>,
}

impl ChangeDetector {
    pub fn new(
        bridge: Arc<dyn HostBridge>,
        store: MetadataStore,
        handler: Arc<dyn PageChangeHandler>,
        tracker: PageTracker,
    ) -> Self {
        Self {
            bridge,
            store,
            handler,
            tracker,
            extract_text: true,
            last_page: None,
        }
    }

    pub fn with_text_extraction(mut self, enabled: bool) -> Self {
        self.extract_text = enabled;
        self
    }

    pub fn last_page(&self) -> Option<u32> {
        self.last_page
    }

    /// Forget the last seen page.
    pub fn reset(&mut self) {
        self.last_page = None;
        self.tracker.set(None);
    }

    pub async fn tick(&mut self) -> TickOutcome {
        match self.bridge.is_target_app_running().await {
            Ok(true) => {}
            Ok(false) => return TickOutcome::AppNotRunning,
            Err(e) => {
                tracing::warn!(error = %e, "could not query viewer state");
                return TickOutcome::Skipped;
            }
        }

        let windows = match self.bridge.visible_windows().await {
            Ok(windows) => windows,
            Err(e) => {
                tracing::warn!(error = %e, "could not list viewer windows");
                return TickOutcome::Skipped;
            }
        };

        // No visible window means no current page: the next page seen is
        // reported even if it has the same number.
        let Some(window) = windows.into_iter().next() else {
            if self.last_page.take().is_some() {
                tracing::debug!("viewer has no visible window");
            }
            self.tracker.set(None);
            return TickOutcome::NoWindow;
        };

        let Some(page_number) = parse_page_number(&window.title) else {
            tracing::trace!(title = %window.title, "no page number in window title");
            return TickOutcome::NoPage;
        };

        if self.last_page == Some(page_number) {
            return TickOutcome::Unchanged(page_number);
        }

        let previous = self.last_page.replace(page_number);

        let Some(file_path) = self.resolve_path(&window.title).await else {
            tracing::warn!(title = %window.title, "could not determine document path");
            self.last_page = previous;
            return TickOutcome::Skipped;
        };

        let (size_bytes, modified_at) = file_metadata(&file_path).await;
        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.display().to_string());
        let path_str = file_path.to_string_lossy();

        let document = match self
            .store
            .get_or_create_document(&path_str, &name, size_bytes, modified_at)
            .await
        {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(path = %path_str, error = %e, "could not record document");
                // Retry on the next tick
                self.last_page = previous;
                return TickOutcome::Skipped;
            }
        };

        self.tracker.set(Some(CurrentPage {
            document_id: document.id,
            page_number,
        }));

        tracing::info!(
            document = %name,
            page_number,
            previous_page = ?previous,
            "page changed"
        );

        let text = if self.extract_text {
            extract_page_text(self.bridge.as_ref(), &file_path, page_number)
                .await
                .map(|raw| sanitize(&raw))
        } else {
            None
        };

        let change = PageChange {
            page_number,
            window_title: window.title,
            file_path,
            text,
            document_id: document.id,
        };

        self.handler.on_page_change(change.clone()).await;
        TickOutcome::Changed(change)
    }

    /// Front document path from the bridge, falling back to the name in the
    /// window title.
    async fn resolve_path(&self, title: &str) -> Option<PathBuf> {
        match self.bridge.front_document_path().await {
            Ok(Some(path)) => return Some(path),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "front document path unavailable, using window title");
            }
        }
        parse_document_name(title).map(PathBuf::from)
    }
}

/// Size and modification time (Unix seconds) of `path`; `(0, None)` when the
/// file cannot be inspected.
async fn file_metadata(path: &Path) -> (i64, Option<i64>) {
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);
            (meta.len() as i64, modified)
        }
        Err(_) => (0, None),
    }
}

struct RunningTask {
    generation: u64,
    shutdown: oneshot::Sender<()>,
    _handle: JoinHandle<()>,
}

#[derive(Default)]
struct RunState {
    running: Option<RunningTask>,
    generation: u64,
}

/// Drives a [`ChangeDetector`] on a fixed interval.
pub struct Poller {
    detector: Arc<Mutex<ChangeDetector>>,
    state: Arc<Mutex<RunState>>,
    interval: Duration,
}

impl Poller {
    pub fn new(detector: ChangeDetector, interval: Duration) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            state: Arc::new(Mutex::new(RunState::default())),
            interval,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running.is_some()
    }

    /// Begin polling. Returns `false` (and does nothing) if already running.
    pub async fn start(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return false;
        }

        self.detector.lock().await.reset();

        state.generation += 1;
        let generation = state.generation;
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(poll_loop(
            self.detector.clone(),
            self.state.clone(),
            self.interval,
            generation,
            shutdown_rx,
        ));

        state.running = Some(RunningTask {
            generation,
            shutdown,
            _handle: handle,
        });
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "poller started");
        true
    }

    /// Stop polling. A tick already in progress finishes; no further tick
    /// starts. Returns `false` if the poller was not running.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(task) = state.running.take() else {
            return false;
        };
        let _ = task.shutdown.send(());

        self.detector.lock().await.reset();
        tracing::info!("poller stopped");
        true
    }
}

async fn poll_loop(
    detector: Arc<Mutex<ChangeDetector>>,
    state: Arc<Mutex<RunState>>,
    interval: Duration,
    generation: u64,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let outcome = detector.lock().await.tick().await;

        if outcome == TickOutcome::AppNotRunning {
            let mut state = state.lock().await;
            // A stop/start may have replaced this loop while the tick ran
            if state.running.as_ref().map(|r| r.generation) == Some(generation) {
                state.running = None;
                detector.lock().await.reset();
                tracing::info!("viewer not running, poller stopped");
            }
            break;
        }
    }
}
