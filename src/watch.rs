//! The `watch` command: wire the store, bridge, poller and lifecycle
//! watcher together and run until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::bridge::{HostBridge, OsaScriptBridge};
use crate::config::Config;
use crate::handler::RecordAndSummarize;
use crate::notes::{HttpNoteService, NoteService};
use crate::poller::{ChangeDetector, PageTracker, Poller};
use crate::store::MetadataStore;
use crate::watcher::{BridgeEventSource, LifecycleWatcher};

pub async fn run_watch(config: &Config) -> Result<()> {
    // A store that cannot open must keep the poller from ever starting
    let store = MetadataStore::open(&config.db.path)
        .await
        .context("Failed to initialize metadata store")?;

    let bridge: Arc<dyn HostBridge> = Arc::new(OsaScriptBridge::new(&config.viewer.app_name));
    run_watch_with_bridge(config, store, bridge).await
}

/// Run the watch loop against any bridge until Ctrl-C.
pub async fn run_watch_with_bridge(
    config: &Config,
    store: MetadataStore,
    bridge: Arc<dyn HostBridge>,
) -> Result<()> {
    let notes: Option<Arc<dyn NoteService>> = if config.notes.enabled {
        Some(Arc::new(HttpNoteService::new(&config.notes)?))
    } else {
        None
    };

    let tracker = PageTracker::new();
    let handler = Arc::new(RecordAndSummarize::new(
        store.clone(),
        notes,
        tracker.clone(),
        config.notes.note_type.clone(),
    ));
    let detector = ChangeDetector::new(bridge.clone(), store.clone(), handler.clone(), tracker)
        .with_text_extraction(config.viewer.extract_text);
    let poller = Arc::new(Poller::new(detector, config.viewer.poll_interval()));
    let watcher = LifecycleWatcher::new(poller.clone(), bridge.clone());

    tracing::info!(
        app = %config.viewer.app_name,
        db = %config.db.path.display(),
        notes = config.notes.enabled,
        "watching viewer"
    );

    if let Err(e) = watcher.init().await {
        tracing::warn!(error = %e, "could not determine viewer state at startup");
    }

    let (tx, rx) = mpsc::channel(16);
    let source = BridgeEventSource::new(bridge, config.viewer.lifecycle_interval());
    let source_task = tokio::spawn(source.run(tx));

    tokio::select! {
        _ = watcher.run(rx) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("interrupted, shutting down");
        }
    }

    source_task.abort();
    poller.stop().await;

    let aborted = handler.finish_pending(config.notes.request_budget()).await;
    if aborted > 0 {
        tracing::warn!(aborted, "gave up waiting for pending note requests");
    }

    store.close().await;
    Ok(())
}
