//! Viewer lifecycle watching.
//!
//! [`LifecycleWatcher`] turns application lifecycle events into poller
//! start/stop calls. [`BridgeEventSource`] produces those events by sampling
//! the bridge and emitting the transitions it sees.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::bridge::HostBridge;
use crate::poller::Poller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    Launched,
    Activated,
    Terminated,
    Deactivated,
}

pub struct LifecycleWatcher {
    poller: Arc<Poller>,
    bridge: Arc<dyn HostBridge>,
}

impl LifecycleWatcher {
    pub fn new(poller: Arc<Poller>, bridge: Arc<dyn HostBridge>) -> Self {
        Self { poller, bridge }
    }

    /// Start polling right away if the viewer is running and frontmost.
    /// Returns whether polling was started.
    pub async fn init(&self) -> Result<bool> {
        if !self.bridge.is_target_app_running().await? {
            tracing::info!("viewer not running, waiting for launch");
            return Ok(false);
        }
        if !self.bridge.is_frontmost().await? {
            tracing::info!("viewer running in background, waiting for activation");
            return Ok(false);
        }
        Ok(self.poller.start().await)
    }

    pub async fn handle(&self, event: AppEvent) {
        tracing::debug!(?event, "viewer lifecycle event");
        match event {
            AppEvent::Launched | AppEvent::Activated => {
                self.poller.start().await;
            }
            AppEvent::Terminated | AppEvent::Deactivated => {
                self.poller.stop().await;
            }
        }
    }

    /// Handle events until the sending side closes.
    pub async fn run(&self, mut events: mpsc::Receiver<AppEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
    }
}

/// Sampled viewer state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppState {
    pub running: bool,
    pub frontmost: bool,
}

/// Events implied by moving from `prev` to `next`.
pub fn transitions(prev: AppState, next: AppState) -> Vec<AppEvent> {
    match (prev.running, next.running) {
        (false, true) => vec![AppEvent::Launched],
        (true, false) => vec![AppEvent::Terminated],
        (false, false) => vec![],
        (true, true) => match (prev.frontmost, next.frontmost) {
            (false, true) => vec![AppEvent::Activated],
            (true, false) => vec![AppEvent::Deactivated],
            _ => vec![],
        },
    }
}

pub struct BridgeEventSource {
    bridge: Arc<dyn HostBridge>,
    interval: Duration,
}

impl BridgeEventSource {
    pub fn new(bridge: Arc<dyn HostBridge>, interval: Duration) -> Self {
        Self { bridge, interval }
    }

    async fn sample(&self) -> Result<AppState> {
        let running = self.bridge.is_target_app_running().await?;
        let frontmost = running && self.bridge.is_frontmost().await?;
        Ok(AppState { running, frontmost })
    }

    /// Emit events until the receiver is dropped.
    ///
    /// The first sample only establishes the baseline; the watcher's
    /// [`LifecycleWatcher::init`] covers the state at startup.
    pub async fn run(self, events: mpsc::Sender<AppEvent>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut prev: Option<AppState> = None;

        loop {
            ticker.tick().await;
            let next = match self.sample().await {
                Ok(state) => state,
                Err(e) => {
                    tracing::debug!(error = %e, "could not sample viewer state");
                    continue;
                }
            };

            if let Some(prev) = prev {
                for event in transitions(prev, next) {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            prev = Some(next);
        }
    }
}
