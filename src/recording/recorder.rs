use anyhow::{anyhow, Result};
use chromiumoxide::cdp::js_protocol::runtime::EventBindingCalled;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

use crate::browser::BrowserManager;
use crate::coordinator::{Coordinator, Status, TabTransport};
use crate::models::{ControlMessage, RecordingOptions, Step, Viewport};

use super::events::PageEvent;
use super::script::content_recorder_script;

/// Rust-side ContentRecorder glue: owns the browser, wires the script
/// injection and CDP binding, and forwards decoded Steps/Variables into the
/// Coordinator. Debounce, selector generation and cross-frame aggregation
/// all happen in-page; this module never re-implements them.
pub struct RecordingSession {
    pub browser: Arc<BrowserManager>,
    coordinator: Arc<Coordinator>,
    cancel_sender: broadcast::Sender<()>,
    origin_tab: Mutex<usize>,
}

impl RecordingSession {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let (cancel_tx, _) = broadcast::channel(1);
        Self {
            browser: Arc::new(BrowserManager::new()),
            coordinator,
            cancel_sender: cancel_tx,
            origin_tab: Mutex::new(0),
        }
    }

    /// Launches the browser, injects the content recorder into every future
    /// document, starts forwarding its events, then starts the Coordinator's
    /// session and sends it the `start` control message (spec.md §4.3.3).
    pub async fn start(
        &self,
        start_url: Option<&str>,
        headless: bool,
        viewport: Option<Viewport>,
        options: RecordingOptions,
    ) -> Result<String> {
        self.browser.launch_with_options(headless, viewport).await?;

        let event_stream = self.browser.setup_event_binding(super::script::EVENT_BINDING_NAME).await?;
        self.browser.add_script_on_new_document(&content_recorder_script()).await?;

        self.spawn_event_forwarder(event_stream);

        let navigation_stream = self.browser.setup_navigation_listener().await?;
        self.spawn_navigation_forwarder(navigation_stream);

        if let Some(url) = start_url {
            self.browser.navigate(url).await?;
        }

        let tab_index = self.browser.active_tab_index().await;
        *self.origin_tab.lock().await = tab_index;

        let current_url = self.browser.current_url().await.ok();
        let (session_id, start_msg) = self
            .coordinator
            .start(options, tab_index.to_string(), current_url)
            .await
            .map_err(|e| anyhow!("{}", e))?;

        self.send_control(tab_index, &start_msg).await?;

        Ok(session_id)
    }

    pub async fn pause(&self) -> Result<()> {
        self.coordinator.pause().await.map_err(|e| anyhow!("{}", e))?;
        let tab = *self.origin_tab.lock().await;
        self.send_control(tab, &ControlMessage::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.coordinator.resume().await.map_err(|e| anyhow!("{}", e))?;
        let tab = *self.origin_tab.lock().await;
        self.send_control(tab, &ControlMessage::Resume).await
    }

    /// Current Coordinator status, for status-polling handlers.
    pub async fn status(&self) -> Status {
        self.coordinator.status().await
    }

    pub async fn step_count(&self) -> usize {
        self.coordinator.step_count().await
    }

    pub async fn session_id(&self) -> Option<String> {
        self.coordinator.session_id().await
    }

    /// Subscribe to the Coordinator's full-timeline broadcast (spec.md §6
    /// `timeline_update`), for forwarding over the sidecar's own WebSocket.
    pub fn subscribe_timeline(&self) -> broadcast::Receiver<Vec<Step>> {
        self.coordinator.subscribe_timeline()
    }

    /// Abandon the recording without running the stop barrier: closes the
    /// browser and drops the Coordinator's session unsaved.
    pub async fn cancel(&self) -> Result<()> {
        let _ = self.cancel_sender.send(());
        self.coordinator.cancel().await.map_err(|e| anyhow!("{}", e))?;
        self.browser.close().await
    }

    /// Drives the stop barrier (spec.md §4.3.4) by implementing
    /// `TabTransport` against the single origin tab this session owns.
    pub async fn stop(&self) -> Result<(crate::models::Flow, crate::models::StopAck)> {
        let result = self.coordinator.stop(self).await.map_err(|e| anyhow!("{}", e))?;
        let _ = self.cancel_sender.send(());
        self.browser.close().await.ok();
        Ok(result)
    }

    async fn send_control(&self, tab_index: usize, message: &ControlMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.browser.call_control(tab_index, &json).await?;
        Ok(())
    }

    /// Pipes frame-navigation events into the Coordinator's incidental
    /// `after.waitForNavigation` enrichment (spec.md §4.3.5).
    fn spawn_navigation_forwarder(
        &self,
        mut event_stream: chromiumoxide::listeners::EventStream<chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated>,
    ) {
        let coordinator = Arc::clone(&self.coordinator);
        let mut cancel_rx = self.cancel_sender.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => break,
                    event = event_stream.next() => {
                        if event.is_none() {
                            break;
                        }
                        coordinator.note_navigation().await;
                    }
                }
            }
        });
    }

    fn spawn_event_forwarder(&self, mut event_stream: chromiumoxide::listeners::EventStream<EventBindingCalled>) {
        let coordinator = Arc::clone(&self.coordinator);
        let mut cancel_rx = self.cancel_sender.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => break,
                    event = event_stream.next() => {
                        let Some(event) = event else { break };
                        let Ok(page_event) = PageEvent::parse(&event.payload) else {
                            tracing::warn!("Failed to parse page event payload");
                            continue;
                        };
                        match page_event {
                            PageEvent::Steps { steps } => forward_steps(&coordinator, steps).await,
                            PageEvent::Variables { variables } => {
                                if let Err(e) = coordinator.append_variables(variables).await {
                                    tracing::debug!("append_variables rejected: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        });
    }
}

async fn forward_steps(coordinator: &Coordinator, steps: Vec<Step>) {
    if let Err(e) = coordinator.append_steps(steps).await {
        tracing::debug!("append_steps rejected: {}", e);
    }
}

#[async_trait::async_trait]
impl TabTransport for RecordingSession {
    async fn send_stop(&self, tab_id: &str, session_id: &str) -> bool {
        let Ok(tab_index) = tab_id.parse::<usize>() else { return false };
        let message = ControlMessage::Stop {
            session_id: session_id.to_string(),
            require_ack: true,
        };
        let Ok(json) = serde_json::to_string(&message) else { return false };
        match tokio::time::timeout(Duration::from_millis(3_500), self.browser.call_control(tab_index, &json)).await {
            Ok(Ok(reply)) => serde_json::from_str::<serde_json::Value>(&reply)
                .ok()
                .and_then(|v| v.get("ack").and_then(|a| a.as_bool()))
                .unwrap_or(false),
            _ => false,
        }
    }
}
