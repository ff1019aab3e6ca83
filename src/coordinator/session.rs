use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;

use crate::models::{ControlMessage, Flow, RecordingOptions, Step, StepAfter, StopAck, StopStats, VariableDef};

use super::constants::{GRACE_PERIOD_MS, NAVIGATION_ENRICHMENT_DEBOUNCE_MS, NAVIGATION_ENRICHMENT_WINDOW_MS, STOP_ACK_TIMEOUT_MS};
use super::store::FlowStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Recording,
    Paused,
    Stopping,
}

impl Status {
    /// `canAcceptSteps()` — true in `recording` and `stopping` (a tab still
    /// flushing its final batch during the barrier must be allowed through).
    pub fn can_accept_steps(self) -> bool {
        matches!(self, Status::Recording | Status::Stopping)
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("recording already active")]
    AlreadyActive,
    #[error("no active tab")]
    NoActiveTab,
    #[error("no active recording")]
    NoActiveRecording,
    #[error("stop already in progress")]
    StopInProgress,
    #[error("not accepting steps in current state")]
    NotAccepting,
}

/// Something that can deliver a stop request to one tab's content recorder
/// and report whether it acknowledged. Kept as a trait so the barrier's
/// timing and bookkeeping are testable without a live browser.
#[async_trait::async_trait]
pub trait TabTransport: Send + Sync {
    async fn send_stop(&self, tab_id: &str, session_id: &str) -> bool;
}

struct ClickMemo {
    step_id: String,
    at: Instant,
}

struct SessionState {
    session_id: String,
    status: Status,
    origin_tab_id: String,
    flow: Flow,
    active_tabs: HashSet<String>,
    stopped_tabs: HashSet<String>,
    last_click: Option<ClickMemo>,
    last_enrichment_at: Option<Instant>,
}

/// `SessionCoordinator` — owns the authoritative Flow, the status state
/// machine, per-tab participation tracking, the stop barrier, and the
/// timeline broadcast.
pub struct Coordinator {
    state: Mutex<Option<SessionState>>,
    timeline_tx: broadcast::Sender<Vec<Step>>,
    store: Arc<dyn FlowStore>,
}

fn mint_step_id() -> String {
    format!("step_{}", uuid::Uuid::new_v4())
}

fn new_session_id() -> String {
    format!("sess_{}", uuid::Uuid::new_v4())
}

impl Coordinator {
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        let (timeline_tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(None),
            timeline_tx,
            store,
        }
    }

    pub fn subscribe_timeline(&self) -> broadcast::Receiver<Vec<Step>> {
        self.timeline_tx.subscribe()
    }

    pub async fn status(&self) -> Status {
        self.state.lock().await.as_ref().map(|s| s.status).unwrap_or(Status::Idle)
    }

    pub async fn step_count(&self) -> usize {
        self.state.lock().await.as_ref().map(|s| s.flow.steps.len()).unwrap_or(0)
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.as_ref().map(|s| s.session_id.clone())
    }

    /// Start protocol, spec.md §4.3.3 steps 1-4 and 7 (steps 5-6, script
    /// injection and the `start` send, are the caller's job — the
    /// coordinator only owns Flow/state, not the browser transport).
    pub async fn start(
        &self,
        options: RecordingOptions,
        origin_tab_id: String,
        current_url: Option<String>,
    ) -> Result<(String, ControlMessage), CoordinatorError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Err(CoordinatorError::AlreadyActive);
        }
        if origin_tab_id.is_empty() {
            return Err(CoordinatorError::NoActiveTab);
        }

        let session_id = new_session_id();
        let flow_id = options.id.clone().unwrap_or_else(|| session_id.clone());
        let name = options.name.clone().unwrap_or_else(|| "Untitled Flow".to_string());
        let mut flow = Flow::new(flow_id.clone(), name.clone(), options.description.clone());

        if let Some(url) = current_url {
            flow.append_steps(vec![Step::new(
                mint_step_id(),
                crate::models::StepKind::Navigate { url },
            )]);
        }

        let mut active_tabs = HashSet::new();
        active_tabs.insert(origin_tab_id.clone());

        let start_msg = ControlMessage::Start {
            id: flow_id,
            name,
            description: options.description,
            session_id: session_id.clone(),
        };

        *guard = Some(SessionState {
            session_id: session_id.clone(),
            status: Status::Recording,
            origin_tab_id,
            flow,
            active_tabs,
            stopped_tabs: HashSet::new(),
            last_click: None,
            last_enrichment_at: None,
        });

        let state = guard.as_ref().unwrap();
        let _ = self.store.save(&state.flow).await;

        Ok((session_id, start_msg))
    }

    pub async fn pause(&self) -> Result<(), CoordinatorError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(CoordinatorError::NoActiveRecording)?;
        if state.status == Status::Recording {
            state.status = Status::Paused;
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), CoordinatorError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(CoordinatorError::NoActiveRecording)?;
        if state.status == Status::Paused {
            state.status = Status::Recording;
        }
        Ok(())
    }

    /// `appendSteps`, spec.md §4.3.2: mint ids if absent, upsert by id,
    /// broadcast the full updated timeline.
    pub async fn append_steps(&self, mut incoming: Vec<Step>) -> Result<(), CoordinatorError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(CoordinatorError::NoActiveRecording)?;
        if !state.status.can_accept_steps() {
            return Err(CoordinatorError::NotAccepting);
        }

        for step in incoming.iter_mut() {
            if step.id.is_empty() {
                step.id = mint_step_id();
            }
            if matches!(step.kind, crate::models::StepKind::Click { .. } | crate::models::StepKind::Dblclick { .. }) {
                state.last_click = Some(ClickMemo {
                    step_id: step.id.clone(),
                    at: Instant::now(),
                });
            }
        }

        state.flow.append_steps(incoming);
        let _ = self.timeline_tx.send(state.flow.steps.clone());
        Ok(())
    }

    pub async fn append_variables(&self, incoming: Vec<VariableDef>) -> Result<(), CoordinatorError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(CoordinatorError::NoActiveRecording)?;
        if !state.status.can_accept_steps() {
            return Err(CoordinatorError::NotAccepting);
        }
        state.flow.append_variables(incoming);
        Ok(())
    }

    /// spec.md §4.3.5: tag the most recent click/dblclick with
    /// `after.waitForNavigation` if a tab update lands within 5s of it and
    /// no enrichment happened in the preceding 500ms.
    pub async fn note_navigation(&self) {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else { return };
        let Some(click) = &state.last_click else { return };

        if click.at.elapsed() > Duration::from_millis(NAVIGATION_ENRICHMENT_WINDOW_MS) {
            return;
        }
        if let Some(last) = state.last_enrichment_at {
            if last.elapsed() < Duration::from_millis(NAVIGATION_ENRICHMENT_DEBOUNCE_MS) {
                return;
            }
        }

        let step_id = click.step_id.clone();
        if let Some(step) = state.flow.steps.iter_mut().find(|s| s.id == step_id) {
            step.after.get_or_insert_with(StepAfter::default).wait_for_navigation = true;
        }
        state.last_enrichment_at = Some(Instant::now());
    }

    /// Stop barrier, spec.md §4.3.4.
    pub async fn stop<T: TabTransport>(&self, transport: &T) -> Result<(Flow, StopAck), CoordinatorError> {
        let (session_id, tabs) = {
            let mut guard = self.state.lock().await;
            let state = guard.as_mut().ok_or(CoordinatorError::NoActiveRecording)?;
            match state.status {
                Status::Idle => return Err(CoordinatorError::NoActiveRecording),
                Status::Stopping => return Err(CoordinatorError::StopInProgress),
                _ => {}
            }
            state.status = Status::Stopping;
            state.stopped_tabs.clear();
            (state.session_id.clone(), state.active_tabs.clone())
        };

        let mut all_acked = true;
        for tab_id in &tabs {
            let acked = match timeout(
                Duration::from_millis(STOP_ACK_TIMEOUT_MS),
                transport.send_stop(tab_id, &session_id),
            )
            .await
            {
                Ok(ack) => ack,
                Err(_) => false,
            };
            if !acked {
                all_acked = false;
            }
        }

        tokio::time::sleep(Duration::from_millis(GRACE_PERIOD_MS)).await;

        let mut guard = self.state.lock().await;
        let state = guard.take().ok_or(CoordinatorError::NoActiveRecording)?;
        let flow = state.flow;
        let _ = self.store.save(&flow).await;

        let ack = StopAck {
            ack: all_acked,
            stats: StopStats {
                steps: flow.steps.len(),
                variables: flow.variables.len(),
            },
        };

        Ok((flow, ack))
    }

    /// Abandon the active session without running the stop barrier or
    /// persisting the Flow. Used when the caller aborts a recording outright
    /// rather than finishing it (e.g. the browser launch failed, or the user
    /// discards the session) — not part of spec.md's barrier protocol.
    pub async fn cancel(&self) -> Result<(), CoordinatorError> {
        let mut guard = self.state.lock().await;
        guard.take().ok_or(CoordinatorError::NoActiveRecording)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::store::InMemoryFlowStore;
    use crate::models::{Candidate, CandidateKind, FillValue, StepKind, Target};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn click_step(id: &str, selector: &str) -> Step {
        Step::new(
            id,
            StepKind::Click {
                target: Target {
                    selector: selector.to_string(),
                    candidates: vec![Candidate { kind: CandidateKind::Css, value: selector.to_string() }],
                    tag: "button".to_string(),
                    r#ref: None,
                },
            },
        )
    }

    fn fill_step(id: &str, selector: &str, value: &str) -> Step {
        Step::new(
            id,
            StepKind::Fill {
                target: Target {
                    selector: selector.to_string(),
                    candidates: vec![],
                    tag: "input".to_string(),
                    r#ref: None,
                },
                value: FillValue::Text(value.to_string()),
            },
        )
    }

    struct AlwaysAck;
    #[async_trait::async_trait]
    impl TabTransport for AlwaysAck {
        async fn send_stop(&self, _tab_id: &str, _session_id: &str) -> bool {
            true
        }
    }

    struct NeverAck;
    #[async_trait::async_trait]
    impl TabTransport for NeverAck {
        async fn send_stop(&self, _tab_id: &str, _session_id: &str) -> bool {
            tokio::time::sleep(Duration::from_secs(10)).await;
            true
        }
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(Arc::new(InMemoryFlowStore::new()))
    }

    #[tokio::test]
    async fn start_requires_idle() {
        let c = coordinator();
        c.start(RecordingOptions::default(), "tab1".into(), None).await.unwrap();
        let err = c.start(RecordingOptions::default(), "tab1".into(), None).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyActive));
    }

    #[tokio::test]
    async fn append_steps_upserts_and_broadcasts() {
        let c = coordinator();
        c.start(RecordingOptions::default(), "tab1".into(), None).await.unwrap();
        let mut rx = c.subscribe_timeline();

        c.append_steps(vec![click_step("s1", "#a"), fill_step("s2", "#u", "he")]).await.unwrap();
        let timeline = rx.recv().await.unwrap();
        assert_eq!(timeline.len(), 2);

        c.append_steps(vec![fill_step("s2", "#u", "hello")]).await.unwrap();
        let timeline = rx.recv().await.unwrap();
        assert_eq!(timeline.len(), 2, "upsert must not append a duplicate");
        match &timeline[1].kind {
            StepKind::Fill { value: FillValue::Text(v), .. } => assert_eq!(v, "hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn append_steps_mints_id_when_absent() {
        let c = coordinator();
        c.start(RecordingOptions::default(), "tab1".into(), None).await.unwrap();
        c.append_steps(vec![click_step("", "#a")]).await.unwrap();
        assert_eq!(c.step_count().await, 1);
    }

    #[tokio::test]
    async fn stop_without_active_recording_fails() {
        let c = coordinator();
        let err = c.stop(&AlwaysAck).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NoActiveRecording));
    }

    #[tokio::test]
    async fn stop_barrier_acks_true_when_all_tabs_respond() {
        let c = coordinator();
        c.start(RecordingOptions::default(), "tab1".into(), None).await.unwrap();
        c.append_steps(vec![click_step("s1", "#a")]).await.unwrap();

        let (flow, ack) = c.stop(&AlwaysAck).await.unwrap();
        assert!(ack.ack);
        assert_eq!(flow.steps.len(), 1);
        assert_eq!(c.status().await, Status::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_barrier_times_out_unresponsive_tab() {
        let c = coordinator();
        c.start(RecordingOptions::default(), "tab1".into(), None).await.unwrap();

        let stop_fut = c.stop(&NeverAck);
        tokio::pin!(stop_fut);

        tokio::time::advance(Duration::from_millis(STOP_ACK_TIMEOUT_MS + GRACE_PERIOD_MS + 50)).await;
        let (_, ack) = stop_fut.await.unwrap();
        assert!(!ack.ack);
    }

    #[tokio::test]
    async fn second_stop_call_rejects_with_in_progress() {
        let c = Arc::new(coordinator());
        c.start(RecordingOptions::default(), "tab1".into(), None).await.unwrap();

        let c1 = c.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let handle = tokio::spawn(async move {
            struct SlowAck(Arc<AtomicUsize>);
            #[async_trait::async_trait]
            impl TabTransport for SlowAck {
                async fn send_stop(&self, _tab_id: &str, _session_id: &str) -> bool {
                    self.0.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    true
                }
            }
            c1.stop(&SlowAck(counter2)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = c.stop(&AlwaysAck).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::StopInProgress));

        handle.await.unwrap().unwrap();
    }
}
