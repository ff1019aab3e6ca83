//! Integration tests for the recording pipeline.
//!
//! These tests launch real headless Chrome instances, serve the fixture
//! pages over a throwaway HTTP server (so the child iframe is same-origin
//! and behaves the way it would on a real site), drive DOM events directly
//! through `BrowserManager::evaluate`, and assert on the `Flow` a full
//! start/stop cycle produces.
//!
//! Run with: cargo test --test recording_integration -- --test-threads=1

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use tasker_sidecar::coordinator::{Coordinator, InMemoryFlowStore};
use tasker_sidecar::models::{FillValue, Flow, RecordingOptions, Step, StepKind};
use tasker_sidecar::recording::RecordingSession;

async fn wait_for_events(ms: u64) {
    sleep(Duration::from_millis(ms)).await;
}

async fn new_session() -> RecordingSession {
    let coordinator = Arc::new(Coordinator::new(Arc::new(InMemoryFlowStore::new())));
    RecordingSession::new(coordinator)
}

fn options() -> RecordingOptions {
    RecordingOptions {
        id: None,
        name: Some("integration test flow".to_string()),
        description: None,
    }
}

/// `RecordingSession::start` is given a start URL, so `Coordinator::start`
/// always synthesizes a leading `navigate` Step for it (spec.md §4.3.3 step
/// 7). Assert it's there, then hand back the Steps the test actually drove.
fn after_initial_navigate(flow: &Flow) -> &[Step] {
    match flow.steps.first().map(|s| &s.kind) {
        Some(StepKind::Navigate { .. }) => &flow.steps[1..],
        other => panic!("expected a leading navigate step, got {:?}", other),
    }
}

#[tokio::test]
async fn test_click_capture() {
    let base_url = common::serve_fixtures().await;
    let recording = new_session().await;

    recording.start(Some(base_url.as_str()), true, None, options()).await.unwrap();
    wait_for_events(500).await;

    recording
        .browser
        .evaluate("document.querySelector('#btn-simple').dispatchEvent(new MouseEvent('click', {bubbles: true, detail: 1}))")
        .await
        .unwrap();
    wait_for_events(500).await; // dblclick threshold (300ms) + batch flush

    let (flow, ack) = recording.stop().await.unwrap();
    assert!(ack.ack, "stop barrier should ack");
    let steps = after_initial_navigate(&flow);
    assert_eq!(steps.len(), 1, "expected exactly one step, got {:?}", steps);

    match &steps[0].kind {
        StepKind::Click { target } => assert_eq!(target.selector, "#btn-simple"),
        other => panic!("expected click step, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dblclick_replaces_pending_click() {
    let base_url = common::serve_fixtures().await;
    let recording = new_session().await;

    recording.start(Some(base_url.as_str()), true, None, options()).await.unwrap();
    wait_for_events(500).await;

    // Two clicks back-to-back in one evaluate call so the browser's own
    // click counting semantics are irrelevant - we set `detail` directly,
    // the same way a real double click raises `detail: 2` on the second.
    recording
        .browser
        .evaluate(
            "const b = document.querySelector('#btn-simple');
             b.dispatchEvent(new MouseEvent('click', {bubbles: true, detail: 1}));
             b.dispatchEvent(new MouseEvent('click', {bubbles: true, detail: 2}));",
        )
        .await
        .unwrap();
    wait_for_events(500).await;

    let (flow, _) = recording.stop().await.unwrap();
    let steps = after_initial_navigate(&flow);
    assert_eq!(steps.len(), 1, "dblclick must cancel the pending single click, got {:?}", steps);
    match &steps[0].kind {
        StepKind::Dblclick { target } => assert_eq!(target.selector, "#btn-simple"),
        other => panic!("expected dblclick step, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fill_debounce_collapses_to_final_value() {
    let base_url = common::serve_fixtures().await;
    let recording = new_session().await;

    recording.start(Some(base_url.as_str()), true, None, options()).await.unwrap();
    wait_for_events(500).await;

    for partial in ["h", "he", "hel", "hell", "hello"] {
        let script = format!(
            "const el = document.querySelector('#input-text');
             el.value = '{partial}';
             el.dispatchEvent(new Event('input', {{bubbles: true}}));"
        );
        recording.browser.evaluate(&script).await.unwrap();
        wait_for_events(50).await;
    }

    wait_for_events(900).await; // clears the 800ms input debounce

    let (flow, _) = recording.stop().await.unwrap();
    let steps = after_initial_navigate(&flow);
    assert_eq!(steps.len(), 1, "debounced fills must collapse into one step, got {:?}", steps);
    match &steps[0].kind {
        StepKind::Fill { target, value } => {
            assert_eq!(target.selector, "#input-text");
            match value {
                FillValue::Text(v) => assert_eq!(v, "hello"),
                other => panic!("expected text fill value, got {:?}", other),
            }
        }
        other => panic!("expected fill step, got {:?}", other),
    }
}

#[tokio::test]
async fn test_password_input_emits_redacted_variable() {
    let base_url = common::serve_fixtures().await;
    let recording = new_session().await;

    recording.start(Some(base_url.as_str()), true, None, options()).await.unwrap();
    wait_for_events(500).await;

    recording
        .browser
        .evaluate(
            "const el = document.querySelector('#input-password');
             el.value = 'hunter2';
             el.dispatchEvent(new Event('input', {bubbles: true}));",
        )
        .await
        .unwrap();
    wait_for_events(900).await;

    let (flow, _) = recording.stop().await.unwrap();

    assert_eq!(flow.variables.len(), 1);
    assert_eq!(flow.variables[0].key, "pwd");
    assert!(flow.variables[0].sensitive, "password field must be marked sensitive");

    let steps = after_initial_navigate(&flow);
    assert_eq!(steps.len(), 1);
    match &steps[0].kind {
        StepKind::Fill { value: FillValue::Text(v), .. } => assert_eq!(v, "{pwd}"),
        other => panic!("expected a templated fill value, got {:?}", other),
    }
}

#[tokio::test]
async fn test_select_dropdown_emits_fill_on_change() {
    let base_url = common::serve_fixtures().await;
    let recording = new_session().await;

    recording.start(Some(base_url.as_str()), true, None, options()).await.unwrap();
    wait_for_events(500).await;

    recording
        .browser
        .evaluate(
            "const el = document.querySelector('#select-one');
             el.value = 'opt2';
             el.dispatchEvent(new Event('change', {bubbles: true}));",
        )
        .await
        .unwrap();
    wait_for_events(300).await;

    let (flow, _) = recording.stop().await.unwrap();
    let steps = after_initial_navigate(&flow);
    assert_eq!(steps.len(), 1);
    match &steps[0].kind {
        StepKind::Fill { target, value: FillValue::Text(v) } => {
            assert_eq!(target.selector, "#select-one");
            assert_eq!(v, "opt2");
        }
        other => panic!("expected select fill step, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pause_excludes_events_from_timeline() {
    let base_url = common::serve_fixtures().await;
    let recording = new_session().await;

    recording.start(Some(base_url.as_str()), true, None, options()).await.unwrap();
    wait_for_events(500).await;

    let click = "document.querySelector('#btn-simple').dispatchEvent(new MouseEvent('click', {bubbles: true, detail: 1}))";

    recording.browser.evaluate(click).await.unwrap();
    wait_for_events(500).await;

    recording.pause().await.unwrap();
    recording.browser.evaluate(click).await.unwrap();
    wait_for_events(500).await;

    recording.resume().await.unwrap();
    recording.browser.evaluate(click).await.unwrap();
    wait_for_events(500).await;

    let (flow, _) = recording.stop().await.unwrap();
    let click_count = flow
        .steps
        .iter()
        .filter(|s| matches!(s.kind, StepKind::Click { .. }))
        .count();
    assert_eq!(click_count, 2, "click while paused must not be captured, got {:?}", flow.steps);
}

#[tokio::test]
async fn test_cross_frame_click_composes_selector() {
    let base_url = common::serve_fixtures().await;
    let recording = new_session().await;

    recording.start(Some(base_url.as_str()), true, None, options()).await.unwrap();
    wait_for_events(500).await; // iframe load + script injection in the child document

    recording
        .browser
        .evaluate(
            "document.querySelector('#child-frame').contentWindow.document
                .querySelector('#btn-inner')
                .dispatchEvent(new MouseEvent('click', {bubbles: true, detail: 1}))",
        )
        .await
        .unwrap();
    wait_for_events(500).await;

    let (flow, _) = recording.stop().await.unwrap();
    let steps = after_initial_navigate(&flow);
    assert_eq!(steps.len(), 1, "expected the aggregated cross-frame click, got {:?}", steps);
    match &steps[0].kind {
        StepKind::Click { target } => {
            assert_eq!(target.selector, "#child-frame |> #btn-inner");
            assert!(target.r#ref.is_none(), "refs must not cross a frame boundary");
        }
        other => panic!("expected click step, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_drops_session_without_saving() {
    let base_url = common::serve_fixtures().await;
    let recording = new_session().await;

    recording.start(Some(base_url.as_str()), true, None, options()).await.unwrap();
    wait_for_events(500).await;

    recording
        .browser
        .evaluate("document.querySelector('#btn-simple').dispatchEvent(new MouseEvent('click', {bubbles: true, detail: 1}))")
        .await
        .unwrap();
    wait_for_events(500).await;

    recording.cancel().await.unwrap();
    assert!(recording.stop().await.is_err(), "a cancelled session has no recording left to stop");
}
