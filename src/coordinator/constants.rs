//! Numeric and set constants shared by the content-recorder script and the
//! coordinator. Keeping them in one place means the JS injected into a page
//! and the Rust side agree on timing without magic numbers drifting apart.

pub const INPUT_DEBOUNCE_MS: u64 = 800;
pub const BATCH_MS: u64 = 100;
pub const SCROLL_DEBOUNCE_MS: u64 = 350;
pub const DBLCLICK_THRESHOLD_MS: u64 = 300;
pub const STOP_ACK_TIMEOUT_MS: u64 = 3_000;
pub const GRACE_PERIOD_MS: u64 = 100;
pub const TIMELINE_RETAIN: usize = 30;
pub const NAVIGATION_ENRICHMENT_WINDOW_MS: u64 = 5_000;
pub const NAVIGATION_ENRICHMENT_DEBOUNCE_MS: u64 = 500;

pub const SENSITIVE_INPUT_TYPES: &[&str] = &["password"];
