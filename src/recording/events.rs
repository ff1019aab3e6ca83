use serde::Deserialize;

use crate::models::{Step, VariableDef};

/// Mirrors the `{kind:"steps"|"variables", ...}` data messages the injected
/// script posts through the CDP binding (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageEvent {
    Steps { steps: Vec<Step> },
    Variables { variables: Vec<VariableDef> },
}

impl PageEvent {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
