use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alternative way to address an element, in priority order (attr > css > aria > text).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Attr,
    Css,
    Aria,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "type")]
    pub kind: CandidateKind,
    pub value: String,
}

/// Addressable description of an element. `selector` is the chosen primary;
/// `candidates` preserves the alternatives a replay engine can fall back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub selector: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub tag: String,
    /// Opaque per-document identifier, only meaningful during recording.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
}

impl Target {
    /// Compose a cross-frame selector: `<frame-selector> |> <inner-selector>`,
    /// with a matching `css` candidate prepended per spec.md §4.2.4.
    pub fn compose_cross_frame(frame_selector: &str, inner: &Target) -> Target {
        let composite = format!("{} |> {}", frame_selector, inner.selector);
        let mut candidates = vec![Candidate {
            kind: CandidateKind::Css,
            value: composite.clone(),
        }];
        candidates.extend(inner.candidates.clone());
        Target {
            selector: composite,
            candidates,
            tag: inner.tag.clone(),
            // refs never cross a frame boundary (spec.md §3 invariants).
            r#ref: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrollMode {
    Offset,
    Container,
}

/// A fill value is either a literal string or a checkbox/radio boolean.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Text(String),
    Checked(bool),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Click {
        target: Target,
    },
    Dblclick {
        target: Target,
    },
    Fill {
        target: Target,
        value: FillValue,
    },
    Scroll {
        mode: ScrollMode,
        offset: Offset,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<Target>,
    },
    Key {
        keys: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<Target>,
    },
    OpenTab {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "urlContains")]
        url_contains: Option<String>,
    },
    SwitchTab {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "urlContains")]
        url_contains: Option<String>,
    },
    SwitchFrame {
        #[serde(rename = "urlContains")]
        url_contains: String,
    },
    WaitFor {
        target: Target,
    },
    Navigate {
        url: String,
    },
}

impl StepKind {
    /// The element this step addresses, for steps that have one.
    pub fn target(&self) -> Option<&Target> {
        match self {
            StepKind::Click { target }
            | StepKind::Dblclick { target }
            | StepKind::Fill { target, .. }
            | StepKind::WaitFor { target } => Some(target),
            StepKind::Scroll { target, .. } | StepKind::Key { target, .. } => target.as_ref(),
            _ => None,
        }
    }

    pub fn target_mut(&mut self) -> Option<&mut Target> {
        match self {
            StepKind::Click { target }
            | StepKind::Dblclick { target }
            | StepKind::Fill { target, .. }
            | StepKind::WaitFor { target } => Some(target),
            StepKind::Scroll { target, .. } | StepKind::Key { target, .. } => target.as_mut(),
            _ => None,
        }
    }
}

/// After-effects recorded against a step by incidental browser events
/// (spec.md §4.3.5) rather than by the step's own handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepAfter {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wait_for_navigation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub screenshot_on_fail: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<StepAfter>,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            screenshot_on_fail: false,
            after: None,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        self.kind.target()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDef {
    pub key: String,
    pub sensitive: bool,
    pub default: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMeta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub version: i32,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    pub meta: FlowMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Flow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            steps: Vec::new(),
            variables: Vec::new(),
            meta: FlowMeta {
                created_at: now,
                updated_at: now,
            },
            description,
        }
    }

    /// Upsert incoming steps by `id`, preserving original position on replace
    /// (spec.md §4.3.2, invariant in §3).
    pub fn append_steps(&mut self, incoming: Vec<Step>) {
        for step in incoming {
            if let Some(existing) = self.steps.iter_mut().find(|s| s.id == step.id) {
                *existing = step;
            } else {
                self.steps.push(step);
            }
        }
        self.meta.updated_at = Utc::now();
    }

    /// Dedup-update variables by `key`; later definitions overwrite earlier
    /// ones (spec.md §3 invariants, §4.3.2). Entries with an empty key are
    /// skipped.
    pub fn append_variables(&mut self, incoming: Vec<VariableDef>) {
        for var in incoming {
            if var.key.is_empty() {
                continue;
            }
            if let Some(existing) = self.variables.iter_mut().find(|v| v.key == var.key) {
                *existing = var;
            } else {
                self.variables.push(var);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(id: &str, selector: &str) -> Step {
        Step::new(
            id,
            StepKind::Click {
                target: Target {
                    selector: selector.to_string(),
                    candidates: vec![],
                    tag: "button".to_string(),
                    r#ref: None,
                },
            },
        )
    }

    fn fill(id: &str, selector: &str, value: &str) -> Step {
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

    #[test]
    fn append_steps_appends_new_ids_in_order() {
        let mut flow = Flow::new("f1", "Flow", None);
        flow.append_steps(vec![click("s1", "#a"), click("s2", "#b")]);
        assert_eq!(flow.steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["s1", "s2"]);
    }

    #[test]
    fn append_steps_upsert_preserves_original_position() {
        let mut flow = Flow::new("f1", "Flow", None);
        flow.append_steps(vec![click("s1", "#a"), fill("s2", "#u", "he")]);
        // Debounced fill re-sent with the same id and a newer value.
        flow.append_steps(vec![fill("s2", "#u", "hello")]);

        assert_eq!(flow.steps.len(), 2, "upsert must not append a duplicate");
        assert_eq!(flow.steps[1].id, "s2");
        match &flow.steps[1].kind {
            StepKind::Fill { value: FillValue::Text(v), .. } => assert_eq!(v, "hello"),
            other => panic!("expected fill, got {:?}", other),
        }
    }

    #[test]
    fn append_variables_dedups_by_key_latest_wins() {
        let mut flow = Flow::new("f1", "Flow", None);
        flow.append_variables(vec![VariableDef {
            key: "pwd".into(),
            sensitive: true,
            default: "".into(),
        }]);
        flow.append_variables(vec![VariableDef {
            key: "pwd".into(),
            sensitive: true,
            default: "changed".into(),
        }]);
        assert_eq!(flow.variables.len(), 1);
        assert_eq!(flow.variables[0].default, "changed");
    }

    #[test]
    fn append_variables_skips_empty_key() {
        let mut flow = Flow::new("f1", "Flow", None);
        flow.append_variables(vec![VariableDef {
            key: "".into(),
            sensitive: false,
            default: "".into(),
        }]);
        assert!(flow.variables.is_empty());
    }

    #[test]
    fn compose_cross_frame_selector_uses_pipe_and_prepends_candidate() {
        let inner = Target {
            selector: "#x".to_string(),
            candidates: vec![Candidate { kind: CandidateKind::Attr, value: "[data-testid=x]".into() }],
            tag: "button".to_string(),
            r#ref: Some("ref_3".to_string()),
        };
        let composite = Target::compose_cross_frame("#f", &inner);
        assert_eq!(composite.selector, "#f |> #x");
        assert_eq!(composite.candidates[0].value, "#f |> #x");
        assert!(composite.r#ref.is_none());
    }
}
