use serde::{Deserialize, Serialize};

/// Initial window size for a launched recording tab. Carried over from the
/// teacher's `models::workflow::Viewport` — not part of spec.md's data
/// model, but every browser launch needs one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}
