use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    /// Optional start URL - if not provided, opens a blank tab.
    pub start_url: Option<String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: i32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: i32,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Optional client ID for tracking which client started the recording.
    pub client_id: Option<String>,
}

fn default_viewport_width() -> i32 {
    1280
}
fn default_viewport_height() -> i32 {
    720
}

#[derive(Debug, Deserialize, Default)]
pub struct StopRecordingRequest {}

#[derive(Debug, Deserialize, Default)]
pub struct PauseRecordingRequest {}

#[derive(Debug, Deserialize, Default)]
pub struct ResumeRecordingRequest {}
