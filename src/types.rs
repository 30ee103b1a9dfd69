use serde::Deserialize;

// ===================================================================
// Hook Input Types (received via stdin, snake_case JSON)
// ===================================================================

/// Fields shared by all hook event inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonInput {
    pub session_id: String,
    #[serde(default)]
    pub transcript_path: String,
    #[serde(default)]
    pub cwd: String,
}

#[derive(Debug, Deserialize)]
pub struct UserPromptSubmitInput {
    #[serde(flatten)]
    pub common: CommonInput,
    #[serde(default)]
    pub prompt: String,
}

/// Only the common fields are needed; `stop_hook_active` and the like are
/// ignored.
#[derive(Debug, Deserialize)]
pub struct StopInput {
    #[serde(flatten)]
    pub common: CommonInput,
}

/// Tagged by the `hook_event_name` field to determine which event fired.
/// Events the recorder does not handle deserialize as `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookInput {
    UserPromptSubmit(UserPromptSubmitInput),
    Stop(StopInput),
    #[serde(other)]
    Other,
}
