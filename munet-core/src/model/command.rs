//! CLI hook commands (§3, §4.8) — consumed by [`crate::registry`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One declared CLI command, resolved against a running topology by
/// [`crate::registry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliCommand {
    pub name: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub help: Option<String>,

    /// Only offered for nodes whose resolved kind name is in this list, if
    /// non-empty.
    #[serde(default, rename = "kinds-filter")]
    pub kinds_filter: Vec<String>,

    #[serde(default, rename = "new-window")]
    pub new_window: bool,
    /// Routes execution to the orchestrator's own namespace rather than a
    /// node's.
    #[serde(default, rename = "top-level")]
    pub top_level: bool,
    #[serde(default)]
    pub interactive: bool,

    /// The template substituted against `{host}`/`{unet}`/`{user_input}`.
    pub exec: String,
    /// Per-kind overrides of `exec`, keyed by kind name.
    #[serde(default, rename = "exec-kind")]
    pub exec_kind: HashMap<String, String>,
}
