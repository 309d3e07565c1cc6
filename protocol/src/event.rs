//! Notifications delivered by the host runtime.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelHandle;

/// Opaque arguments forwarded to the module loader untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleArguments(pub String);

impl ModuleArguments {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Runtime → sequencer: a new process was forked and is about to run code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCreated {
    /// True for the privileged host (system) process.
    pub is_system: bool,
    /// Nice name the process was specialized with.
    pub process_name: String,
    /// Opaque module arguments (typically the app data directory).
    #[serde(default)]
    pub module_args: ModuleArguments,
    /// Channel to the application service for this process.
    pub channel: ChannelHandle,
}
