//! Service configuration: expected manager identity and logging switches.
//!
//! Loaded from YAML. The path comes from `XHOOK_CONFIG`; when unset the
//! built-in defaults are used.
//!
//! ```yaml
//! manager:
//!   uid: 2000
//!   process_name: org.xhook.manager
//!   package_name: com.android.shell
//! manager_enabled: true
//! log_muted: false
//! ```

use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::ManagerIdentity;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "XHOOK_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XhookConfig {
    #[serde(default)]
    pub manager: ManagerIdentity,
    /// Initial value of the arbiter's `enabled` flag.
    #[serde(default = "default_true")]
    pub manager_enabled: bool,
    /// Mute module-facing log output in app processes.
    #[serde(default)]
    pub log_muted: bool,
    #[serde(default)]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

impl Default for XhookConfig {
    fn default() -> Self {
        Self {
            manager: ManagerIdentity::default(),
            manager_enabled: true,
            log_muted: false,
            verbose: false,
        }
    }
}

impl XhookConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: XhookConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml(&contents)
    }

    /// Load from the file named by `XHOOK_CONFIG`, or fall back to defaults.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.manager.process_name.is_empty() {
            return Err(ConfigError::Validation(
                "manager.process_name must not be empty".to_string(),
            ));
        }
        if self.manager.uid.0 == 0 {
            return Err(ConfigError::Validation(
                "manager.uid must not be root".to_string(),
            ));
        }
        Ok(())
    }
}
