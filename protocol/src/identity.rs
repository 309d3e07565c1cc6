//! Process identities exchanged between the system service and app processes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kernel process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub i32);

/// Kernel user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity the privileged manager process is expected to carry.
///
/// A candidate is only ever trusted when both the uid and the process name
/// match. `package_name` is the host package whose launch request carries the
/// manager (the manager runs parasitically inside that package's uid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IdentityFields")]
pub struct ManagerIdentity {
    pub uid: Uid,
    pub process_name: String,
    pub package_name: String,
}

/// Wire form of [`ManagerIdentity`]; a missing or empty `package_name`
/// falls back to the process name as in [`ManagerIdentity::new`].
#[derive(Deserialize)]
struct IdentityFields {
    uid: Uid,
    process_name: String,
    #[serde(default)]
    package_name: Option<String>,
}

impl From<IdentityFields> for ManagerIdentity {
    fn from(fields: IdentityFields) -> Self {
        let id = ManagerIdentity::new(fields.uid, fields.process_name);
        match fields.package_name {
            Some(package) if !package.is_empty() => id.with_package(package),
            _ => id,
        }
    }
}

impl ManagerIdentity {
    pub fn new(uid: Uid, process_name: impl Into<String>) -> Self {
        let process_name = process_name.into();
        Self {
            uid,
            package_name: process_name.clone(),
            process_name,
        }
    }

    pub fn with_package(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = package_name.into();
        self
    }

    /// Returns true if `uid` is the expected privileged uid.
    #[inline]
    pub fn matches_uid(&self, uid: Uid) -> bool {
        self.uid == uid
    }

    /// Returns true if both the uid and the process name match.
    pub fn matches(&self, uid: Uid, process_name: &str) -> bool {
        self.matches_uid(uid) && self.process_name == process_name
    }
}

impl Default for ManagerIdentity {
    fn default() -> Self {
        Self::new(Uid(DEFAULT_MANAGER_UID), DEFAULT_MANAGER_PROCESS)
            .with_package(DEFAULT_MANAGER_HOST_PACKAGE)
    }
}

/// Uid of the shell package the manager is injected into.
pub const DEFAULT_MANAGER_UID: u32 = 2000;

/// Process name the injected manager runs under.
pub const DEFAULT_MANAGER_PROCESS: &str = "org.xhook.manager";

/// Host package whose launch carries the manager.
pub const DEFAULT_MANAGER_HOST_PACKAGE: &str = "com.android.shell";
