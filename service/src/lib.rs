//! Manager attach arbitration for the privileged system service.
//!
//! `ManagerService` implements the `ManagerControl` boundary on top of one
//! `AttachArbiter` per host service instance; the arbiter installs a `Guard`
//! on the channel of the manager it authorized.

pub mod arbiter;
pub mod guard;
pub mod service;

pub use arbiter::{AttachArbiter, AttachState};
pub use guard::{AuxiliaryBinding, Guard, GuardError};
pub use service::ManagerService;

#[cfg(test)]
mod tests;
