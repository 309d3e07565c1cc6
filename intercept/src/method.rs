//! Target method descriptions and resolved method identities.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::types::Throwable;

/// Unresolved description of a method, as a hook author writes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSpec {
    pub declaring_type: String,
    pub name: String,
    pub params: Vec<String>,
    pub is_static: bool,
}

impl MethodSpec {
    pub fn instance(declaring_type: &str, name: &str, params: &[&str]) -> Self {
        Self {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            is_static: false,
        }
    }

    pub fn static_method(declaring_type: &str, name: &str, params: &[&str]) -> Self {
        Self {
            is_static: true,
            ..Self::instance(declaring_type, name, params)
        }
    }
}

impl fmt::Display for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}({})",
            self.declaring_type,
            self.name,
            self.params.join(",")
        )
    }
}

/// Runtime-assigned identity of a resolved method slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u64);

struct Resolved {
    id: MethodId,
    spec: MethodSpec,
    fault_class: String,
}

/// A method resolved against the host runtime. Immutable; cheap to clone.
///
/// Equality and hashing use the runtime identity only, so two overloads with
/// the same name never collide.
#[derive(Clone)]
pub struct TargetMethod(Arc<Resolved>);

impl TargetMethod {
    /// `fault_class` is the throwable class the runtime raises when a call
    /// to this method cannot be performed (wrong arity, bad receiver).
    pub fn new(id: MethodId, spec: MethodSpec, fault_class: impl Into<String>) -> Self {
        Self(Arc::new(Resolved {
            id,
            spec,
            fault_class: fault_class.into(),
        }))
    }

    #[inline]
    pub fn id(&self) -> MethodId {
        self.0.id
    }

    pub fn spec(&self) -> &MethodSpec {
        &self.0.spec
    }

    pub fn is_static(&self) -> bool {
        self.0.spec.is_static
    }

    pub fn param_count(&self) -> usize {
        self.0.spec.params.len()
    }

    pub fn fault_class(&self) -> &str {
        &self.0.fault_class
    }

    /// Throwable in the method's natural fault type, used when a dispatch
    /// fails for reasons internal to hooking.
    pub fn natural_fault(&self, detail: impl Into<String>) -> Throwable {
        Throwable::new(self.0.fault_class.clone(), detail)
    }
}

impl PartialEq for TargetMethod {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TargetMethod {}

impl Hash for TargetMethod {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for TargetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetMethod")
            .field("id", &self.0.id)
            .field("spec", &format_args!("{}", self.0.spec))
            .finish()
    }
}

impl fmt::Display for TargetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.spec)
    }
}
