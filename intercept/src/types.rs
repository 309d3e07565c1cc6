use std::fmt;

use thiserror::Error;

/// Reference to a managed object owned by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub class: String,
    pub id: u64,
}

impl ObjectRef {
    pub fn new(class: impl Into<String>, id: u64) -> Self {
        Self {
            class: class.into(),
            id,
        }
    }
}

/// A value crossing the interception boundary: receiver, argument or result.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Object(ObjectRef),
    /// A throwable passed as an ordinary value (e.g. to an uncaught-exception handler).
    Throwable(Throwable),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_throwable(&self) -> Option<&Throwable> {
        match self {
            Value::Throwable(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// A value thrown by a method body, in the host runtime's own terms.
///
/// Never a hooking-internal error: a caller of a hooked method sees exactly
/// the kinds of throwables the unhooked method could raise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Throwable {
    pub class: String,
    pub message: String,
    pub frames: Vec<String>,
}

impl Throwable {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    pub fn with_frames(mut self, frames: Vec<String>) -> Self {
        self.frames = frames;
        self
    }

    /// Render like a runtime stack trace: header line, then one `at` line per frame.
    pub fn stack_trace(&self) -> String {
        let mut out = self.to_string();
        for frame in &self.frames {
            out.push_str("\n\tat ");
            out.push_str(frame);
        }
        out
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.class)
        } else {
            write!(f, "{}: {}", self.class, self.message)
        }
    }
}

/// What a method invocation produced: a return value or a thrown value.
pub type Outcome = std::result::Result<Value, Throwable>;

/// Opaque identity of one registration on a target method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackToken(pub u64);

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("{method} already has a registration for {token}")]
    AlreadyRegistered { method: String, token: CallbackToken },

    #[error("cannot bind {target}: {reason}")]
    UnresolvedTarget { target: String, reason: String },

    #[error("no registration for {token} on {method}")]
    NotFound { method: String, token: CallbackToken },

    #[error("incompatible call to {method}: {reason}")]
    IncompatibleCall { method: String, reason: String },

    #[error("interception point '{point}' failed to install: {source}")]
    InstallFailed {
        point: String,
        #[source]
        source: Box<HookError>,
    },
}

pub type Result<T> = std::result::Result<T, HookError>;
