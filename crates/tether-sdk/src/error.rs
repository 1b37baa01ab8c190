//! Error types for the bridge and the host boundary

use std::fmt;

use crate::context::{HostEnv, Persistent};
use crate::value::{HeapRef, HostValue, ValueKind};

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result type for host operations
pub type HostResult<T> = Result<T, HostError>;

// ============================================================================
// Value paths
// ============================================================================

/// One step in the path to an offending value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Host-visible argument position
    Argument(usize),
    /// Struct field
    Field(String),
    /// Array element
    Index(usize),
    /// The return value of a call
    Return,
}

/// Location of the first offending value inside a converted value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuePath(Vec<PathSegment>);

impl ValuePath {
    /// Path at the root of the value
    pub fn root() -> Self {
        ValuePath(Vec::new())
    }

    /// Check whether this is the root path
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Segments from outermost to innermost
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    fn prepend(&mut self, segment: PathSegment) {
        self.0.insert(0, segment);
    }

    /// `"<path>: "` or an empty string at the root
    pub(crate) fn prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}: ", self)
        }
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Argument(pos) => write!(f, "argument {}", pos)?,
                PathSegment::Return => f.write_str("return value")?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
                PathSegment::Field(name) if i == 0 => f.write_str(name)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Bridge errors
// ============================================================================

/// Errors raised while marshalling or dispatching a bridge call.
///
/// Every variant maps to a host exception `name` (see [`BridgeError::name`]).
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// Fewer arguments than required parameters
    #[error("missing argument at position {position}: expected at least {expected} arguments, got {received}")]
    MissingArguments {
        /// First missing host-visible argument position (0-based)
        position: usize,
        /// Number of required arguments
        expected: usize,
        /// Number of supplied arguments
        received: usize,
    },

    /// Non-boolean where a boolean was declared
    #[error("{}boolean expected, got {got}", .at.prefix())]
    BooleanExpected {
        /// Location of the offending value
        at: ValuePath,
        /// Actual host kind
        got: ValueKind,
    },

    /// Non-number where a number was declared
    #[error("{}number expected, got {got}", .at.prefix())]
    NumberExpected {
        /// Location of the offending value
        at: ValuePath,
        /// Actual host kind
        got: ValueKind,
    },

    /// Neither number nor big-integer where a 64-bit integer was declared
    #[error("{}bigint expected, got {got}", .at.prefix())]
    BigIntExpected {
        /// Location of the offending value
        at: ValuePath,
        /// Actual host kind
        got: ValueKind,
    },

    /// Non-string where a string was declared
    #[error("{}string expected, got {got}", .at.prefix())]
    StringExpected {
        /// Location of the offending value
        at: ValuePath,
        /// Actual host kind
        got: ValueKind,
    },

    /// Non-object where a struct or resource was declared
    #[error("{}object expected, got {got}", .at.prefix())]
    ObjectExpected {
        /// Location of the offending value
        at: ValuePath,
        /// Actual host kind
        got: ValueKind,
    },

    /// Non-array where an array was declared
    #[error("{}array expected, got {got}", .at.prefix())]
    ArrayExpected {
        /// Location of the offending value
        at: ValuePath,
        /// Actual host kind
        got: ValueKind,
    },

    /// Non-function where a callback was declared
    #[error("{}function expected, got {got}", .at.prefix())]
    FunctionExpected {
        /// Location of the offending value
        at: ValuePath,
        /// Actual host kind
        got: ValueKind,
    },

    /// Number not representable in the declared native type
    #[error("{}{value} is out of range for {ty}", .at.prefix())]
    RangeError {
        /// Location of the offending value
        at: ValuePath,
        /// Declared native type
        ty: String,
        /// Rendering of the rejected value
        value: String,
    },

    /// Host string is not valid UTF-8
    #[error("{}invalid UTF-8 sequence at byte {offset}", .at.prefix())]
    InvalidEncoding {
        /// Location of the offending value
        at: ValuePath,
        /// Byte offset of the first invalid sequence
        offset: usize,
    },

    /// Required struct field absent from the host object
    #[error("{}missing field `{field}`", .at.prefix())]
    MissingField {
        /// Location of the struct
        at: ValuePath,
        /// Name of the first missing field
        field: String,
    },

    /// Value of the wrong shape or resource type
    #[error("{}type mismatch: expected {expected}, got {got}", .at.prefix())]
    TypeMismatch {
        /// Location of the offending value
        at: ValuePath,
        /// Expected type
        expected: String,
        /// Actual type
        got: String,
    },

    /// Address registered twice without an intervening finalize
    #[error("native resource at {address:#x} is already registered")]
    AlreadyRegistered {
        /// Address of the resource
        address: usize,
    },

    /// Conflicting access to a resource still borrowed by an outer call
    #[error("native resource {resource} is in use by another call")]
    ResourceBusy {
        /// Resource type name
        resource: String,
    },

    /// Value thrown by a host function
    #[error("{message}")]
    Thrown {
        /// Message text of the thrown value
        message: String,
        /// The thrown value itself, rethrown unmodified at the boundary
        value: Option<HostValue>,
        /// Keeps `value` alive once the scope it was caught in has closed
        retained: Option<Persistent>,
    },

    /// Host operation failed
    #[error("host operation failed: {0}")]
    Host(String),

    /// Error reported by a native function body
    #[error("{0}")]
    Native(String),

    /// Native function panicked
    #[error("native function panicked: {0}")]
    Panic(String),
}

impl BridgeError {
    /// Exception name used when this error is thrown into the host
    pub fn name(&self) -> &'static str {
        match self {
            BridgeError::MissingArguments { .. } => "MissingArguments",
            BridgeError::BooleanExpected { .. } => "BooleanExpected",
            BridgeError::NumberExpected { .. } => "NumberExpected",
            BridgeError::BigIntExpected { .. } => "BigIntExpected",
            BridgeError::StringExpected { .. } => "StringExpected",
            BridgeError::ObjectExpected { .. } => "ObjectExpected",
            BridgeError::ArrayExpected { .. } => "ArrayExpected",
            BridgeError::FunctionExpected { .. } => "FunctionExpected",
            BridgeError::RangeError { .. } => "RangeError",
            BridgeError::InvalidEncoding { .. } => "InvalidEncoding",
            BridgeError::MissingField { .. } => "MissingField",
            BridgeError::TypeMismatch { .. } => "TypeMismatch",
            BridgeError::AlreadyRegistered { .. } => "AlreadyRegistered",
            BridgeError::ResourceBusy { .. } => "ResourceBusy",
            BridgeError::Thrown { .. } => "Error",
            BridgeError::Host(_) => "HostError",
            BridgeError::Native(_) => "NativeError",
            BridgeError::Panic(_) => "Panic",
        }
    }

    /// Shorthand for a type mismatch at the root path
    pub fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            at: ValuePath::root(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Location of the offending value, for the variants that carry one
    pub fn path(&self) -> Option<&ValuePath> {
        match self {
            BridgeError::BooleanExpected { at, .. }
            | BridgeError::NumberExpected { at, .. }
            | BridgeError::BigIntExpected { at, .. }
            | BridgeError::StringExpected { at, .. }
            | BridgeError::ObjectExpected { at, .. }
            | BridgeError::ArrayExpected { at, .. }
            | BridgeError::FunctionExpected { at, .. }
            | BridgeError::RangeError { at, .. }
            | BridgeError::InvalidEncoding { at, .. }
            | BridgeError::MissingField { at, .. }
            | BridgeError::TypeMismatch { at, .. } => Some(at),
            _ => None,
        }
    }

    /// Prefix the error's location with an outer path segment.
    ///
    /// Errors without a location are returned unchanged.
    pub fn within(mut self, segment: PathSegment) -> Self {
        match &mut self {
            BridgeError::BooleanExpected { at, .. }
            | BridgeError::NumberExpected { at, .. }
            | BridgeError::BigIntExpected { at, .. }
            | BridgeError::StringExpected { at, .. }
            | BridgeError::ObjectExpected { at, .. }
            | BridgeError::ArrayExpected { at, .. }
            | BridgeError::FunctionExpected { at, .. }
            | BridgeError::RangeError { at, .. }
            | BridgeError::InvalidEncoding { at, .. }
            | BridgeError::MissingField { at, .. }
            | BridgeError::TypeMismatch { at, .. } => at.prepend(segment),
            _ => {}
        }
        self
    }

    /// Convert a host status into a bridge error.
    ///
    /// Host exceptions keep the thrown value and its message text.
    pub fn from_host(env: &dyn HostEnv, error: HostError) -> Self {
        match error {
            HostError::Exception(value) => BridgeError::Thrown {
                message: thrown_message(env, value),
                value: Some(value),
                retained: None,
            },
            other => BridgeError::Host(other.to_string()),
        }
    }

    /// Keep a thrown host value alive past the current handle scope.
    ///
    /// Needed before an error leaves the call that caught it, such as a
    /// result sent to a future or another thread. Other errors pass through.
    pub fn persist(self, env: &dyn HostEnv) -> Self {
        match self {
            BridgeError::Thrown {
                message,
                value: Some(value),
                retained: None,
            } => match Persistent::new(env, value) {
                Ok(retained) => BridgeError::Thrown {
                    message,
                    value: Some(value),
                    retained: Some(retained),
                },
                // Unreferenced values must not be rethrown; keep the message only.
                Err(_) => BridgeError::Thrown {
                    message,
                    value: None,
                    retained: None,
                },
            },
            other => other,
        }
    }

    /// Build the host value thrown for this error.
    ///
    /// Re-thrown host values are passed through unmodified; every other error
    /// becomes a host error object carrying [`name`](Self::name) and the
    /// display message.
    pub fn to_host(&self, env: &dyn HostEnv) -> HostValue {
        if let BridgeError::Thrown {
            value: Some(value), ..
        } = self
        {
            return *value;
        }
        match env.create_error(self.name(), &self.to_string()) {
            Ok(error) => error,
            // Creating the error object itself failed; throw the bare message.
            Err(_) => env
                .create_string(self.to_string().as_bytes())
                .unwrap_or(HostValue::Undefined),
        }
    }
}

/// Message text of a thrown host value: the `message` property of error
/// objects, the string itself for strings, the kind name otherwise.
pub fn thrown_message(env: &dyn HostEnv, value: HostValue) -> String {
    match env.kind_of(value) {
        ValueKind::String => env
            .read_string(value)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default(),
        ValueKind::Object | ValueKind::Function => {
            match env.get_property(value, "message") {
                Ok(message) if env.kind_of(message) == ValueKind::String => env
                    .read_string(message)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default(),
                _ => "uncaught exception".to_string(),
            }
        }
        kind => match value {
            HostValue::Number(n) => n.to_string(),
            HostValue::Bool(b) => b.to_string(),
            _ => kind.name().to_string(),
        },
    }
}

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Native(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Native(s.to_string())
    }
}

// ============================================================================
// Host errors
// ============================================================================

/// Status of a failed host operation
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    /// The operation threw; the value is the thrown host value
    #[error("uncaught host exception")]
    Exception(HostValue),

    /// The operation does not apply to the given value
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// The heap value was already collected
    #[error("value {0:?} has been collected")]
    Collected(HeapRef),

    /// The host loop is gone
    #[error("host loop is no longer running")]
    LoopClosed,
}
