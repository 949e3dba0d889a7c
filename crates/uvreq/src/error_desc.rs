//! Engine error codes resolved to names and descriptions

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use uvreq_core::{NativeEngine, OperationError};

/// An engine error code plus the engine that can describe it.
///
/// Both strings come from the engine's static tables on each call; nothing
/// is cached or freed here.
#[derive(Clone)]
pub struct ErrorDescriptor {
    code: i32,
    engine: Arc<dyn NativeEngine>,
}

impl ErrorDescriptor {
    pub fn new(code: i32, engine: Arc<dyn NativeEngine>) -> Self {
        Self { code, engine }
    }

    #[inline]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Symbolic name, e.g. `ENOENT`
    pub fn name(&self) -> Cow<'static, str> {
        self.engine.err_name(self.code)
    }

    pub fn description(&self) -> Cow<'static, str> {
        self.engine.strerror(self.code)
    }

    /// Owned error value for callbacks and `?` propagation
    pub fn to_operation_error(&self) -> OperationError {
        OperationError {
            code: self.code,
            name: self.name().into_owned(),
            description: self.description().into_owned(),
        }
    }
}

impl From<ErrorDescriptor> for OperationError {
    fn from(desc: ErrorDescriptor) -> Self {
        desc.to_operation_error()
    }
}

impl fmt::Debug for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorDescriptor")
            .field("code", &self.code)
            .field("name", &self.name())
            .field("engine", &self.engine.name())
            .finish()
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.description())
    }
}
