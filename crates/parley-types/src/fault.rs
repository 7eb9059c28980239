//! Structured faults raised by hosted methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An error raised while executing a hosted method.
///
/// Faults are plain data so they can cross the wire whole
/// ([`ExceptionTransmission::Whole`](crate::ExceptionTransmission::Whole)),
/// as their message, or as the text produced by [`Fault::render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Short classification, e.g. `"InvalidInput"`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Innermost-first list of frames where the fault travelled.
    #[serde(default)]
    pub trace: Vec<String>,
    /// The fault that caused this one, if any.
    #[serde(default)]
    pub cause: Option<Box<Fault>>,
}

impl Fault {
    /// A fault of kind `"Fault"` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind("Fault", message)
    }

    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: Vec::new(),
            cause: None,
        }
    }

    /// Record a frame the fault passed through.
    pub fn at(mut self, frame: impl Into<String>) -> Self {
        self.trace.push(frame.into());
        self
    }

    pub fn caused_by(mut self, cause: Fault) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Convert any error, keeping its `source()` chain as nested causes.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut fault = Fault::with_kind("Error", err.to_string());
        if let Some(source) = err.source() {
            fault.cause = Some(Box::new(Fault::from_error(source)));
        }
        fault
    }

    /// Format the fault like a stack trace.
    ///
    /// ```text
    /// InvalidInput: 42
    /// 	at Calculator::divide
    /// Caused by: Error: division by zero
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut current = Some(self);
        let mut first = true;
        while let Some(fault) = current {
            if !first {
                out.push_str("Caused by: ");
            }
            out.push_str(&fault.kind);
            out.push_str(": ");
            out.push_str(&fault.message);
            out.push('\n');
            for frame in &fault.trace {
                out.push_str("\tat ");
                out.push_str(frame);
                out.push('\n');
            }
            first = false;
            current = fault.cause.as_deref();
        }
        out
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Fault::with_kind("InvalidArgument", err.to_string())
    }
}
