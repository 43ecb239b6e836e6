//! Dispatch status codes.
//!
//! Every load and dispatch call resolves to one [`Status`]. Positive codes are
//! outcomes of running script code; negative codes are preconditions that
//! failed before any script ran.

use std::fmt;

use crate::error::BridgeError;

/// Closed status code space shared by load and dispatch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    /// The call completed.
    Success = 0,
    /// Reserved compile-failure code. The engine reports compile errors as
    /// exceptions, so this is never produced; it stays in the code space so
    /// hosts matching on numeric codes keep a stable table.
    Reserved = 1,
    /// Script code threw; see the VM's last exception.
    ScriptException = 2,
    /// The VM has been disposed.
    Disposed = -1,
    /// The entry script could not be read.
    EntryMissing = -2,
    /// The script does not define the handler being dispatched to.
    HandlerMissing = -3,
    /// A host-side resource or setting was unusable (registry exhausted,
    /// invalid configuration).
    Unavailable = -4,
}

impl Status {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// True for codes reported before any script ran.
    pub const fn is_precondition(self) -> bool {
        self.code() < 0
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for Status {
    type Error = BridgeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Success,
            1 => Self::Reserved,
            2 => Self::ScriptException,
            -1 => Self::Disposed,
            -2 => Self::EntryMissing,
            -3 => Self::HandlerMissing,
            -4 => Self::Unavailable,
            other => return Err(BridgeError::UnknownStatus(other)),
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Reserved => "reserved",
            Self::ScriptException => "script exception",
            Self::Disposed => "vm disposed",
            Self::EntryMissing => "entry missing",
            Self::HandlerMissing => "handler missing",
            Self::Unavailable => "unavailable",
        };
        write!(f, "{name} ({})", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::ScriptException.code(), 2);
        assert_eq!(i32::from(Status::Disposed), -1);
        assert_eq!(Status::EntryMissing.code(), -2);
        assert_eq!(Status::HandlerMissing.code(), -3);
        assert_eq!(Status::Unavailable.code(), -4);
    }

    #[test]
    fn test_try_from() {
        for status in [
            Status::Success,
            Status::Reserved,
            Status::ScriptException,
            Status::Disposed,
            Status::EntryMissing,
            Status::HandlerMissing,
            Status::Unavailable,
        ] {
            assert_eq!(Status::try_from(status.code()).unwrap(), status);
        }
        assert!(matches!(
            Status::try_from(42),
            Err(BridgeError::UnknownStatus(42))
        ));
    }

    #[test]
    fn test_precondition_split() {
        assert!(Status::Disposed.is_precondition());
        assert!(Status::HandlerMissing.is_precondition());
        assert!(Status::Unavailable.is_precondition());
        assert!(!Status::Reserved.is_precondition());
        assert!(!Status::ScriptException.is_precondition());
        assert!(!Status::Success.is_precondition());
        assert_eq!(Status::EntryMissing.to_string(), "entry missing (-2)");
    }
}
