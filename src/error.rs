// src/error.rs

//! Error taxonomy for the binding layer.
//!
//! Every variant except `ContextCheck` is a fatal precondition violation: the
//! binding never retries or degrades, it reports which precondition failed and
//! leaves recovery to the caller. `ContextCheck` carries whatever the installed
//! context guard returned, unchanged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BindingError {
    #[error("No X display available: {0}")]
    DisplayUnavailable(String),
    #[error("XInitThreads failed")]
    ThreadInitFailed,
    #[error("Not running under X11: {0}")]
    WrongPlatform(String),
    #[error("X display handle is closed (null display pointer)")]
    DisplayClosed,
    #[error("Failed to allocate native array of {len} x {what}")]
    AllocationFailed { what: &'static str, len: usize },
    #[error("Atom batch of {count} name(s) exceeds the XInternAtoms count limit")]
    BatchTooLarge { count: usize },
    #[error("XInternAtoms failed to intern {requested} atom(s)")]
    BatchInternFailed { requested: usize },
    #[error("Atom name contains an interior NUL byte: {0:?}")]
    InvalidAtomName(String),
    #[error(transparent)]
    ContextCheck(#[from] anyhow::Error),
}

impl BindingError {
    /// Returns `true` for precondition violations raised by the binding itself,
    /// `false` for failures reported by the installed context guard.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BindingError::ContextCheck(_))
    }
}

pub type Result<T> = std::result::Result<T, BindingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_failures_are_not_fatal() {
        let err = BindingError::from(anyhow::anyhow!("wrong thread"));
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "wrong thread");
    }

    #[test]
    fn precondition_failures_name_the_precondition() {
        assert!(BindingError::DisplayClosed.is_fatal());
        assert!(BindingError::DisplayClosed.to_string().contains("closed"));

        let alloc = BindingError::AllocationFailed {
            what: "Atom",
            len: 3,
        };
        assert!(alloc.is_fatal());
        assert!(alloc.to_string().contains("allocate"));

        let batch = BindingError::BatchInternFailed { requested: 2 };
        assert!(batch.to_string().contains("XInternAtoms"));

        let oversized = BindingError::BatchTooLarge { count: usize::MAX };
        assert!(oversized.is_fatal());
        assert!(oversized.to_string().contains("count limit"));

        assert!(BindingError::ThreadInitFailed.is_fatal());
    }
}
