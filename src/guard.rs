// src/guard.rs

//! The replaceable pre-call hook run before every binding operation.
//!
//! The binding imposes no threading model of its own. Instead the embedding
//! application installs a check (typically "this thread holds the X lock" or
//! "this is the X thread") and the binding runs it first in every operation.
//! A failing check's error is handed back to the caller untouched.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::thread::{self, ThreadId};

use anyhow::anyhow;
use log::debug;

/// A context check: called for its side effect, `Err` rejects the call.
pub type ContextCheckFn = dyn Fn() -> anyhow::Result<()> + Send + Sync;

#[derive(Default)]
pub struct ContextGuard {
    check: RwLock<Option<Arc<ContextCheckFn>>>,
}

impl ContextGuard {
    /// A guard with no check installed.
    pub const fn new() -> Self {
        Self {
            check: RwLock::new(None),
        }
    }

    /// Replaces the installed check.
    pub fn set<F>(&self, check: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        debug!("Installing context check");
        *self.check.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(check));
    }

    /// Restores the default no-op behaviour.
    pub fn clear(&self) {
        debug!("Clearing context check");
        *self.check.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_installed(&self) -> bool {
        self.check
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Runs the installed check, if any.
    ///
    /// The check is cloned out of the lock before it runs, so it may replace
    /// the guard itself.
    pub fn check(&self) -> anyhow::Result<()> {
        let check = self
            .check
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match check {
            Some(check) => check(),
            None => Ok(()),
        }
    }

    /// Builds a check that only admits calls from the current thread.
    pub fn thread_affinity() -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
        let owner: ThreadId = thread::current().id();
        move || {
            let current = thread::current();
            if current.id() == owner {
                Ok(())
            } else {
                Err(anyhow!(
                    "X11 call from thread {:?} ({}), expected {:?}",
                    current.id(),
                    current.name().unwrap_or("<unnamed>"),
                    owner
                ))
            }
        }
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("installed", &self.is_installed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_guard_admits_everything() {
        let guard = ContextGuard::new();
        assert!(!guard.is_installed());
        assert!(guard.check().is_ok());
    }

    #[test]
    fn installed_check_runs_on_every_call_and_can_be_cleared() {
        let guard = ContextGuard::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        guard.set(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        guard.check().unwrap();
        guard.check().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        guard.clear();
        guard.check().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejection_error_is_returned_unchanged() {
        let guard = ContextGuard::new();
        guard.set(|| Err(anyhow!("X lock not held")));
        let err = guard.check().unwrap_err();
        assert_eq!(err.to_string(), "X lock not held");
    }

    #[test]
    fn check_may_replace_the_guard() {
        let guard = Arc::new(ContextGuard::new());
        let inner = guard.clone();
        guard.set(move || {
            inner.clear();
            Ok(())
        });
        guard.check().unwrap();
        assert!(!guard.is_installed());
    }

    #[test]
    fn thread_affinity_rejects_other_threads() {
        let check = Arc::new(ContextGuard::thread_affinity());
        assert!(check().is_ok());

        let remote = check.clone();
        let result = thread::Builder::new()
            .name("not-the-x-thread".to_string())
            .spawn(move || remote())
            .unwrap()
            .join()
            .unwrap();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("not-the-x-thread"));
    }
}
