// src/lib.rs

//! Safety-checked bindings to a small core of the X11 protocol.
//!
//! The crate exposes atom interning and lookup, error-text translation and
//! keyboard/pointer ungrab over the process's single display connection.
//! Every operation runs a caller-installed context check first, so the
//! embedding application decides which thread or lock is allowed to talk to
//! the X server.
//!
//! Use [`CoreBinding`] directly when the application owns the connection
//! object, or [`core()`] for the lazily bound process-wide instance.

pub mod arena;
pub mod binding;
pub mod config;
pub mod display;
pub mod error;
pub mod guard;
pub mod singleton;
pub mod xadapter;

pub use binding::{AtomRef, BindingInfo, CoreBinding, ErrorTextSource, CURRENT_TIME, ERROR_TEXT_LEN};
pub use config::BindingConfig;
pub use display::DisplayHandle;
pub use error::{BindingError, Result};
pub use guard::ContextGuard;
pub use singleton::{clear_context_check, core, set_context_check, state, BindingState, ProcessBinding};
pub use xadapter::{Atom, LiveXAdapter, MockXAdapter, Time, XAdapter};
