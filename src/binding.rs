// src/binding.rs

//! `CoreBinding`: the safety-checked entry point to the core X11 calls.
//!
//! Every operation follows the same shape: run the context guard, fetch the
//! display pointer (failing with `DisplayClosed` if it was invalidated),
//! marshal arguments, make the Xlib call, copy the result back into Rust-owned
//! memory. Native buffers never outlive the call that allocated them.

use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::sync::Arc;

use libc::{c_char, c_int};
use log::{debug, trace};
use serde::Serialize;

use crate::arena::{ArenaStats, ForeignBufferArena};
use crate::config::BindingConfig;
use crate::display::DisplayHandle;
use crate::error::{BindingError, Result};
use crate::guard::ContextGuard;
use crate::xadapter::{Atom, LiveXAdapter, Time, XAdapter};

/// Size of the buffer handed to `XGetErrorText`.
pub const ERROR_TEXT_LEN: usize = 128;

/// The protocol's `CurrentTime` timestamp.
pub const CURRENT_TIME: Time = 0;

/// An atom given either by identity or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomRef<'a> {
    /// Trusted as an existing atom; no server round-trip.
    Id(Atom),
    /// Interned on the server, created if absent.
    Name(&'a str),
}

impl From<Atom> for AtomRef<'_> {
    fn from(atom: Atom) -> Self {
        AtomRef::Id(atom)
    }
}

impl<'a> From<&'a str> for AtomRef<'a> {
    fn from(name: &'a str) -> Self {
        AtomRef::Name(name)
    }
}

impl<'a> From<&'a String> for AtomRef<'a> {
    fn from(name: &'a String) -> Self {
        AtomRef::Name(name.as_str())
    }
}

/// Input to `get_error_text`: a protocol error code, or text that has
/// already been resolved and is returned as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTextSource<'a> {
    Code(c_int),
    Text(&'a str),
}

impl From<c_int> for ErrorTextSource<'_> {
    fn from(code: c_int) -> Self {
        ErrorTextSource::Code(code)
    }
}

impl<'a> From<&'a str> for ErrorTextSource<'a> {
    fn from(text: &'a str) -> Self {
        ErrorTextSource::Text(text)
    }
}

/// Diagnostic snapshot of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingInfo {
    pub display: String,
    pub synchronized: bool,
    pub context_check: bool,
    pub closed: bool,
}

/// A string allocated by Xlib, released with `XFree` when dropped.
struct ServerString<'a, A: XAdapter> {
    adapter: &'a A,
    ptr: *mut c_char,
}

impl<A: XAdapter> ServerString<'_, A> {
    fn to_bytes(&self) -> Vec<u8> {
        unsafe { CStr::from_ptr(self.ptr) }.to_bytes().to_vec()
    }
}

impl<A: XAdapter> Drop for ServerString<'_, A> {
    fn drop(&mut self) {
        unsafe { self.adapter.free(self.ptr as *mut c_void) };
    }
}

pub struct CoreBinding<A: XAdapter = LiveXAdapter> {
    adapter: A,
    display: DisplayHandle,
    guard: Arc<ContextGuard>,
    arena: ForeignBufferArena,
}

impl<A: XAdapter> CoreBinding<A> {
    /// Opens the display and builds a binding with its own, empty guard.
    pub fn open(adapter: A, config: &BindingConfig) -> Result<Self> {
        Self::with_guard(adapter, config, Arc::new(ContextGuard::new()))
    }

    /// Opens the display and builds a binding sharing `guard`.
    pub fn with_guard(adapter: A, config: &BindingConfig, guard: Arc<ContextGuard>) -> Result<Self> {
        let display = DisplayHandle::open(&adapter, config)?;
        Ok(CoreBinding {
            adapter,
            display,
            guard,
            arena: ForeignBufferArena::new(),
        })
    }

    #[inline]
    fn context_check(&self) -> Result<()> {
        self.guard.check()?;
        Ok(())
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn display(&self) -> &DisplayHandle {
        &self.display
    }

    pub fn context_guard(&self) -> &Arc<ContextGuard> {
        &self.guard
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Installs `check` as the context check for this binding.
    pub fn set_context_check<F>(&self, check: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.guard.set(check);
    }

    pub fn clear_context_check(&self) {
        self.guard.clear();
    }

    /// The display name resolved when the connection was opened.
    ///
    /// Does not run the context check: the name is fixed at construction and
    /// reading it never touches Xlib.
    pub fn display_name(&self) -> &[u8] {
        self.display.name()
    }

    /// Returns `atom` unchanged without contacting the server.
    pub fn atom_from_id(&self, atom: Atom) -> Result<Atom> {
        self.context_check()?;
        Ok(atom)
    }

    /// `XInternAtom(name, only_if_exists = False)`.
    pub fn atom_from_name(&self, name: &str) -> Result<Atom> {
        self.context_check()?;
        let dpy = self.display.raw()?;
        let cname = CString::new(name).map_err(|_| BindingError::InvalidAtomName(name.to_string()))?;
        let atom = self.adapter.intern_atom(dpy, &cname, false);
        trace!("XInternAtom({:?}) = {}", name, atom);
        Ok(atom)
    }

    pub fn intern_atom<'a>(&self, atom: impl Into<AtomRef<'a>>) -> Result<Atom> {
        match atom.into() {
            AtomRef::Id(atom) => self.atom_from_id(atom),
            AtomRef::Name(name) => self.atom_from_name(name),
        }
    }

    /// Interns every name in one `XInternAtoms` round-trip, creating missing
    /// atoms. Any reported failure is fatal: Xlib does not say which names
    /// were missed.
    pub fn intern_atoms(&self, names: &[&str]) -> Result<()> {
        self.context_check()?;
        let dpy = self.display.raw()?;

        let c_count = batch_count(names.len())?;

        let mut name_array = self.arena.c_string_array(names)?;
        let count = name_array.count();
        // One spare slot, for implementations that expect a sentinel.
        let mut atoms = self.arena.alloc::<Atom>(count + 1)?;

        let status = unsafe {
            self.adapter
                .intern_atoms(dpy, name_array.as_mut_ptr(), c_count, false, atoms.as_mut_ptr())
        };
        if status == 0 {
            return Err(BindingError::BatchInternFailed { requested: count });
        }
        trace!("XInternAtoms({:?}) = {:?}", names, &atoms.as_slice()[..count]);
        Ok(())
    }

    /// `XGetAtomName`. `None` when the server has no name for `atom`.
    pub fn get_atom_name(&self, atom: Atom) -> Result<Option<Vec<u8>>> {
        self.context_check()?;
        let dpy = self.display.raw()?;

        let ptr = self.adapter.get_atom_name(dpy, atom);
        if ptr.is_null() {
            debug!("XGetAtomName({}) returned no name", atom);
            return Ok(None);
        }
        let name = ServerString {
            adapter: &self.adapter,
            ptr,
        };
        Ok(Some(name.to_bytes()))
    }

    /// `get_atom_name`, decoded as UTF-8 with replacement characters.
    pub fn get_atom_name_lossy(&self, atom: Atom) -> Result<Option<String>> {
        Ok(self
            .get_atom_name(atom)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// `XGetErrorText` for a code. Text input is returned unchanged.
    pub fn get_error_text<'a>(&self, source: impl Into<ErrorTextSource<'a>>) -> Result<String> {
        self.context_check()?;
        let code = match source.into() {
            ErrorTextSource::Text(text) => return Ok(text.to_string()),
            ErrorTextSource::Code(code) => code,
        };
        let dpy = self.display.raw()?;

        let mut buffer = [0 as c_char; ERROR_TEXT_LEN];
        unsafe {
            self.adapter
                .get_error_text(dpy, code, buffer.as_mut_ptr(), ERROR_TEXT_LEN as c_int)
        };
        Ok(decode_latin1(&buffer))
    }

    /// `XUngrabKeyboard`, at `CurrentTime` unless a timestamp is given.
    pub fn ungrab_keyboard(&self, time: Option<Time>) -> Result<c_int> {
        self.context_check()?;
        let dpy = self.display.raw()?;
        Ok(self.adapter.ungrab_keyboard(dpy, time.unwrap_or(CURRENT_TIME)))
    }

    /// `XUngrabPointer`, at `CurrentTime` unless a timestamp is given.
    pub fn ungrab_pointer(&self, time: Option<Time>) -> Result<c_int> {
        self.context_check()?;
        let dpy = self.display.raw()?;
        Ok(self.adapter.ungrab_pointer(dpy, time.unwrap_or(CURRENT_TIME)))
    }

    /// Snapshot of the binding's state. Like `display_name`, does not run the
    /// context check.
    pub fn info(&self) -> BindingInfo {
        BindingInfo {
            display: String::from_utf8_lossy(self.display.name()).into_owned(),
            synchronized: self.display.is_synchronized(),
            context_check: self.guard.is_installed(),
            closed: self.display.is_closed(),
        }
    }
}

impl<A: XAdapter> fmt::Display for CoreBinding<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X11CoreBindings({})",
            String::from_utf8_lossy(self.display.name())
        )
    }
}

impl<A: XAdapter> fmt::Debug for CoreBinding<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreBinding")
            .field("adapter", &self.adapter)
            .field("display", &self.display)
            .field("guard", &self.guard)
            .finish()
    }
}

/// The `count` argument for `XInternAtoms`, which takes a C `int`.
fn batch_count(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| BindingError::BatchTooLarge { count: len })
}

/// Cuts at the first NUL and maps each byte to the code point of the same
/// value (ISO-8859-1).
fn decode_latin1(buffer: &[c_char]) -> String {
    buffer
        .iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests;
