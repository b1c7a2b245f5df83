// src/xadapter.rs

//! Defines the `XAdapter` trait and its live and mock implementations.
//!
//! `XAdapter` is the only place the binding touches libX11. It doubles as the
//! display source: `open_display` acquires the process's connection. The
//! `LiveXAdapter` loads libX11 at runtime; the `MockXAdapter` simulates just
//! enough of a server (atom table, error texts, server-allocated strings) for
//! the binding to be tested without a live X server.

use std::collections::{HashMap, HashSet};
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use libc::{c_char, c_int};
use log::{debug, warn};
use x11_dl::xlib::{self, Xlib};

use crate::error::{BindingError, Result};

pub use x11_dl::xlib::{Atom, Display, Time};

/// The `XAdapter` trait abstracts the Xlib calls the binding issues.
///
/// Methods mirror their Xlib counterparts and keep raw pointers in their
/// signatures; marshalling and buffer ownership are the caller's job. Every
/// method that takes `dpy` expects a pointer previously returned by
/// `open_display` on the same adapter.
pub trait XAdapter: Send + Sync + fmt::Debug + 'static {
    /// `XOpenDisplay`. Fails with `DisplayUnavailable` on a null display.
    fn open_display(&self, name: Option<&CStr>) -> Result<*mut Display>;
    /// `XDisplayString`, copied out.
    fn display_string(&self, dpy: *mut Display) -> Vec<u8>;
    /// `XSynchronize`.
    fn synchronize(&self, dpy: *mut Display, onoff: bool);
    /// `XInternAtom`.
    fn intern_atom(&self, dpy: *mut Display, name: &CStr, only_if_exists: bool) -> Atom;
    /// `XInternAtoms`. Returns the raw status: non-zero when every atom was interned.
    ///
    /// # Safety
    /// `names` must hold `count` valid NUL-terminated strings and `atoms_return`
    /// must be writable for `count` atoms.
    unsafe fn intern_atoms(
        &self,
        dpy: *mut Display,
        names: *mut *mut c_char,
        count: c_int,
        only_if_exists: bool,
        atoms_return: *mut Atom,
    ) -> c_int;
    /// `XGetAtomName`. The returned string is server-allocated and must be
    /// released with `free`. Null when the atom has no name.
    fn get_atom_name(&self, dpy: *mut Display, atom: Atom) -> *mut c_char;
    /// `XFree`.
    ///
    /// # Safety
    /// `data` must have been allocated by this adapter and not freed yet.
    unsafe fn free(&self, data: *mut c_void);
    /// `XGetErrorText`.
    ///
    /// # Safety
    /// `buffer` must be writable for `length` bytes.
    unsafe fn get_error_text(&self, dpy: *mut Display, code: c_int, buffer: *mut c_char, length: c_int);
    /// `XUngrabKeyboard`.
    fn ungrab_keyboard(&self, dpy: *mut Display, time: Time) -> c_int;
    /// `XUngrabPointer`.
    fn ungrab_pointer(&self, dpy: *mut Display, time: Time) -> c_int;
}

/// A live implementation of `XAdapter` backed by a runtime-loaded libX11.
pub struct LiveXAdapter {
    xlib: Xlib,
}

// SAFETY: `Xlib` is a table of function pointers plus the library handle, all
// immutable after loading. `open` calls XInitThreads before any other X11
// operation, making xlib thread-safe, so the display can be used from any thread.
unsafe impl Send for LiveXAdapter {}
unsafe impl Sync for LiveXAdapter {}

impl LiveXAdapter {
    /// Loads libX11 and enables its thread support. A missing library means
    /// no display can be opened.
    pub fn open() -> Result<Self> {
        let xlib = Xlib::open()
            .map_err(|e| BindingError::DisplayUnavailable(format!("failed to load libX11: {}", e)))?;
        check_thread_init(unsafe { (xlib.XInitThreads)() })?;
        debug!("libX11 loaded, threads initialized");
        Ok(Self { xlib })
    }
}

/// Maps the `XInitThreads` status; zero means xlib has no thread support.
fn check_thread_init(status: c_int) -> Result<()> {
    if status == 0 {
        warn!("XInitThreads returned 0");
        return Err(BindingError::ThreadInitFailed);
    }
    Ok(())
}

impl fmt::Debug for LiveXAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveXAdapter").finish_non_exhaustive()
    }
}

impl XAdapter for LiveXAdapter {
    fn open_display(&self, name: Option<&CStr>) -> Result<*mut Display> {
        let name_ptr = name.map_or(std::ptr::null(), |s| s.as_ptr());
        let dpy = unsafe { (self.xlib.XOpenDisplay)(name_ptr) };
        if dpy.is_null() {
            Err(BindingError::DisplayUnavailable(format!(
                "XOpenDisplay failed for name: {:?}",
                name
            )))
        } else {
            Ok(dpy)
        }
    }

    fn display_string(&self, dpy: *mut Display) -> Vec<u8> {
        let ptr = unsafe { (self.xlib.XDisplayString)(dpy) };
        if ptr.is_null() {
            Vec::new()
        } else {
            // The string is owned by the Display structure; copy, never free.
            unsafe { CStr::from_ptr(ptr).to_bytes().to_vec() }
        }
    }

    fn synchronize(&self, dpy: *mut Display, onoff: bool) {
        let flag = if onoff { xlib::True } else { xlib::False };
        unsafe { (self.xlib.XSynchronize)(dpy, flag) };
    }

    fn intern_atom(&self, dpy: *mut Display, name: &CStr, only_if_exists: bool) -> Atom {
        let flag = if only_if_exists { xlib::True } else { xlib::False };
        unsafe { (self.xlib.XInternAtom)(dpy, name.as_ptr(), flag) }
    }

    unsafe fn intern_atoms(
        &self,
        dpy: *mut Display,
        names: *mut *mut c_char,
        count: c_int,
        only_if_exists: bool,
        atoms_return: *mut Atom,
    ) -> c_int {
        let flag = if only_if_exists { xlib::True } else { xlib::False };
        (self.xlib.XInternAtoms)(dpy, names, count, flag, atoms_return)
    }

    fn get_atom_name(&self, dpy: *mut Display, atom: Atom) -> *mut c_char {
        unsafe { (self.xlib.XGetAtomName)(dpy, atom) }
    }

    unsafe fn free(&self, data: *mut c_void) {
        (self.xlib.XFree)(data as *mut _);
    }

    unsafe fn get_error_text(&self, dpy: *mut Display, code: c_int, buffer: *mut c_char, length: c_int) {
        (self.xlib.XGetErrorText)(dpy, code, buffer, length);
    }

    fn ungrab_keyboard(&self, dpy: *mut Display, time: Time) -> c_int {
        unsafe { (self.xlib.XUngrabKeyboard)(dpy, time) }
    }

    fn ungrab_pointer(&self, dpy: *mut Display, time: Time) -> c_int {
        unsafe { (self.xlib.XUngrabPointer)(dpy, time) }
    }
}

// --- Mock ---

/// One call observed by `MockXAdapter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    OpenDisplay { name: Option<String> },
    DisplayString,
    Synchronize { onoff: bool },
    InternAtom { name: String, only_if_exists: bool },
    InternAtoms { names: Vec<String>, only_if_exists: bool },
    GetAtomName { atom: Atom },
    Free,
    GetErrorText { code: c_int, length: c_int },
    UngrabKeyboard { time: Time },
    UngrabPointer { time: Time },
}

/// Last predefined atom in the core protocol (`WM_TRANSIENT_FOR`).
const LAST_PREDEFINED_ATOM: Atom = 68;

const PREDEFINED_ATOMS: &[(&str, Atom)] = &[
    ("PRIMARY", 1),
    ("SECONDARY", 2),
    ("ATOM", 4),
    ("CARDINAL", 6),
    ("STRING", 31),
    ("WINDOW", 33),
    ("WM_NAME", 39),
    ("WM_TRANSIENT_FOR", LAST_PREDEFINED_ATOM),
];

const CORE_ERROR_TEXTS: &[(c_int, &str)] = &[
    (1, "BadRequest (invalid request code or no such operation)"),
    (2, "BadValue (integer parameter out of range for operation)"),
    (3, "BadWindow (invalid Window parameter)"),
    (4, "BadPixmap (invalid Pixmap parameter)"),
    (5, "BadAtom (invalid Atom parameter)"),
    (6, "BadCursor (invalid Cursor parameter)"),
    (7, "BadFont (invalid Font parameter)"),
    (8, "BadMatch (invalid parameter attributes)"),
    (9, "BadDrawable (invalid Pixmap or Window parameter)"),
    (10, "BadAccess (attempt to access private resource denied)"),
    (11, "BadAlloc (insufficient resources for operation)"),
    (12, "BadColor (invalid Colormap parameter)"),
    (13, "BadGC (invalid GC parameter)"),
    (14, "BadIDChoice (invalid resource ID chosen for this connection)"),
    (15, "BadName (named color or font does not exist)"),
    (16, "BadLength (poly request too large or internal Xlib length error)"),
    (17, "BadImplementation (server does not implement operation)"),
];

/// Mock implementation of the `XAdapter` trait for testing.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// binding owns the other.
#[derive(Debug, Clone)]
pub struct MockXAdapter {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    atoms: Arc<Mutex<HashMap<String, Atom>>>,
    next_atom_id: Arc<Mutex<Atom>>,
    error_texts: Arc<Mutex<HashMap<c_int, Vec<u8>>>>,
    // Addresses of strings handed out by `get_atom_name` and not yet freed.
    outstanding: Arc<Mutex<HashSet<usize>>>,
    unknown_frees: Arc<AtomicUsize>,
    display_name: Arc<Mutex<String>>,
    next_display: Arc<AtomicUsize>,
    fail_open: Arc<Mutex<Option<String>>>,
    fail_batch_intern: Arc<AtomicBool>,
}

impl MockXAdapter {
    /// Creates a mock server with the predefined atoms registered.
    pub fn new() -> Self {
        let atoms = PREDEFINED_ATOMS
            .iter()
            .map(|(name, atom)| (name.to_string(), *atom))
            .collect();
        let error_texts = CORE_ERROR_TEXTS
            .iter()
            .map(|(code, text)| (*code, text.as_bytes().to_vec()))
            .collect();
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            atoms: Arc::new(Mutex::new(atoms)),
            next_atom_id: Arc::new(Mutex::new(LAST_PREDEFINED_ATOM + 1)),
            error_texts: Arc::new(Mutex::new(error_texts)),
            outstanding: Arc::new(Mutex::new(HashSet::new())),
            unknown_frees: Arc::new(AtomicUsize::new(0)),
            display_name: Arc::new(Mutex::new(":0".to_string())),
            next_display: Arc::new(AtomicUsize::new(0x1000)),
            fail_open: Arc::new(Mutex::new(None)),
            fail_batch_intern: Arc::new(AtomicBool::new(false)),
        }
    }

    fn record_call(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Retrieves a copy of the recorded calls.
    pub fn get_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Clears the log of recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Number of `get_atom_name` strings not yet released through `free`.
    pub fn outstanding_buffers(&self) -> usize {
        self.outstanding.lock().unwrap().len()
    }

    /// Number of `free` calls on pointers this mock never handed out.
    pub fn unknown_frees(&self) -> usize {
        self.unknown_frees.load(Ordering::SeqCst)
    }

    /// Makes the next `open_display` calls fail with `reason`.
    pub fn fail_open(&self, reason: &str) {
        *self.fail_open.lock().unwrap() = Some(reason.to_string());
    }

    /// Makes `intern_atoms` report failure (status 0).
    pub fn fail_batch_intern(&self, fail: bool) {
        self.fail_batch_intern.store(fail, Ordering::SeqCst);
    }

    /// Overrides the text returned for `code`.
    pub fn set_error_text(&self, code: c_int, text: &[u8]) {
        self.error_texts.lock().unwrap().insert(code, text.to_vec());
    }

    /// Looks up an atom without recording a call.
    pub fn atom(&self, name: &str) -> Option<Atom> {
        self.atoms.lock().unwrap().get(name).copied()
    }

    fn get_or_create_atom(&self, name: &str, only_if_exists: bool) -> Atom {
        let mut atoms = self.atoms.lock().unwrap();
        if let Some(atom) = atoms.get(name) {
            return *atom;
        }
        if only_if_exists {
            return 0;
        }
        let mut next_atom = self.next_atom_id.lock().unwrap();
        let atom = *next_atom;
        *next_atom += 1;
        atoms.insert(name.to_string(), atom);
        atom
    }
}

impl Default for MockXAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(unused_variables)]
impl XAdapter for MockXAdapter {
    fn open_display(&self, name: Option<&CStr>) -> Result<*mut Display> {
        let name_str = name.map(|s| s.to_string_lossy().into_owned());
        self.record_call(RecordedCall::OpenDisplay {
            name: name_str.clone(),
        });
        if let Some(reason) = self.fail_open.lock().unwrap().clone() {
            return Err(BindingError::DisplayUnavailable(reason));
        }
        if let Some(name) = name_str {
            *self.display_name.lock().unwrap() = name;
        }
        // Any non-null, never-dereferenced address will do.
        Ok(self.next_display.fetch_add(0x10, Ordering::SeqCst) as *mut Display)
    }

    fn display_string(&self, dpy: *mut Display) -> Vec<u8> {
        self.record_call(RecordedCall::DisplayString);
        self.display_name.lock().unwrap().as_bytes().to_vec()
    }

    fn synchronize(&self, dpy: *mut Display, onoff: bool) {
        self.record_call(RecordedCall::Synchronize { onoff });
    }

    fn intern_atom(&self, dpy: *mut Display, name: &CStr, only_if_exists: bool) -> Atom {
        let name_str = name.to_string_lossy().into_owned();
        self.record_call(RecordedCall::InternAtom {
            name: name_str.clone(),
            only_if_exists,
        });
        self.get_or_create_atom(&name_str, only_if_exists)
    }

    unsafe fn intern_atoms(
        &self,
        dpy: *mut Display,
        names: *mut *mut c_char,
        count: c_int,
        only_if_exists: bool,
        atoms_return: *mut Atom,
    ) -> c_int {
        let count = count.max(0) as usize;
        let name_strs: Vec<String> = (0..count)
            .map(|i| CStr::from_ptr(*names.add(i)).to_string_lossy().into_owned())
            .collect();
        self.record_call(RecordedCall::InternAtoms {
            names: name_strs.clone(),
            only_if_exists,
        });

        if self.fail_batch_intern.load(Ordering::SeqCst) {
            for i in 0..count {
                *atoms_return.add(i) = 0;
            }
            return 0;
        }

        let mut all_interned = true;
        for (i, name) in name_strs.iter().enumerate() {
            let atom = self.get_or_create_atom(name, only_if_exists);
            all_interned &= atom != 0;
            *atoms_return.add(i) = atom;
        }
        all_interned as c_int
    }

    fn get_atom_name(&self, dpy: *mut Display, atom: Atom) -> *mut c_char {
        self.record_call(RecordedCall::GetAtomName { atom });
        let name = self
            .atoms
            .lock()
            .unwrap()
            .iter()
            .find(|(_, id)| **id == atom)
            .map(|(name, _)| name.clone());
        match name.and_then(|n| CString::new(n).ok()) {
            Some(cstring) => {
                let ptr = cstring.into_raw();
                self.outstanding.lock().unwrap().insert(ptr as usize);
                ptr
            }
            None => std::ptr::null_mut(),
        }
    }

    unsafe fn free(&self, data: *mut c_void) {
        self.record_call(RecordedCall::Free);
        if self.outstanding.lock().unwrap().remove(&(data as usize)) {
            drop(CString::from_raw(data as *mut c_char));
        } else {
            warn!("MockXAdapter::free called on unknown pointer {:p}", data);
            self.unknown_frees.fetch_add(1, Ordering::SeqCst);
        }
    }

    unsafe fn get_error_text(&self, dpy: *mut Display, code: c_int, buffer: *mut c_char, length: c_int) {
        self.record_call(RecordedCall::GetErrorText { code, length });
        if length <= 0 {
            return;
        }
        // Xlib falls back to the decimal code for anything it cannot name.
        let text = self
            .error_texts
            .lock()
            .unwrap()
            .get(&code)
            .cloned()
            .unwrap_or_else(|| code.to_string().into_bytes());
        let n = text.len().min(length as usize - 1);
        std::ptr::copy_nonoverlapping(text.as_ptr() as *const c_char, buffer, n);
        *buffer.add(n) = 0;
    }

    fn ungrab_keyboard(&self, dpy: *mut Display, time: Time) -> c_int {
        self.record_call(RecordedCall::UngrabKeyboard { time });
        1
    }

    fn ungrab_pointer(&self, dpy: *mut Display, time: Time) -> c_int {
        self.record_call(RecordedCall::UngrabPointer { time });
        1
    }
}
