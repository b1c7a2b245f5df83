// src/arena.rs

//! Scoped native arrays for bulk Xlib calls.
//!
//! `XInternAtoms` wants a C array of string pointers and a C array to write
//! atoms into. `ForeignBufferArena` allocates those with the C allocator and
//! hands them out as `ForeignArray` guards that free on drop, so a batch call
//! releases its arrays on every exit path. The arena only counts; it owns no
//! memory between calls.

use std::ffi::CString;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::c_char;
use log::trace;

use crate::error::{BindingError, Result};
use crate::xadapter::Atom;

/// Element types that may live in a `ForeignArray`.
///
/// # Safety
/// The all-zero bit pattern must be a valid value of the type, since arrays
/// start out `calloc`-zeroed.
pub unsafe trait ForeignElement: Copy {
    const NAME: &'static str;
}

unsafe impl ForeignElement for *mut c_char {
    const NAME: &'static str = "*mut c_char";
}

unsafe impl ForeignElement for Atom {
    const NAME: &'static str = "Atom";
}

/// Allocation counters of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    pub allocated: usize,
    pub released: usize,
}

impl ArenaStats {
    /// Arrays allocated and not yet released.
    pub fn live(&self) -> usize {
        self.allocated - self.released
    }
}

#[derive(Debug, Default)]
pub struct ForeignBufferArena {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl ForeignBufferArena {
    pub const fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Allocates a zeroed native array of `len` elements.
    pub fn alloc<T: ForeignElement>(&self, len: usize) -> Result<ForeignArray<'_, T>> {
        let failed = || BindingError::AllocationFailed { what: T::NAME, len };
        // calloc(0, ..) may legitimately return null; always ask for one slot.
        let raw = unsafe { libc::calloc(len.max(1), std::mem::size_of::<T>()) } as *mut T;
        let ptr = NonNull::new(raw).ok_or_else(failed)?;
        self.allocated.fetch_add(1, Ordering::SeqCst);
        trace!("arena: allocated {} x {} at {:p}", len, T::NAME, raw);
        Ok(ForeignArray {
            ptr,
            len,
            arena: self,
            _marker: PhantomData,
        })
    }

    /// Encodes `names` and builds the `char **` array Xlib expects. The array
    /// has one extra slot, left null as a terminator.
    pub fn c_string_array(&self, names: &[&str]) -> Result<CStringArray<'_>> {
        let owned = names
            .iter()
            .map(|name| {
                CString::new(*name).map_err(|_| BindingError::InvalidAtomName(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut pointers = self.alloc::<*mut c_char>(owned.len() + 1)?;
        for (slot, name) in pointers.as_mut_slice().iter_mut().zip(&owned) {
            // Xlib's prototype is not const-correct; it never writes through these.
            *slot = name.as_ptr() as *mut c_char;
        }
        Ok(CStringArray {
            _owned: owned,
            pointers,
        })
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            allocated: self.allocated.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }
}

/// A `calloc`ed array released with `free` when dropped.
#[derive(Debug)]
pub struct ForeignArray<'a, T: ForeignElement> {
    ptr: NonNull<T>,
    len: usize,
    arena: &'a ForeignBufferArena,
    _marker: PhantomData<T>,
}

impl<T: ForeignElement> ForeignArray<'_, T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: `len` zero-initialised elements, valid per `ForeignElement`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: ForeignElement> Drop for ForeignArray<'_, T> {
    fn drop(&mut self) {
        unsafe { libc::free(self.ptr.as_ptr() as *mut libc::c_void) };
        self.arena.released.fetch_add(1, Ordering::SeqCst);
        trace!("arena: released {} x {} at {:p}", self.len, T::NAME, self.ptr);
    }
}

/// NUL-terminated copies of a batch of names plus the native pointer array
/// referencing them. The pointers never outlive the copies.
#[derive(Debug)]
pub struct CStringArray<'a> {
    _owned: Vec<CString>,
    pointers: ForeignArray<'a, *mut c_char>,
}

impl CStringArray<'_> {
    /// Number of names, not counting the terminating slot.
    pub fn count(&self) -> usize {
        self.pointers.len() - 1
    }

    pub fn as_mut_ptr(&mut self) -> *mut *mut c_char {
        self.pointers.as_mut_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn arrays_are_zeroed_and_released_on_drop() {
        let arena = ForeignBufferArena::new();
        {
            let atoms = arena.alloc::<Atom>(4).unwrap();
            assert_eq!(atoms.as_slice(), &[0, 0, 0, 0]);
            assert_eq!(arena.stats().live(), 1);
        }
        assert_eq!(
            arena.stats(),
            ArenaStats {
                allocated: 1,
                released: 1
            }
        );
    }

    #[test]
    fn zero_length_allocation_still_succeeds() {
        let arena = ForeignBufferArena::new();
        let empty = arena.alloc::<Atom>(0).unwrap();
        assert!(empty.is_empty());
        drop(empty);
        assert_eq!(arena.stats().live(), 0);
    }

    #[test]
    fn c_string_array_is_null_terminated() {
        let arena = ForeignBufferArena::new();
        let mut array = arena.c_string_array(&["WM_NAME", "_NET_WM_PID"]).unwrap();
        assert_eq!(array.count(), 2);
        let ptr = array.as_mut_ptr();
        unsafe {
            assert_eq!(CStr::from_ptr(*ptr).to_bytes(), b"WM_NAME");
            assert_eq!(CStr::from_ptr(*ptr.add(1)).to_bytes(), b"_NET_WM_PID");
            assert!((*ptr.add(2)).is_null());
        }
        drop(array);
        assert_eq!(arena.stats().live(), 0);
    }

    #[test]
    fn interior_nul_is_rejected_before_allocating() {
        let arena = ForeignBufferArena::new();
        let err = arena.c_string_array(&["OK", "BAD\0NAME"]).unwrap_err();
        assert!(matches!(err, BindingError::InvalidAtomName(_)));
        assert_eq!(arena.stats().allocated, 0);
    }
}
