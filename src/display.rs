// src/display.rs

//! The process's connection to the X server.

use std::ffi::CString;
use std::sync::atomic::{AtomicPtr, Ordering};

use log::{debug, info, warn};

use crate::config::BindingConfig;
use crate::error::{BindingError, Result};
use crate::xadapter::{Display, XAdapter};

/// Owns the raw `*mut Display` for the lifetime of the process.
///
/// The handle is never closed by the binding: there is no teardown operation
/// and dropping a `DisplayHandle` leaves the connection open. The pointer is
/// only ever replaced by null, through `invalidate`, when something outside
/// the binding has closed the connection.
#[derive(Debug)]
pub struct DisplayHandle {
    ptr: AtomicPtr<Display>,
    name: Vec<u8>,
    synchronized: bool,
}

impl DisplayHandle {
    /// Opens the display described by `config` through `adapter`.
    ///
    /// Runs the platform check first, then resolves the display name once.
    /// When `config.synchronize` is set the connection is switched to
    /// synchronous mode here and never toggled again.
    pub fn open<A: XAdapter>(adapter: &A, config: &BindingConfig) -> Result<Self> {
        config.check_platform()?;

        let requested = config
            .display
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| {
                BindingError::DisplayUnavailable("DISPLAY contains an interior NUL byte".to_string())
            })?;
        info!(
            "Opening X display {}",
            config.display.as_deref().unwrap_or("<default>")
        );
        let dpy = adapter.open_display(requested.as_deref())?;
        if dpy.is_null() {
            return Err(BindingError::DisplayUnavailable(
                "display source returned a null display".to_string(),
            ));
        }

        let name = adapter.display_string(dpy);
        debug!(
            "X display {:p} opened as {:?}",
            dpy,
            String::from_utf8_lossy(&name)
        );

        if config.synchronize {
            warn!("X11 synchronous mode enabled: protocol errors are reported eagerly at a throughput cost");
            adapter.synchronize(dpy, true);
        }

        Ok(DisplayHandle {
            ptr: AtomicPtr::new(dpy),
            name,
            synchronized: config.synchronize,
        })
    }

    /// The raw display pointer, or `DisplayClosed` once the handle has been
    /// invalidated.
    #[inline]
    pub fn raw(&self) -> Result<*mut Display> {
        let ptr = self.ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            Err(BindingError::DisplayClosed)
        } else {
            Ok(ptr)
        }
    }

    /// The display name as resolved at construction.
    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[inline]
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn is_closed(&self) -> bool {
        self.ptr.load(Ordering::Acquire).is_null()
    }

    /// Records that the connection was closed elsewhere, for example from an
    /// Xlib IO error handler. Every later operation fails with `DisplayClosed`.
    pub fn invalidate(&self) {
        let previous = self.ptr.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if previous.is_null() {
            debug!("DisplayHandle::invalidate called on an already closed handle");
        } else {
            warn!("X display {:p} invalidated; binding operations will now fail", previous);
        }
    }
}
