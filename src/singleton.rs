// src/singleton.rs

//! The process-wide binding.
//!
//! `ProcessBinding` owns at most one `CoreBinding` per process. It starts
//! `Unbound`, becomes `Bound` on the first successful access and never goes
//! back. The context guard lives outside the cell so it can be installed
//! before the display is ever opened.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{error, info};
use once_cell::sync::{Lazy, OnceCell};
use serde::Serialize;

use crate::binding::CoreBinding;
use crate::config::BindingConfig;
use crate::error::Result;
use crate::guard::ContextGuard;
use crate::xadapter::{LiveXAdapter, XAdapter};

/// Builds the adapter on first access.
pub type AdapterFactory<A> = fn() -> Result<A>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BindingState {
    Unbound,
    Bound,
}

pub struct ProcessBinding<A: XAdapter> {
    cell: OnceCell<CoreBinding<A>>,
    guard: Lazy<Arc<ContextGuard>>,
    factory: AdapterFactory<A>,
    constructions: AtomicUsize,
}

fn empty_guard() -> Arc<ContextGuard> {
    Arc::new(ContextGuard::new())
}

impl<A: XAdapter> ProcessBinding<A> {
    pub const fn new(factory: AdapterFactory<A>) -> Self {
        Self {
            cell: OnceCell::new(),
            guard: Lazy::new(empty_guard),
            factory,
            constructions: AtomicUsize::new(0),
        }
    }

    /// Returns the binding, opening the display from the environment on first
    /// access.
    pub fn get(&self) -> Result<&CoreBinding<A>> {
        if let Some(binding) = self.cell.get() {
            return Ok(binding);
        }
        self.get_with_config(&BindingConfig::from_env())
    }

    /// Returns the binding, opening the display with `config` on first access.
    /// `config` is ignored once the binding is `Bound`.
    pub fn get_with_config(&self, config: &BindingConfig) -> Result<&CoreBinding<A>> {
        self.cell.get_or_try_init(|| {
            info!("Binding X11 core on first access");
            let adapter = (self.factory)()?;
            let binding = CoreBinding::with_guard(adapter, config, Arc::clone(&*self.guard))
                .map_err(|e| {
                    error!("Failed to bind X11 display: {}", e);
                    e
                })?;
            self.constructions.fetch_add(1, Ordering::SeqCst);
            info!("{} bound", binding);
            Ok(binding)
        })
    }

    pub fn state(&self) -> BindingState {
        if self.cell.get().is_some() {
            BindingState::Bound
        } else {
            BindingState::Unbound
        }
    }

    /// Number of display handles constructed; never more than one.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn context_guard(&self) -> &Arc<ContextGuard> {
        &*self.guard
    }

    /// Installs the process-wide context check, bound or not.
    pub fn set_context_check<F>(&self, check: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.guard.set(check);
    }

    pub fn clear_context_check(&self) {
        self.guard.clear();
    }
}

static CORE: ProcessBinding<LiveXAdapter> = ProcessBinding::new(LiveXAdapter::open);

/// The process's binding to its X display.
pub fn core() -> Result<&'static CoreBinding<LiveXAdapter>> {
    CORE.get()
}

/// Installs the context check run before every operation on `core()`.
pub fn set_context_check<F>(check: F)
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    CORE.set_context_check(check);
}

pub fn clear_context_check() {
    CORE.clear_context_check();
}

pub fn state() -> BindingState {
    CORE.state()
}
