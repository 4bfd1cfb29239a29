//! Process-wide backend initialisation.
//!
//! Each backend is initialised at most once per process. Initialisation
//! hands the backend the [`HostLockManager`] so its internal cross-context
//! locking goes through our mutex primitive.

use crate::backend::MediaBackend;
use crate::error::Result;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Lock handed to a backend.
#[derive(Debug, Default)]
pub struct BackendLock {
    inner: Mutex<()>,
}

impl BackendLock {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock()
    }
}

/// Creates locks for backends that need global mutual exclusion.
#[derive(Debug, Default)]
pub struct HostLockManager {
    created: AtomicUsize,
}

impl HostLockManager {
    pub fn create_lock(&self) -> Arc<BackendLock> {
        self.created.fetch_add(1, Ordering::Relaxed);
        Arc::new(BackendLock::default())
    }

    /// Number of locks handed out so far.
    pub fn locks_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

static LOCK_MANAGER: Lazy<HostLockManager> = Lazy::new(HostLockManager::default);

static INITIALIZED: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));

pub fn lock_manager() -> &'static HostLockManager {
    &LOCK_MANAGER
}

/// Run `backend`'s one-time initialisation if it has not run yet.
///
/// A failed initialisation is not recorded, so the next open retries it.
pub fn ensure_initialized(backend: &dyn MediaBackend) -> Result<()> {
    let mut initialized = INITIALIZED.lock();
    if initialized.contains(backend.name()) {
        debug!(backend = backend.name(), "Backend already initialized");
        return Ok(());
    }

    backend.initialize(lock_manager())?;
    initialized.insert(backend.name());
    info!(backend = backend.name(), "Backend initialized");
    Ok(())
}

pub fn is_initialized(name: &str) -> bool {
    INITIALIZED.lock().contains(name)
}
