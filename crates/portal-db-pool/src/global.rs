//! Optional process-wide manager
//!
//! Applications that want a single shared manager install it once at
//! startup. Libraries should take a [`PoolManager`] parameter instead.

use crate::error::{PoolError, PoolResult};
use crate::manager::PoolManager;
use once_cell::sync::OnceCell;

static MANAGER: OnceCell<PoolManager> = OnceCell::new();

/// Install the process-wide manager.
///
/// Fails with [`PoolError::AlreadyInitialized`] on every call after the
/// first; the rejected manager is dropped.
pub fn init(manager: PoolManager) -> PoolResult<&'static PoolManager> {
	MANAGER
		.set(manager)
		.map_err(|_| PoolError::AlreadyInitialized)?;
	MANAGER.get().ok_or(PoolError::AlreadyInitialized)
}

pub fn get() -> Option<&'static PoolManager> {
	MANAGER.get()
}

/// The process-wide manager, or [`PoolError::NotInitialized`] before
/// [`init`] succeeded
pub fn try_get() -> PoolResult<&'static PoolManager> {
	get().ok_or(PoolError::NotInitialized)
}
