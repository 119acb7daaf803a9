//! Process-wide startup and shutdown.
//!
//! The host application calls [`startup`] once before creating engines and
//! [`shutdown`] when done. Calls nest: only the first `startup` installs
//! logging and metrics, and only the matching last `shutdown` tears down.

use std::sync::Mutex;

use tracing::info;

use crate::config::NetworkConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::logging::init_logging;
use crate::utils::metrics::{global_metrics, init_metrics};

static REFS: Mutex<usize> = Mutex::new(0);

fn lock() -> Result<std::sync::MutexGuard<'static, usize>> {
    REFS.lock()
        .map_err(|_| ProtocolError::Custom("Runtime state lock poisoned".into()))
}

/// Initialize process-wide state. Re-entrant; each call must be paired with
/// a [`shutdown`].
///
/// # Errors
/// `ConfigError` if the first call gets an invalid configuration; the
/// reference count is left unchanged in that case.
pub fn startup(config: &NetworkConfig) -> Result<()> {
    let mut refs = lock()?;
    if *refs == 0 {
        config.validate_strict()?;
        init_logging(&config.logging)?;
        init_metrics();
        info!(app = %config.logging.app_name, "Runtime started");
    }
    *refs += 1;
    Ok(())
}

/// Release one [`startup`] reference. Returns false if the runtime was not
/// started.
pub fn shutdown() -> bool {
    let Ok(mut refs) = lock() else {
        return false;
    };
    if *refs == 0 {
        return false;
    }
    *refs -= 1;
    if *refs == 0 {
        global_metrics().log_metrics();
        info!("Runtime stopped");
    }
    true
}

pub fn is_running() -> bool {
    lock().map(|refs| *refs > 0).unwrap_or(false)
}

/// Number of outstanding [`startup`] calls
pub fn ref_count() -> usize {
    lock().map(|refs| *refs).unwrap_or(0)
}
