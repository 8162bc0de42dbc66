//! Process-wide cancellation flag.
//!
//! Set from the SIGINT/SIGTERM handler installed by the binary; the session
//! loop checks it between units and stops with a `cancelled` result.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Request a cooperative shutdown (idempotent).
#[inline]
pub fn request() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Check whether a shutdown has been requested.
#[inline]
pub fn is_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Route Ctrl-C and termination signals to [`request`].
pub fn install_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(request)
}
