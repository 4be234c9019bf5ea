//! Logging macros that compile to nothing when the calling module turns its
//! logs off.
//!
//! Every module that uses them declares its own switch and, usually, a target:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TARGET: &str = "fieldlogger::cell";
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!(target: LOG_TARGET, "Listening for telephony events");
//! log_warn!("No target given, the module path is used");
//! ```
//! Arguments are passed through to the matching `log` macro unchanged, so
//! both the `target:` form and the plain form work.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Errors are still gated: a module with logs off stays silent.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    const ENABLE_LOGS: bool = false;
    const LOG_TARGET: &str = "fieldlogger::test";

    #[test]
    fn both_forms_expand() {
        let mut evaluated = false;
        crate::log_info!(target: LOG_TARGET, "tick {}", 1);
        crate::log_warn!("plain {}", {
            evaluated = true;
            2
        });
        crate::log_debug!(target: LOG_TARGET, "debug");
        crate::log_error!("error");
        assert!(!evaluated);
    }
}
