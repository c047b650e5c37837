//! Structured logging shared by every polydrive crate
//!
//! Output goes to stderr through `emit_term` and is configured by the
//! POLYDRIVE_LOG environment variable:
//! - POLYDRIVE_LOG=off (default) - no logs
//! - POLYDRIVE_LOG=error | warn - failures and dropped operations
//! - POLYDRIVE_LOG=info - conflicts, reorders, replication links
//! - POLYDRIVE_LOG=debug - every applied batch, pool and wakeup traffic

use std::sync::Once;

// Re-export emit so the macros resolve from any crate
pub use emit;

/// Environment variable holding the minimum log level
pub const LOG_ENV: &str = "POLYDRIVE_LOG";

static INIT: Once = Once::new();

/// Parse a POLYDRIVE_LOG value. `None` means logging stays off.
pub fn parse_level(value: &str) -> Result<Option<emit::Level>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(None),
        "debug" => Ok(Some(emit::Level::Debug)),
        "info" => Ok(Some(emit::Level::Info)),
        "warn" => Ok(Some(emit::Level::Warn)),
        "error" => Ok(Some(emit::Level::Error)),
        other => Err(other.to_string()),
    }
}

/// Initialize diagnostics from POLYDRIVE_LOG
///
/// Safe to call any number of times; only the first call configures the
/// emitter. Tests call it freely.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV).unwrap_or_default();
        let (level, unknown) = match parse_level(&raw) {
            Ok(None) => return,
            Ok(Some(level)) => (level, None),
            Err(value) => (emit::Level::Info, Some(value)),
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if let Some(value) = unknown {
            emit::warn!("unknown {var} value {value}, using info", var: LOG_ENV, value);
        }

        // The runtime flushes on drop; logging lives for the whole process.
        std::mem::forget(rt);
    });
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        init_diagnostics();
        init_diagnostics();
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("off").unwrap(), None);
        assert_eq!(parse_level("").unwrap(), None);
        assert_eq!(parse_level("DEBUG").unwrap(), Some(emit::Level::Debug));
        assert_eq!(parse_level(" warn ").unwrap(), Some(emit::Level::Warn));
        assert_eq!(parse_level("chatty").unwrap_err(), "chatty");
    }

    #[test]
    fn test_macros_compile() {
        info!("apply {count} nodes", count: 3);
        warn!("dropped {path}", path: "/x");
        error!("Error message");
        debug!("Debug message");
    }
}
