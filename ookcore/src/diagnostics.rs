//! Gate for the codec's verbose protocol-level tracing.
//!
//! Mirrors the env-presence check in the original `debug.h`: tracing is off
//! unless `OOK_DECODE_DEBUG` is set in the environment, with a constructor
//! override for callers (and tests) that want it on or off regardless of the
//! process environment.

use std::sync::OnceLock;

const ENV_VAR: &str = "OOK_DECODE_DEBUG";

static ENV_ENABLED: OnceLock<bool> = OnceLock::new();

fn env_enabled() -> bool {
    *ENV_ENABLED.get_or_init(|| std::env::var_os(ENV_VAR).is_some())
}

/// Gates the codec's `debug`/`trace` logging. Cheap to clone; carried by
/// value inside [`crate::Demod`] and [`crate::Mod`].
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    enabled: bool,
}

impl Diagnostics {
    /// Resolves from the environment: on iff `OOK_DECODE_DEBUG` is set,
    /// cached for the life of the process after the first call.
    pub fn from_env() -> Self {
        Diagnostics {
            enabled: env_enabled(),
        }
    }

    /// Bypasses the environment entirely with an explicit setting.
    pub fn forced(enabled: bool) -> Self {
        Diagnostics { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn debug(&self, args: std::fmt::Arguments) {
        if self.enabled {
            log::debug!("{args}");
        }
    }

    pub fn trace(&self, args: std::fmt::Arguments) {
        if self.enabled {
            log::trace!("{args}");
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics::from_env()
    }
}

/// Routes through [`Diagnostics::debug`] without requiring the caller to
/// build a `std::fmt::Arguments` by hand.
macro_rules! diag_debug {
    ($diag:expr, $($arg:tt)*) => {
        $diag.debug(format_args!($($arg)*))
    };
}

/// Routes through [`Diagnostics::trace`] without requiring the caller to
/// build a `std::fmt::Arguments` by hand.
macro_rules! diag_trace {
    ($diag:expr, $($arg:tt)*) => {
        $diag.trace(format_args!($($arg)*))
    };
}

pub(crate) use diag_debug;
pub(crate) use diag_trace;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_overrides_bypass_env() {
        let on = Diagnostics::forced(true);
        let off = Diagnostics::forced(false);
        assert!(on.is_enabled());
        assert!(!off.is_enabled());
    }

    #[test]
    fn macros_compile_against_forced_diagnostics() {
        let diag = Diagnostics::forced(true);
        diag_debug!(diag, "value = {}", 42);
        diag_trace!(diag, "no args here");
    }
}
