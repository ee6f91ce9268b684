//! Logging macros wrapping [`Context::log_msg`](crate::Context::log_msg).
//!
//! The `code` argument takes a [`MessageCode`](crate::MessageCode) or
//! `None` for diagnostics without a registered identifier.

/// Logs a fatal or recoverable error.
#[macro_export]
macro_rules! log_err {
    ($ctx:expr, $code:expr, $($arg:tt)*) => {
        $ctx.log_msg(
            $crate::context::LogLevel::Error,
            $code,
            core::format_args!($($arg)*),
        )
    };
}

/// Logs a warning; compilation proceeds.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $code:expr, $($arg:tt)*) => {
        $ctx.log_msg(
            $crate::context::LogLevel::Warning,
            $code,
            core::format_args!($($arg)*),
        )
    };
}

/// Logs an informational message.
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $code:expr, $($arg:tt)*) => {
        $ctx.log_msg(
            $crate::context::LogLevel::Info,
            $code,
            core::format_args!($($arg)*),
        )
    };
}

/// Logs a verbose debug message, gated by the context verbosity.
#[macro_export]
macro_rules! log_vrb {
    ($ctx:expr, $vrb:expr, $code:expr, $($arg:tt)*) => {
        $ctx.log_vrb($vrb, $code, core::format_args!($($arg)*))
    };
}
