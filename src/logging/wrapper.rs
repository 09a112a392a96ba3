// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Context-carrying log macros.
//!
//! `error_fmt!("Callback", "bad state: {}", err)` renders as
//! `Callback: bad state: …` on the plain sink and as a message with a
//! `context` field on the structured sink.  Every module in the crate
//! logs through these.

/// Log an error with a context tag.
#[macro_export]
macro_rules! error_fmt {
    ($context:expr, $($arg:tt)+) => {
        if $crate::logging::is_structured_logging() {
            slog_scope::error!("{}", format_args!($($arg)+); "context" => $context);
        } else {
            log::error!("{}: {}", $context, format_args!($($arg)+));
        }
    };
}

/// Log a warning with a context tag.
#[macro_export]
macro_rules! warn_fmt {
    ($context:expr, $($arg:tt)+) => {
        if $crate::logging::is_structured_logging() {
            slog_scope::warn!("{}", format_args!($($arg)+); "context" => $context);
        } else {
            log::warn!("{}: {}", $context, format_args!($($arg)+));
        }
    };
}

/// Log an info message with a context tag.
#[macro_export]
macro_rules! info_fmt {
    ($context:expr, $($arg:tt)+) => {
        if $crate::logging::is_structured_logging() {
            slog_scope::info!("{}", format_args!($($arg)+); "context" => $context);
        } else {
            log::info!("{}: {}", $context, format_args!($($arg)+));
        }
    };
}

/// Log a debug message with a context tag.
#[macro_export]
macro_rules! debug_fmt {
    ($context:expr, $($arg:tt)+) => {
        if $crate::logging::is_structured_logging() {
            slog_scope::debug!("{}", format_args!($($arg)+); "context" => $context);
        } else {
            log::debug!("{}: {}", $context, format_args!($($arg)+));
        }
    };
}

/// Log a trace message with a context tag.
#[macro_export]
macro_rules! trace_fmt {
    ($context:expr, $($arg:tt)+) => {
        if $crate::logging::is_structured_logging() {
            slog_scope::trace!("{}", format_args!($($arg)+); "context" => $context);
        } else {
            log::trace!("{}: {}", $context, format_args!($($arg)+));
        }
    };
}
