// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging for the proxy.
//!
//! Two sinks share one macro surface: plain `log`/`env_logger` output
//! for development, or a structured `slog` drain (terminal or JSON)
//! when `logging.structured` is enabled.  Code never picks a sink; it
//! uses the `*_fmt!` macros and [`audit`] helpers and the active drain
//! decides the shape.

pub mod audit;
pub mod config;
pub mod structured;
pub mod wrapper;


pub use config::{LogFormat, LoggingConfig};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use log::{debug, error, info, warn, LevelFilter};

static INIT: Once = Once::new();
static STRUCTURED: AtomicBool = AtomicBool::new(false);

/// Is the structured (slog) sink active?  Read by the wrapper macros
/// on every emission; set once during init.
pub fn is_structured_logging() -> bool {
    STRUCTURED.load(Ordering::Relaxed)
}

/// Initialize plain env_logger output.  Idempotent.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| {
        let env = env_logger::Env::default().filter_or(
            "RUST_LOG",
            level.map_or("info", |l| match l {
                LevelFilter::Trace => "trace",
                LevelFilter::Debug => "debug",
                LevelFilter::Info => "info",
                LevelFilter::Warn => "warn",
                LevelFilter::Error => "error",
                LevelFilter::Off => "off",
            }),
        );

        // try_init: embedders (and the test harness) may already have
        // installed a logger; theirs wins.
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_target(true)
            .try_init();

        info!("Logging initialized at level: {}", log::max_level());
    });
}

/// Initialize from configuration, choosing the structured sink when
/// requested.  Idempotent.
pub fn init_with_config(level: Option<LevelFilter>, config: LoggingConfig) {
    if config.structured {
        INIT.call_once(|| {
            structured::init(&config);
            STRUCTURED.store(true, Ordering::Relaxed);
        });
    } else {
        init(level);
    }
}

/// Log an error with context and hand the error back, for use inside
/// `map_err` chains.
pub fn log_error<E: std::fmt::Display>(context: &str, err: E) -> E {
    error!("{}: {}", context, err);
    err
}

pub fn log_warning<M: std::fmt::Display>(context: &str, msg: M) {
    warn!("{}: {}", context, msg);
}

pub fn log_info<M: std::fmt::Display>(context: &str, msg: M) {
    info!("{}: {}", context, msg);
}

pub fn log_debug<M: std::fmt::Display>(context: &str, msg: M) {
    debug!("{}: {}", context, msg);
}
