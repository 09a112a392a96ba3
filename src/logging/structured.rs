// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured logging – the slog drain.

use once_cell::sync::OnceCell;
use slog::{o, Drain, Logger};
use slog_async::Async;
use slog_json::Json;
use slog_term::{CompactFormat, TermDecorator};
use uuid::Uuid;

use crate::logging::config::{LogFormat, LoggingConfig};

// Dropping the guard would tear the global logger down; park it for
// the life of the process.
static GUARD: OnceCell<slog_scope::GlobalLoggerGuard> = OnceCell::new();

/// Install the global slog logger described by `config`.
pub fn init(config: &LoggingConfig) {
    let level = config.slog_level();

    let mut logger = match config.format {
        LogFormat::Json => {
            let json = Json::new(std::io::stdout())
                .add_default_keys()
                .build()
                .fuse();
            let drain = Async::new(json.filter_level(level).fuse()).build().fuse();
            Logger::root(drain, o!("service" => "gatehouse"))
        }
        LogFormat::Terminal => {
            let decorator = TermDecorator::new().build();
            let term = CompactFormat::new(decorator).build().fuse();
            let drain = Async::new(term.filter_level(level).fuse()).build().fuse();
            Logger::root(drain, o!("service" => "gatehouse"))
        }
    };

    for (key, value) in &config.static_fields {
        logger = logger.new(o!(key.clone() => value.clone()));
    }

    let _ = GUARD.set(slog_scope::set_global_logger(logger));
}

/// Fresh opaque id for correlating the records of one request.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}
