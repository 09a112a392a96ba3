// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Output shape of the structured sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable terminal output
    #[default]
    Terminal,
    /// Machine-parseable JSON lines
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Route everything through the slog drain instead of env_logger.
    #[serde(default)]
    pub structured: bool,

    #[serde(default)]
    pub format: LogFormat,

    /// "trace" … "error"; empty falls back to "info".
    #[serde(default)]
    pub level: String,

    /// Key/value pairs stamped onto every structured record
    /// (deployment name, region, …).
    #[serde(default)]
    pub static_fields: HashMap<String, String>,
}

impl LoggingConfig {
    pub fn slog_level(&self) -> slog::Level {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" => slog::Level::Trace,
            "debug" => slog::Level::Debug,
            "warn" | "warning" => slog::Level::Warning,
            "error" => slog::Level::Error,
            _ => slog::Level::Info,
        }
    }
}
