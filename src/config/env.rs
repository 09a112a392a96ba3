// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment-variable configuration provider.
//!
//! Variables are read once at construction.  A double underscore
//! separates key-path segments so that single underscores survive
//! inside segment names:
//!
//! `GATEHOUSE_PROXY__CLIENT_ID=abc` → `proxy.client_id = "abc"`
//!
//! Values that parse as JSON (numbers, booleans, arrays, objects) are
//! taken as such; everything else is a string.

use std::collections::HashMap;
use std::env;

use serde_json::Value;

use super::{ConfigError, ConfigProvider};

const DEFAULT_PREFIX: &str = "GATEHOUSE_";
const SEGMENT_SEPARATOR: &str = "__";

#[derive(Debug)]
pub struct EnvConfigProvider {
    prefix: String,
    values: HashMap<String, String>,
}

impl EnvConfigProvider {
    pub fn new(prefix: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.to_string(),
            values: HashMap::new(),
        };
        provider.refresh();
        provider
    }

    /// Re-read the process environment.
    pub fn refresh(&mut self) {
        self.values.clear();
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(&self.prefix) {
                let key_path = stripped
                    .to_lowercase()
                    .split(SEGMENT_SEPARATOR)
                    .collect::<Vec<_>>()
                    .join(".");
                self.values.insert(key_path, value);
            }
        }
    }

    fn parse_value(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn has(&self, key: &str) -> bool {
        // Either the key itself or a nested key under it exists.
        self.values.contains_key(key)
            || self
                .values
                .keys()
                .any(|k| k.starts_with(&format!("{key}.")))
    }

    fn provider_name(&self) -> &str {
        "env"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        if let Some(raw) = self.values.get(key) {
            return Ok(Some(Self::parse_value(raw)));
        }

        // Assemble an object from nested keys, so `get("proxy")` sees
        // every GATEHOUSE_PROXY__* variable.
        let nested_prefix = format!("{key}.");
        let mut object = serde_json::Map::new();
        for (full_key, raw) in &self.values {
            if let Some(rest) = full_key.strip_prefix(&nested_prefix) {
                insert_path(&mut object, rest, Self::parse_value(raw));
            }
        }

        if object.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Object(object)))
        }
    }
}

fn insert_path(object: &mut serde_json::Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = object
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}
