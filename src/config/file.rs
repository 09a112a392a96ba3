// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File-based configuration provider: JSON, TOML or YAML, detected by
//! extension.  Parsed once into a JSON tree at construction.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{ConfigError, ConfigProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Yaml,
}

impl FileFormat {
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path
            .extension()?
            .to_string_lossy()
            .to_lowercase()
            .as_str()
        {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "yaml" | "yml" => Some(FileFormat::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
    root: Value,
}

impl FileConfigProvider {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let path_buf = PathBuf::from(path);
        let format = FileFormat::from_extension(&path_buf).ok_or_else(|| {
            ConfigError::provider_error("file", format!("unsupported file format: {path}"))
        })?;

        let content = fs::read_to_string(&path_buf).map_err(|e| {
            ConfigError::provider_error("file", format!("failed to read {path}: {e}"))
        })?;

        let root = Self::parse(&content, format)?;
        if !root.is_object() {
            return Err(ConfigError::provider_error(
                "file",
                "root configuration must be an object",
            ));
        }

        Ok(Self {
            path: path_buf,
            root,
        })
    }

    fn parse(content: &str, format: FileFormat) -> Result<Value, ConfigError> {
        match format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::provider_error("file", format!("invalid JSON: {e}"))),
            FileFormat::Toml => {
                let parsed: toml::Value = toml::from_str(content).map_err(|e| {
                    ConfigError::provider_error("file", format!("invalid TOML: {e}"))
                })?;
                serde_json::to_value(parsed).map_err(|e| {
                    ConfigError::provider_error("file", format!("failed to convert TOML: {e}"))
                })
            }
            FileFormat::Yaml => {
                let parsed: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
                    ConfigError::provider_error("file", format!("invalid YAML: {e}"))
                })?;
                serde_json::to_value(parsed).map_err(|e| {
                    ConfigError::provider_error("file", format!("failed to convert YAML: {e}"))
                })
            }
        }
    }

    fn lookup(&self, key_path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for part in key_path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    fn provider_name(&self) -> &str {
        "file"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.lookup(key).cloned())
    }
}
