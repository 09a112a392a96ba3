// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Write;

use serde_json::{json, Value};
use tempfile::NamedTempFile;

use super::*;

#[derive(Debug)]
struct StaticProvider {
    name: &'static str,
    root: Value,
}

impl ConfigProvider for StaticProvider {
    fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    fn provider_name(&self) -> &str {
        self.name
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.lookup(key).cloned())
    }
}

impl StaticProvider {
    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut current = &self.root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }
}

#[test]
fn later_providers_override_earlier_ones() {
    let config = Config::builder()
        .with_provider(StaticProvider {
            name: "base",
            root: json!({"proxy": {"prefix": "/oauth2", "upstream": "http://a"}}),
        })
        .with_provider(StaticProvider {
            name: "override",
            root: json!({"proxy": {"prefix": "/sso"}}),
        })
        .build();

    let prefix: String = config.get("proxy.prefix").unwrap().unwrap();
    assert_eq!(prefix, "/sso");

    // Keys only the lower-priority provider has still resolve.
    let upstream: String = config.get("proxy.upstream").unwrap().unwrap();
    assert_eq!(upstream, "http://a");
}

#[test]
fn get_or_default_falls_back() {
    let config = Config::builder().build();
    let timeout: u64 = config.get_or_default("proxy.timeout", 30).unwrap();
    assert_eq!(timeout, 30);
    assert!(!config.has("proxy.timeout"));
}

#[test]
fn typed_deserialization_errors_are_parse_errors() {
    let config = Config::builder()
        .with_provider(StaticProvider {
            name: "bad",
            root: json!({"proxy": {"timeout": "not-a-number"}}),
        })
        .build();

    let result: Result<Option<u64>, _> = config.get("proxy.timeout");
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn file_provider_reads_toml() {
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(
        file,
        "[proxy]\nprefix = \"/oauth2\"\n[proxy.cookie]\nname = \"_session\"\nsecure = true"
    )
    .unwrap();

    let provider = FileConfigProvider::new(file.path().to_str().unwrap()).unwrap();
    assert!(provider.has("proxy.cookie.name"));
    assert_eq!(
        provider.get_raw("proxy.cookie.name").unwrap(),
        Some(json!("_session"))
    );
    assert_eq!(
        provider.get_raw("proxy.cookie.secure").unwrap(),
        Some(json!(true))
    );
}

#[test]
fn file_provider_rejects_unknown_extensions_and_bad_content() {
    let mut file = NamedTempFile::with_suffix(".ini").unwrap();
    writeln!(file, "whatever").unwrap();
    assert!(FileConfigProvider::new(file.path().to_str().unwrap()).is_err());

    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    writeln!(file, "{{ not json").unwrap();
    assert!(FileConfigProvider::new(file.path().to_str().unwrap()).is_err());

    assert!(FileConfigProvider::new("/does/not/exist.toml").is_err());
}

#[test]
fn env_provider_maps_double_underscores_to_key_paths() {
    // A process-unique prefix keeps parallel tests out of each other's way.
    let prefix = "GATEHOUSE_CFGTEST_";
    unsafe {
        std::env::set_var("GATEHOUSE_CFGTEST_PROXY__CLIENT_ID", "abc123");
        std::env::set_var("GATEHOUSE_CFGTEST_PROXY__COOKIE__SECURE", "false");
    }

    let provider = EnvConfigProvider::new(prefix);

    unsafe {
        std::env::remove_var("GATEHOUSE_CFGTEST_PROXY__CLIENT_ID");
        std::env::remove_var("GATEHOUSE_CFGTEST_PROXY__COOKIE__SECURE");
    }

    assert_eq!(
        provider.get_raw("proxy.client_id").unwrap(),
        Some(json!("abc123"))
    );
    // JSON-ish values parse as their natural type.
    assert_eq!(
        provider.get_raw("proxy.cookie.secure").unwrap(),
        Some(json!(false))
    );

    // Nested keys assemble into an object.
    let proxy = provider.get_raw("proxy").unwrap().unwrap();
    assert_eq!(proxy["client_id"], json!("abc123"));
    assert_eq!(proxy["cookie"]["secure"], json!(false));
}
