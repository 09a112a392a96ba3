// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde_json::{json, Value};

use super::*;
use crate::config::ConfigError;

#[derive(Debug)]
struct TestConfigProvider {
    root: Value,
}

impl TestConfigProvider {
    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut current = &self.root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }
}

impl ConfigProvider for TestConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.lookup(key).cloned())
    }
}

fn full_config() -> Value {
    json!({
        "server": {"host": "127.0.0.1", "port": 0, "health_port": 0},
        "proxy": {
            "upstream": "http://127.0.0.1:3000",
            "email_domains": ["*"],
            "session_store": "memory",
            "cookie": {"name": "_gatehouse", "secure": false},
            "provider": {
                "client_id": "cid",
                "client_secret": "cs",
                "auth_url": "https://idp.test/authorize",
                "token_url": "https://idp.test/token"
            }
        }
    })
}

#[test]
fn build_wires_a_complete_proxy() {
    let gatehouse = Gatehouse::loader()
        .with_provider(TestConfigProvider {
            root: full_config(),
        })
        .build()
        .expect("build succeeds");

    assert_eq!(gatehouse.options().proxy_prefix, "/oauth2");
    assert!(gatehouse.config().has("proxy.provider.client_id"));
}

#[test]
fn missing_proxy_section_aborts() {
    let result = Gatehouse::loader()
        .with_provider(TestConfigProvider { root: json!({}) })
        .build();
    assert!(result.is_err());
}

#[test]
fn missing_provider_aborts() {
    let mut root = full_config();
    root["proxy"]
        .as_object_mut()
        .unwrap()
        .remove("provider");
    let result = Gatehouse::loader()
        .with_provider(TestConfigProvider { root })
        .build();
    assert!(matches!(result, Err(LoaderError::Other(_))));
}

#[test]
fn cookie_store_requires_a_secret() {
    let mut root = full_config();
    root["proxy"]["session_store"] = json!("cookie");
    // No cookie.secret configured.
    let result = Gatehouse::loader()
        .with_provider(TestConfigProvider { root })
        .build();
    assert!(result.is_err());
}

#[test]
fn bad_trusted_cidr_aborts() {
    let mut root = full_config();
    root["proxy"]["trusted_ips"] = json!(["not-a-network"]);
    let result = Gatehouse::loader()
        .with_provider(TestConfigProvider { root })
        .build();
    assert!(result.is_err());
}

#[test]
fn bad_skip_auth_regex_aborts() {
    let mut root = full_config();
    root["proxy"]["skip_auth_regex"] = json!(["(unclosed"]);
    let result = Gatehouse::loader()
        .with_provider(TestConfigProvider { root })
        .build();
    assert!(result.is_err());
}

#[test]
fn missing_config_file_aborts() {
    let result = Gatehouse::loader()
        .with_config_file("/nonexistent/gatehouse.toml")
        .build();
    assert!(result.is_err());
}
