// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared helpers for the integration tests.

use std::sync::Once;

use gatehouse::config::ConfigError;
use gatehouse::ConfigProvider;
use serde_json::Value;

static INIT_LOGGING: Once = Once::new();

/// Quiet env_logger setup, initialized once for the whole binary.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("warn"),
        )
        .is_test(true)
        .try_init();
    });
}

/// In-memory configuration provider fed from a JSON tree.
#[derive(Debug)]
pub struct TestConfigProvider {
    root: Value,
}

impl TestConfigProvider {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

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

/// Reserve an ephemeral port.  Racy by nature, fine for tests.
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
