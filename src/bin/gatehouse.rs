// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal CLI wrapper so the library can run as a stand-alone proxy.
//!
//! Build it with `cargo build --release --bin gatehouse`.
//! The binary honours GATEHOUSE_CONFIG_FILE or falls back to
//! /etc/gatehouse/config.toml; GATEHOUSE_* variables overlay the file.

use std::env;
use std::error::Error;

use gatehouse::Gatehouse;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config_file = env::var("GATEHOUSE_CONFIG_FILE")
        .unwrap_or_else(|_| "/etc/gatehouse/config.toml".to_string());

    let gatehouse = Gatehouse::loader()
        .with_config_file(&config_file)
        .with_env_vars()
        .build()?;

    gatehouse.start().await?;
    Ok(())
}
