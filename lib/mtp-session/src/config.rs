// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Typed configuration knobs, the way `grammers-mtsender::Configuration`
//! bundles application identity, the `InitConnection` parameters and a
//! set of sane defaults without reading any environment or CLI flags
//! itself — that's left to the embedding application.
use std::time::Duration;

use crate::datacenter::{DataCenter, DcKind};
use crate::reconnection::{FixedReconnect, ReconnectionPolicy};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

/// Parameters sent once, right after authorization, inside
/// `InvokeWithLayer(InitConnection(...))`.
#[derive(Clone, Debug)]
pub struct InitConnectionParams {
    pub app_version: String,
    pub device_model: String,
    pub lang_code: String,
    pub lang_pack: String,
    pub system_version: String,
    pub system_lang_code: String,
    pub proxy: Option<String>,
    pub params: Option<Vec<u8>>,
}

impl Default for InitConnectionParams {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            device_model: "mtp-session".to_string(),
            lang_code: "en".to_string(),
            lang_pack: String::new(),
            system_version: std::env::consts::OS.to_string(),
            system_lang_code: "en".to_string(),
            proxy: None,
            params: None,
        }
    }
}

/// Either the bot token or a caller-supplied interactive login path;
/// which one drives authorization is out of scope for this crate (it
/// only needs to carry the value through to the embedding application).
#[derive(Clone, Debug, Default)]
pub enum LoginMethod {
    #[default]
    Unspecified,
    BotToken(String),
}

/// The top-level knobs a caller sets once before opening any session.
#[derive(Clone)]
pub struct Configuration {
    pub api_id: i32,
    pub api_hash: String,
    pub login: LoginMethod,
    pub init_connection_params: InitConnectionParams,
    pub connection_retry: Arc<dyn ReconnectionPolicy>,
    pub auth_retry: Arc<dyn ReconnectionPolicy>,
    pub gzip_threshold: usize,
    pub main_dc: DataCenter,
    /// Maximum `FLOOD_WAIT_N` duration retried automatically before it
    /// is surfaced to the caller as an error instead.
    pub max_flood_wait: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            login: LoginMethod::default(),
            init_connection_params: InitConnectionParams::default(),
            connection_retry: Arc::new(FixedReconnect {
                attempts: usize::MAX,
                delay: Duration::from_secs(5),
            }),
            auth_retry: Arc::new(FixedReconnect {
                attempts: 5,
                delay: Duration::from_secs(3),
            }),
            gzip_threshold: 16384,
            main_dc: DataCenter {
                id: 2,
                kind: DcKind::Regular,
                address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(149, 154, 167, 51), 443)),
                test: false,
            },
            max_flood_wait: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let config = Configuration::default();
        assert_eq!(config.gzip_threshold, 16384);
        assert_eq!(config.main_dc.id, 2);
        assert_eq!(config.max_flood_wait, Duration::from_secs(60));
    }

    #[test]
    fn gzip_threshold_must_be_positive() {
        assert!(Configuration::default().gzip_threshold > 0);
    }
}
