// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The persistence boundary: auth keys, known datacenters, and the
//! logged-in user's self-id outlive a single process. `StoreLayout` is
//! the contract the router is coded against; `MemoryStoreLayout` is the
//! in-process reference implementation, the way the teacher's
//! `MemorySession` ships as the default for tests and simple embedders.
use std::collections::HashMap;
use std::sync::Mutex;

use mtp_crypto::AuthKey;

use crate::datacenter::{DataCenter, DcKind, DcOptions};

/// A key identifying a single datacenter's persisted state: its numeric
/// id plus whether it's on the test cluster, since the same id means a
/// different endpoint on each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DcKey {
    pub id: i32,
    pub test: bool,
}

impl DcKey {
    pub fn new(dc: &DataCenter) -> Self {
        Self {
            id: dc.id,
            test: dc.test,
        }
    }
}

/// External persistence contract a client group is built against.
/// Implementations must serialize mutations per key: two concurrent
/// `put_auth_key` calls for the same DC must not interleave.
pub trait StoreLayout: Send + Sync {
    fn get_auth_key(&self, dc: &DcKey) -> Option<AuthKey>;
    fn put_auth_key(&self, dc: &DcKey, key: AuthKey);
    fn get_dc_options(&self) -> DcOptions;
    fn update_dc_options(&self, new: DcOptions);
    fn get_self_id(&self) -> Option<i64>;
    fn on_authorization(&self, self_id: i64);
}

/// A `StoreLayout` that keeps everything in memory; state is lost when
/// the process exits. Good enough for tests and for embedders that
/// don't need a session to survive a restart.
#[derive(Default)]
pub struct MemoryStoreLayout {
    auth_keys: Mutex<HashMap<DcKey, AuthKey>>,
    dc_options: Mutex<Option<DcOptions>>,
    self_id: Mutex<Option<i64>>,
}

impl MemoryStoreLayout {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreLayout for MemoryStoreLayout {
    fn get_auth_key(&self, dc: &DcKey) -> Option<AuthKey> {
        self.auth_keys.lock().unwrap().get(dc).cloned()
    }

    fn put_auth_key(&self, dc: &DcKey, key: AuthKey) {
        self.auth_keys.lock().unwrap().insert(*dc, key);
    }

    fn get_dc_options(&self) -> DcOptions {
        self.dc_options
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(DcOptions::production)
    }

    fn update_dc_options(&self, new: DcOptions) {
        *self.dc_options.lock().unwrap() = Some(new);
    }

    fn get_self_id(&self) -> Option<i64> {
        *self.self_id.lock().unwrap()
    }

    fn on_authorization(&self, self_id: i64) {
        *self.self_id.lock().unwrap() = Some(self_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn dc() -> DataCenter {
        DataCenter {
            id: 2,
            kind: DcKind::Regular,
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 443)),
            test: false,
        }
    }

    #[test]
    fn round_trips_an_auth_key() {
        let store = MemoryStoreLayout::new();
        let key = DcKey::new(&dc());
        assert!(store.get_auth_key(&key).is_none());
        store.put_auth_key(&key, AuthKey::from_bytes([7u8; 256]));
        assert!(store.get_auth_key(&key).is_some());
    }

    #[test]
    fn falls_back_to_production_dc_options_when_unset() {
        let store = MemoryStoreLayout::new();
        assert!(store.get_dc_options().find(DcKind::Regular, 2).is_some());
    }

    #[test]
    fn records_self_id_on_authorization() {
        let store = MemoryStoreLayout::new();
        assert!(store.get_self_id().is_none());
        store.on_authorization(12345);
        assert_eq!(store.get_self_id(), Some(12345));
    }

    #[test]
    fn distinguishes_test_and_production_dc_with_the_same_id() {
        let store = MemoryStoreLayout::new();
        let mut prod = dc();
        let mut test = dc();
        test.test = true;

        store.put_auth_key(&DcKey::new(&prod), AuthKey::from_bytes([1u8; 256]));
        assert!(store.get_auth_key(&DcKey::new(&test)).is_none());

        prod.test = false;
        assert!(store.get_auth_key(&DcKey::new(&prod)).is_some());
    }
}
