// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Datacenter identity and the well-known production/test seed list, the
//! way `grammers-mtsender`'s `Configuration` hardcodes `KNOWN_DC_OPTIONS`
//! from a captured `help.GetConfig` response.
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// What kind of traffic a datacenter serves. Most requests go to a
/// `Regular` DC; media upload/download may be redirected to a `Media`
/// one, and CDN-backed files to a `Cdn` one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DcKind {
    Regular,
    Media,
    Cdn,
}

/// A single, immutable datacenter endpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DataCenter {
    pub id: i32,
    pub kind: DcKind,
    pub address: SocketAddr,
    pub test: bool,
}

/// An ordered collection of known datacenters, refreshable from a
/// `help.GetConfig`-shaped response and seeded with Telegram's published
/// production and test IPs.
#[derive(Clone, Debug)]
pub struct DcOptions {
    options: Vec<DataCenter>,
}

impl DcOptions {
    pub fn new(options: Vec<DataCenter>) -> Self {
        Self { options }
    }

    /// The production datacenters, as published by Telegram.
    pub fn production() -> Self {
        Self::new(
            [
                (1, 149, 154, 175, 53),
                (2, 149, 154, 167, 51),
                (3, 149, 154, 175, 100),
                (4, 149, 154, 167, 92),
                (5, 91, 108, 56, 190),
            ]
            .into_iter()
            .map(|(id, a, b, c, d)| DataCenter {
                id,
                kind: DcKind::Regular,
                address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), 443)),
                test: false,
            })
            .collect(),
        )
    }

    /// The test-cluster datacenters.
    pub fn test() -> Self {
        Self::new(
            [
                (1, 149, 154, 175, 10),
                (2, 149, 154, 167, 40),
                (3, 149, 154, 175, 117),
            ]
            .into_iter()
            .map(|(id, a, b, c, d)| DataCenter {
                id,
                kind: DcKind::Regular,
                address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), 443)),
                test: true,
            })
            .collect(),
        )
    }

    pub fn find(&self, kind: DcKind, id: i32) -> Option<DataCenter> {
        self.options
            .iter()
            .copied()
            .find(|dc| dc.kind == kind && dc.id == id)
    }

    /// Replaces the current set wholesale, e.g. after a fresh
    /// `help.GetConfig` response has been parsed by the caller.
    pub fn replace(&mut self, options: Vec<DataCenter>) {
        self.options = options;
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataCenter> {
        self.options.iter()
    }
}

impl Default for DcOptions {
    fn default() -> Self {
        Self::production()
    }
}
