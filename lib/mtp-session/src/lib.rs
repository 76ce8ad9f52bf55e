// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Everything above the transport framer (`mtp-net`) and below a generated
//! business-logic schema: the auth-key handshake, the encrypted session
//! engine that drives one connection, and the multi-DC router that keeps
//! one session per datacenter alive and follows `_MIGRATE_` redirects.

mod config;
mod datacenter;
mod dh_prime;
mod errors;
mod id_register;
mod negotiator;
mod reconnection;
mod router;
mod rsa_keys;
mod session;
mod store;

pub use config::{Configuration, InitConnectionParams, LoginMethod};
pub use datacenter::{DataCenter, DcKind, DcOptions};
pub use dh_prime::{CachingDhPrimeChecker, DhPrimeChecker};
pub use errors::{AuthorizationError, InvocationError, ReadError, RequestError, RpcError};
pub use id_register::InboundMessageIdRegister;
pub use negotiator::{negotiate, Finished};
pub use reconnection::{FixedReconnect, NoReconnect, ReconnectionPolicy};
pub use router::{Router, RouterContext, RouterEvent};
pub use rsa_keys::{KnownRsaKeys, PublicRsaKeyRegister};
pub use session::{spawn as spawn_session, Session, SessionContext, SessionEvent, SessionExit};
pub use store::{DcKey, MemoryStoreLayout, StoreLayout};
