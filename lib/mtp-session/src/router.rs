// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The client group: one [`crate::session::Session`] per datacenter,
//! opened lazily, kept alive across `_MIGRATE_` redirections and
//! `FLOOD_WAIT` retries, the way `grammers-mtsender::SenderPool` keeps one
//! `Sender` task per DC behind a request channel instead of handing
//! callers a raw connection.
//!
//! Unlike `SenderPool`, which only ever dials the DC a request names, this
//! router also owns the "what counts as main" decision and the
//! migrate/flood-wait retry loop that the teacher leaves to
//! `grammers-client`'s higher layer.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use mtp_proto::{Intermediate, Obfuscated};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::Configuration;
use crate::datacenter::{DataCenter, DcKind, DcOptions};
use crate::dh_prime::DhPrimeChecker;
use crate::errors::{InvocationError, RequestError};
use crate::rsa_keys::PublicRsaKeyRegister;
use crate::session::{self, Session, SessionContext, SessionEvent};
use crate::store::StoreLayout;

/// Everything shared across every session the router opens. Held behind
/// `Arc`s so spawning a new DC's session is just a handful of clones.
pub struct RouterContext {
    pub config: Arc<Configuration>,
    pub store: Arc<dyn StoreLayout>,
    pub rsa_keys: Arc<dyn PublicRsaKeyRegister>,
    pub dh_checker: Arc<dyn DhPrimeChecker>,
}

/// A signal the router publishes for anything that isn't the direct
/// result of an `invoke`d RPC: the merged, tagged stream of every
/// session's non-RPC traffic.
#[derive(Debug)]
pub enum RouterEvent {
    /// A content-related inbound message that wasn't a recognized
    /// service message, from the session at `dc_id`.
    Update { dc_id: i32, body: Vec<u8> },
    /// The server at `dc_id` issued `NewSessionCreated`.
    SessionReset { dc_id: i32 },
}

struct Entry {
    session: Session,
    pump: JoinHandle<()>,
}

/// Multiple authorized sessions, one per datacenter, routed by DC id.
/// Opens sessions lazily on first use; follows `_MIGRATE_` RPC errors by
/// opening (or reusing) the named DC's session and resubmitting; follows
/// `FLOOD_WAIT_N` by retrying the same request on the same session after
/// a delay, up to `Configuration::max_flood_wait`.
///
/// Main-DC promotion happens only after the resubmitted request on the
/// new DC actually succeeds, never on the bare sight of `USER_MIGRATE_`;
/// the previous main's session is left running until [`Router::evict_idle`]
/// is called, rather than torn down eagerly mid-promotion.
pub struct Router {
    ctx: RouterContext,
    sessions: Mutex<HashMap<i32, Entry>>,
    main: Mutex<DataCenter>,
    events_tx: mpsc::UnboundedSender<RouterEvent>,
}

impl Router {
    /// Builds a router with no sessions open yet. Returns the merged
    /// event stream alongside it; every session opened through this
    /// router forwards its non-RPC traffic there.
    pub fn new(ctx: RouterContext) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let main = ctx.config.main_dc;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                ctx,
                sessions: Mutex::new(HashMap::new()),
                main: Mutex::new(main),
                events_tx,
            },
            events_rx,
        )
    }

    /// The datacenter RPCs are sent to by default, i.e. the one the last
    /// successful `USER_MIGRATE_` promoted.
    pub fn main_dc(&self) -> DataCenter {
        *self.main.lock().unwrap()
    }

    /// Opens (or reuses) the session for `dc` and promotes it to main.
    /// The previous main's session is left running; see [`Router::evict_idle`].
    pub async fn set_main(&self, dc: DataCenter) -> Session {
        let session = self.session_for(dc);
        *self.main.lock().unwrap() = dc;
        session
    }

    /// Invokes `body` against `self.main_dc()`. Convenience wrapper
    /// around [`Router::invoke`] for the common case of a caller that
    /// doesn't itself need to pick a DC.
    pub async fn invoke_main(&self, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
        self.invoke(self.main_dc(), body).await
    }

    /// Invokes `body` against `dc`, following migration and flood-wait
    /// retries transparently. Every other `RpcError` (including
    /// `AUTH_KEY_UNREGISTERED`, which the session already re-handshakes
    /// around in the background) is surfaced to the caller as-is.
    pub async fn invoke(&self, dc: DataCenter, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
        let mut dc = dc;
        let mut promote_on_success: Option<DataCenter> = None;

        loop {
            let session = self.session_for(dc);
            match session.invoke(body.clone()).await {
                Ok(response) => {
                    if let Some(target) = promote_on_success.take() {
                        info!("migration to dc {} confirmed, promoting to main", target.id);
                        *self.main.lock().unwrap() = target;
                    }
                    return Ok(response);
                }
                Err(RequestError::RpcError(err)) => {
                    if err.code == 303 {
                        if let Some(kind) = migrate_target_kind(&err.name, dc.kind) {
                            let Some(target_id) = err.value else {
                                return Err(InvocationError::Rpc(err));
                            };
                            let Some(target) = self.resolve_dc(kind, target_id as i32, &dc) else {
                                return Err(InvocationError::Rpc(err));
                            };
                            info!(
                                "dc {}: {} to dc {}, retrying request there",
                                dc.id, err.name, target.id
                            );
                            if err.name == "USER_MIGRATE" {
                                promote_on_success = Some(target);
                            }
                            dc = target;
                            continue;
                        }
                    }
                    if err.is("FLOOD_WAIT*") {
                        let wait = Duration::from_secs(err.value.unwrap_or(0) as u64);
                        if wait > self.ctx.config.max_flood_wait {
                            return Err(InvocationError::Rpc(err));
                        }
                        warn!("dc {}: flood wait, retrying in {:?}", dc.id, wait);
                        sleep(wait).await;
                        continue;
                    }
                    return Err(InvocationError::Rpc(err));
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Closes every open session in parallel and waits for each to reach
    /// `Closed` before returning.
    pub async fn close(&self) {
        let entries: Vec<Entry> = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            entry.session.close();
        }
        for entry in entries {
            let _ = entry.pump.await;
        }
    }

    /// Closes and forgets every session except the current main DC's.
    /// The router never does this on its own; an embedder calls it
    /// periodically (or after every successful migration) to bound how
    /// many idle connections it carries.
    pub fn evict_idle(&self) {
        let main_id = self.main_dc().id;
        let mut sessions = self.sessions.lock().unwrap();
        let idle_ids: Vec<i32> = sessions
            .keys()
            .copied()
            .filter(|id| *id != main_id)
            .collect();
        for id in idle_ids {
            if let Some(entry) = sessions.remove(&id) {
                entry.session.close();
                entry.pump.abort();
            }
        }
    }

    /// Opens the session for `dc` if it isn't already running, spawning
    /// a pump task that forwards its non-RPC events into the router's
    /// merged stream.
    fn session_for(&self, dc: DataCenter) -> Session {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get(&dc.id) {
            return entry.session.clone();
        }

        let session_ctx = SessionContext {
            dc,
            config: Arc::clone(&self.ctx.config),
            store: Arc::clone(&self.ctx.store),
            rsa_keys: Arc::clone(&self.ctx.rsa_keys),
            dh_checker: Arc::clone(&self.ctx.dh_checker),
        };
        let (session, mut event_rx) =
            session::spawn(session_ctx, || Obfuscated::new(Intermediate::new()));

        let events_tx = self.events_tx.clone();
        let dc_id = dc.id;
        let pump = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let forwarded = match event {
                    SessionEvent::Update(body) => Some(RouterEvent::Update { dc_id, body }),
                    SessionEvent::SessionReset => Some(RouterEvent::SessionReset { dc_id }),
                    // Internal to the session's own reconnection loop;
                    // nothing for an embedder to act on.
                    SessionEvent::Unauthorized => None,
                };
                if let Some(event) = forwarded {
                    let _ = events_tx.send(event);
                }
            }
        });

        sessions.insert(dc_id, Entry { session: session.clone(), pump });
        session
    }

    /// Looks `id` of `kind` up in the cached `DcOptions`, falling back to
    /// Telegram's published list for the matching cluster when the cache
    /// doesn't have it yet. A live `help.GetConfig` refresh needs the
    /// generated business-logic schema this crate doesn't carry; an
    /// embedder that wants one can call `update_dc_options` on the store
    /// itself after invoking `help.GetConfig` through this router.
    fn resolve_dc(&self, kind: DcKind, id: i32, like: &DataCenter) -> Option<DataCenter> {
        let cached = self.ctx.store.get_dc_options();
        if let Some(dc) = cached.find(kind, id) {
            return Some(dc);
        }
        let published = if like.test {
            DcOptions::test()
        } else {
            DcOptions::production()
        };
        published.find(kind, id)
    }
}

/// Classifies an RPC error name of the form `(USER|PHONE|NETWORK|FILE)_MIGRATE`
/// (the numeric suffix is already split into `RpcError::value` by the time
/// this runs) into the kind of DC the server is redirecting to. Returns
/// `None` for anything that isn't a migration error.
fn migrate_target_kind(name: &str, current: DcKind) -> Option<DcKind> {
    match name {
        "USER_MIGRATE" | "PHONE_MIGRATE" | "NETWORK_MIGRATE" => Some(current),
        "FILE_MIGRATE" => Some(DcKind::Media),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_migrate_errors_by_name() {
        assert_eq!(
            migrate_target_kind("USER_MIGRATE", DcKind::Regular),
            Some(DcKind::Regular)
        );
        assert_eq!(
            migrate_target_kind("FILE_MIGRATE", DcKind::Regular),
            Some(DcKind::Media)
        );
        assert_eq!(migrate_target_kind("PHONE_CODE_INVALID", DcKind::Regular), None);
    }

    #[test]
    fn resolve_dc_falls_back_to_the_published_list() {
        use crate::store::MemoryStoreLayout;

        let ctx = RouterContext {
            config: Arc::new(Configuration::default()),
            store: Arc::new(MemoryStoreLayout::new()),
            rsa_keys: Arc::new(crate::rsa_keys::KnownRsaKeys),
            dh_checker: Arc::new(crate::dh_prime::CachingDhPrimeChecker::default()),
        };
        let (router, _events) = Router::new(ctx);
        let like = router.main_dc();

        let found = router.resolve_dc(DcKind::Regular, 4, &like);
        assert_eq!(found.map(|dc| dc.id), Some(4));
    }

    #[test]
    fn main_dc_defaults_to_configuration() {
        let ctx = RouterContext {
            config: Arc::new(Configuration::default()),
            store: Arc::new(crate::store::MemoryStoreLayout::new()),
            rsa_keys: Arc::new(crate::rsa_keys::KnownRsaKeys),
            dh_checker: Arc::new(crate::dh_prime::CachingDhPrimeChecker::default()),
        };
        let (router, _events) = Router::new(ctx);
        assert_eq!(router.main_dc().id, Configuration::default().main_dc.id);
    }
}
