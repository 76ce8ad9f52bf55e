// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The encrypted session engine: msg-id/seq-no allocation, ack coalescing,
//! AES-IGE v2 encryption, inbound dispatch and the keepalive ping, driven
//! as a single task per session the way the teacher's `Sender` task owns
//! one `Mtp` instance and one `Connection` for its whole lifetime.
//!
//! The teacher keeps this as a poll-driven state machine behind an `Mtp`
//! trait (`push`/`finalize`/`deserialize`, see `grammers-mtproto`); this
//! engine keeps the same msg-id/seq-no/dispatch rules but drives them from
//! an async task that owns its `Connection` directly and talks to the rest
//! of the process over channels, per the cooperative single-task-per-session
//! model.
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use getrandom::getrandom;
use log::{debug, info, warn};
use mtp_crypto::{decrypt_data_v2, encrypt_data_v2, AuthKey, RingBuffer};
use mtp_net::{Connection, ConnectionError, ServerAddr};
use mtp_proto::Transport;
use mtp_tl::control::{
    BadMsgNotification, BadServerSalt, GzipPacked, Message, MessageContainer, NewSessionCreated,
    Ping, PingDelayDisconnect, Pong, RpcResult,
};
use mtp_tl::{Cursor, Deserializable, Identifiable, Serializable};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep};

use crate::config::Configuration;
use crate::datacenter::DataCenter;
use crate::dh_prime::DhPrimeChecker;
use crate::errors::{RequestError, UNACTIONABLE_BAD_MSG_CODES};
use crate::id_register::InboundMessageIdRegister;
use crate::negotiator;
use crate::rsa_keys::PublicRsaKeyRegister;
use crate::store::{DcKey, StoreLayout};

/// How long outbound idleness is tolerated before a keepalive ping goes out.
const PING_IDLE: Duration = Duration::from_secs(60);
/// How long an unanswered ping is tolerated before the connection is torn
/// down and reconnection is signalled.
const PING_TIMEOUT: Duration = Duration::from_secs(30);
/// `disconnect_delay` advertised in `PingDelayDisconnect`.
const PING_DISCONNECT_DELAY: i32 = 75;

/// A request in flight, owned exclusively by the session task until it
/// completes, is cancelled, or the session closes.
struct PendingRequest {
    body: Vec<u8>,
    #[allow(dead_code)]
    submitted_at: Instant,
    response: oneshot::Sender<Result<Vec<u8>, RequestError>>,
    #[allow(dead_code)]
    retries: u8,
    content_related: bool,
    /// `true` once an `MsgsAck` has named this request, i.e. the server
    /// has it but hasn't replied yet.
    acked: bool,
}

/// Per-DC encrypted-session state, exactly the fields the wire protocol
/// needs to track between one outbound/inbound message and the next.
struct SessionState {
    auth_key: AuthKey,
    session_id: i64,
    time_offset: i32,
    last_msg_id: i64,
    seq_no: i32,
    server_salt: i64,
    unauthorized: bool,
    inbound_ids: InboundMessageIdRegister,
    pending: HashMap<i64, PendingRequest>,
    ack_buffer: Vec<i64>,
    gzip_threshold: usize,
}

impl SessionState {
    fn new(auth_key: AuthKey, time_offset: i32, server_salt: i64, gzip_threshold: usize) -> Self {
        let mut session_id_bytes = [0u8; 8];
        getrandom(&mut session_id_bytes).expect("failed to generate a session id");
        Self {
            auth_key,
            session_id: i64::from_le_bytes(session_id_bytes),
            time_offset,
            last_msg_id: 0,
            seq_no: 0,
            server_salt,
            unauthorized: false,
            inbound_ids: InboundMessageIdRegister::default(),
            pending: HashMap::new(),
            ack_buffer: Vec::new(),
            gzip_threshold,
        }
    }

    /// `t = (local_time + time_offset)`; low bits mix in sub-second
    /// precision and 21 random bits so two ids minted in the same
    /// millisecond still differ, per §4.3.
    fn next_msg_id(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch");
        let t = now.as_secs() as i64 + self.time_offset as i64;
        let millis = now.subsec_millis() as i64;
        let rand21 = {
            let mut buf = [0u8; 4];
            getrandom(&mut buf).expect("failed to generate secure data for msg_id");
            (u32::from_le_bytes(buf) & 0x1f_ffff) as i64
        };
        let mut candidate = (t << 32) | ((millis % 1000) << 20) | (rand21 << 2);
        if candidate <= self.last_msg_id {
            candidate = self.last_msg_id + 4;
        }
        self.last_msg_id = candidate;
        candidate
    }

    /// Content-related messages get `(seq_no++) * 2 + 1`; everything else
    /// (acks, pings, containers, state/resend requests) gets `seq_no * 2`
    /// without advancing the counter.
    fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let n = self.seq_no;
            self.seq_no += 1;
            n * 2 + 1
        } else {
            self.seq_no * 2
        }
    }
}

/// Decision for a single inbound `msg_id`, per the invariants in §3.
#[derive(Debug, PartialEq, Eq)]
enum InboundMsgIdError {
    /// Even ids are never sent by a compliant server; likely tampering.
    Even,
    /// Outside the `[-300s, +30s]` server-time window.
    InvalidTime,
    /// Already seen (or older than the tracked window); silently dropped.
    Duplicate,
}

fn validate_inbound_msg_id(
    state: &mut SessionState,
    msg_id: i64,
) -> Result<(), InboundMsgIdError> {
    if msg_id % 2 == 0 {
        return Err(InboundMsgIdError::Even);
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before epoch")
        .as_secs() as i64
        + state.time_offset as i64;
    let msg_time = msg_id >> 32;
    if msg_time < now - 300 || msg_time > now + 30 {
        return Err(InboundMsgIdError::InvalidTime);
    }

    if !state.inbound_ids.accept(msg_id) {
        return Err(InboundMsgIdError::Duplicate);
    }
    Ok(())
}

/// What the session task asks the outer connection loop (and ultimately
/// the router) to do once an authorized read/write cycle ends.
pub enum SessionExit {
    /// A transport error or protocol violation; reconnect if policy allows.
    Reconnect,
    /// The server reported `AUTH_KEY_UNREGISTERED`: the stored key is no
    /// longer valid server-side and must be dropped, not reused, on the
    /// next connection attempt.
    Unauthorized,
    /// `close()` was requested; every pending request already failed with
    /// `SessionClosed`.
    Closed,
}

/// What processing one inbound frame asked the read/write cycle to do.
enum FrameOutcome {
    Continue,
    ProtocolViolation,
    Unauthorized,
}

/// A signal the engine publishes alongside ordinary RPC completions, for
/// the router (or any direct embedder) to react to.
pub enum SessionEvent {
    /// A non-RPC, content-related message that wasn't a recognized
    /// service message (the spec's "forward to updates channel").
    Update(Vec<u8>),
    /// The server issued `NewSessionCreated`: the old `server_salt` and
    /// `ack_buffer` are gone, already applied internally.
    SessionReset,
    /// The server reported `AUTH_KEY_UNREGISTERED`; the stored key has
    /// been dropped and the session will re-handshake on next use.
    Unauthorized,
}

enum Command {
    Request {
        body: Vec<u8>,
        content_related: bool,
        respond_to: oneshot::Sender<Result<Vec<u8>, RequestError>>,
    },
    Close,
}

/// A handle to a running session task. Cloning is cheap; every clone
/// shares the same underlying task and `pending` table.
#[derive(Clone)]
pub struct Session {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Session {
    /// Submits `body` and awaits its reply. `content_related` selects the
    /// odd/even `seq_no` rule; non-content-related requests (acks, pings)
    /// are only ever submitted internally by the engine itself.
    pub async fn invoke(&self, body: Vec<u8>) -> Result<Vec<u8>, RequestError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request {
                body,
                content_related: true,
                respond_to: tx,
            })
            .map_err(|_| RequestError::SessionClosed)?;
        rx.await.map_err(|_| RequestError::SessionClosed)?
    }

    /// Closes the session. Every request still pending fails with
    /// `SessionClosed`; the underlying connection is torn down once the
    /// task notices.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

/// Everything the session task needs that outlives any single connection
/// attempt.
pub struct SessionContext {
    pub dc: DataCenter,
    pub config: std::sync::Arc<Configuration>,
    pub store: std::sync::Arc<dyn StoreLayout>,
    pub rsa_keys: std::sync::Arc<dyn PublicRsaKeyRegister>,
    pub dh_checker: std::sync::Arc<dyn DhPrimeChecker>,
}

/// Spawns the session task for `ctx`, connecting with a fresh transport
/// built by `make_transport` on every (re)connection attempt. Returns a
/// handle plus the merged stream of non-RPC events.
pub fn spawn<F, T>(
    ctx: SessionContext,
    make_transport: F,
) -> (Session, mpsc::UnboundedReceiver<SessionEvent>)
where
    F: Fn() -> T + Send + 'static,
    T: Transport + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(run(ctx, make_transport, cmd_rx, event_tx));

    (Session { cmd_tx }, event_rx)
}

/// The outer reconnection loop: (re)establishes the transport, negotiates
/// or reuses an auth key, then hands off to [`authorized_loop`] until it
/// asks for a reconnect or the caller closes the session.
async fn run<F, T>(
    ctx: SessionContext,
    make_transport: F,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) where
    F: Fn() -> T,
    T: Transport + Send + 'static,
{
    let dc_key = DcKey::new(&ctx.dc);
    let addr = ServerAddr::Tcp {
        address: ctx.dc.address,
    };

    let mut attempts = 0usize;
    let mut force_handshake = false;
    loop {
        info!("dc {}: connecting", ctx.dc.id);
        let mut conn = match Connection::connect(make_transport(), addr).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("dc {}: connect failed: {e}", ctx.dc.id);
                if !backoff(&ctx.config.connection_retry, &mut attempts).await {
                    fail_all_pending(&mut cmd_rx);
                    return;
                }
                continue;
            }
        };

        let state = match load_or_negotiate(&ctx, &mut conn, &dc_key, force_handshake).await {
            Ok(state) => state,
            Err(e) => {
                warn!("dc {}: handshake failed: {e}", ctx.dc.id);
                if !backoff(&ctx.config.auth_retry, &mut attempts).await {
                    fail_all_pending(&mut cmd_rx);
                    return;
                }
                continue;
            }
        };
        attempts = 0;
        force_handshake = false;
        info!("dc {}: authorized", ctx.dc.id);

        match authorized_loop(&ctx, &mut conn, state, &mut cmd_rx, &event_tx).await {
            SessionExit::Closed => {
                info!("dc {}: closed", ctx.dc.id);
                return;
            }
            SessionExit::Reconnect => {
                warn!("dc {}: connection lost, reconnecting", ctx.dc.id);
                if !backoff(&ctx.config.connection_retry, &mut attempts).await {
                    fail_all_pending(&mut cmd_rx);
                    return;
                }
            }
            SessionExit::Unauthorized => {
                warn!("dc {}: auth key unregistered by server, dropping it", ctx.dc.id);
                force_handshake = true;
                let _ = event_tx.send(SessionEvent::Unauthorized);
                if !backoff(&ctx.config.auth_retry, &mut attempts).await {
                    fail_all_pending(&mut cmd_rx);
                    return;
                }
            }
        }
    }
}

/// Fails every request still queued in `cmd_rx` with `SessionClosed`,
/// draining it so no sender is left hanging after the task exits.
fn fail_all_pending(cmd_rx: &mut mpsc::UnboundedReceiver<Command>) {
    cmd_rx.close();
    while let Ok(cmd) = cmd_rx.try_recv() {
        if let Command::Request { respond_to, .. } = cmd {
            let _ = respond_to.send(Err(RequestError::SessionClosed));
        }
    }
}

async fn backoff(policy: &dyn crate::reconnection::ReconnectionPolicy, attempts: &mut usize) -> bool {
    match policy.should_retry(*attempts) {
        ControlFlow::Continue(delay) => {
            *attempts += 1;
            sleep(delay).await;
            true
        }
        ControlFlow::Break(()) => false,
    }
}

/// Loads a persisted auth key for this DC if the store has one, otherwise
/// runs the full handshake and persists the result.
async fn load_or_negotiate<T: Transport>(
    ctx: &SessionContext,
    conn: &mut Connection<T>,
    dc_key: &DcKey,
    force_handshake: bool,
) -> Result<SessionState, crate::errors::ReadError> {
    if !force_handshake {
        if let Some(auth_key) = ctx.store.get_auth_key(dc_key) {
            debug!("dc {}: reusing stored auth key", ctx.dc.id);
            // A stored key has no associated salt/offset; the server will
            // correct both via BadServerSalt/BadMsgNotification on first use.
            return Ok(SessionState::new(auth_key, 0, 0, ctx.config.gzip_threshold));
        }
    }

    let finished = negotiator::negotiate(conn, ctx.rsa_keys.as_ref(), ctx.dh_checker.as_ref()).await?;
    ctx.store.put_auth_key(dc_key, finished.auth_key.clone());
    Ok(SessionState::new(
        finished.auth_key,
        finished.time_offset,
        finished.first_salt,
        ctx.config.gzip_threshold,
    ))
}

/// Runs the `Authorized` read/write cycle: drains commands into outbound
/// frames, reads inbound frames and dispatches them, and fires the
/// keepalive ping on idleness, until a fatal error or `Close` ends it.
async fn authorized_loop<T: Transport>(
    ctx: &SessionContext,
    conn: &mut Connection<T>,
    mut state: SessionState,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> SessionExit {
    let mut ping_ticker = interval(PING_IDLE);
    ping_ticker.tick().await; // first tick fires immediately; consume it
    let mut awaiting_pong: Option<(i64, Instant)> = None;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Request { body, content_related, respond_to }) => {
                        send_request(&mut state, conn, body, content_related, Some(respond_to)).await;
                    }
                    Some(Command::Close) => {
                        for (_, pending) in state.pending.drain() {
                            let _ = pending.response.send(Err(RequestError::SessionClosed));
                        }
                        return SessionExit::Closed;
                    }
                    None => {
                        // All handles dropped; treat like an explicit close.
                        return SessionExit::Closed;
                    }
                }
            }

            frame = conn.read_frame() => {
                match frame {
                    Ok(frame) => {
                        missed_pongs = 0;
                        match handle_frame(ctx, &mut state, conn, &frame, event_tx, &mut awaiting_pong).await {
                            FrameOutcome::Continue => {}
                            FrameOutcome::ProtocolViolation => return SessionExit::Reconnect,
                            FrameOutcome::Unauthorized => return SessionExit::Unauthorized,
                        }
                    }
                    Err(ConnectionError::Closed) => return SessionExit::Reconnect,
                    Err(e) => {
                        warn!("dc {}: connection error: {e}", ctx.dc.id);
                        return SessionExit::Reconnect;
                    }
                }
            }

            _ = ping_ticker.tick() => {
                if let Some((_, sent_at)) = awaiting_pong {
                    if sent_at.elapsed() >= PING_TIMEOUT {
                        missed_pongs += 1;
                        if missed_pongs >= 2 {
                            warn!("dc {}: two consecutive pings unanswered", ctx.dc.id);
                            return SessionExit::Reconnect;
                        }
                    }
                }
                let ping_id = random_i64();
                let mut body = Vec::new();
                PingDelayDisconnect { ping_id, disconnect_delay: PING_DISCONNECT_DELAY }.serialize(&mut body);
                send_request(&mut state, conn, body, false, None).await;
                awaiting_pong = Some((ping_id, Instant::now()));
            }
        }

        if let Err(e) = conn.flush().await {
            warn!("dc {}: flush failed: {e}", ctx.dc.id);
            return SessionExit::Reconnect;
        }
    }
}

fn random_i64() -> i64 {
    let mut buf = [0u8; 8];
    getrandom(&mut buf).expect("failed to generate secure data for ping id");
    i64::from_le_bytes(buf)
}

/// Builds and encrypts one outbound message, prefixing a coalesced
/// `MsgsAck` container when the ack buffer is non-empty. Registers the
/// request in `pending` if a reply is expected.
async fn send_request<T: Transport>(
    state: &mut SessionState,
    conn: &mut Connection<T>,
    body: Vec<u8>,
    content_related: bool,
    respond_to: Option<oneshot::Sender<Result<Vec<u8>, RequestError>>>,
) {
    let msg_id = state.next_msg_id();
    let seq_no = state.next_seq_no(content_related);

    let body = if body.len() > state.gzip_threshold {
        let mut gzipped = Vec::new();
        GzipPacked::new(&body).serialize(&mut gzipped);
        gzipped
    } else {
        body
    };

    if let Some(respond_to) = respond_to {
        state.pending.insert(
            msg_id,
            PendingRequest {
                body: body.clone(),
                submitted_at: Instant::now(),
                response: respond_to,
                retries: 0,
                content_related,
                acked: false,
            },
        );
    }

    let top_level = if !state.ack_buffer.is_empty() {
        let ack_ids = std::mem::take(&mut state.ack_buffer);
        let ack_msg_id = state.next_msg_id();
        let ack_seq_no = state.next_seq_no(false);
        let mut ack_body = Vec::new();
        mtp_tl::control::MsgsAck { msg_ids: ack_ids }.serialize(&mut ack_body);

        let mut container_body = Vec::new();
        MessageContainer {
            messages: vec![
                Message { msg_id, seq_no, body },
                Message {
                    msg_id: ack_msg_id,
                    seq_no: ack_seq_no,
                    body: ack_body,
                },
            ],
        }
        .serialize(&mut container_body);

        let container_msg_id = state.next_msg_id();
        let container_seq_no = state.next_seq_no(false);
        let mut top = Vec::new();
        Message {
            msg_id: container_msg_id,
            seq_no: container_seq_no,
            body: container_body,
        }
        .serialize(&mut top);
        top
    } else {
        let mut top = Vec::new();
        Message { msg_id, seq_no, body }.serialize(&mut top);
        top
    };

    encrypt_and_enqueue(state, conn, top_level);
}

/// AES-IGE-v2-encrypts one fully-framed `Message` (msg_id, seq_no, body
/// already serialized) and enqueues it on `conn`.
fn encrypt_and_enqueue<T: Transport>(state: &mut SessionState, conn: &mut Connection<T>, message: Vec<u8>) {
    let mut plaintext = RingBuffer::with_capacity(message.len() + 16, 0);
    plaintext.extend(state.server_salt.to_le_bytes());
    plaintext.extend(state.session_id.to_le_bytes());
    plaintext.extend(message.iter().copied());

    encrypt_data_v2(&mut plaintext, &state.auth_key);
    conn.enqueue_frame(plaintext.as_ref());
}

/// Decrypts, validates and dispatches one inbound frame. Returns `Err(())`
/// on a protocol violation that should drop the connection.
async fn handle_frame<T: Transport>(
    ctx: &SessionContext,
    state: &mut SessionState,
    conn: &mut Connection<T>,
    frame: &[u8],
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    awaiting_pong: &mut Option<(i64, Instant)>,
) -> FrameOutcome {
    let plaintext = match decrypt_data_v2(frame, &state.auth_key) {
        Ok(pt) => pt,
        Err(e) => {
            warn!("dc {}: decrypt failed: {e}", ctx.dc.id);
            return FrameOutcome::ProtocolViolation;
        }
    };
    if plaintext.len() < 32 {
        return FrameOutcome::ProtocolViolation;
    }

    let session_id = i64::from_le_bytes(plaintext[8..16].try_into().unwrap());
    if session_id != state.session_id {
        warn!("dc {}: session id mismatch", ctx.dc.id);
        return FrameOutcome::ProtocolViolation;
    }
    state.server_salt = i64::from_le_bytes(plaintext[0..8].try_into().unwrap());

    let mut cursor = Cursor::new(&plaintext[16..]);
    let message = match Message::deserialize(&mut cursor) {
        Ok(m) => m,
        Err(_) => return FrameOutcome::ProtocolViolation,
    };

    let mut flattened = Vec::new();
    if unwrap_messages(message.msg_id, message.seq_no, message.body, &mut flattened).is_err() {
        warn!("dc {}: malformed container/gzip payload", ctx.dc.id);
        return FrameOutcome::ProtocolViolation;
    }

    for (msg_id, seq_no, body) in flattened {
        match validate_inbound_msg_id(state, msg_id) {
            Ok(()) => {}
            Err(InboundMsgIdError::Duplicate) => continue,
            Err(_) => {
                warn!("dc {}: bad inbound msg_id", ctx.dc.id);
                return FrameOutcome::ProtocolViolation;
            }
        }

        if seq_no % 2 == 1 {
            state.ack_buffer.push(msg_id);
        }

        dispatch(ctx, state, conn, msg_id, &body, event_tx, awaiting_pong).await;
        if state.unauthorized {
            return FrameOutcome::Unauthorized;
        }
    }

    FrameOutcome::Continue
}

/// Recursively flattens `MessageContainer`/`GzipPacked` wrappers into the
/// flat list of `(msg_id, seq_no, body)` tuples the dispatcher expects.
fn unwrap_messages(
    msg_id: i64,
    seq_no: i32,
    body: Vec<u8>,
    out: &mut Vec<(i64, i32, Vec<u8>)>,
) -> Result<(), mtp_tl::DeserializeError> {
    if body.len() < 4 {
        out.push((msg_id, seq_no, body));
        return Ok(());
    }
    let ctor = u32::from_le_bytes(body[..4].try_into().unwrap());
    match ctor {
        id if id == MessageContainer::CONSTRUCTOR_ID => {
            let mut cursor = Cursor::new(&body);
            let container = MessageContainer::deserialize(&mut cursor)?;
            for inner in container.messages {
                unwrap_messages(inner.msg_id, inner.seq_no, inner.body, out)?;
            }
            Ok(())
        }
        id if id == GzipPacked::CONSTRUCTOR_ID => {
            let mut cursor = Cursor::new(&body);
            let packed = GzipPacked::deserialize(&mut cursor)?;
            let unpacked = packed
                .decompress()
                .map_err(|_| mtp_tl::DeserializeError::UnexpectedEof)?;
            unwrap_messages(msg_id, seq_no, unpacked, out)
        }
        id if id == mtp_tl::control::ids::MSG_COPY => {
            // msg_copy#e06046b2 orig_message:Message = MessageCopy; unwrap
            // the nested message and recurse under its own msg_id/seq_no.
            let mut cursor = Cursor::new(&body[4..]);
            let orig = Message::deserialize(&mut cursor)?;
            unwrap_messages(orig.msg_id, orig.seq_no, orig.body, out)
        }
        _ => {
            out.push((msg_id, seq_no, body));
            Ok(())
        }
    }
}

/// Acts on a single flattened inbound message per the §4.3 dispatch table.
async fn dispatch<T: Transport>(
    ctx: &SessionContext,
    state: &mut SessionState,
    conn: &mut Connection<T>,
    msg_id: i64,
    body: &[u8],
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    awaiting_pong: &mut Option<(i64, Instant)>,
) {
    if body.len() < 4 {
        return;
    }
    let ctor = u32::from_le_bytes(body[..4].try_into().unwrap());
    let mut cursor = Cursor::new(body);

    match ctor {
        id if id == RpcResult::CONSTRUCTOR_ID => {
            if let Ok(result) = RpcResult::deserialize(&mut cursor) {
                complete_rpc(state, result.req_msg_id, result.result);
            }
        }
        id if id == BadServerSalt::CONSTRUCTOR_ID => {
            if let Ok(bad) = BadServerSalt::deserialize(&mut cursor) {
                debug!("dc {}: bad server salt, updating", ctx.dc.id);
                state.server_salt = bad.new_server_salt;
                requeue(state, conn, bad.bad_msg_id).await;
            }
        }
        id if id == BadMsgNotification::CONSTRUCTOR_ID => {
            if let Ok(bad) = BadMsgNotification::deserialize(&mut cursor) {
                handle_bad_msg_notification(ctx, state, conn, bad).await;
            }
        }
        id if id == NewSessionCreated::CONSTRUCTOR_ID => {
            if let Ok(new_session) = NewSessionCreated::deserialize(&mut cursor) {
                info!("dc {}: new session created by server", ctx.dc.id);
                state.server_salt = new_session.server_salt;
                state.ack_buffer.clear();
                let _ = event_tx.send(SessionEvent::SessionReset);
            }
        }
        id if id == mtp_tl::control::MsgsAck::CONSTRUCTOR_ID => {
            if let Ok(ack) = mtp_tl::control::MsgsAck::deserialize(&mut cursor) {
                for id in ack.msg_ids {
                    if let Some(pending) = state.pending.get_mut(&id) {
                        pending.acked = true;
                    }
                }
            }
        }
        id if id == Pong::CONSTRUCTOR_ID => {
            if let Ok(pong) = Pong::deserialize(&mut cursor) {
                if awaiting_pong.map(|(id, _)| id) == Some(pong.ping_id) {
                    *awaiting_pong = None;
                }
                complete_rpc(state, pong.msg_id, body.to_vec());
            }
        }
        id if id == Ping::CONSTRUCTOR_ID => {
            if let Ok(ping) = Ping::deserialize(&mut cursor) {
                let mut reply = Vec::new();
                Pong {
                    msg_id,
                    ping_id: ping.ping_id,
                }
                .serialize(&mut reply);
                send_request(state, conn, reply, false, None).await;
            }
        }
        _ => {
            let _ = event_tx.send(SessionEvent::Update(body.to_vec()));
        }
    }
}

fn complete_rpc(state: &mut SessionState, req_msg_id: i64, result: Vec<u8>) {
    let outcome = parse_rpc_result(result);
    if let Err(RequestError::RpcError(e)) = &outcome {
        if e.is("AUTH_KEY_UNREGISTERED") {
            state.unauthorized = true;
        }
    }
    if let Some(pending) = state.pending.remove(&req_msg_id) {
        let _ = pending.response.send(outcome);
    }
}

fn parse_rpc_result(result: Vec<u8>) -> Result<Vec<u8>, RequestError> {
    if result.len() >= 4 {
        let ctor = u32::from_le_bytes(result[..4].try_into().unwrap());
        if ctor == mtp_tl::control::RpcErrorWire::CONSTRUCTOR_ID {
            let mut cursor = Cursor::new(&result);
            if let Ok(wire) = mtp_tl::control::RpcErrorWire::deserialize(&mut cursor) {
                return Err(RequestError::RpcError(crate::errors::RpcError::parse(
                    wire.error_code,
                    &wire.error_message,
                )));
            }
        }
    }
    Ok(result)
}

/// Resubmits the body of `pending[msg_id]` under a fresh msg-id, keeping
/// the same caller-facing `oneshot` sender so the eventual response still
/// reaches the original invoker. Per §5, this is the one case where a
/// request's msg-id changes after submission.
async fn requeue<T: Transport>(state: &mut SessionState, conn: &mut Connection<T>, msg_id: i64) {
    let Some(pending) = state.pending.remove(&msg_id) else {
        return;
    };
    send_request(state, conn, pending.body, pending.content_related, Some(pending.response)).await;
}

async fn handle_bad_msg_notification<T: Transport>(
    ctx: &SessionContext,
    state: &mut SessionState,
    conn: &mut Connection<T>,
    bad: BadMsgNotification,
) {
    match bad.error_code {
        16 | 17 => {
            debug!("dc {}: bad_msg {}, recomputing time_offset", ctx.dc.id, bad.error_code);
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system time is before epoch")
                .as_secs() as i64;
            let msg_time = bad.bad_msg_id >> 32;
            state.time_offset = (msg_time - now) as i32;
            state.last_msg_id = 0;
            requeue(state, conn, bad.bad_msg_id).await;
        }
        32 | 33 => {
            debug!("dc {}: bad_msg {}, resetting seq_no", ctx.dc.id, bad.error_code);
            state.seq_no = 0;
            requeue(state, conn, bad.bad_msg_id).await;
        }
        48 => {
            debug!("dc {}: bad_msg 48, treating as bad server salt", ctx.dc.id);
            requeue(state, conn, bad.bad_msg_id).await;
        }
        code if UNACTIONABLE_BAD_MSG_CODES.contains(&code) => {
            warn!("dc {}: protocol violation, bad_msg code {}", ctx.dc.id, code);
            state.pending.remove(&bad.bad_msg_id);
        }
        code => {
            warn!("dc {}: unlisted bad_msg code {}, dropping request", ctx.dc.id, code);
            state.pending.remove(&bad.bad_msg_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> SessionState {
        SessionState::new(AuthKey::from_bytes([7u8; 256]), 0, 1234, 16384)
    }

    #[test]
    fn msg_ids_strictly_increase_and_stay_a_multiple_of_four() {
        let mut state = test_state();
        let mut last = 0;
        for _ in 0..100 {
            let id = state.next_msg_id();
            assert!(id > last);
            assert_eq!(id % 4, 0);
            last = id;
        }
    }

    #[test]
    fn msg_id_never_goes_below_a_lockstepped_floor() {
        let mut state = test_state();
        state.last_msg_id = i64::MAX - 8;
        let id = state.next_msg_id();
        assert_eq!(id, i64::MAX - 4);
    }

    #[test]
    fn seq_no_alternates_for_content_related_messages() {
        let mut state = test_state();
        assert_eq!(state.next_seq_no(true), 1);
        assert_eq!(state.next_seq_no(true), 3);
        assert_eq!(state.next_seq_no(false), 4);
        assert_eq!(state.next_seq_no(true), 5);
    }

    #[test]
    fn rejects_even_inbound_ids() {
        let mut state = test_state();
        assert_eq!(
            validate_inbound_msg_id(&mut state, 4),
            Err(InboundMsgIdError::Even)
        );
    }

    #[test]
    fn rejects_duplicates_idempotently() {
        let mut state = test_state();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let id = (now << 32) | 1;
        assert!(validate_inbound_msg_id(&mut state, id).is_ok());
        assert_eq!(
            validate_inbound_msg_id(&mut state, id),
            Err(InboundMsgIdError::Duplicate)
        );
        assert_eq!(
            validate_inbound_msg_id(&mut state, id),
            Err(InboundMsgIdError::Duplicate)
        );
    }

    #[test]
    fn rejects_times_outside_the_window() {
        let mut state = test_state();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let too_old = ((now - 301) << 32) | 1;
        let too_new = ((now + 31) << 32) | 1;
        assert_eq!(
            validate_inbound_msg_id(&mut state, too_old),
            Err(InboundMsgIdError::InvalidTime)
        );
        assert_eq!(
            validate_inbound_msg_id(&mut state, too_new),
            Err(InboundMsgIdError::InvalidTime)
        );
    }

    #[test]
    fn unwraps_a_nested_container() {
        let inner = Message {
            msg_id: 5,
            seq_no: 1,
            body: vec![1, 2, 3, 4],
        };
        let mut container_body = Vec::new();
        MessageContainer {
            messages: vec![inner],
        }
        .serialize(&mut container_body);

        let mut out = Vec::new();
        unwrap_messages(1, 0, container_body, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 5);
        assert_eq!(out[0].2, vec![1, 2, 3, 4]);
    }

    #[test]
    fn unwraps_gzip_packed_payloads() {
        let original = vec![9u8; 64];
        let packed = GzipPacked::new(&original);
        let mut packed_body = Vec::new();
        packed.serialize(&mut packed_body);

        let mut out = Vec::new();
        unwrap_messages(1, 0, packed_body, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].2, original);
    }

    #[test]
    fn ack_buffer_collects_content_related_inbound_ids() {
        let mut state = test_state();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        for k in 0..3i64 {
            let id = (now << 32) | (1 + 4 * k);
            validate_inbound_msg_id(&mut state, id).unwrap();
            state.ack_buffer.push(id);
        }
        assert_eq!(state.ack_buffer.len(), 3);
    }
}
