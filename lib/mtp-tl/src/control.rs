// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hand-written TL structures for the control and handshake messages the
//! session engine and auth-key negotiator need to speak natively: the
//! generated business-logic schema is out of scope, and everything else
//! flows through as an opaque serialized blob.
use crate::cursor::{write_tl_bytes, DeserializeError};
use crate::{Cursor, Deserializable, Identifiable, Serializable};
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Write;

/// `message msg_id:long seqno:int bytes:int body:Object = Message;`
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    pub const SIZE_OVERHEAD: usize = 16;

    pub fn constructor_id(&self) -> Result<u32, DeserializeError> {
        if self.body.len() < 4 {
            return Err(DeserializeError::UnexpectedEof);
        }
        Ok(u32::from_le_bytes(self.body[..4].try_into().unwrap()))
    }

    /// Odd `seq_no` marks a content-related message, which the server
    /// expects an explicit acknowledgement for.
    pub fn requires_ack(&self) -> bool {
        self.seq_no % 2 == 1
    }
}

impl Serializable for Message {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend_from_slice(&self.body);
    }
}

impl Deserializable for Message {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        let msg_id = cursor.read_i64()?;
        let seq_no = cursor.read_i32()?;
        let len = cursor.read_i32()?;
        if len < 0 || len as usize > MessageContainer::MAXIMUM_SIZE {
            return Err(DeserializeError::UnexpectedEof);
        }
        let body = cursor.read_raw_vec(len as usize)?;
        Ok(Self {
            msg_id,
            seq_no,
            body,
        })
    }
}

/// `rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult;`
pub struct RpcResult {
    pub req_msg_id: i64,
    pub result: Vec<u8>,
}

impl RpcResult {
    pub fn inner_constructor(&self) -> Result<u32, DeserializeError> {
        if self.result.len() < 4 {
            return Err(DeserializeError::UnexpectedEof);
        }
        Ok(u32::from_le_bytes(self.result[..4].try_into().unwrap()))
    }
}

impl Identifiable for RpcResult {
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl Deserializable for RpcResult {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        let req_msg_id = cursor.read_i64()?;
        let result = cursor.read_to_end().to_vec();
        Ok(Self { req_msg_id, result })
    }
}

/// `rpc_error#2144ca19 error_code:int error_message:string = RpcError;`
pub struct RpcErrorWire {
    pub error_code: i32,
    pub error_message: String,
}

impl Identifiable for RpcErrorWire {
    const CONSTRUCTOR_ID: u32 = 0x2144ca19;
}

impl Deserializable for RpcErrorWire {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        let error_code = cursor.read_i32()?;
        let error_message = String::deserialize(cursor)?;
        Ok(Self {
            error_code,
            error_message,
        })
    }
}

/// `msg_container#73f1f8dc messages:vector<message> = MessageContainer;`
pub struct MessageContainer {
    pub messages: Vec<Message>,
}

impl MessageContainer {
    pub const SIZE_OVERHEAD: usize = 8;

    /// Telegram closes the connection if a container's inner payload is
    /// bigger than this (the container's own overhead already subtracted).
    pub const MAXIMUM_SIZE: usize = 1_044_456 - Self::SIZE_OVERHEAD;

    /// Beyond this many messages in one container, Telegram replies with
    /// `BAD_MESSAGE` `64` (invalid container). Not a hard guarantee, just
    /// a conservative cap.
    pub const MAXIMUM_LENGTH: usize = 100;
}

impl Identifiable for MessageContainer {
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Serializable for MessageContainer {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        self.messages.iter().for_each(|m| m.serialize(buf));
    }
}

impl Deserializable for MessageContainer {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        let len = cursor.read_i32()?;
        if len < 0 {
            return Err(DeserializeError::UnexpectedEof);
        }
        let messages = (0..len)
            .map(|_| Message::deserialize(cursor))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { messages })
    }
}

/// `gzip_packed#3072cfa1 packed_data:string = Object;`
pub struct GzipPacked {
    pub packed_data: Vec<u8>,
}

impl GzipPacked {
    pub fn new(unpacked_data: &[u8]) -> Self {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(unpacked_data).unwrap();
        Self {
            packed_data: encoder.finish().unwrap(),
        }
    }

    pub fn decompress(&self) -> std::io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(Vec::new());
        decoder.write_all(&self.packed_data)?;
        decoder.finish()
    }
}

impl Identifiable for GzipPacked {
    const CONSTRUCTOR_ID: u32 = 0x3072cfa1;
}

impl Serializable for GzipPacked {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        write_tl_bytes(buf, &self.packed_data);
    }
}

impl Deserializable for GzipPacked {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            packed_data: cursor.read_tl_bytes()?,
        })
    }
}

/// `req_pq_multi#be7e8ef1 nonce:int128 = ResPQ;`
pub struct ReqPqMulti {
    pub nonce: [u8; 16],
}

impl Identifiable for ReqPqMulti {
    const CONSTRUCTOR_ID: u32 = 0xbe7e_8ef1;
}

impl Serializable for ReqPqMulti {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
    }
}

/// `req_DH_params#d712e4be nonce:int128 server_nonce:int128 p:string q:string public_key_fingerprint:long encrypted_data:string = Server_DH_Params;`
pub struct ReqDhParams {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub public_key_fingerprint: i64,
    pub encrypted_data: Vec<u8>,
}

impl Identifiable for ReqDhParams {
    const CONSTRUCTOR_ID: u32 = 0xd712_e4be;
}

impl Serializable for ReqDhParams {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        write_tl_bytes(buf, &self.p);
        write_tl_bytes(buf, &self.q);
        self.public_key_fingerprint.serialize(buf);
        write_tl_bytes(buf, &self.encrypted_data);
    }
}

/// `resPQ#05162463 nonce:int128 server_nonce:int128 pq:string server_public_key_fingerprints:Vector long = ResPQ;`
pub struct ResPq {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub pq: Vec<u8>,
    pub server_public_key_fingerprints: Vec<i64>,
}

impl Identifiable for ResPq {
    const CONSTRUCTOR_ID: u32 = 0x0516_2463;
}

impl Deserializable for ResPq {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        let nonce = cursor.read_raw::<16>()?;
        let server_nonce = cursor.read_raw::<16>()?;
        let pq = cursor.read_tl_bytes()?;
        // Vector long is a boxed vector: marker then count then items.
        cursor.expect_constructor(0x1cb5_c415)?;
        let count = cursor.read_u32()? as usize;
        let server_public_key_fingerprints = (0..count)
            .map(|_| cursor.read_i64())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            nonce,
            server_nonce,
            pq,
            server_public_key_fingerprints,
        })
    }
}

/// `p_q_inner_data#83c95aec pq:string p:string q:string nonce:int128 server_nonce:int128 new_nonce:int256 = P_Q_inner_data;`
pub struct PqInnerData {
    pub pq: Vec<u8>,
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub new_nonce: [u8; 32],
}

impl Identifiable for PqInnerData {
    const CONSTRUCTOR_ID: u32 = 0x83c9_5aec;
}

impl Serializable for PqInnerData {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        write_tl_bytes(buf, &self.pq);
        write_tl_bytes(buf, &self.p);
        write_tl_bytes(buf, &self.q);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        self.new_nonce.serialize(buf);
    }
}

/// `server_DH_params_ok#d0e8075c nonce:int128 server_nonce:int128 encrypted_answer:string = Server_DH_Params;`
/// `server_DH_params_fail#79cb045d nonce:int128 server_nonce:int128 new_nonce_hash:int128 = Server_DH_Params;`
pub enum ServerDhParams {
    Ok {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        encrypted_answer: Vec<u8>,
    },
    Fail {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash: [u8; 16],
    },
}

impl Deserializable for ServerDhParams {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        match cursor.read_u32()? {
            0xd0e8_075c => {
                let nonce = cursor.read_raw::<16>()?;
                let server_nonce = cursor.read_raw::<16>()?;
                let encrypted_answer = cursor.read_tl_bytes()?;
                Ok(Self::Ok {
                    nonce,
                    server_nonce,
                    encrypted_answer,
                })
            }
            0x79cb_045d => {
                let nonce = cursor.read_raw::<16>()?;
                let server_nonce = cursor.read_raw::<16>()?;
                let new_nonce_hash = cursor.read_raw::<16>()?;
                Ok(Self::Fail {
                    nonce,
                    server_nonce,
                    new_nonce_hash,
                })
            }
            id => Err(DeserializeError::UnexpectedConstructor { id }),
        }
    }
}

/// `server_DH_inner_data#b5890dba nonce:int128 server_nonce:int128 g:int dh_prime:string g_a:string server_time:int = Server_DH_inner_data;`
pub struct ServerDhInnerData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub g: i32,
    pub dh_prime: Vec<u8>,
    pub g_a: Vec<u8>,
    pub server_time: i32,
}

impl Identifiable for ServerDhInnerData {
    const CONSTRUCTOR_ID: u32 = 0xb589_0dba;
}

impl Deserializable for ServerDhInnerData {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        let nonce = cursor.read_raw::<16>()?;
        let server_nonce = cursor.read_raw::<16>()?;
        let g = cursor.read_i32()?;
        let dh_prime = cursor.read_tl_bytes()?;
        let g_a = cursor.read_tl_bytes()?;
        let server_time = cursor.read_i32()?;
        Ok(Self {
            nonce,
            server_nonce,
            g,
            dh_prime,
            g_a,
            server_time,
        })
    }
}

/// `client_DH_inner_data#6643b654 nonce:int128 server_nonce:int128 retry_id:long g_b:string = Client_DH_Inner_Data;`
pub struct ClientDhInnerData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub retry_id: i64,
    pub g_b: Vec<u8>,
}

impl Identifiable for ClientDhInnerData {
    const CONSTRUCTOR_ID: u32 = 0x6643_b654;
}

impl Serializable for ClientDhInnerData {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        self.retry_id.serialize(buf);
        write_tl_bytes(buf, &self.g_b);
    }
}

/// `set_client_DH_params#f5045f1f nonce:int128 server_nonce:int128 encrypted_data:string = Set_client_DH_params_answer;`
pub struct SetClientDhParams {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub encrypted_data: Vec<u8>,
}

impl Identifiable for SetClientDhParams {
    const CONSTRUCTOR_ID: u32 = 0xf504_5f1f;
}

impl Serializable for SetClientDhParams {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        write_tl_bytes(buf, &self.encrypted_data);
    }
}

/// `dh_gen_ok#3bcbf734 nonce:int128 server_nonce:int128 new_nonce_hash1:int128 = Set_client_DH_params_answer;`
/// `dh_gen_retry#46dc1fb9 ... new_nonce_hash2 ...`
/// `dh_gen_fail#a69dae02 ... new_nonce_hash3 ...`
pub enum DhGenResult {
    Ok {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash1: [u8; 16],
    },
    Retry {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash2: [u8; 16],
    },
    Fail {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash3: [u8; 16],
    },
}

impl Deserializable for DhGenResult {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        let id = cursor.read_u32()?;
        let nonce = cursor.read_raw::<16>()?;
        let server_nonce = cursor.read_raw::<16>()?;
        let new_nonce_hash = cursor.read_raw::<16>()?;
        match id {
            0x3bcb_f734 => Ok(Self::Ok {
                nonce,
                server_nonce,
                new_nonce_hash1: new_nonce_hash,
            }),
            0x46dc_1fb9 => Ok(Self::Retry {
                nonce,
                server_nonce,
                new_nonce_hash2: new_nonce_hash,
            }),
            0xa69d_ae02 => Ok(Self::Fail {
                nonce,
                server_nonce,
                new_nonce_hash3: new_nonce_hash,
            }),
            id => Err(DeserializeError::UnexpectedConstructor { id }),
        }
    }
}

/// `bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int error_code:int new_server_salt:long = BadMsgNotification;`
pub struct BadServerSalt {
    pub bad_msg_id: i64,
    pub bad_msg_seqno: i32,
    pub error_code: i32,
    pub new_server_salt: i64,
}

impl Identifiable for BadServerSalt {
    const CONSTRUCTOR_ID: u32 = 0xedab_447b;
}

impl Deserializable for BadServerSalt {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            bad_msg_id: cursor.read_i64()?,
            bad_msg_seqno: cursor.read_i32()?,
            error_code: cursor.read_i32()?,
            new_server_salt: cursor.read_i64()?,
        })
    }
}

/// `bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int error_code:int = BadMsgNotification;`
pub struct BadMsgNotification {
    pub bad_msg_id: i64,
    pub bad_msg_seqno: i32,
    pub error_code: i32,
}

impl Identifiable for BadMsgNotification {
    const CONSTRUCTOR_ID: u32 = 0xa7ef_f811;
}

impl Deserializable for BadMsgNotification {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            bad_msg_id: cursor.read_i64()?,
            bad_msg_seqno: cursor.read_i32()?,
            error_code: cursor.read_i32()?,
        })
    }
}

/// `msgs_ack#62d6b459 msg_ids:Vector long = MsgsAck;`
pub struct MsgsAck {
    pub msg_ids: Vec<i64>,
}

impl Identifiable for MsgsAck {
    const CONSTRUCTOR_ID: u32 = 0x62d6_b459;
}

impl Serializable for MsgsAck {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        0x1cb5_c415u32.serialize(buf);
        crate::write_vector(&self.msg_ids, buf);
    }
}

impl Deserializable for MsgsAck {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        cursor.expect_constructor(0x1cb5_c415)?;
        Ok(Self {
            msg_ids: crate::read_vector(cursor)?,
        })
    }
}

/// `new_session_created#9ec20908 first_msg_id:long unique_id:long server_salt:long = NewSession;`
pub struct NewSessionCreated {
    pub first_msg_id: i64,
    pub unique_id: i64,
    pub server_salt: i64,
}

impl Identifiable for NewSessionCreated {
    const CONSTRUCTOR_ID: u32 = 0x9ec2_0908;
}

impl Deserializable for NewSessionCreated {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            first_msg_id: cursor.read_i64()?,
            unique_id: cursor.read_i64()?,
            server_salt: cursor.read_i64()?,
        })
    }
}

/// `ping#7abe77ec ping_id:long = Pong;`
pub struct Ping {
    pub ping_id: i64,
}

impl Identifiable for Ping {
    const CONSTRUCTOR_ID: u32 = 0x7abe_77ec;
}

impl Serializable for Ping {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
    }
}

/// `ping_delay_disconnect#f3427b8c ping_id:long disconnect_delay:int = Pong;`
pub struct PingDelayDisconnect {
    pub ping_id: i64,
    pub disconnect_delay: i32,
}

impl Identifiable for PingDelayDisconnect {
    const CONSTRUCTOR_ID: u32 = 0xf342_7b8c;
}

impl Serializable for PingDelayDisconnect {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
        self.disconnect_delay.serialize(buf);
    }
}

/// `pong#347773c5 msg_id:long ping_id:long = Pong;`
pub struct Pong {
    pub msg_id: i64,
    pub ping_id: i64,
}

impl Identifiable for Pong {
    const CONSTRUCTOR_ID: u32 = 0x3477_73c5;
}

impl Deserializable for Pong {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            msg_id: cursor.read_i64()?,
            ping_id: cursor.read_i64()?,
        })
    }
}

impl Serializable for Pong {
    fn serialize(&self, buf: &mut Vec<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        self.ping_id.serialize(buf);
    }
}

/// `destroy_session_ok#e22045fc session_id:long = DestroySessionRes;`
/// `destroy_session_none#62d350c9 session_id:long = DestroySessionRes;`
pub enum DestroySessionResult {
    Ok { session_id: i64 },
    None { session_id: i64 },
}

impl Deserializable for DestroySessionResult {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        match cursor.read_u32()? {
            0xe220_45fc => Ok(Self::Ok {
                session_id: cursor.read_i64()?,
            }),
            0x62d3_50c9 => Ok(Self::None {
                session_id: cursor.read_i64()?,
            }),
            id => Err(DeserializeError::UnexpectedConstructor { id }),
        }
    }
}

/// `future_salt#0949d9dc valid_since:int valid_until:int salt:long = FutureSalt;`
pub struct FutureSalt {
    pub valid_since: i32,
    pub valid_until: i32,
    pub salt: i64,
}

impl Identifiable for FutureSalt {
    const CONSTRUCTOR_ID: u32 = 0x0949_d9dc;
}

impl Deserializable for FutureSalt {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            valid_since: cursor.read_i32()?,
            valid_until: cursor.read_i32()?,
            salt: cursor.read_i64()?,
        })
    }
}

/// `future_salts#ae500895 req_msg_id:long now:int salts:vector<future_salt> = FutureSalts;`
pub struct FutureSalts {
    pub req_msg_id: i64,
    pub now: i32,
    pub salts: Vec<FutureSalt>,
}

impl Identifiable for FutureSalts {
    const CONSTRUCTOR_ID: u32 = 0xae50_0895;
}

impl Deserializable for FutureSalts {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.expect_constructor(Self::CONSTRUCTOR_ID)?;
        let req_msg_id = cursor.read_i64()?;
        let now = cursor.read_i32()?;
        let count = cursor.read_i32()?;
        let salts = (0..count)
            .map(|_| FutureSalt::deserialize(cursor))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            req_msg_id,
            now,
            salts,
        })
    }
}

/// `msg_detailed_info#276d3ec6 msg_id:long answer_msg_id:long bytes:int status:int = MsgDetailedInfo;`
/// `msg_new_detailed_info#809db6df answer_msg_id:long bytes:int status:int = MsgDetailedInfo;`
pub enum MsgDetailedInfo {
    Info { answer_msg_id: i64 },
    New { answer_msg_id: i64 },
}

impl Deserializable for MsgDetailedInfo {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        match cursor.read_u32()? {
            0x276d_3ec6 => {
                let _msg_id = cursor.read_i64()?;
                let answer_msg_id = cursor.read_i64()?;
                let _bytes = cursor.read_i32()?;
                let _status = cursor.read_i32()?;
                Ok(Self::Info { answer_msg_id })
            }
            0x809d_b6df => {
                let answer_msg_id = cursor.read_i64()?;
                let _bytes = cursor.read_i32()?;
                let _status = cursor.read_i32()?;
                Ok(Self::New { answer_msg_id })
            }
            id => Err(DeserializeError::UnexpectedConstructor { id }),
        }
    }
}

/// Constructor ids for service messages whose bodies the session engine
/// only needs to recognize for dispatch, not fully parse (most of their
/// handlers are no-ops or simple acknowledgements on the wire today).
pub mod ids {
    pub const MSGS_STATE_REQ: u32 = 0xda69_fb52;
    pub const MSGS_STATE_INFO: u32 = 0x04de_b57d;
    pub const MSGS_ALL_INFO: u32 = 0x8cc0_d131;
    pub const MSG_DETAILED_INFO: u32 = 0x276d_3ec6;
    pub const MSG_NEW_DETAILED_INFO: u32 = 0x809d_b6df;
    pub const MSG_RESEND_REQ: u32 = 0x7d86_1a08;
    pub const MSG_RESEND_ANS_REQ: u32 = 0x8610_baeb;
    pub const MSG_COPY: u32 = 0xe060_46b2;
    pub const HTTP_WAIT: u32 = 0x9299_359f;
    pub const RPC_ANSWER_UNKNOWN: u32 = 0x5e2a_d36e;
    pub const RPC_ANSWER_DROPPED_RUNNING: u32 = 0xcd78_e586;
    pub const RPC_ANSWER_DROPPED: u32 = 0xa43a_d8b7;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips() {
        let msg = Message {
            msg_id: 123,
            seq_no: 5,
            body: vec![1, 2, 3, 4],
        };
        let mut buf = Vec::new();
        msg.serialize(&mut buf);
        assert_eq!(buf.len(), Message::SIZE_OVERHEAD + 4);

        let mut cursor = Cursor::new(&buf);
        let back = Message::deserialize(&mut cursor).unwrap();
        assert_eq!(back.msg_id, 123);
        assert_eq!(back.seq_no, 5);
        assert_eq!(back.body, vec![1, 2, 3, 4]);
        assert!(back.requires_ack());
    }

    #[test]
    fn msg_container_constructor_matches_wire() {
        // 0x73f1f8dc in little-endian bytes, as observed on the wire.
        assert_eq!(
            MessageContainer::CONSTRUCTOR_ID.to_le_bytes(),
            [0xdc, 0xf8, 0xf1, 0x73]
        );
    }

    #[test]
    fn gzip_packed_constructor_matches_wire() {
        assert_eq!(
            GzipPacked::CONSTRUCTOR_ID.to_le_bytes(),
            [0xa1, 0xcf, 0x72, 0x30]
        );
    }

    #[test]
    fn gzip_round_trips() {
        let original = b"some data worth compressing, repeated, repeated, repeated";
        let packed = GzipPacked::new(original);
        assert_eq!(packed.decompress().unwrap(), original);
    }

    #[test]
    fn rpc_result_round_trips() {
        let mut buf = Vec::new();
        RpcResult::CONSTRUCTOR_ID.serialize(&mut buf);
        42i64.serialize(&mut buf);
        buf.extend_from_slice(&[9, 9, 9]);

        let mut cursor = Cursor::new(&buf);
        let result = RpcResult::deserialize(&mut cursor).unwrap();
        assert_eq!(result.req_msg_id, 42);
        assert_eq!(result.result, vec![9, 9, 9]);
    }

    #[test]
    fn msgs_ack_round_trips() {
        let ack = MsgsAck {
            msg_ids: vec![1, 2, 3],
        };
        let mut buf = Vec::new();
        ack.serialize(&mut buf);

        let mut cursor = Cursor::new(&buf);
        let back = MsgsAck::deserialize(&mut cursor).unwrap();
        assert_eq!(back.msg_ids, vec![1, 2, 3]);
    }
}
