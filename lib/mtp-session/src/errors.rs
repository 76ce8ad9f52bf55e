// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::fmt;
use std::io;

pub use mtp_tl::DeserializeError;

/// Re-exported under the name the rest of the crate (and its callers)
/// refer to it by; the framer itself lives in `mtp-proto`.
pub mod transport {
    pub use mtp_proto::Error as TransportError;
}

/// Errors produced while running the auth-key handshake (`negotiator`).
pub mod authentication {
    use num_bigint::BigUint;
    use std::fmt;

    #[derive(Clone, Debug, PartialEq)]
    pub enum AuthKeyGenError {
        /// The response data was invalid and did not match our expectations.
        InvalidResponse { error: mtp_tl::DeserializeError },
        /// The server's nonce did not match ours.
        InvalidNonce { got: [u8; 16], expected: [u8; 16] },
        /// The server's PQ number was not of the right size.
        InvalidPQSize { size: usize },
        /// None of the server's fingerprints matched a known RSA key.
        NoMatchingRsaKey { fingerprints: Vec<i64> },
        /// The server failed to generate the Diffie-Hellman parameters.
        DHParamsFail,
        /// The server's nonce changed mid-handshake.
        InvalidServerNonce { got: [u8; 16], expected: [u8; 16] },
        /// The server's `encrypted_answer` is not correctly padded.
        EncryptedResponseNotPadded { len: usize },
        /// Failed to parse the decrypted `ServerDHInnerData`.
        InvalidDhInnerData { error: mtp_tl::DeserializeError },
        /// The caller-supplied `DhPrimeChecker` rejected `dh_prime`.
        InvalidDhPrime,
        /// Some parameter (`g`, `g_a` or `g_b`) was out of its allowed range.
        GParameterOutOfRange {
            value: BigUint,
            low: BigUint,
            high: BigUint,
        },
        /// Server asked for the DH generation to be retried from step 5.
        DHGenRetry,
        /// Server reported the DH generation failed outright.
        DHGenFail,
        /// The plaintext answer hash did not match what we decrypted.
        InvalidAnswerHash { got: [u8; 20], expected: [u8; 20] },
        /// The new-nonce hash returned by the server did not match.
        InvalidNewNonceHash { got: [u8; 16], expected: [u8; 16] },
    }

    impl std::error::Error for AuthKeyGenError {}

    impl fmt::Display for AuthKeyGenError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::InvalidResponse { error } => write!(f, "invalid server response: {error}"),
                Self::InvalidNonce { got, expected } => {
                    write!(f, "invalid nonce: got {got:?}, expected {expected:?}")
                }
                Self::InvalidPQSize { size } => write!(f, "invalid pq size {size}"),
                Self::NoMatchingRsaKey { fingerprints } => write!(
                    f,
                    "none of the server's fingerprints are known: {fingerprints:?}"
                ),
                Self::DHParamsFail => write!(f, "server failed to generate DH parameters"),
                Self::InvalidServerNonce { got, expected } => write!(
                    f,
                    "invalid server nonce: got {got:?}, expected {expected:?}"
                ),
                Self::EncryptedResponseNotPadded { len } => write!(
                    f,
                    "the encrypted server response was {len} bytes long, which is not correctly padded"
                ),
                Self::InvalidDhInnerData { error } => {
                    write!(f, "could not deserialize DH inner data: {error}")
                }
                Self::InvalidDhPrime => write!(f, "the server-chosen DH prime failed validation"),
                Self::GParameterOutOfRange { low, high, value } => write!(
                    f,
                    "the parameter g = {value} was not in the range {low}..{high}"
                ),
                Self::DHGenRetry => write!(f, "the server asked to retry DH generation"),
                Self::DHGenFail => write!(f, "the generation of DH parameters failed"),
                Self::InvalidAnswerHash { got, expected } => {
                    write!(f, "invalid answer hash: got {got:?}, expected {expected:?}")
                }
                Self::InvalidNewNonceHash { got, expected } => write!(
                    f,
                    "invalid new nonce hash: got {got:?}, expected {expected:?}"
                ),
            }
        }
    }

    impl From<mtp_tl::DeserializeError> for AuthKeyGenError {
        fn from(error: mtp_tl::DeserializeError) -> Self {
            Self::InvalidResponse { error }
        }
    }
}

/// The error type reported by the server when a request is misused.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// A numerical value similar to HTTP status codes.
    pub code: i32,
    /// The ASCII error name, normally in screaming snake case, with any
    /// embedded numeric suffix stripped into `value`.
    pub name: String,
    /// The numeric suffix extracted from the error name, if any
    /// (e.g. `FLOOD_WAIT_31` -> `value: Some(31)`).
    pub value: Option<u32>,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.name)?;
        if let Some(value) = self.value {
            write!(f, " (value: {value})")?;
        }
        Ok(())
    }
}

impl RpcError {
    pub fn parse(error_code: i32, error_message: &str) -> Self {
        if let Some(value) = error_message
            .split(|c: char| !c.is_ascii_digit())
            .find(|s| !s.is_empty())
        {
            let mut to_remove = String::with_capacity(1 + value.len());
            to_remove.push('_');
            to_remove.push_str(value);
            Self {
                code: error_code,
                name: error_message.replace(&to_remove, ""),
                value: Some(value.parse().unwrap()),
            }
        } else {
            Self {
                code: error_code,
                name: error_message.to_string(),
                value: None,
            }
        }
    }

    /// Matches on the name of the RPC error (case-sensitive).
    ///
    /// A single trailing or leading asterisk (`'*'`) checks a prefix or
    /// suffix match instead of equality, e.g. `is("PHONE_CODE_*")`.
    pub fn is(&self, rpc_error: &str) -> bool {
        if let Some(rpc_error) = rpc_error.strip_suffix('*') {
            self.name.starts_with(rpc_error)
        } else if let Some(rpc_error) = rpc_error.strip_prefix('*') {
            self.name.ends_with(rpc_error)
        } else {
            self.name == rpc_error
        }
    }
}

/// Bad-msg-notification codes that this core does not retry, per the
/// decision recorded for this class of error: they are classified as a
/// protocol violation and the referenced request is simply dropped.
pub const UNACTIONABLE_BAD_MSG_CODES: [i32; 6] = [18, 19, 20, 34, 35, 64];

/// Errors surfaced while waiting for the reply to a single request,
/// internal to the session engine (the router turns these into
/// `InvocationError` for the caller).
#[derive(Debug)]
pub enum RequestError {
    RpcError(RpcError),
    Dropped,
    /// The connection was torn down (protocol violation, EOF, ...) with the
    /// request still pending.
    SessionClosed,
    Deserialize(DeserializeError),
}

impl std::error::Error for RequestError {}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RpcError(e) => write!(f, "{e}"),
            Self::Dropped => write!(f, "request dropped (cancelled)"),
            Self::SessionClosed => write!(f, "session closed while request was pending"),
            Self::Deserialize(e) => write!(f, "bad response: {e}"),
        }
    }
}

impl From<DeserializeError> for RequestError {
    fn from(error: DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl RequestError {
    /// Whether the same request body should be retransmitted on a new
    /// msg-id, as opposed to surfacing the error to the caller.
    pub fn should_retransmit(&self) -> bool {
        matches!(self, Self::Dropped)
    }
}

#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    Transport(mtp_proto::Error),
    Deserialize(DeserializeError),
}

impl std::error::Error for ReadError {}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "read error, IO failed: {e}"),
            Self::Transport(e) => write!(f, "read error, transport-level: {e}"),
            Self::Deserialize(e) => write!(f, "read error, bad response: {e}"),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<mtp_proto::Error> for ReadError {
    fn from(error: mtp_proto::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<DeserializeError> for ReadError {
    fn from(error: DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<mtp_net::ConnectionError> for ReadError {
    fn from(error: mtp_net::ConnectionError) -> Self {
        match error {
            mtp_net::ConnectionError::Io(e) => Self::Io(e),
            mtp_net::ConnectionError::Transport(e) => Self::Transport(e),
            mtp_net::ConnectionError::Closed => {
                Self::Io(io::Error::from(io::ErrorKind::UnexpectedEof))
            }
            mtp_net::ConnectionError::FrameTooLarge => {
                Self::Io(io::Error::from(io::ErrorKind::InvalidData))
            }
        }
    }
}

/// This error occurs when a remote procedure call was unsuccessful.
#[derive(Debug)]
pub enum InvocationError {
    Rpc(RpcError),
    Dropped,
    SessionClosed,
    Read(ReadError),
}

impl std::error::Error for InvocationError {}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(err) => write!(f, "request error: {err}"),
            Self::Dropped => write!(f, "request error: dropped (cancelled)"),
            Self::SessionClosed => write!(f, "request error: session closed"),
            Self::Read(err) => write!(f, "request error: {err}"),
        }
    }
}

impl From<ReadError> for InvocationError {
    fn from(error: ReadError) -> Self {
        Self::Read(error)
    }
}

impl From<RequestError> for InvocationError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::RpcError(e) => Self::Rpc(e),
            RequestError::Dropped => Self::Dropped,
            RequestError::SessionClosed => Self::SessionClosed,
            RequestError::Deserialize(e) => Self::Read(ReadError::Deserialize(e)),
        }
    }
}

impl InvocationError {
    /// See [`RpcError::is`]. Returns `false` if this is not an RPC error.
    #[inline]
    pub fn is(&self, rpc_error: &str) -> bool {
        match self {
            Self::Rpc(rpc) => rpc.is(rpc_error),
            _ => false,
        }
    }
}

/// This error occurs when the process to generate an authorization key fails.
#[derive(Debug)]
pub enum AuthorizationError {
    Gen(authentication::AuthKeyGenError),
    Invoke(InvocationError),
}

impl std::error::Error for AuthorizationError {}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gen(err) => write!(f, "authorization error: {err}"),
            Self::Invoke(err) => write!(f, "authorization error: {err}"),
        }
    }
}

impl From<authentication::AuthKeyGenError> for AuthorizationError {
    fn from(error: authentication::AuthKeyGenError) -> Self {
        Self::Gen(error)
    }
}

impl From<InvocationError> for AuthorizationError {
    fn from(error: InvocationError) -> Self {
        Self::Invoke(error)
    }
}

impl From<ReadError> for AuthorizationError {
    fn from(error: ReadError) -> Self {
        Self::Invoke(InvocationError::from(error))
    }
}

impl From<io::Error> for AuthorizationError {
    fn from(error: io::Error) -> Self {
        Self::from(ReadError::from(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rpc_error_parsing() {
        assert_eq!(
            RpcError::parse(400, "CHAT_INVALID"),
            RpcError {
                code: 400,
                name: "CHAT_INVALID".into(),
                value: None,
            }
        );

        assert_eq!(
            RpcError::parse(420, "FLOOD_WAIT_31"),
            RpcError {
                code: 420,
                name: "FLOOD_WAIT".into(),
                value: Some(31),
            }
        );

        assert_eq!(
            RpcError::parse(303, "USER_MIGRATE_5"),
            RpcError {
                code: 303,
                name: "USER_MIGRATE".into(),
                value: Some(5),
            }
        );
    }

    #[test]
    fn glob_match() {
        let err = RpcError::parse(420, "FLOOD_WAIT_2");
        assert!(err.is("FLOOD_WAIT*"));
        assert!(err.is("*WAIT"));
        assert!(!err.is("FLOOD_WAIT"));
    }
}
