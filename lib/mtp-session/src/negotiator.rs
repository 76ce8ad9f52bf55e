// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The auth-key handshake: `req_pq_multi` → `req_DH_params` →
//! `set_client_DH_params`, negotiating a 2048-bit shared secret with a
//! datacenter over an as-yet-unencrypted connection.
//!
//! Each step is a pure function from its inputs to `(request bytes, next
//! step's state)`, the way the teacher's `authentication` module keeps
//! the cryptographic steps free of I/O so they can be unit tested against
//! captured wire traffic; [`negotiate`] is the thin driver that actually
//! talks to a [`mtp_net::Connection`].
use std::time::{SystemTime, UNIX_EPOCH};

use getrandom::getrandom;
use mtp_crypto::factorize::factorize;
use mtp_crypto::{decrypt_ige, encrypt_ige, generate_key_data_from_nonce, rsa, AuthKey};
use mtp_net::Connection;
use mtp_proto::Transport;
use mtp_tl::control::{
    ClientDhInnerData, DhGenResult, PqInnerData, ReqDhParams, ReqPqMulti, ResPq, ServerDhInnerData,
    ServerDhParams, SetClientDhParams,
};
use mtp_tl::{Cursor, Deserializable, Serializable};
use num_bigint::{BigUint, ToBigUint};
use sha1::{Digest, Sha1};

use crate::dh_prime::DhPrimeChecker;
use crate::errors::authentication::AuthKeyGenError as Error;
use crate::errors::ReadError;
use crate::rsa_keys::PublicRsaKeyRegister;

/// Data generated by [`do_step1`], needed for [`do_step2`].
pub struct Step1 {
    nonce: [u8; 16],
}

/// Data generated by [`do_step2`], needed for [`do_step3`]. `Clone` so a
/// `DhGenRetry` can redrive [`step3`] with fresh randomness against the
/// same server response without re-running the first two steps.
#[derive(Clone)]
pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

/// Data generated by [`do_step3`], needed for [`create_key`].
pub struct Step3 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    gab: BigUint,
    time_offset: i32,
}

/// The end result of a successful handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    pub auth_key: AuthKey,
    pub time_offset: i32,
    pub first_salt: i64,
}

/// Step 1: generate a fresh client nonce and ask the server for its `pq`.
pub fn do_step1(random_bytes: &[u8; 16]) -> (Vec<u8>, Step1) {
    let nonce = *random_bytes;
    let mut body = Vec::new();
    ReqPqMulti { nonce }.serialize(&mut body);
    (body, Step1 { nonce })
}

pub fn step1() -> (Vec<u8>, Step1) {
    let mut random_bytes = [0u8; 16];
    getrandom(&mut random_bytes).expect("failed to generate secure data for auth key");
    do_step1(&random_bytes)
}

/// Step 2: factorize `pq`, then ask for the Diffie-Hellman parameters
/// under an RSA-encrypted `p_q_inner_data`.
pub fn do_step2(
    data: Step1,
    response: &[u8],
    random_bytes: &[u8; 32 + 256],
    rsa_keys: &dyn PublicRsaKeyRegister,
) -> Result<(Vec<u8>, Step2), Error> {
    let Step1 { nonce } = data;
    let res_pq = ResPq::deserialize(&mut Cursor::new(response))?;

    check_nonce(&res_pq.nonce, &nonce)?;

    if res_pq.pq.len() != 8 {
        return Err(Error::InvalidPQSize {
            size: res_pq.pq.len(),
        });
    }
    let pq = {
        let mut buffer = [0; 8];
        buffer.copy_from_slice(&res_pq.pq);
        u64::from_be_bytes(buffer)
    };

    let (p, q) = factorize(pq);
    let new_nonce: [u8; 32] = random_bytes[..32].try_into().unwrap();
    let random_bytes: [u8; 256] = random_bytes[32..].try_into().unwrap();

    let p_bytes = strip_leading_zeros(&p.to_be_bytes());
    let q_bytes = strip_leading_zeros(&q.to_be_bytes());

    let mut pq_inner_data = Vec::new();
    PqInnerData {
        pq: res_pq.pq.clone(),
        p: p_bytes.clone(),
        q: q_bytes.clone(),
        nonce,
        server_nonce: res_pq.server_nonce,
        new_nonce,
    }
    .serialize(&mut pq_inner_data);

    let fingerprint = res_pq
        .server_public_key_fingerprints
        .iter()
        .copied()
        .find(|&fp| rsa_keys.key_for_fingerprint(fp).is_some())
        .ok_or_else(|| Error::NoMatchingRsaKey {
            fingerprints: res_pq.server_public_key_fingerprints.clone(),
        })?;

    let key = rsa_keys.key_for_fingerprint(fingerprint).unwrap();
    let encrypted_data = rsa::encrypt_hashed(&pq_inner_data, &key, &random_bytes);

    let mut body = Vec::new();
    ReqDhParams {
        nonce,
        server_nonce: res_pq.server_nonce,
        p: p_bytes,
        q: q_bytes,
        public_key_fingerprint: fingerprint,
        encrypted_data,
    }
    .serialize(&mut body);

    Ok((
        body,
        Step2 {
            nonce,
            server_nonce: res_pq.server_nonce,
            new_nonce,
        },
    ))
}

pub fn step2(
    data: Step1,
    response: &[u8],
    rsa_keys: &dyn PublicRsaKeyRegister,
) -> Result<(Vec<u8>, Step2), Error> {
    let mut random_bytes = [0u8; 32 + 256];
    getrandom(&mut random_bytes).expect("failed to generate secure data for auth key");
    do_step2(data, response, &random_bytes, rsa_keys)
}

/// Step 3: validate the server's DH parameters, compute our half of the
/// exchange and send back the encrypted `client_DH_inner_data`.
pub fn do_step3(
    data: Step2,
    response: &[u8],
    random_bytes: &[u8; 256 + 16],
    now: i32,
    dh_checker: &dyn DhPrimeChecker,
) -> Result<(Vec<u8>, Step3), Error> {
    let Step2 {
        nonce,
        server_nonce,
        new_nonce,
    } = data;

    let server_dh_params = ServerDhParams::deserialize(&mut Cursor::new(response))?;
    let (dh_nonce, dh_server_nonce, encrypted_answer) = match server_dh_params {
        ServerDhParams::Fail {
            nonce: got_nonce,
            server_nonce: got_server_nonce,
            new_nonce_hash,
        } => {
            check_nonce(&got_nonce, &nonce)?;
            check_server_nonce(&got_server_nonce, &server_nonce)?;
            let sha: [u8; 20] = Sha1::digest(new_nonce).into();
            let expected: [u8; 16] = sha[4..20].try_into().unwrap();
            check_new_nonce_hash(&new_nonce_hash, &expected)?;
            return Err(Error::DHParamsFail);
        }
        ServerDhParams::Ok {
            nonce: got_nonce,
            server_nonce: got_server_nonce,
            encrypted_answer,
        } => (got_nonce, got_server_nonce, encrypted_answer),
    };

    check_nonce(&dh_nonce, &nonce)?;
    check_server_nonce(&dh_server_nonce, &server_nonce)?;

    if encrypted_answer.len() % 16 != 0 {
        return Err(Error::EncryptedResponseNotPadded {
            len: encrypted_answer.len(),
        });
    }

    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    let plaintext = decrypt_ige(&encrypted_answer, &key, &iv);

    let got_answer_hash: [u8; 20] = plaintext[..20].try_into().unwrap();
    let mut cursor = Cursor::new(&plaintext[20..]);
    let inner = ServerDhInnerData::deserialize(&mut cursor)
        .map_err(|error| Error::InvalidDhInnerData { error })?;

    let expected_answer_hash: [u8; 20] =
        Sha1::digest(&plaintext[20..20 + cursor.pos()]).into();
    if got_answer_hash != expected_answer_hash {
        return Err(Error::InvalidAnswerHash {
            got: got_answer_hash,
            expected: expected_answer_hash,
        });
    }

    check_nonce(&inner.nonce, &nonce)?;
    check_server_nonce(&inner.server_nonce, &server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    let g = inner
        .g
        .to_biguint()
        .ok_or_else(|| Error::GParameterOutOfRange {
            value: BigUint::from(0u8),
            low: BigUint::from(0u8),
            high: BigUint::from(0u8),
        })?;
    let g_a = BigUint::from_bytes_be(&inner.g_a);

    if !dh_checker.check(&dh_prime, inner.g) {
        return Err(Error::InvalidDhPrime);
    }

    let time_offset = inner.server_time - now;

    let b = BigUint::from_bytes_be(&random_bytes[..256]);
    let g_b = g.modpow(&b, &dh_prime);
    let gab = g_a.modpow(&b, &dh_prime);
    let random_bytes: [u8; 16] = random_bytes[256..].try_into().unwrap();

    let one = BigUint::from(1u8);
    let dh_prime_minus_one = &dh_prime - &one;
    check_g_in_range(&g, &one, &dh_prime_minus_one)?;
    check_g_in_range(&g_a, &one, &dh_prime_minus_one)?;
    check_g_in_range(&g_b, &one, &dh_prime_minus_one)?;

    let safety_range = BigUint::from(1u8) << (2048 - 64);
    let upper_safety_range = &dh_prime - &safety_range;
    check_g_in_range(&g_a, &safety_range, &upper_safety_range)?;
    check_g_in_range(&g_b, &safety_range, &upper_safety_range)?;

    let mut client_dh_inner = Vec::new();
    ClientDhInnerData {
        nonce,
        server_nonce,
        retry_id: 0,
        g_b: g_b.to_bytes_be(),
    }
    .serialize(&mut client_dh_inner);

    let sha: [u8; 20] = Sha1::digest(&client_dh_inner).into();
    let mut hashed = Vec::with_capacity(20 + client_dh_inner.len() + 16);
    hashed.extend(sha);
    hashed.extend(&client_dh_inner);
    let pad_len = (16 - (hashed.len() % 16)) % 16;
    hashed.extend(&random_bytes[..pad_len]);

    let encrypted_data = encrypt_ige(&hashed, &key, &iv);

    let mut body = Vec::new();
    SetClientDhParams {
        nonce,
        server_nonce,
        encrypted_data,
    }
    .serialize(&mut body);

    Ok((
        body,
        Step3 {
            nonce,
            server_nonce,
            new_nonce,
            gab,
            time_offset,
        },
    ))
}

pub fn step3(
    data: Step2,
    response: &[u8],
    dh_checker: &dyn DhPrimeChecker,
) -> Result<(Vec<u8>, Step3), Error> {
    let mut random_bytes = [0u8; 256 + 16];
    getrandom(&mut random_bytes).expect("failed to generate secure data for auth key");
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before epoch")
        .as_secs() as i32;
    do_step3(data, response, &random_bytes, now, dh_checker)
}

/// Step 4: interpret the server's final answer and, if it accepted our
/// parameters, materialize the shared `auth_key`.
pub fn create_key(data: Step3, response: &[u8]) -> Result<Finished, Error> {
    let Step3 {
        nonce,
        server_nonce,
        new_nonce,
        gab,
        time_offset,
    } = data;

    let dh_gen = DhGenResult::deserialize(&mut Cursor::new(response))?;
    struct Parsed {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash: [u8; 16],
        nonce_number: u8,
        ok: bool,
    }
    let parsed = match dh_gen {
        DhGenResult::Ok {
            nonce,
            server_nonce,
            new_nonce_hash1,
        } => Parsed {
            nonce,
            server_nonce,
            new_nonce_hash: new_nonce_hash1,
            nonce_number: 1,
            ok: true,
        },
        DhGenResult::Retry {
            nonce,
            server_nonce,
            new_nonce_hash2,
        } => Parsed {
            nonce,
            server_nonce,
            new_nonce_hash: new_nonce_hash2,
            nonce_number: 2,
            ok: false,
        },
        DhGenResult::Fail {
            nonce,
            server_nonce,
            new_nonce_hash3,
        } => Parsed {
            nonce,
            server_nonce,
            new_nonce_hash: new_nonce_hash3,
            nonce_number: 3,
            ok: false,
        },
    };

    check_nonce(&parsed.nonce, &nonce)?;
    check_server_nonce(&parsed.server_nonce, &server_nonce)?;

    let auth_key = {
        let mut buffer = [0u8; 256];
        let gab_bytes = gab.to_bytes_be();
        let skip = buffer.len() - gab_bytes.len();
        buffer[skip..].copy_from_slice(&gab_bytes);
        AuthKey::from_bytes(buffer)
    };

    let new_nonce_hash = auth_key.calc_new_nonce_hash(&new_nonce, parsed.nonce_number);
    check_new_nonce_hash(&parsed.new_nonce_hash, &new_nonce_hash)?;

    if !parsed.ok {
        return if parsed.nonce_number == 2 {
            Err(Error::DHGenRetry)
        } else {
            Err(Error::DHGenFail)
        };
    }

    let first_salt = {
        let mut buffer = [0u8; 8];
        buffer
            .iter_mut()
            .zip(&new_nonce[..8])
            .zip(&server_nonce[..8])
            .for_each(|((x, a), b)| *x = a ^ b);
        i64::from_le_bytes(buffer)
    };

    Ok(Finished {
        auth_key,
        time_offset,
        first_salt,
    })
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    match bytes.iter().position(|&b| b != 0) {
        Some(pos) => bytes[pos..].to_vec(),
        None => vec![0],
    }
}

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNonce {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidServerNonce {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNewNonceHash {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_g_in_range(value: &BigUint, low: &BigUint, high: &BigUint) -> Result<(), Error> {
    if low < value && value < high {
        Ok(())
    } else {
        Err(Error::GParameterOutOfRange {
            value: value.clone(),
            low: low.clone(),
            high: high.clone(),
        })
    }
}

/// Wraps `body` in the unencrypted message envelope (`auth_key_id=0 ∥
/// msg_id ∥ len ∥ body`) used for the whole handshake, since no shared
/// secret exists yet to encrypt it with.
fn wrap_plain(body: &[u8], msg_id: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + body.len());
    out.extend_from_slice(&0i64.to_le_bytes());
    out.extend_from_slice(&msg_id.to_le_bytes());
    out.extend_from_slice(&(body.len() as i32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Strips the unencrypted envelope back off, returning the inner body.
fn unwrap_plain(frame: &[u8]) -> Result<&[u8], ReadError> {
    if frame.len() < 20 {
        return Err(ReadError::Deserialize(mtp_tl::DeserializeError::UnexpectedEof));
    }
    Ok(&frame[20..])
}

/// The next strictly-increasing, time-based message id used while no
/// session-level sequencing exists yet.
fn next_plain_msg_id(last: &mut i64) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before epoch");
    let mut id = ((now.as_secs() as i64) << 32) | ((now.subsec_nanos() as i64) << 2);
    if id <= *last {
        id = *last + 4;
    }
    *last = id;
    id
}

/// Drives the full handshake over `conn`, producing a ready-to-use
/// [`Finished`] result. Retries are the caller's job (the router applies
/// `auth_retry` around this call).
pub async fn negotiate<T: Transport>(
    conn: &mut Connection<T>,
    rsa_keys: &dyn PublicRsaKeyRegister,
    dh_checker: &dyn DhPrimeChecker,
) -> Result<Finished, ReadError> {
    let mut last_msg_id = 0i64;

    let (body, data) = step1();
    conn.enqueue_frame(&wrap_plain(&body, next_plain_msg_id(&mut last_msg_id)));
    conn.flush().await?;
    let frame = conn.read_frame().await?;
    let response = unwrap_plain(&frame)?;
    let (body, data) = step2(data, response, rsa_keys)
        .map_err(|_| ReadError::Deserialize(mtp_tl::DeserializeError::UnexpectedEof))?;

    conn.enqueue_frame(&wrap_plain(&body, next_plain_msg_id(&mut last_msg_id)));
    conn.flush().await?;
    let frame = conn.read_frame().await?;
    let dh_params_response = unwrap_plain(&frame)?.to_vec();

    // `DhGenRetry` means the server wants us to redo the `set_client_DH_params`
    // exchange with fresh `b` randomness, without refetching `server_DH_params`;
    // bounded so a server that never accepts can't wedge the handshake forever.
    const MAX_DH_GEN_RETRIES: u32 = 5;
    for attempt in 0..=MAX_DH_GEN_RETRIES {
        let (body, step3_data) = step3(data.clone(), &dh_params_response, dh_checker)
            .map_err(|_| ReadError::Deserialize(mtp_tl::DeserializeError::UnexpectedEof))?;

        conn.enqueue_frame(&wrap_plain(&body, next_plain_msg_id(&mut last_msg_id)));
        conn.flush().await?;
        let frame = conn.read_frame().await?;
        let response = unwrap_plain(&frame)?;

        match create_key(step3_data, response) {
            Ok(finished) => return Ok(finished),
            Err(Error::DHGenRetry) if attempt < MAX_DH_GEN_RETRIES => continue,
            Err(_) => {
                return Err(ReadError::Deserialize(mtp_tl::DeserializeError::UnexpectedEof));
            }
        }
    }
    unreachable!("loop always returns or errors out by the last attempt")
}
