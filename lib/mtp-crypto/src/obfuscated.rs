// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use aes::cipher::{generic_array::GenericArray, KeyIvInit, StreamCipher};

/// The AES-256-CTR cipher used by Telegram's obfuscated transport. Keys and
/// IVs for the two independent directions come from opposite ends of a
/// 64-byte random init header: `tx` reads it forwards, `rx` reads it
/// reversed.
///
/// You're not supposed to use this directly; it backs `mtp_proto`'s
/// `Obfuscated` transport wrapper.
pub struct ObfuscatedCipher {
    rx: ctr::Ctr128BE<aes::Aes256>,
    tx: ctr::Ctr128BE<aes::Aes256>,
}

impl ObfuscatedCipher {
    pub fn new(init: &[u8; 64]) -> Self {
        let init_rev = init.iter().copied().rev().collect::<Vec<_>>();
        Self {
            rx: ctr::Ctr128BE::<aes::Aes256>::new(
                GenericArray::from_slice(&init_rev[8..40]),
                GenericArray::from_slice(&init_rev[40..56]),
            ),
            tx: ctr::Ctr128BE::<aes::Aes256>::new(
                GenericArray::from_slice(&init[8..40]),
                GenericArray::from_slice(&init[40..56]),
            ),
        }
    }

    pub fn encrypt(&mut self, buffer: &mut [u8]) {
        self.tx.apply_keystream(buffer);
    }

    pub fn decrypt(&mut self, buffer: &mut [u8]) {
        self.rx.apply_keystream(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let mut init = [0u8; 64];
        init.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);

        let mut tx_cipher = ObfuscatedCipher::new(&init);
        let mut rx_cipher = ObfuscatedCipher::new(&init);

        let mut data = b"some plaintext data to obfuscate".to_vec();
        let original = data.clone();

        tx_cipher.encrypt(&mut data);
        assert_ne!(data, original);

        rx_cipher.decrypt(&mut data);
        assert_eq!(data, original);
    }
}
