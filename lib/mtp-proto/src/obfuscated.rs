// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::{Error, Tagged, Transport, UnpackedOffset};
use mtp_crypto::{obfuscated::ObfuscatedCipher, RingBuffer};

/// An obfuscation wrapper made by Telegram to avoid ISP blocks, used when
/// connecting over WebSockets or to MTProto proxies.
///
/// It wraps another (tagged) transport and encrypts everything with
/// AES-256-CTR, keyed from a randomly generated 64-byte init header that is
/// itself sent, partially self-encrypted, at the very start of the
/// connection.
///
/// [Transport obfuscation]: https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation
pub struct Obfuscated<T: Transport + Tagged> {
    inner: T,
    head: Option<[u8; 64]>,
    decrypt_tail: usize,
    cipher: ObfuscatedCipher,
}

/// Byte sequences the first 4 bytes of the init header must never equal,
/// to avoid being mistaken for plaintext HTTP/TLS or another transport's
/// own one-time tag.
const FORBIDDEN_FIRST_INTS: [[u8; 4]; 7] = [
    [b'H', b'E', b'A', b'D'],
    [b'P', b'O', b'S', b'T'],
    [b'G', b'E', b'T', b' '],
    [b'O', b'P', b'T', b'I'],
    [0x16, 0x03, 0x01, 0x02],
    [0xdd, 0xdd, 0xdd, 0xdd], // PaddedIntermediate
    [0xee, 0xee, 0xee, 0xee], // Intermediate
];

impl<T: Transport + Tagged> Obfuscated<T> {
    fn generate_keys(inner: &mut T) -> ([u8; 64], ObfuscatedCipher) {
        let mut init = [0u8; 64];

        while init[4..8] == [0; 4] // looks like Full
            || init[0] == 0xef // Abridged's tag byte
            || FORBIDDEN_FIRST_INTS.iter().any(|start| start == &init[..4])
        {
            getrandom::getrandom(&mut init).expect("failed to generate obfuscated init header");
        }

        init[56..60].copy_from_slice(&inner.init_tag());

        let mut cipher = ObfuscatedCipher::new(&init);

        let mut encrypted_init = init;
        cipher.encrypt(&mut encrypted_init);
        init[56..64].copy_from_slice(&encrypted_init[56..64]);

        (init, cipher)
    }

    pub fn new(mut inner: T) -> Self {
        let (init, cipher) = Self::generate_keys(&mut inner);
        Self {
            inner,
            head: Some(init),
            decrypt_tail: 0,
            cipher,
        }
    }
}

impl<T: Transport + Tagged> Transport for Obfuscated<T> {
    fn pack(&mut self, buffer: &mut RingBuffer<u8>) {
        self.inner.pack(buffer);
        self.cipher.encrypt(buffer.as_mut());
        if let Some(head) = self.head.take() {
            buffer.shift(&head);
        }
    }

    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error> {
        // Decryption happens in place, but `unpack` only borrows `buffer`
        // immutably; the session layer owns a mutable buffer it decrypts
        // before handing the (now plaintext) slice to `inner.unpack`. Only
        // the freshly-arrived tail (from `decrypt_tail` onward) needs it.
        if buffer.len() < self.decrypt_tail {
            panic!("buffer shrank below what was already decrypted");
        }

        let mut scratch = buffer.to_vec();
        self.cipher.decrypt(&mut scratch[self.decrypt_tail..]);
        self.decrypt_tail = scratch.len();

        match self.inner.unpack(&scratch) {
            Ok(offset) => {
                self.decrypt_tail -= offset.next_offset;
                Ok(offset)
            }
            Err(e) => Err(e),
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
        log::debug!("regenerating keys for obfuscated transport");
        let (init, cipher) = Self::generate_keys(&mut self.inner);
        self.head = Some(init);
        self.cipher = cipher;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Intermediate;

    #[test]
    fn pack_prefixes_init_header_once() {
        let mut transport = Obfuscated::new(Intermediate::new());
        let mut buffer = RingBuffer::with_capacity(4, 0);
        buffer.extend([1, 2, 3, 4]);
        transport.pack(&mut buffer);
        assert!(buffer.len() >= 64 + 8);

        let mut buffer2 = RingBuffer::with_capacity(4, 0);
        buffer2.extend([1, 2, 3, 4]);
        transport.pack(&mut buffer2);
        assert!(buffer2.len() < 64);
    }
}
