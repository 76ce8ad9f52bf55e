// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::{Error, Tagged, Transport, UnpackedOffset};
use mtp_crypto::RingBuffer;

/// The padded variant of the intermediate transport: like [`Intermediate`],
/// but 0 to 15 random bytes are appended after the payload and folded into
/// the length, to further disguise the traffic shape.
///
/// [`Intermediate`]: crate::Intermediate
pub struct PaddedIntermediate {
    init: bool,
}

impl PaddedIntermediate {
    const TAG: [u8; 4] = [0xdd, 0xdd, 0xdd, 0xdd];

    pub fn new() -> Self {
        Self { init: false }
    }
}

impl Default for PaddedIntermediate {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for PaddedIntermediate {
    fn pack(&mut self, buffer: &mut RingBuffer<u8>) {
        let len = buffer.len();
        assert_eq!(len % 4, 0);

        let pad_len = {
            let mut byte = [0u8; 1];
            getrandom::getrandom(&mut byte).expect("failed to generate transport padding");
            (byte[0] % 16) as usize
        };

        let mut padding = vec![0u8; pad_len];
        getrandom::getrandom(&mut padding).expect("failed to generate transport padding");
        buffer.extend(padding);

        buffer.shift(&((len + pad_len) as i32).to_le_bytes());

        if !self.init {
            buffer.shift(&Self::TAG);
            self.init = true;
        }
    }

    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error> {
        if buffer.len() < 4 {
            return Err(Error::MissingBytes);
        }

        let len = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
        if (buffer.len() as i32) < len {
            return Err(Error::MissingBytes);
        }

        if len <= 4 {
            if len >= 4 {
                let data = i32::from_le_bytes(buffer[4..8].try_into().unwrap());
                return Err(Error::BadStatus {
                    status: (-data) as u32,
                });
            }
            return Err(Error::BadLen { got: len });
        }

        // The padding is part of `len` but not of the actual payload; the
        // session layer reads exactly as much as its own framing says it
        // needs, so handing back the full (padded) span here is correct:
        // callers that already know the inner message length simply won't
        // read the trailing pad bytes.
        let len = len as usize;
        Ok(UnpackedOffset {
            data_start: 4,
            data_end: 4 + len,
            next_offset: 4 + len,
        })
    }

    fn reset(&mut self) {
        log::debug!("resetting padded intermediate transport header state");
        self.init = false;
    }
}

impl Tagged for PaddedIntermediate {
    fn init_tag(&mut self) -> [u8; 4] {
        self.init = true;
        Self::TAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_pack(n: usize) -> (PaddedIntermediate, RingBuffer<u8>) {
        let mut buffer = RingBuffer::with_capacity(n, 0);
        buffer.extend((0..n).map(|x| (x & 0xff) as u8));
        (PaddedIntermediate::new(), buffer)
    }

    #[test]
    fn pack_adds_header_and_tag() {
        let (mut transport, mut buffer) = setup_pack(128);
        transport.pack(&mut buffer);
        assert_eq!(&buffer[..4], &[0xdd, 0xdd, 0xdd, 0xdd]);
        let len = i32::from_le_bytes(buffer[4..8].try_into().unwrap());
        assert!((128..128 + 16).contains(&(len as usize)));
    }

    #[test]
    fn unpack_small() {
        let mut transport = PaddedIntermediate::new();
        let mut buffer = RingBuffer::with_capacity(1, 0);
        buffer.extend([1]);
        assert_eq!(transport.unpack(&buffer[..]), Err(Error::MissingBytes));
    }

    #[test]
    fn unpack_bad_status() {
        let mut transport = PaddedIntermediate::new();
        let mut buffer = RingBuffer::with_capacity(8, 0);
        buffer.extend(4_i32.to_le_bytes());
        buffer.extend((-404_i32).to_le_bytes());

        assert_eq!(
            transport.unpack(&buffer[..]),
            Err(Error::BadStatus { status: 404 })
        );
    }
}
