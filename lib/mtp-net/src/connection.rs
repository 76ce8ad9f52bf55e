// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::ServerAddr;
use mtp_proto::{RingBuffer, Transport};
use std::fmt;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A single frame is never allowed to grow past this, which matches the
/// largest message Telegram itself will ever send plus transport overhead.
const MAXIMUM_DATA: usize = 1024 * 1024 + 1024 * 8;

#[derive(Debug)]
pub enum ConnectionError {
    Io(io::Error),
    Transport(mtp_proto::Error),
    /// The peer closed the stream without sending a full frame.
    Closed,
    /// A single frame would not fit in `MAXIMUM_DATA`; the stream is
    /// desynchronized or the peer is misbehaving.
    FrameTooLarge,
}

impl std::error::Error for ConnectionError {}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "connection io error: {e}"),
            Self::Transport(e) => write!(f, "connection transport error: {e}"),
            Self::Closed => write!(f, "connection closed by peer"),
            Self::FrameTooLarge => write!(f, "frame exceeds maximum accepted size"),
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<mtp_proto::Error> for ConnectionError {
    fn from(error: mtp_proto::Error) -> Self {
        Self::Transport(error)
    }
}

/// A TCP stream paired with a transport framer. Callers push whole,
/// already-serialized payloads in with [`Connection::enqueue_frame`] and
/// pull whole frames back out with [`Connection::read_frame`]; everything
/// in between (length prefixes, CRCs, obfuscation) is the transport's job.
pub struct Connection<T: Transport> {
    stream: TcpStream,
    transport: T,
    read_buffer: Vec<u8>,
    read_len: usize,
    write_buffer: RingBuffer<u8>,
}

impl<T: Transport> Connection<T> {
    pub async fn connect(transport: T, addr: ServerAddr) -> io::Result<Self> {
        let ServerAddr::Tcp { address } = addr;
        log::info!("connecting to {address}...");
        let stream = TcpStream::connect(address).await?;
        Ok(Self {
            stream,
            transport,
            read_buffer: vec![0; MAXIMUM_DATA],
            read_len: 0,
            write_buffer: RingBuffer::with_capacity(0, 64),
        })
    }

    /// Frames `payload` (must already be a multiple of 4 bytes, as every
    /// MTProto message body is) and appends it to the outbound queue.
    /// Nothing is written to the socket until [`Connection::flush`] runs.
    pub fn enqueue_frame(&mut self, payload: &[u8]) {
        let mut framed = RingBuffer::with_capacity(payload.len(), 0);
        framed.extend(payload.iter().copied());
        self.transport.pack(&mut framed);
        self.write_buffer.extend(framed.as_ref().iter().copied());
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    /// Writes as much of the outbound queue as the socket accepts in one
    /// call. Returns once the queue is drained or the socket would block.
    pub async fn flush(&mut self) -> io::Result<()> {
        while !self.write_buffer.is_empty() {
            let n = self.stream.write(self.write_buffer.as_ref()).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero));
            }
            self.write_buffer.skip(n);
        }
        self.write_buffer.reclaim_leading();
        Ok(())
    }

    /// Reads from the socket until a full frame is available, then returns
    /// its payload (framing stripped). Blocks across multiple socket reads
    /// if the frame spans more than one.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, ConnectionError> {
        loop {
            match self.transport.unpack(&self.read_buffer[..self.read_len]) {
                Ok(offset) => {
                    let frame = self.read_buffer[offset.data_start..offset.data_end].to_vec();
                    self.read_buffer.copy_within(offset.next_offset..self.read_len, 0);
                    self.read_len -= offset.next_offset;
                    return Ok(frame);
                }
                Err(mtp_proto::Error::MissingBytes) => {
                    if self.read_len == self.read_buffer.len() {
                        return Err(ConnectionError::FrameTooLarge);
                    }
                    let n = self
                        .stream
                        .read(&mut self.read_buffer[self.read_len..])
                        .await?;
                    if n == 0 {
                        return Err(ConnectionError::Closed);
                    }
                    self.read_len += n;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drops any buffered framing state (sequence counters, the one-time
    /// tag), for reuse after the transport itself has been told to reset.
    pub fn reset_transport(&mut self) {
        self.transport.reset();
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtp_proto::Intermediate;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn round_trips_a_frame_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut server_transport = Intermediate::new();
            let mut header = [0u8; 4];
            // Consume the one-time init tag before the first frame.
            let mut stream = stream;
            stream.read_exact(&mut header).await.unwrap();
            assert_eq!(header, [0xee, 0xee, 0xee, 0xee]);

            let mut buf = vec![0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            let offset = server_transport.unpack(&buf[..n]).unwrap();
            buf[offset.data_start..offset.data_end].to_vec()
        });

        let mut conn = Connection::connect(
            Intermediate::new(),
            ServerAddr::Tcp { address: addr },
        )
        .await
        .unwrap();
        conn.enqueue_frame(&[1, 2, 3, 4]);
        conn.flush().await.unwrap();

        let got = server.await.unwrap();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }
}
