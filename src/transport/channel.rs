//! Framed channel over a byte stream.
//!
//! [`FrameReader`] owns the exact-length reads: it collects one header line
//! (bounded by a configurable limit), then loops over possibly-partial reads
//! until the announced payload is complete. [`FrameWriter`] writes whole
//! frames. [`FramedChannel`] pairs both halves of a TCP connection.

use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::error::{TransportError, TransportResult};
use super::frame::{Frame, FrameError, parse_header};
use crate::core::{DEFAULT_MAX_HEADER_LEN, HEADER_TERMINATOR};

/// Reads frames from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_header_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream with the default header limit.
    pub fn new(reader: R) -> Self {
        Self::with_max_header_len(reader, DEFAULT_MAX_HEADER_LEN)
    }

    /// Wrap a stream with a custom header limit.
    pub fn with_max_header_len(reader: R, max_header_len: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_header_len,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns [`TransportError::ConnectionClosed`] when the stream ends
    /// cleanly before the first byte of a frame, and
    /// [`TransportError::UnexpectedEof`] when it ends inside one.
    pub async fn read_frame(&mut self) -> TransportResult<Frame> {
        let mut buf = BytesMut::new();
        self.read_header_line(&mut buf).await?;

        let header = parse_header(&buf)?;
        let header_len = buf.len();
        // Bounded by MAX_PAYLOAD_SIZE in parse_header.
        let payload_len = header.payload_len() as usize;

        buf.resize(header_len + payload_len, 0);
        let mut filled = 0;
        while filled < payload_len {
            let n = self.inner.read(&mut buf[header_len + filled..]).await?;
            if n == 0 {
                return Err(TransportError::UnexpectedEof {
                    expected: payload_len as u64,
                    received: filled as u64,
                });
            }
            filled += n;
        }

        Ok(Frame::from_wire(header, buf.freeze(), header_len))
    }

    async fn read_header_line(&mut self, buf: &mut BytesMut) -> TransportResult<()> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if buf.is_empty() {
                    return Err(TransportError::ConnectionClosed);
                }
                return Err(TransportError::UnexpectedEof {
                    expected: buf.len() as u64 + 1,
                    received: buf.len() as u64,
                });
            }

            let (take, complete) = match available.iter().position(|b| *b == HEADER_TERMINATOR) {
                Some(idx) => (idx + 1, true),
                None => (available.len(), false),
            };
            if buf.len() + take > self.max_header_len {
                return Err(FrameError::HeaderTooLong {
                    limit: self.max_header_len,
                }
                .into());
            }

            buf.extend_from_slice(&available[..take]);
            self.inner.consume(take);
            if complete {
                return Ok(());
            }
        }
    }
}

/// Writes frames to a byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a stream.
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Write one frame and flush it.
    pub async fn write_frame(&mut self, frame: &Frame) -> TransportResult<()> {
        self.write_raw(frame.wire()).await
    }

    /// Write bytes that already form one or more complete frames.
    pub async fn write_raw(&mut self, wire: &[u8]) -> TransportResult<()> {
        self.inner.write_all(wire).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write direction.
    pub async fn shutdown(&mut self) -> TransportResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// A framed TCP connection.
///
/// Receiving and sending are independent directions; split the channel with
/// [`FramedChannel::into_split`] to drive them from separate tasks.
#[derive(Debug)]
pub struct FramedChannel {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl FramedChannel {
    /// Connect to a remote endpoint.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }

    /// Wrap an accepted or connected stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        Self::from_stream_with_limit(stream, DEFAULT_MAX_HEADER_LEN)
    }

    /// Wrap a stream with a custom header limit.
    pub fn from_stream_with_limit(stream: TcpStream, max_header_len: usize) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader::with_max_header_len(read_half, max_header_len),
            writer: FrameWriter::new(write_half),
            peer_addr,
            local_addr,
        })
    }

    /// Remote endpoint address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local endpoint address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one frame.
    pub async fn send(&mut self, frame: &Frame) -> TransportResult<()> {
        self.writer.write_frame(frame).await
    }

    /// Receive the next frame.
    pub async fn recv(&mut self) -> TransportResult<Frame> {
        self.reader.read_frame().await
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChangeAction, SyncPath, VersionId};
    use crate::transport::frame::Header;

    fn add_frame(name: &str, payload: &[u8]) -> Frame {
        Frame::add(
            SyncPath::new(name).unwrap(),
            VersionId::parse("v1").unwrap(),
            payload,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_read_across_partial_reads() {
        // A 7-byte pipe forces every header and payload to arrive in pieces.
        let (client, server) = tokio::io::duplex(7);
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let frame = add_frame("big.bin", &payload);
        let wire = frame.wire().clone();

        let writer = tokio::spawn(async move {
            let mut w = FrameWriter::new(client);
            w.write_raw(&wire).await.unwrap();
        });

        let mut reader = FrameReader::new(server);
        let received = reader.read_frame().await.unwrap();
        writer.await.unwrap();

        assert_eq!(received.payload().as_ref(), payload.as_slice());
        assert_eq!(received.wire(), frame.wire());
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let mut w = FrameWriter::new(client);
        w.write_frame(&add_frame("a.txt", b"one")).await.unwrap();
        w.write_frame(&Frame::delete(SyncPath::new("b.txt").unwrap()).unwrap())
            .await
            .unwrap();
        w.write_frame(&add_frame("c.txt", b"")).await.unwrap();
        drop(w);

        let mut reader = FrameReader::new(server);
        let first = reader.read_frame().await.unwrap();
        assert_eq!(first.payload().as_ref(), b"one");

        let second = reader.read_frame().await.unwrap();
        let Header::Change(change) = second.header() else {
            panic!("expected change header");
        };
        assert_eq!(change.action, ChangeAction::Delete);

        let third = reader.read_frame().await.unwrap();
        assert!(third.payload().is_empty());

        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let frame = add_frame("a.txt", b"hello");
        let wire = frame.wire().clone();
        let mut w = FrameWriter::new(client);
        w.write_raw(&wire[..wire.len() - 2]).await.unwrap();
        drop(w);

        let mut reader = FrameReader::new(server);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::UnexpectedEof {
                expected: 5,
                received: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let mut w = FrameWriter::new(client);
        w.write_raw(b"{\"action\":\"del").await.unwrap();
        drop(w);

        let mut reader = FrameReader::new(server);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::UnexpectedEof { .. })
        ));
    }

    #[tokio::test]
    async fn test_header_limit() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let mut w = FrameWriter::new(client);
        w.write_raw(&[b'x'; 200]).await.unwrap();
        drop(w);

        let mut reader = FrameReader::with_max_header_len(server, 64);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::Frame(FrameError::HeaderTooLong { limit: 64 }))
        ));
    }

    #[tokio::test]
    async fn test_malformed_header_is_decode_fault() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let mut w = FrameWriter::new(client);
        w.write_raw(b"garbage\n").await.unwrap();
        drop(w);

        let mut reader = FrameReader::new(server);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_decode_fault());
    }

    #[tokio::test]
    async fn test_tcp_channel() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut channel = FramedChannel::from_stream(stream).unwrap();
            let frame = channel.recv().await.unwrap();
            channel.send(&frame).await.unwrap();
        });

        let mut channel = FramedChannel::connect(addr).await.unwrap();
        assert_eq!(channel.peer_addr(), addr);
        let frame = add_frame("echo.txt", b"ping");
        channel.send(&frame).await.unwrap();
        let echoed = channel.recv().await.unwrap();
        server.await.unwrap();

        assert_eq!(echoed.wire(), frame.wire());
    }
}
