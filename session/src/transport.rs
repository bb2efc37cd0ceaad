//! Plaintext (v1) bitcoin message framing.
//!
//! Every message is a 24 byte header (magic, command, payload length, checksum)
//! followed by the payload. Decoding of the full frame is left to
//! `bitcoin::consensus`, which also verifies the checksum.

use bitcoin::consensus::encode;
use bitcoin::p2p::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::p2p::Magic;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of a bitcoin message header in bytes.
const HEADER_SIZE: usize = 24;
/// Offset in the header where the payload length is stored.
const PAYLOAD_LENGTH_OFFSET: usize = 16;
/// Largest payload accepted from a peer, matches Bitcoin Core's 32 MiB limit.
const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Failures reading or writing framed messages.
#[derive(Debug)]
pub enum TransportError {
    /// The socket failed.
    Io(io::Error),
    /// Frame could not be decoded, including checksum failures.
    Deserialize(encode::Error),
    /// Frame belongs to a different network.
    MagicMismatch,
    /// Peer announced a payload larger than we are willing to buffer.
    PayloadTooLarge(usize),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "Transport I/O error: {e}"),
            TransportError::Deserialize(e) => write!(f, "Malformed message: {e}"),
            TransportError::MagicMismatch => write!(f, "Message is for a different network"),
            TransportError::PayloadTooLarge(len) => {
                write!(f, "Payload of {len} bytes exceeds {MAX_PAYLOAD_SIZE} byte limit")
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Deserialize(e) => Some(e),
            TransportError::MagicMismatch | TransportError::PayloadTooLarge(_) => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<encode::Error> for TransportError {
    fn from(e: encode::Error) -> Self {
        TransportError::Deserialize(e)
    }
}

/// Writes framed v1 messages.
#[derive(Debug)]
pub struct V1TransportWriter<W> {
    network_magic: Magic,
    writer: W,
}

impl<W> V1TransportWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a new writer with the specified network magic.
    pub fn new(network_magic: Magic, writer: W) -> Self {
        Self {
            network_magic,
            writer,
        }
    }

    /// Frame and write a bitcoin network message.
    pub async fn write(&mut self, message: NetworkMessage) -> Result<(), TransportError> {
        let raw_msg = RawNetworkMessage::new(self.network_magic, message);
        let data = encode::serialize(&raw_msg);

        self.writer.write_all(&data).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Reads framed v1 messages.
///
/// Reads are *not* cancellation safe. A session owns its reader in a
/// dedicated task and never races it against other futures.
#[derive(Debug)]
pub struct V1TransportReader<R> {
    network_magic: Magic,
    reader: R,
}

impl<R> V1TransportReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a new reader with the specified network magic.
    pub fn new(network_magic: Magic, reader: R) -> Self {
        Self {
            network_magic,
            reader,
        }
    }

    /// Read the next bitcoin network message.
    pub async fn read(&mut self) -> Result<NetworkMessage, TransportError> {
        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header).await?;

        let mut length = [0u8; 4];
        length.copy_from_slice(&header[PAYLOAD_LENGTH_OFFSET..PAYLOAD_LENGTH_OFFSET + 4]);
        let payload_len = u32::from_le_bytes(length) as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge(payload_len));
        }

        let mut buffer = Vec::with_capacity(HEADER_SIZE + payload_len);
        buffer.extend_from_slice(&header);
        buffer.resize(HEADER_SIZE + payload_len, 0);
        self.reader.read_exact(&mut buffer[HEADER_SIZE..]).await?;

        let raw_msg: RawNetworkMessage = encode::deserialize(&buffer)?;
        if raw_msg.magic() != &self.network_magic {
            return Err(TransportError::MagicMismatch);
        }

        Ok(raw_msg.payload().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder as MockIoBuilder;

    fn frame(magic: Magic, message: NetworkMessage) -> Vec<u8> {
        encode::serialize(&RawNetworkMessage::new(magic, message))
    }

    #[tokio::test]
    async fn test_read_message() {
        let bytes = frame(Magic::BITCOIN, NetworkMessage::Ping(42));
        let mock_reader = MockIoBuilder::new().read(&bytes).build();
        let mut reader = V1TransportReader::new(Magic::BITCOIN, mock_reader);

        match reader.read().await.unwrap() {
            NetworkMessage::Ping(nonce) => assert_eq!(nonce, 42),
            other => panic!("Expected Ping message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_split_across_chunks() {
        let bytes = frame(Magic::BITCOIN, NetworkMessage::GetAddr);
        let (head, tail) = bytes.split_at(10);
        let mock_reader = MockIoBuilder::new().read(head).read(tail).build();
        let mut reader = V1TransportReader::new(Magic::BITCOIN, mock_reader);

        assert!(matches!(
            reader.read().await.unwrap(),
            NetworkMessage::GetAddr
        ));
    }

    #[tokio::test]
    async fn test_write_message() {
        let expected = frame(Magic::REGTEST, NetworkMessage::Verack);
        let mock_writer = MockIoBuilder::new().write(&expected).build();
        let mut writer = V1TransportWriter::new(Magic::REGTEST, mock_writer);

        writer.write(NetworkMessage::Verack).await.unwrap();
    }

    #[tokio::test]
    async fn test_magic_mismatch() {
        let bytes = frame(Magic::REGTEST, NetworkMessage::Verack);
        let mock_reader = MockIoBuilder::new().read(&bytes).build();
        let mut reader = V1TransportReader::new(Magic::BITCOIN, mock_reader);

        assert!(matches!(
            reader.read().await,
            Err(TransportError::MagicMismatch)
        ));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&Magic::BITCOIN.to_bytes());
        header[PAYLOAD_LENGTH_OFFSET..PAYLOAD_LENGTH_OFFSET + 4]
            .copy_from_slice(&u32::MAX.to_le_bytes());
        let mock_reader = MockIoBuilder::new().read(&header).build();
        let mut reader = V1TransportReader::new(Magic::BITCOIN, mock_reader);

        assert!(matches!(
            reader.read().await,
            Err(TransportError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_unexpected_eof() {
        let bytes = frame(Magic::BITCOIN, NetworkMessage::Ping(7));
        let mock_reader = MockIoBuilder::new().read(&bytes[..HEADER_SIZE - 4]).build();
        let mut reader = V1TransportReader::new(Magic::BITCOIN, mock_reader);

        match reader.read().await {
            Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected EOF error, got {other:?}"),
        }
    }
}
