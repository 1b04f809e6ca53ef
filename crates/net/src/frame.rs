//! Header + body frame encoding/decoding
//!
//! Wire format: [4-byte tag][4-byte body length][body]
//! Both header fields use native byte order.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tagwire_core::{Message, MessageHeader, MessageTag, HEADER_SIZE};

use crate::error::{Error, Result};

/// Default maximum body size (1MB)
pub const DEFAULT_MAX_BODY_SIZE: u32 = 1024 * 1024;

/// Read a frame header from a stream
pub async fn read_header<T, R>(reader: &mut R, max_body_size: u32) -> Result<MessageHeader<T>>
where
    T: MessageTag,
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(e)
        }
    })?;

    let header = MessageHeader::from_bytes(&buf)?;

    // Sanity check before allocating the body
    if header.size > max_body_size {
        return Err(Error::FrameTooLarge {
            size: header.size,
            max: max_body_size,
        });
    }

    Ok(header)
}

/// Read the body announced by `header`
pub async fn read_body<T, R>(reader: &mut R, header: MessageHeader<T>) -> Result<Message<T>>
where
    T: MessageTag,
    R: AsyncRead + Unpin,
{
    let mut body = vec![0u8; header.size as usize];
    if !body.is_empty() {
        reader.read_exact(&mut body).await?;
    }
    Ok(Message::with_body(header.id, body))
}

/// Read a complete frame from a stream
pub async fn read_frame<T, R>(reader: &mut R, max_body_size: u32) -> Result<Message<T>>
where
    T: MessageTag,
    R: AsyncRead + Unpin,
{
    let header = read_header(reader, max_body_size).await?;
    read_body(reader, header).await
}

/// Write a frame to a stream, header first
pub async fn write_frame<T, W>(writer: &mut W, msg: &Message<T>) -> Result<()>
where
    T: MessageTag,
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.header().to_bytes()).await?;

    if !msg.is_empty() {
        writer.write_all(msg.body()).await?;
    }

    // Flush to ensure delivery
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let msg = Message::with_body(7u32, b"ping".to_vec());

        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).await.unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 4);

        let mut cursor = Cursor::new(buf);
        let decoded: Message<u32> = read_frame(&mut cursor, DEFAULT_MAX_BODY_SIZE)
            .await
            .unwrap();

        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn test_empty_body_frame() {
        let msg = Message::new(3u32);

        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).await.unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let mut cursor = Cursor::new(buf);
        let decoded: Message<u32> = read_frame(&mut cursor, DEFAULT_MAX_BODY_SIZE)
            .await
            .unwrap();
        assert_eq!(decoded.id(), 3);
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = MessageHeader {
            id: 1u32,
            size: DEFAULT_MAX_BODY_SIZE + 1,
        };
        let mut cursor = Cursor::new(header.to_bytes().to_vec());
        let result = read_frame::<u32, _>(&mut cursor, DEFAULT_MAX_BODY_SIZE).await;
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_eof_before_header_is_closed() {
        let mut cursor = Cursor::new(vec![1, 2, 3]);
        let result = read_frame::<u32, _>(&mut cursor, DEFAULT_MAX_BODY_SIZE).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_error() {
        let header = MessageHeader { id: 1u32, size: 10 };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(b"abc");

        let mut cursor = Cursor::new(bytes);
        let result = read_frame::<u32, _>(&mut cursor, DEFAULT_MAX_BODY_SIZE).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
