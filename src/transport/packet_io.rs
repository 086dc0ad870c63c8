//! Packet framing over any async byte stream.

use crate::constants::masks;
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, Packet};
use crate::protocol::ProtocolVersion;
use bytes::{BufMut, BytesMut};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

fn closed() -> MqttError {
    MqttError::Io("connection closed".to_string())
}

/// Reads whole MQTT packets from an async byte stream.
pub trait PacketReader: AsyncRead + Unpin + Send {
    /// Reads one complete packet: fixed header, then exactly
    /// remaining-length bytes of body.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the stream closes, `MalformedPacket` /
    /// `ProtocolError` when the bytes do not decode.
    fn read_packet(
        &mut self,
        version: ProtocolVersion,
    ) -> impl Future<Output = Result<Packet>> + Send + '_ {
        async move {
            let mut header_buf = BytesMut::with_capacity(5);

            let mut byte = [0u8; 1];
            self.read_exact(&mut byte).await.map_err(|_| closed())?;
            header_buf.put_u8(byte[0]);

            // Remaining length, up to four continuation bytes.
            loop {
                self.read_exact(&mut byte).await.map_err(|_| closed())?;
                header_buf.put_u8(byte[0]);
                if byte[0] & masks::CONTINUATION_BIT == 0 {
                    break;
                }
                if header_buf.len() > 4 {
                    return Err(MqttError::MalformedPacket(
                        "remaining length exceeds 4 bytes".to_string(),
                    ));
                }
            }

            let mut header_bytes = header_buf.freeze();
            let fixed_header = FixedHeader::decode(&mut header_bytes)?;

            let mut body = vec![0u8; fixed_header.remaining_length as usize];
            self.read_exact(&mut body).await.map_err(|_| closed())?;

            let mut body_buf = BytesMut::from(&body[..]);
            Packet::decode_from_body(&fixed_header, &mut body_buf, version)
        }
    }
}

impl<T: AsyncRead + Unpin + Send + ?Sized> PacketReader for T {}

/// Writes whole MQTT packets to an async byte stream.
pub trait PacketWriter: AsyncWrite + Unpin + Send {
    /// Encodes the packet fully, then writes it with a single `write_all`,
    /// so a cancelled caller never leaves half a packet on the wire.
    ///
    /// # Errors
    ///
    /// Returns encoding errors and `Io` for transport failures.
    fn write_packet<'a>(
        &'a mut self,
        packet: &'a Packet,
        version: ProtocolVersion,
    ) -> impl Future<Output = Result<()>> + Send + 'a {
        async move {
            let mut buf = BytesMut::with_capacity(1024);
            packet.encode(&mut buf, version)?;
            self.write_all(&buf).await?;
            self.flush().await?;
            Ok(())
        }
    }
}

impl<T: AsyncWrite + Unpin + Send + ?Sized> PacketWriter for T {}
