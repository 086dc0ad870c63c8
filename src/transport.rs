#[cfg(test)]
pub mod mock;
pub mod packet_io;
pub mod tcp;
pub mod tls;

pub use packet_io::{PacketReader, PacketWriter};
pub use tcp::{TcpConfig, TcpTransport};
pub use tls::{TlsConfig, TlsTransport};

use crate::error::Result;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opaque byte-stream transport.
///
/// TLS, if any, lives entirely inside the implementation; the client only
/// sees connect, read, write and close.
pub trait Transport: Send {
    /// Establishes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Reads at least one byte into `buf`, returning the count.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or orderly close.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Writes the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Boxed read half of a split transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a split transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The transports the client can be configured with.
pub enum TransportType {
    Tcp(TcpTransport),
    Tls(Box<TlsTransport>),
}

impl Transport for TransportType {
    async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Tcp(t) => t.connect().await,
            Self::Tls(t) => t.connect().await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Tcp(t) => t.read(buf).await,
            Self::Tls(t) => t.read(buf).await,
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(t) => t.write(buf).await,
            Self::Tls(t) => t.write(buf).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Tcp(t) => t.close().await,
            Self::Tls(t) => t.close().await,
        }
    }
}

impl TransportType {
    /// Splits a connected transport into independently owned read and write
    /// halves, so the read loop and the write path never contend.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the transport never connected.
    pub fn into_duplex(self) -> Result<(BoxedReader, BoxedWriter)> {
        match self {
            Self::Tcp(t) => {
                let (reader, writer) = t.into_split()?;
                Ok((Box::new(reader), Box::new(writer)))
            }
            Self::Tls(t) => {
                let (reader, writer) = t.into_split()?;
                Ok((Box::new(reader), Box::new(writer)))
            }
        }
    }
}
