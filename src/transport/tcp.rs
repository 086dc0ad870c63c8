use crate::constants::defaults;
use crate::error::{MqttError, Result};
use crate::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tokio::time::timeout;

/// Plain TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// OS-level TCP keepalive, independent of the MQTT keep-alive.
    pub keepalive: Option<Duration>,
}

impl TcpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }
}

/// Plain TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Splits into owned halves for concurrent read/write tasks.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the transport never connected.
    pub fn into_split(self) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        match self.stream {
            Some(stream) => Ok(stream.into_split()),
            None => Err(MqttError::NotConnected),
        }
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(MqttError::AlreadyConnected);
        }

        let addr = (self.config.host.as_str(), self.config.port);
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MqttError::Timeout("tcp connect"))??;

        stream.set_nodelay(self.config.nodelay)?;
        if let Some(keepalive) = self.config.keepalive {
            let sock_ref = socket2::SockRef::from(&stream);
            let params = socket2::TcpKeepalive::new().with_time(keepalive);
            sock_ref.set_tcp_keepalive(&params)?;
        }

        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.stream {
            Some(stream) => {
                let n = stream.read(buf).await?;
                if n == 0 {
                    return Err(MqttError::Io("connection closed by peer".to_string()));
                }
                Ok(n)
            }
            None => Err(MqttError::NotConnected),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.stream {
            Some(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
                Ok(())
            }
            None => Err(MqttError::NotConnected),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}
