use crate::constants::defaults;
use crate::error::{MqttError, Result};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// TLS transport configuration.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub host: String,
    pub port: u16,
    /// Name presented for SNI and certificate validation; defaults to the
    /// host.
    pub server_name: Option<String>,
    /// Extra DER trust anchors appended to the webpki roots.
    pub extra_root_certs_der: Vec<Vec<u8>>,
    pub connect_timeout: Duration,
}

impl TlsConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            server_name: None,
            extra_root_certs_der: Vec::new(),
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    #[must_use]
    pub fn with_extra_root_cert_der(mut self, cert: Vec<u8>) -> Self {
        self.extra_root_certs_der.push(cert);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// TLS transport over TCP using rustls with the webpki trust anchors.
pub struct TlsTransport {
    config: TlsConfig,
    stream: Option<TlsStream<TcpStream>>,
}

impl TlsTransport {
    #[must_use]
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn client_config(&self) -> Result<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for der in &self.config.extra_root_certs_der {
            roots
                .add(CertificateDer::from(der.clone()))
                .map_err(|e| MqttError::Io(format!("invalid root certificate: {e}")))?;
        }

        Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }

    /// Splits into read and write halves for concurrent tasks.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the transport never connected.
    pub fn into_split(
        self,
    ) -> Result<(ReadHalf<TlsStream<TcpStream>>, WriteHalf<TlsStream<TcpStream>>)> {
        match self.stream {
            Some(stream) => Ok(tokio::io::split(stream)),
            None => Err(MqttError::NotConnected),
        }
    }
}

impl Transport for TlsTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(MqttError::AlreadyConnected);
        }

        let addr = (self.config.host.as_str(), self.config.port);
        let tcp = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MqttError::Timeout("tls connect"))??;
        tcp.set_nodelay(true)?;

        let name = self
            .config
            .server_name
            .clone()
            .unwrap_or_else(|| self.config.host.clone());
        let server_name = ServerName::try_from(name)
            .map_err(|e| MqttError::Io(format!("invalid TLS server name: {e}")))?;

        let connector = TlsConnector::from(Arc::new(self.client_config()?));
        let stream = timeout(
            self.config.connect_timeout,
            connector.connect(server_name, tcp),
        )
        .await
        .map_err(|_| MqttError::Timeout("tls handshake"))?
        .map_err(|e| MqttError::Io(format!("TLS handshake failed: {e}")))?;

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
