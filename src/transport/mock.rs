//! In-memory transport for unit tests.

use crate::error::{MqttError, Result};
use crate::transport::Transport;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Failure injection for [`MockTransport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    pub fail_connect: bool,
    pub fail_read: bool,
    pub fail_write: bool,
}

/// Scriptable transport: tests queue inbound bytes and inspect what the
/// client wrote.
pub struct MockTransport {
    connected: bool,
    behavior: MockBehavior,
    incoming: Arc<Mutex<VecDeque<u8>>>,
    outgoing: Arc<Mutex<Vec<u8>>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: false,
            behavior: MockBehavior::default(),
            incoming: Arc::new(Mutex::new(VecDeque::new())),
            outgoing: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_behavior(&mut self, behavior: MockBehavior) {
        self.behavior = behavior;
    }

    /// Queues bytes the next reads will return.
    pub async fn inject(&self, data: &[u8]) {
        self.incoming.lock().await.extend(data);
    }

    /// Everything the client has written so far.
    pub async fn written(&self) -> Vec<u8> {
        self.outgoing.lock().await.clone()
    }

    pub fn drop_connection(&mut self) {
        self.connected = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.behavior.fail_connect {
            return Err(MqttError::Io("mock connect failure".to_string()));
        }
        if self.connected {
            return Err(MqttError::AlreadyConnected);
        }
        self.connected = true;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.connected {
            return Err(MqttError::NotConnected);
        }
        if self.behavior.fail_read {
            return Err(MqttError::Io("mock read failure".to_string()));
        }

        let mut incoming = self.incoming.lock().await;
        if incoming.is_empty() {
            return Err(MqttError::Io("connection closed".to_string()));
        }
        let n = buf.len().min(incoming.len());
        for slot in buf.iter_mut().take(n) {
            *slot = incoming.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(MqttError::NotConnected);
        }
        if self.behavior.fail_write {
            return Err(MqttError::Io("mock write failure".to_string()));
        }
        self.outgoing.lock().await.extend_from_slice(buf);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_returns_injected_bytes() {
        let mut transport = MockTransport::new();
        transport.connect().await.unwrap();
        transport.inject(&[1, 2, 3]).await;

        let mut buf = [0u8; 2];
        assert_eq!(transport.read(&mut buf).await.unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(transport.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 3);
    }

    #[tokio::test]
    async fn write_is_captured() {
        let mut transport = MockTransport::new();
        transport.connect().await.unwrap();
        transport.write(&[0xC0, 0x00]).await.unwrap();
        assert_eq!(transport.written().await, vec![0xC0, 0x00]);
    }

    #[tokio::test]
    async fn failure_injection() {
        let mut transport = MockTransport::new();
        transport.set_behavior(MockBehavior {
            fail_connect: true,
            ..Default::default()
        });
        assert!(transport.connect().await.is_err());

        let mut transport = MockTransport::new();
        transport.connect().await.unwrap();
        transport.set_behavior(MockBehavior {
            fail_write: true,
            ..Default::default()
        });
        assert!(transport.write(&[0]).await.is_err());
    }

    #[tokio::test]
    async fn dropped_connection_errors() {
        let mut transport = MockTransport::new();
        transport.connect().await.unwrap();
        transport.drop_connection();
        let mut buf = [0u8; 1];
        assert!(matches!(
            transport.read(&mut buf).await,
            Err(MqttError::NotConnected)
        ));
    }
}
