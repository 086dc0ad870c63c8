//! In-process scripted broker for connection-level tests.
//!
//! The "broker" is a plain TCP listener driven step by step from the test
//! body using the crate's own packet framing, so every exchange is
//! deterministic.

#![allow(dead_code)]

use mqtt_duo::packet::connack::ConnAckPacket;
use mqtt_duo::packet::connect::ConnectPacket;
use mqtt_duo::transport::{PacketReader, PacketWriter};
use mqtt_duo::{ClientOptions, Packet, ProtocolVersion, ReasonCode};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub struct FakeBroker {
    listener: TcpListener,
    port: u16,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    /// Client options pointed at this broker.
    pub fn client_options(&self, client_id: &str) -> ClientOptions {
        ClientOptions::new(client_id)
            .with_host("127.0.0.1")
            .with_port(self.port)
            .with_connect_timeout(Duration::from_secs(5))
    }

    pub async fn accept(&self, version: ProtocolVersion) -> BrokerConn {
        let (stream, _) = timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("no client connected")
            .unwrap();
        BrokerConn { stream, version }
    }
}

pub struct BrokerConn {
    stream: TcpStream,
    version: ProtocolVersion,
}

impl BrokerConn {
    pub async fn recv(&mut self) -> Packet {
        timeout(Duration::from_secs(5), self.stream.read_packet(self.version))
            .await
            .expect("timed out waiting for a client packet")
            .unwrap()
    }

    pub async fn send(&mut self, packet: &Packet) {
        self.stream.write_packet(packet, self.version).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Reads the CONNECT that opens every session.
    pub async fn expect_connect(&mut self) -> ConnectPacket {
        match self.recv().await {
            Packet::Connect(connect) => *connect,
            other => panic!("expected CONNECT, got {:?}", other.packet_type()),
        }
    }

    /// Completes the handshake with an accepting CONNACK.
    pub async fn connack(&mut self, session_present: bool) {
        let packet = ConnAckPacket::new(session_present, ReasonCode::Success);
        self.send(&Packet::ConnAck(packet)).await;
    }

    /// Full CONNECT/CONNACK exchange.
    pub async fn handshake(&mut self, session_present: bool) -> ConnectPacket {
        let connect = self.expect_connect().await;
        self.connack(session_present).await;
        connect
    }

    pub async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Polls until `predicate` holds or the deadline passes.
pub async fn wait_until<F: Fn() -> bool>(predicate: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
