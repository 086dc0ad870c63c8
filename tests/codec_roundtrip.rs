//! Wire codec round-trips across both protocol versions.

use bytes::BytesMut;
use mqtt_duo::packet::connack::ConnAckPacket;
use mqtt_duo::packet::connect::ConnectPacket;
use mqtt_duo::packet::disconnect::DisconnectPacket;
use mqtt_duo::packet::puback::PubAckPacket;
use mqtt_duo::packet::publish::PublishPacket;
use mqtt_duo::packet::suback::{SubAckPacket, SubAckReasonCode};
use mqtt_duo::packet::subscribe::{SubscribePacket, SubscriptionOptions, TopicFilter};
use mqtt_duo::packet::unsuback::UnsubAckPacket;
use mqtt_duo::packet::unsubscribe::UnsubscribePacket;
use mqtt_duo::{
    FixedHeader, Packet, Properties, ProtocolVersion, QoS, ReasonCode, WillMessage,
};
use proptest::prelude::*;

fn encode(packet: &Packet, version: ProtocolVersion) -> BytesMut {
    let mut buf = BytesMut::new();
    packet.encode(&mut buf, version).unwrap();
    buf
}

fn decode(buf: &mut BytesMut, version: ProtocolVersion) -> Packet {
    let header = FixedHeader::decode(buf).unwrap();
    Packet::decode_from_body(&header, buf, version).unwrap()
}

#[test]
fn connect_round_trip_every_field() {
    for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
        let mut properties = Properties::default();
        if version.is_v5() {
            properties.set_session_expiry_interval(600);
            properties.set_receive_maximum(32);
        }
        let packet = ConnectPacket {
            version,
            clean_session: false,
            keep_alive: 30,
            client_id: "full-connect".to_string(),
            username: Some("user".to_string()),
            password: Some(b"pw".to_vec()),
            will: Some(
                WillMessage::new("will/topic", b"gone".to_vec())
                    .with_qos(QoS::AtLeastOnce)
                    .with_retain(true),
            ),
            properties,
            will_properties: Properties::default(),
        };

        let mut buf = encode(&Packet::Connect(Box::new(packet.clone())), version);
        match decode(&mut buf, version) {
            Packet::Connect(decoded) => {
                assert_eq!(decoded.client_id, packet.client_id);
                assert_eq!(decoded.clean_session, packet.clean_session);
                assert_eq!(decoded.keep_alive, packet.keep_alive);
                assert_eq!(decoded.username, packet.username);
                assert_eq!(decoded.password, packet.password);
                assert_eq!(decoded.version, version);
                let will = decoded.will.unwrap();
                assert_eq!(will.topic, "will/topic");
                assert_eq!(will.qos, QoS::AtLeastOnce);
                assert!(will.retain);
                assert_eq!(decoded.properties, packet.properties);
            }
            other => panic!("expected CONNECT, got {:?}", other.packet_type()),
        }
    }
}

#[test]
fn subscribe_suback_pair_round_trip() {
    for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
        let subscribe = SubscribePacket {
            packet_id: 21,
            properties: Properties::default(),
            filters: vec![TopicFilter {
                filter: "a/+/c".to_string(),
                options: SubscriptionOptions::new(QoS::AtLeastOnce),
            }],
        };
        let mut buf = encode(&Packet::Subscribe(subscribe.clone()), version);
        match decode(&mut buf, version) {
            Packet::Subscribe(decoded) => assert_eq!(decoded, subscribe),
            other => panic!("expected SUBSCRIBE, got {:?}", other.packet_type()),
        }

        let suback = SubAckPacket {
            packet_id: 21,
            properties: Properties::default(),
            reason_codes: vec![SubAckReasonCode::GrantedQoS1],
        };
        let mut buf = encode(&Packet::SubAck(suback.clone()), version);
        match decode(&mut buf, version) {
            Packet::SubAck(decoded) => assert_eq!(decoded, suback),
            other => panic!("expected SUBACK, got {:?}", other.packet_type()),
        }
    }
}

#[test]
fn unsubscribe_unsuback_pair_round_trip() {
    let unsubscribe = UnsubscribePacket {
        packet_id: 5,
        properties: Properties::default(),
        filters: vec!["x/#".to_string()],
    };
    let mut buf = encode(
        &Packet::Unsubscribe(unsubscribe.clone()),
        ProtocolVersion::V5,
    );
    match decode(&mut buf, ProtocolVersion::V5) {
        Packet::Unsubscribe(decoded) => assert_eq!(decoded, unsubscribe),
        other => panic!("expected UNSUBSCRIBE, got {:?}", other.packet_type()),
    }

    let unsuback = UnsubAckPacket {
        packet_id: 5,
        properties: Properties::default(),
        reason_codes: vec![ReasonCode::NoSubscriptionExisted],
    };
    let mut buf = encode(&Packet::UnsubAck(unsuback.clone()), ProtocolVersion::V5);
    match decode(&mut buf, ProtocolVersion::V5) {
        Packet::UnsubAck(decoded) => assert_eq!(decoded, unsuback),
        other => panic!("expected UNSUBACK, got {:?}", other.packet_type()),
    }
}

#[test]
fn known_byte_sequences() {
    // CONNACK accepted, no session (identical bytes in both versions).
    let connack = ConnAckPacket::new(false, ReasonCode::Success);
    assert_eq!(
        encode(&Packet::ConnAck(connack), ProtocolVersion::V311).to_vec(),
        vec![0x20, 0x02, 0x00, 0x00]
    );

    // QoS 0 PUBLISH "a/b" -> "hi" under 3.1.1.
    let publish = PublishPacket::new("a/b", b"hi", QoS::AtMostOnce);
    assert_eq!(
        encode(&Packet::Publish(publish), ProtocolVersion::V311).to_vec(),
        vec![0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']
    );

    // v5 DISCONNECT with a reason code and no properties.
    let disconnect = DisconnectPacket::new(ReasonCode::SessionTakenOver);
    assert_eq!(
        encode(&Packet::Disconnect(disconnect), ProtocolVersion::V5).to_vec(),
        vec![0xE0, 0x02, 0x8E, 0x00]
    );
}

proptest! {
    #[test]
    fn publish_round_trips(
        topic in "[a-z][a-z0-9/]{0,30}",
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        qos in 0u8..=2,
        retain: bool,
        packet_id in 1u16..,
    ) {
        let qos = QoS::try_from_u8(qos).unwrap();
        let mut packet = PublishPacket::new(topic, payload, qos).with_retain(retain);
        if qos != QoS::AtMostOnce {
            packet = packet.with_packet_id(packet_id).with_dup(true);
        }

        for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
            let mut buf = encode(&Packet::Publish(packet.clone()), version);
            match decode(&mut buf, version) {
                Packet::Publish(decoded) => prop_assert_eq!(&decoded, &packet),
                other => prop_assert!(false, "wrong type {:?}", other.packet_type()),
            }
            prop_assert!(buf.is_empty(), "trailing bytes after decode");
        }
    }

    #[test]
    fn ack_packets_round_trip(packet_id in 1u16.., error: bool) {
        let reason_code = if error {
            ReasonCode::QuotaExceeded
        } else {
            ReasonCode::Success
        };
        let ack = PubAckPacket {
            packet_id,
            reason_code,
            properties: Properties::default(),
        };
        let mut buf = encode(&Packet::PubAck(ack.clone()), ProtocolVersion::V5);
        match decode(&mut buf, ProtocolVersion::V5) {
            Packet::PubAck(decoded) => prop_assert_eq!(decoded, ack),
            other => prop_assert!(false, "wrong type {:?}", other.packet_type()),
        }
    }

    #[test]
    fn encode_decode_encode_is_stable(
        topic in "[a-z][a-z0-9/]{0,20}",
        payload in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        // Byte-stability: re-encoding a decoded packet reproduces the bytes.
        let packet = Packet::Publish(PublishPacket::new(topic, payload, QoS::AtMostOnce));
        let first = encode(&packet, ProtocolVersion::V5);
        let mut reread = first.clone();
        let decoded = decode(&mut reread, ProtocolVersion::V5);
        let second = encode(&decoded, ProtocolVersion::V5);
        prop_assert_eq!(first, second);
    }
}
