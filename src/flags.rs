//! Fixed-header and CONNECT flag bit sets, decomposed via `BeBytes`.

use bebytes::BeBytes;

/// CONNECT variable-header flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
#[bebytes(flags)]
pub enum ConnectFlags {
    /// Reserved bit, must be 0.
    Reserved = 0x01,
    CleanSession = 0x02,
    WillFlag = 0x04,
    WillQoS0 = 0x08,
    WillQoS1 = 0x10,
    WillRetain = 0x20,
    PasswordFlag = 0x40,
    UsernameFlag = 0x80,
}

impl ConnectFlags {
    /// Extracts the will QoS (bits 3-4).
    #[must_use]
    pub fn extract_will_qos(flags: u8) -> u8 {
        (flags >> crate::constants::connect_flags::WILL_QOS_SHIFT)
            & crate::constants::connect_flags::WILL_QOS_MASK
    }

    /// Replaces the will QoS bits in `flags`.
    #[must_use]
    pub fn with_will_qos(mut flags: u8, qos: u8) -> u8 {
        flags &= crate::constants::connect_flags::WILL_QOS_CLEAR_MASK;
        flags |= (qos & crate::constants::connect_flags::WILL_QOS_MASK)
            << crate::constants::connect_flags::WILL_QOS_SHIFT;
        flags
    }
}

/// PUBLISH fixed-header flags nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
#[bebytes(flags)]
pub enum PublishFlags {
    Retain = 0x01,
    QoS0 = 0x02,
    QoS1 = 0x04,
    Dup = 0x08,
}

impl PublishFlags {
    /// Extracts the QoS level (bits 1-2).
    #[must_use]
    pub fn extract_qos(flags: u8) -> u8 {
        (flags >> crate::constants::publish_flags::QOS_SHIFT)
            & crate::constants::publish_flags::QOS_MASK
    }

    /// Replaces the QoS bits in `flags`.
    #[must_use]
    pub fn with_qos(mut flags: u8, qos: u8) -> u8 {
        flags &= crate::constants::publish_flags::QOS_CLEAR_MASK;
        flags |= (qos & crate::constants::publish_flags::QOS_MASK)
            << crate::constants::publish_flags::QOS_SHIFT;
        flags
    }
}

/// CONNACK acknowledge-flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
#[bebytes(flags)]
pub enum ConnAckFlags {
    SessionPresent = 0x01,
}
