//! Raw-gadget bus events.
//!
//! The channel hands out length-prefixed records: a 32-bit type
//! tag, a 32-bit payload length and the payload. Decoding never
//! fails, anything unexpected becomes `Unknown` or `Malformed`.
//!
use core::fmt;

use crate::usbdata::{SetupPacket, SETUP_PACKET_SIZE};

/// Event type tags, see `enum usb_raw_event_type`.
pub mod event_type {
    #![allow(missing_docs)]
    pub const INVALID: u32 = 0;
    pub const CONNECT: u32 = 1;
    pub const CONTROL: u32 = 2;
    pub const SUSPEND: u32 = 3;
    pub const RESUME: u32 = 4;
    pub const RESET: u32 = 5;
    pub const DISCONNECT: u32 = 6;
}

/// Size of the record header (tag + length).
pub const EVENT_HEADER_SIZE: usize = 8;

/// An event record as fetched from the channel.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RawEvent {
    /// Type tag.
    pub kind: u32,
    /// Payload.
    pub data: Vec<u8>,
}

impl RawEvent {
    /// Create a record from a tag and payload.
    pub fn new(kind: u32, data: &[u8]) -> Self {
        RawEvent {
            kind,
            data: data.to_vec(),
        }
    }

    /// Control event carrying `setup`.
    pub fn control(setup: SetupPacket) -> Self {
        let bytes: [u8; 8] = setup.into();
        RawEvent::new(event_type::CONTROL, &bytes)
    }

    /// Parse a wire record. The payload is clamped to the bytes
    /// actually present after the header; a buffer too short to
    /// hold the header yields an `INVALID` record.
    pub fn from_bytes(buf: &[u8]) -> Self {
        if buf.len() < EVENT_HEADER_SIZE {
            return RawEvent::new(event_type::INVALID, &[]);
        }

        let kind = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let length = u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let payload = &buf[EVENT_HEADER_SIZE..];
        let end = length.min(payload.len());

        RawEvent::new(kind, &payload[..end])
    }

    /// Serialize into the wire record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EVENT_HEADER_SIZE + self.data.len());
        out.extend_from_slice(&self.kind.to_ne_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_ne_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode into a typed bus event.
    ///
    /// Extra payload bytes past the SETUP packet are ignored.
    pub fn decode(&self) -> BusEvent {
        match self.kind {
            event_type::CONNECT => BusEvent::Connect,
            event_type::CONTROL => match SetupPacket::from_bytes(&self.data) {
                Some(setup) => BusEvent::Control(setup),
                None => BusEvent::Malformed {
                    kind: self.kind,
                    length: self.data.len(),
                },
            },
            event_type::SUSPEND => BusEvent::Suspend,
            event_type::RESUME => BusEvent::Resume,
            event_type::RESET => BusEvent::Reset,
            event_type::DISCONNECT => BusEvent::Disconnect,
            kind => BusEvent::Unknown {
                kind,
                length: self.data.len(),
            },
        }
    }
}

/// A decoded bus event.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BusEvent {
    /// The UDC connected to a host.
    Connect,
    /// A SETUP packet arrived on endpoint 0.
    Control(SetupPacket),
    /// Bus suspended.
    Suspend,
    /// Bus resumed.
    Resume,
    /// Bus reset.
    Reset,
    /// Host went away.
    Disconnect,
    /// Type tag this crate does not know about.
    Unknown {
        /// Type tag.
        kind: u32,
        /// Payload length.
        length: usize,
    },
    /// Known type tag with a payload too short to decode.
    Malformed {
        /// Type tag.
        kind: u32,
        /// Payload length.
        length: usize,
    },
}

impl fmt::Display for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusEvent::Connect => write!(f, "connect"),
            BusEvent::Control(setup) => {
                write!(f, "control, length: {}, {}", SETUP_PACKET_SIZE, setup)
            }
            BusEvent::Suspend => write!(f, "suspend"),
            BusEvent::Resume => write!(f, "resume"),
            BusEvent::Reset => write!(f, "reset"),
            BusEvent::Disconnect => write!(f, "disconnect"),
            BusEvent::Unknown { kind, length } => {
                write!(f, "{} (unknown), length: {}", kind, length)
            }
            BusEvent::Malformed { kind, length } => {
                write!(f, "{} (malformed), length: {}", kind, length)
            }
        }
    }
}
