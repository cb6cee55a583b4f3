//! A collection of USB-related data-handling stuff.
//!
//! SETUP packets, endpoint descriptors and the request and
//! descriptor codes the dispatcher understands.
//!
use core::fmt;

use usb_device::control::{Recipient, Request, RequestType};
use usb_device::endpoint::EndpointAddress;
use usb_device::UsbDirection;

/// Size of a SETUP packet on the wire.
pub const SETUP_PACKET_SIZE: usize = 8;

/// Descriptor type codes (high byte of GET_DESCRIPTOR `wValue`).
pub mod descriptor_type {
    #![allow(missing_docs)]
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
    pub const DEVICE_QUALIFIER: u8 = 0x06;
    pub const OTHER_SPEED_CONFIGURATION: u8 = 0x07;
    pub const INTERFACE_POWER: u8 = 0x08;
    pub const OTG: u8 = 0x09;
    pub const DEBUG: u8 = 0x0a;
    pub const INTERFACE_ASSOCIATION: u8 = 0x0b;
    pub const SECURITY: u8 = 0x0c;
    pub const KEY: u8 = 0x0d;
    pub const ENCRYPTION_TYPE: u8 = 0x0e;
    pub const BOS: u8 = 0x0f;
    pub const DEVICE_CAPABILITY: u8 = 0x10;
    pub const WIRELESS_ENDPOINT_COMP: u8 = 0x11;
    pub const HID: u8 = 0x21;
    pub const REPORT: u8 = 0x22;
    pub const PHYSICAL: u8 = 0x23;
    pub const PIPE_USAGE: u8 = 0x24;
    pub const SS_ENDPOINT_COMP: u8 = 0x30;
}

/// Returns a printable name of a descriptor type.
pub fn describe_descriptor(kind: u8) -> &'static str {
    use descriptor_type::*;

    match kind {
        DEVICE => "DEVICE",
        CONFIGURATION => "CONFIGURATION",
        STRING => "STRING",
        INTERFACE => "INTERFACE",
        ENDPOINT => "ENDPOINT",
        DEVICE_QUALIFIER => "DEVICE_QUALIFIER",
        OTHER_SPEED_CONFIGURATION => "OTHER_SPEED_CONFIGURATION",
        INTERFACE_POWER => "INTERFACE_POWER",
        OTG => "OTG",
        DEBUG => "DEBUG",
        INTERFACE_ASSOCIATION => "INTERFACE_ASSOCIATION",
        SECURITY => "SECURITY",
        KEY => "KEY",
        ENCRYPTION_TYPE => "ENCRYPTION_TYPE",
        BOS => "BOS",
        DEVICE_CAPABILITY => "DEVICE_CAPABILITY",
        WIRELESS_ENDPOINT_COMP => "WIRELESS_ENDPOINT_COMP",
        HID => "HID",
        REPORT => "REPORT",
        PHYSICAL => "PHYSICAL",
        PIPE_USAGE => "PIPE_USAGE",
        SS_ENDPOINT_COMP => "SS_ENDPOINT_COMP",
        _ => "unknown",
    }
}

/// Returns a printable name of a standard request code.
pub fn describe_standard_request(request: u8) -> &'static str {
    match request {
        Request::GET_STATUS => "GET_STATUS",
        Request::CLEAR_FEATURE => "CLEAR_FEATURE",
        Request::SET_FEATURE => "SET_FEATURE",
        Request::SET_ADDRESS => "SET_ADDRESS",
        Request::GET_DESCRIPTOR => "GET_DESCRIPTOR",
        Request::SET_DESCRIPTOR => "SET_DESCRIPTOR",
        Request::GET_CONFIGURATION => "GET_CONFIGURATION",
        Request::SET_CONFIGURATION => "SET_CONFIGURATION",
        Request::GET_INTERFACE => "GET_INTERFACE",
        Request::SET_INTERFACE => "SET_INTERFACE",
        Request::SYNCH_FRAME => "SYNCH_FRAME",
        _ => "unknown",
    }
}

/// USB device speed requested from the UDC at init time.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum UsbSpeed {
    /// Let the UDC decide.
    Unknown = 0,
    /// 1.5 Mbit/s.
    Low = 1,
    /// 12 Mbit/s.
    Full = 2,
    /// 480 Mbit/s.
    #[default]
    High = 3,
    /// Wireless USB.
    Wireless = 4,
    /// 5 Gbit/s.
    Super = 5,
    /// 10 Gbit/s.
    SuperPlus = 6,
}

/// `CtrRequestType` holds bmRequestType of SETUP
/// packet.
#[must_use]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CtrRequestType {
    direction: u8,
    rtype: u8,
    recipient: u8,
}

impl CtrRequestType {
    /// Create new `CtrRequestType` with Host-to-device
    /// direction (0b00000000).
    pub fn to_device() -> Self {
        CtrRequestType {
            direction: 0,
            rtype: 0,
            recipient: 0,
        }
    }

    /// Create new `CtrRequestType` with Device-to-host
    /// direction  (0b10000000).
    pub fn to_host() -> Self {
        CtrRequestType {
            direction: 1,
            rtype: 0,
            recipient: 0,
        }
    }

    /// Copy and set Type to Standard (0bx00xxxxx)
    pub fn standard(self) -> Self {
        CtrRequestType { rtype: 0, ..self }
    }

    /// Copy and set Type to Class (0bx01xxxxx)
    pub fn class(self) -> Self {
        CtrRequestType { rtype: 1, ..self }
    }

    /// Copy and set Type to Vendor (0bx10xxxxx)
    pub fn vendor(self) -> Self {
        CtrRequestType { rtype: 2, ..self }
    }

    /// Copy and set Recipient to Device (0bxxx00000)
    pub fn device(self) -> Self {
        CtrRequestType {
            recipient: 0,
            ..self
        }
    }

    /// Copy and set Recipient to Interface (0bxxx00001)
    pub fn interface(self) -> Self {
        CtrRequestType {
            recipient: 1,
            ..self
        }
    }

    /// Copy and set Recipient to Endpoint (0bxxx00010)
    pub fn endpoint(self) -> Self {
        CtrRequestType {
            recipient: 2,
            ..self
        }
    }

    /// Copy and set Recipient to Other (0bxxx00011)
    pub fn other(self) -> Self {
        CtrRequestType {
            recipient: 3,
            ..self
        }
    }

    /// Data stage direction (bit 7).
    pub fn direction(&self) -> UsbDirection {
        if self.direction == 0 {
            UsbDirection::Out
        } else {
            UsbDirection::In
        }
    }

    /// Request class (bits 6..5).
    pub fn request_class(&self) -> RequestType {
        match self.rtype {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    /// Request recipient (bits 4..0).
    pub fn recipient(&self) -> Recipient {
        match self.recipient {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }
}

impl From<CtrRequestType> for u8 {
    fn from(val: CtrRequestType) -> Self {
        val.direction << 7 | val.rtype << 5 | val.recipient
    }
}

impl From<u8> for CtrRequestType {
    fn from(value: u8) -> Self {
        CtrRequestType {
            direction: value >> 7,
            rtype: (value >> 5) & 0x3,
            recipient: value & 0x1f,
        }
    }
}

/// `SetupPacket` structure holds SETUP packet data for
/// all Control transfers.
///
/// `length` bounds the data stage: a reply never carries
/// more than `length` bytes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SetupPacket {
    bm_request_type: CtrRequestType,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    w_length: u16,
}

impl SetupPacket {
    /// Create new SetupPacket
    pub fn new(reqt: CtrRequestType, req: u8, value: u16, index: u16, length: u16) -> Self {
        SetupPacket {
            bm_request_type: reqt,
            b_request: req,
            w_value: value,
            w_index: index,
            w_length: length,
        }
    }

    /// Parse the first 8 bytes of `buf`. Returns `None` if
    /// `buf` is shorter than a SETUP packet.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let raw: [u8; SETUP_PACKET_SIZE] = buf.get(..SETUP_PACKET_SIZE)?.try_into().ok()?;
        Some(raw.into())
    }

    /// bmRequestType
    pub fn request_type(&self) -> CtrRequestType {
        self.bm_request_type
    }

    /// Data stage direction.
    pub fn direction(&self) -> UsbDirection {
        self.bm_request_type.direction()
    }

    /// Standard, Class or Vendor.
    pub fn request_class(&self) -> RequestType {
        self.bm_request_type.request_class()
    }

    /// Device, Interface, Endpoint or Other.
    pub fn recipient(&self) -> Recipient {
        self.bm_request_type.recipient()
    }

    /// bRequest
    pub fn request(&self) -> u8 {
        self.b_request
    }

    /// wValue
    pub fn value(&self) -> u16 {
        self.w_value
    }

    /// wIndex
    pub fn index(&self) -> u16 {
        self.w_index
    }

    /// wLength
    pub fn length(&self) -> u16 {
        self.w_length
    }

    /// Catalog lookup key of a GET_DESCRIPTOR request.
    ///
    /// Type comes from the high byte of `wValue`, index from the
    /// low byte. `wIndex` carries the language only for strings.
    pub fn descriptor_request(&self) -> DescriptorRequest {
        let kind = (self.w_value >> 8) as u8;
        let language = if kind == descriptor_type::STRING {
            self.w_index
        } else {
            0
        };
        DescriptorRequest {
            kind,
            index: (self.w_value & 0xff) as u8,
            language,
        }
    }
}

impl From<SetupPacket> for [u8; 8] {
    fn from(val: SetupPacket) -> Self {
        [
            val.bm_request_type.into(),
            val.b_request,
            (val.w_value & 0xff) as u8,
            (val.w_value >> 8) as u8,
            (val.w_index & 0xff) as u8,
            (val.w_index >> 8) as u8,
            (val.w_length & 0xff) as u8,
            (val.w_length >> 8) as u8,
        ]
    }
}

impl From<[u8; 8]> for SetupPacket {
    fn from(val: [u8; 8]) -> Self {
        SetupPacket {
            bm_request_type: val[0].into(),
            b_request: val[1],
            w_value: u16::from_le_bytes([val[2], val[3]]),
            w_index: u16::from_le_bytes([val[4], val[5]]),
            w_length: u16::from_le_bytes([val[6], val[7]]),
        }
    }
}

impl fmt::Display for SetupPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bRequestType: 0x{:02x} ({}, {:?}, {:?}), bRequest: 0x{:02x}, \
             wValue: 0x{:04x}, wIndex: 0x{:04x}, wLength: {}",
            u8::from(self.bm_request_type),
            match self.direction() {
                UsbDirection::In => "IN",
                UsbDirection::Out => "OUT",
            },
            self.request_class(),
            self.recipient(),
            self.b_request,
            self.w_value,
            self.w_index,
            self.w_length,
        )
    }
}

/// Key of a Descriptor Catalog lookup.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct DescriptorRequest {
    /// Descriptor type, see [`descriptor_type`].
    pub kind: u8,
    /// Descriptor index.
    pub index: u8,
    /// Language ID, strings only. Zero otherwise.
    pub language: u16,
}

/// Transfer type, bits 1..0 of bmAttributes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransferType {
    #[allow(missing_docs)]
    Control = 0,
    #[allow(missing_docs)]
    Isochronous = 1,
    #[allow(missing_docs)]
    Bulk = 2,
    #[allow(missing_docs)]
    Interrupt = 3,
}

/// A non-control endpoint declared by a configuration.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct EndpointDescriptor {
    /// Direction bit and endpoint number.
    pub address: EndpointAddress,
    /// Transfer type.
    pub transfer: TransferType,
    /// wMaxPacketSize
    pub max_packet_size: u16,
    /// bInterval, interrupt and isochronous endpoints.
    pub interval: u8,
}

/// bLength of an endpoint descriptor.
pub const ENDPOINT_DESCRIPTOR_SIZE: u8 = 7;

impl EndpointDescriptor {
    /// Bulk endpoint at `address`.
    pub fn bulk(address: u8, max_packet_size: u16) -> Self {
        EndpointDescriptor {
            address: address.into(),
            transfer: TransferType::Bulk,
            max_packet_size,
            interval: 0,
        }
    }

    /// Interrupt endpoint at `address`.
    pub fn interrupt(address: u8, max_packet_size: u16, interval: u8) -> Self {
        EndpointDescriptor {
            address: address.into(),
            transfer: TransferType::Interrupt,
            max_packet_size,
            interval,
        }
    }

    /// Raw bEndpointAddress
    pub fn address_byte(&self) -> u8 {
        self.address.into()
    }

    /// IN endpoints move data to the host.
    pub fn direction(&self) -> UsbDirection {
        self.address.direction()
    }

    /// Descriptor bytes, as found in a configuration descriptor.
    pub fn to_bytes(&self) -> [u8; ENDPOINT_DESCRIPTOR_SIZE as usize] {
        let mps = self.max_packet_size.to_le_bytes();
        [
            ENDPOINT_DESCRIPTOR_SIZE,
            descriptor_type::ENDPOINT,
            self.address_byte(),
            self.transfer as u8,
            mps[0],
            mps[1],
            self.interval,
        ]
    }
}
