//! Ready-made device profiles.
//!
//! * [`PrinterProfile`] - USB printer class, bidirectional.
//! * [`KeyboardProfile`] - HID boot keyboard.
//!
//! Also has the descriptor builders they share.
//!
use crate::usbdata::descriptor_type;

pub mod keyboard;
pub mod printer;

pub use keyboard::{key_report, KeyboardProfile, BOOT_KEYBOARD_REPORT};
pub use printer::PrinterProfile;

/// Manufacturer string index.
pub const STRING_MANUFACTURER: u8 = 1;
/// Product string index.
pub const STRING_PRODUCT: u8 = 2;
/// Serial number string index.
pub const STRING_SERIAL: u8 = 3;

/// Device descriptor fields that differ between devices.
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    /// idVendor
    pub vendor_id: u16,
    /// idProduct
    pub product_id: u16,
    /// bcdDevice
    pub release: u16,
    /// bDeviceClass, 0 to use interface classes.
    pub class: u8,
    /// bDeviceSubClass
    pub subclass: u8,
    /// bDeviceProtocol
    pub protocol: u8,
    /// bMaxPacketSize0
    pub max_packet_size_0: u8,
}

impl DeviceInfo {
    /// 18-byte device descriptor, USB 2.0, one configuration and
    /// the three standard strings.
    pub fn device_descriptor(&self) -> Vec<u8> {
        let mut d = vec![18, descriptor_type::DEVICE];
        d.extend_from_slice(&0x0200u16.to_le_bytes());
        d.extend_from_slice(&[self.class, self.subclass, self.protocol, self.max_packet_size_0]);
        d.extend_from_slice(&self.vendor_id.to_le_bytes());
        d.extend_from_slice(&self.product_id.to_le_bytes());
        d.extend_from_slice(&self.release.to_le_bytes());
        d.extend_from_slice(&[STRING_MANUFACTURER, STRING_PRODUCT, STRING_SERIAL, 1]);
        d
    }

    /// 10-byte device qualifier for high-speed capable devices.
    pub fn device_qualifier(&self) -> Vec<u8> {
        let mut d = vec![10, descriptor_type::DEVICE_QUALIFIER];
        d.extend_from_slice(&0x0200u16.to_le_bytes());
        d.extend_from_slice(&[self.class, self.subclass, self.protocol, self.max_packet_size_0]);
        d.extend_from_slice(&[1, 0]);
        d
    }
}

/// Interface descriptor without string.
pub fn interface_descriptor(number: u8, endpoints: u8, class: u8, subclass: u8, protocol: u8) -> [u8; 9] {
    [
        9,
        descriptor_type::INTERFACE,
        number,
        0,
        endpoints,
        class,
        subclass,
        protocol,
        0,
    ]
}

/// Configuration descriptor header followed by `body`, with
/// wTotalLength filled in.
///
/// `max_power_ma` is rounded down to the 2 mA units of bMaxPower.
pub fn configuration_descriptor(
    value: u8,
    interfaces: u8,
    max_power_ma: u32,
    self_powered: bool,
    body: &[u8],
) -> Vec<u8> {
    let total = (9 + body.len()) as u16;
    let attributes = if self_powered { 0xc0 } else { 0x80 };
    let max_power = (max_power_ma / 2).min(u8::MAX as u32) as u8;

    let mut d = vec![9, descriptor_type::CONFIGURATION];
    d.extend_from_slice(&total.to_le_bytes());
    d.extend_from_slice(&[interfaces, value, 0, attributes, max_power]);
    d.extend_from_slice(body);
    d
}
