//! HID boot keyboard.
//!
//! One interface, boot subclass, with an interrupt IN endpoint
//! for 8-byte input reports. LED state set by the host with
//! SET_REPORT is kept in the profile.
//!
use crossbeam_channel::Receiver;
use log::{debug, info};
use usb_device::UsbDirection;

use super::{configuration_descriptor, interface_descriptor, DeviceInfo};
use super::{STRING_MANUFACTURER, STRING_PRODUCT, STRING_SERIAL};
use crate::catalog::{DescriptorCatalog, StaticCatalog, LANGUAGE_EN_US};
use crate::control::{Configuration, DeviceProfile, HandlerTable, Reply};
use crate::usbdata::{descriptor_type, EndpointDescriptor, SetupPacket};
use crate::worker::{ChannelSource, EndpointIo};

/// HID class request: GET_REPORT
pub const GET_REPORT: u8 = 0x01;
/// HID class request: GET_IDLE
pub const GET_IDLE: u8 = 0x02;
/// HID class request: GET_PROTOCOL
pub const GET_PROTOCOL: u8 = 0x03;
/// HID class request: SET_REPORT
pub const SET_REPORT: u8 = 0x09;
/// HID class request: SET_IDLE
pub const SET_IDLE: u8 = 0x0a;
/// HID class request: SET_PROTOCOL
pub const SET_PROTOCOL: u8 = 0x0b;

/// Boot protocol, as in GET/SET_PROTOCOL.
pub const PROTOCOL_BOOT: u8 = 0;
/// Report protocol, as in GET/SET_PROTOCOL.
pub const PROTOCOL_REPORT: u8 = 1;

/// Interrupt IN, input reports.
pub const EP_REPORT_IN: u8 = 0x81;

/// Size of a boot keyboard input report.
pub const REPORT_SIZE: usize = 8;

const CLASS_HID: u8 = 0x03;
const MAX_POWER_MA: u32 = 100;
const INTERVAL: u8 = 10;

// 500 ms, as recommended for keyboards
const DEFAULT_IDLE: u8 = 125;

/// Report descriptor of the boot keyboard: modifier byte,
/// reserved byte, 5 LEDs and 6 key codes.
pub const BOOT_KEYBOARD_REPORT: [u8; 63] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xa1, 0x01, // Collection (Application)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xe0, //   Usage Minimum (224)
    0x29, 0xe7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x03, //   Input (Constant)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x05, //   Usage Maximum (5)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x03, //   Output (Constant)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x81, 0x00, //   Input (Data, Array)
    0xc0, // End Collection
];

const INFO: DeviceInfo = DeviceInfo {
    vendor_id: 0x0525,
    product_id: 0xa4ac,
    release: 0x0100,
    class: 0,
    subclass: 0,
    protocol: 0,
    max_packet_size_0: 64,
};

/// Input report for `modifiers` and up to 6 pressed `keys`.
/// Extra keys are ignored.
pub fn key_report(modifiers: u8, keys: &[u8]) -> Vec<u8> {
    let mut report = vec![0u8; REPORT_SIZE];
    report[0] = modifiers;
    for (slot, key) in report[2..].iter_mut().zip(keys) {
        *slot = *key;
    }
    report
}

fn hid_descriptor() -> [u8; 9] {
    let len = (BOOT_KEYBOARD_REPORT.len() as u16).to_le_bytes();
    [
        9,
        descriptor_type::HID,
        0x11,
        0x01, // bcdHID 1.11
        0,    // country
        1,
        descriptor_type::REPORT,
        len[0],
        len[1],
    ]
}

fn report_in() -> EndpointDescriptor {
    EndpointDescriptor::interrupt(EP_REPORT_IN, REPORT_SIZE as u16, INTERVAL)
}

/// Emulated HID boot keyboard.
///
/// Input reports sent into the report channel go to the host on
/// the interrupt IN endpoint, see [`key_report`].
pub struct KeyboardProfile {
    catalog: StaticCatalog,
    reports: Receiver<Vec<u8>>,
    leds: u8,
    idle: u8,
    protocol: u8,
}

impl KeyboardProfile {
    /// Keyboard sending reports from `reports`.
    pub fn new(reports: Receiver<Vec<u8>>) -> Self {
        let body: Vec<u8> = [
            &interface_descriptor(0, 1, CLASS_HID, 1, 1)[..],
            &hid_descriptor()[..],
            &report_in().to_bytes()[..],
        ]
        .concat();

        let catalog = StaticCatalog::new()
            .with(descriptor_type::DEVICE, 0, INFO.device_descriptor())
            .with(descriptor_type::DEVICE_QUALIFIER, 0, INFO.device_qualifier())
            .with(
                descriptor_type::CONFIGURATION,
                0,
                configuration_descriptor(1, 1, MAX_POWER_MA, false, &body),
            )
            .with(descriptor_type::HID, 0, hid_descriptor())
            // one interface, so only report descriptor 0 exists
            .with_lookup(
                descriptor_type::REPORT,
                Box::new(|index: u8, _: u16| (index == 0).then(|| BOOT_KEYBOARD_REPORT.to_vec())),
            )
            .with_languages(&[LANGUAGE_EN_US])
            .with_string(STRING_MANUFACTURER, "Linux")
            .with_string(STRING_PRODUCT, "Raw Gadget Keyboard")
            .with_string(STRING_SERIAL, "0001");

        KeyboardProfile {
            catalog,
            reports,
            leds: 0,
            idle: DEFAULT_IDLE,
            protocol: PROTOCOL_REPORT,
        }
    }

    /// LED bits of the last output report.
    /// Bit 0 is Num Lock, 1 Caps Lock, 2 Scroll Lock.
    pub fn leds(&self) -> u8 {
        self.leds
    }

    /// Idle rate in 4 ms units.
    pub fn idle(&self) -> u8 {
        self.idle
    }

    /// Current protocol, `PROTOCOL_BOOT` or `PROTOCOL_REPORT`.
    pub fn protocol(&self) -> u8 {
        self.protocol
    }
}

fn get_report(_p: &mut KeyboardProfile, setup: &SetupPacket) -> Reply<KeyboardProfile> {
    if setup.direction() != UsbDirection::In {
        return Reply::Stall;
    }
    // nothing pressed
    Reply::Send(key_report(0, &[]))
}

fn set_report(_p: &mut KeyboardProfile, setup: &SetupPacket) -> Reply<KeyboardProfile> {
    if setup.direction() != UsbDirection::Out {
        return Reply::Stall;
    }
    Reply::Receive(output_report)
}

fn output_report(p: &mut KeyboardProfile, _setup: &SetupPacket, data: &[u8]) {
    if let Some(leds) = data.first() {
        p.leds = *leds;
        info!("keyboard leds: 0x{:02x}", p.leds);
    }
}

fn get_idle(p: &mut KeyboardProfile, setup: &SetupPacket) -> Reply<KeyboardProfile> {
    if setup.direction() != UsbDirection::In {
        return Reply::Stall;
    }
    Reply::Send(vec![p.idle])
}

fn set_idle(p: &mut KeyboardProfile, setup: &SetupPacket) -> Reply<KeyboardProfile> {
    if setup.direction() != UsbDirection::Out {
        return Reply::Stall;
    }
    p.idle = (setup.value() >> 8) as u8;
    debug!("keyboard idle rate {}", p.idle);
    Reply::Ack
}

fn get_protocol(p: &mut KeyboardProfile, setup: &SetupPacket) -> Reply<KeyboardProfile> {
    if setup.direction() != UsbDirection::In {
        return Reply::Stall;
    }
    Reply::Send(vec![p.protocol])
}

fn set_protocol(p: &mut KeyboardProfile, setup: &SetupPacket) -> Reply<KeyboardProfile> {
    match (setup.direction(), (setup.value() & 0xff) as u8) {
        (UsbDirection::Out, protocol @ (PROTOCOL_BOOT | PROTOCOL_REPORT)) => {
            p.protocol = protocol;
            debug!("keyboard protocol {}", protocol);
            Reply::Ack
        }
        _ => Reply::Stall,
    }
}

impl DeviceProfile for KeyboardProfile {
    fn catalog(&self) -> &dyn DescriptorCatalog {
        &self.catalog
    }

    fn handlers(&self) -> HandlerTable<Self> {
        HandlerTable::new()
            .class(GET_REPORT, "HID_REQ_GET_REPORT", get_report)
            .class(GET_IDLE, "HID_REQ_GET_IDLE", get_idle)
            .class(GET_PROTOCOL, "HID_REQ_GET_PROTOCOL", get_protocol)
            .class(SET_REPORT, "HID_REQ_SET_REPORT", set_report)
            .class(SET_IDLE, "HID_REQ_SET_IDLE", set_idle)
            .class(SET_PROTOCOL, "HID_REQ_SET_PROTOCOL", set_protocol)
    }

    fn configurations(&self) -> Vec<Configuration> {
        vec![Configuration {
            value: 1,
            max_power_ma: MAX_POWER_MA,
            interfaces: vec![0],
            endpoints: vec![report_in()],
        }]
    }

    fn endpoint_io(&mut self, ep: &EndpointDescriptor) -> Option<EndpointIo> {
        match ep.address_byte() {
            EP_REPORT_IN => Some(EndpointIo::source(ChannelSource::new(self.reports.clone()))),
            _ => None,
        }
    }

    fn on_reset(&mut self) {
        self.idle = DEFAULT_IDLE;
        self.protocol = PROTOCOL_REPORT;
    }
}
