//! USB printer class device.
//!
//! One interface with a bulk OUT endpoint carrying print data and
//! a bulk IN endpoint for printer status, protocol 2
//! (bidirectional).
//!
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use usb_device::UsbDirection;

use super::{configuration_descriptor, interface_descriptor, DeviceInfo};
use super::{STRING_MANUFACTURER, STRING_PRODUCT, STRING_SERIAL};
use crate::catalog::{DescriptorCatalog, StaticCatalog, LANGUAGE_EN_US};
use crate::control::{Configuration, DeviceProfile, HandlerTable, Reply};
use crate::usbdata::{descriptor_type, EndpointDescriptor, SetupPacket};
use crate::worker::{ChannelSource, EndpointIo};

/// Printer class request: GET_DEVICE_ID
pub const GET_DEVICE_ID: u8 = 0;
/// Printer class request: GET_PORT_STATUS
pub const GET_PORT_STATUS: u8 = 1;
/// Printer class request: SOFT_RESET
pub const SOFT_RESET: u8 = 2;

/// Interface class code of printers.
pub const CLASS_PRINTER: u8 = 0x07;

/// Bulk OUT, print data from the host.
pub const EP_DATA_OUT: u8 = 0x01;
/// Bulk IN, status to the host.
pub const EP_STATUS_IN: u8 = 0x82;

const BULK_MAX_PACKET: u16 = 512;
const MAX_POWER_MA: u32 = 100;

// Paper present, selected, no error.
const DEFAULT_PORT_STATUS: u8 = 0x18;

const DEFAULT_DEVICE_ID: &str = "MFG:Linux;MDL:Raw Gadget Printer;CMD:PCL;CLS:PRINTER;";

const INFO: DeviceInfo = DeviceInfo {
    vendor_id: 0x0525,
    product_id: 0xa4a8,
    release: 0x0100,
    class: 0,
    subclass: 0,
    protocol: 0,
    max_packet_size_0: 64,
};

/// Emulated USB printer.
///
/// Print data received on the bulk OUT endpoint is forwarded to a
/// channel; whatever is sent into the status channel goes out on
/// the bulk IN endpoint.
pub struct PrinterProfile {
    catalog: StaticCatalog,
    device_id: String,
    port_status: u8,
    print_data: Sender<Vec<u8>>,
    status: Receiver<Vec<u8>>,
    soft_resets: u32,
}

impl PrinterProfile {
    /// Printer forwarding print data to `print_data` and sending
    /// chunks from `status` to the host.
    pub fn new(print_data: Sender<Vec<u8>>, status: Receiver<Vec<u8>>) -> Self {
        let body: Vec<u8> = [
            &interface_descriptor(0, 2, CLASS_PRINTER, 1, 2)[..],
            &data_out().to_bytes()[..],
            &status_in().to_bytes()[..],
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
            .with_languages(&[LANGUAGE_EN_US])
            .with_string(STRING_MANUFACTURER, "Linux")
            .with_string(STRING_PRODUCT, "Raw Gadget Printer")
            .with_string(STRING_SERIAL, "0001");

        PrinterProfile {
            catalog,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            port_status: DEFAULT_PORT_STATUS,
            print_data,
            status,
            soft_resets: 0,
        }
    }

    /// Copy and set the IEEE 1284 device ID string.
    #[must_use]
    pub fn with_device_id(mut self, id: &str) -> Self {
        self.device_id = id.to_string();
        self
    }

    /// IEEE 1284 device ID string.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// GET_PORT_STATUS value.
    pub fn port_status(&self) -> u8 {
        self.port_status
    }

    /// Set the GET_PORT_STATUS value.
    pub fn set_port_status(&mut self, status: u8) {
        self.port_status = status;
    }

    /// Number of SOFT_RESET requests received.
    pub fn soft_resets(&self) -> u32 {
        self.soft_resets
    }

    /// GET_DEVICE_ID reply: big-endian length, including the two
    /// length bytes, followed by the ID.
    fn device_id_reply(&self) -> Vec<u8> {
        let id = self.device_id.as_bytes();
        let len = (id.len() + 2).min(u16::MAX as usize) as u16;
        let mut out = len.to_be_bytes().to_vec();
        out.extend_from_slice(&id[..len as usize - 2]);
        out
    }
}

fn data_out() -> EndpointDescriptor {
    EndpointDescriptor::bulk(EP_DATA_OUT, BULK_MAX_PACKET)
}

fn status_in() -> EndpointDescriptor {
    EndpointDescriptor::bulk(EP_STATUS_IN, BULK_MAX_PACKET)
}

fn get_device_id(p: &mut PrinterProfile, setup: &SetupPacket) -> Reply<PrinterProfile> {
    if setup.direction() != UsbDirection::In {
        return Reply::Stall;
    }
    Reply::Send(p.device_id_reply())
}

fn get_port_status(p: &mut PrinterProfile, setup: &SetupPacket) -> Reply<PrinterProfile> {
    if setup.direction() != UsbDirection::In {
        return Reply::Stall;
    }
    Reply::Send(vec![p.port_status])
}

fn soft_reset(p: &mut PrinterProfile, setup: &SetupPacket) -> Reply<PrinterProfile> {
    if setup.direction() != UsbDirection::Out {
        return Reply::Stall;
    }
    p.soft_resets += 1;
    info!("printer soft reset");
    Reply::Ack
}

impl DeviceProfile for PrinterProfile {
    fn catalog(&self) -> &dyn DescriptorCatalog {
        &self.catalog
    }

    fn handlers(&self) -> HandlerTable<Self> {
        HandlerTable::new()
            .class(GET_DEVICE_ID, "GET_DEVICE_ID", get_device_id)
            .class(GET_PORT_STATUS, "GET_PORT_STATUS", get_port_status)
            .class(SOFT_RESET, "SOFT_RESET", soft_reset)
    }

    fn configurations(&self) -> Vec<Configuration> {
        vec![Configuration {
            value: 1,
            max_power_ma: MAX_POWER_MA,
            interfaces: vec![0],
            endpoints: vec![data_out(), status_in()],
        }]
    }

    fn endpoint_io(&mut self, ep: &EndpointDescriptor) -> Option<EndpointIo> {
        match ep.address_byte() {
            EP_DATA_OUT => {
                let tx = self.print_data.clone();
                Some(EndpointIo::sink(move |data: &[u8]| {
                    debug!("printer: {} bytes of print data", data.len());
                    if tx.send(data.to_vec()).is_err() {
                        warn!("printer: print data receiver is gone");
                    }
                }))
            }
            EP_STATUS_IN => Some(EndpointIo::source(ChannelSource::new(self.status.clone()))),
            _ => None,
        }
    }
}
