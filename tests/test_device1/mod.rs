//! `TestDevice` profile and `TestCtx` harness shared by tests.
#![allow(dead_code)]

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use usb_device::UsbDirection;

use usbd_raw_gadget::prelude::*;
use usbd_raw_gadget::profiles::{configuration_descriptor, interface_descriptor, DeviceInfo};
use usbd_raw_gadget::{init_test_logging, BusEvent, SetupPacket};

pub const EP_OUT: u8 = 0x01;
pub const EP_IN: u8 = 0x82;
pub const MAX_PACKET: u16 = 512;

pub const REQ_GET_BYTE: u8 = 1;
pub const REQ_SET_BYTE: u8 = 2;

pub const TIMEOUT: Duration = Duration::from_secs(2);

pub const INFO: DeviceInfo = DeviceInfo {
    vendor_id: 0x1234,
    product_id: 0x5678,
    release: 0x0200,
    class: 0xff,
    subclass: 0,
    protocol: 0,
    max_packet_size_0: 64,
};

pub fn bulk_out() -> EndpointDescriptor {
    EndpointDescriptor::bulk(EP_OUT, MAX_PACKET)
}

pub fn bulk_in() -> EndpointDescriptor {
    EndpointDescriptor::bulk(EP_IN, MAX_PACKET)
}

pub struct TestDevice {
    catalog: StaticCatalog,
    pub byte: u8,
    pub alt_setting: u8,
    pub self_powered: bool,
    pub resets: u32,
    pub vendor_requests: Vec<u8>,
    sink: Sender<Vec<u8>>,
    source: Receiver<Vec<u8>>,
}

impl TestDevice {
    pub fn new(sink: Sender<Vec<u8>>, source: Receiver<Vec<u8>>) -> Self {
        let body: Vec<u8> = [
            &interface_descriptor(0, 2, 0xff, 0x10, 0x12)[..],
            &bulk_out().to_bytes()[..],
            &bulk_in().to_bytes()[..],
        ]
        .concat();

        let catalog = StaticCatalog::new()
            .with(descriptor_type::DEVICE, 0, INFO.device_descriptor())
            .with(
                descriptor_type::CONFIGURATION,
                0,
                configuration_descriptor(1, 1, 250, false, &body),
            )
            .with_languages(&[0x0409])
            .with_string(1, "TestManufacturer")
            .with_string(2, "TestProduct")
            .with_string(3, "TestSerial");

        TestDevice {
            catalog,
            byte: 0,
            alt_setting: 0,
            self_powered: false,
            resets: 0,
            vendor_requests: Vec::new(),
            sink,
            source,
        }
    }
}

fn get_byte(p: &mut TestDevice, _setup: &SetupPacket) -> Reply<TestDevice> {
    Reply::Send(vec![1, 2, p.byte])
}

fn set_byte(_p: &mut TestDevice, setup: &SetupPacket) -> Reply<TestDevice> {
    if setup.length() == 0 {
        return Reply::Stall;
    }
    Reply::Receive(store_byte)
}

fn store_byte(p: &mut TestDevice, _setup: &SetupPacket, data: &[u8]) {
    if let Some(byte) = data.first() {
        p.byte = *byte;
    }
}

fn vendor(p: &mut TestDevice, setup: &SetupPacket) -> Reply<TestDevice> {
    p.vendor_requests.push(setup.request());
    match setup.direction() {
        UsbDirection::In => Reply::Send(vec![setup.request()]),
        UsbDirection::Out => Reply::Ack,
    }
}

impl DeviceProfile for TestDevice {
    fn catalog(&self) -> &dyn DescriptorCatalog {
        &self.catalog
    }

    fn handlers(&self) -> HandlerTable<Self> {
        HandlerTable::new()
            .class(REQ_GET_BYTE, "GET_BYTE", get_byte)
            .class(REQ_SET_BYTE, "SET_BYTE", set_byte)
            .vendor_fallback(vendor)
    }

    fn configurations(&self) -> Vec<Configuration> {
        vec![Configuration {
            value: 1,
            max_power_ma: 250,
            interfaces: vec![0],
            endpoints: vec![bulk_out(), bulk_in()],
        }]
    }

    fn endpoint_io(&mut self, ep: &EndpointDescriptor) -> Option<EndpointIo> {
        match ep.address_byte() {
            EP_OUT => {
                let tx = self.sink.clone();
                Some(EndpointIo::sink(move |data: &[u8]| {
                    tx.send(data.to_vec()).ok();
                }))
            }
            EP_IN => Some(EndpointIo::source(ChannelSource::new(self.source.clone()))),
            _ => None,
        }
    }

    fn set_interface(&mut self, interface: u8, alt: u8) -> bool {
        if interface == 0 && alt <= 1 {
            self.alt_setting = alt;
            true
        } else {
            false
        }
    }

    fn self_powered(&self) -> bool {
        self.self_powered
    }

    fn on_reset(&mut self) {
        self.resets += 1;
    }
}

/// A started gadget connected to a scripted host.
pub struct TestCtx {
    pub host: EmulatedChannel,
    pub gadget: Gadget<EmulatedChannel, TestDevice>,
    /// Data the device received on `EP_OUT`.
    pub from_host: Receiver<Vec<u8>>,
    /// Data for the device to send on `EP_IN`.
    pub to_host: Sender<Vec<u8>>,
}

impl TestCtx {
    /// Started and connected, not configured.
    pub fn new() -> Self {
        Self::with_config(GadgetConfig::default())
    }

    pub fn with_config(config: GadgetConfig) -> Self {
        init_test_logging();

        let (sink_tx, from_host) = crossbeam_channel::unbounded();
        let (to_host, source_rx) = crossbeam_channel::unbounded();

        let host = EmulatedChannel::new();
        let mut gadget = Gadget::new(host.clone(), TestDevice::new(sink_tx, source_rx), config);
        gadget.start().expect("start");

        host.push_connect();
        let mut ctx = TestCtx {
            host,
            gadget,
            from_host,
            to_host,
        };
        ctx.run();
        ctx.host.clear_ops();
        ctx
    }

    /// Connected and configuration 1 selected.
    pub fn configured() -> Self {
        Self::configured_with(GadgetConfig::default())
    }

    pub fn configured_with(config: GadgetConfig) -> Self {
        let mut ctx = Self::with_config(config);
        ctx.host.set_configuration(1);
        ctx.run();
        ctx.host.clear_ops();
        ctx
    }

    /// Handle every queued event.
    pub fn run(&mut self) -> Vec<BusEvent> {
        let mut events = Vec::new();
        while self.host.pending_events() > 0 {
            events.push(self.gadget.step().expect("step"));
        }
        events
    }

    /// Last data stage sent by the device.
    pub fn last_write(&self) -> Vec<u8> {
        self.host.ep0_writes().pop().expect("no ep0 write")
    }

    pub fn profile(&self) -> &TestDevice {
        self.gadget.profile()
    }
}

/// Wait until `cond` holds, or fail.
pub fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        if Instant::now() > deadline {
            panic!("timeout waiting for {}", what);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
