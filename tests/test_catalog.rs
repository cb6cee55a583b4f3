use usbd_raw_gadget::prelude::*;
use usbd_raw_gadget::{init_test_logging, language_descriptor, DescriptorRequest, Op};

/// A device whose report descriptors come from a lookup function.
struct Lamp {
    catalog: StaticCatalog,
}

impl Lamp {
    fn new() -> Self {
        let catalog = StaticCatalog::new()
            .with(descriptor_type::DEVICE, 0, vec![18, 1, 0, 2, 0, 0, 0, 64, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1])
            // shadowed by the lookup below
            .with(descriptor_type::REPORT, 0, vec![0xee])
            .with_lookup(
                descriptor_type::REPORT,
                Box::new(|index: u8, _: u16| match index {
                    0 => Some(vec![0x05, 0x08]),
                    1 => Some(vec![0x05, 0x09, 0xc0]),
                    _ => None,
                }),
            );
        Lamp { catalog }
    }
}

impl DeviceProfile for Lamp {
    fn catalog(&self) -> &dyn DescriptorCatalog {
        &self.catalog
    }

    fn configurations(&self) -> Vec<Configuration> {
        vec![Configuration {
            value: 1,
            max_power_ma: 100,
            interfaces: vec![0],
            endpoints: vec![],
        }]
    }
}

fn report_request(index: u8) -> DescriptorRequest {
    DescriptorRequest {
        kind: descriptor_type::REPORT,
        index,
        language: 0,
    }
}

#[test]
fn test_lookup_function_overrides_table() {
    let lamp = Lamp::new();

    let found = lamp.catalog.lookup(&report_request(0)).expect("report 0");
    assert_eq!(&found[..], &[0x05, 0x08]);
    let found = lamp.catalog.lookup(&report_request(1)).expect("report 1");
    assert_eq!(&found[..], &[0x05, 0x09, 0xc0]);
    assert!(lamp.catalog.lookup(&report_request(2)).is_none());

    // other types still come from the tables
    let device = DescriptorRequest {
        kind: descriptor_type::DEVICE,
        index: 0,
        language: 0,
    };
    assert_eq!(lamp.catalog.lookup(&device).expect("device").len(), 18);
}

#[test]
fn test_lookup_function_served_and_missing_stalls() {
    init_test_logging();

    let host = EmulatedChannel::new();
    let mut gadget = Gadget::new(host.clone(), Lamp::new(), GadgetConfig::default());
    gadget.start().expect("start");
    host.push_connect();
    host.clear_ops();

    let get_report = |index: u8| {
        host.control_read(
            CtrRequestType::to_host().interface(),
            usb_device::control::Request::GET_DESCRIPTOR,
            ((descriptor_type::REPORT as u16) << 8) | index as u16,
            0,
            255,
        )
    };
    get_report(1);
    get_report(7);
    while host.pending_events() > 0 {
        gadget.step().expect("step");
    }

    assert_eq!(
        host.ops(),
        vec![Op::Ep0Write(vec![0x05, 0x09, 0xc0]), Op::Ep0Stall]
    );
}

#[test]
fn test_language_table_capped() {
    let languages: Vec<u16> = (1..=200).collect();
    let desc = language_descriptor(&languages);

    assert_eq!(desc[0] as usize, desc.len());
    assert_eq!(desc.len(), 254);
    assert_eq!(desc[1], descriptor_type::STRING);
    // first 126 languages kept, in order
    assert_eq!(u16::from_le_bytes([desc[2], desc[3]]), 1);
    assert_eq!(u16::from_le_bytes([desc[252], desc[253]]), 126);

    assert_eq!(language_descriptor(&[0x0409]), vec![4, 3, 0x09, 0x04]);
}
