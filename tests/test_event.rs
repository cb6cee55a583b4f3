use usbd_raw_gadget::prelude::*;
use usbd_raw_gadget::transport::{EndpointCaps, EndpointInfo, TransferError};
use usbd_raw_gadget::{event_type, ChannelOp, RawEvent, EVENT_HEADER_SIZE};

use nix::errno::Errno;
use usb_device::control::{Recipient, RequestType};
use usb_device::UsbDirection;

#[test]
fn test_decode_control() {
    let setup = SetupPacket::new(CtrRequestType::to_host(), 6, 0x0100, 0, 18);
    let event = RawEvent::control(setup).decode();

    match event {
        BusEvent::Control(s) => {
            assert_eq!(s, setup);
            assert_eq!(s.direction(), UsbDirection::In);
            assert_eq!(s.request_class(), RequestType::Standard);
            assert_eq!(s.recipient(), Recipient::Device);
            assert_eq!(s.length(), 18);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_decode_bus_events() {
    let cases = [
        (event_type::CONNECT, BusEvent::Connect),
        (event_type::SUSPEND, BusEvent::Suspend),
        (event_type::RESUME, BusEvent::Resume),
        (event_type::RESET, BusEvent::Reset),
        (event_type::DISCONNECT, BusEvent::Disconnect),
    ];
    for (kind, expected) in cases {
        assert_eq!(RawEvent::new(kind, &[]).decode(), expected);
    }
}

#[test]
fn test_decode_unknown_and_invalid() {
    assert_eq!(
        RawEvent::new(77, &[0; 5]).decode(),
        BusEvent::Unknown { kind: 77, length: 5 }
    );
    assert_eq!(
        RawEvent::new(event_type::INVALID, &[]).decode(),
        BusEvent::Unknown {
            kind: event_type::INVALID,
            length: 0
        }
    );
    assert_eq!(
        RawEvent::new(event_type::CONTROL, &[0x80, 6]).decode(),
        BusEvent::Malformed {
            kind: event_type::CONTROL,
            length: 2
        }
    );
}

#[test]
fn test_control_extra_payload_ignored() {
    let mut data = vec![0x80, 6, 0, 1, 0, 0, 64, 0];
    data.extend_from_slice(&[0xaa; 4]);

    match RawEvent::new(event_type::CONTROL, &data).decode() {
        BusEvent::Control(s) => {
            assert_eq!(s.value(), 0x0100);
            assert_eq!(s.length(), 64);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_wire_record() {
    let setup = SetupPacket::new(CtrRequestType::to_device(), 9, 1, 0, 0);
    let event = RawEvent::control(setup);
    let bytes = event.to_bytes();

    assert_eq!(bytes.len(), EVENT_HEADER_SIZE + 8);
    assert_eq!(RawEvent::from_bytes(&bytes), event);

    // length field larger than the buffer
    let mut short = bytes.clone();
    short.truncate(EVENT_HEADER_SIZE + 3);
    let parsed = RawEvent::from_bytes(&short);
    assert_eq!(parsed.data.len(), 3);
    assert!(matches!(parsed.decode(), BusEvent::Malformed { .. }));

    // no room for the header
    assert_eq!(RawEvent::from_bytes(&[1, 0]).kind, event_type::INVALID);
}

#[test]
fn test_descriptor_request() {
    let setup = SetupPacket::new(CtrRequestType::to_host(), 6, 0x0302, 0x0409, 255);
    let req = setup.descriptor_request();
    assert_eq!(req.kind, descriptor_type::STRING);
    assert_eq!(req.index, 2);
    assert_eq!(req.language, 0x0409);

    // language only applies to strings
    let setup = SetupPacket::new(CtrRequestType::to_host().interface(), 6, 0x2200, 1, 63);
    let req = setup.descriptor_request();
    assert_eq!(req.kind, descriptor_type::REPORT);
    assert_eq!(req.index, 0);
    assert_eq!(req.language, 0);
}

#[test]
fn test_request_type_byte() {
    assert_eq!(u8::from(CtrRequestType::to_host().class().interface()), 0xa1);
    assert_eq!(u8::from(CtrRequestType::to_device().vendor().endpoint()), 0x42);

    let reqt = CtrRequestType::from(0xc0);
    assert_eq!(reqt.direction(), UsbDirection::In);
    assert_eq!(reqt.request_class(), RequestType::Vendor);
    assert_eq!(reqt.recipient(), Recipient::Device);
}

#[test]
fn test_endpoint_descriptor_bytes() {
    let ep = EndpointDescriptor::interrupt(0x81, 8, 10);
    assert_eq!(ep.to_bytes(), [7, 5, 0x81, 0x03, 8, 0, 10]);
    assert_eq!(ep.direction(), UsbDirection::In);

    let ep = EndpointDescriptor::bulk(0x02, 512);
    assert_eq!(ep.to_bytes(), [7, 5, 0x02, 0x02, 0x00, 0x02, 0]);
    assert_eq!(ep.direction(), UsbDirection::Out);
}

#[test]
fn test_transfer_error_classification() {
    assert_eq!(
        TransferError::from(Errno::ESHUTDOWN),
        TransferError::Invalidated(Errno::ESHUTDOWN)
    );
    assert_eq!(
        TransferError::from(Errno::ENODEV),
        TransferError::Invalidated(Errno::ENODEV)
    );
    assert_eq!(
        TransferError::from(Errno::ETIMEDOUT),
        TransferError::Failed(Errno::ETIMEDOUT)
    );
}

#[test]
fn test_endpoint_info_supports() {
    let info = EndpointInfo {
        name: "ep2in-bulk".to_string(),
        address: Some(2),
        caps: EndpointCaps::BULK | EndpointCaps::DIR_IN,
        max_packet_limit: 512,
        max_streams: 0,
    };

    assert!(info.supports(&EndpointDescriptor::bulk(0x82, 512)));
    assert!(!info.supports(&EndpointDescriptor::bulk(0x81, 512)));
    assert!(!info.supports(&EndpointDescriptor::bulk(0x02, 512)));
    assert!(!info.supports(&EndpointDescriptor::bulk(0x82, 1024)));
    assert!(!info.supports(&EndpointDescriptor::interrupt(0x82, 8, 1)));
}

#[test]
fn test_error_messages() {
    let err = GadgetError::Channel {
        op: ChannelOp::EpEnable,
        errno: Errno::EBUSY,
    };
    assert!(err.to_string().starts_with("USB_RAW_IOCTL_EP_ENABLE failed"));
    assert_eq!(err.errno(), Some(Errno::EBUSY));
}
