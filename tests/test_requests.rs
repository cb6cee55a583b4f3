mod test_device1;
use test_device1::*;

use usbd_raw_gadget::prelude::*;
use usbd_raw_gadget::Op;

fn class_in() -> CtrRequestType {
    CtrRequestType::to_host().class().interface()
}

fn class_out() -> CtrRequestType {
    CtrRequestType::to_device().class().interface()
}

#[test]
fn test_class_request_in() {
    let mut ctx = TestCtx::configured();

    ctx.host.control_read(class_in(), REQ_GET_BYTE, 0, 0, 3);
    ctx.run();
    assert_eq!(ctx.last_write(), vec![1, 2, 0]);
}

#[test]
fn test_class_request_in_truncated() {
    let mut ctx = TestCtx::configured();

    ctx.host.control_read(class_in(), REQ_GET_BYTE, 0, 0, 2);
    ctx.run();
    assert_eq!(ctx.last_write(), vec![1, 2]);
}

#[test]
fn test_class_request_out_with_data() {
    let mut ctx = TestCtx::configured();

    ctx.host.control_write(class_out(), REQ_SET_BYTE, 0, 0, &[42]);
    ctx.run();
    assert_eq!(ctx.host.ops(), vec![Op::Ep0Read(1)]);
    assert_eq!(ctx.profile().byte, 42);

    ctx.host.control_read(class_in(), REQ_GET_BYTE, 0, 0, 3);
    ctx.run();
    assert_eq!(ctx.last_write(), vec![1, 2, 42]);
}

#[test]
fn test_class_request_out_rejected() {
    let mut ctx = TestCtx::configured();

    // no data stage
    ctx.host.control_write(class_out(), REQ_SET_BYTE, 0, 0, &[]);
    ctx.run();
    assert_eq!(ctx.host.ops(), vec![Op::Ep0Stall]);
    assert_eq!(ctx.profile().byte, 0);
}

#[test]
fn test_unknown_class_request_stalls_and_next_is_served() {
    let mut ctx = TestCtx::new();

    ctx.host.control_read(class_in(), 7, 0, 0, 4);
    ctx.host.device_get_status();
    let events = ctx.run();

    assert_eq!(events.len(), 2);
    assert_eq!(ctx.host.ops(), vec![Op::Ep0Stall, Op::Ep0Write(vec![0, 0])]);
}

#[test]
fn test_reply_direction_mismatch_stalls() {
    let mut ctx = TestCtx::configured();

    // GET_BYTE replies with data, but the host announces no data
    // stage towards itself
    ctx.host.control_write(class_out(), REQ_GET_BYTE, 0, 0, &[]);
    ctx.run();
    assert_eq!(ctx.host.ops(), vec![Op::Ep0Stall]);
}

#[test]
fn test_vendor_fallback() {
    let mut ctx = TestCtx::new();

    ctx.host
        .control_read(CtrRequestType::to_host().vendor(), 0x55, 0, 0, 1);
    ctx.run();
    assert_eq!(ctx.last_write(), vec![0x55]);

    ctx.host.clear_ops();
    ctx.host
        .control_write(CtrRequestType::to_device().vendor(), 0x56, 0, 0, &[9, 9]);
    ctx.run();
    // unexpected data stage is read and dropped
    assert_eq!(ctx.host.ops(), vec![Op::Ep0Read(2)]);

    assert_eq!(ctx.profile().vendor_requests, vec![0x55, 0x56]);
}

#[test]
fn test_vendor_ack_without_data() {
    let mut ctx = TestCtx::new();

    ctx.host
        .control_write(CtrRequestType::to_device().vendor(), 0x10, 0, 0, &[]);
    ctx.run();
    assert_eq!(ctx.host.ops(), vec![Op::Ep0Read(0)]);
}

#[test]
fn test_reserved_request_type_stalls() {
    let mut ctx = TestCtx::new();

    ctx.host.push_setup(
        SetupPacket::new(CtrRequestType::from(0xe0), 1, 0, 0, 0),
        None,
    );
    ctx.run();
    assert_eq!(ctx.host.ops(), vec![Op::Ep0Stall]);
}

#[test]
fn test_handler_table_lookup() {
    use usb_device::control::RequestType;

    let table: HandlerTable<TestDevice> = HandlerTable::new();
    assert!(table.is_empty());
    assert!(table.lookup(RequestType::Class, 1).is_none());
    assert!(table.lookup(RequestType::Vendor, 1).is_none());

    let (tx, _rx) = crossbeam_channel::unbounded();
    let (_tx, rx) = crossbeam_channel::unbounded();
    let dev = TestDevice::new(tx, rx);
    let table = dev.handlers();

    assert_eq!(table.len(), 2);
    assert_eq!(table.lookup(RequestType::Class, REQ_GET_BYTE).map(|e| e.0), Some("GET_BYTE"));
    assert!(table.lookup(RequestType::Class, 9).is_none());
    // standard requests never go through the table
    assert!(table.lookup(RequestType::Standard, REQ_GET_BYTE).is_none());
    assert_eq!(table.lookup(RequestType::Vendor, 0x77).map(|e| e.0), Some("vendor"));
}

#[test]
fn test_stalled_data_stage_not_seen_by_next_request() {
    let mut ctx = TestCtx::configured();

    // unknown request, its data stage is never read
    ctx.host.control_write(class_out(), 0x55, 0, 0, &[0xaa]);
    ctx.host.control_write(class_out(), REQ_SET_BYTE, 0, 0, &[0x07]);
    ctx.run();

    assert_eq!(ctx.host.ops(), vec![Op::Ep0Stall, Op::Ep0Read(1)]);
    assert_eq!(ctx.profile().byte, 0x07);
}

#[test]
fn test_data_stage_belongs_to_its_setup() {
    let host = EmulatedChannel::new();
    host.control_write(CtrRequestType::to_device().vendor(), 0x56, 0, 0, &[1, 2, 3]);
    host.control_write(CtrRequestType::to_device().vendor(), 0x57, 0, 0, &[4]);

    host.fetch_event().expect("first setup");
    // a zero-length read is a status stage and consumes nothing
    assert_eq!(host.ep0_read(&mut []).expect("status"), 0);
    let mut buf = [0u8; 4];
    assert_eq!(host.ep0_read(&mut buf).expect("data"), 3);
    assert_eq!(&buf[..3], &[1, 2, 3]);

    host.control_write(CtrRequestType::to_device().vendor(), 0x58, 0, 0, &[]);
    host.fetch_event().expect("second setup");
    // left unread
    host.fetch_event().expect("third setup");
    assert_eq!(host.ep0_read(&mut buf).expect("no data"), 0);
}
